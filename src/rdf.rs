//! RDF emission: annotated rows to CSVW-vocabulary triples.
//!
//! Standard mode surrounds cell triples with the TableGroup/Table/Row
//! skeleton, notes, common properties, and (unless disabled) a
//! `prov:Activity` describing the sources consumed. Minimal mode emits
//! cell-level triples only. Triples for a row are contiguous and in
//! column order; blank-node labels are sequential per emitter, so output
//! is deterministic modulo relabeling.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::{
    discovery::{SourceRole, UsedSource},
    metadata::{Table, TableGroup},
    row::{CompiledColumn, Row},
    term::{Literal, Term, Triple},
    vocab,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionMode {
    Standard,
    Minimal,
}

pub struct RdfEmitter {
    pub mode: EmissionMode,
    next_blank: usize,
}

impl RdfEmitter {
    pub fn new(mode: EmissionMode) -> Self {
        RdfEmitter {
            mode,
            next_blank: 0,
        }
    }

    pub fn fresh_blank(&mut self) -> Term {
        let label = format!("b{}", self.next_blank);
        self.next_blank += 1;
        Term::blank(label)
    }

    fn is_minimal(&self) -> bool {
        self.mode == EmissionMode::Minimal
    }

    /// Group skeleton: type, table membership, notes, common properties.
    pub fn group_prelude(
        &mut self,
        group: &TableGroup,
        group_subject: &Term,
        table_subjects: &[Term],
    ) -> Vec<Triple> {
        if self.is_minimal() {
            return Vec::new();
        }
        let mut out = vec![Triple::new(
            group_subject.clone(),
            Term::iri(vocab::rdf("type")),
            Term::iri(vocab::csvw("TableGroup")),
        )];
        for table_subject in table_subjects {
            out.push(Triple::new(
                group_subject.clone(),
                Term::iri(vocab::csvw("table")),
                table_subject.clone(),
            ));
        }
        for note in &group.notes {
            self.push_values(&mut out, group_subject, &vocab::csvw("note"), note);
        }
        for (iri, value) in &group.common {
            self.push_values(&mut out, group_subject, iri, value);
        }
        out
    }

    /// Table skeleton.
    pub fn table_prelude(&mut self, table: &Table, subject: &Term) -> Vec<Triple> {
        if self.is_minimal() {
            return Vec::new();
        }
        let mut out = vec![
            Triple::new(
                subject.clone(),
                Term::iri(vocab::rdf("type")),
                Term::iri(vocab::csvw("Table")),
            ),
            Triple::new(
                subject.clone(),
                Term::iri(vocab::csvw("url")),
                Term::iri(table.url.clone()),
            ),
        ];
        for note in &table.notes {
            self.push_values(&mut out, subject, &vocab::csvw("note"), note);
        }
        for (iri, value) in &table.common {
            self.push_values(&mut out, subject, iri, value);
        }
        out
    }

    /// Comments discovered while streaming the data become trailing notes.
    pub fn table_comment_notes(&mut self, subject: &Term, comments: &[String]) -> Vec<Triple> {
        if self.is_minimal() {
            return Vec::new();
        }
        comments
            .iter()
            .map(|comment| {
                Triple::new(
                    subject.clone(),
                    Term::iri(vocab::csvw("note")),
                    Term::Literal(Literal::string(comment.clone())),
                )
            })
            .collect()
    }

    /// All triples for one annotated row.
    pub fn row_triples(
        &mut self,
        table_subject: &Term,
        table_url: &str,
        columns: &[CompiledColumn],
        row: &Row,
        table_suppressed: bool,
    ) -> Vec<Triple> {
        if table_suppressed {
            return Vec::new();
        }
        let mut out = Vec::new();
        // Cells without an aboutUrl share one subject per row.
        let default_subject = self.fresh_blank();

        if !self.is_minimal() {
            let subject = self.fresh_blank();
            out.push(Triple::new(
                table_subject.clone(),
                Term::iri(vocab::csvw("row")),
                subject.clone(),
            ));
            out.push(Triple::new(
                subject.clone(),
                Term::iri(vocab::rdf("type")),
                Term::iri(vocab::csvw("Row")),
            ));
            out.push(Triple::new(
                subject.clone(),
                Term::iri(vocab::csvw("rownum")),
                Term::Literal(Literal::typed(row.number.to_string(), vocab::xsd("integer"))),
            ));
            out.push(Triple::new(
                subject.clone(),
                Term::iri(vocab::csvw("url")),
                Term::iri(format!("{table_url}#row={}", row.source_row)),
            ));
            for title in &row.titles {
                out.push(Triple::new(
                    subject.clone(),
                    Term::iri(vocab::csvw("title")),
                    Term::Literal(Literal::string(title.clone())),
                ));
            }
            // csvw:describes covers each distinct subject described by
            // this row's cells.
            let mut described: Vec<Term> = Vec::new();
            for cell in &row.cells {
                let target = match &cell.about {
                    Some(about) => Term::iri(about.clone()),
                    None => default_subject.clone(),
                };
                if !described.contains(&target) {
                    described.push(target);
                }
            }
            if described.is_empty() {
                described.push(default_subject.clone());
            }
            for target in described {
                out.push(Triple::new(
                    subject.clone(),
                    Term::iri(vocab::csvw("describes")),
                    target,
                ));
            }
        }

        for cell in &row.cells {
            let column = &columns[cell.column];
            if column.suppress_output {
                continue;
            }
            let Some(property) = &cell.property else {
                continue;
            };
            let subject = match &cell.about {
                Some(about) => Term::iri(about.clone()),
                None => default_subject.clone(),
            };
            let predicate = Term::iri(property.clone());

            if let Some(value_iri) = &cell.value_iri {
                out.push(Triple::new(subject, predicate, Term::iri(value_iri.clone())));
                continue;
            }
            if cell.values.is_empty() {
                continue;
            }
            if column.ordered && cell.values.len() > 1 {
                let head = self.rdf_list(&mut out, column, cell.values.iter());
                out.push(Triple::new(subject, predicate, head));
                continue;
            }
            for value in &cell.values {
                let object = self.cell_literal(column, &value.lexical, &value.datatype_iri, cell.valid);
                out.push(Triple::new(subject.clone(), predicate.clone(), object));
            }
        }
        out
    }

    fn cell_literal(
        &self,
        column: &CompiledColumn,
        lexical: &str,
        datatype_iri: &str,
        valid: bool,
    ) -> Term {
        if !valid {
            // Lenient mode: the offending value goes out untyped.
            return Term::Literal(Literal::string(lexical));
        }
        if datatype_iri == vocab::xsd("string")
            && let Some(lang) = &column.lang
            && lang != "und"
        {
            return Term::Literal(Literal::language_tagged(lexical, lang.clone()));
        }
        Term::Literal(Literal::typed(lexical, datatype_iri))
    }

    /// Builds an rdf:List for an ordered multi-valued cell, returning its
    /// head.
    fn rdf_list<'v>(
        &mut self,
        out: &mut Vec<Triple>,
        column: &CompiledColumn,
        values: impl Iterator<Item = &'v crate::datatype::TypedValue>,
    ) -> Term {
        let values: Vec<_> = values.collect();
        let mut head = Term::iri(vocab::rdf("nil"));
        for value in values.into_iter().rev() {
            let node = self.fresh_blank();
            out.push(Triple::new(
                node.clone(),
                Term::iri(vocab::rdf("first")),
                self.cell_literal(column, &value.lexical, &value.datatype_iri, true),
            ));
            out.push(Triple::new(node.clone(), Term::iri(vocab::rdf("rest")), head));
            head = node;
        }
        head
    }

    /// Provenance activity covering the whole run.
    pub fn provenance(
        &mut self,
        group_subject: &Term,
        sources: &[UsedSource],
        started: DateTime<Utc>,
        ended: DateTime<Utc>,
    ) -> Vec<Triple> {
        let activity = self.fresh_blank();
        let mut out = vec![
            Triple::new(
                group_subject.clone(),
                Term::iri(vocab::prov("wasGeneratedBy")),
                activity.clone(),
            ),
            Triple::new(
                activity.clone(),
                Term::iri(vocab::rdf("type")),
                Term::iri(vocab::prov("Activity")),
            ),
            Triple::new(
                activity.clone(),
                Term::iri(vocab::prov("startedAtTime")),
                Term::Literal(Literal::typed(
                    started.to_rfc3339_opts(SecondsFormat::Millis, true),
                    vocab::xsd("dateTime"),
                )),
            ),
            Triple::new(
                activity.clone(),
                Term::iri(vocab::prov("endedAtTime")),
                Term::Literal(Literal::typed(
                    ended.to_rfc3339_opts(SecondsFormat::Millis, true),
                    vocab::xsd("dateTime"),
                )),
            ),
        ];
        for source in sources {
            let usage = self.fresh_blank();
            let role = match source.role {
                SourceRole::CsvData => vocab::csvw("csvEncodedTabularData"),
                SourceRole::Metadata => vocab::csvw("tabularMetadata"),
            };
            out.push(Triple::new(
                activity.clone(),
                Term::iri(vocab::prov("qualifiedUsage")),
                usage.clone(),
            ));
            out.push(Triple::new(
                usage.clone(),
                Term::iri(vocab::rdf("type")),
                Term::iri(vocab::prov("Usage")),
            ));
            out.push(Triple::new(
                usage.clone(),
                Term::iri(vocab::prov("entity")),
                Term::iri(source.url.clone()),
            ));
            out.push(Triple::new(
                usage,
                Term::iri(vocab::prov("hadRole")),
                Term::iri(role),
            ));
        }
        out
    }

    /// Converts a common-property (or note) value into triples on
    /// `subject` under `predicate`.
    fn push_values(
        &mut self,
        out: &mut Vec<Triple>,
        subject: &Term,
        predicate: &str,
        value: &Value,
    ) {
        for object in self.value_terms(out, value) {
            out.push(Triple::new(
                subject.clone(),
                Term::iri(predicate.to_string()),
                object,
            ));
        }
    }

    fn value_terms(&mut self, out: &mut Vec<Triple>, value: &Value) -> Vec<Term> {
        match value {
            Value::Array(items) => items
                .iter()
                .flat_map(|item| self.value_terms(out, item))
                .collect(),
            Value::String(s) => vec![Term::Literal(Literal::string(s.clone()))],
            Value::Bool(b) => vec![Term::Literal(Literal::typed(
                b.to_string(),
                vocab::xsd("boolean"),
            ))],
            Value::Number(n) => {
                let datatype = if n.is_i64() || n.is_u64() {
                    vocab::xsd("integer")
                } else {
                    vocab::xsd("double")
                };
                vec![Term::Literal(Literal::typed(n.to_string(), datatype))]
            }
            Value::Null => Vec::new(),
            Value::Object(map) => {
                if let Some(Value::String(lexical)) = map.get("@value") {
                    let literal = if let Some(Value::String(lang)) = map.get("@language") {
                        Literal::language_tagged(lexical.clone(), lang.clone())
                    } else if let Some(Value::String(dt)) = map.get("@type") {
                        let datatype = vocab::expand_property_key(dt)
                            .unwrap_or_else(|| dt.clone());
                        Literal::typed(lexical.clone(), datatype)
                    } else {
                        Literal::string(lexical.clone())
                    };
                    return vec![Term::Literal(literal)];
                }
                if map.len() == 1
                    && let Some(Value::String(id)) = map.get("@id")
                {
                    return vec![Term::iri(id.clone())];
                }
                // A nested node: a fresh blank subject with its own
                // properties.
                let node = self.fresh_blank();
                for (key, nested) in map {
                    if key == "@id" {
                        continue;
                    }
                    if key == "@type" {
                        if let Value::String(ty) = nested {
                            let type_iri =
                                vocab::expand_property_key(ty).unwrap_or_else(|| ty.clone());
                            out.push(Triple::new(
                                node.clone(),
                                Term::iri(vocab::rdf("type")),
                                Term::iri(type_iri),
                            ));
                        }
                        continue;
                    }
                    let Some(expanded) = vocab::expand_property_key(key) else {
                        continue;
                    };
                    let objects = self.value_terms(out, nested);
                    for object in objects {
                        out.push(Triple::new(
                            node.clone(),
                            Term::iri(expanded.clone()),
                            object,
                        ));
                    }
                }
                vec![node]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn emitter() -> RdfEmitter {
        RdfEmitter::new(EmissionMode::Standard)
    }

    #[test]
    fn table_prelude_types_and_links() {
        let table = Table {
            url: "http://example.org/tree-ops.csv".into(),
            ..Table::default()
        };
        let mut e = emitter();
        let subject = e.fresh_blank();
        let triples = e.table_prelude(&table, &subject);
        let rendered: Vec<String> = triples.iter().map(|t| t.to_string()).collect();
        assert!(rendered[0].contains("csvw#Table"));
        assert!(rendered[1].contains("<http://example.org/tree-ops.csv>"));
    }

    #[test]
    fn minimal_mode_suppresses_skeleton() {
        let table = Table {
            url: "http://example.org/t.csv".into(),
            ..Table::default()
        };
        let mut e = RdfEmitter::new(EmissionMode::Minimal);
        let subject = e.fresh_blank();
        assert!(e.table_prelude(&table, &subject).is_empty());
        assert!(e
            .group_prelude(&TableGroup::default(), &subject, &[])
            .is_empty());
    }

    #[test]
    fn language_literals_for_string_cells() {
        let value = json!({"@value": "Straße", "@language": "de"});
        let mut e = emitter();
        let mut out = Vec::new();
        let terms = e.value_terms(&mut out, &value);
        assert_eq!(terms[0].to_string(), "\"Stra\u{df}e\"@de");
    }

    #[test]
    fn nested_common_properties_become_blank_nodes() {
        let value = json!({"@type": "schema:Person", "schema:name": "Gregg"});
        let mut e = emitter();
        let mut out = Vec::new();
        let terms = e.value_terms(&mut out, &value);
        assert!(matches!(terms[0], Term::Blank(_)));
        let rendered: Vec<String> = out.iter().map(|t| t.to_string()).collect();
        assert!(rendered.iter().any(|t| t.contains("schema.org/Person")));
        assert!(rendered.iter().any(|t| t.contains("schema.org/name") && t.contains("Gregg")));
    }

    #[test]
    fn id_objects_become_iris() {
        let mut e = emitter();
        let mut out = Vec::new();
        let terms = e.value_terms(&mut out, &json!({"@id": "http://example.org/x"}));
        assert_eq!(terms[0], Term::iri("http://example.org/x"));
        assert!(out.is_empty());
    }

    #[test]
    fn provenance_names_both_roles() {
        let mut e = emitter();
        let group = e.fresh_blank();
        let sources = vec![
            UsedSource {
                url: "http://example.org/data.csv".into(),
                role: SourceRole::CsvData,
            },
            UsedSource {
                url: "http://example.org/meta.json".into(),
                role: SourceRole::Metadata,
            },
        ];
        let now = Utc::now();
        let triples = e.provenance(&group, &sources, now, now);
        let rendered: Vec<String> = triples.iter().map(|t| t.to_string()).collect();
        assert!(rendered.iter().any(|t| t.contains("csvEncodedTabularData")));
        assert!(rendered.iter().any(|t| t.contains("tabularMetadata")));
        assert!(rendered.iter().any(|t| t.contains("startedAtTime")));
    }
}
