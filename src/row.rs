//! The row engine: applies a schema to logical rows, producing annotated
//! rows of typed cells.
//!
//! Per cell the value flow is: null substitution, separator splitting,
//! default substitution, datatype parsing with facet checks, then URI
//! template expansion for the about/property/value annotations. Template
//! variables cover every column name plus the `_row`, `_sourceRow`,
//! `_column`, `_sourceColumn`, and `_name` built-ins; a null-valued
//! variable suppresses its component, which is what decides whether a
//! cell yields output.
//!
//! `rownum` counts emitted rows (blank-row suppression happens upstream);
//! `source_row` is the physical position and feeds `_sourceRow` and the
//! `#row=` fragment.

use itertools::Itertools;
use url::Url;

use crate::{
    datatype::{self, CompiledDatatype, TypedValue},
    dialect::{LogicalRow, TableSource},
    error::{Error, Mode, Result, Warning},
    metadata::{NaturalLanguage, Schema, Table, TableGroup},
    uri_template,
};

/// A column with every inherited property resolved to its effective value.
pub struct CompiledColumn {
    pub name: String,
    pub titles: NaturalLanguage,
    pub is_virtual: bool,
    pub suppress_output: bool,
    pub required: bool,
    pub ordered: bool,
    pub lang: Option<String>,
    pub separator: Option<String>,
    pub null_values: Vec<String>,
    pub default: Option<String>,
    pub about_url: Option<String>,
    pub property_url: Option<String>,
    pub value_url: Option<String>,
    pub datatype: CompiledDatatype,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub column: usize,
    pub raw: String,
    pub values: Vec<TypedValue>,
    /// False when lenient mode kept a value its datatype rejected.
    pub valid: bool,
    pub about: Option<String>,
    pub property: Option<String>,
    pub value_iri: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// 1-based count of emitted rows.
    pub number: u64,
    /// Physical row number in the source file.
    pub source_row: usize,
    pub cells: Vec<Cell>,
    pub titles: Vec<String>,
}

/// Resolves the inherited-property chain for every column of a table.
pub fn compile_columns(
    group: &TableGroup,
    table: &Table,
    schema: &Schema,
) -> Result<Vec<CompiledColumn>> {
    let mut compiled = Vec::with_capacity(schema.columns.len());
    for (index, column) in schema.columns.iter().enumerate() {
        let chain = [
            &column.inherited,
            &schema.inherited,
            &table.inherited,
            &group.inherited,
        ];
        let datatype_desc = chain
            .iter()
            .find_map(|inh| inh.datatype.as_ref())
            .cloned()
            .unwrap_or_else(|| crate::metadata::Datatype::with_base("string"));
        let lang = chain
            .iter()
            .find_map(|inh| inh.lang.as_deref())
            .or(group.context_language.as_deref())
            .map(str::to_string);

        compiled.push(CompiledColumn {
            name: column.effective_name(index),
            titles: column.titles.clone(),
            is_virtual: column.is_virtual,
            suppress_output: column.suppress_output,
            required: chain
                .iter()
                .find_map(|inh| inh.required)
                .unwrap_or(false),
            ordered: chain.iter().find_map(|inh| inh.ordered).unwrap_or(false),
            lang,
            separator: chain.iter().find_map(|inh| inh.separator.as_ref()).cloned(),
            null_values: chain
                .iter()
                .find_map(|inh| inh.null.as_ref())
                .cloned()
                .unwrap_or_else(|| vec![String::new()]),
            default: chain.iter().find_map(|inh| inh.default.as_ref()).cloned(),
            about_url: chain.iter().find_map(|inh| inh.about_url.as_ref()).cloned(),
            property_url: chain
                .iter()
                .find_map(|inh| inh.property_url.as_ref())
                .cloned(),
            value_url: chain.iter().find_map(|inh| inh.value_url.as_ref()).cloned(),
            datatype: datatype::compile(&datatype_desc)?,
        });
    }
    Ok(compiled)
}

/// Streams annotated rows for one table.
pub struct RowEngine {
    source: TableSource,
    carried: Option<LogicalRow>,
    columns: Vec<CompiledColumn>,
    row_title_indexes: Vec<usize>,
    table_url: String,
    mode: Mode,
    number: u64,
    pub warnings: Vec<Warning>,
}

impl RowEngine {
    pub fn new(
        source: TableSource,
        carried: Option<LogicalRow>,
        columns: Vec<CompiledColumn>,
        row_titles: &[String],
        table_url: String,
        mode: Mode,
    ) -> Self {
        let row_title_indexes = row_titles
            .iter()
            .filter_map(|name| columns.iter().position(|c| &c.name == name))
            .collect();
        RowEngine {
            source,
            carried,
            columns,
            row_title_indexes,
            table_url,
            mode,
            number: 0,
            warnings: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[CompiledColumn] {
        &self.columns
    }

    /// Comments collected so far (grows as data rows stream past inline
    /// comment lines).
    pub fn comments(&self) -> &[String] {
        &self.source.comments
    }

    pub fn next_row(&mut self) -> Result<Option<Row>> {
        let logical = match self.carried.take() {
            Some(row) => row,
            None => match self.source.next_row()? {
                Some(row) => row,
                None => return Ok(None),
            },
        };
        self.number += 1;
        self.annotate(logical).map(Some)
    }

    fn annotate(&mut self, logical: LogicalRow) -> Result<Row> {
        let physical_width = self.columns.iter().filter(|c| !c.is_virtual).count();
        if logical.cells.len() != physical_width {
            let err = Error::SchemaMismatch(format!(
                "row {} has {} cell(s) where the schema defines {}",
                logical.source_row,
                logical.cells.len(),
                physical_width
            ));
            if self.mode == Mode::Strict {
                return Err(err);
            }
            self.warnings.push(Warning::new(err.to_string()));
        }

        // First pass: typed values per column.
        let mut raws = Vec::with_capacity(self.columns.len());
        let mut value_lists: Vec<Vec<TypedValue>> = Vec::with_capacity(self.columns.len());
        let mut valid = vec![true; self.columns.len()];
        for (index, column) in self.columns.iter().enumerate() {
            let raw = if column.is_virtual {
                String::new()
            } else {
                logical.cells.get(index).cloned().unwrap_or_default()
            };
            let values = match self.cell_values(column, &raw) {
                Ok(values) => values,
                Err(err) if self.mode == Mode::Lenient && err.is_lenient_downgradable() => {
                    self.warnings.push(Warning::new(format!(
                        "row {}, column '{}': {err}",
                        logical.source_row, column.name
                    )));
                    valid[index] = false;
                    vec![TypedValue {
                        lexical: raw.clone(),
                        datatype_iri: crate::vocab::xsd("string"),
                        comparable: None,
                    }]
                }
                Err(err) => {
                    return Err(annotate_error(err, logical.source_row, &column.name));
                }
            };
            if column.required && values.is_empty() {
                let err = Error::parse(format!(
                    "row {}: required column '{}' is empty",
                    logical.source_row, column.name
                ));
                if self.mode == Mode::Strict {
                    return Err(err);
                }
                self.warnings.push(Warning::new(err.to_string()));
                valid[index] = false;
            }
            raws.push(raw);
            value_lists.push(values);
        }

        // Second pass: URI template expansion over the completed row.
        let row = Row {
            number: self.number,
            source_row: logical.source_row,
            titles: self
                .row_title_indexes
                .iter()
                .filter_map(|&idx| value_lists[idx].first().map(|v| v.lexical.clone()))
                .collect(),
            cells: Vec::with_capacity(self.columns.len()),
        };
        let mut row = row;
        for index in 0..self.columns.len() {
            let column = &self.columns[index];
            let expand = |template: &Option<String>| -> Result<Option<String>> {
                let Some(template) = template else {
                    return Ok(None);
                };
                let expanded = uri_template::expand(template, |name| {
                    self.template_variable(name, index, &row, &value_lists)
                })?;
                if expanded.is_empty() {
                    return Ok(None);
                }
                Ok(Some(self.resolve_against_table(&expanded)))
            };

            let about = expand(&column.about_url)?;
            let property = match expand(&column.property_url)? {
                Some(property) => Some(property),
                None => Some(format!("{}#{}", self.table_url, column.name)),
            };
            let value_iri = if value_lists[index].is_empty() {
                None
            } else {
                expand(&column.value_url)?
            };

            row.cells.push(Cell {
                column: index,
                raw: raws[index].clone(),
                values: value_lists[index].clone(),
                valid: valid[index],
                about,
                property,
                value_iri,
            });
        }
        Ok(row)
    }

    /// null, separator, default, parse.
    fn cell_values(&self, column: &CompiledColumn, raw: &str) -> Result<Vec<TypedValue>> {
        let nulled = if column.null_values.iter().any(|null| null == raw) {
            None
        } else {
            Some(raw)
        };

        let items: Vec<String> = match (nulled, &column.separator) {
            (None, _) => Vec::new(),
            (Some(value), Some(separator)) => value
                .split(separator.as_str())
                .map(|item| item.trim().to_string())
                .collect(),
            (Some(value), None) => vec![value.to_string()],
        };

        let mut defaulted: Vec<String> = Vec::new();
        if items.is_empty() {
            if let Some(default) = &column.default {
                defaulted.push(default.clone());
            }
        } else {
            for item in items {
                if item.is_empty() || column.null_values.iter().any(|null| *null == item) {
                    if let Some(default) = &column.default {
                        defaulted.push(default.clone());
                    }
                } else {
                    defaulted.push(item);
                }
            }
        }

        defaulted
            .into_iter()
            .map(|item| column.datatype.parse(&item))
            .collect()
    }

    /// Template variable lookup: built-ins first, then column values.
    fn template_variable(
        &self,
        name: &str,
        cell_index: usize,
        row: &Row,
        value_lists: &[Vec<TypedValue>],
    ) -> Option<String> {
        match name {
            "_row" => return Some(row.number.to_string()),
            "_sourceRow" => return Some(row.source_row.to_string()),
            "_name" => return Some(self.columns[cell_index].name.clone()),
            "_column" => return Some((cell_index + 1).to_string()),
            "_sourceColumn" => {
                return Some((cell_index + 1 + self.source_skip_columns()).to_string());
            }
            _ => {}
        }
        let index = self.columns.iter().position(|c| c.name == name)?;
        let values = &value_lists[index];
        match values.len() {
            0 => None,
            1 => Some(values[0].lexical.clone()),
            _ => Some(values.iter().map(|v| v.lexical.as_str()).join(",")),
        }
    }

    fn source_skip_columns(&self) -> usize {
        self.source.skip_columns()
    }

    fn resolve_against_table(&self, reference: &str) -> String {
        match Url::parse(reference) {
            Ok(url) => url.to_string(),
            Err(_) => Url::parse(&self.table_url)
                .and_then(|base| base.join(reference))
                .map(|url| url.to_string())
                .unwrap_or_else(|_| reference.to_string()),
        }
    }
}

fn annotate_error(err: Error, source_row: usize, column: &str) -> Error {
    match err {
        Error::Parse(msg) => Error::Parse(format!("row {source_row}, column '{column}': {msg}")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dialect::Dialect, metadata::parse_document};
    use serde_json::json;

    fn engine_for(metadata: serde_json::Value, csv: &str, mode: Mode) -> RowEngine {
        let mut warnings = Vec::new();
        let group = parse_document(
            &metadata,
            &Url::parse("http://example.org/meta.json").unwrap(),
            &mut warnings,
        )
        .unwrap();
        let table = &group.tables[0];
        let dialect = table
            .dialect
            .clone()
            .or(group.dialect.clone())
            .unwrap_or_default();
        let source = TableSource::open(
            dialect.resolved().unwrap(),
            Box::new(std::io::Cursor::new(csv.as_bytes().to_vec())),
        )
        .unwrap();
        let schema = table.schema.clone().unwrap_or_default();
        let columns = compile_columns(&group, table, &schema).unwrap();
        RowEngine::new(
            source,
            None,
            columns,
            &schema.row_titles,
            table.url.clone(),
            mode,
        )
    }

    fn drain(engine: &mut RowEngine) -> Vec<Row> {
        let mut rows = Vec::new();
        while let Some(row) = engine.next_row().unwrap() {
            rows.push(row);
        }
        rows
    }

    #[test]
    fn null_then_default_yields_the_default() {
        // null "NA" plus default "0" produces a typed 0
        let mut engine = engine_for(
            json!({
                "url": "data.csv",
                "tableSchema": {"columns": [
                    {"name": "x", "null": "NA", "default": "0", "datatype": "integer"}
                ]}
            }),
            "x\nNA\n7\n",
            Mode::Strict,
        );
        let rows = drain(&mut engine);
        assert_eq!(rows[0].cells[0].values[0].lexical, "0");
        assert_eq!(
            rows[0].cells[0].values[0].datatype_iri,
            crate::vocab::xsd("integer")
        );
        assert_eq!(rows[1].cells[0].values[0].lexical, "7");
    }

    #[test]
    fn empty_without_default_is_a_null_cell() {
        let mut engine = engine_for(
            json!({
                "url": "data.csv",
                "tableSchema": {"columns": [{"name": "x"}]}
            }),
            "x\n\n",
            Mode::Strict,
        );
        let rows = drain(&mut engine);
        assert!(rows[0].cells[0].values.is_empty());
    }

    #[test]
    fn separator_splits_and_parses_each_item() {
        let mut engine = engine_for(
            json!({
                "url": "data.csv",
                "tableSchema": {"columns": [
                    {"name": "nums", "separator": ";", "datatype": "integer"}
                ]}
            }),
            "nums\n1; 2 ;3\n",
            Mode::Strict,
        );
        let rows = drain(&mut engine);
        let lexicals: Vec<_> = rows[0].cells[0]
            .values
            .iter()
            .map(|v| v.lexical.as_str())
            .collect();
        assert_eq!(lexicals, vec!["1", "2", "3"]);
    }

    #[test]
    fn required_empty_cell_raises_in_strict_mode() {
        let mut engine = engine_for(
            json!({
                "url": "data.csv",
                "tableSchema": {"columns": [{"name": "x", "required": true}]}
            }),
            "x\n\n",
            Mode::Strict,
        );
        assert!(matches!(engine.next_row(), Err(Error::Parse(_))));
    }

    #[test]
    fn lenient_mode_downgrades_bad_cells() {
        let mut engine = engine_for(
            json!({
                "url": "data.csv",
                "tableSchema": {"columns": [{"name": "n", "datatype": "integer"}]}
            }),
            "n\nnot-a-number\n",
            Mode::Lenient,
        );
        let rows = drain(&mut engine);
        assert!(!rows[0].cells[0].valid);
        assert_eq!(rows[0].cells[0].values[0].lexical, "not-a-number");
        assert!(!engine.warnings.is_empty());
    }

    #[test]
    fn strict_mode_aborts_on_bad_cells() {
        let mut engine = engine_for(
            json!({
                "url": "data.csv",
                "tableSchema": {"columns": [{"name": "n", "datatype": "integer"}]}
            }),
            "n\nnope\n",
            Mode::Strict,
        );
        assert!(matches!(engine.next_row(), Err(Error::Parse(_))));
    }

    #[test]
    fn schema_mismatch_detected() {
        let mut engine = engine_for(
            json!({
                "url": "data.csv",
                "tableSchema": {"columns": [{"name": "a"}, {"name": "b"}]}
            }),
            "a,b\n1,2,3\n",
            Mode::Strict,
        );
        assert!(matches!(engine.next_row(), Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn uri_templates_expand_with_builtins() {
        let mut engine = engine_for(
            json!({
                "url": "http://example.org/data.csv",
                "tableSchema": {
                    "aboutUrl": "http://example.org/item/{id}",
                    "columns": [
                        {"name": "id"},
                        {"name": "species", "valueUrl": "http://example.org/species/{species}",
                         "propertyUrl": "http://example.org/prop/{_name}"}
                    ]
                }
            }),
            "id,species\n7,celtis\n",
            Mode::Strict,
        );
        let rows = drain(&mut engine);
        let cell = &rows[0].cells[1];
        assert_eq!(cell.about.as_deref(), Some("http://example.org/item/7"));
        assert_eq!(cell.property.as_deref(), Some("http://example.org/prop/species"));
        assert_eq!(
            cell.value_iri.as_deref(),
            Some("http://example.org/species/celtis")
        );
    }

    #[test]
    fn default_property_url_uses_table_fragment() {
        let mut engine = engine_for(
            json!({
                "url": "http://example.org/tree-ops.csv",
                "tableSchema": {"columns": [{"name": "GID"}]}
            }),
            "GID\n1\n",
            Mode::Strict,
        );
        let rows = drain(&mut engine);
        assert_eq!(
            rows[0].cells[0].property.as_deref(),
            Some("http://example.org/tree-ops.csv#GID")
        );
    }

    #[test]
    fn null_variable_suppresses_value_url() {
        let mut engine = engine_for(
            json!({
                "url": "data.csv",
                "tableSchema": {"columns": [
                    {"name": "code", "null": "NA",
                     "valueUrl": "http://example.org/c/{code}"}
                ]}
            }),
            "code\nNA\nX1\n",
            Mode::Strict,
        );
        let rows = drain(&mut engine);
        assert_eq!(rows[0].cells[0].value_iri, None);
        assert_eq!(
            rows[1].cells[0].value_iri.as_deref(),
            Some("http://example.org/c/X1")
        );
    }

    #[test]
    fn virtual_columns_take_defaults_and_templates() {
        let mut engine = engine_for(
            json!({
                "url": "http://example.org/data.csv",
                "tableSchema": {"columns": [
                    {"name": "id"},
                    {"name": "kind", "virtual": true,
                     "default": "tree",
                     "valueUrl": "http://example.org/kind/{kind}"}
                ]}
            }),
            "id\n1\n",
            Mode::Strict,
        );
        let rows = drain(&mut engine);
        let cell = &rows[0].cells[1];
        assert_eq!(cell.values[0].lexical, "tree");
        assert_eq!(cell.value_iri.as_deref(), Some("http://example.org/kind/tree"));
    }

    #[test]
    fn row_titles_capture_cell_values() {
        let mut engine = engine_for(
            json!({
                "url": "data.csv",
                "tableSchema": {
                    "rowTitles": "name",
                    "columns": [{"name": "id"}, {"name": "name"}]
                }
            }),
            "id,name\n1,Ash\n",
            Mode::Strict,
        );
        let rows = drain(&mut engine);
        assert_eq!(rows[0].titles, vec!["Ash"]);
    }

    #[test]
    fn rownum_counts_emitted_rows_while_source_row_is_physical() {
        let mut engine = engine_for(
            json!({
                "url": "data.csv",
                "dialect": {"skipBlankRows": true},
                "tableSchema": {"columns": [{"name": "a"}]}
            }),
            "a\n1\n\n2\n",
            Mode::Strict,
        );
        let rows = drain(&mut engine);
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].number, rows[0].source_row), (1, 2));
        assert_eq!((rows[1].number, rows[1].source_row), (2, 4));
    }
}
