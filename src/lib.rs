//! Streaming CSV-on-the-Web processor.
//!
//! Given a CSV (or a CSVW metadata document), this crate locates and
//! merges the metadata that describes it, applies the schema row by row,
//! and emits either RDF triples or the canonical annotated-table JSON.
//!
//! ```no_run
//! use csvw_tabular::{Options, Reader};
//!
//! let mut reader = Reader::open("http://example.org/tree-ops.csv", Options::default())?;
//! for triple in reader.statements()? {
//!     println!("{}", triple?);
//! }
//! # Ok::<(), csvw_tabular::Error>(())
//! ```
//!
//! A reader moves through `Created → Discovered → Validated → Emitting →
//! Done`, failing terminally on the first hard error. Emission is lazy
//! and single-pass: rows stream in source order, triples for a row are
//! contiguous and in column order, tables follow declaration order.

pub mod datatype;
pub mod date_format;
pub mod dialect;
pub mod discovery;
pub mod embedded;
pub mod error;
pub mod fetch;
pub mod json;
pub mod merge;
pub mod metadata;
pub mod number_format;
pub mod rdf;
pub mod row;
pub mod term;
pub mod uri_template;
pub mod vocab;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde_json::{Map, Value, json};
use url::Url;

pub use error::{Error, Mode, Result, Warning};
pub use rdf::EmissionMode;
pub use term::{Literal, Term, Triple};

use crate::{
    dialect::Dialect,
    discovery::{SourceRole, UsedSource},
    fetch::{ContentType, DefaultFetcher, Fetched, Fetcher},
    metadata::{ForeignKeyReference, TableGroup},
    rdf::RdfEmitter,
    row::RowEngine,
};

/// Caller-facing knobs, mirroring the processor options of the CSVW
/// recommendations.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Programmatic metadata, highest merge precedence.
    pub user_metadata: Option<Value>,
    /// Emit only cell-level output (no Table/Row skeleton, no provenance).
    pub minimal: bool,
    /// Suppress the `prov:Activity` block in standard mode.
    pub no_prov: bool,
    /// Strict validation: abort on any error, and check primary/foreign
    /// keys in [`Reader::validate`].
    pub validate: bool,
    /// Base URL for resolving a relative source.
    pub base: Option<String>,
    /// Replaces the HTTP `Link` header of the CSV response.
    pub http_link_override: Option<String>,
    /// Replaces the `Content-Type` of the CSV response.
    pub content_type_override: Option<String>,
}

impl Options {
    fn mode(&self) -> Mode {
        if self.validate { Mode::Strict } else { Mode::Lenient }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Discovered,
    Validated,
    Emitting,
    Done,
    Failed,
}

/// One table prepared for emission.
struct TableRun {
    table_index: usize,
    url: String,
    engine: RowEngine,
    suppress_output: bool,
}

pub struct Reader {
    options: Options,
    fetcher: Box<dyn Fetcher>,
    state: State,
    started: DateTime<Utc>,
    warnings: Vec<Warning>,
    sources: Vec<UsedSource>,
    group: TableGroup,
    runs: Vec<TableRun>,
}

impl Reader {
    /// Opens `source` (a URL or a local path) with the default fetcher.
    pub fn open(source: &str, options: Options) -> Result<Self> {
        Self::open_with_fetcher(source, options, Box::new(DefaultFetcher::new()))
    }

    /// Opens `source` against a caller-supplied fetcher.
    pub fn open_with_fetcher(
        source: &str,
        options: Options,
        fetcher: Box<dyn Fetcher>,
    ) -> Result<Self> {
        let mut reader = Reader {
            options,
            fetcher,
            state: State::Created,
            started: Utc::now(),
            warnings: Vec::new(),
            sources: Vec::new(),
            group: TableGroup::default(),
            runs: Vec::new(),
        };
        if let Err(err) = reader.prepare(source) {
            reader.state = State::Failed;
            return Err(err);
        }
        Ok(reader)
    }

    /// Discovery, embedded extraction, merge, validation, row-engine
    /// construction.
    fn prepare(&mut self, source: &str) -> Result<()> {
        let source_url = self.resolve_source(source)?;
        debug!("opening {source_url}");

        let (mut group, entry_csv) = if self.is_metadata_entry(&source_url) {
            let group = discovery::load_metadata_url(
                &source_url,
                self.options.user_metadata.as_ref(),
                self.fetcher.as_ref(),
                &mut self.warnings,
                &mut self.sources,
            )?;
            (group, None)
        } else {
            let found = discovery::discover_for_csv(
                &source_url,
                self.options.user_metadata.as_ref(),
                self.options.http_link_override.as_deref(),
                self.fetcher.as_ref(),
                &mut self.warnings,
            )?;
            let mut group = found.group.unwrap_or_default();
            discovery::ensure_table(&mut group, &source_url);
            self.sources = found.sources;
            (group, Some(found.csv))
        };
        self.state = State::Discovered;

        // Open every table's CSV, extract embedded metadata, and merge it
        // in at lowest precedence.
        let mut prepared = Vec::new();
        let mut entry_csv = entry_csv;
        for index in 0..group.tables.len() {
            let table_url = group.tables[index].url.clone();
            let fetched = match entry_csv
                .take_if(|csv| csv.url == table_url)
            {
                Some(csv) => csv,
                None => {
                    let url = Url::parse(&table_url)?;
                    let fetched = self.fetcher.fetch(&url, Some("text/csv"))?;
                    self.sources.push(UsedSource {
                        url: fetched.url.clone(),
                        role: SourceRole::CsvData,
                    });
                    fetched
                }
            };

            let dialect = self.effective_dialect(&group, index, &fetched);
            let mut source = dialect::TableSource::open(
                dialect.resolved()?,
                Box::new(std::io::Cursor::new(fetched.body)),
            )?;
            let (embedded_table, carried) = embedded::extract(&table_url, &mut source)?;
            group = merge::merge(group, TableGroup::from_table(embedded_table));
            prepared.push((index, table_url, source, carried));
        }

        group.validate(&mut self.warnings)?;
        self.state = State::Validated;

        for (table_index, url, source, carried) in prepared {
            let table = &group.tables[table_index];
            let schema = table.schema.clone().unwrap_or_default();
            let columns = row::compile_columns(&group, table, &schema)?;
            self.runs.push(TableRun {
                table_index,
                url: url.clone(),
                suppress_output: table.suppress_output,
                engine: RowEngine::new(
                    source,
                    carried,
                    columns,
                    &schema.row_titles,
                    url,
                    self.options.mode(),
                ),
            });
        }
        self.group = group;
        info!(
            "prepared {} table(s) from {} source(s)",
            self.runs.len(),
            self.sources.len()
        );
        Ok(())
    }

    fn resolve_source(&self, source: &str) -> Result<Url> {
        if let Some(base) = &self.options.base {
            let base = Url::parse(base)?;
            return Ok(base.join(source)?);
        }
        if let Ok(url) = Url::parse(source) {
            return Ok(url);
        }
        let path = std::path::absolute(source)
            .map_err(|err| Error::io(format!("resolving path '{source}': {err}")))?;
        Url::from_file_path(&path)
            .map_err(|_| Error::io(format!("'{source}' is not a usable path")))
    }

    fn is_metadata_entry(&self, url: &Url) -> bool {
        if let Some(ct) = &self.options.content_type_override {
            let ct = ContentType::parse(ct);
            return matches!(
                ct.media_type.as_str(),
                "application/csvm+json" | "application/ld+json" | "application/json"
            );
        }
        url.path().ends_with(".json")
    }

    /// Table dialect resolution: explicit metadata, then content-type
    /// hints, then built-in defaults.
    fn effective_dialect(&self, group: &TableGroup, table_index: usize, fetched: &Fetched) -> Dialect {
        let table = &group.tables[table_index];
        let mut dialect = table
            .dialect
            .clone()
            .or_else(|| group.dialect.clone())
            .unwrap_or_default();
        let content_type = match &self.options.content_type_override {
            Some(raw) => Some(ContentType::parse(raw)),
            None => fetched.content_type.clone(),
        };
        if let Some(ct) = content_type {
            dialect.apply_content_type_hints(
                ct.is_tsv(),
                ct.header_absent,
                ct.charset.as_deref(),
            );
        }
        dialect
    }

    /// Warnings gathered so far, including the row engines'.
    pub fn warnings(&self) -> Vec<Warning> {
        let mut all = self.warnings.clone();
        for run in &self.runs {
            all.extend(run.engine.warnings.iter().cloned());
        }
        all
    }

    pub fn table_group(&self) -> &TableGroup {
        &self.group
    }

    /// Lazily emits RDF triples for the whole group.
    pub fn statements(&mut self) -> Result<Statements<'_>> {
        if !matches!(self.state, State::Validated) {
            return Err(Error::metadata(
                "statements() requires a freshly opened reader",
            ));
        }
        self.state = State::Emitting;
        Ok(Statements::new(self))
    }

    /// Builds the canonical JSON representation eagerly.
    pub fn to_json(&mut self) -> Result<Value> {
        if !matches!(self.state, State::Validated) {
            return Err(Error::metadata("to_json() requires a freshly opened reader"));
        }
        self.state = State::Emitting;
        let result = self.build_json();
        self.state = match result {
            Ok(_) => State::Done,
            Err(_) => State::Failed,
        };
        result
    }

    fn build_json(&mut self) -> Result<Value> {
        let minimal = self.options.minimal;
        let mut tables = Vec::new();
        let mut flat = Vec::new();
        for run in &mut self.runs {
            let table = &self.group.tables[run.table_index];
            let mut rows = Vec::new();
            while let Some(row) = run.engine.next_row()? {
                if run.suppress_output {
                    continue;
                }
                if minimal {
                    flat.extend(json::row_describes(run.engine.columns(), &row));
                } else {
                    rows.push(json::row_value(&run.url, run.engine.columns(), &row));
                }
            }
            if run.suppress_output || minimal {
                continue;
            }
            let mut table_map = Map::new();
            table_map.insert("url".to_string(), json!(run.url));
            json::append_common(&mut table_map, &table.common);
            json::append_notes(&mut table_map, &table.notes, run.engine.comments());
            table_map.insert("row".to_string(), Value::Array(rows));
            tables.push(Value::Object(table_map));
        }
        if minimal {
            return Ok(Value::Array(flat));
        }
        let mut root = Map::new();
        json::append_common(&mut root, &self.group.common);
        json::append_notes(&mut root, &self.group.notes, &[]);
        root.insert("tables".to_string(), Value::Array(tables));
        Ok(Value::Object(root))
    }

    /// Runs the full pipeline without emitting, adding primary-key and
    /// foreign-key integrity checks.
    pub fn validate(&mut self) -> Result<()> {
        if !matches!(self.state, State::Validated) {
            return Err(Error::metadata(
                "validate() requires a freshly opened reader",
            ));
        }
        self.state = State::Emitting;
        let result = self.run_validation();
        self.state = match result {
            Ok(_) => State::Done,
            Err(_) => State::Failed,
        };
        result
    }

    fn run_validation(&mut self) -> Result<()> {
        // Column values needed for key checks: (table url, column name) →
        // per-row single-value lexicals.
        let mut needed: HashSet<(String, String)> = HashSet::new();
        for run in &self.runs {
            let table = &self.group.tables[run.table_index];
            let Some(schema) = &table.schema else { continue };
            for key in &schema.primary_key {
                needed.insert((run.url.clone(), key.clone()));
            }
            for fk in &schema.foreign_keys {
                for column in &fk.column_reference {
                    needed.insert((run.url.clone(), column.clone()));
                }
                if let Some(target) = self.foreign_key_target(&fk.reference) {
                    for column in &fk.reference.column_reference {
                        needed.insert((target.clone(), column.clone()));
                    }
                }
            }
        }

        let mut collected: HashMap<(String, String), Vec<Option<String>>> = HashMap::new();
        for run in &mut self.runs {
            while let Some(row) = run.engine.next_row()? {
                for cell in &row.cells {
                    let name = &run.engine.columns()[cell.column].name;
                    let key = (run.url.clone(), name.clone());
                    if !needed.contains(&key) {
                        continue;
                    }
                    collected
                        .entry(key)
                        .or_default()
                        .push(cell.values.first().map(|v| v.lexical.clone()));
                }
            }
        }

        for run in &self.runs {
            let table = &self.group.tables[run.table_index];
            let Some(schema) = &table.schema else { continue };

            if !schema.primary_key.is_empty() {
                let tuples = key_tuples(&collected, &run.url, &schema.primary_key);
                let mut seen = HashSet::new();
                for (row_index, tuple) in tuples.iter().enumerate() {
                    if let Some(tuple) = tuple
                        && !seen.insert(tuple.clone())
                    {
                        return Err(Error::metadata(format!(
                            "duplicate primary key {tuple:?} in {} (data row {})",
                            run.url,
                            row_index + 1
                        )));
                    }
                }
            }

            for fk in &schema.foreign_keys {
                let Some(target_url) = self.foreign_key_target(&fk.reference) else {
                    return Err(Error::metadata(format!(
                        "foreign key in {} references schema '{}' that no table declares",
                        run.url,
                        fk.reference.schema_reference.as_deref().unwrap_or_default()
                    )));
                };
                let child = key_tuples(&collected, &run.url, &fk.column_reference);
                let parent: HashSet<Vec<String>> =
                    key_tuples(&collected, &target_url, &fk.reference.column_reference)
                        .into_iter()
                        .flatten()
                        .collect();
                for (row_index, tuple) in child.into_iter().enumerate() {
                    let Some(tuple) = tuple else { continue };
                    if !parent.contains(&tuple) {
                        return Err(Error::ForeignKey(format!(
                            "{} data row {}: value {tuple:?} has no match in {target_url}",
                            run.url,
                            row_index + 1
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// The URL of the table a foreign key points at: its `resource`, or
    /// the table whose schema `@id` matches its `schemaReference`.
    fn foreign_key_target(&self, reference: &ForeignKeyReference) -> Option<String> {
        if let Some(resource) = &reference.resource {
            return Some(self.resolve_reference(resource));
        }
        let schema_ref = self.resolve_reference(reference.schema_reference.as_deref()?);
        self.group
            .tables
            .iter()
            .find(|table| {
                table.schema.as_ref().and_then(|s| s.id.as_deref()) == Some(schema_ref.as_str())
            })
            .map(|table| table.url.clone())
    }

    fn resolve_reference(&self, resource: &str) -> String {
        self.group
            .base
            .as_deref()
            .and_then(|base| Url::parse(base).ok())
            .and_then(|base| base.join(resource).ok())
            .map(|url| url.to_string())
            .unwrap_or_else(|| resource.to_string())
    }
}

/// Per-table key tuples, `None` where any component cell was null.
fn key_tuples(
    collected: &HashMap<(String, String), Vec<Option<String>>>,
    table_url: &str,
    columns: &[String],
) -> Vec<Option<Vec<String>>> {
    let series: Vec<&Vec<Option<String>>> = columns
        .iter()
        .filter_map(|column| collected.get(&(table_url.to_string(), column.clone())))
        .collect();
    if series.len() != columns.len() {
        return Vec::new();
    }
    let rows = series.iter().map(|values| values.len()).min().unwrap_or(0);
    (0..rows)
        .map(|row| {
            series
                .iter()
                .map(|values| values[row].clone())
                .collect::<Option<Vec<String>>>()
        })
        .collect()
}

/// Emission phases for the lazy statement iterator.
enum Phase {
    GroupPrelude,
    TableStart(usize),
    Rows(usize),
    TableEnd(usize),
    Provenance,
    Done,
}

/// Lazy triple stream over a reader.
pub struct Statements<'a> {
    reader: &'a mut Reader,
    emitter: RdfEmitter,
    group_subject: Term,
    table_subjects: Vec<Term>,
    phase: Phase,
    buffer: std::collections::VecDeque<Triple>,
}

impl<'a> Statements<'a> {
    fn new(reader: &'a mut Reader) -> Self {
        let mode = if reader.options.minimal {
            EmissionMode::Minimal
        } else {
            EmissionMode::Standard
        };
        let mut emitter = RdfEmitter::new(mode);
        let group_subject = match &reader.group.id {
            Some(id) => Term::iri(id.clone()),
            None => emitter.fresh_blank(),
        };
        let table_subjects = reader
            .group
            .tables
            .iter()
            .map(|table| match &table.id {
                Some(id) => Term::iri(id.clone()),
                None => emitter.fresh_blank(),
            })
            .collect();
        Statements {
            reader,
            emitter,
            group_subject,
            table_subjects,
            phase: Phase::GroupPrelude,
            buffer: std::collections::VecDeque::new(),
        }
    }

    fn visible_tables(&self) -> Vec<usize> {
        self.reader
            .runs
            .iter()
            .enumerate()
            .filter(|(_, run)| !run.suppress_output)
            .map(|(i, _)| i)
            .collect()
    }

    /// Refills the buffer; `Ok(false)` means the stream is complete.
    fn advance(&mut self) -> Result<bool> {
        loop {
            match self.phase {
                Phase::GroupPrelude => {
                    let visible = self.visible_tables();
                    let subjects: Vec<Term> = visible
                        .iter()
                        .map(|&i| self.table_subjects[self.reader.runs[i].table_index].clone())
                        .collect();
                    let triples = self.emitter.group_prelude(
                        &self.reader.group,
                        &self.group_subject,
                        &subjects,
                    );
                    self.buffer.extend(triples);
                    self.phase = match visible.first() {
                        Some(&first) => Phase::TableStart(first),
                        None => Phase::Provenance,
                    };
                    if !self.buffer.is_empty() {
                        return Ok(true);
                    }
                }
                Phase::TableStart(index) => {
                    let run = &self.reader.runs[index];
                    let table = &self.reader.group.tables[run.table_index];
                    let subject = self.table_subjects[run.table_index].clone();
                    let triples = self.emitter.table_prelude(table, &subject);
                    self.buffer.extend(triples);
                    self.phase = Phase::Rows(index);
                    if !self.buffer.is_empty() {
                        return Ok(true);
                    }
                }
                Phase::Rows(index) => {
                    let subject = self.table_subjects[self.reader.runs[index].table_index].clone();
                    let run = &mut self.reader.runs[index];
                    match run.engine.next_row()? {
                        Some(row) => {
                            let triples = self.emitter.row_triples(
                                &subject,
                                &run.url,
                                run.engine.columns(),
                                &row,
                                run.suppress_output,
                            );
                            self.buffer.extend(triples);
                            if !self.buffer.is_empty() {
                                return Ok(true);
                            }
                        }
                        None => self.phase = Phase::TableEnd(index),
                    }
                }
                Phase::TableEnd(index) => {
                    let subject = self.table_subjects[self.reader.runs[index].table_index].clone();
                    let comments: Vec<String> = {
                        let run = &self.reader.runs[index];
                        let table = &self.reader.group.tables[run.table_index];
                        // Only comments beyond those already emitted as
                        // metadata notes.
                        run.engine
                            .comments()
                            .iter()
                            .filter(|comment| {
                                !table
                                    .notes
                                    .iter()
                                    .any(|note| note.as_str() == Some(comment.as_str()))
                            })
                            .cloned()
                            .collect()
                    };
                    let triples = self.emitter.table_comment_notes(&subject, &comments);
                    self.buffer.extend(triples);
                    let visible = self.visible_tables();
                    self.phase = match visible.iter().find(|&&i| i > index) {
                        Some(&next) => Phase::TableStart(next),
                        None => Phase::Provenance,
                    };
                    if !self.buffer.is_empty() {
                        return Ok(true);
                    }
                }
                Phase::Provenance => {
                    if !self.reader.options.minimal && !self.reader.options.no_prov {
                        let triples = self.emitter.provenance(
                            &self.group_subject,
                            &self.reader.sources,
                            self.reader.started,
                            Utc::now(),
                        );
                        self.buffer.extend(triples);
                    }
                    self.phase = Phase::Done;
                    self.reader.state = State::Done;
                    if !self.buffer.is_empty() {
                        return Ok(true);
                    }
                }
                Phase::Done => return Ok(false),
            }
        }
    }
}

impl Iterator for Statements<'_> {
    type Item = Result<Triple>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(triple) = self.buffer.pop_front() {
            return Some(Ok(triple));
        }
        match self.advance() {
            Ok(true) => self.buffer.pop_front().map(Ok),
            Ok(false) => None,
            Err(err) => {
                self.reader.state = State::Failed;
                self.phase = Phase::Done;
                Some(Err(err))
            }
        }
    }
}
