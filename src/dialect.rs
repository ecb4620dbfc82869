//! CSV dialect description and the logical-row reader.
//!
//! A [`Dialect`] mirrors the CSVW dialect description: every field is
//! optional so merging can tell "set" from "defaulted", and
//! [`Dialect::resolved`] applies the engine defaults in one place. The
//! [`TableSource`] layers comment capture, skipped rows, header-row
//! collection, column skipping, trimming, and blank-row suppression on top
//! of the `csv` tokenizer, reporting physical row numbers throughout.
//!
//! Input bytes flow through `encoding_rs_io` so the tokenizer always sees
//! UTF-8 with any BOM already stripped.

use std::collections::BTreeMap;
use std::io::Read;

use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::DecodeReaderBytesBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result, Warning};

/// How field whitespace is handled after tokenization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimMode {
    #[default]
    True,
    False,
    Start,
    End,
}

impl TrimMode {
    pub fn apply<'a>(&self, value: &'a str) -> &'a str {
        match self {
            TrimMode::True => value.trim(),
            TrimMode::False => value,
            TrimMode::Start => value.trim_start(),
            TrimMode::End => value.trim_end(),
        }
    }

    fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(true) => Ok(TrimMode::True),
            Value::Bool(false) => Ok(TrimMode::False),
            Value::String(s) => match s.as_str() {
                "true" => Ok(TrimMode::True),
                "false" => Ok(TrimMode::False),
                "start" => Ok(TrimMode::Start),
                "end" => Ok(TrimMode::End),
                other => Err(Error::metadata(format!("'{other}' is not a trim mode"))),
            },
            other => Err(Error::metadata(format!("'{other}' is not a trim mode"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Dialect {
    pub delimiter: Option<String>,
    pub quote_char: Option<Value>,
    pub double_quote: Option<bool>,
    pub line_terminators: Option<Vec<String>>,
    pub encoding: Option<String>,
    pub header: Option<bool>,
    pub header_row_count: Option<usize>,
    pub skip_rows: Option<usize>,
    pub skip_columns: Option<usize>,
    pub skip_blank_rows: Option<bool>,
    pub skip_initial_space: Option<bool>,
    pub trim: Option<TrimMode>,
    pub comment_prefix: Option<String>,
}

/// The closed set of recognized dialect keys.
const DIALECT_KEYS: &[&str] = &[
    "delimiter",
    "quoteChar",
    "doubleQuote",
    "lineTerminators",
    "encoding",
    "header",
    "headerRowCount",
    "skipRows",
    "skipColumns",
    "skipBlankRows",
    "skipInitialSpace",
    "trim",
    "commentPrefix",
    "@type",
    "@id",
];

impl Dialect {
    /// Parses a dialect description, warning about (and dropping) keys
    /// outside the recognized set.
    pub fn from_json(value: &Value, warnings: &mut Vec<Warning>) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::metadata("'dialect' must be an object"))?;
        if let Some(Value::String(declared)) = map.get("@type")
            && declared != "Dialect"
        {
            return Err(Error::metadata(format!(
                "@type '{declared}' where 'Dialect' was expected"
            )));
        }

        let mut recognized: BTreeMap<String, Value> = BTreeMap::new();
        for (key, val) in map {
            if DIALECT_KEYS.contains(&key.as_str()) {
                recognized.insert(key.clone(), val.clone());
            } else {
                warnings.push(Warning::new(format!(
                    "ignoring unrecognized dialect key '{key}'"
                )));
            }
        }

        // Shape variants serde cannot express directly. quoteChar must keep
        // its explicit-null form ("no quoting"), which Option<_> would eat.
        let quote_char = recognized.remove("quoteChar");
        let trim = match recognized.remove("trim") {
            Some(raw) => Some(TrimMode::from_json(&raw)?),
            None => None,
        };
        let line_terminators = match recognized.remove("lineTerminators") {
            Some(Value::String(s)) => Some(vec![s]),
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|item| {
                        item.as_str().map(str::to_string).ok_or_else(|| {
                            Error::metadata("'lineTerminators' entries must be strings")
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            Some(other) => {
                return Err(Error::metadata(format!(
                    "'lineTerminators' must be a string or array, got {other}"
                )));
            }
            None => None,
        };
        recognized.remove("@type");
        recognized.remove("@id");

        let mut dialect: Dialect =
            serde_json::from_value(Value::Object(recognized.into_iter().collect()))
                .map_err(|err| Error::metadata(format!("invalid dialect: {err}")))?;
        dialect.quote_char = quote_char;
        dialect.trim = trim;
        dialect.line_terminators = line_terminators;
        dialect.validate()?;
        Ok(dialect)
    }

    /// Left-biased fill used by the metadata merger.
    pub fn merge_from(&mut self, other: &Dialect) {
        macro_rules! fill {
            ($field:ident) => {
                if self.$field.is_none() {
                    self.$field = other.$field.clone();
                }
            };
        }
        fill!(delimiter);
        fill!(quote_char);
        fill!(double_quote);
        fill!(line_terminators);
        fill!(encoding);
        fill!(header);
        fill!(header_row_count);
        fill!(skip_rows);
        fill!(skip_columns);
        fill!(skip_blank_rows);
        fill!(skip_initial_space);
        fill!(trim);
        fill!(comment_prefix);
    }

    /// Applies HTTP content-type hints below any explicit setting:
    /// `text/tab-separated-values` forces tabs, `header=absent` and
    /// `charset` fill their fields only when the dialect left them unset.
    pub fn apply_content_type_hints(
        &mut self,
        is_tsv: bool,
        header_absent: bool,
        charset: Option<&str>,
    ) {
        if is_tsv && self.delimiter.is_none() {
            self.delimiter = Some("\t".to_string());
        }
        if header_absent && self.header.is_none() && self.header_row_count.is_none() {
            self.header = Some(false);
        }
        if let Some(charset) = charset
            && self.encoding.is_none()
        {
            self.encoding = Some(charset.to_string());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(delimiter) = &self.delimiter
            && delimiter.chars().count() != 1
        {
            return Err(Error::metadata(format!(
                "'delimiter' must be a single character, got '{delimiter}'"
            )));
        }
        match &self.quote_char {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) if s.chars().count() == 1 => {}
            Some(other) => {
                return Err(Error::metadata(format!(
                    "'quoteChar' must be a single character or null, got {other}"
                )));
            }
        }
        if let Some(label) = &self.encoding
            && Encoding::for_label(label.trim().as_bytes()).is_none()
        {
            return Err(Error::dialect(format!("unknown encoding '{label}'")));
        }
        if let Some(terminators) = &self.line_terminators {
            resolve_terminator(terminators)?;
        }
        Ok(())
    }

    /// The fully-defaulted view the reader runs with.
    pub fn resolved(&self) -> Result<ResolvedDialect> {
        let delimiter = match &self.delimiter {
            Some(s) => {
                let ch = s.chars().next().expect("validated delimiter");
                if !ch.is_ascii() {
                    return Err(Error::dialect(format!(
                        "delimiter '{ch}' must be an ASCII character"
                    )));
                }
                ch as u8
            }
            None => b',',
        };
        let quote = match &self.quote_char {
            None => Some(b'"'),
            Some(Value::Null) => None,
            Some(Value::String(s)) => {
                let ch = s.chars().next().expect("validated quoteChar");
                if !ch.is_ascii() {
                    return Err(Error::dialect(format!(
                        "quoteChar '{ch}' must be an ASCII character"
                    )));
                }
                Some(ch as u8)
            }
            Some(_) => unreachable!("validated quoteChar"),
        };
        let encoding = match &self.encoding {
            Some(label) => Encoding::for_label(label.trim().as_bytes())
                .ok_or_else(|| Error::dialect(format!("unknown encoding '{label}'")))?,
            None => UTF_8,
        };
        let terminator = match &self.line_terminators {
            Some(terminators) => resolve_terminator(terminators)?,
            None => csv::Terminator::CRLF,
        };
        let header = self.header.unwrap_or(true);
        let header_row_count = self
            .header_row_count
            .unwrap_or(if header { 1 } else { 0 });
        let trim = self.trim.unwrap_or(if self.skip_initial_space.unwrap_or(false) {
            TrimMode::Start
        } else {
            TrimMode::True
        });
        Ok(ResolvedDialect {
            delimiter,
            quote,
            double_quote: self.double_quote.unwrap_or(true),
            terminator,
            encoding,
            header_row_count,
            skip_rows: self.skip_rows.unwrap_or(0),
            skip_columns: self.skip_columns.unwrap_or(0),
            skip_blank_rows: self.skip_blank_rows.unwrap_or(false),
            trim,
            comment_prefix: self.comment_prefix.clone(),
        })
    }
}

/// Maps `lineTerminators` onto what the tokenizer supports: the CRLF/LF
/// family or one single-byte custom terminator.
fn resolve_terminator(terminators: &[String]) -> Result<csv::Terminator> {
    let crlf_family = !terminators.is_empty()
        && terminators
            .iter()
            .all(|t| matches!(t.as_str(), "\r\n" | "\n" | "\r"));
    if crlf_family {
        if terminators.len() == 1 && terminators[0].len() == 1 {
            return Ok(csv::Terminator::Any(terminators[0].as_bytes()[0]));
        }
        return Ok(csv::Terminator::CRLF);
    }
    if terminators.len() == 1 && terminators[0].len() == 1 && terminators[0].is_ascii() {
        return Ok(csv::Terminator::Any(terminators[0].as_bytes()[0]));
    }
    Err(Error::dialect(format!(
        "unsupported lineTerminators {terminators:?}"
    )))
}

#[derive(Debug, Clone)]
pub struct ResolvedDialect {
    pub delimiter: u8,
    pub quote: Option<u8>,
    pub double_quote: bool,
    pub terminator: csv::Terminator,
    pub encoding: &'static Encoding,
    pub header_row_count: usize,
    pub skip_rows: usize,
    pub skip_columns: usize,
    pub skip_blank_rows: bool,
    pub trim: TrimMode,
    pub comment_prefix: Option<String>,
}

/// One logical data row with its physical position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalRow {
    /// 1-based physical row number in the source (headers and comments
    /// included).
    pub source_row: usize,
    pub cells: Vec<String>,
}

/// A CSV stream opened under a dialect: comments and header rows are
/// consumed eagerly, data rows stream on demand.
pub struct TableSource {
    reader: csv::Reader<Box<dyn Read>>,
    dialect: ResolvedDialect,
    pub comments: Vec<String>,
    pub header_rows: Vec<Vec<String>>,
    source_row: usize,
    record: csv::StringRecord,
}

impl TableSource {
    pub fn open(dialect: ResolvedDialect, input: Box<dyn Read + 'static>) -> Result<Self> {
        // A BOM, when present, both selects the encoding and is stripped;
        // otherwise the dialect's encoding applies.
        let decoded: Box<dyn Read> = Box::new(
            DecodeReaderBytesBuilder::new()
                .encoding(Some(dialect.encoding))
                .bom_override(true)
                .build(input),
        );

        let mut builder = csv::ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(dialect.delimiter)
            .terminator(dialect.terminator);
        match dialect.quote {
            Some(q) => {
                builder.quote(q).double_quote(dialect.double_quote);
                if !dialect.double_quote {
                    builder.escape(Some(b'\\'));
                }
            }
            None => {
                builder.quoting(false);
            }
        }
        let reader = builder.from_reader(decoded);

        let mut source = TableSource {
            reader,
            dialect,
            comments: Vec::new(),
            header_rows: Vec::new(),
            source_row: 0,
            record: csv::StringRecord::new(),
        };
        source.read_preamble()?;
        Ok(source)
    }

    /// Consumes skipped rows and header rows, capturing comments.
    fn read_preamble(&mut self) -> Result<()> {
        for _ in 0..self.dialect.skip_rows {
            match self.next_physical()? {
                Some(cells) => {
                    if let Some(text) = self.comment_text(&cells) {
                        self.comments.push(text);
                    }
                }
                None => return Ok(()),
            }
        }
        while self.header_rows.len() < self.dialect.header_row_count {
            match self.next_physical()? {
                Some(cells) => {
                    if let Some(text) = self.comment_text(&cells) {
                        self.comments.push(text);
                        continue;
                    }
                    let trimmed = self.trim_cells(cells);
                    let headers = trimmed
                        .into_iter()
                        .skip(self.dialect.skip_columns)
                        .collect();
                    self.header_rows.push(headers);
                }
                None => return Ok(()),
            }
        }
        Ok(())
    }

    /// Leading cells the dialect discards on every row; `_sourceColumn`
    /// numbering accounts for them.
    pub fn skip_columns(&self) -> usize {
        self.dialect.skip_columns
    }

    /// Column titles merged across header rows, newline-joined.
    pub fn merged_titles(&self) -> Vec<String> {
        let width = self
            .header_rows
            .iter()
            .map(|row| row.len())
            .max()
            .unwrap_or(0);
        let mut titles = vec![Vec::new(); width];
        for row in &self.header_rows {
            for (idx, cell) in row.iter().enumerate() {
                if !cell.is_empty() {
                    titles[idx].push(cell.clone());
                }
            }
        }
        titles.into_iter().map(|parts| parts.join("\n")).collect()
    }

    /// The next logical data row, or `None` at end of input.
    pub fn next_row(&mut self) -> Result<Option<LogicalRow>> {
        loop {
            let Some(cells) = self.next_physical()? else {
                return Ok(None);
            };
            if let Some(text) = self.comment_text(&cells) {
                self.comments.push(text);
                continue;
            }
            let trimmed = self.trim_cells(cells);
            let data: Vec<String> = trimmed
                .into_iter()
                .skip(self.dialect.skip_columns)
                .collect();
            if self.dialect.skip_blank_rows && data.iter().all(|cell| cell.is_empty()) {
                continue;
            }
            return Ok(Some(LogicalRow {
                source_row: self.source_row,
                cells: data,
            }));
        }
    }

    fn next_physical(&mut self) -> Result<Option<Vec<String>>> {
        if !self.reader.read_record(&mut self.record)? {
            return Ok(None);
        }
        // The tokenizer drops fully empty lines, so physical numbering
        // comes from the record's own position rather than a counter.
        self.source_row = self
            .record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(self.source_row + 1);
        Ok(Some(self.record.iter().map(str::to_string).collect()))
    }

    fn trim_cells(&self, cells: Vec<String>) -> Vec<String> {
        cells
            .into_iter()
            .map(|cell| self.dialect.trim.apply(&cell).to_string())
            .collect()
    }

    /// Returns the comment body when the row is a comment line.
    fn comment_text(&self, cells: &[String]) -> Option<String> {
        let prefix = self.dialect.comment_prefix.as_deref()?;
        let first = cells.first()?;
        let head = first.trim_start();
        if !head.starts_with(prefix) {
            return None;
        }
        // Reassemble the physical line; the tokenizer has already split it
        // on the delimiter.
        let mut line = cells.join(&(self.dialect.delimiter as char).to_string());
        line = line.trim_start().to_string();
        Some(line[prefix.len()..].trim_start().to_string())
    }
}
