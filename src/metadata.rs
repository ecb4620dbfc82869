//! CSVW metadata model: typed description objects, JSON parsing, and
//! validation.
//!
//! This module owns the closed set of description objects (TableGroup,
//! Table, Schema, Column, Datatype, ForeignKey, Transformation), the
//! shared inherited-property set, natural-language values, and the open
//! common-property bag. Parsing normalizes the loose CSVW JSON syntax
//! (string-or-array, string-or-object) into one shape; validation enforces
//! the structural invariants before any row is read.
//!
//! ## Responsibilities
//!
//! - `@context` handling (base URL and default language)
//! - Top-level normalization: a bare Table document becomes a TableGroup
//! - Unknown-property routing into the common-property bag, with warnings
//!   for keys that expand to nothing
//! - Column-name rules, uniqueness, key references, template well-formedness

use serde_json::Value;
use url::Url;

use crate::{
    datatype,
    dialect::Dialect,
    error::{Error, Result, Warning},
    uri_template, vocab,
};

/// Column names must look like this, and user-supplied ones must not start
/// with an underscore (the engine reserves `_` for synthetic names and
/// template built-ins).
const NAME_CHARS: &str = r"^[A-Za-z_][A-Za-z0-9_.%-]*$";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableDirection {
    #[default]
    Auto,
    Ltr,
    Rtl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextDirection {
    #[default]
    Inherit,
    Ltr,
    Rtl,
    Auto,
}

/// Language-tagged values: `titles` and friends normalize to a map of
/// language tag to value list, with untagged values under `und`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NaturalLanguage {
    pub by_language: Vec<(String, Vec<String>)>,
}

impl NaturalLanguage {
    pub fn single(value: impl Into<String>) -> Self {
        NaturalLanguage {
            by_language: vec![("und".to_string(), vec![value.into()])],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_language.iter().all(|(_, values)| values.is_empty())
    }

    /// Every value regardless of language, declaration order preserved.
    pub fn all_values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_language
            .iter()
            .flat_map(|(lang, values)| values.iter().map(move |v| (lang.as_str(), v.as_str())))
    }

    pub fn first_value(&self) -> Option<&str> {
        self.all_values().next().map(|(_, v)| v)
    }

    pub fn push(&mut self, lang: &str, value: String) {
        if let Some((_, values)) = self.by_language.iter_mut().find(|(l, _)| l == lang) {
            if !values.contains(&value) {
                values.push(value);
            }
        } else {
            self.by_language.push((lang.to_string(), vec![value]));
        }
    }

    /// Per-language list concatenation, `self` first.
    pub fn merge_from(&mut self, other: &NaturalLanguage) {
        for (lang, value) in other.all_values() {
            self.push(lang, value.to_string());
        }
    }

    /// True when the two share any value under a compatible language
    /// (exact tag, prefix match, or either side untagged).
    pub fn intersects(&self, other: &NaturalLanguage) -> bool {
        for (lang_a, value_a) in self.all_values() {
            for (lang_b, value_b) in other.all_values() {
                if value_a != value_b {
                    continue;
                }
                if lang_a == lang_b
                    || lang_a == "und"
                    || lang_b == "und"
                    || lang_a.starts_with(&format!("{lang_b}-"))
                    || lang_b.starts_with(&format!("{lang_a}-"))
                {
                    return true;
                }
            }
        }
        false
    }

    fn from_json(value: &Value, default_lang: Option<&str>, ctx: &mut ParseCtx) -> Self {
        let lang = default_lang.unwrap_or("und").to_string();
        let mut out = NaturalLanguage::default();
        match value {
            Value::String(s) => out.push(&lang, s.clone()),
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::String(s) => out.push(&lang, s.clone()),
                        other => ctx.warn(format!("ignoring non-string title value {other}")),
                    }
                }
            }
            Value::Object(map) => {
                for (tag, item) in map {
                    if !vocab::is_valid_language_tag(tag) && tag != "und" {
                        ctx.warn(format!(
                            "ignoring titles under invalid language tag '{tag}'"
                        ));
                        continue;
                    }
                    match item {
                        Value::String(s) => out.push(tag, s.clone()),
                        Value::Array(list) => {
                            for entry in list {
                                if let Value::String(s) = entry {
                                    out.push(tag, s.clone());
                                }
                            }
                        }
                        other => ctx.warn(format!("ignoring title value {other}")),
                    }
                }
            }
            other => ctx.warn(format!("ignoring titles of unexpected shape {other}")),
        }
        out
    }
}

/// Common properties: open, IRI-keyed annotations preserved through merge
/// and replayed by the emitters.
pub type CommonProps = Vec<(String, Value)>;

/// The properties that flow down the description tree; `None` means "not
/// set here, ask the parent".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Inherited {
    pub about_url: Option<String>,
    pub property_url: Option<String>,
    pub value_url: Option<String>,
    pub datatype: Option<Datatype>,
    pub default: Option<String>,
    pub lang: Option<String>,
    pub null: Option<Vec<String>>,
    pub ordered: Option<bool>,
    pub required: Option<bool>,
    pub separator: Option<String>,
    pub text_direction: Option<TextDirection>,
}

impl Inherited {
    pub fn is_empty(&self) -> bool {
        *self == Inherited::default()
    }

    /// Left-biased fill: unset fields take the other side's value.
    pub fn merge_from(&mut self, other: &Inherited) {
        macro_rules! fill {
            ($field:ident) => {
                if self.$field.is_none() {
                    self.$field = other.$field.clone();
                }
            };
        }
        fill!(about_url);
        fill!(property_url);
        fill!(value_url);
        fill!(datatype);
        fill!(default);
        fill!(lang);
        fill!(null);
        fill!(ordered);
        fill!(required);
        fill!(separator);
        fill!(text_direction);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormatSpec {
    /// A plain pattern string (number pattern, date pattern, boolean
    /// tokens, or an anchored regex depending on the base).
    Text(String),
    /// The object form for numbers.
    Number {
        pattern: Option<String>,
        group_char: Option<char>,
        decimal_char: Option<char>,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Datatype {
    pub id: Option<String>,
    pub base: String,
    pub format: Option<FormatSpec>,
    pub length: Option<usize>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub minimum: Option<String>,
    pub maximum: Option<String>,
    pub min_inclusive: Option<String>,
    pub max_inclusive: Option<String>,
    pub min_exclusive: Option<String>,
    pub max_exclusive: Option<String>,
}

impl Datatype {
    pub fn with_base(base: impl Into<String>) -> Self {
        Datatype {
            base: base.into(),
            ..Datatype::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Column {
    pub name: Option<String>,
    pub titles: NaturalLanguage,
    pub is_virtual: bool,
    pub suppress_output: bool,
    pub inherited: Inherited,
    pub common: CommonProps,
}

impl Column {
    /// The name used for template variables and default property URIs:
    /// the declared name, else the first title percent-encoded, else the
    /// positional `_col.N` fallback (1-based).
    pub fn effective_name(&self, index: usize) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(title) = self.titles.first_value() {
            return percent_encode_name(title);
        }
        format!("_col.{}", index + 1)
    }
}

fn percent_encode_name(value: &str) -> String {
    use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
    const KEEP: &percent_encoding::AsciiSet =
        &NON_ALPHANUMERIC.remove(b'_').remove(b'.').remove(b'-');
    utf8_percent_encode(value, KEEP).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForeignKeyReference {
    pub resource: Option<String>,
    pub schema_reference: Option<String>,
    pub column_reference: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForeignKey {
    pub column_reference: Vec<String>,
    pub reference: ForeignKeyReference,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    pub id: Option<String>,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub row_titles: Vec<String>,
    pub inherited: Inherited,
    pub common: CommonProps,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transformation {
    pub url: String,
    pub script_format: Option<String>,
    pub target_format: Option<String>,
    pub source: Option<String>,
    pub titles: NaturalLanguage,
    pub common: CommonProps,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub id: Option<String>,
    pub url: String,
    pub schema: Option<Schema>,
    pub dialect: Option<Dialect>,
    pub transformations: Vec<Transformation>,
    pub suppress_output: bool,
    pub table_direction: Option<TableDirection>,
    pub notes: Vec<Value>,
    pub inherited: Inherited,
    pub common: CommonProps,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableGroup {
    pub id: Option<String>,
    pub tables: Vec<Table>,
    pub dialect: Option<Dialect>,
    pub schema: Option<Schema>,
    pub transformations: Vec<Transformation>,
    pub table_direction: Option<TableDirection>,
    pub notes: Vec<Value>,
    pub inherited: Inherited,
    pub common: CommonProps,
    /// Default language from `@context`, if any.
    pub context_language: Option<String>,
    /// Base URL in force when the document was parsed.
    pub base: Option<String>,
}

impl TableGroup {
    /// Wraps a lone Table in a group, hoisting nothing.
    pub fn from_table(table: Table) -> Self {
        TableGroup {
            tables: vec![table],
            ..TableGroup::default()
        }
    }

    pub fn table_for_url(&self, url: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.url == url)
    }
}

struct ParseCtx<'a> {
    base: Url,
    lang: Option<String>,
    warnings: &'a mut Vec<Warning>,
}

impl ParseCtx<'_> {
    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(Warning::new(message));
    }

    fn resolve(&self, reference: &str) -> Result<String> {
        Ok(self.base.join(reference)?.to_string())
    }
}

/// Parses a full metadata document against its retrieval URL.
///
/// The result is always a TableGroup: a top-level Table is wrapped, any
/// other top-level shape is a metadata error.
pub fn parse_document(
    json: &Value,
    document_url: &Url,
    warnings: &mut Vec<Warning>,
) -> Result<TableGroup> {
    let map = json
        .as_object()
        .ok_or_else(|| Error::metadata("metadata document must be a JSON object"))?;

    let (base, lang) = parse_context(map.get("@context"), document_url)?;
    let mut ctx = ParseCtx {
        base: base.clone(),
        lang,
        warnings,
    };

    let mut group = if map.contains_key("tables") {
        parse_table_group(map, &mut ctx)?
    } else if map.contains_key("url") {
        TableGroup::from_table(parse_table(map, &mut ctx)?)
    } else {
        return Err(Error::metadata(
            "metadata document describes neither a table group nor a table",
        ));
    };
    group.context_language = ctx.lang.clone();
    group.base = Some(base.to_string());
    Ok(group)
}

fn parse_context(context: Option<&Value>, document_url: &Url) -> Result<(Url, Option<String>)> {
    let mut base = document_url.clone();
    let mut lang = None;
    match context {
        None | Some(Value::String(_)) => {}
        Some(Value::Array(items)) => {
            for item in items {
                if let Value::Object(map) = item {
                    if let Some(Value::String(b)) = map.get("@base") {
                        base = document_url.join(b)?;
                    }
                    if let Some(Value::String(l)) = map.get("@language") {
                        lang = Some(l.clone());
                    }
                }
            }
        }
        Some(other) => {
            return Err(Error::metadata(format!("unexpected @context shape: {other}")));
        }
    }
    Ok((base, lang))
}

fn expect_type(map: &serde_json::Map<String, Value>, expected: &str) -> Result<()> {
    if let Some(Value::String(declared)) = map.get("@type")
        && declared != expected
    {
        return Err(Error::metadata(format!(
            "@type '{declared}' where '{expected}' was expected"
        )));
    }
    Ok(())
}

fn parse_table_group(
    map: &serde_json::Map<String, Value>,
    ctx: &mut ParseCtx,
) -> Result<TableGroup> {
    expect_type(map, "TableGroup")?;
    let mut group = TableGroup::default();

    for (key, value) in map {
        match key.as_str() {
            "@context" | "@type" => {}
            "@id" => group.id = Some(ctx.resolve(require_string(key, value)?)?),
            "tables" => {
                let items = value.as_array().ok_or_else(|| {
                    Error::metadata("'tables' must be an array of table descriptions")
                })?;
                for item in items {
                    let table_map = item.as_object().ok_or_else(|| {
                        Error::metadata("each entry in 'tables' must be an object")
                    })?;
                    if table_map.contains_key("tables") {
                        return Err(Error::metadata(
                            "a table group cannot nest another table group",
                        ));
                    }
                    group.tables.push(parse_table(table_map, ctx)?);
                }
            }
            "dialect" => group.dialect = Some(Dialect::from_json(value, ctx.warnings)?),
            "tableSchema" => group.schema = Some(parse_schema(value, ctx)?),
            "transformations" => group.transformations = parse_transformations(value, ctx)?,
            "tableDirection" => group.table_direction = Some(parse_table_direction(value)?),
            "notes" => group.notes = parse_notes(value),
            _ => route_extra(key, value, &mut group.inherited, &mut group.common, ctx)?,
        }
    }
    if group.tables.is_empty() {
        return Err(Error::metadata("a table group requires at least one table"));
    }
    Ok(group)
}

fn parse_table(map: &serde_json::Map<String, Value>, ctx: &mut ParseCtx) -> Result<Table> {
    expect_type(map, "Table")?;
    let mut table = Table::default();

    for (key, value) in map {
        match key.as_str() {
            "@context" | "@type" => {}
            "@id" => table.id = Some(ctx.resolve(require_string(key, value)?)?),
            "url" => table.url = ctx.resolve(require_string(key, value)?)?,
            "tableSchema" => table.schema = Some(parse_schema(value, ctx)?),
            "dialect" => table.dialect = Some(Dialect::from_json(value, ctx.warnings)?),
            "transformations" => table.transformations = parse_transformations(value, ctx)?,
            "suppressOutput" => table.suppress_output = require_bool(key, value)?,
            "tableDirection" => table.table_direction = Some(parse_table_direction(value)?),
            "notes" => table.notes = parse_notes(value),
            _ => route_extra(key, value, &mut table.inherited, &mut table.common, ctx)?,
        }
    }
    if table.url.is_empty() {
        return Err(Error::metadata("a table description requires a 'url'"));
    }
    Ok(table)
}

fn parse_schema(value: &Value, ctx: &mut ParseCtx) -> Result<Schema> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::metadata("'tableSchema' must be an object"))?;
    expect_type(map, "Schema")?;
    let mut schema = Schema::default();

    for (key, value) in map {
        match key.as_str() {
            "@context" | "@type" => {}
            "@id" => schema.id = Some(ctx.resolve(require_string(key, value)?)?),
            "columns" => {
                let items = value
                    .as_array()
                    .ok_or_else(|| Error::metadata("'columns' must be an array"))?;
                for item in items {
                    let column_map = item
                        .as_object()
                        .ok_or_else(|| Error::metadata("each column must be an object"))?;
                    schema.columns.push(parse_column(column_map, ctx)?);
                }
            }
            "primaryKey" => schema.primary_key = string_or_strings(key, value)?,
            "rowTitles" => schema.row_titles = string_or_strings(key, value)?,
            "foreignKeys" => {
                let items = value
                    .as_array()
                    .ok_or_else(|| Error::metadata("'foreignKeys' must be an array"))?;
                for item in items {
                    schema.foreign_keys.push(parse_foreign_key(item)?);
                }
            }
            _ => route_extra(key, value, &mut schema.inherited, &mut schema.common, ctx)?,
        }
    }
    Ok(schema)
}

fn parse_column(map: &serde_json::Map<String, Value>, ctx: &mut ParseCtx) -> Result<Column> {
    expect_type(map, "Column")?;
    let mut column = Column::default();

    for (key, value) in map {
        match key.as_str() {
            "@type" => {}
            "name" => column.name = Some(require_string(key, value)?.to_string()),
            "titles" => {
                let lang = ctx.lang.clone();
                column.titles = NaturalLanguage::from_json(value, lang.as_deref(), ctx);
            }
            "virtual" => column.is_virtual = require_bool(key, value)?,
            "suppressOutput" => column.suppress_output = require_bool(key, value)?,
            _ => route_extra(key, value, &mut column.inherited, &mut column.common, ctx)?,
        }
    }
    Ok(column)
}

fn parse_foreign_key(value: &Value) -> Result<ForeignKey> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::metadata("each foreign key must be an object"))?;
    let mut fk = ForeignKey::default();
    for (key, value) in map {
        match key.as_str() {
            "columnReference" => fk.column_reference = string_or_strings(key, value)?,
            "reference" => {
                let ref_map = value
                    .as_object()
                    .ok_or_else(|| Error::metadata("a foreign key 'reference' must be an object"))?;
                for (ref_key, ref_value) in ref_map {
                    match ref_key.as_str() {
                        "resource" => {
                            fk.reference.resource =
                                Some(require_string(ref_key, ref_value)?.to_string())
                        }
                        "schemaReference" => {
                            fk.reference.schema_reference =
                                Some(require_string(ref_key, ref_value)?.to_string())
                        }
                        "columnReference" => {
                            fk.reference.column_reference = string_or_strings(ref_key, ref_value)?
                        }
                        other => {
                            return Err(Error::metadata(format!(
                                "unexpected key '{other}' in a foreign key reference"
                            )));
                        }
                    }
                }
            }
            other => {
                // Foreign keys are closed objects.
                return Err(Error::metadata(format!(
                    "unexpected key '{other}' in a foreign key"
                )));
            }
        }
    }
    if fk.column_reference.is_empty() {
        return Err(Error::metadata("a foreign key requires 'columnReference'"));
    }
    if fk.reference.resource.is_some() == fk.reference.schema_reference.is_some() {
        return Err(Error::metadata(
            "a foreign key reference requires exactly one of 'resource' or 'schemaReference'",
        ));
    }
    Ok(fk)
}

fn parse_transformations(value: &Value, ctx: &mut ParseCtx) -> Result<Vec<Transformation>> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::metadata("'transformations' must be an array"))?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let map = item
            .as_object()
            .ok_or_else(|| Error::metadata("each transformation must be an object"))?;
        expect_type(map, "Template")?;
        let mut tr = Transformation::default();
        for (key, value) in map {
            match key.as_str() {
                "@type" => {}
                "url" => tr.url = ctx.resolve(require_string(key, value)?)?,
                "scriptFormat" => {
                    tr.script_format = Some(ctx.resolve(require_string(key, value)?)?)
                }
                "targetFormat" => {
                    tr.target_format = Some(ctx.resolve(require_string(key, value)?)?)
                }
                "source" => tr.source = Some(require_string(key, value)?.to_string()),
                "titles" => {
                    let lang = ctx.lang.clone();
                    tr.titles = NaturalLanguage::from_json(value, lang.as_deref(), ctx);
                }
                _ => match vocab::expand_property_key(key) {
                    Some(iri) => tr.common.push((iri, value.clone())),
                    None => ctx.warn(format!(
                        "ignoring unrecognized transformation property '{key}'"
                    )),
                },
            }
        }
        if tr.url.is_empty() {
            return Err(Error::metadata("a transformation requires a 'url'"));
        }
        out.push(tr);
    }
    Ok(out)
}

/// Routes a key that is not a typed property of the enclosing object:
/// inherited properties land in the `Inherited` set, anything else becomes
/// a common property when its key expands to an IRI.
fn route_extra(
    key: &str,
    value: &Value,
    inherited: &mut Inherited,
    common: &mut CommonProps,
    ctx: &mut ParseCtx,
) -> Result<()> {
    match key {
        "aboutUrl" => inherited.about_url = Some(require_string(key, value)?.to_string()),
        "propertyUrl" => inherited.property_url = Some(require_string(key, value)?.to_string()),
        "valueUrl" => inherited.value_url = Some(require_string(key, value)?.to_string()),
        "datatype" => inherited.datatype = Some(parse_datatype(value, ctx)?),
        "default" => inherited.default = Some(require_string(key, value)?.to_string()),
        "lang" => {
            let tag = require_string(key, value)?;
            if !vocab::is_valid_language_tag(tag) {
                ctx.warn(format!("ignoring invalid language tag '{tag}'"));
            } else {
                inherited.lang = Some(tag.to_string());
            }
        }
        "null" => inherited.null = Some(string_or_strings(key, value)?),
        "ordered" => inherited.ordered = Some(require_bool(key, value)?),
        "required" => inherited.required = Some(require_bool(key, value)?),
        "separator" => inherited.separator = Some(require_string(key, value)?.to_string()),
        "textDirection" => {
            inherited.text_direction = Some(match require_string(key, value)? {
                "ltr" => TextDirection::Ltr,
                "rtl" => TextDirection::Rtl,
                "auto" => TextDirection::Auto,
                "inherit" => TextDirection::Inherit,
                other => {
                    return Err(Error::metadata(format!("'{other}' is not a text direction")));
                }
            })
        }
        _ => match vocab::expand_property_key(key) {
            Some(iri) => common.push((iri, value.clone())),
            None => ctx.warn(format!("ignoring unrecognized property '{key}'")),
        },
    }
    Ok(())
}

fn parse_datatype(value: &Value, ctx: &mut ParseCtx) -> Result<Datatype> {
    match value {
        Value::String(base) => Ok(Datatype::with_base(base.clone())),
        Value::Object(map) => {
            let mut dt = Datatype::with_base("string");
            for (key, value) in map {
                match key.as_str() {
                    "@type" => {}
                    "@id" => dt.id = Some(ctx.resolve(require_string(key, value)?)?),
                    "base" => dt.base = require_string(key, value)?.to_string(),
                    "format" => {
                        dt.format = Some(match value {
                            Value::String(s) => FormatSpec::Text(s.clone()),
                            Value::Object(format_map) => FormatSpec::Number {
                                pattern: format_map
                                    .get("pattern")
                                    .and_then(Value::as_str)
                                    .map(str::to_string),
                                group_char: single_char(format_map.get("groupChar"))?,
                                decimal_char: single_char(format_map.get("decimalChar"))?,
                            },
                            other => {
                                return Err(Error::metadata(format!(
                                    "unexpected datatype format {other}"
                                )));
                            }
                        })
                    }
                    "length" => dt.length = Some(require_usize(key, value)?),
                    "minLength" => dt.min_length = Some(require_usize(key, value)?),
                    "maxLength" => dt.max_length = Some(require_usize(key, value)?),
                    "minimum" => dt.minimum = Some(scalar_string(value)),
                    "maximum" => dt.maximum = Some(scalar_string(value)),
                    "minInclusive" => dt.min_inclusive = Some(scalar_string(value)),
                    "maxInclusive" => dt.max_inclusive = Some(scalar_string(value)),
                    "minExclusive" => dt.min_exclusive = Some(scalar_string(value)),
                    "maxExclusive" => dt.max_exclusive = Some(scalar_string(value)),
                    other => ctx.warn(format!("ignoring datatype key '{other}'")),
                }
            }
            Ok(dt)
        }
        other => Err(Error::metadata(format!(
            "a datatype must be a base name or description object, got {other}"
        ))),
    }
}

fn single_char(value: Option<&Value>) -> Result<Option<char>> {
    match value {
        None => Ok(None),
        Some(Value::String(s)) if s.chars().count() == 1 => Ok(s.chars().next()),
        Some(other) => Err(Error::metadata(format!(
            "separator characters must be single-character strings, got {other}"
        ))),
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_table_direction(value: &Value) -> Result<TableDirection> {
    match value.as_str() {
        Some("ltr") => Ok(TableDirection::Ltr),
        Some("rtl") => Ok(TableDirection::Rtl),
        Some("auto") => Ok(TableDirection::Auto),
        _ => Err(Error::metadata(format!("'{value}' is not a table direction"))),
    }
}

fn parse_notes(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn require_string<'v>(key: &str, value: &'v Value) -> Result<&'v str> {
    value
        .as_str()
        .ok_or_else(|| Error::metadata(format!("'{key}' must be a string, got {value}")))
}

fn require_bool(key: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| Error::metadata(format!("'{key}' must be a boolean, got {value}")))
}

fn require_usize(key: &str, value: &Value) -> Result<usize> {
    value
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| Error::metadata(format!("'{key}' must be a non-negative integer")))
}

fn string_or_strings(key: &str, value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::metadata(format!("'{key}' entries must be strings")))
            })
            .collect(),
        other => Err(Error::metadata(format!(
            "'{key}' must be a string or array of strings, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Validation

impl TableGroup {
    /// Enforces the structural invariants over the whole tree. Called once
    /// after discovery and merging, before the row engine runs.
    pub fn validate(&self, warnings: &mut Vec<Warning>) -> Result<()> {
        if self.tables.is_empty() {
            return Err(Error::metadata("a table group requires at least one table"));
        }
        if let Some(schema) = &self.schema {
            validate_schema(schema, warnings)?;
        }
        validate_templates(&self.inherited)?;
        if let Some(dialect) = &self.dialect {
            dialect.validate()?;
        }
        for table in &self.tables {
            table.validate(warnings)?;
        }
        Ok(())
    }
}

impl Table {
    pub fn validate(&self, warnings: &mut Vec<Warning>) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::metadata("a table requires a 'url'"));
        }
        validate_templates(&self.inherited)?;
        if let Some(dialect) = &self.dialect {
            dialect.validate()?;
        }
        if let Some(schema) = &self.schema {
            validate_schema(schema, warnings)?;
        }
        Ok(())
    }
}

fn validate_schema(schema: &Schema, warnings: &mut Vec<Warning>) -> Result<()> {
    let name_re = regex::Regex::new(NAME_CHARS).expect("static regex");

    let mut seen = std::collections::HashSet::new();
    let mut saw_virtual = false;
    for (index, column) in schema.columns.iter().enumerate() {
        if let Some(name) = &column.name {
            if !name_re.is_match(name) {
                return Err(Error::metadata(format!(
                    "column name '{name}' is not a valid identifier"
                )));
            }
            if name.starts_with('_') {
                return Err(Error::metadata(format!(
                    "column name '{name}' uses the reserved '_' prefix"
                )));
            }
        }
        let effective = column.effective_name(index);
        if !seen.insert(effective.clone()) {
            return Err(Error::metadata(format!("duplicate column name '{effective}'")));
        }
        if column.is_virtual && column.name.is_none() {
            warnings.push(Warning::new(format!(
                "virtual column at position {} has no name",
                index + 1
            )));
        }
        if !column.is_virtual && saw_virtual {
            return Err(Error::metadata(
                "virtual columns must come after all non-virtual columns",
            ));
        }
        saw_virtual |= column.is_virtual;

        validate_templates(&column.inherited)?;
        if let Some(dt) = &column.inherited.datatype {
            datatype::compile(dt)?;
        }
    }

    validate_templates(&schema.inherited)?;
    if let Some(dt) = &schema.inherited.datatype {
        datatype::compile(dt)?;
    }

    let column_names: Vec<String> = schema
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| c.effective_name(i))
        .collect();
    for key in &schema.primary_key {
        if !column_names.iter().any(|n| n == key) {
            return Err(Error::metadata(format!(
                "primaryKey references unknown column '{key}'"
            )));
        }
    }
    for title_ref in &schema.row_titles {
        if !column_names.iter().any(|n| n == title_ref) {
            return Err(Error::metadata(format!(
                "rowTitles references unknown column '{title_ref}'"
            )));
        }
    }
    for fk in &schema.foreign_keys {
        for key in &fk.column_reference {
            if !column_names.iter().any(|n| n == key) {
                return Err(Error::metadata(format!(
                    "foreignKey columnReference names unknown column '{key}'"
                )));
            }
        }
        if fk.reference.column_reference.is_empty() {
            return Err(Error::metadata(
                "a foreign key reference requires 'columnReference'",
            ));
        }
    }
    Ok(())
}

fn validate_templates(inherited: &Inherited) -> Result<()> {
    for template in [
        &inherited.about_url,
        &inherited.property_url,
        &inherited.value_url,
    ]
    .into_iter()
    .flatten()
    {
        uri_template::validate(template)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc_url() -> Url {
        Url::parse("http://example.org/meta.json").unwrap()
    }

    fn parse(value: Value) -> (TableGroup, Vec<Warning>) {
        let mut warnings = Vec::new();
        let group = parse_document(&value, &doc_url(), &mut warnings).expect("parse");
        (group, warnings)
    }

    #[test]
    fn bare_table_documents_become_groups() {
        let (group, _) = parse(json!({
            "@context": "http://www.w3.org/ns/csvw",
            "url": "tree-ops.csv",
            "tableSchema": {"columns": [{"name": "GID"}]}
        }));
        assert_eq!(group.tables.len(), 1);
        assert_eq!(group.tables[0].url, "http://example.org/tree-ops.csv");
        let schema = group.tables[0].schema.as_ref().unwrap();
        assert_eq!(schema.columns[0].name.as_deref(), Some("GID"));
    }

    #[test]
    fn context_base_and_language_apply() {
        let (group, _) = parse(json!({
            "@context": ["http://www.w3.org/ns/csvw", {"@base": "sub/", "@language": "en"}],
            "url": "data.csv",
            "tableSchema": {"columns": [{"titles": "Name"}]}
        }));
        assert_eq!(group.tables[0].url, "http://example.org/sub/data.csv");
        let schema = group.tables[0].schema.as_ref().unwrap();
        assert_eq!(
            schema.columns[0].titles.by_language,
            vec![("en".to_string(), vec!["Name".to_string()])]
        );
        assert_eq!(group.context_language.as_deref(), Some("en"));
    }

    #[test]
    fn inherited_properties_route_to_the_inherited_set() {
        let (group, _) = parse(json!({
            "url": "data.csv",
            "null": ["NA", "-"],
            "lang": "de",
            "tableSchema": {
                "columns": [{"name": "x", "datatype": "integer", "required": true}]
            }
        }));
        let table = &group.tables[0];
        assert_eq!(
            table.inherited.null.as_deref(),
            Some(&["NA".to_string(), "-".to_string()][..])
        );
        assert_eq!(table.inherited.lang.as_deref(), Some("de"));
        let column = &table.schema.as_ref().unwrap().columns[0];
        assert_eq!(column.inherited.required, Some(true));
        assert_eq!(column.inherited.datatype.as_ref().unwrap().base, "integer");
    }

    #[test]
    fn common_properties_expand_and_unknowns_warn() {
        let (group, warnings) = parse(json!({
            "url": "data.csv",
            "dc:title": "Tree Ops",
            "bogus": "ignored"
        }));
        let table = &group.tables[0];
        assert_eq!(table.common.len(), 1);
        assert_eq!(table.common[0].0, "http://purl.org/dc/terms/title");
        assert!(warnings.iter().any(|w| w.message.contains("bogus")));
    }

    #[test]
    fn nested_table_group_is_rejected() {
        let mut warnings = Vec::new();
        let err = parse_document(
            &json!({"tables": [{"tables": [{"url": "x.csv"}]}]}),
            &doc_url(),
            &mut warnings,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Metadata(_)));
    }

    #[test]
    fn datatype_object_form() {
        let (group, _) = parse(json!({
            "url": "data.csv",
            "tableSchema": {"columns": [{
                "name": "amount",
                "datatype": {
                    "base": "decimal",
                    "format": {"pattern": "#,##0.00", "groupChar": ",", "decimalChar": "."},
                    "minimum": 0
                }
            }]}
        }));
        let dt = group.tables[0].schema.as_ref().unwrap().columns[0]
            .inherited
            .datatype
            .clone()
            .unwrap();
        assert_eq!(dt.base, "decimal");
        assert_eq!(dt.minimum.as_deref(), Some("0"));
        assert!(matches!(dt.format, Some(FormatSpec::Number { .. })));
    }

    #[test]
    fn validation_rejects_reserved_and_duplicate_names() {
        let (group, _) = parse(json!({
            "url": "data.csv",
            "tableSchema": {"columns": [{"name": "_x"}]}
        }));
        let mut warnings = Vec::new();
        assert!(group.validate(&mut warnings).is_err());

        let (group, _) = parse(json!({
            "url": "data.csv",
            "tableSchema": {"columns": [{"name": "x"}, {"name": "x"}]}
        }));
        assert!(group.validate(&mut warnings).is_err());
    }

    #[test]
    fn validation_checks_key_references() {
        let (group, _) = parse(json!({
            "url": "data.csv",
            "tableSchema": {
                "columns": [{"name": "a"}],
                "primaryKey": "missing"
            }
        }));
        let mut warnings = Vec::new();
        assert!(group.validate(&mut warnings).is_err());
    }

    #[test]
    fn foreign_keys_are_closed_objects() {
        let err = parse_foreign_key(&json!({
            "columnReference": "a",
            "reference": {"resource": "other.csv", "columnReference": "b"},
            "dc:title": "nope"
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Metadata(_)));
    }

    #[test]
    fn effective_names_fall_back_to_titles_then_position() {
        let named = Column {
            name: Some("GID".into()),
            ..Column::default()
        };
        assert_eq!(named.effective_name(0), "GID");

        let titled = Column {
            titles: NaturalLanguage::single("On Street"),
            ..Column::default()
        };
        assert_eq!(titled.effective_name(1), "On%20Street");

        assert_eq!(Column::default().effective_name(2), "_col.3");
    }

    #[test]
    fn titles_intersect_across_language_specificity() {
        let mut a = NaturalLanguage::default();
        a.push("en", "Name".into());
        let mut b = NaturalLanguage::default();
        b.push("en-GB", "Name".into());
        assert!(a.intersects(&b));

        let mut c = NaturalLanguage::default();
        c.push("de", "Straße".into());
        assert!(!a.intersects(&c));
        let und = NaturalLanguage::single("Name");
        assert!(und.intersects(&a));
    }

    #[test]
    fn virtual_columns_must_trail() {
        let (group, _) = parse(json!({
            "url": "data.csv",
            "tableSchema": {"columns": [
                {"name": "v", "virtual": true},
                {"name": "a"}
            ]}
        }));
        let mut warnings = Vec::new();
        assert!(group.validate(&mut warnings).is_err());
    }
}
