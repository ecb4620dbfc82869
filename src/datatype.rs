//! Built-in datatype registry, value parsing, and facet checking.
//!
//! Each CSVW datatype shortcut maps to a [`Builtin`] carrying its IRI and
//! value family. [`compile`] turns a metadata datatype description into a
//! [`CompiledDatatype`] with a pre-built format (number pattern, date
//! pattern, boolean tokens, or anchored regex) and pre-parsed facet
//! bounds, so per-cell work is a match plus a comparison.
//!
//! Range facets compare through `rust_decimal` for the decimal family and
//! chrono values for temporal types; floating point is only used where the
//! value space itself is floating point.

use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use rust_decimal::Decimal;

use crate::{
    date_format::{self, DatePattern, TemporalKind},
    error::{Error, Result},
    metadata::{Datatype, FormatSpec},
    number_format::{self, NumberFormat},
    vocab,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    String,
    NormalizedString,
    Token,
    Language,
    Name,
    NcName,
    Boolean,
    Decimal,
    Integer,
    Float,
    Double,
    Duration,
    Date,
    Time,
    DateTime,
    GYearMonth,
    GYear,
    GMonthDay,
    GDay,
    GMonth,
    HexBinary,
    Base64Binary,
    AnyUri,
    AnySimpleType,
    Xml,
    Html,
    Json,
}

impl Family {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Family::Decimal | Family::Integer | Family::Float | Family::Double
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, Family::Date | Family::Time | Family::DateTime)
    }

    fn is_stringy(&self) -> bool {
        matches!(
            self,
            Family::String
                | Family::NormalizedString
                | Family::Token
                | Family::Language
                | Family::Name
                | Family::NcName
                | Family::AnyUri
                | Family::Xml
                | Family::Html
                | Family::Json
                | Family::AnySimpleType
        )
    }
}

#[derive(Debug)]
pub struct Builtin {
    pub name: &'static str,
    pub iri: String,
    pub family: Family,
    /// Value-space bounds for the bounded integer types.
    pub int_bounds: (Option<i128>, Option<i128>),
}

macro_rules! xsd_type {
    ($name:literal, $family:expr) => {
        xsd_type!($name, $family, (None, None))
    };
    ($name:literal, $family:expr, $bounds:expr) => {
        Builtin {
            name: $name,
            iri: vocab::xsd($name),
            family: $family,
            int_bounds: $bounds,
        }
    };
}

fn builtins() -> &'static Vec<Builtin> {
    static TABLE: OnceLock<Vec<Builtin>> = OnceLock::new();
    TABLE.get_or_init(|| {
        vec![
            xsd_type!("anySimpleType", Family::AnySimpleType),
            xsd_type!("string", Family::String),
            xsd_type!("normalizedString", Family::NormalizedString),
            xsd_type!("token", Family::Token),
            xsd_type!("language", Family::Language),
            xsd_type!("Name", Family::Name),
            xsd_type!("NCName", Family::NcName),
            xsd_type!("boolean", Family::Boolean),
            xsd_type!("decimal", Family::Decimal),
            xsd_type!("integer", Family::Integer),
            xsd_type!("nonPositiveInteger", Family::Integer, (None, Some(0))),
            xsd_type!("negativeInteger", Family::Integer, (None, Some(-1))),
            xsd_type!(
                "long",
                Family::Integer,
                (Some(i64::MIN as i128), Some(i64::MAX as i128))
            ),
            xsd_type!(
                "int",
                Family::Integer,
                (Some(i32::MIN as i128), Some(i32::MAX as i128))
            ),
            xsd_type!(
                "short",
                Family::Integer,
                (Some(i16::MIN as i128), Some(i16::MAX as i128))
            ),
            xsd_type!(
                "byte",
                Family::Integer,
                (Some(i8::MIN as i128), Some(i8::MAX as i128))
            ),
            xsd_type!("nonNegativeInteger", Family::Integer, (Some(0), None)),
            xsd_type!(
                "unsignedLong",
                Family::Integer,
                (Some(0), Some(u64::MAX as i128))
            ),
            xsd_type!(
                "unsignedInt",
                Family::Integer,
                (Some(0), Some(u32::MAX as i128))
            ),
            xsd_type!(
                "unsignedShort",
                Family::Integer,
                (Some(0), Some(u16::MAX as i128))
            ),
            xsd_type!(
                "unsignedByte",
                Family::Integer,
                (Some(0), Some(u8::MAX as i128))
            ),
            xsd_type!("positiveInteger", Family::Integer, (Some(1), None)),
            xsd_type!("float", Family::Float),
            xsd_type!("double", Family::Double),
            xsd_type!("duration", Family::Duration),
            xsd_type!("dateTime", Family::DateTime),
            xsd_type!("time", Family::Time),
            xsd_type!("date", Family::Date),
            xsd_type!("gYearMonth", Family::GYearMonth),
            xsd_type!("gYear", Family::GYear),
            xsd_type!("gMonthDay", Family::GMonthDay),
            xsd_type!("gDay", Family::GDay),
            xsd_type!("gMonth", Family::GMonth),
            xsd_type!("hexBinary", Family::HexBinary),
            xsd_type!("base64Binary", Family::Base64Binary),
            xsd_type!("anyURI", Family::AnyUri),
            Builtin {
                name: "xml",
                iri: vocab::rdf("XMLLiteral"),
                family: Family::Xml,
                int_bounds: (None, None),
            },
            Builtin {
                name: "html",
                iri: vocab::rdf("HTML"),
                family: Family::Html,
                int_bounds: (None, None),
            },
            Builtin {
                name: "json",
                iri: vocab::csvw("JSON"),
                family: Family::Json,
                int_bounds: (None, None),
            },
        ]
    })
}

/// Resolves a datatype base name, including the CSVW aliases.
pub fn builtin(name: &str) -> Option<&'static Builtin> {
    let canonical = match name {
        "number" => "double",
        "binary" => "base64Binary",
        "datetime" => "dateTime",
        "any" => "anySimpleType",
        other => other,
    };
    builtins().iter().find(|b| b.name == canonical)
}

/// A parsed cell value: the canonical lexical form, its datatype IRI, and
/// (when the family supports range facets) the comparable value.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue {
    pub lexical: String,
    pub datatype_iri: String,
    pub comparable: Option<Comparable>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Comparable {
    Decimal(Decimal),
    Double(f64),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

impl Comparable {
    fn partial_cmp(&self, other: &Comparable) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Comparable::Decimal(a), Comparable::Decimal(b)) => a.partial_cmp(b),
            (Comparable::Double(a), Comparable::Double(b)) => a.partial_cmp(b),
            (Comparable::Date(a), Comparable::Date(b)) => a.partial_cmp(b),
            (Comparable::Time(a), Comparable::Time(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum CompiledFormat {
    Number(NumberFormat),
    Date(DatePattern),
    Boolean { true_token: String, false_token: String },
    Pattern(Regex),
}

#[derive(Debug, Default)]
struct CompiledFacets {
    length: Option<usize>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    minimum: Option<Comparable>,
    maximum: Option<Comparable>,
    min_exclusive: Option<Comparable>,
    max_exclusive: Option<Comparable>,
}

#[derive(Debug)]
pub struct CompiledDatatype {
    pub base: &'static Builtin,
    /// The IRI typed literals carry: a datatype `@id` when declared,
    /// otherwise the base IRI.
    datatype_iri: String,
    format: Option<CompiledFormat>,
    facets: CompiledFacets,
}

/// Compiles a metadata datatype description, enforcing the facet
/// invariants along the way.
pub fn compile(datatype: &Datatype) -> Result<CompiledDatatype> {
    let base = builtin(&datatype.base).ok_or_else(|| {
        Error::metadata(format!("unknown datatype base '{}'", datatype.base))
    })?;

    let format = match &datatype.format {
        None => None,
        Some(spec) => Some(compile_format(base, spec)?),
    };

    let facets = compile_facets(base, datatype)?;
    Ok(CompiledDatatype {
        base,
        datatype_iri: datatype.id.clone().unwrap_or_else(|| base.iri.clone()),
        format,
        facets,
    })
}

fn compile_format(base: &'static Builtin, spec: &FormatSpec) -> Result<CompiledFormat> {
    match spec {
        FormatSpec::Number {
            pattern,
            group_char,
            decimal_char,
        } => {
            if !base.family.is_numeric() {
                return Err(Error::metadata(format!(
                    "a number format object is not applicable to datatype '{}'",
                    base.name
                )));
            }
            Ok(CompiledFormat::Number(NumberFormat {
                pattern: pattern.clone(),
                group_char: group_char.unwrap_or(','),
                decimal_char: decimal_char.unwrap_or('.'),
            }))
        }
        FormatSpec::Text(pattern) => match base.family {
            f if f.is_numeric() => Ok(CompiledFormat::Number(NumberFormat::with_pattern(
                pattern.clone(),
            ))),
            f if f.is_temporal() => {
                let compiled = date_format::compile(pattern)?;
                let expected = match f {
                    Family::Date => TemporalKind::Date,
                    Family::Time => TemporalKind::Time,
                    _ => TemporalKind::DateTime,
                };
                if compiled.kind != expected {
                    return Err(Error::metadata(format!(
                        "date format '{pattern}' does not fit datatype '{}'",
                        base.name
                    )));
                }
                Ok(CompiledFormat::Date(compiled))
            }
            Family::Boolean => {
                let (t, f) = pattern.split_once('|').ok_or_else(|| {
                    Error::metadata(format!(
                        "boolean format '{pattern}' must be 'trueValue|falseValue'"
                    ))
                })?;
                if t.is_empty() || f.is_empty() {
                    return Err(Error::metadata(format!(
                        "boolean format '{pattern}' must name both tokens"
                    )));
                }
                Ok(CompiledFormat::Boolean {
                    true_token: t.to_string(),
                    false_token: f.to_string(),
                })
            }
            _ => {
                let anchored = format!("^(?:{pattern})$");
                let regex = Regex::new(&anchored).map_err(|err| {
                    Error::metadata(format!("invalid format regular expression: {err}"))
                })?;
                Ok(CompiledFormat::Pattern(regex))
            }
        },
    }
}

fn compile_facets(base: &'static Builtin, datatype: &Datatype) -> Result<CompiledFacets> {
    let mut facets = CompiledFacets {
        length: datatype.length,
        min_length: datatype.min_length,
        max_length: datatype.max_length,
        ..CompiledFacets::default()
    };

    let has_length_facet =
        facets.length.is_some() || facets.min_length.is_some() || facets.max_length.is_some();
    if has_length_facet
        && !(base.family.is_stringy()
            || matches!(base.family, Family::HexBinary | Family::Base64Binary))
    {
        return Err(Error::metadata(format!(
            "length facets are not applicable to datatype '{}'",
            base.name
        )));
    }
    if let Some(length) = facets.length {
        if facets.min_length.is_some_and(|min| min != length) {
            return Err(Error::metadata(
                "length and minLength must agree when both are given",
            ));
        }
        if facets.max_length.is_some_and(|max| max != length) {
            return Err(Error::metadata(
                "length and maxLength must agree when both are given",
            ));
        }
    }
    if let (Some(min), Some(max)) = (facets.min_length, facets.max_length)
        && min > max
    {
        return Err(Error::metadata("minLength must not exceed maxLength"));
    }

    let range_inputs = [
        &datatype.minimum,
        &datatype.maximum,
        &datatype.min_inclusive,
        &datatype.max_inclusive,
        &datatype.min_exclusive,
        &datatype.max_exclusive,
    ];
    if range_inputs.iter().any(|v| v.is_some())
        && !(base.family.is_numeric() || base.family.is_temporal())
    {
        return Err(Error::metadata(format!(
            "range facets are not applicable to datatype '{}'",
            base.name
        )));
    }

    if datatype.minimum.is_some() && datatype.min_exclusive.is_some()
        || datatype.min_inclusive.is_some() && datatype.min_exclusive.is_some()
    {
        return Err(Error::metadata(
            "minimum/minInclusive and minExclusive are mutually exclusive",
        ));
    }
    if datatype.maximum.is_some() && datatype.max_exclusive.is_some()
        || datatype.max_inclusive.is_some() && datatype.max_exclusive.is_some()
    {
        return Err(Error::metadata(
            "maximum/maxInclusive and maxExclusive are mutually exclusive",
        ));
    }

    let parse_bound = |raw: &Option<String>| -> Result<Option<Comparable>> {
        match raw {
            None => Ok(None),
            Some(text) => parse_facet_bound(base, text).map(Some),
        }
    };

    // minimum/maximum are synonyms for the inclusive pair.
    facets.minimum = parse_bound(&datatype.minimum)?.or(parse_bound(&datatype.min_inclusive)?);
    facets.maximum = parse_bound(&datatype.maximum)?.or(parse_bound(&datatype.max_inclusive)?);
    facets.min_exclusive = parse_bound(&datatype.min_exclusive)?;
    facets.max_exclusive = parse_bound(&datatype.max_exclusive)?;

    for (lo, hi) in [
        (&facets.minimum, &facets.maximum),
        (&facets.min_exclusive, &facets.max_exclusive),
        (&facets.minimum, &facets.max_exclusive),
        (&facets.min_exclusive, &facets.maximum),
    ] {
        if let (Some(lo), Some(hi)) = (lo, hi)
            && lo.partial_cmp(hi) == Some(std::cmp::Ordering::Greater)
        {
            return Err(Error::metadata(
                "the lower range facet exceeds the upper range facet",
            ));
        }
    }
    Ok(facets)
}

fn parse_facet_bound(base: &'static Builtin, text: &str) -> Result<Comparable> {
    let err = || {
        Error::metadata(format!(
            "facet bound '{text}' is not a valid {} value",
            base.name
        ))
    };
    match base.family {
        Family::Decimal | Family::Integer => {
            Decimal::from_str_exact(text).map(Comparable::Decimal).map_err(|_| err())
        }
        Family::Float | Family::Double => {
            text.parse::<f64>().map(Comparable::Double).map_err(|_| err())
        }
        Family::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(Comparable::Date)
            .map_err(|_| err()),
        Family::Time => NaiveTime::parse_from_str(text, "%H:%M:%S")
            .map(Comparable::Time)
            .map_err(|_| err()),
        Family::DateTime => NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
            .map(Comparable::DateTime)
            .map_err(|_| err()),
        _ => Err(err()),
    }
}

impl CompiledDatatype {
    /// Parses one raw cell string into its typed value.
    pub fn parse(&self, raw: &str) -> Result<TypedValue> {
        let value = match self.base.family {
            f if f.is_numeric() => self.parse_numeric(raw)?,
            f if f.is_temporal() => self.parse_temporal(raw)?,
            Family::Boolean => self.parse_boolean(raw)?,
            _ => self.parse_stringlike(raw)?,
        };
        self.check_facets(raw, &value)?;
        Ok(value)
    }

    fn typed(&self, lexical: impl Into<String>, comparable: Option<Comparable>) -> TypedValue {
        TypedValue {
            lexical: lexical.into(),
            datatype_iri: self.datatype_iri.clone(),
            comparable,
        }
    }

    fn number_format(&self) -> NumberFormat {
        match &self.format {
            Some(CompiledFormat::Number(fmt)) => fmt.clone(),
            _ => NumberFormat::default(),
        }
    }

    fn parse_numeric(&self, raw: &str) -> Result<TypedValue> {
        let canonical = number_format::parse_number(&self.number_format(), raw)?;
        let family = self.base.family;

        if matches!(canonical.as_str(), "NaN" | "INF" | "-INF") {
            if matches!(family, Family::Float | Family::Double) {
                let double = match canonical.as_str() {
                    "NaN" => f64::NAN,
                    "INF" => f64::INFINITY,
                    _ => f64::NEG_INFINITY,
                };
                return Ok(self.typed(canonical, Some(Comparable::Double(double))));
            }
            return Err(Error::parse(format!(
                "'{raw}' is not a valid {}",
                self.base.name
            )));
        }

        let canonical = canonical.strip_prefix('+').unwrap_or(&canonical).to_string();
        match family {
            Family::Integer => {
                if canonical.contains(['.', 'e', 'E']) {
                    return Err(Error::parse(format!(
                        "'{raw}' has a fractional or exponent part; {} forbids it",
                        self.base.name
                    )));
                }
                let numeric: i128 = canonical.parse().map_err(|_| {
                    Error::parse(format!("'{raw}' is out of integer range"))
                })?;
                let (lo, hi) = self.base.int_bounds;
                if lo.is_some_and(|lo| numeric < lo) || hi.is_some_and(|hi| numeric > hi) {
                    return Err(Error::parse(format!(
                        "'{raw}' is outside the value space of {}",
                        self.base.name
                    )));
                }
                let comparable = Decimal::try_from_i128_with_scale(numeric, 0)
                    .ok()
                    .map(Comparable::Decimal);
                Ok(self.typed(canonical, comparable))
            }
            Family::Decimal => {
                if canonical.contains(['e', 'E']) {
                    return Err(Error::parse(format!(
                        "'{raw}' uses an exponent; xsd:decimal forbids it"
                    )));
                }
                let numeric = Decimal::from_str_exact(&canonical)
                    .map_err(|_| Error::parse(format!("'{raw}' is out of decimal range")))?;
                Ok(self.typed(canonical, Some(Comparable::Decimal(numeric))))
            }
            _ => {
                let numeric: f64 = canonical
                    .parse()
                    .map_err(|_| Error::parse(format!("'{raw}' is not a valid {}", self.base.name)))?;
                Ok(self.typed(canonical, Some(Comparable::Double(numeric))))
            }
        }
    }

    fn parse_temporal(&self, raw: &str) -> Result<TypedValue> {
        let canonical = match &self.format {
            Some(CompiledFormat::Date(pattern)) => pattern.parse(raw)?,
            _ => default_temporal_parse(self.base.family, raw)?,
        };
        let comparable = temporal_comparable(self.base.family, &canonical);
        Ok(self.typed(canonical, comparable))
    }

    fn parse_boolean(&self, raw: &str) -> Result<TypedValue> {
        let value = match &self.format {
            Some(CompiledFormat::Boolean {
                true_token,
                false_token,
            }) => {
                if raw == true_token {
                    true
                } else if raw == false_token {
                    false
                } else {
                    return Err(Error::parse(format!(
                        "'{raw}' matches neither boolean token '{true_token}' nor '{false_token}'"
                    )));
                }
            }
            _ => match raw {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => {
                    return Err(Error::parse(format!("'{raw}' is not a valid boolean")));
                }
            },
        };
        Ok(self.typed(if value { "true" } else { "false" }, None))
    }

    fn parse_stringlike(&self, raw: &str) -> Result<TypedValue> {
        if let Some(CompiledFormat::Pattern(regex)) = &self.format
            && !regex.is_match(raw)
        {
            return Err(Error::parse(format!(
                "'{raw}' does not match the format pattern"
            )));
        }
        check_lexical_space(self.base, raw)?;
        Ok(self.typed(raw, None))
    }

    fn check_facets(&self, raw: &str, value: &TypedValue) -> Result<()> {
        let facets = &self.facets;
        if facets.length.is_some() || facets.min_length.is_some() || facets.max_length.is_some() {
            let measured = measured_length(self.base.family, raw);
            if facets.length.is_some_and(|len| measured != len) {
                return Err(Error::parse(format!(
                    "'{raw}' has length {measured}, expected exactly {}",
                    facets.length.unwrap()
                )));
            }
            if facets.min_length.is_some_and(|min| measured < min) {
                return Err(Error::parse(format!(
                    "'{raw}' has length {measured}, below minLength {}",
                    facets.min_length.unwrap()
                )));
            }
            if facets.max_length.is_some_and(|max| measured > max) {
                return Err(Error::parse(format!(
                    "'{raw}' has length {measured}, above maxLength {}",
                    facets.max_length.unwrap()
                )));
            }
        }

        if let Some(actual) = &value.comparable {
            use std::cmp::Ordering::*;
            let out_of_range = |bound: &Option<Comparable>, failing: &[std::cmp::Ordering]| {
                bound.as_ref().is_some_and(|b| {
                    actual
                        .partial_cmp(b)
                        .map(|ord| failing.contains(&ord))
                        .unwrap_or(true)
                })
            };
            if out_of_range(&facets.minimum, &[Less])
                || out_of_range(&facets.min_exclusive, &[Less, Equal])
                || out_of_range(&facets.maximum, &[Greater])
                || out_of_range(&facets.max_exclusive, &[Greater, Equal])
            {
                return Err(Error::parse(format!("'{raw}' is outside the permitted range")));
            }
        }
        Ok(())
    }
}

/// Octets for the binary types, characters for everything else.
fn measured_length(family: Family, raw: &str) -> usize {
    match family {
        Family::HexBinary => raw.len() / 2,
        Family::Base64Binary => {
            let padding = raw.chars().rev().take_while(|c| *c == '=').count();
            (raw.len() / 4) * 3 - padding
        }
        _ => raw.chars().count(),
    }
}

fn xsd_timezone() -> &'static str {
    r"(?:Z|[+-]\d{2}:\d{2})?"
}

fn default_temporal_parse(family: Family, raw: &str) -> Result<String> {
    static DATE_RE: OnceLock<Regex> = OnceLock::new();
    static TIME_RE: OnceLock<Regex> = OnceLock::new();
    static DATETIME_RE: OnceLock<Regex> = OnceLock::new();
    let tz = xsd_timezone();
    let (regex, label) = match family {
        Family::Date => (
            DATE_RE.get_or_init(|| {
                Regex::new(&format!(
                    r"^(?P<y>-?\d{{4,}})-(?P<mo>\d{{2}})-(?P<d>\d{{2}})(?P<tz>{tz})$"
                ))
                .unwrap()
            }),
            "date",
        ),
        Family::Time => (
            TIME_RE.get_or_init(|| {
                Regex::new(&format!(
                    r"^(?P<h>\d{{2}}):(?P<mi>\d{{2}}):(?P<s>\d{{2}})(?:\.(?P<f>\d+))?(?P<tz>{tz})$"
                ))
                .unwrap()
            }),
            "time",
        ),
        _ => (
            DATETIME_RE.get_or_init(|| {
                Regex::new(&format!(
                    r"^(?P<y>-?\d{{4,}})-(?P<mo>\d{{2}})-(?P<d>\d{{2}})T(?P<h>\d{{2}}):(?P<mi>\d{{2}}):(?P<s>\d{{2}})(?:\.(?P<f>\d+))?(?P<tz>{tz})$"
                ))
                .unwrap()
            }),
            "dateTime",
        ),
    };
    let caps = regex
        .captures(raw)
        .ok_or_else(|| Error::parse(format!("'{raw}' is not a valid xsd:{label}")))?;

    let mut out = String::new();
    if let Some(y) = caps.name("y") {
        let year: i32 = y.as_str().parse().map_err(|_| {
            Error::parse(format!("'{raw}' has a year out of range"))
        })?;
        let month: u32 = caps["mo"].parse().unwrap();
        let day: u32 = caps["d"].parse().unwrap();
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| Error::parse(format!("'{raw}' is not a valid calendar date")))?;
        out.push_str(&date.format("%Y-%m-%d").to_string());
    }
    if let Some(h) = caps.name("h") {
        let hour: u32 = h.as_str().parse().unwrap();
        let minute: u32 = caps["mi"].parse().unwrap();
        let second: u32 = caps["s"].parse().unwrap();
        NaiveTime::from_hms_opt(hour, minute, second)
            .ok_or_else(|| Error::parse(format!("'{raw}' is not a valid time of day")))?;
        if !out.is_empty() {
            out.push('T');
        }
        out.push_str(&format!("{hour:02}:{minute:02}:{second:02}"));
        if let Some(frac) = caps.name("f") {
            let trimmed = frac.as_str().trim_end_matches('0');
            if !trimmed.is_empty() {
                out.push('.');
                out.push_str(trimmed);
            }
        }
    }
    if let Some(tz) = caps.name("tz").map(|m| m.as_str()).filter(|s| !s.is_empty()) {
        out.push_str(if matches!(tz, "+00:00" | "-00:00") { "Z" } else { tz });
    }
    Ok(out)
}

/// Builds the comparable for a canonical temporal lexical (timezone
/// dropped for ordering; mixed-offset comparison is out of scope).
fn temporal_comparable(family: Family, canonical: &str) -> Option<Comparable> {
    let stripped = canonical
        .trim_end_matches('Z')
        .split(['+'])
        .next()
        .unwrap_or(canonical);
    // A '-' only introduces an offset after a time component.
    let stripped = match stripped.rfind('-') {
        Some(idx) if stripped[..idx].contains(':') => &stripped[..idx],
        _ => stripped,
    };
    match family {
        Family::Date => NaiveDate::parse_from_str(stripped, "%Y-%m-%d")
            .ok()
            .map(Comparable::Date),
        Family::Time => {
            let fmt = if stripped.contains('.') { "%H:%M:%S%.f" } else { "%H:%M:%S" };
            NaiveTime::parse_from_str(stripped, fmt)
                .ok()
                .map(Comparable::Time)
        }
        Family::DateTime => {
            let fmt = if stripped.contains('.') {
                "%Y-%m-%dT%H:%M:%S%.f"
            } else {
                "%Y-%m-%dT%H:%M:%S"
            };
            NaiveDateTime::parse_from_str(stripped, fmt)
                .ok()
                .map(Comparable::DateTime)
        }
        _ => None,
    }
}

fn check_lexical_space(base: &'static Builtin, raw: &str) -> Result<()> {
    static DURATION_RE: OnceLock<Regex> = OnceLock::new();
    static G_RES: OnceLock<[Regex; 5]> = OnceLock::new();
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    static NCNAME_RE: OnceLock<Regex> = OnceLock::new();

    let fail = || Error::parse(format!("'{raw}' is not a valid {}", base.name));
    match base.family {
        Family::NormalizedString => {
            if raw.contains(['\t', '\r', '\n']) {
                return Err(fail());
            }
        }
        Family::Token => {
            if raw.contains(['\t', '\r', '\n'])
                || raw.starts_with(' ')
                || raw.ends_with(' ')
                || raw.contains("  ")
            {
                return Err(fail());
            }
        }
        Family::Language => {
            if !vocab::is_valid_language_tag(raw) {
                return Err(fail());
            }
        }
        Family::Name => {
            let re = NAME_RE.get_or_init(|| {
                Regex::new(r"^[\p{L}_:][\p{L}\p{N}\-._:]*$").unwrap()
            });
            if !re.is_match(raw) {
                return Err(fail());
            }
        }
        Family::NcName => {
            let re = NCNAME_RE.get_or_init(|| {
                Regex::new(r"^[\p{L}_][\p{L}\p{N}\-._]*$").unwrap()
            });
            if !re.is_match(raw) {
                return Err(fail());
            }
        }
        Family::Duration => {
            let re = DURATION_RE.get_or_init(|| {
                Regex::new(
                    r"^-?P(?:\d+Y)?(?:\d+M)?(?:\d+D)?(?:T(?:\d+H)?(?:\d+M)?(?:\d+(?:\.\d+)?S)?)?$",
                )
                .unwrap()
            });
            if !re.is_match(raw) || raw.trim_start_matches('-') == "P" || raw.ends_with('T') {
                return Err(fail());
            }
        }
        Family::GYearMonth | Family::GYear | Family::GMonthDay | Family::GDay | Family::GMonth => {
            let tz = xsd_timezone();
            let res = G_RES.get_or_init(|| {
                [
                    Regex::new(&format!(r"^-?\d{{4,}}-\d{{2}}{tz}$")).unwrap(),
                    Regex::new(&format!(r"^-?\d{{4,}}{tz}$")).unwrap(),
                    Regex::new(&format!(r"^--\d{{2}}-\d{{2}}{tz}$")).unwrap(),
                    Regex::new(&format!(r"^---\d{{2}}{tz}$")).unwrap(),
                    Regex::new(&format!(r"^--\d{{2}}{tz}$")).unwrap(),
                ]
            });
            let idx = match base.family {
                Family::GYearMonth => 0,
                Family::GYear => 1,
                Family::GMonthDay => 2,
                Family::GDay => 3,
                _ => 4,
            };
            if !res[idx].is_match(raw) {
                return Err(fail());
            }
        }
        Family::HexBinary => {
            if raw.len() % 2 != 0 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(fail());
            }
        }
        Family::Base64Binary => {
            let body = raw.trim_end_matches('=');
            let padding = raw.len() - body.len();
            if raw.len() % 4 != 0
                || padding > 2
                || !body
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/')
            {
                return Err(fail());
            }
        }
        Family::Json => {
            if serde_json::from_str::<serde_json::Value>(raw).is_err() {
                return Err(fail());
            }
        }
        _ => {}
    }
    Ok(())
}

/// The engine-wide default datatype when no metadata supplies one.
pub fn default_datatype() -> CompiledDatatype {
    compile(&Datatype::with_base("string")).expect("string datatype always compiles")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Datatype;

    fn compiled(base: &str) -> CompiledDatatype {
        compile(&Datatype::with_base(base)).unwrap()
    }

    #[test]
    fn aliases_resolve_to_their_targets() {
        assert_eq!(builtin("number").unwrap().name, "double");
        assert_eq!(builtin("binary").unwrap().name, "base64Binary");
        assert_eq!(builtin("datetime").unwrap().name, "dateTime");
        assert_eq!(builtin("json").unwrap().iri, vocab::csvw("JSON"));
        assert!(builtin("complex").is_none());
    }

    #[test]
    fn integer_bounds_are_enforced() {
        assert!(compiled("byte").parse("127").is_ok());
        assert!(compiled("byte").parse("128").is_err());
        assert!(compiled("unsignedInt").parse("-1").is_err());
        assert!(compiled("positiveInteger").parse("0").is_err());
        assert!(compiled("nonPositiveInteger").parse("-3").is_ok());
    }

    #[test]
    fn integer_rejects_fractions() {
        assert!(compiled("integer").parse("1.5").is_err());
        assert_eq!(compiled("integer").parse("042").unwrap().lexical, "042");
    }

    #[test]
    fn decimal_rejects_exponent_and_specials() {
        assert!(compiled("decimal").parse("1e3").is_err());
        assert!(compiled("decimal").parse("NaN").is_err());
        assert_eq!(compiled("decimal").parse("1,234.5").unwrap().lexical, "1234.5");
    }

    #[test]
    fn double_accepts_specials() {
        assert_eq!(compiled("double").parse("NaN").unwrap().lexical, "NaN");
        assert_eq!(compiled("double").parse("-INF").unwrap().lexical, "-INF");
        assert_eq!(compiled("double").parse("1.5e3").unwrap().lexical, "1.5e3");
    }

    #[test]
    fn boolean_defaults_and_format() {
        assert_eq!(compiled("boolean").parse("1").unwrap().lexical, "true");
        let dt = Datatype {
            format: Some(FormatSpec::Text("Y|N".into())),
            ..Datatype::with_base("boolean")
        };
        let compiled = compile(&dt).unwrap();
        assert_eq!(compiled.parse("Y").unwrap().lexical, "true");
        assert_eq!(compiled.parse("N").unwrap().lexical, "false");
        assert!(compiled.parse("true").is_err());
    }

    #[test]
    fn default_temporal_lexicals() {
        assert_eq!(
            compiled("date").parse("2015-01-05").unwrap().lexical,
            "2015-01-05"
        );
        assert_eq!(
            compiled("dateTime").parse("2015-01-05T12:00:00+00:00").unwrap().lexical,
            "2015-01-05T12:00:00Z"
        );
        assert!(compiled("date").parse("2015-13-05").is_err());
        assert_eq!(
            compiled("time").parse("12:00:00.500").unwrap().lexical,
            "12:00:00.5"
        );
    }

    #[test]
    fn gregorian_fragments() {
        assert!(compiled("gYear").parse("2015").is_ok());
        assert!(compiled("gYearMonth").parse("2015-01").is_ok());
        assert!(compiled("gMonthDay").parse("--01-05").is_ok());
        assert!(compiled("gDay").parse("---05").is_ok());
        assert!(compiled("gMonth").parse("--01").is_ok());
        assert!(compiled("gMonth").parse("01").is_err());
    }

    #[test]
    fn binary_lengths_measure_octets() {
        let dt = Datatype {
            length: Some(3),
            ..Datatype::with_base("hexBinary")
        };
        let compiled = compile(&dt).unwrap();
        assert!(compiled.parse("0A0B0C").is_ok());
        assert!(compiled.parse("0A0B").is_err());

        let dt = Datatype {
            length: Some(5),
            ..Datatype::with_base("base64Binary")
        };
        let compiled = compile(&dt).unwrap();
        assert!(compiled.parse("aGVsbG8=").is_ok());
    }

    #[test]
    fn range_facets_compare_exactly() {
        let dt = Datatype {
            minimum: Some("0".into()),
            maximum: Some("100".into()),
            ..Datatype::with_base("decimal")
        };
        let compiled = compile(&dt).unwrap();
        assert!(compiled.parse("100").is_ok());
        assert!(compiled.parse("100.0001").is_err());
        assert!(compiled.parse("-0.0001").is_err());
    }

    #[test]
    fn exclusive_facets_reject_the_bound() {
        let dt = Datatype {
            min_exclusive: Some("0".into()),
            ..Datatype::with_base("integer")
        };
        let compiled = compile(&dt).unwrap();
        assert!(compiled.parse("1").is_ok());
        assert!(compiled.parse("0").is_err());
    }

    #[test]
    fn conflicting_facets_fail_compilation() {
        let dt = Datatype {
            minimum: Some("10".into()),
            maximum: Some("5".into()),
            ..Datatype::with_base("integer")
        };
        assert!(matches!(compile(&dt), Err(Error::Metadata(_))));

        let dt = Datatype {
            minimum: Some("1".into()),
            min_exclusive: Some("1".into()),
            ..Datatype::with_base("integer")
        };
        assert!(matches!(compile(&dt), Err(Error::Metadata(_))));

        let dt = Datatype {
            length: Some(2),
            min_length: Some(3),
            ..Datatype::with_base("string")
        };
        assert!(matches!(compile(&dt), Err(Error::Metadata(_))));
    }

    #[test]
    fn range_facets_on_dates() {
        let dt = Datatype {
            minimum: Some("2015-01-01".into()),
            ..Datatype::with_base("date")
        };
        let compiled = compile(&dt).unwrap();
        assert!(compiled.parse("2015-06-01").is_ok());
        assert!(compiled.parse("2014-12-31").is_err());
    }

    #[test]
    fn string_format_is_an_anchored_regex() {
        let dt = Datatype {
            format: Some(FormatSpec::Text("[A-Z]{2}[0-9]+".into())),
            ..Datatype::with_base("string")
        };
        let compiled = compile(&dt).unwrap();
        assert!(compiled.parse("AB12").is_ok());
        assert!(compiled.parse("xAB12x").is_err());
    }

    #[test]
    fn lexical_space_checks() {
        assert!(compiled("token").parse("a  b").is_err());
        assert!(compiled("language").parse("en-GB").is_ok());
        assert!(compiled("language").parse("not a tag").is_err());
        assert!(compiled("Name").parse("ns:local").is_ok());
        assert!(compiled("NCName").parse("ns:local").is_err());
        assert!(compiled("duration").parse("P1Y2M3DT4H5M6S").is_ok());
        assert!(compiled("duration").parse("P").is_err());
        assert!(compiled("json").parse(r#"{"a":1}"#).is_ok());
        assert!(compiled("json").parse("{nope").is_err());
    }
}
