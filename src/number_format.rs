//! UAX #35 number pattern engine.
//!
//! A pattern like `#,##0.00` compiles to a regex that matches the value
//! exactly (digit minimums, grouping sizes, exponent, percent/permille) and
//! to a recipe for producing the canonical XSD lexical form: group
//! separators removed, the decimal separator normalized to `.`, the
//! exponent lowercased, percent and permille applied by shifting the
//! decimal point rather than dividing.
//!
//! Compilation is the expensive step, so compiled patterns are cached
//! process-wide keyed by (pattern, groupChar, decimalChar).

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
};

use regex::Regex;

use crate::error::{Error, Result};

/// Effective number format for a cell: an optional UAX #35 pattern plus
/// the separator characters in force.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberFormat {
    pub pattern: Option<String>,
    pub group_char: char,
    pub decimal_char: char,
}

impl Default for NumberFormat {
    fn default() -> Self {
        NumberFormat {
            pattern: None,
            group_char: ',',
            decimal_char: '.',
        }
    }
}

impl NumberFormat {
    pub fn with_pattern(pattern: impl Into<String>) -> Self {
        NumberFormat {
            pattern: Some(pattern.into()),
            ..NumberFormat::default()
        }
    }
}

#[derive(Debug)]
struct CompiledPattern {
    regex: Regex,
    /// Decimal-point left-shift applied to matched digits: 2 for `%`,
    /// 3 for `‰`, 0 otherwise.
    shift: usize,
}

fn cache() -> &'static Mutex<HashMap<(String, char, char), Arc<CompiledPattern>>> {
    static CACHE: OnceLock<Mutex<HashMap<(String, char, char), Arc<CompiledPattern>>>> =
        OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Parses `value` against the format, returning the canonical lexical form.
pub fn parse_number(format: &NumberFormat, value: &str) -> Result<String> {
    match &format.pattern {
        Some(pattern) => {
            let compiled = compile(pattern, format.group_char, format.decimal_char)?;
            apply_pattern(&compiled, value)
        }
        None => parse_unpatterned(format, value),
    }
}

fn compile(pattern: &str, group_char: char, decimal_char: char) -> Result<Arc<CompiledPattern>> {
    let key = (pattern.to_string(), group_char, decimal_char);
    if let Some(hit) = cache().lock().unwrap().get(&key) {
        return Ok(Arc::clone(hit));
    }
    let compiled = Arc::new(build_pattern(pattern, group_char, decimal_char)?);
    cache()
        .lock()
        .unwrap()
        .insert(key, Arc::clone(&compiled));
    Ok(compiled)
}

/// One side of the mantissa as written in the pattern.
#[derive(Debug, Default)]
struct DigitSpec {
    min: usize,
    max: usize,
    /// Digits after the last group separator (integer side) or before the
    /// first (fractional side).
    primary: usize,
    /// Size of interior groups; equals `primary` when only one separator
    /// appears.
    secondary: usize,
    grouped: bool,
}

fn analyze_digits(part: &str, fractional: bool) -> Result<DigitSpec> {
    let mut spec = DigitSpec {
        min: part.chars().filter(|c| *c == '0').count(),
        max: part.chars().filter(|c| matches!(c, '0' | '#')).count(),
        ..DigitSpec::default()
    };
    let groups: Vec<usize> = part.split(',').map(|g| g.chars().count()).collect();
    if groups.iter().any(|len| *len == 0) {
        return Err(Error::metadata(format!(
            "number pattern part '{part}' has adjacent group separators"
        )));
    }
    if groups.len() > 1 {
        spec.grouped = true;
        if fractional {
            spec.primary = groups[0];
            spec.secondary = if groups.len() > 2 { groups[1] } else { groups[0] };
        } else {
            spec.primary = groups[groups.len() - 1];
            spec.secondary = if groups.len() > 2 {
                groups[groups.len() - 2]
            } else {
                spec.primary
            };
        }
    }
    Ok(spec)
}

fn integer_regex(spec: &DigitSpec, group_char: char) -> String {
    if !spec.grouped {
        return if spec.min == 0 {
            r"\d*".to_string()
        } else {
            format!(r"\d{{{},}}", spec.min)
        };
    }
    let g = regex::escape(&group_char.to_string());
    let primary = spec.primary;
    let secondary = spec.secondary;
    let long = format!(r"\d{{1,{primary}}}(?:{g}\d{{{secondary}}})*{g}\d{{{primary}}}");
    if spec.min <= primary {
        let short_min = spec.min.max(1);
        format!(r"(?:{long}|\d{{{short_min},{primary}}})")
    } else {
        format!("(?:{long})")
    }
}

fn fraction_regex(spec: &DigitSpec, group_char: char, decimal_char: char) -> String {
    if spec.max == 0 {
        return String::new();
    }
    let d = regex::escape(&decimal_char.to_string());
    let digits = if spec.grouped {
        let g = regex::escape(&group_char.to_string());
        let primary = spec.primary;
        let secondary = spec.secondary;
        format!(
            r"(?:\d{{{primary}}}(?:{g}\d{{{secondary}}})*(?:{g}\d{{1,{secondary}}})?|\d{{1,{primary}}})"
        )
    } else {
        format!(r"\d{{{},{}}}", spec.min, spec.max)
    };
    if spec.min == 0 {
        format!(r"(?:{d}(?P<frac>{digits}))?")
    } else {
        format!(r"{d}(?P<frac>{digits})")
    }
}

fn build_pattern(pattern: &str, group_char: char, decimal_char: char) -> Result<CompiledPattern> {
    if group_char == decimal_char {
        return Err(Error::metadata(
            "groupChar and decimalChar must differ in a number format",
        ));
    }
    let chars: Vec<char> = pattern.chars().collect();
    let first_digit = chars
        .iter()
        .position(|c| matches!(c, '0' | '#'))
        .ok_or_else(|| {
            Error::metadata(format!("number pattern '{pattern}' contains no digit positions"))
        })?;
    let last_body = chars
        .iter()
        .rposition(|c| matches!(c, '0' | '#' | 'E' | '+'))
        .unwrap_or(chars.len() - 1);

    let prefix: String = chars[..first_digit].iter().collect();
    let body: String = chars[first_digit..=last_body].iter().collect();
    let suffix: String = chars[last_body + 1..].iter().collect();

    if let Some(bad) = body
        .chars()
        .find(|c| !matches!(c, '0' | '#' | ',' | '.' | 'E' | '+'))
    {
        return Err(Error::metadata(format!(
            "unexpected character '{bad}' in numeric body of pattern '{pattern}'"
        )));
    }

    let shift = match () {
        _ if prefix.contains('‰') || suffix.contains('‰') => 3,
        _ if prefix.contains('%') || suffix.contains('%') => 2,
        _ => 0,
    };

    let (mantissa, exponent) = match body.split_once('E') {
        Some((m, e)) => (m.to_string(), Some(e.to_string())),
        None => (body, None),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i.to_string(), f.to_string()),
        None => (mantissa, String::new()),
    };

    let int_spec = analyze_digits(&int_part, false)?;
    let frac_spec = if frac_part.is_empty() {
        DigitSpec::default()
    } else {
        analyze_digits(&frac_part, true)?
    };

    let mut re = String::from("^");
    re.push_str(&regex::escape(&prefix));
    re.push_str(r"(?P<sign>[-+]?)");
    re.push_str(&format!("(?P<int>{})", integer_regex(&int_spec, group_char)));
    re.push_str(&fraction_regex(&frac_spec, group_char, decimal_char));

    if let Some(exp) = exponent {
        let forced_sign = exp.starts_with('+');
        let exp_digits = exp.trim_start_matches('+');
        let min = exp_digits.chars().filter(|c| *c == '0').count().max(1);
        let max = exp_digits
            .chars()
            .filter(|c| matches!(c, '0' | '#'))
            .count()
            .max(min);
        let sign = if forced_sign { "[-+]" } else { "[-+]?" };
        re.push_str(&format!(r"[Ee](?P<esign>{sign})(?P<exp>\d{{{min},{max}}})"));
    }

    re.push_str(&regex::escape(&suffix));
    re.push('$');

    let regex = Regex::new(&re)
        .map_err(|err| Error::metadata(format!("number pattern '{pattern}': {err}")))?;
    Ok(CompiledPattern { regex, shift })
}

/// Matches `value` against a compiled pattern and renders the canonical
/// lexical form.
fn apply_pattern(compiled: &CompiledPattern, value: &str) -> Result<String> {
    if matches!(value, "NaN" | "INF" | "-INF") {
        return Ok(value.to_string());
    }
    let caps = compiled.regex.captures(value).ok_or_else(|| {
        Error::parse(format!("'{value}' does not match the number pattern"))
    })?;

    let sign = match caps.name("sign").map(|m| m.as_str()) {
        Some("-") => "-",
        _ => "",
    };
    let int_digits: String = caps
        .name("int")
        .map(|m| m.as_str())
        .unwrap_or("")
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    let frac_digits: String = caps
        .name("frac")
        .map(|m| m.as_str())
        .unwrap_or("")
        .chars()
        .filter(char::is_ascii_digit)
        .collect();

    let (int_digits, frac_digits) = shift_left(&int_digits, &frac_digits, compiled.shift);

    let mut out = String::new();
    out.push_str(sign);
    out.push_str(if int_digits.is_empty() { "0" } else { &int_digits });
    if !frac_digits.is_empty() {
        out.push('.');
        out.push_str(&frac_digits);
    }
    if let Some(exp) = caps.name("exp") {
        out.push('e');
        if caps.name("esign").map(|m| m.as_str()) == Some("-") {
            out.push('-');
        }
        out.push_str(exp.as_str());
    }
    Ok(out)
}

/// Moves the decimal point `shift` digits to the left without touching
/// floating point, preserving every matched digit.
fn shift_left(int_digits: &str, frac_digits: &str, shift: usize) -> (String, String) {
    if shift == 0 {
        return (int_digits.to_string(), frac_digits.to_string());
    }
    let digits: String = format!("{int_digits}{frac_digits}");
    let point = int_digits.len() as isize - shift as isize;
    if point <= 0 {
        let mut frac = String::new();
        for _ in 0..(-point) {
            frac.push('0');
        }
        frac.push_str(&digits);
        ("0".to_string(), frac)
    } else {
        let point = point as usize;
        (digits[..point].to_string(), digits[point..].to_string())
    }
}

/// Number parsing without a pattern: the XSD numeric lexical space with
/// optional groupChar stripping and decimalChar substitution.
fn parse_unpatterned(format: &NumberFormat, value: &str) -> Result<String> {
    if matches!(value, "NaN" | "INF" | "-INF") {
        return Ok(value.to_string());
    }
    let mut out = String::with_capacity(value.len());
    let mut prev_group = false;
    let mut after_exponent = false;
    let mut seen_decimal = false;
    let mut seen_digit = false;
    for (idx, ch) in value.chars().enumerate() {
        if ch == format.group_char && seen_digit && !seen_decimal && !after_exponent {
            if prev_group {
                return Err(Error::parse(format!(
                    "'{value}' contains repeated group separators"
                )));
            }
            prev_group = true;
            continue;
        }
        let was_group = prev_group;
        prev_group = false;
        if ch == format.decimal_char && !after_exponent {
            if seen_decimal || was_group {
                return Err(Error::parse(format!(
                    "'{value}' has a misplaced decimal separator"
                )));
            }
            seen_decimal = true;
            out.push('.');
            continue;
        }
        match ch {
            '0'..='9' => {
                seen_digit = true;
                out.push(ch);
            }
            '+' | '-' if idx == 0 => out.push(ch),
            '+' | '-' if out.ends_with('e') => out.push(ch),
            'e' | 'E' if seen_digit && !after_exponent => {
                after_exponent = true;
                out.push('e');
            }
            _ => {
                return Err(Error::parse(format!(
                    "'{value}' is not a valid number"
                )));
            }
        }
    }
    if prev_group || !seen_digit {
        return Err(Error::parse(format!("'{value}' is not a valid number")));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fmt(pattern: &str) -> NumberFormat {
        NumberFormat::with_pattern(pattern)
    }

    #[test]
    fn standard_grouped_pattern_canonicalizes() {
        assert_eq!(
            parse_number(&fmt("#,##0.00"), "1,234.50").unwrap(),
            "1234.50"
        );
    }

    #[test]
    fn missing_fraction_digit_is_a_parse_error() {
        assert!(parse_number(&fmt("#,##0.00"), "1234.5").is_err());
    }

    #[test]
    fn repeated_group_separators_are_a_parse_error() {
        assert!(parse_number(&fmt("#,##0"), "1,,234").is_err());
    }

    #[test]
    fn wrong_group_size_is_a_parse_error() {
        assert!(parse_number(&fmt("#,##0"), "12,34").is_err());
        assert_eq!(parse_number(&fmt("#,##0"), "1,234,567").unwrap(), "1234567");
    }

    #[test]
    fn minimum_integer_digits_enforced() {
        assert!(parse_number(&fmt("000"), "42").is_err());
        assert_eq!(parse_number(&fmt("000"), "042").unwrap(), "042");
    }

    #[test]
    fn percent_shifts_digits_exactly() {
        assert_eq!(parse_number(&fmt("#0%"), "25%").unwrap(), "0.25");
        assert_eq!(parse_number(&fmt("#0.0%"), "1.5%").unwrap(), "0.015");
        assert_eq!(parse_number(&fmt("#0‰"), "250‰").unwrap(), "0.250");
    }

    #[test]
    fn exponent_patterns() {
        assert_eq!(parse_number(&fmt("0.0E0"), "1.2E3").unwrap(), "1.2e3");
        assert_eq!(parse_number(&fmt("0.0E+0"), "1.2E+3").unwrap(), "1.2e3");
        assert!(parse_number(&fmt("0.0E+0"), "1.2E3").is_err());
        assert_eq!(parse_number(&fmt("0.0E0"), "1.2E-3").unwrap(), "1.2e-3");
    }

    #[test]
    fn signs_and_prefixes() {
        assert_eq!(parse_number(&fmt("#,##0.00"), "-1,234.50").unwrap(), "-1234.50");
        assert_eq!(parse_number(&fmt("$#,##0.00"), "$9.99").unwrap(), "9.99");
        assert!(parse_number(&fmt("$#,##0.00"), "9.99").is_err());
    }

    #[test]
    fn special_values_bypass_the_pattern() {
        assert_eq!(parse_number(&fmt("#,##0.00"), "NaN").unwrap(), "NaN");
        assert_eq!(parse_number(&fmt("#,##0.00"), "-INF").unwrap(), "-INF");
    }

    #[test]
    fn alternate_separator_characters() {
        let format = NumberFormat {
            pattern: Some("#,##0.00".into()),
            group_char: '.',
            decimal_char: ',',
        };
        assert_eq!(parse_number(&format, "1.234,50").unwrap(), "1234.50");
    }

    #[test]
    fn unpatterned_values_normalize() {
        let format = NumberFormat::default();
        assert_eq!(parse_number(&format, "1,234.5").unwrap(), "1234.5");
        assert_eq!(parse_number(&format, "-0.5e10").unwrap(), "-0.5e10");
        assert!(parse_number(&format, "1,,234").is_err());
        assert!(parse_number(&format, "abc").is_err());
    }

    #[test]
    fn compiled_patterns_are_cached() {
        let a = compile("#,##0.0#", ',', '.').unwrap();
        let b = compile("#,##0.0#", ',', '.').unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    proptest! {
        // Canonicalization is idempotent: re-parsing a canonical form with
        // the default format returns it unchanged.
        #[test]
        fn canonical_form_reparses_to_itself(int in 0u64..10_000_000, frac in 0u32..1000) {
            let raw = format!("{int}.{frac:03}");
            let canon = parse_number(&NumberFormat::default(), &raw).unwrap();
            let again = parse_number(&NumberFormat::default(), &canon).unwrap();
            prop_assert_eq!(canon, again);
        }
    }
}
