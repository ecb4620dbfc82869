//! UAX #35 date/time pattern parsing.
//!
//! Supports the recognized pattern family (`yyyy-MM-dd`, `d/M/yy`,
//! `HH:mm:ss.SSS`, `{date}T{time}`, ...) with optional trailing timezone
//! tokens `x|X|xx|XX|xxx|XXX`. Values parse through a regex built from the
//! pattern and canonicalize to the XSD lexical forms; chrono performs the
//! calendar validation so `13/1/2015` fails `M/d/yyyy` on the month field.

use chrono::{NaiveDate, NaiveTime};

use crate::error::{Error, Result};

/// Which temporal value a pattern (or datatype) describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalKind {
    Date,
    Time,
    DateTime,
}

#[derive(Debug, Clone, Copy, Default)]
struct Components {
    year: bool,
    month: bool,
    day: bool,
    hour: bool,
    minute: bool,
    second: bool,
    /// True when the timezone token was uppercase `X` (accepts `Z`).
    timezone_zulu: bool,
}

#[derive(Debug)]
pub struct DatePattern {
    regex: regex::Regex,
    components: Components,
    pub kind: TemporalKind,
}

/// Compiles a UAX #35 date/time pattern, rejecting tokens outside the
/// recognized family.
pub fn compile(pattern: &str) -> Result<DatePattern> {
    let mut re = String::from("^");
    let mut comp = Components::default();
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }
        match c {
            'y' => {
                comp.year = true;
                re.push_str(match run {
                    1 => r"(?P<y>\d{1,4})",
                    2 => r"(?P<y>\d{2})",
                    4 => r"(?P<y>\d{4})",
                    _ => {
                        return Err(Error::metadata(format!(
                            "unsupported year token 'y{{{run}}}' in date format '{pattern}'"
                        )));
                    }
                });
            }
            'M' => {
                comp.month = true;
                re.push_str(if run == 2 {
                    r"(?P<mo>\d{2})"
                } else if run == 1 {
                    r"(?P<mo>\d{1,2})"
                } else {
                    return Err(Error::metadata(format!(
                        "unsupported month token in date format '{pattern}'"
                    )));
                });
            }
            'd' => {
                comp.day = true;
                re.push_str(if run == 2 {
                    r"(?P<d>\d{2})"
                } else if run == 1 {
                    r"(?P<d>\d{1,2})"
                } else {
                    return Err(Error::metadata(format!(
                        "unsupported day token in date format '{pattern}'"
                    )));
                });
            }
            'H' => {
                comp.hour = true;
                re.push_str(if run == 2 {
                    r"(?P<h>\d{2})"
                } else {
                    return Err(Error::metadata(format!(
                        "unsupported hour token in date format '{pattern}'"
                    )));
                });
            }
            'm' => {
                comp.minute = true;
                re.push_str(if run == 2 {
                    r"(?P<mi>\d{2})"
                } else {
                    return Err(Error::metadata(format!(
                        "unsupported minute token in date format '{pattern}'"
                    )));
                });
            }
            's' => {
                comp.second = true;
                re.push_str(if run == 2 {
                    r"(?P<s>\d{2})"
                } else {
                    return Err(Error::metadata(format!(
                        "unsupported second token in date format '{pattern}'"
                    )));
                });
            }
            'S' => {
                re.push_str(r"(?P<f>\d{1,9})");
            }
            'x' | 'X' => {
                if i + run != chars.len() || run > 3 {
                    return Err(Error::metadata(format!(
                        "timezone token must terminate the date format '{pattern}'"
                    )));
                }
                comp.timezone_zulu = c == 'X';
                let offset = match run {
                    1 => r"[+-]\d{2}(?:\d{2})?",
                    2 => r"[+-]\d{2}\d{2}",
                    _ => r"[+-]\d{2}:\d{2}",
                };
                if comp.timezone_zulu {
                    re.push_str(&format!(r"(?P<tz>Z|{offset})"));
                } else {
                    re.push_str(&format!(r"(?P<tz>{offset})"));
                }
            }
            '-' | '/' | '.' | ':' | ' ' | 'T' | ',' => {
                for _ in 0..run {
                    re.push_str(&regex::escape(&c.to_string()));
                }
            }
            other => {
                return Err(Error::metadata(format!(
                    "unrecognized character '{other}' in date format '{pattern}'"
                )));
            }
        }
        i += run;
    }
    re.push('$');

    let has_date = comp.year || comp.month || comp.day;
    let has_time = comp.hour || comp.minute || comp.second;
    if has_date && !(comp.year && comp.month && comp.day) {
        return Err(Error::metadata(format!(
            "date format '{pattern}' must include year, month, and day"
        )));
    }
    if has_time && !(comp.hour && comp.minute) {
        return Err(Error::metadata(format!(
            "time format '{pattern}' must include hours and minutes"
        )));
    }
    let kind = match (has_date, has_time) {
        (true, true) => TemporalKind::DateTime,
        (true, false) => TemporalKind::Date,
        (false, true) => TemporalKind::Time,
        (false, false) => {
            return Err(Error::metadata(format!(
                "'{pattern}' is not a recognized date/time format"
            )));
        }
    };

    let regex = regex::Regex::new(&re)
        .map_err(|err| Error::metadata(format!("date format '{pattern}': {err}")))?;
    Ok(DatePattern {
        regex,
        components: comp,
        kind,
    })
}

impl DatePattern {
    /// Parses `value`, returning the canonical XSD lexical form.
    pub fn parse(&self, value: &str) -> Result<String> {
        let caps = self.regex.captures(value).ok_or_else(|| {
            Error::parse(format!("'{value}' does not match the date format"))
        })?;

        let date = if self.components.year {
            let year = expand_year(caps.name("y").unwrap().as_str())?;
            let month: u32 = caps.name("mo").unwrap().as_str().parse().unwrap();
            let day: u32 = caps.name("d").unwrap().as_str().parse().unwrap();
            let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
                Error::parse(format!("'{value}' is not a valid calendar date"))
            })?;
            Some(date)
        } else {
            None
        };

        let time = if self.components.hour {
            let hour: u32 = caps.name("h").unwrap().as_str().parse().unwrap();
            let minute: u32 = caps.name("mi").unwrap().as_str().parse().unwrap();
            let second: u32 = caps
                .name("s")
                .map(|m| m.as_str().parse().unwrap())
                .unwrap_or(0);
            NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| {
                Error::parse(format!("'{value}' is not a valid time of day"))
            })?;
            let fraction = caps
                .name("f")
                .map(|m| m.as_str().trim_end_matches('0').to_string())
                .filter(|f| !f.is_empty());
            Some((hour, minute, second, fraction))
        } else {
            None
        };

        let timezone = match caps.name("tz") {
            Some(m) => Some(canonical_timezone(m.as_str())?),
            None => None,
        };

        let mut out = String::new();
        if let Some(date) = date {
            out.push_str(&date.format("%Y-%m-%d").to_string());
        }
        if let Some((h, m, s, frac)) = time {
            if !out.is_empty() {
                out.push('T');
            }
            out.push_str(&format!("{h:02}:{m:02}:{s:02}"));
            if let Some(frac) = frac {
                out.push('.');
                out.push_str(&frac);
            }
        }
        if let Some(tz) = timezone {
            out.push_str(&tz);
        }
        Ok(out)
    }
}

/// Applies the short-year windowing rule: 0–69 land in the 2000s, 70–99 in
/// the 1900s, 100–999 in the 2100–2999 range.
fn expand_year(digits: &str) -> Result<i32> {
    let value: i32 = digits
        .parse()
        .map_err(|_| Error::parse(format!("'{digits}' is not a valid year")))?;
    Ok(if digits.len() >= 4 {
        value
    } else if value < 70 {
        value + 2000
    } else if value < 100 {
        value + 1900
    } else {
        value + 2000
    })
}

/// Normalizes a matched timezone to `Z` or `±HH:MM`.
fn canonical_timezone(tz: &str) -> Result<String> {
    if tz == "Z" {
        return Ok("Z".to_string());
    }
    let sign = &tz[..1];
    let digits: String = tz[1..].chars().filter(char::is_ascii_digit).collect();
    let (hours, minutes) = match digits.len() {
        2 => (digits.clone(), "00".to_string()),
        4 => (digits[..2].to_string(), digits[2..].to_string()),
        _ => return Err(Error::parse(format!("'{tz}' is not a valid timezone"))),
    };
    let h: u32 = hours.parse().unwrap();
    let m: u32 = minutes.parse().unwrap();
    if h > 14 || m > 59 {
        return Err(Error::parse(format!("'{tz}' is out of timezone range")));
    }
    if h == 0 && m == 0 {
        return Ok("Z".to_string());
    }
    Ok(format!("{sign}{hours}:{minutes}"))
}

/// Convenience entry: compile and parse in one step (the datatype layer
/// compiles once per column, tests use this directly).
pub fn parse_with_pattern(pattern: &str, value: &str) -> Result<String> {
    compile(pattern)?.parse(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_pattern_canonicalizes() {
        assert_eq!(parse_with_pattern("M/d/yyyy", "1/5/2015").unwrap(), "2015-01-05");
    }

    #[test]
    fn invalid_month_is_a_parse_error() {
        assert!(parse_with_pattern("M/d/yyyy", "13/1/2015").is_err());
    }

    #[test]
    fn compact_date_pattern() {
        assert_eq!(parse_with_pattern("yyyyMMdd", "20150105").unwrap(), "2015-01-05");
        assert!(parse_with_pattern("yyyyMMdd", "2015015").is_err());
    }

    #[test]
    fn two_digit_years_window() {
        assert_eq!(parse_with_pattern("d-M-yy", "5-1-15").unwrap(), "2015-01-05");
        assert_eq!(parse_with_pattern("d-M-yy", "5-1-83").unwrap(), "1983-01-05");
        assert_eq!(parse_with_pattern("d-M-y", "5-1-369").unwrap(), "2369-01-05");
        assert_eq!(parse_with_pattern("d-M-y", "5-1-1983").unwrap(), "1983-01-05");
    }

    #[test]
    fn dotted_variant() {
        assert_eq!(parse_with_pattern("dd.MM.yyyy", "05.01.2015").unwrap(), "2015-01-05");
    }

    #[test]
    fn times_with_and_without_seconds() {
        assert_eq!(parse_with_pattern("HH:mm:ss", "15:02:37").unwrap(), "15:02:37");
        assert_eq!(parse_with_pattern("HH:mm", "15:02").unwrap(), "15:02:00");
        assert_eq!(parse_with_pattern("HHmmss", "150237").unwrap(), "15:02:37");
        assert!(parse_with_pattern("HH:mm:ss", "25:02:37").is_err());
    }

    #[test]
    fn fractional_seconds_trim_trailing_zeros() {
        assert_eq!(
            parse_with_pattern("HH:mm:ss.SSS", "15:02:37.450").unwrap(),
            "15:02:37.45"
        );
    }

    #[test]
    fn datetime_with_space_separator() {
        assert_eq!(
            parse_with_pattern("M/d/yyyy HH:mm", "1/5/2015 15:02").unwrap(),
            "2015-01-05T15:02:00"
        );
    }

    #[test]
    fn timezone_tokens() {
        assert_eq!(
            parse_with_pattern("yyyy-MM-ddTHH:mm:ssXXX", "2015-01-05T15:02:37Z").unwrap(),
            "2015-01-05T15:02:37Z"
        );
        assert_eq!(
            parse_with_pattern("HH:mm:ssXXX", "15:02:37-08:00").unwrap(),
            "15:02:37-08:00"
        );
        assert_eq!(
            parse_with_pattern("HH:mm:ssX", "15:02:37+05").unwrap(),
            "15:02:37+05:00"
        );
        assert_eq!(
            parse_with_pattern("HH:mm:ssxx", "15:02:37+0000").unwrap(),
            "15:02:37Z"
        );
        // lowercase x never matches Z
        assert!(parse_with_pattern("HH:mm:ssxxx", "15:02:37Z").is_err());
    }

    #[test]
    fn unrecognized_tokens_are_metadata_errors() {
        assert!(matches!(compile("yyyy-MM-dd G"), Err(Error::Metadata(_))));
        assert!(matches!(compile("HH:mm:ssXx"), Err(Error::Metadata(_))));
        assert!(matches!(compile("yyyy-MM"), Err(Error::Metadata(_))));
    }
}
