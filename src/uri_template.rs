//! RFC 6570 URI template expansion, levels 1 through 3.
//!
//! Templates drive the `aboutUrl`/`propertyUrl`/`valueUrl` annotations:
//! a variable whose runtime value is unset contributes nothing to the
//! expansion, which is what decides whether a cell yields triples.
//!
//! Level 4 value modifiers (`:N` prefix, `*` explode) are outside the
//! supported profile and are rejected, so templates can be vetted once at
//! metadata-validation time via [`validate`].

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::error::{Error, Result};

/// Characters escaped by simple expansion: everything but unreserved.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Characters escaped by reserved expansion (`+` and `#` operators):
/// unreserved plus the reserved set pass through untouched.
const RESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b':')
    .remove(b'/')
    .remove(b'?')
    .remove(b'#')
    .remove(b'[')
    .remove(b']')
    .remove(b'@')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b'%');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Operator {
    first: &'static str,
    separator: &'static str,
    named: bool,
    /// Named form for an empty value: `name=` (form-style) vs bare `name`.
    empty_equals: bool,
    reserved: bool,
}

fn operator_for(prefix: Option<char>) -> Option<Operator> {
    let op = match prefix {
        None => Operator {
            first: "",
            separator: ",",
            named: false,
            empty_equals: false,
            reserved: false,
        },
        Some('+') => Operator {
            first: "",
            separator: ",",
            named: false,
            empty_equals: false,
            reserved: true,
        },
        Some('#') => Operator {
            first: "#",
            separator: ",",
            named: false,
            empty_equals: false,
            reserved: true,
        },
        Some('.') => Operator {
            first: ".",
            separator: ".",
            named: false,
            empty_equals: false,
            reserved: false,
        },
        Some('/') => Operator {
            first: "/",
            separator: "/",
            named: false,
            empty_equals: false,
            reserved: false,
        },
        Some(';') => Operator {
            first: ";",
            separator: ";",
            named: true,
            empty_equals: false,
            reserved: false,
        },
        Some('?') => Operator {
            first: "?",
            separator: "&",
            named: true,
            empty_equals: true,
            reserved: false,
        },
        Some('&') => Operator {
            first: "&",
            separator: "&",
            named: true,
            empty_equals: true,
            reserved: false,
        },
        _ => return None,
    };
    Some(op)
}

fn is_varname(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '%' | '-')
        })
}

/// Splits an expression body into its operator and variable list, checking
/// the supported profile.
fn parse_expression(body: &str) -> Result<(Operator, Vec<&str>)> {
    if body.is_empty() {
        return Err(Error::metadata("empty URI template expression"));
    }
    let mut chars = body.chars();
    let head = chars.next().unwrap();
    let (op, vars_str) = if head.is_ascii_alphanumeric() || head == '_' || head == '%' {
        (operator_for(None).unwrap(), body)
    } else {
        let op = operator_for(Some(head)).ok_or_else(|| {
            Error::metadata(format!("unsupported URI template operator '{head}'"))
        })?;
        (op, chars.as_str())
    };

    let mut names = Vec::new();
    for spec in vars_str.split(',') {
        if spec.contains(':') || spec.ends_with('*') {
            return Err(Error::metadata(format!(
                "URI template value modifiers are not supported (in '{{{body}}}')"
            )));
        }
        if !is_varname(spec) {
            return Err(Error::metadata(format!(
                "invalid URI template variable name '{spec}'"
            )));
        }
        names.push(spec);
    }
    Ok((op, names))
}

fn encode(value: &str, reserved: bool) -> String {
    let set = if reserved { RESERVED } else { UNRESERVED };
    utf8_percent_encode(value, set).to_string()
}

/// Checks that every expression in `template` is well-formed and within
/// levels 1–3.
pub fn validate(template: &str) -> Result<()> {
    for_each_expression(template, |_| Ok(()))
}

fn for_each_expression(template: &str, mut f: impl FnMut(&str) -> Result<()>) -> Result<()> {
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            Error::metadata(format!("unterminated expression in URI template '{template}'"))
        })?;
        parse_expression(&after[..close])?;
        f(&after[..close])?;
        rest = &after[close + 1..];
    }
    Ok(())
}

/// Expands `template`, resolving each variable through `lookup`.
///
/// `lookup` returns `None` for unset (null) variables, which drop out of
/// the expansion along with any named-operator scaffolding they would have
/// carried.
pub fn expand<F>(template: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            Error::metadata(format!("unterminated expression in URI template '{template}'"))
        })?;
        let (op, names) = parse_expression(&after[..close])?;

        let mut rendered = Vec::new();
        for name in names {
            let Some(value) = lookup(name) else { continue };
            if op.named {
                if value.is_empty() {
                    rendered.push(if op.empty_equals {
                        format!("{name}=")
                    } else {
                        name.to_string()
                    });
                } else {
                    rendered.push(format!("{name}={}", encode(&value, op.reserved)));
                }
            } else {
                rendered.push(encode(&value, op.reserved));
            }
        }
        if !rendered.is_empty() {
            out.push_str(op.first);
            out.push_str(&rendered.join(op.separator));
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
