//! RDF term and triple model.
//!
//! A deliberately small, owned representation: IRIs and blank-node labels
//! are plain strings, literals carry an optional datatype IRI or language
//! tag. `Display` renders N-Triples so emitted statements serialize
//! deterministically (modulo blank-node labels, which are sequential per
//! reader).

use std::fmt;

use crate::vocab;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Iri(String),
    Blank(String),
    Literal(Literal),
}

impl Term {
    pub fn iri(value: impl Into<String>) -> Self {
        Term::Iri(value.into())
    }

    pub fn blank(label: impl Into<String>) -> Self {
        Term::Blank(label.into())
    }

    pub fn literal(value: Literal) -> Self {
        Term::Literal(value)
    }

    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    pub lexical: String,
    pub datatype: Option<String>,
    pub language: Option<String>,
}

impl Literal {
    /// A plain literal (implicitly `xsd:string`).
    pub fn string(lexical: impl Into<String>) -> Self {
        Literal {
            lexical: lexical.into(),
            datatype: None,
            language: None,
        }
    }

    pub fn typed(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        let datatype = datatype.into();
        let datatype = if datatype == vocab::xsd("string") {
            None
        } else {
            Some(datatype)
        };
        Literal {
            lexical: lexical.into(),
            datatype,
            language: None,
        }
    }

    pub fn language_tagged(lexical: impl Into<String>, language: impl Into<String>) -> Self {
        Literal {
            lexical: lexical.into(),
            datatype: None,
            language: Some(language.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Triple {
            subject,
            predicate,
            object,
        }
    }
}

fn escape_literal(value: &str, out: &mut fmt::Formatter<'_>) -> fmt::Result {
    for ch in value.chars() {
        match ch {
            '\\' => write!(out, "\\\\")?,
            '"' => write!(out, "\\\"")?,
            '\n' => write!(out, "\\n")?,
            '\r' => write!(out, "\\r")?,
            '\t' => write!(out, "\\t")?,
            other => write!(out, "{other}")?,
        }
    }
    Ok(())
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::Blank(label) => write!(f, "_:{label}"),
            Term::Literal(literal) => {
                write!(f, "\"")?;
                escape_literal(&literal.lexical, f)?;
                write!(f, "\"")?;
                if let Some(lang) = &literal.language {
                    write!(f, "@{lang}")
                } else if let Some(dt) = &literal.datatype {
                    write!(f, "^^<{dt}>")
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ntriples_rendering_escapes_and_tags() {
        let t = Triple::new(
            Term::blank("r0"),
            Term::iri("http://example.org/name"),
            Term::Literal(Literal::language_tagged("caf\u{e9} \"x\"\n", "fr")),
        );
        assert_eq!(
            t.to_string(),
            "_:r0 <http://example.org/name> \"caf\u{e9} \\\"x\\\"\\n\"@fr ."
        );
    }

    #[test]
    fn string_datatype_is_implicit() {
        let lit = Literal::typed("v", "http://www.w3.org/2001/XMLSchema#string");
        assert_eq!(lit.datatype, None);
        assert_eq!(Term::Literal(lit).to_string(), "\"v\"");
    }

    #[test]
    fn typed_literal_renders_datatype() {
        let lit = Literal::typed("42", "http://www.w3.org/2001/XMLSchema#integer");
        assert_eq!(
            Term::Literal(lit).to_string(),
            "\"42\"^^<http://www.w3.org/2001/XMLSchema#integer>"
        );
    }
}
