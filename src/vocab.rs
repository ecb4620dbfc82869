//! Namespace constants, the CSVW context prefix table, and common-property
//! IRI expansion.
//!
//! The CSVW recommendation layers the RDFa initial context on top of its own
//! vocabulary; common properties on metadata objects are keyed either by an
//! absolute IRI or by a prefixed name resolvable against that table. This
//! module is the only place prefix knowledge lives.

use std::sync::OnceLock;

use regex::Regex;

pub const CSVW: &str = "http://www.w3.org/ns/csvw#";
pub const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const RDFS: &str = "http://www.w3.org/2000/01/rdf-schema#";
pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
pub const PROV: &str = "http://www.w3.org/ns/prov#";

/// The CSVW namespace term `term` as an absolute IRI.
pub fn csvw(term: &str) -> String {
    format!("{CSVW}{term}")
}

pub fn rdf(term: &str) -> String {
    format!("{RDF}{term}")
}

pub fn xsd(term: &str) -> String {
    format!("{XSD}{term}")
}

pub fn prov(term: &str) -> String {
    format!("{PROV}{term}")
}

/// Prefixes defined by the CSVW context (the CSVW vocabulary itself plus
/// the RDFa 1.1 initial context subset that metadata documents use in
/// practice).
const PREFIXES: &[(&str, &str)] = &[
    ("as", "https://www.w3.org/ns/activitystreams#"),
    ("cc", "http://creativecommons.org/ns#"),
    ("csvw", CSVW),
    ("ctag", "http://commontag.org/ns#"),
    ("dc", "http://purl.org/dc/terms/"),
    ("dc11", "http://purl.org/dc/elements/1.1/"),
    ("dcat", "http://www.w3.org/ns/dcat#"),
    ("dcterms", "http://purl.org/dc/terms/"),
    ("dqv", "http://www.w3.org/ns/dqv#"),
    ("duv", "https://www.w3.org/ns/duv#"),
    ("foaf", "http://xmlns.com/foaf/0.1/"),
    ("gr", "http://purl.org/goodrelations/v1#"),
    ("grddl", "http://www.w3.org/2003/g/data-view#"),
    ("ldp", "http://www.w3.org/ns/ldp#"),
    ("ma", "http://www.w3.org/ns/ma-ont#"),
    ("oa", "http://www.w3.org/ns/oa#"),
    ("og", "http://ogp.me/ns#"),
    ("org", "http://www.w3.org/ns/org#"),
    ("owl", "http://www.w3.org/2002/07/owl#"),
    ("prov", PROV),
    ("qb", "http://purl.org/linked-data/cube#"),
    ("rdf", RDF),
    ("rdfa", "http://www.w3.org/ns/rdfa#"),
    ("rdfs", RDFS),
    ("rev", "http://purl.org/stuff/rev#"),
    ("rif", "http://www.w3.org/2007/rif#"),
    ("rr", "http://www.w3.org/ns/r2rml#"),
    ("schema", "http://schema.org/"),
    ("sd", "http://www.w3.org/ns/sparql-service-description#"),
    ("sioc", "http://rdfs.org/sioc/ns#"),
    ("skos", "http://www.w3.org/2004/02/skos/core#"),
    ("skosxl", "http://www.w3.org/2008/05/skos-xl#"),
    ("time", "http://www.w3.org/2006/time#"),
    ("vcard", "http://www.w3.org/2006/vcard/ns#"),
    ("void", "http://rdfs.org/ns/void#"),
    ("wdr", "http://www.w3.org/2007/05/powder#"),
    ("wdrs", "http://www.w3.org/2007/05/powder-s#"),
    ("xhv", "http://www.w3.org/1999/xhtml/vocab#"),
    ("xml", "http://www.w3.org/XML/1998/namespace"),
    ("xsd", XSD),
];

/// Resolves a context prefix to its namespace IRI.
pub fn prefix_iri(prefix: &str) -> Option<&'static str> {
    PREFIXES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, iri)| *iri)
}

/// Compacts an absolute IRI to a prefixed name when a context prefix
/// covers it; used by the JSON emitter for key compaction.
pub fn compact_iri(iri: &str) -> Option<String> {
    for (prefix, ns) in PREFIXES {
        if let Some(local) = iri.strip_prefix(ns)
            && !local.is_empty()
            && !local.contains('/')
            && !local.contains('#')
        {
            return Some(format!("{prefix}:{local}"));
        }
    }
    None
}

/// Expands a common-property key to an absolute IRI.
///
/// Accepts absolute IRIs as-is and prefixed names against the context
/// table. Bare terms (no colon) are not valid common-property keys and
/// yield `None`.
pub fn expand_property_key(key: &str) -> Option<String> {
    if let Some((prefix, local)) = key.split_once(':') {
        if let Some(ns) = prefix_iri(prefix) {
            return Some(format!("{ns}{local}"));
        }
        // A scheme-looking key ("http", "urn", "file", ...) is an absolute IRI.
        if local.starts_with("//") || prefix.len() > 1 && !local.is_empty() {
            return Some(key.to_string());
        }
    }
    None
}

/// Syntactic BCP47 well-formedness check (not registry validation).
pub fn is_valid_language_tag(tag: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z]{1,8}(-[A-Za-z0-9]{1,8})*$").unwrap()
    });
    re.is_match(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_names_expand_against_the_context() {
        assert_eq!(
            expand_property_key("dc:title").as_deref(),
            Some("http://purl.org/dc/terms/title")
        );
        assert_eq!(
            expand_property_key("schema:url").as_deref(),
            Some("http://schema.org/url")
        );
    }

    #[test]
    fn absolute_iris_pass_through() {
        assert_eq!(
            expand_property_key("http://example.org/p").as_deref(),
            Some("http://example.org/p")
        );
    }

    #[test]
    fn bare_terms_are_rejected() {
        assert_eq!(expand_property_key("title"), None);
    }

    #[test]
    fn compaction_prefers_known_prefixes() {
        assert_eq!(
            compact_iri("http://www.w3.org/ns/csvw#Table").as_deref(),
            Some("csvw:Table")
        );
        assert_eq!(compact_iri("http://example.org/custom#p"), None);
    }

    #[test]
    fn language_tags_are_checked_syntactically() {
        assert!(is_valid_language_tag("en"));
        assert!(is_valid_language_tag("en-GB"));
        assert!(is_valid_language_tag("zh-Hant-TW"));
        assert!(!is_valid_language_tag(""));
        assert!(!is_valid_language_tag("en_GB"));
        assert!(!is_valid_language_tag("toolongsubtag123"));
    }
}
