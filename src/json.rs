//! Canonical JSON emission: the "tabular data as JSON" shape.
//!
//! Standard mode produces `{"tables": [{"url", "row": [{"url", "rownum",
//! "titles"?, "describes": [...]}]}]}` with common properties and notes on
//! their enclosing objects; minimal mode flattens to the `describes`
//! objects alone. Predicates compact against the CSVW context where
//! possible, and a cell whose column uses the default property URI keeps
//! its plain column name as the key.

use serde_json::{Map, Value, json};

use crate::{
    datatype::TypedValue,
    metadata::CommonProps,
    row::{CompiledColumn, Row},
    vocab,
};

/// Converts one typed cell value into its JSON form.
fn value_json(value: &TypedValue, lang: Option<&str>) -> Value {
    let iri = value.datatype_iri.as_str();
    let xsd_name = iri.strip_prefix(vocab::XSD);
    let is_integer = matches!(
        xsd_name,
        Some(
            "integer"
                | "long"
                | "int"
                | "short"
                | "byte"
                | "nonNegativeInteger"
                | "nonPositiveInteger"
                | "negativeInteger"
                | "positiveInteger"
                | "unsignedLong"
                | "unsignedInt"
                | "unsignedShort"
                | "unsignedByte"
        )
    );
    if is_integer && let Ok(n) = value.lexical.parse::<i64>() {
        return json!(n);
    }
    if matches!(xsd_name, Some("decimal" | "double" | "float"))
        && let Ok(n) = value.lexical.parse::<f64>()
        && n.is_finite()
    {
        return json!(n);
    }
    if xsd_name == Some("boolean") {
        return json!(value.lexical == "true");
    }
    if iri == vocab::csvw("JSON")
        && let Ok(parsed) = serde_json::from_str::<Value>(&value.lexical)
    {
        return parsed;
    }
    if iri == vocab::xsd("string")
        && let Some(lang) = lang
        && lang != "und"
    {
        return json!({"@value": value.lexical, "@language": lang});
    }
    json!(value.lexical)
}

/// The JSON key for a cell: the bare column name under the default
/// property URI, otherwise the compacted custom property.
fn cell_key(column: &CompiledColumn, property: &str) -> String {
    if column.property_url.is_none() {
        return column.name.clone();
    }
    vocab::compact_iri(property).unwrap_or_else(|| property.to_string())
}

fn insert_multi(target: &mut Map<String, Value>, key: String, value: Value) {
    match target.get_mut(&key) {
        None => {
            target.insert(key, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let prior = existing.take();
            *existing = Value::Array(vec![prior, value]);
        }
    }
}

/// The `describes` array for one row: one object per distinct subject.
pub fn row_describes(columns: &[CompiledColumn], row: &Row) -> Vec<Value> {
    let mut subjects: Vec<(Option<String>, Map<String, Value>)> = Vec::new();

    for cell in &row.cells {
        let column = &columns[cell.column];
        if column.suppress_output {
            continue;
        }
        let Some(property) = &cell.property else {
            continue;
        };
        let entry = match subjects.iter_mut().find(|(about, _)| *about == cell.about) {
            Some((_, map)) => map,
            None => {
                let mut map = Map::new();
                if let Some(about) = &cell.about {
                    map.insert("@id".to_string(), json!(about));
                }
                subjects.push((cell.about.clone(), map));
                &mut subjects.last_mut().expect("just pushed").1
            }
        };

        let key = cell_key(column, property);
        if let Some(value_iri) = &cell.value_iri {
            insert_multi(entry, key, json!(value_iri));
            continue;
        }
        if cell.values.is_empty() {
            continue;
        }
        if !cell.valid {
            // Lenient mode omits undecodable values from JSON output.
            continue;
        }
        if cell.values.len() > 1 {
            let items: Vec<Value> = cell
                .values
                .iter()
                .map(|v| value_json(v, column.lang.as_deref()))
                .collect();
            insert_multi(entry, key, Value::Array(items));
        } else {
            insert_multi(
                entry,
                key,
                value_json(&cell.values[0], column.lang.as_deref()),
            );
        }
    }
    subjects.into_iter().map(|(_, map)| Value::Object(map)).collect()
}

/// The standard-mode row object.
pub fn row_value(table_url: &str, columns: &[CompiledColumn], row: &Row) -> Value {
    let mut map = Map::new();
    map.insert(
        "url".to_string(),
        json!(format!("{table_url}#row={}", row.source_row)),
    );
    map.insert("rownum".to_string(), json!(row.number));
    if !row.titles.is_empty() {
        if row.titles.len() == 1 {
            map.insert("titles".to_string(), json!(row.titles[0]));
        } else {
            map.insert("titles".to_string(), json!(row.titles));
        }
    }
    map.insert(
        "describes".to_string(),
        Value::Array(row_describes(columns, row)),
    );
    Value::Object(map)
}

/// Compacted common properties appended onto a JSON object.
pub fn append_common(target: &mut Map<String, Value>, common: &CommonProps) {
    for (iri, value) in common {
        let key = vocab::compact_iri(iri).unwrap_or_else(|| iri.clone());
        insert_multi(target, key, value.clone());
    }
}

/// Notes merged from metadata and streamed comments (comments already
/// captured as notes are not repeated).
pub fn append_notes(target: &mut Map<String, Value>, notes: &[Value], comments: &[String]) {
    if notes.is_empty() && comments.is_empty() {
        return;
    }
    let mut all: Vec<Value> = notes.to_vec();
    for comment in comments {
        if !notes.iter().any(|note| note.as_str() == Some(comment)) {
            all.push(json!(comment));
        }
    }
    target.insert("notes".to_string(), Value::Array(all));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Cell;

    fn column(name: &str) -> CompiledColumn {
        CompiledColumn {
            name: name.to_string(),
            titles: Default::default(),
            is_virtual: false,
            suppress_output: false,
            required: false,
            ordered: false,
            lang: None,
            separator: None,
            null_values: vec![String::new()],
            default: None,
            about_url: None,
            property_url: None,
            value_url: None,
            datatype: crate::datatype::default_datatype(),
        }
    }

    fn typed(lexical: &str, datatype: &str) -> TypedValue {
        TypedValue {
            lexical: lexical.to_string(),
            datatype_iri: vocab::xsd(datatype),
            comparable: None,
        }
    }

    fn cell(index: usize, property: &str, value: TypedValue) -> Cell {
        Cell {
            column: index,
            raw: value.lexical.clone(),
            values: vec![value],
            valid: true,
            about: None,
            property: Some(property.to_string()),
            value_iri: None,
        }
    }

    #[test]
    fn native_json_types_for_typed_values() {
        assert_eq!(value_json(&typed("42", "integer"), None), json!(42));
        assert_eq!(value_json(&typed("1.5", "double"), None), json!(1.5));
        assert_eq!(value_json(&typed("true", "boolean"), None), json!(true));
        assert_eq!(value_json(&typed("x", "string"), None), json!("x"));
        assert_eq!(
            value_json(&typed("chat", "string"), Some("fr")),
            json!({"@value": "chat", "@language": "fr"})
        );
        // non-finite doubles stay lexical
        assert_eq!(value_json(&typed("INF", "double"), None), json!("INF"));
    }

    #[test]
    fn describes_groups_by_subject_and_keys_by_name() {
        let columns = vec![column("GID"), column("Species")];
        let row = Row {
            number: 1,
            source_row: 2,
            titles: vec![],
            cells: vec![
                cell(0, "http://example.org/t.csv#GID", typed("1", "string")),
                cell(1, "http://example.org/t.csv#Species", typed("Celtis", "string")),
            ],
        };
        let describes = row_describes(&columns, &row);
        assert_eq!(describes.len(), 1);
        assert_eq!(describes[0]["GID"], json!("1"));
        assert_eq!(describes[0]["Species"], json!("Celtis"));
    }

    #[test]
    fn explicit_about_url_becomes_at_id() {
        let columns = vec![column("a")];
        let mut c = cell(0, "http://example.org/p", typed("v", "string"));
        c.about = Some("http://example.org/item/1".to_string());
        let row = Row {
            number: 1,
            source_row: 2,
            titles: vec![],
            cells: vec![c],
        };
        let describes = row_describes(&columns, &row);
        assert_eq!(describes[0]["@id"], json!("http://example.org/item/1"));
    }

    #[test]
    fn repeated_properties_become_arrays() {
        let columns = vec![column("a"), column("a2")];
        let row = Row {
            number: 1,
            source_row: 2,
            titles: vec![],
            cells: vec![
                cell(0, "http://example.org/p", typed("one", "string")),
                {
                    let mut c = cell(1, "http://example.org/p", typed("two", "string"));
                    c.column = 1;
                    c
                },
            ],
        };
        // same compacted key from two columns with custom property URLs
        let mut columns = columns;
        columns[0].property_url = Some("http://example.org/p".into());
        columns[1].property_url = Some("http://example.org/p".into());
        let describes = row_describes(&columns, &row);
        assert_eq!(
            describes[0]["http://example.org/p"],
            json!(["one", "two"])
        );
    }

    #[test]
    fn row_value_shape() {
        let columns = vec![column("a")];
        let row = Row {
            number: 3,
            source_row: 5,
            titles: vec!["Ash".into()],
            cells: vec![cell(0, "http://example.org/t.csv#a", typed("v", "string"))],
        };
        let value = row_value("http://example.org/t.csv", &columns, &row);
        assert_eq!(value["url"], json!("http://example.org/t.csv#row=5"));
        assert_eq!(value["rownum"], json!(3));
        assert_eq!(value["titles"], json!("Ash"));
        assert!(value["describes"].is_array());
    }

    #[test]
    fn invalid_cells_are_omitted() {
        let columns = vec![column("n")];
        let mut c = cell(0, "http://example.org/t.csv#n", typed("nope", "string"));
        c.valid = false;
        let row = Row {
            number: 1,
            source_row: 2,
            titles: vec![],
            cells: vec![c],
        };
        let describes = row_describes(&columns, &row);
        assert_eq!(describes[0].as_object().unwrap().len(), 0);
    }
}
