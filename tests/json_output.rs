//! Canonical-JSON shape coverage: typed values, language maps, list
//! cells, notes, and minimal mode.

mod common;

use common::SiteBuilder;
use csvw_tabular::{Options, Reader};
use serde_json::json;

fn reader(csv: &str, metadata: serde_json::Value, minimal: bool) -> Reader {
    let fetcher = SiteBuilder::new()
        .resource("http://example.org/data.csv", csv)
        .resource(
            "http://example.org/data.csv-metadata.json",
            &metadata.to_string(),
        )
        .build();
    Reader::open_with_fetcher(
        "http://example.org/data.csv",
        Options {
            minimal,
            ..Options::default()
        },
        fetcher,
    )
    .unwrap()
}

#[test]
fn typed_cells_become_native_json() {
    let mut reader = reader(
        "id,score,ok\n7,1.5,true\n",
        json!({
            "url": "data.csv",
            "tableSchema": {"columns": [
                {"name": "id", "titles": "id", "datatype": "integer"},
                {"name": "score", "titles": "score", "datatype": "double"},
                {"name": "ok", "titles": "ok", "datatype": "boolean"}
            ]}
        }),
        false,
    );
    let value = reader.to_json().unwrap();
    let subject = &value["tables"][0]["row"][0]["describes"][0];
    assert_eq!(subject["id"], json!(7));
    assert_eq!(subject["score"], json!(1.5));
    assert_eq!(subject["ok"], json!(true));
}

#[test]
fn language_tagged_strings_use_value_objects() {
    let mut reader = reader(
        "name\nStra\u{df}e\n",
        json!({
            "url": "data.csv",
            "lang": "de",
            "tableSchema": {"columns": [{"name": "name", "titles": "name"}]}
        }),
        false,
    );
    let value = reader.to_json().unwrap();
    assert_eq!(
        value["tables"][0]["row"][0]["describes"][0]["name"],
        json!({"@value": "Stra\u{df}e", "@language": "de"})
    );
}

#[test]
fn separator_cells_become_arrays() {
    let mut reader = reader(
        "tags\n\"red;green;blue\"\n",
        json!({
            "url": "data.csv",
            "tableSchema": {"columns": [
                {"name": "tags", "titles": "tags", "separator": ";"}
            ]}
        }),
        false,
    );
    let value = reader.to_json().unwrap();
    assert_eq!(
        value["tables"][0]["row"][0]["describes"][0]["tags"],
        json!(["red", "green", "blue"])
    );
}

#[test]
fn minimal_mode_flattens_to_describes() {
    let mut reader = reader(
        "a\n1\n2\n",
        json!({
            "url": "data.csv",
            "tableSchema": {"columns": [{"name": "a", "titles": "a"}]}
        }),
        true,
    );
    let value = reader.to_json().unwrap();
    let items = value.as_array().expect("flat array");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["a"], json!("1"));
    assert_eq!(items[1]["a"], json!("2"));
}

#[test]
fn comments_and_metadata_notes_surface_on_the_table() {
    let mut reader = reader(
        "# produced nightly\na\n1\n",
        json!({
            "url": "data.csv",
            "notes": ["hand-checked"],
            "dialect": {"commentPrefix": "#"},
            "tableSchema": {"columns": [{"name": "a", "titles": "a"}]}
        }),
        false,
    );
    let value = reader.to_json().unwrap();
    let notes = value["tables"][0]["notes"].as_array().unwrap();
    assert!(notes.contains(&json!("hand-checked")));
    assert!(notes.contains(&json!("produced nightly")));
}

#[test]
fn common_properties_compact_against_the_context() {
    let mut reader = reader(
        "a\n1\n",
        json!({
            "url": "data.csv",
            "dc:title": "A tiny table",
            "tableSchema": {"columns": [{"name": "a", "titles": "a"}]}
        }),
        false,
    );
    let value = reader.to_json().unwrap();
    assert_eq!(value["tables"][0]["dc:title"], json!("A tiny table"));
}
