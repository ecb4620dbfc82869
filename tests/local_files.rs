//! Reading straight from the filesystem: local paths become `file:` URLs
//! and sibling `-metadata.json` documents are discovered on disk.

mod common;

use common::TestWorkspace;
use csvw_tabular::{Options, Reader};
use serde_json::json;

#[test]
fn local_csv_with_sibling_metadata() {
    let workspace = TestWorkspace::new();
    let csv_path = workspace.write("trees.csv", "GID,Species\n1,Celtis australis\n2,Liquidambar\n");
    workspace.write(
        "trees.csv-metadata.json",
        &json!({
            "url": "trees.csv",
            "tableSchema": {"columns": [
                {"name": "GID", "titles": "GID", "datatype": "integer"},
                {"name": "Species", "titles": "Species"}
            ]}
        })
        .to_string(),
    );

    let mut reader = Reader::open(
        csv_path.to_str().unwrap(),
        Options {
            minimal: true,
            ..Options::default()
        },
    )
    .unwrap();
    let triples: Vec<String> = reader
        .statements()
        .unwrap()
        .map(|t| t.unwrap().to_string())
        .collect();
    assert_eq!(triples.len(), 4);
    assert!(triples[0].contains("\"1\"^^<http://www.w3.org/2001/XMLSchema#integer>"));
    assert!(triples[3].contains("\"Liquidambar\""));
}

#[test]
fn local_csv_without_metadata_falls_back_to_embedded() {
    let workspace = TestWorkspace::new();
    let csv_path = workspace.write("plain.csv", "a,b\nx,y\n");

    let mut reader = Reader::open(csv_path.to_str().unwrap(), Options::default()).unwrap();
    let value = reader.to_json().unwrap();
    let rows = value["tables"][0]["row"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["describes"][0]["a"], json!("x"));
    assert_eq!(rows[0]["describes"][0]["b"], json!("y"));
}

#[test]
fn missing_local_file_is_an_io_error() {
    let workspace = TestWorkspace::new();
    let missing = workspace.path().join("absent.csv");
    let result = Reader::open(missing.to_str().unwrap(), Options::default());
    assert!(matches!(result, Err(csvw_tabular::Error::Io(_))));
}
