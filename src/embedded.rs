//! Embedded metadata: the minimal Table description a CSV carries in its
//! own header.
//!
//! Comments read during the preamble become table notes, merged header
//! rows become column titles. A headerless dialect still yields a column
//! count by peeking at the first data row; the peeked row is handed back
//! so the caller can replay it through the row engine.

use serde_json::Value;

use crate::{
    dialect::{LogicalRow, TableSource},
    error::Result,
    metadata::{Column, NaturalLanguage, Schema, Table},
};

/// Synthesizes a Table description from an opened CSV source.
///
/// Returns the table plus the first data row when it had to be read ahead
/// to size a headerless file.
pub fn extract(url: &str, source: &mut TableSource) -> Result<(Table, Option<LogicalRow>)> {
    let mut carried: Option<LogicalRow> = None;

    let titles = source.merged_titles();
    let columns: Vec<Column> = if source.header_rows.is_empty() {
        carried = source.next_row()?;
        let width = carried.as_ref().map(|row| row.cells.len()).unwrap_or(0);
        (0..width).map(|_| Column::default()).collect()
    } else {
        titles
            .iter()
            .map(|title| Column {
                titles: if title.is_empty() {
                    NaturalLanguage::default()
                } else {
                    NaturalLanguage::single(title.clone())
                },
                ..Column::default()
            })
            .collect()
    };

    let table = Table {
        url: url.to_string(),
        schema: Some(Schema {
            columns,
            ..Schema::default()
        }),
        notes: source
            .comments
            .iter()
            .map(|comment| Value::String(comment.clone()))
            .collect(),
        ..Table::default()
    };
    Ok((table, carried))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;

    fn source_for(dialect: &Dialect, data: &str) -> TableSource {
        TableSource::open(
            dialect.resolved().unwrap(),
            Box::new(std::io::Cursor::new(data.as_bytes().to_vec())),
        )
        .unwrap()
    }

    #[test]
    fn headers_become_column_titles() {
        let mut source = source_for(&Dialect::default(), "GID,On Street,Species\n1,ADDISON AV,Celtis australis\n");
        let (table, carried) = extract("http://example.org/tree-ops.csv", &mut source).unwrap();
        assert!(carried.is_none());
        let schema = table.schema.unwrap();
        let titles: Vec<_> = schema
            .columns
            .iter()
            .map(|c| c.titles.first_value().unwrap().to_string())
            .collect();
        assert_eq!(titles, vec!["GID", "On Street", "Species"]);
    }

    #[test]
    fn headerless_files_size_from_the_first_row() {
        let dialect = Dialect {
            header: Some(false),
            ..Dialect::default()
        };
        let mut source = source_for(&dialect, "1,2,3\n4,5,6\n");
        let (table, carried) = extract("http://example.org/data.csv", &mut source).unwrap();
        let schema = table.schema.unwrap();
        assert_eq!(schema.columns.len(), 3);
        assert!(schema.columns.iter().all(|c| c.titles.is_empty()));
        assert_eq!(carried.unwrap().cells, vec!["1", "2", "3"]);
    }

    #[test]
    fn preamble_comments_become_notes() {
        let dialect = Dialect {
            comment_prefix: Some("#".into()),
            ..Dialect::default()
        };
        let mut source = source_for(&dialect, "# about this file\na,b\n1,2\n");
        let (table, _) = extract("http://example.org/data.csv", &mut source).unwrap();
        assert_eq!(table.notes, vec![Value::String("about this file".into())]);
    }
}
