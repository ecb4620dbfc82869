//! Deep left-merge over metadata trees.
//!
//! `merge(a, b)` keeps every value `a` sets and fills the gaps from `b`:
//! atomic and inherited properties are first-wins, identity-bearing arrays
//! align (columns by position, tables by url, transformations by url,
//! foreign keys by structural equality) and recurse, open-ended
//! collections (notes, common properties, titles) concatenate with
//! duplicates dropped so the operation stays idempotent.
//!
//! The result is a fresh tree; neither input survives.

use crate::{
    dialect::Dialect,
    metadata::{Column, CommonProps, Schema, Table, TableGroup, Transformation},
};

/// Left-merges `b` underneath `a`.
pub fn merge(mut a: TableGroup, b: TableGroup) -> TableGroup {
    a.id = a.id.or(b.id);
    a.table_direction = a.table_direction.or(b.table_direction);
    a.context_language = a.context_language.or(b.context_language);
    a.base = a.base.or(b.base);
    a.inherited.merge_from(&b.inherited);
    merge_dialect(&mut a.dialect, b.dialect);
    a.schema = merge_schema_option(a.schema, b.schema);
    merge_transformations(&mut a.transformations, b.transformations);
    concat_notes(&mut a.notes, b.notes);
    concat_common(&mut a.common, b.common);

    for table in b.tables {
        match a.tables.iter_mut().find(|t| t.url == table.url) {
            Some(existing) => merge_table(existing, table),
            None => a.tables.push(table),
        }
    }
    a
}

fn merge_table(a: &mut Table, b: Table) {
    a.id = a.id.take().or(b.id);
    a.suppress_output |= b.suppress_output;
    a.table_direction = a.table_direction.or(b.table_direction);
    a.inherited.merge_from(&b.inherited);
    merge_dialect(&mut a.dialect, b.dialect);
    a.schema = merge_schema_option(a.schema.take(), b.schema);
    merge_transformations(&mut a.transformations, b.transformations);
    concat_notes(&mut a.notes, b.notes);
    concat_common(&mut a.common, b.common);
}

fn merge_dialect(a: &mut Option<Dialect>, b: Option<Dialect>) {
    match (a.as_mut(), b) {
        (Some(a), Some(b)) => a.merge_from(&b),
        (None, Some(b)) => *a = Some(b),
        _ => {}
    }
}

fn merge_schema_option(a: Option<Schema>, b: Option<Schema>) -> Option<Schema> {
    match (a, b) {
        (Some(mut a), Some(b)) => {
            merge_schema(&mut a, b);
            Some(a)
        }
        (a, b) => a.or(b),
    }
}

fn merge_schema(a: &mut Schema, b: Schema) {
    a.id = a.id.take().or(b.id);
    if a.primary_key.is_empty() {
        a.primary_key = b.primary_key;
    }
    if a.row_titles.is_empty() {
        a.row_titles = b.row_titles;
    }
    a.inherited.merge_from(&b.inherited);
    concat_common(&mut a.common, b.common);

    for fk in b.foreign_keys {
        if !a.foreign_keys.contains(&fk) {
            a.foreign_keys.push(fk);
        }
    }

    let mut b_columns = b.columns.into_iter();
    for column in a.columns.iter_mut() {
        match b_columns.next() {
            Some(other) => merge_column(column, other),
            None => break,
        }
    }
    a.columns.extend(b_columns);
}

fn merge_column(a: &mut Column, b: Column) {
    a.name = a.name.take().or(b.name);
    a.titles.merge_from(&b.titles);
    a.is_virtual |= b.is_virtual;
    a.suppress_output |= b.suppress_output;
    a.inherited.merge_from(&b.inherited);
    concat_common(&mut a.common, b.common);
}

fn merge_transformations(a: &mut Vec<Transformation>, b: Vec<Transformation>) {
    for tr in b {
        match a.iter_mut().find(|existing| existing.url == tr.url) {
            Some(existing) => {
                existing.script_format = existing.script_format.take().or(tr.script_format);
                existing.target_format = existing.target_format.take().or(tr.target_format);
                existing.source = existing.source.take().or(tr.source);
                existing.titles.merge_from(&tr.titles);
                concat_common(&mut existing.common, tr.common);
            }
            None => a.push(tr),
        }
    }
}

fn concat_notes(a: &mut Vec<serde_json::Value>, b: Vec<serde_json::Value>) {
    for note in b {
        if !a.contains(&note) {
            a.push(note);
        }
    }
}

fn concat_common(a: &mut CommonProps, b: CommonProps) {
    for entry in b {
        if !a.contains(&entry) {
            a.push(entry);
        }
    }
}
