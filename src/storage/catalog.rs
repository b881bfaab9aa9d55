//! Name -> root-page registry for the tables and indexes living in one
//! `BTreeFile`, the way `sqlite_master` lets one SQLite file hold many
//! named objects. Minimal by design: no ALTER, no drop, no separate index
//! over names (`find_root` just walks the catalog tree in key order and
//! compares names, since there are only ever a handful of entries).
use once_cell::sync::Lazy;

use super::btree::{BTreeFile, PageType, CATALOG_ROOT};
use super::column::{ColumnType, ColumnValue};
use super::cursor::Cursor;
use super::encoding::{decode_row, encode_row};
use super::row::Row;
use super::schema::{ColumnSchema, TableSchema};
use crate::err;
use crate::errors::Error;
use crate::pager::PageNum;

const KIND_TABLE: i64 = 0;
const KIND_INDEX: i64 = 1;

pub static CATALOG_SCHEMA: Lazy<TableSchema> = Lazy::new(|| TableSchema {
    columns: vec![
        ColumnSchema {
            name: "name".into(),
            type_: ColumnType::TEXT,
            default: None,
            is_primary: false,
            is_nullable: false,
        },
        ColumnSchema {
            name: "kind".into(),
            type_: ColumnType::TINYINT,
            default: None,
            is_primary: false,
            is_nullable: false,
        },
        ColumnSchema {
            name: "root_page".into(),
            type_: ColumnType::INT,
            default: None,
            is_primary: false,
            is_nullable: false,
        },
        ColumnSchema {
            name: "table_root".into(),
            type_: ColumnType::INT,
            default: None,
            is_primary: false,
            is_nullable: false,
        },
    ],
    version: 0,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Table,
    Index,
}

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub name: String,
    pub kind: EntryKind,
    pub root_page: PageNum,
    /// For an index entry, the root of the table it points into; unused
    /// (set to 0) for a table entry.
    pub table_root: PageNum,
}

fn row_to_entry(row: &Row) -> Result<CatalogEntry, Error> {
    let name = match row.inner.get("name") {
        Some(ColumnValue::Text(bytes)) => String::from_utf8_lossy(bytes).to_string(),
        _ => return Err(err!(Schema, "catalog row missing a valid name column")),
    };
    let kind = match row.inner.get("kind") {
        Some(ColumnValue::TinyInt(k)) if *k as i64 == KIND_TABLE => EntryKind::Table,
        Some(ColumnValue::TinyInt(k)) if *k as i64 == KIND_INDEX => EntryKind::Index,
        _ => return Err(err!(Schema, "catalog row has an unknown kind")),
    };
    let root_page = match row.inner.get("root_page") {
        Some(ColumnValue::Int(v)) => *v as PageNum,
        _ => return Err(err!(Schema, "catalog row missing a valid root_page column")),
    };
    let table_root = match row.inner.get("table_root") {
        Some(ColumnValue::Int(v)) => *v as PageNum,
        _ => return Err(err!(Schema, "catalog row missing a valid table_root column")),
    };
    Ok(CatalogEntry { name, kind, root_page, table_root })
}

fn entry_to_row(entry: &CatalogEntry) -> Row {
    let kind = match entry.kind {
        EntryKind::Table => KIND_TABLE,
        EntryKind::Index => KIND_INDEX,
    };
    let inner = std::collections::HashMap::from([
        ("name".to_string(), ColumnValue::Text(entry.name.clone().into_bytes())),
        ("kind".to_string(), ColumnValue::TinyInt(kind as i8)),
        ("root_page".to_string(), ColumnValue::Int(entry.root_page as i64)),
        ("table_root".to_string(), ColumnValue::Int(entry.table_root as i64)),
    ]);
    Row { inner }
}

/// Scans every catalog entry in key order. The catalog tree is expected to
/// stay small (one entry per named table/index), so a full scan per lookup
/// is simpler than maintaining a secondary name index.
fn scan(bt: &mut BTreeFile) -> Result<Vec<(u32, CatalogEntry)>, Error> {
    let mut out = Vec::new();
    let mut cursor = Cursor::start(bt, CATALOG_ROOT)?;
    while !cursor.is_done() {
        if let Some(cell) = cursor.current()? {
            let key = cell.key();
            if let super::btree::Cell::TableLeaf { data, .. } = cell {
                let row = decode_row(&CATALOG_SCHEMA, &data)?;
                out.push((key, row_to_entry(&row)?));
            }
        }
        cursor.advance()?;
    }
    Ok(out)
}

fn next_key(bt: &mut BTreeFile) -> Result<u32, Error> {
    Ok(scan(bt)?.into_iter().map(|(k, _)| k).max().map(|k| k + 1).unwrap_or(0))
}

fn find(bt: &mut BTreeFile, name: &str) -> Result<Option<CatalogEntry>, Error> {
    Ok(scan(bt)?.into_iter().find(|(_, e)| e.name == name).map(|(_, e)| e))
}

/// Allocates a fresh `TABLE_LEAF` root and records `(name, Table, root)`.
pub fn create_table(bt: &mut BTreeFile, name: &str) -> Result<PageNum, Error> {
    if find(bt, name)?.is_some() {
        return Err(err!(Duplicate, "table '{}' already exists", name));
    }
    let root = bt.new_node(PageType::TableLeaf)?;
    let entry = CatalogEntry { name: name.to_string(), kind: EntryKind::Table, root_page: root, table_root: 0 };
    let key = next_key(bt)?;
    let row = entry_to_row(&entry);
    let data = encode_row(&CATALOG_SCHEMA, &row)?;
    bt.insert_in_table(CATALOG_ROOT, key, &data)?;
    Ok(root)
}

/// Allocates a fresh `INDEX_LEAF` root over `table`, recording the
/// association so `find_via_index`-style lookups know which table tree to
/// restart into on a hit.
pub fn create_index(bt: &mut BTreeFile, name: &str, table: &str) -> Result<PageNum, Error> {
    if find(bt, name)?.is_some() {
        return Err(err!(Duplicate, "index '{}' already exists", name));
    }
    let table_entry = find(bt, table)?.ok_or_else(|| err!(NotFound, "table '{}' not found", table))?;
    if table_entry.kind != EntryKind::Table {
        return Err(err!(Schema, "'{}' is not a table", table));
    }
    let root = bt.new_node(PageType::IndexLeaf)?;
    let entry = CatalogEntry {
        name: name.to_string(),
        kind: EntryKind::Index,
        root_page: root,
        table_root: table_entry.root_page,
    };
    let key = next_key(bt)?;
    let row = entry_to_row(&entry);
    let data = encode_row(&CATALOG_SCHEMA, &row)?;
    bt.insert_in_table(CATALOG_ROOT, key, &data)?;
    Ok(root)
}

/// Looks up a named table or index; `NotFound` if it does not exist.
pub fn find_root(bt: &mut BTreeFile, name: &str) -> Result<CatalogEntry, Error> {
    find(bt, name)?.ok_or_else(|| err!(NotFound, "'{}' not found in catalog", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn open_fresh() -> (NamedTempFile, BTreeFile) {
        let tmp = NamedTempFile::new().unwrap();
        let bt = BTreeFile::open(tmp.path()).unwrap();
        (tmp, bt)
    }

    #[test]
    fn creates_and_finds_a_table() {
        let (_tmp, mut bt) = open_fresh();
        let root = create_table(&mut bt, "people").unwrap();
        let entry = find_root(&mut bt, "people").unwrap();
        assert_eq!(entry.kind, EntryKind::Table);
        assert_eq!(entry.root_page, root);
    }

    #[test]
    fn duplicate_table_name_is_rejected() {
        let (_tmp, mut bt) = open_fresh();
        create_table(&mut bt, "people").unwrap();
        assert!(create_table(&mut bt, "people").is_err());
    }

    #[test]
    fn creates_an_index_over_an_existing_table() {
        let (_tmp, mut bt) = open_fresh();
        let table_root = create_table(&mut bt, "people").unwrap();
        let index_root = create_index(&mut bt, "people_by_email", "people").unwrap();
        let entry = find_root(&mut bt, "people_by_email").unwrap();
        assert_eq!(entry.kind, EntryKind::Index);
        assert_eq!(entry.root_page, index_root);
        assert_eq!(entry.table_root, table_root);
    }

    #[test]
    fn index_over_missing_table_is_not_found() {
        let (_tmp, mut bt) = open_fresh();
        assert!(create_index(&mut bt, "idx", "nope").is_err());
    }

    #[test]
    fn unknown_name_is_not_found() {
        let (_tmp, mut bt) = open_fresh();
        assert!(find_root(&mut bt, "nope").is_err());
    }
}
