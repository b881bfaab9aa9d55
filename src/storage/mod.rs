pub mod btree;
pub mod catalog;
pub mod column;
pub mod cursor;
mod encoding;
mod row;
pub mod schema;
mod varint;

pub use btree::{BTreeFile, Cell, PageType};
pub use catalog::{CatalogEntry, EntryKind};
pub use encoding::{decode_row, encode_row};
pub use row::Row;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    /// End-to-end scenario 3 from the spec: open, insert, find, miss.
    #[test]
    fn single_insert_then_find_then_miss() {
        let tmp = NamedTempFile::new().unwrap();
        let mut bt = BTreeFile::open(tmp.path()).unwrap();
        bt.insert_in_table(1, 42, &[0xAB, 0xCD, 0xEF]).unwrap();
        assert_eq!(bt.find(1, 42).unwrap(), vec![0xAB, 0xCD, 0xEF]);
        assert!(bt.find(1, 41).is_err());
    }

    /// End-to-end scenario 4: random insertion order yields an ascending
    /// cell-offset array.
    #[test]
    fn random_inserts_leave_keys_in_ascending_order() {
        let tmp = NamedTempFile::new().unwrap();
        let mut bt = BTreeFile::open(tmp.path()).unwrap();
        for key in [5u32, 1, 9, 3, 7] {
            bt.insert_in_table(1, key, format!("v{key}").as_bytes()).unwrap();
        }
        let n = bt.get_node(1).unwrap();
        let keys: Vec<u32> = (0..n.n_cells).map(|k| n.get_cell(k).unwrap().key()).collect();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
    }

    /// End-to-end scenario 6: a hit in an index tree redirects the search
    /// into the table tree it points at.
    #[test]
    fn catalog_backed_index_redirects_to_its_table() {
        let tmp = NamedTempFile::new().unwrap();
        let mut bt = BTreeFile::open(tmp.path()).unwrap();
        let table_root = catalog::create_table(&mut bt, "people").unwrap();
        let index_root = catalog::create_index(&mut bt, "people_by_age", "people").unwrap();

        bt.insert_in_table(table_root, 100, b"row").unwrap();
        bt.insert_in_index(index_root, 10, 100).unwrap();

        assert_eq!(bt.find_via_index(index_root, table_root, 10).unwrap(), b"row");
    }
}
