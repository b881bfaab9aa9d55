//! Row <-> byte buffer codec for table-leaf cell payloads.
//!
//! Table-leaf cells carry a varint-length-prefixed byte string (see
//! `storage::btree::Cell::TableLeaf`), so unlike a fixed-page-slot format
//! there is no need to pad every column out to a worst-case width. Each row
//! is encoded schema-order as a single `bincode` value; the wire format is
//! exactly as long as the data it holds.
use super::column::ColumnValue;
use super::row::Row;
use super::schema::TableSchema;
use crate::errors;
use bincode::config;
use std::collections::HashMap;

/// Encodes `row` into bytes suitable for a `TableLeaf` cell's `data` field,
/// ordering columns the way `schema` declares them (the `Row`'s `HashMap`
/// has no inherent order of its own).
pub fn encode_row(schema: &TableSchema, row: &Row) -> Result<Vec<u8>, errors::Error> {
    let mut ordered: Vec<ColumnValue> = Vec::with_capacity(schema.columns.len());
    for column in &schema.columns {
        let value = row
            .inner
            .get(&column.name)
            .ok_or_else(|| errors::Error::Schema(format!("missing column: {}", column.name)))?;
        ordered.push(value.clone());
    }
    bincode::encode_to_vec(&ordered, config::standard())
        .map_err(|e| errors::Error::Encoding(format!("failed to encode row: {}", e)))
}

/// Decodes a `TableLeaf` cell's `data` field back into a `Row`, per `schema`.
pub fn decode_row(schema: &TableSchema, encoded: &[u8]) -> Result<Row, errors::Error> {
    let (ordered, _): (Vec<ColumnValue>, usize) =
        bincode::decode_from_slice(encoded, config::standard())
            .map_err(|e| errors::Error::Encoding(format!("failed to decode row: {}", e)))?;
    if ordered.len() != schema.columns.len() {
        return Err(errors::Error::Schema(format!(
            "decoded {} columns, schema has {}",
            ordered.len(),
            schema.columns.len()
        )));
    }
    let mut inner = HashMap::new();
    for (column, value) in schema.columns.iter().zip(ordered.into_iter()) {
        inner.insert(column.name.clone(), value);
    }
    Ok(Row { inner })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::column::ColumnType;
    use crate::storage::schema::ColumnSchema;

    fn schema() -> TableSchema {
        TableSchema {
            columns: vec![
                ColumnSchema {
                    name: "id".into(),
                    type_: ColumnType::INT,
                    default: None,
                    is_primary: true,
                    is_nullable: false,
                },
                ColumnSchema {
                    name: "value".into(),
                    type_: ColumnType::TEXT,
                    default: None,
                    is_primary: false,
                    is_nullable: false,
                },
            ],
            version: 0,
        }
    }

    #[test]
    fn round_trips_a_row_through_bytes() {
        let schema = schema();
        let mut inner = HashMap::new();
        inner.insert("id".to_string(), ColumnValue::Int(42));
        inner.insert("value".to_string(), ColumnValue::Text(b"hello".to_vec()));
        let row = Row { inner };

        let encoded = encode_row(&schema, &row).unwrap();
        let decoded = decode_row(&schema, &encoded).unwrap();
        assert_eq!(decoded.get_column("id"), Some("42".to_string()));
        assert_eq!(decoded.get_column("value"), Some("hello".to_string()));
    }

    #[test]
    fn short_values_encode_shorter_than_long_ones() {
        let schema = schema();
        let short = Row {
            inner: HashMap::from([
                ("id".to_string(), ColumnValue::Int(1)),
                ("value".to_string(), ColumnValue::Text(b"a".to_vec())),
            ]),
        };
        let long = Row {
            inner: HashMap::from([
                ("id".to_string(), ColumnValue::Int(1)),
                ("value".to_string(), ColumnValue::Text(vec![b'a'; 4096])),
            ]),
        };
        assert!(encode_row(&schema, &short).unwrap().len() < encode_row(&schema, &long).unwrap().len());
    }

    #[test]
    fn missing_column_is_a_schema_error() {
        let schema = schema();
        let row = Row { inner: HashMap::from([("id".to_string(), ColumnValue::Int(1))]) };
        assert!(encode_row(&schema, &row).is_err());
    }
}
