//! Doc-values format: per-document numeric/binary values by field.
//!
//! Values are sparse: a field may carry a value for any subset of documents.
//! Per field, doc ids are delta-coded and values follow in the same order.

use std::collections::BTreeMap;

use crate::codec::header::{StreamKind, check_header, write_header};
use crate::error::{Result, XystonError};
use crate::index::document::DocValue;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::traits::Storage;

/// The doc-values stream of one segment: field name -> (doc id -> value).
#[derive(Debug, Clone, Default)]
pub struct DocValuesData {
    fields: BTreeMap<String, BTreeMap<u32, DocValue>>,
}

impl DocValuesData {
    /// Create an empty doc-values map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value for (field, doc).
    pub fn insert(&mut self, field: &str, doc_id: u32, value: DocValue) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .insert(doc_id, value);
    }

    /// Exact lookup: the value of `field` for one document.
    pub fn get(&self, field: &str, doc_id: u32) -> Option<&DocValue> {
        self.fields.get(field)?.get(&doc_id)
    }

    /// All values of one field in ascending doc-id order.
    pub fn field(&self, field: &str) -> Option<&BTreeMap<u32, DocValue>> {
        self.fields.get(field)
    }

    /// Sequential scan over all fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeMap<u32, DocValue>)> {
        self.fields.iter()
    }

    /// Total number of (field, doc) values.
    pub fn value_count(&self) -> usize {
        self.fields.values().map(|m| m.len()).sum()
    }
}

/// A doc-values encoder/decoder.
pub trait DocValuesFormat: Send + Sync + std::fmt::Debug {
    /// Name recorded in the stream header.
    fn name(&self) -> &'static str;

    /// Write the doc values of one segment.
    fn write(&self, storage: &dyn Storage, file: &str, values: &DocValuesData) -> Result<()>;

    /// Read the stream back.
    fn read(&self, storage: &dyn Storage, file: &str) -> Result<DocValuesData>;
}

const FORMAT_NAME: &str = "binary-doc-values";
const FORMAT_VERSION: u32 = 1;

const TAG_NUMERIC: u8 = 0;
const TAG_BINARY: u8 = 1;

/// The built-in sparse doc-values format.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryDocValuesFormat;

impl DocValuesFormat for BinaryDocValuesFormat {
    fn name(&self) -> &'static str {
        FORMAT_NAME
    }

    fn write(&self, storage: &dyn Storage, file: &str, values: &DocValuesData) -> Result<()> {
        let output = storage.create_output(file)?;
        let mut writer = StructWriter::new(output);
        write_header(&mut writer, FORMAT_NAME, FORMAT_VERSION, StreamKind::DocValues)?;

        writer.write_varint(values.fields.len() as u64)?;
        for (field, docs) in &values.fields {
            writer.write_string(field)?;

            let doc_ids: Vec<u32> = docs.keys().copied().collect();
            writer.write_delta_u32s(&doc_ids)?;

            for value in docs.values() {
                match value {
                    DocValue::Numeric(n) => {
                        writer.write_u8(TAG_NUMERIC)?;
                        writer.write_i64(*n)?;
                    }
                    DocValue::Binary(bytes) => {
                        writer.write_u8(TAG_BINARY)?;
                        writer.write_bytes(bytes)?;
                    }
                }
            }
        }

        writer.close()
    }

    fn read(&self, storage: &dyn Storage, file: &str) -> Result<DocValuesData> {
        let input = storage.open_input(file)?;
        let mut reader = StructReader::new(input)?;
        check_header(&mut reader, file, FORMAT_NAME, FORMAT_VERSION, StreamKind::DocValues)?;

        let mut fields = BTreeMap::new();
        let field_count = reader.read_varint()?;
        for _ in 0..field_count {
            let field = reader.read_string()?;
            let doc_ids = reader.read_delta_u32s()?;

            let mut docs = BTreeMap::new();
            for doc_id in doc_ids {
                let tag = reader.read_u8()?;
                let value = match tag {
                    TAG_NUMERIC => DocValue::Numeric(reader.read_i64()?),
                    TAG_BINARY => DocValue::Binary(reader.read_bytes()?),
                    other => {
                        return Err(XystonError::format_mismatch(
                            file,
                            format!("unknown doc value tag {other}"),
                        ));
                    }
                };
                docs.insert(doc_id, value);
            }

            fields.insert(field, docs);
        }

        reader.verify_checksum(file)?;
        Ok(DocValuesData { fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_doc_values_roundtrip() {
        let storage = MemoryStorage::new_default();
        let format = BinaryDocValuesFormat;

        let mut values = DocValuesData::new();
        values.insert("price", 0, DocValue::Numeric(1999));
        values.insert("price", 2, DocValue::Numeric(-5));
        values.insert("checksum", 1, DocValue::Binary(vec![0xAB, 0xCD]));

        format.write(&storage, "seg.dvs", &values).unwrap();
        let loaded = format.read(&storage, "seg.dvs").unwrap();

        assert_eq!(loaded.value_count(), 3);
        assert_eq!(loaded.get("price", 0).unwrap().as_numeric(), Some(1999));
        assert_eq!(loaded.get("price", 2).unwrap().as_numeric(), Some(-5));
        assert_eq!(
            loaded.get("checksum", 1),
            Some(&DocValue::Binary(vec![0xAB, 0xCD]))
        );
        assert!(loaded.get("price", 1).is_none());
        assert!(loaded.get("missing", 0).is_none());
    }

    #[test]
    fn test_numeric_extremes() {
        let storage = MemoryStorage::new_default();
        let format = BinaryDocValuesFormat;

        let mut values = DocValuesData::new();
        values.insert("n", 0, DocValue::Numeric(i64::MIN));
        values.insert("n", 1, DocValue::Numeric(i64::MAX));
        values.insert("n", 2, DocValue::Numeric(0));

        format.write(&storage, "seg.dvs", &values).unwrap();
        let loaded = format.read(&storage, "seg.dvs").unwrap();

        assert_eq!(loaded.get("n", 0).unwrap().as_numeric(), Some(i64::MIN));
        assert_eq!(loaded.get("n", 1).unwrap().as_numeric(), Some(i64::MAX));
        assert_eq!(loaded.get("n", 2).unwrap().as_numeric(), Some(0));
    }

    #[test]
    fn test_empty_roundtrip() {
        let storage = MemoryStorage::new_default();
        let format = BinaryDocValuesFormat;

        format.write(&storage, "seg.dvs", &DocValuesData::new()).unwrap();
        let loaded = format.read(&storage, "seg.dvs").unwrap();
        assert_eq!(loaded.value_count(), 0);
    }
}
