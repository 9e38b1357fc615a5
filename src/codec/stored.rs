//! Stored-fields format: per-document field blobs.
//!
//! Documents are written in local-id order. The reader materializes the
//! whole stream, serving lookups by document id and sequential scans.

use crate::codec::header::{StreamKind, check_header, write_header};
use crate::error::{Result, XystonError};
use crate::index::document::StoredValue;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::traits::Storage;

/// The stored fields of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredDoc {
    /// (field name, value) pairs in submission order.
    pub fields: Vec<(String, StoredValue)>,
}

impl StoredDoc {
    /// Look up a stored value by field name (first match).
    pub fn get(&self, field: &str) -> Option<&StoredValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// True when the document stored nothing.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// The stored-fields stream of one segment, indexed by local doc id.
#[derive(Debug, Clone, Default)]
pub struct StoredFields {
    docs: Vec<StoredDoc>,
}

impl StoredFields {
    /// Build from per-document records in local-id order.
    pub fn new(docs: Vec<StoredDoc>) -> Self {
        StoredFields { docs }
    }

    /// All stored fields of one document.
    pub fn doc(&self, doc_id: u32) -> Option<&StoredDoc> {
        self.docs.get(doc_id as usize)
    }

    /// Number of documents in the stream.
    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    /// Sequential scan over all documents.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &StoredDoc)> {
        self.docs
            .iter()
            .enumerate()
            .map(|(id, doc)| (id as u32, doc))
    }
}

/// A stored-fields encoder/decoder.
pub trait StoredFieldsFormat: Send + Sync + std::fmt::Debug {
    /// Name recorded in the stream header.
    fn name(&self) -> &'static str;

    /// Write per-document stored fields, in local-id order.
    fn write(&self, storage: &dyn Storage, file: &str, docs: &[StoredDoc]) -> Result<()>;

    /// Read the stream back.
    fn read(&self, storage: &dyn Storage, file: &str) -> Result<StoredFields>;
}

const FORMAT_NAME: &str = "binary-stored";
const FORMAT_VERSION: u32 = 1;

const TAG_TEXT: u8 = 0;
const TAG_BINARY: u8 = 1;

/// The built-in length-prefixed stored-fields format.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryStoredFieldsFormat;

impl StoredFieldsFormat for BinaryStoredFieldsFormat {
    fn name(&self) -> &'static str {
        FORMAT_NAME
    }

    fn write(&self, storage: &dyn Storage, file: &str, docs: &[StoredDoc]) -> Result<()> {
        let output = storage.create_output(file)?;
        let mut writer = StructWriter::new(output);
        write_header(&mut writer, FORMAT_NAME, FORMAT_VERSION, StreamKind::StoredFields)?;

        writer.write_varint(docs.len() as u64)?;
        for doc in docs {
            writer.write_varint(doc.fields.len() as u64)?;
            for (name, value) in &doc.fields {
                writer.write_string(name)?;
                match value {
                    StoredValue::Text(text) => {
                        writer.write_u8(TAG_TEXT)?;
                        writer.write_string(text)?;
                    }
                    StoredValue::Binary(bytes) => {
                        writer.write_u8(TAG_BINARY)?;
                        writer.write_bytes(bytes)?;
                    }
                }
            }
        }

        writer.close()
    }

    fn read(&self, storage: &dyn Storage, file: &str) -> Result<StoredFields> {
        let input = storage.open_input(file)?;
        let mut reader = StructReader::new(input)?;
        check_header(&mut reader, file, FORMAT_NAME, FORMAT_VERSION, StreamKind::StoredFields)?;

        let doc_count = reader.read_varint()? as usize;
        let mut docs = Vec::with_capacity(doc_count.min(1 << 20));
        for _ in 0..doc_count {
            let field_count = reader.read_varint()? as usize;
            let mut fields = Vec::with_capacity(field_count.min(1 << 10));
            for _ in 0..field_count {
                let name = reader.read_string()?;
                let tag = reader.read_u8()?;
                let value = match tag {
                    TAG_TEXT => StoredValue::Text(reader.read_string()?),
                    TAG_BINARY => StoredValue::Binary(reader.read_bytes()?),
                    other => {
                        return Err(XystonError::format_mismatch(
                            file,
                            format!("unknown stored value tag {other}"),
                        ));
                    }
                };
                fields.push((name, value));
            }
            docs.push(StoredDoc { fields });
        }

        reader.verify_checksum(file)?;
        Ok(StoredFields::new(docs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_stored_roundtrip() {
        let storage = MemoryStorage::new_default();
        let format = BinaryStoredFieldsFormat;

        let docs = vec![
            StoredDoc {
                fields: vec![
                    ("id".to_string(), StoredValue::Text("0".to_string())),
                    (
                        "payload".to_string(),
                        StoredValue::Binary(vec![0x00, 0xFF, 0x7F]),
                    ),
                ],
            },
            StoredDoc { fields: vec![] },
            StoredDoc {
                fields: vec![("id".to_string(), StoredValue::Text("2".to_string()))],
            },
        ];

        format.write(&storage, "seg.sto", &docs).unwrap();
        let loaded = format.read(&storage, "seg.sto").unwrap();

        assert_eq!(loaded.doc_count(), 3);
        assert_eq!(loaded.doc(0).unwrap(), &docs[0]);
        assert!(loaded.doc(1).unwrap().is_empty());
        assert_eq!(
            loaded.doc(2).unwrap().get("id").unwrap().as_text(),
            Some("2")
        );
        assert!(loaded.doc(3).is_none());
    }

    #[test]
    fn test_binary_payload_byte_identical() {
        let storage = MemoryStorage::new_default();
        let format = BinaryStoredFieldsFormat;

        let payload: Vec<u8> = (0u16..=255).map(|b| b as u8).collect();
        let docs = vec![StoredDoc {
            fields: vec![("blob".to_string(), StoredValue::Binary(payload.clone()))],
        }];

        format.write(&storage, "seg.sto", &docs).unwrap();
        let loaded = format.read(&storage, "seg.sto").unwrap();

        assert_eq!(loaded.doc(0).unwrap().get("blob").unwrap().as_bytes(), &payload[..]);
    }

    #[test]
    fn test_scan_order() {
        let storage = MemoryStorage::new_default();
        let format = BinaryStoredFieldsFormat;

        let docs: Vec<StoredDoc> = (0..5)
            .map(|i| StoredDoc {
                fields: vec![("id".to_string(), StoredValue::Text(i.to_string()))],
            })
            .collect();

        format.write(&storage, "seg.sto", &docs).unwrap();
        let loaded = format.read(&storage, "seg.sto").unwrap();

        let ids: Vec<u32> = loaded.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }
}
