//! Term-vectors format: per-document term/position lists by field.
//!
//! A term vector is the per-document inversion of a field: the terms that
//! occurred in that one document, each with its positions. Only fields that
//! requested vectors at index time appear here.

use std::collections::BTreeMap;

use crate::codec::header::{StreamKind, check_header, write_header};
use crate::error::Result;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::traits::Storage;

/// One term of a document's vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermVectorEntry {
    /// The term bytes.
    pub term: Vec<u8>,

    /// Positions of the term in this document, ascending.
    pub positions: Vec<u32>,
}

/// A document's term vectors: field name -> terms in byte order.
pub type DocVectors = BTreeMap<String, Vec<TermVectorEntry>>;

/// The term-vectors stream of one segment, keyed by local doc id.
#[derive(Debug, Clone, Default)]
pub struct TermVectorsData {
    docs: BTreeMap<u32, DocVectors>,
}

impl TermVectorsData {
    /// Create an empty term-vectors map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the vector of (doc, field). Terms must be sorted by bytes.
    pub fn insert(&mut self, doc_id: u32, field: &str, terms: Vec<TermVectorEntry>) {
        self.docs
            .entry(doc_id)
            .or_default()
            .insert(field.to_string(), terms);
    }

    /// All vectors of one document.
    pub fn doc(&self, doc_id: u32) -> Option<&DocVectors> {
        self.docs.get(&doc_id)
    }

    /// The vector of one (doc, field).
    pub fn field(&self, doc_id: u32, field: &str) -> Option<&[TermVectorEntry]> {
        self.docs.get(&doc_id)?.get(field).map(|v| v.as_slice())
    }

    /// Sequential scan over all documents in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &DocVectors)> {
        self.docs.iter().map(|(id, vectors)| (*id, vectors))
    }

    /// Number of documents carrying at least one vector.
    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }
}

/// A term-vectors encoder/decoder.
pub trait TermVectorsFormat: Send + Sync + std::fmt::Debug {
    /// Name recorded in the stream header.
    fn name(&self) -> &'static str;

    /// Write the term vectors of one segment.
    fn write(&self, storage: &dyn Storage, file: &str, vectors: &TermVectorsData) -> Result<()>;

    /// Read the stream back.
    fn read(&self, storage: &dyn Storage, file: &str) -> Result<TermVectorsData>;
}

const FORMAT_NAME: &str = "binary-term-vectors";
const FORMAT_VERSION: u32 = 1;

/// The built-in term-vectors format.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryTermVectorsFormat;

impl TermVectorsFormat for BinaryTermVectorsFormat {
    fn name(&self) -> &'static str {
        FORMAT_NAME
    }

    fn write(&self, storage: &dyn Storage, file: &str, vectors: &TermVectorsData) -> Result<()> {
        let output = storage.create_output(file)?;
        let mut writer = StructWriter::new(output);
        write_header(&mut writer, FORMAT_NAME, FORMAT_VERSION, StreamKind::TermVectors)?;

        writer.write_varint(vectors.docs.len() as u64)?;
        for (doc_id, fields) in &vectors.docs {
            writer.write_varint(*doc_id as u64)?;
            writer.write_varint(fields.len() as u64)?;

            for (field, terms) in fields {
                writer.write_string(field)?;
                writer.write_varint(terms.len() as u64)?;
                for entry in terms {
                    writer.write_bytes(&entry.term)?;
                    writer.write_delta_u32s(&entry.positions)?;
                }
            }
        }

        writer.close()
    }

    fn read(&self, storage: &dyn Storage, file: &str) -> Result<TermVectorsData> {
        let input = storage.open_input(file)?;
        let mut reader = StructReader::new(input)?;
        check_header(&mut reader, file, FORMAT_NAME, FORMAT_VERSION, StreamKind::TermVectors)?;

        let mut docs = BTreeMap::new();
        let doc_count = reader.read_varint()?;
        for _ in 0..doc_count {
            let doc_id = reader.read_varint()? as u32;
            let field_count = reader.read_varint()?;

            let mut fields = DocVectors::new();
            for _ in 0..field_count {
                let field = reader.read_string()?;
                let term_count = reader.read_varint()? as usize;

                let mut terms = Vec::with_capacity(term_count.min(1 << 16));
                for _ in 0..term_count {
                    let term = reader.read_bytes()?;
                    let positions = reader.read_delta_u32s()?;
                    terms.push(TermVectorEntry { term, positions });
                }
                fields.insert(field, terms);
            }

            docs.insert(doc_id, fields);
        }

        reader.verify_checksum(file)?;
        Ok(TermVectorsData { docs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_vectors_roundtrip() {
        let storage = MemoryStorage::new_default();
        let format = BinaryTermVectorsFormat;

        let mut vectors = TermVectorsData::new();
        vectors.insert(
            0,
            "body",
            vec![
                TermVectorEntry {
                    term: b"apple".to_vec(),
                    positions: vec![0, 7],
                },
                TermVectorEntry {
                    term: b"pear".to_vec(),
                    positions: vec![3],
                },
            ],
        );
        vectors.insert(
            2,
            "title",
            vec![TermVectorEntry {
                term: b"apple".to_vec(),
                positions: vec![0],
            }],
        );

        format.write(&storage, "seg.tvx", &vectors).unwrap();
        let loaded = format.read(&storage, "seg.tvx").unwrap();

        assert_eq!(loaded.doc_count(), 2);
        assert_eq!(loaded.field(0, "body").unwrap().len(), 2);
        assert_eq!(loaded.field(0, "body").unwrap()[0].positions, vec![0, 7]);
        assert_eq!(loaded.field(2, "title").unwrap()[0].term, b"apple");
        assert!(loaded.doc(1).is_none());
    }

    #[test]
    fn test_binary_terms_byte_identical() {
        let storage = MemoryStorage::new_default();
        let format = BinaryTermVectorsFormat;

        let term: Vec<u8> = vec![7, 248];
        let mut vectors = TermVectorsData::new();
        vectors.insert(
            0,
            "code",
            vec![TermVectorEntry {
                term: term.clone(),
                positions: vec![0],
            }],
        );

        format.write(&storage, "seg.tvx", &vectors).unwrap();
        let loaded = format.read(&storage, "seg.tvx").unwrap();

        assert_eq!(loaded.field(0, "code").unwrap()[0].term, term);
    }

    #[test]
    fn test_empty_roundtrip() {
        let storage = MemoryStorage::new_default();
        let format = BinaryTermVectorsFormat;

        format.write(&storage, "seg.tvx", &TermVectorsData::new()).unwrap();
        let loaded = format.read(&storage, "seg.tvx").unwrap();
        assert_eq!(loaded.doc_count(), 0);
    }
}
