//! Postings format: term dictionary plus posting lists per field.
//!
//! On disk, fields are written in name order and terms in byte order, so a
//! sequential scan yields the dictionary already sorted. Doc ids inside one
//! posting list are delta-coded; positions are delta-coded per document.

use std::collections::BTreeMap;

use crate::codec::header::{StreamKind, check_header, write_header};
use crate::error::Result;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::traits::Storage;

/// One document entry within a posting list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    /// Local document id within the segment.
    pub doc_id: u32,

    /// Term frequency in that document.
    pub freq: u32,

    /// Positions of the term in that document, ascending.
    pub positions: Vec<u32>,
}

/// All documents containing one term, in ascending doc-id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingList {
    /// The postings, sorted by `doc_id`.
    pub postings: Vec<Posting>,
}

impl PostingList {
    /// Number of documents in this list (including deleted slots).
    pub fn doc_count(&self) -> usize {
        self.postings.len()
    }

    /// Iterate the doc ids in this list.
    pub fn doc_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.postings.iter().map(|p| p.doc_id)
    }
}

/// Sorted map of term bytes to posting list.
pub type TermPostings = BTreeMap<Vec<u8>, PostingList>;

/// The full postings stream of one segment: field name -> term dictionary.
///
/// Supports the three read selectors: exact field/term lookup, per-field
/// enumeration in term order, and a full sequential scan.
#[derive(Debug, Clone, Default)]
pub struct FieldPostings {
    fields: BTreeMap<String, TermPostings>,
}

impl FieldPostings {
    /// Create an empty postings map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a posting for (field, term, doc). Postings must arrive in
    /// ascending doc-id order per term, which the writer guarantees.
    pub fn push(&mut self, field: &str, term: &[u8], posting: Posting) {
        let list = self
            .fields
            .entry(field.to_string())
            .or_default()
            .entry(term.to_vec())
            .or_default();
        list.postings.push(posting);
    }

    /// Exact lookup of one term's posting list.
    pub fn term(&self, field: &str, term: &[u8]) -> Option<&PostingList> {
        self.fields.get(field)?.get(term)
    }

    /// The sorted term dictionary for one field.
    pub fn terms(&self, field: &str) -> Option<&TermPostings> {
        self.fields.get(field)
    }

    /// Iterate all fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &TermPostings)> {
        self.fields.iter()
    }

    /// Names of all indexed fields.
    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    /// Total number of distinct (field, term) pairs.
    pub fn term_count(&self) -> usize {
        self.fields.values().map(|t| t.len()).sum()
    }

    /// True when no field holds any term.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A postings encoder/decoder.
pub trait PostingsFormat: Send + Sync + std::fmt::Debug {
    /// Name recorded in the stream header.
    fn name(&self) -> &'static str;

    /// Write the postings of one segment to `file`.
    fn write(&self, storage: &dyn Storage, file: &str, postings: &FieldPostings) -> Result<()>;

    /// Read the postings of one segment back from `file`.
    fn read(&self, storage: &dyn Storage, file: &str) -> Result<FieldPostings>;
}

const FORMAT_NAME: &str = "binary-postings";
const FORMAT_VERSION: u32 = 1;

/// The built-in varint/delta postings format.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryPostingsFormat;

impl PostingsFormat for BinaryPostingsFormat {
    fn name(&self) -> &'static str {
        FORMAT_NAME
    }

    fn write(&self, storage: &dyn Storage, file: &str, postings: &FieldPostings) -> Result<()> {
        let output = storage.create_output(file)?;
        let mut writer = StructWriter::new(output);
        write_header(&mut writer, FORMAT_NAME, FORMAT_VERSION, StreamKind::Postings)?;

        writer.write_varint(postings.fields.len() as u64)?;
        for (field, terms) in &postings.fields {
            writer.write_string(field)?;
            writer.write_varint(terms.len() as u64)?;

            for (term, list) in terms {
                writer.write_bytes(term)?;

                let doc_ids: Vec<u32> = list.doc_ids().collect();
                writer.write_delta_u32s(&doc_ids)?;

                for posting in &list.postings {
                    writer.write_varint(posting.freq as u64)?;
                    writer.write_delta_u32s(&posting.positions)?;
                }
            }
        }

        writer.close()
    }

    fn read(&self, storage: &dyn Storage, file: &str) -> Result<FieldPostings> {
        let input = storage.open_input(file)?;
        let mut reader = StructReader::new(input)?;
        check_header(&mut reader, file, FORMAT_NAME, FORMAT_VERSION, StreamKind::Postings)?;

        let mut fields = BTreeMap::new();
        let field_count = reader.read_varint()?;
        for _ in 0..field_count {
            let field = reader.read_string()?;
            let term_count = reader.read_varint()?;

            let mut terms = TermPostings::new();
            for _ in 0..term_count {
                let term = reader.read_bytes()?;
                let doc_ids = reader.read_delta_u32s()?;

                let mut postings = Vec::with_capacity(doc_ids.len());
                for doc_id in doc_ids {
                    let freq = reader.read_varint()? as u32;
                    let positions = reader.read_delta_u32s()?;
                    postings.push(Posting {
                        doc_id,
                        freq,
                        positions,
                    });
                }

                terms.insert(term, PostingList { postings });
            }

            fields.insert(field, terms);
        }

        reader.verify_checksum(file)?;
        Ok(FieldPostings { fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn sample_postings() -> FieldPostings {
        let mut postings = FieldPostings::new();
        postings.push(
            "body",
            b"apple",
            Posting {
                doc_id: 0,
                freq: 2,
                positions: vec![1, 9],
            },
        );
        postings.push(
            "body",
            b"apple",
            Posting {
                doc_id: 3,
                freq: 1,
                positions: vec![4],
            },
        );
        postings.push(
            "body",
            b"banana",
            Posting {
                doc_id: 1,
                freq: 1,
                positions: vec![0],
            },
        );
        postings.push(
            "title",
            b"apple",
            Posting {
                doc_id: 2,
                freq: 1,
                positions: vec![0],
            },
        );
        postings
    }

    #[test]
    fn test_postings_roundtrip() {
        let storage = MemoryStorage::new_default();
        let format = BinaryPostingsFormat;
        let postings = sample_postings();

        format.write(&storage, "seg.pst", &postings).unwrap();
        let loaded = format.read(&storage, "seg.pst").unwrap();

        assert_eq!(loaded.term_count(), 3);
        assert_eq!(
            loaded.term("body", b"apple").unwrap(),
            postings.term("body", b"apple").unwrap()
        );
        assert_eq!(
            loaded.term("title", b"apple").unwrap(),
            postings.term("title", b"apple").unwrap()
        );
        assert!(loaded.term("body", b"cherry").is_none());
    }

    #[test]
    fn test_terms_sorted() {
        let storage = MemoryStorage::new_default();
        let format = BinaryPostingsFormat;

        let mut postings = FieldPostings::new();
        for term in [b"pear".as_ref(), b"apple".as_ref(), b"mango".as_ref()] {
            postings.push(
                "body",
                term,
                Posting {
                    doc_id: 0,
                    freq: 1,
                    positions: vec![0],
                },
            );
        }

        format.write(&storage, "seg.pst", &postings).unwrap();
        let loaded = format.read(&storage, "seg.pst").unwrap();

        let terms: Vec<&[u8]> = loaded
            .terms("body")
            .unwrap()
            .keys()
            .map(|t| t.as_slice())
            .collect();
        assert_eq!(terms, vec![b"apple".as_ref(), b"mango".as_ref(), b"pear".as_ref()]);
    }

    #[test]
    fn test_empty_postings_roundtrip() {
        let storage = MemoryStorage::new_default();
        let format = BinaryPostingsFormat;

        format.write(&storage, "seg.pst", &FieldPostings::new()).unwrap();
        let loaded = format.read(&storage, "seg.pst").unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_wrong_stream_rejected() {
        let storage = MemoryStorage::new_default();
        let format = BinaryPostingsFormat;

        // A stored-fields header in a file read as postings must fail.
        let output = crate::storage::traits::Storage::create_output(&storage, "seg.pst").unwrap();
        let mut writer = StructWriter::new(output);
        write_header(&mut writer, "binary-stored", 1, StreamKind::StoredFields).unwrap();
        writer.close().unwrap();

        assert!(format.read(&storage, "seg.pst").is_err());
    }
}
