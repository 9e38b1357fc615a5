//! Live-document bitmaps.
//!
//! One bit per local document id; set means live. Bitmaps are copy-on-write:
//! applying deletes clones the bitmap and bumps its generation, and the new
//! state is written to a fresh file. Readers keep whatever generation they
//! snapshotted at open time.

use bit_vec::BitVec;

use crate::codec::header::{StreamKind, check_header, write_header};
use crate::error::{Result, XystonError};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::traits::Storage;

const FORMAT_NAME: &str = "live-docs";
const FORMAT_VERSION: u32 = 1;

/// A snapshot of which local documents in a segment are live.
#[derive(Debug, Clone)]
pub struct LiveDocs {
    /// Bit set = document is live.
    bits: BitVec,

    /// Number of live documents (count of set bits).
    live_count: u32,

    /// Generation of this bitmap snapshot.
    generation: u64,
}

impl LiveDocs {
    /// Create a bitmap with every document live, at generation 0.
    pub fn all_live(max_doc: u32) -> Self {
        LiveDocs {
            bits: BitVec::from_elem(max_doc as usize, true),
            live_count: max_doc,
            generation: 0,
        }
    }

    /// Number of document slots covered.
    pub fn max_doc(&self) -> u32 {
        self.bits.len() as u32
    }

    /// Number of live documents.
    pub fn live_count(&self) -> u32 {
        self.live_count
    }

    /// Number of deleted documents.
    pub fn deleted_count(&self) -> u32 {
        self.max_doc() - self.live_count
    }

    /// Generation of this snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the given local document is live. Out-of-range ids are dead.
    pub fn is_live(&self, doc_id: u32) -> bool {
        self.bits.get(doc_id as usize).unwrap_or(false)
    }

    /// Mark a document deleted. Returns true if the bit changed.
    pub fn delete(&mut self, doc_id: u32) -> Result<bool> {
        if doc_id >= self.max_doc() {
            return Err(XystonError::index(format!(
                "Document id {doc_id} out of range (max_doc {})",
                self.max_doc()
            )));
        }

        let was_live = self.bits.get(doc_id as usize).unwrap_or(false);
        if was_live {
            self.bits.set(doc_id as usize, false);
            self.live_count -= 1;
        }

        Ok(was_live)
    }

    /// Clone this bitmap into the next generation, ready for new deletes.
    pub fn next_generation(&self) -> Self {
        LiveDocs {
            bits: self.bits.clone(),
            live_count: self.live_count,
            generation: self.generation + 1,
        }
    }

    /// Iterate the live local doc ids in ascending order.
    pub fn iter_live(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.max_doc()).filter(|&doc| self.is_live(doc))
    }

    /// Write this bitmap to `file`.
    pub fn write(&self, storage: &dyn Storage, file: &str) -> Result<()> {
        let output = storage.create_output(file)?;
        let mut writer = StructWriter::new(output);
        write_header(&mut writer, FORMAT_NAME, FORMAT_VERSION, StreamKind::LiveDocs)?;

        writer.write_u64(self.generation)?;
        writer.write_u32(self.max_doc())?;
        writer.write_u32(self.live_count)?;
        writer.write_bytes(&self.bits.to_bytes())?;

        writer.close()
    }

    /// Read a bitmap from `file`, checking it covers `max_doc` slots.
    pub fn read(storage: &dyn Storage, file: &str, max_doc: u32) -> Result<Self> {
        let input = storage.open_input(file)?;
        let mut reader = StructReader::new(input)?;
        check_header(&mut reader, file, FORMAT_NAME, FORMAT_VERSION, StreamKind::LiveDocs)?;

        let generation = reader.read_u64()?;
        let stored_max_doc = reader.read_u32()?;
        if stored_max_doc != max_doc {
            return Err(XystonError::format_mismatch(
                file,
                format!("bitmap covers {stored_max_doc} docs, segment has {max_doc}"),
            ));
        }

        let live_count = reader.read_u32()?;
        let bytes = reader.read_bytes()?;
        reader.verify_checksum(file)?;

        let mut bits = BitVec::from_bytes(&bytes);
        bits.truncate(max_doc as usize);
        if bits.len() < max_doc as usize {
            return Err(XystonError::format_mismatch(
                file,
                format!("bitmap holds {} bits, expected {max_doc}", bits.len()),
            ));
        }

        let actual_live = bits.iter().filter(|b| *b).count() as u32;
        if actual_live != live_count {
            return Err(XystonError::format_mismatch(
                file,
                format!("live count {live_count} does not match {actual_live} set bits"),
            ));
        }

        Ok(LiveDocs {
            bits,
            live_count,
            generation,
        })
    }
}
