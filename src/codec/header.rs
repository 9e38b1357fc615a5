//! Stream file headers and footers.
//!
//! Every stream file starts with a fixed magic, the name and version of the
//! format that produced it, and the stream kind. Decoders check all four
//! before touching the payload, so bytes from a different format or a
//! truncated file surface as [`XystonError::FormatMismatch`] instead of
//! being misinterpreted.

use crate::error::{Result, XystonError};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::traits::{StorageInput, StorageOutput};

/// Magic number identifying xyston stream files.
pub const STREAM_MAGIC: u32 = 0x5859_5354;

/// The kind of logical stream stored in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Term dictionary and posting lists.
    Postings,

    /// Per-document stored field blobs.
    StoredFields,

    /// Per-document numeric/binary values.
    DocValues,

    /// Per-document term vectors.
    TermVectors,

    /// Live-document bitmap.
    LiveDocs,
}

impl StreamKind {
    /// Stable on-disk tag for this kind.
    pub fn tag(self) -> u8 {
        match self {
            StreamKind::Postings => 0,
            StreamKind::StoredFields => 1,
            StreamKind::DocValues => 2,
            StreamKind::TermVectors => 3,
            StreamKind::LiveDocs => 4,
        }
    }

    /// Decode an on-disk tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(StreamKind::Postings),
            1 => Some(StreamKind::StoredFields),
            2 => Some(StreamKind::DocValues),
            3 => Some(StreamKind::TermVectors),
            4 => Some(StreamKind::LiveDocs),
            _ => None,
        }
    }

    /// File name extension used for this kind.
    pub fn extension(self) -> &'static str {
        match self {
            StreamKind::Postings => "pst",
            StreamKind::StoredFields => "sto",
            StreamKind::DocValues => "dvs",
            StreamKind::TermVectors => "tvx",
            StreamKind::LiveDocs => "liv",
        }
    }
}

/// Write a stream header.
pub fn write_header<W: StorageOutput>(
    writer: &mut StructWriter<W>,
    format_name: &str,
    version: u32,
    kind: StreamKind,
) -> Result<()> {
    writer.write_u32(STREAM_MAGIC)?;
    writer.write_string(format_name)?;
    writer.write_u32(version)?;
    writer.write_u8(kind.tag())?;
    Ok(())
}

/// Read and validate a stream header.
///
/// Returns the version found in the file; the caller decides which versions
/// it can decode. `max_version` bounds what this build understands.
pub fn check_header<R: StorageInput>(
    reader: &mut StructReader<R>,
    file: &str,
    format_name: &str,
    max_version: u32,
    kind: StreamKind,
) -> Result<u32> {
    let magic = reader
        .read_u32()
        .map_err(|_| XystonError::format_mismatch(file, "file too short for header"))?;
    if magic != STREAM_MAGIC {
        return Err(XystonError::format_mismatch(
            file,
            format!("bad magic {magic:#010x}, expected {STREAM_MAGIC:#010x}"),
        ));
    }

    let found_name = reader.read_string()?;
    if found_name != format_name {
        return Err(XystonError::format_mismatch(
            file,
            format!("format '{found_name}', expected '{format_name}'"),
        ));
    }

    let version = reader.read_u32()?;
    if version > max_version {
        return Err(XystonError::format_mismatch(
            file,
            format!("version {version} is newer than supported {max_version}"),
        ));
    }

    let tag = reader.read_u8()?;
    match StreamKind::from_tag(tag) {
        Some(found) if found == kind => Ok(version),
        Some(found) => Err(XystonError::format_mismatch(
            file,
            format!("stream kind {found:?}, expected {kind:?}"),
        )),
        None => Err(XystonError::format_mismatch(
            file,
            format!("unknown stream kind tag {tag}"),
        )),
    }
}
