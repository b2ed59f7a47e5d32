//! Header module for the annidx library
//!
//! Both index files start with 12 magic bytes: a 10 byte signature followed by the
//! format version as a little-endian `u16`. A reader rejects a file whose signature
//! or version differ from its own, so an index written by an older or foreign
//! builder is never decoded with the wrong layout.
//!
//! ```text
//! idx := MAGIC_IDX builder:string count:i32 (reference:string offset:i64){count}
//! dbx := MAGIC_DBX count:i32 (classification:string){count} block*
//! ```

use std::io::{Cursor, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::{
    classification::Classifications,
    codec,
    error::{HeaderError, Result},
};

/// Size of the magic bytes at the start of each file
pub const SIZE_MAGIC: usize = 12;

/// Current format version of both files
pub const FORMAT: u16 = 1;

/// Signature of the table of contents file
const SIGNATURE_IDX: &[u8; 10] = b"ANNIDX-IDX";

/// Signature of the data file
const SIGNATURE_DBX: &[u8; 10] = b"ANNIDX-DBX";

const fn magic(signature: &[u8; 10]) -> [u8; SIZE_MAGIC] {
    let version = FORMAT.to_le_bytes();
    let mut magic = [0; SIZE_MAGIC];
    let mut i = 0;
    while i < signature.len() {
        magic[i] = signature[i];
        i += 1;
    }
    magic[10] = version[0];
    magic[11] = version[1];
    magic
}

/// Magic bytes of the table of contents file
pub const MAGIC_IDX: [u8; SIZE_MAGIC] = magic(SIGNATURE_IDX);

/// Magic bytes of the data file
pub const MAGIC_DBX: [u8; SIZE_MAGIC] = magic(SIGNATURE_DBX);

/// Default builder tag recorded in the table of contents
pub const BUILDER_TAG: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

fn check_magic(cursor: &mut Cursor<&[u8]>, signature: &[u8; 10], file: &'static str) -> Result<()> {
    let buffer: &[u8] = cursor.get_ref();
    let pos = cursor.position() as usize;
    let found = buffer.get(pos..pos + SIZE_MAGIC).unwrap_or(&buffer[pos.min(buffer.len())..]);
    if found.len() < SIZE_MAGIC || &found[..10] != signature {
        return Err(HeaderError::InvalidMagicNumber {
            file,
            found: found.to_vec(),
        }
        .into());
    }
    let version = LittleEndian::read_u16(&found[10..SIZE_MAGIC]);
    if version != FORMAT {
        return Err(HeaderError::InvalidFormatVersion { file, version }.into());
    }
    cursor.set_position((pos + SIZE_MAGIC) as u64);
    Ok(())
}

fn read_count(cursor: &mut Cursor<&[u8]>) -> Result<usize> {
    let count = codec::read_i32(cursor)?;
    usize::try_from(count).map_err(|_| HeaderError::InvalidCount(count).into())
}

/// Header of the table of contents (`idx`) file
///
/// The reference count is part of the header on disk; the entries that follow are
/// handled by the writer and reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    /// Name and version of the program that built the index
    pub builder: String,

    /// Number of `(reference, offset)` entries that follow
    pub references: usize,
}
impl IndexHeader {
    #[must_use]
    pub fn new(builder: impl Into<String>, references: usize) -> Self {
        Self {
            builder: builder.into(),
            references,
        }
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&MAGIC_IDX)?;
        codec::write_bytes(writer, self.builder.as_bytes())?;
        writer.write_i32::<LittleEndian>(codec::checked_count(self.references, "references")?)?;
        Ok(())
    }

    /// Reads and validates the header, leaving the cursor at the first entry
    pub fn from_cursor(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        check_magic(cursor, SIGNATURE_IDX, "idx")?;
        let builder = codec::read_string(cursor)?;
        let references = read_count(cursor)?;
        Ok(Self {
            builder,
            references,
        })
    }
}

/// Header of the data (`dbx`) file: the classification table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataHeader {
    pub classifications: Classifications,
}
impl DataHeader {
    #[must_use]
    pub fn new(classifications: Classifications) -> Self {
        Self { classifications }
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&MAGIC_DBX)?;
        let count = codec::checked_count(self.classifications.len(), "classifications")?;
        writer.write_i32::<LittleEndian>(count)?;
        for name in self.classifications.names() {
            codec::write_bytes(writer, name.as_bytes())?;
        }
        Ok(())
    }

    /// Reads and validates the header, leaving the cursor at the first block
    pub fn from_cursor(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        check_magic(cursor, SIGNATURE_DBX, "dbx")?;
        let count = read_count(cursor)?;
        let mut names = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            names.push(codec::read_string(cursor)?);
        }
        Ok(Self {
            classifications: Classifications::new(names),
        })
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::Error;

    #[test]
    fn test_magic_layout() {
        assert_eq!(&MAGIC_IDX[..10], b"ANNIDX-IDX");
        assert_eq!(&MAGIC_DBX[..10], b"ANNIDX-DBX");
        assert_eq!(&MAGIC_IDX[10..], &[1, 0]);
    }

    #[test]
    fn test_index_header_roundtrip() -> anyhow::Result<()> {
        let header = IndexHeader::new("unit", 3);
        let mut buf = Vec::new();
        header.write_bytes(&mut buf)?;
        let mut cursor = Cursor::new(buf.as_slice());
        assert_eq!(IndexHeader::from_cursor(&mut cursor)?, header);
        assert_eq!(cursor.position() as usize, buf.len());
        Ok(())
    }

    #[test]
    fn test_data_header_keeps_order() -> anyhow::Result<()> {
        let header = DataHeader::new(Classifications::new(["Taxonomy", "SEED", "EC"]));
        let mut buf = Vec::new();
        header.write_bytes(&mut buf)?;
        let mut cursor = Cursor::new(buf.as_slice());
        let parsed = DataHeader::from_cursor(&mut cursor)?;
        assert_eq!(parsed.classifications.names(), ["Taxonomy", "SEED", "EC"]);
        Ok(())
    }

    #[test]
    fn test_wrong_file_kind_is_rejected() -> anyhow::Result<()> {
        let mut buf = Vec::new();
        DataHeader::new(Classifications::empty()).write_bytes(&mut buf)?;
        let mut cursor = Cursor::new(buf.as_slice());
        let result = IndexHeader::from_cursor(&mut cursor);
        assert!(matches!(
            result,
            Err(Error::HeaderError(HeaderError::InvalidMagicNumber { file: "idx", .. }))
        ));
        Ok(())
    }

    #[test]
    fn test_old_version_is_rejected() -> anyhow::Result<()> {
        let mut buf = Vec::new();
        IndexHeader::new("unit", 0).write_bytes(&mut buf)?;
        buf[10] = 0;
        let mut cursor = Cursor::new(buf.as_slice());
        let result = IndexHeader::from_cursor(&mut cursor);
        assert!(matches!(
            result,
            Err(Error::HeaderError(HeaderError::InvalidFormatVersion {
                file: "idx",
                version: 0
            }))
        ));
        Ok(())
    }

    #[test]
    fn test_short_file_is_rejected() {
        let buf = b"ANNIDX";
        let mut cursor = Cursor::new(&buf[..]);
        assert!(matches!(
            DataHeader::from_cursor(&mut cursor),
            Err(Error::HeaderError(HeaderError::InvalidMagicNumber { file: "dbx", .. }))
        ));
    }
}
