//! Interval store codec
//!
//! Encoding and decoding routines shared by the builder and the reader. All
//! integers are little-endian; strings are a `u32` byte length followed by the
//! raw bytes.
//!
//! ```text
//! string   := len:u32 bytes[len]
//! payload  := accession:string strand:u8 (present:u8 class_id:i32){n_classes}
//! interval := start:i32 end:i32 payload
//! block    := count:i32 interval{count}
//! ```

use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    error::{ReadError, Result, WriteError},
    record::{IntervalAnnotation, Payload},
};

/// Maps an early end-of-buffer to a truncation error at the cursor position
fn truncation(err: io::Error, cursor: &Cursor<&[u8]>) -> crate::Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ReadError::FileTruncation(cursor.position() as usize).into()
    } else {
        err.into()
    }
}

/// Checks that a count fits in the signed 32-bit count fields of the format
pub fn checked_count(count: usize, what: &'static str) -> Result<i32> {
    i32::try_from(count).map_err(|_| WriteError::CountOverflow { what, got: count }.into())
}

pub fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    let Ok(len) = u32::try_from(bytes.len()) else {
        return Err(WriteError::StringTooLong(bytes.len()).into());
    };
    writer.write_u32::<LittleEndian>(len)?;
    writer.write_all(bytes)?;
    Ok(())
}

pub fn read_bytes(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let len = read_u32(cursor)? as usize;
    let pos = cursor.position() as usize;
    let remaining = cursor.get_ref().len().saturating_sub(pos);
    if len > remaining {
        return Err(ReadError::FileTruncation(cursor.get_ref().len()).into());
    }
    let mut buf = vec![0; len];
    cursor.read_exact(&mut buf).map_err(|e| truncation(e, cursor))?;
    Ok(buf)
}

pub fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let pos = cursor.position() as usize;
    let bytes = read_bytes(cursor)?;
    String::from_utf8(bytes).map_err(|_| ReadError::InvalidString(pos).into())
}

pub fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| truncation(e, cursor))
}

pub fn read_i32(cursor: &mut Cursor<&[u8]>) -> Result<i32> {
    cursor
        .read_i32::<LittleEndian>()
        .map_err(|e| truncation(e, cursor))
}

pub fn read_i64(cursor: &mut Cursor<&[u8]>) -> Result<i64> {
    cursor
        .read_i64::<LittleEndian>()
        .map_err(|e| truncation(e, cursor))
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    cursor.read_u8().map_err(|e| truncation(e, cursor))
}

/// Writes a payload with exactly `n_classes` classification slots
pub fn encode_payload<W: Write>(writer: &mut W, payload: &Payload, n_classes: usize) -> Result<()> {
    if payload.class_ids.len() != n_classes {
        return Err(WriteError::PayloadShape {
            expected: n_classes,
            got: payload.class_ids.len(),
        }
        .into());
    }
    write_bytes(writer, &payload.accession)?;
    writer.write_u8(u8::from(payload.reverse))?;
    for class_id in &payload.class_ids {
        writer.write_u8(u8::from(class_id.is_some()))?;
        writer.write_i32::<LittleEndian>(class_id.unwrap_or(0))?;
    }
    Ok(())
}

pub fn decode_payload(cursor: &mut Cursor<&[u8]>, n_classes: usize) -> Result<Payload> {
    let accession = read_bytes(cursor)?;
    let reverse = read_u8(cursor)? != 0;
    let mut class_ids = Vec::with_capacity(n_classes);
    for _ in 0..n_classes {
        let present = read_u8(cursor)? != 0;
        let class_id = read_i32(cursor)?;
        class_ids.push(present.then_some(class_id));
    }
    Ok(Payload {
        accession,
        reverse,
        class_ids,
    })
}

pub fn encode_interval<W: Write>(
    writer: &mut W,
    interval: &IntervalAnnotation,
    n_classes: usize,
) -> Result<()> {
    writer.write_i32::<LittleEndian>(interval.start)?;
    writer.write_i32::<LittleEndian>(interval.end)?;
    encode_payload(writer, &interval.payload, n_classes)
}

pub fn decode_interval(cursor: &mut Cursor<&[u8]>, n_classes: usize) -> Result<IntervalAnnotation> {
    let start = read_i32(cursor)?;
    let end = read_i32(cursor)?;
    let payload = decode_payload(cursor, n_classes)?;
    Ok(IntervalAnnotation::new(start, end, payload))
}

/// Writes the interval count followed by the intervals in slice order
pub fn encode_block<W: Write>(
    writer: &mut W,
    intervals: &[IntervalAnnotation],
    n_classes: usize,
) -> Result<()> {
    let count = checked_count(intervals.len(), "intervals")?;
    writer.write_i32::<LittleEndian>(count)?;
    intervals
        .iter()
        .try_for_each(|interval| encode_interval(writer, interval, n_classes))
}

/// Reads one reference block starting at the cursor position
pub fn decode_block(cursor: &mut Cursor<&[u8]>, n_classes: usize) -> Result<Vec<IntervalAnnotation>> {
    let pos = cursor.position() as usize;
    let count = read_i32(cursor)?;
    let Ok(count) = usize::try_from(count) else {
        return Err(ReadError::InvalidIntervalCount { count, pos }.into());
    };
    // each interval needs at least 13 bytes, so cap the preallocation by the buffer
    let bound = cursor.get_ref().len().saturating_sub(pos) / 13;
    let mut intervals = Vec::with_capacity(count.min(bound));
    for _ in 0..count {
        intervals.push(decode_interval(cursor, n_classes)?);
    }
    Ok(intervals)
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::Error;

    fn sample(start: i32, end: i32, acc: &str) -> IntervalAnnotation {
        IntervalAnnotation::new(start, end, Payload::new(acc, false, vec![Some(7), None]))
    }

    #[test]
    fn test_block_roundtrip() -> anyhow::Result<()> {
        let intervals = vec![sample(10, 20, "P1"), sample(15, 40, "P2")];
        let mut buf = Vec::new();
        encode_block(&mut buf, &intervals, 2)?;

        let mut cursor = Cursor::new(buf.as_slice());
        let decoded = decode_block(&mut cursor, 2)?;
        assert_eq!(decoded, intervals);
        assert_eq!(cursor.position() as usize, buf.len());
        Ok(())
    }

    #[test]
    fn test_payload_layout() -> anyhow::Result<()> {
        let payload = Payload::new("AB", true, vec![Some(-3)]);
        let mut buf = Vec::new();
        encode_payload(&mut buf, &payload, 1)?;
        assert_eq!(buf, vec![2, 0, 0, 0, b'A', b'B', 1, 1, 0xfd, 0xff, 0xff, 0xff]);
        Ok(())
    }

    #[test]
    fn test_payload_shape_is_checked() {
        let payload = Payload::new("AB", false, vec![Some(1)]);
        let result = encode_payload(&mut Vec::new(), &payload, 2);
        assert!(matches!(
            result,
            Err(Error::WriteError(WriteError::PayloadShape {
                expected: 2,
                got: 1
            }))
        ));
    }

    #[test]
    fn test_truncated_block() -> anyhow::Result<()> {
        let mut buf = Vec::new();
        encode_block(&mut buf, &[sample(1, 5, "P1")], 2)?;
        buf.truncate(buf.len() - 3);

        let mut cursor = Cursor::new(buf.as_slice());
        let result = decode_block(&mut cursor, 2);
        assert!(matches!(
            result,
            Err(Error::ReadError(ReadError::FileTruncation(_)))
        ));
        Ok(())
    }

    #[test]
    fn test_negative_count() {
        let buf = (-1i32).to_le_bytes();
        let mut cursor = Cursor::new(&buf[..]);
        let result = decode_block(&mut cursor, 0);
        assert!(matches!(
            result,
            Err(Error::ReadError(ReadError::InvalidIntervalCount { count: -1, pos: 0 }))
        ));
    }
}
