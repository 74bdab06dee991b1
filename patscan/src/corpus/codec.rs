//! Length-prefixed framing for batches of optional records.
//!
//! Frame format (all integers little-endian `u64`):
//!
//! ```text
//! +-------+------+-----------+------+-----------+-----
//! | count | tag0 | payload0  | tag1 | payload1  | ...
//! +-------+------+-----------+------+-----------+-----
//! ```
//!
//! A tag of `0` is a null placeholder with no payload; a tag of `n > 0` is a
//! present record followed by `n - 1` payload bytes, so an empty record and
//! a null one stay distinct.
use crate::errors::{ScanError, ScanResult};

const WORD: usize = std::mem::size_of::<u64>();

/// Encodes `records` into one frame
pub fn encode_frame(records: &[Option<Vec<u8>>]) -> Vec<u8> {
    let payload: usize = records.iter().flatten().map(Vec::len).sum();
    let mut out = Vec::with_capacity(WORD * (records.len() + 1) + payload);
    out.extend_from_slice(&(records.len() as u64).to_le_bytes());
    for record in records {
        match record {
            None => out.extend_from_slice(&0u64.to_le_bytes()),
            Some(bytes) => {
                out.extend_from_slice(&(bytes.len() as u64 + 1).to_le_bytes());
                out.extend_from_slice(bytes);
            }
        }
    }
    out
}

/// Decodes a frame produced by [`encode_frame`] into freshly allocated records
pub fn decode_frame(frame: &[u8]) -> ScanResult<Vec<Option<Vec<u8>>>> {
    let mut reader = FrameReader { buf: frame, pos: 0 };
    let count = reader.read_len("record count")?;
    // Each record needs at least its tag, which bounds a corrupt count
    if count > reader.remaining() / WORD {
        return Err(ScanError::protocol(format!(
            "frame claims {} records but holds {} bytes",
            count,
            reader.remaining()
        )));
    }

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let tag = reader.read_len("record tag")?;
        let record = match tag {
            0 => None,
            n => Some(reader.read_bytes(n - 1)?.to_vec()),
        };
        records.push(record);
    }

    if reader.remaining() != 0 {
        return Err(ScanError::protocol(format!(
            "{} trailing bytes after frame at offset {}",
            reader.remaining(),
            reader.pos
        )));
    }
    Ok(records)
}

struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_bytes(&mut self, len: usize) -> ScanResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(ScanError::protocol(format!(
                "truncated frame: need {} bytes at offset {}, have {}",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_len(&mut self, field: &'static str) -> ScanResult<usize> {
        let raw: [u8; WORD] = self
            .read_bytes(WORD)?
            .try_into()
            .map_err(|_| ScanError::protocol(format!("short {}", field)))?;
        usize::try_from(u64::from_le_bytes(raw))
            .map_err(|_| ScanError::protocol(format!("{} does not fit in memory", field)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_and_empty_records_stay_distinct() {
        let records = vec![None, Some(Vec::new()), Some(b"abc".to_vec())];
        let frame = encode_frame(&records);
        assert_eq!(frame.len(), 8 + 8 + 8 + 8 + 3);
        assert_eq!(decode_frame(&frame).unwrap(), records);
    }

    #[test]
    fn test_empty_frame() {
        let frame = encode_frame(&[]);
        assert_eq!(frame, 0u64.to_le_bytes());
        assert!(decode_frame(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_truncated_frame() {
        let frame = encode_frame(&[Some(b"abcdef".to_vec())]);
        let err = decode_frame(&frame[..frame.len() - 2]).unwrap_err();
        assert!(matches!(err, ScanError::Protocol(_)));
        assert!(decode_frame(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut frame = encode_frame(&[None]);
        frame.push(0);
        assert!(matches!(decode_frame(&frame), Err(ScanError::Protocol(_))));
    }

    #[test]
    fn test_rejects_inflated_count() {
        let mut frame = encode_frame(&[None]);
        frame[..8].copy_from_slice(&1000u64.to_le_bytes());
        assert!(matches!(decode_frame(&frame), Err(ScanError::Protocol(_))));
    }
}
