//! Fixed-width posting records.
//!
//! Every index family stores one record type as a packed little-endian
//! array. The first eight bytes of any record are its primary key, which is
//! what lets the intersection loop scan raw byte ranges without decoding
//! full records.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};

/// A fixed-width record stored in a shard's data region.
///
/// `WIDTH` is the exact on-disk size; `read_from` is handed exactly that
/// many bytes. The primary key must be serialised first so `key_in` can
/// peek at it without a full decode.
pub trait PostingRecord: Copy + Send + Sync + 'static {
    const WIDTH: usize;

    /// Primary key: the intersection axis for this index family.
    fn key(&self) -> u64;

    /// Relevance contribution carried by the posting.
    fn score(&self) -> f32;

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()>;

    fn read_from(buf: &[u8]) -> Self;

    /// Primary key of the record starting at `buf`, without decoding.
    #[inline]
    fn key_in(buf: &[u8]) -> u64 {
        u64::from_le_bytes(buf[..8].try_into().unwrap())
    }
}

/// Main-index posting: one document containing one token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocRecord {
    pub doc_hash: u64,
    pub score: f32,
}

impl PostingRecord for DocRecord {
    const WIDTH: usize = 12;

    #[inline]
    fn key(&self) -> u64 {
        self.doc_hash
    }

    #[inline]
    fn score(&self) -> f32 {
        self.score
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.doc_hash)?;
        w.write_f32::<LittleEndian>(self.score)
    }

    #[inline]
    fn read_from(buf: &[u8]) -> Self {
        let mut r = buf;
        Self {
            doc_hash: r.read_u64::<LittleEndian>().unwrap(),
            score: r.read_f32::<LittleEndian>().unwrap(),
        }
    }
}

/// Link-index posting: one link whose anchor text contained one token.
///
/// Used by both link families. For URL links `value` is the link identity
/// hash; for domain links it is the domain-pair hash. The endpoint fields
/// are carried so score joins never consult the resolver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkRecord {
    pub value: u64,
    pub source_hash: u64,
    pub target_hash: u64,
    pub source_domain: u64,
    pub target_domain: u64,
    pub score: f32,
}

impl PostingRecord for LinkRecord {
    const WIDTH: usize = 44;

    #[inline]
    fn key(&self) -> u64 {
        self.value
    }

    #[inline]
    fn score(&self) -> f32 {
        self.score
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.value)?;
        w.write_u64::<LittleEndian>(self.source_hash)?;
        w.write_u64::<LittleEndian>(self.target_hash)?;
        w.write_u64::<LittleEndian>(self.source_domain)?;
        w.write_u64::<LittleEndian>(self.target_domain)?;
        w.write_f32::<LittleEndian>(self.score)
    }

    #[inline]
    fn read_from(buf: &[u8]) -> Self {
        let mut r = buf;
        Self {
            value: r.read_u64::<LittleEndian>().unwrap(),
            source_hash: r.read_u64::<LittleEndian>().unwrap(),
            target_hash: r.read_u64::<LittleEndian>().unwrap(),
            source_domain: r.read_u64::<LittleEndian>().unwrap(),
            target_domain: r.read_u64::<LittleEndian>().unwrap(),
            score: r.read_f32::<LittleEndian>().unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_record_codec() {
        let rec = DocRecord {
            doc_hash: 0xDEAD_BEEF_0042,
            score: 2.5,
        };
        let mut buf = Vec::new();
        rec.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), DocRecord::WIDTH);
        assert_eq!(DocRecord::read_from(&buf), rec);
        assert_eq!(DocRecord::key_in(&buf), rec.doc_hash);
    }

    #[test]
    fn test_link_record_codec() {
        let rec = LinkRecord {
            value: 7,
            source_hash: 11,
            target_hash: 13,
            source_domain: 17,
            target_domain: 19,
            score: 0.5,
        };
        let mut buf = Vec::new();
        rec.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), LinkRecord::WIDTH);
        assert_eq!(LinkRecord::read_from(&buf), rec);
        assert_eq!(LinkRecord::key_in(&buf), rec.value);
    }

    #[test]
    fn test_little_endian_layout() {
        let rec = DocRecord {
            doc_hash: 0x0102_0304_0506_0708,
            score: 0.0,
        };
        let mut buf = Vec::new();
        rec.write_to(&mut buf).unwrap();
        assert_eq!(&buf[..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
    }
}
