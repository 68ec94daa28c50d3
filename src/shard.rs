//! Sealed shard files.
//!
//! A shard is one immutable file holding every posting list for one slice
//! of the token-hash space:
//!
//! ```text
//! header      32 bytes   magic, version, shard id, slot count, record width
//! hash table  H slots    32 bytes each, linear probing, load factor <= 0.7
//! data        packed fixed-width records, each list sorted by primary key
//! ```
//!
//! All integers little-endian. The file is mapped once at open; lookups
//! probe the table and hand out zero-copy ranges of the data region. A
//! shard in the Building state never has readers; the Building -> Sealed
//! transition is the atomic rename performed by the builder.

use crate::record::PostingRecord;
use crate::result::{IndexError, ResultSet};
use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const MAGIC: [u8; 4] = *b"ALXI";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 32;
pub const SLOT_SIZE: usize = 32;

/// Hash-table fill ceiling at seal time.
pub const MAX_LOAD_FACTOR: f64 = 0.7;

/// One hash-table slot. `token_hash == 0` marks an empty slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    pub token_hash: u64,
    /// Absolute file offset of the posting list
    pub offset: u64,
    /// Records materialised in the data region
    pub length_records: u32,
    /// Total-count estimator, >= length_records
    pub total_count: u32,
}

impl Slot {
    fn read(buf: &[u8]) -> Self {
        Self {
            token_hash: LittleEndian::read_u64(&buf[0..8]),
            offset: LittleEndian::read_u64(&buf[8..16]),
            length_records: LittleEndian::read_u32(&buf[16..20]),
            total_count: LittleEndian::read_u32(&buf[20..24]),
        }
    }

    pub(crate) fn write(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], self.token_hash);
        LittleEndian::write_u64(&mut buf[8..16], self.offset);
        LittleEndian::write_u32(&mut buf[16..20], self.length_records);
        LittleEndian::write_u32(&mut buf[20..24], self.total_count);
        buf[24..32].fill(0);
    }
}

/// A sealed, read-only shard.
pub struct Shard<R: PostingRecord> {
    shard_id: u32,
    path: PathBuf,
    mmap: Arc<Mmap>,
    slot_count: u64,
    _marker: PhantomData<R>,
}

impl<R: PostingRecord> std::fmt::Debug for Shard<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("shard_id", &self.shard_id)
            .field("path", &self.path)
            .field("slot_count", &self.slot_count)
            .finish()
    }
}

impl<R: PostingRecord> Shard<R> {
    /// Open and validate a sealed shard. A missing file is
    /// [`IndexError::Missing`], which is fatal at startup.
    pub fn open(path: &Path, shard_id: u32) -> Result<Self, IndexError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::Missing(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        // The shard is sealed; nothing writes to it after the rename.
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_SIZE {
            return Err(IndexError::Corrupted(format!(
                "{}: short header",
                path.display()
            )));
        }
        if mmap[0..4] != MAGIC {
            return Err(IndexError::Corrupted(format!(
                "{}: bad magic",
                path.display()
            )));
        }
        let version = LittleEndian::read_u32(&mmap[4..8]);
        if version != FORMAT_VERSION {
            return Err(IndexError::Corrupted(format!(
                "{}: unsupported format version {}",
                path.display(),
                version
            )));
        }
        let file_shard_id = LittleEndian::read_u32(&mmap[8..12]);
        if file_shard_id != shard_id {
            return Err(IndexError::Corrupted(format!(
                "{}: shard id {} does not match {}",
                path.display(),
                file_shard_id,
                shard_id
            )));
        }
        let slot_count = LittleEndian::read_u64(&mmap[12..20]);
        let record_width = LittleEndian::read_u32(&mmap[20..24]);
        if record_width as usize != R::WIDTH {
            return Err(IndexError::Corrupted(format!(
                "{}: record width {} does not match {}",
                path.display(),
                record_width,
                R::WIDTH
            )));
        }
        let table_end = HEADER_SIZE as u64 + slot_count * SLOT_SIZE as u64;
        if slot_count == 0 || table_end > mmap.len() as u64 {
            return Err(IndexError::Corrupted(format!(
                "{}: slot count {} exceeds file",
                path.display(),
                slot_count
            )));
        }

        Ok(Self {
            shard_id,
            path: path.to_path_buf(),
            mmap: Arc::new(mmap),
            slot_count,
            _marker: PhantomData,
        })
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn disk_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Probe the hash table. `None` means the token has no posting list in
    /// this shard.
    pub fn find(&self, token_hash: u64) -> Option<Slot> {
        let h = self.slot_count;
        let mut idx = token_hash % h;
        for _ in 0..h {
            let at = HEADER_SIZE + (idx as usize) * SLOT_SIZE;
            let slot = Slot::read(&self.mmap[at..at + SLOT_SIZE]);
            if slot.token_hash == 0 {
                return None;
            }
            if slot.token_hash == token_hash {
                return Some(slot);
            }
            idx = (idx + 1) % h;
        }
        None
    }

    /// Materialise the posting list behind a slot as a zero-copy view.
    pub fn load(&self, slot: &Slot) -> Result<ResultSet<R>, IndexError> {
        let start = slot.offset as usize;
        let len = slot.length_records as usize;
        let end = start.checked_add(len * R::WIDTH).ok_or_else(|| {
            IndexError::Corrupted(format!("{}: posting list overflow", self.path.display()))
        })?;
        if end > self.mmap.len() {
            return Err(IndexError::Corrupted(format!(
                "{}: posting list out of bounds",
                self.path.display()
            )));
        }
        Ok(ResultSet::mapped(
            Arc::clone(&self.mmap),
            start,
            len,
            slot.total_count as u64,
        ))
    }

    /// `find` + `load`. An absent token yields an empty result set.
    pub fn lookup(&self, token_hash: u64) -> Result<ResultSet<R>, IndexError> {
        match self.find(token_hash) {
            Some(slot) => self.load(&slot),
            None => Ok(ResultSet::empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DocRecord;
    use crate::shard_builder::ShardBuilder;
    use tempfile::tempdir;

    fn build_shard(dir: &Path, postings: &[(u64, u64, f32)]) -> PathBuf {
        let path = dir.join("0.idx");
        let mut builder = ShardBuilder::<DocRecord>::new(path.clone(), 0);
        for &(token, doc, score) in postings {
            builder.add(
                token,
                DocRecord {
                    doc_hash: doc,
                    score,
                },
            );
        }
        builder.flush().unwrap();
        path
    }

    #[test]
    fn test_open_missing() {
        let dir = tempdir().unwrap();
        let err = Shard::<DocRecord>::open(&dir.path().join("0.idx"), 0).unwrap_err();
        assert!(matches!(err, IndexError::Missing(_)));
    }

    #[test]
    fn test_find_and_load() {
        let dir = tempdir().unwrap();
        let path = build_shard(dir.path(), &[(10, 1, 1.0), (10, 5, 2.0), (20, 3, 1.5)]);
        let shard = Shard::<DocRecord>::open(&path, 0).unwrap();

        let rs = shard.lookup(10).unwrap();
        assert_eq!(rs.len(), 2);
        assert_eq!(rs.value_at(0), 1);
        assert_eq!(rs.value_at(1), 5);
        assert_eq!(rs.total_count(), 2);

        let rs = shard.lookup(20).unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(rs.record_at(0).score, 1.5);

        assert!(shard.lookup(30).unwrap().is_empty());
    }

    #[test]
    fn test_probe_collisions() {
        let dir = tempdir().unwrap();
        // 64 tokens map into 128 slots; every hash is congruent mod 128,
        // so placement and lookup both probe through a long cluster.
        let postings: Vec<(u64, u64, f32)> = (0..64).map(|i| (1 + i * 128, i, 1.0)).collect();
        let path = build_shard(dir.path(), &postings);
        let shard = Shard::<DocRecord>::open(&path, 0).unwrap();
        for &(token, doc, _) in &postings {
            let rs = shard.lookup(token).unwrap();
            assert_eq!(rs.len(), 1, "token {}", token);
            assert_eq!(rs.value_at(0), doc);
        }
    }

    #[test]
    fn test_sorted_invariant_for_every_token() {
        let dir = tempdir().unwrap();
        let mut postings = Vec::new();
        for t in 0..20u64 {
            for d in 0..30u64 {
                // insertion order deliberately scrambled
                postings.push((t * 7 + 1, (d * 2654435761) % 1000, 1.0));
            }
        }
        let path = build_shard(dir.path(), &postings);
        let shard = Shard::<DocRecord>::open(&path, 0).unwrap();
        for t in 0..20u64 {
            let rs = shard.lookup(t * 7 + 1).unwrap();
            assert!(!rs.is_empty());
            for i in 1..rs.len() {
                assert!(
                    rs.value_at(i - 1) < rs.value_at(i),
                    "strictly ascending primary keys"
                );
            }
        }
    }

    #[test]
    fn test_empty_shard() {
        let dir = tempdir().unwrap();
        let path = build_shard(dir.path(), &[]);
        let shard = Shard::<DocRecord>::open(&path, 0).unwrap();
        assert!(shard.lookup(42).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_record_width_rejected() {
        use crate::record::LinkRecord;
        let dir = tempdir().unwrap();
        let path = build_shard(dir.path(), &[(10, 1, 1.0)]);
        let err = Shard::<LinkRecord>::open(&path, 0).unwrap_err();
        assert!(matches!(err, IndexError::Corrupted(_)));
    }
}
