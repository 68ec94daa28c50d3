//! Shard construction.
//!
//! A builder accumulates postings per token hash, bounds memory with a
//! per-token cap and a resident-postings budget, and seals an immutable
//! shard file with an atomic rename. Build failures delete the temp file
//! and leave any previously sealed shard untouched.

use crate::record::PostingRecord;
use crate::result::IndexError;
use crate::shard::{Slot, FORMAT_VERSION, HEADER_SIZE, MAGIC, MAX_LOAD_FACTOR, SLOT_SIZE};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Per-token posting cap `C_post`: beyond this, the lowest-scoring
/// postings are dropped while the total-count estimator keeps counting.
pub const DEFAULT_POSTING_CAP: usize = 10_000;

/// Resident postings across all tokens before the builder spills a run.
pub const DEFAULT_MEMORY_BUDGET: usize = 8_000_000;

/// Growable posting buffer for one token.
struct TokenBuffer<R> {
    records: Vec<R>,
    /// Raw append counter, never decremented
    added: u64,
    /// Set once the cap has dropped records
    truncated: bool,
}

impl<R: PostingRecord> TokenBuffer<R> {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            added: 0,
            truncated: false,
        }
    }

    /// Sort by primary key, keep the max score per key, then enforce the
    /// cap by dropping the lowest-scoring postings.
    fn compact(&mut self, cap: usize) {
        sort_dedup_max(&mut self.records);
        if self.records.len() > cap {
            self.records
                .select_nth_unstable_by(cap, |a, b| b.score().total_cmp(&a.score()));
            self.records.truncate(cap);
            self.records.sort_unstable_by_key(|r| r.key());
            self.truncated = true;
        }
    }

    /// Estimator: exact once deduplicated, the raw counter after any
    /// truncation.
    fn total_count(&self) -> u64 {
        if self.truncated {
            self.added
        } else {
            self.records.len() as u64
        }
    }
}

/// Ascending by primary key; duplicates keep the highest score.
fn sort_dedup_max<R: PostingRecord>(records: &mut Vec<R>) {
    records.sort_unstable_by(|a, b| {
        a.key()
            .cmp(&b.key())
            .then_with(|| b.score().total_cmp(&a.score()))
    });
    records.dedup_by_key(|r| r.key());
}

/// One finished posting list headed for the hash table.
struct SealEntry<R> {
    token_hash: u64,
    total_count: u64,
    records: Vec<R>,
}

/// Builder for a single shard file.
pub struct ShardBuilder<R: PostingRecord> {
    path: PathBuf,
    shard_id: u32,
    buffers: FxHashMap<u64, TokenBuffer<R>>,
    resident: usize,
    cap: usize,
    memory_budget: usize,
    runs: Vec<PathBuf>,
    /// First spill failure; poisons the build so flush aborts.
    failed: Option<IndexError>,
}

impl<R: PostingRecord> ShardBuilder<R> {
    pub fn new(path: PathBuf, shard_id: u32) -> Self {
        Self::with_limits(path, shard_id, DEFAULT_POSTING_CAP, DEFAULT_MEMORY_BUDGET)
    }

    pub fn with_limits(path: PathBuf, shard_id: u32, cap: usize, memory_budget: usize) -> Self {
        Self {
            path,
            shard_id,
            buffers: FxHashMap::default(),
            resident: 0,
            cap: cap.max(1),
            memory_budget: memory_budget.max(1),
            runs: Vec::new(),
            failed: None,
        }
    }

    /// Append one posting. Buffers grow to twice the cap before they are
    /// compacted, so the cap costs amortised O(log n) per append.
    pub fn add(&mut self, token_hash: u64, record: R) {
        let cap = self.cap;
        let buffer = self
            .buffers
            .entry(token_hash)
            .or_insert_with(TokenBuffer::new);
        buffer.added += 1;
        let before = buffer.records.len();
        buffer.records.push(record);
        if buffer.records.len() >= cap * 2 {
            buffer.compact(cap);
        }
        self.resident += buffer.records.len();
        self.resident -= before;

        if self.resident >= self.memory_budget && self.failed.is_none() {
            if let Err(e) = self.spill() {
                log::warn!("shard {}: spill failed: {}", self.shard_id, e);
                self.failed = Some(e);
            }
        }
    }

    /// Seal the shard: merge any spilled runs, write the temp file, fsync,
    /// atomic rename. Consumes the builder; the shard is immutable after.
    pub fn flush(mut self) -> Result<(), IndexError> {
        let result = self.flush_inner();
        for run in &self.runs {
            let _ = fs::remove_file(run);
        }
        result
    }

    fn flush_inner(&mut self) -> Result<(), IndexError> {
        if let Some(e) = self.failed.take() {
            return Err(e);
        }
        let mut entries = self.drain_entries();
        if !self.runs.is_empty() {
            // Spill the tail so the merge sees every posting exactly once.
            self.write_run(&mut entries)?;
            entries = self.merge_runs()?;
        }
        write_shard(&self.path, self.shard_id, &mut entries)
    }

    /// Move the in-memory state into compacted seal entries, sorted by
    /// token hash.
    fn drain_entries(&mut self) -> Vec<SealEntry<R>> {
        let cap = self.cap;
        let mut entries: Vec<SealEntry<R>> = self
            .buffers
            .drain()
            .map(|(token_hash, mut buffer)| {
                buffer.compact(cap);
                SealEntry {
                    token_hash,
                    total_count: buffer.total_count(),
                    records: buffer.records,
                }
            })
            .collect();
        entries.sort_unstable_by_key(|e| e.token_hash);
        self.resident = 0;
        entries
    }

    /// Write the current state as a sorted run file and reset.
    fn spill(&mut self) -> Result<(), IndexError> {
        let mut entries = self.drain_entries();
        self.write_run(&mut entries)
    }

    fn run_path(&self, n: usize) -> PathBuf {
        let mut os = self.path.as_os_str().to_owned();
        os.push(format!(".run{}", n));
        PathBuf::from(os)
    }

    fn write_run(&mut self, entries: &mut Vec<SealEntry<R>>) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }
        let path = self.run_path(self.runs.len());
        let file = File::create(&path)?;
        let mut writer = BufWriter::with_capacity(1 << 20, file);
        for entry in entries.iter() {
            writer.write_u64::<LittleEndian>(entry.token_hash)?;
            writer.write_u64::<LittleEndian>(entry.total_count)?;
            writer.write_u32::<LittleEndian>(entry.records.len() as u32)?;
            // truncated is recoverable: total_count > len
            for record in &entry.records {
                record.write_to(&mut writer)?;
            }
        }
        writer.flush()?;
        entries.clear();
        self.runs.push(path);
        Ok(())
    }

    /// K-way merge of the spilled runs, keyed by token hash; posting lists
    /// for the same token are re-merged with score-max on duplicate keys
    /// and the cap re-applied.
    fn merge_runs(&mut self) -> Result<Vec<SealEntry<R>>, IndexError> {
        let mut readers = Vec::with_capacity(self.runs.len());
        for path in &self.runs {
            readers.push(RunReader::<R>::open(path)?);
        }

        let mut heap: BinaryHeap<Reverse<(u64, usize)>> = BinaryHeap::new();
        for (i, reader) in readers.iter().enumerate() {
            if let Some(hash) = reader.peek_hash() {
                heap.push(Reverse((hash, i)));
            }
        }

        let mut entries: Vec<SealEntry<R>> = Vec::new();
        while let Some(&Reverse((hash, _))) = heap.peek() {
            let mut records: Vec<R> = Vec::new();
            let mut added_total: u64 = 0;
            let mut truncated = false;

            while let Some(&Reverse((h, i))) = heap.peek() {
                if h != hash {
                    break;
                }
                heap.pop();
                let entry = readers[i].take()?;
                truncated |= entry.total_count > entry.records.len() as u64;
                added_total += entry.total_count;
                records.extend(entry.records);
                if let Some(next) = readers[i].peek_hash() {
                    heap.push(Reverse((next, i)));
                }
            }

            sort_dedup_max(&mut records);
            if records.len() > self.cap {
                records.select_nth_unstable_by(self.cap, |a, b| b.score().total_cmp(&a.score()));
                records.truncate(self.cap);
                records.sort_unstable_by_key(|r| r.key());
                truncated = true;
            }
            let total_count = if truncated {
                added_total
            } else {
                records.len() as u64
            };
            entries.push(SealEntry {
                token_hash: hash,
                total_count,
                records,
            });
        }
        Ok(entries)
    }
}

/// Streaming reader over one spilled run.
struct RunReader<R: PostingRecord> {
    reader: BufReader<File>,
    next: Option<SealEntry<R>>,
}

impl<R: PostingRecord> RunReader<R> {
    fn open(path: &Path) -> Result<Self, IndexError> {
        let file = File::open(path)?;
        let mut r = Self {
            reader: BufReader::with_capacity(1 << 20, file),
            next: None,
        };
        r.advance()?;
        Ok(r)
    }

    fn peek_hash(&self) -> Option<u64> {
        self.next.as_ref().map(|e| e.token_hash)
    }

    fn take(&mut self) -> Result<SealEntry<R>, IndexError> {
        let entry = self.next.take().expect("take past end of run");
        self.advance()?;
        Ok(entry)
    }

    fn advance(&mut self) -> Result<(), IndexError> {
        let token_hash = match self.reader.read_u64::<LittleEndian>() {
            Ok(h) => h,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.next = None;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let total_count = self.reader.read_u64::<LittleEndian>()?;
        let len = self.reader.read_u32::<LittleEndian>()? as usize;
        let mut buf = vec![0u8; R::WIDTH];
        let mut records = Vec::with_capacity(len);
        for _ in 0..len {
            self.reader.read_exact(&mut buf)?;
            records.push(R::read_from(&buf));
        }
        self.next = Some(SealEntry {
            token_hash,
            total_count,
            records,
        });
        Ok(())
    }
}

/// Slot count: next power of two keeping the load factor under the ceiling.
fn slot_count_for(tokens: usize) -> u64 {
    let min = ((tokens as f64 / MAX_LOAD_FACTOR).ceil() as u64).max(1);
    min.next_power_of_two()
}

/// Write header, hash table and data region to `<path>.tmp`, fsync, then
/// atomically rename over `path`.
fn write_shard<R: PostingRecord>(
    path: &Path,
    shard_id: u32,
    entries: &mut [SealEntry<R>],
) -> Result<(), IndexError> {
    let tmp = {
        let mut os = path.as_os_str().to_owned();
        os.push(".tmp");
        PathBuf::from(os)
    };

    let result = write_shard_file(&tmp, shard_id, entries);
    match result {
        Ok(()) => {
            fs::rename(&tmp, path)?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

fn write_shard_file<R: PostingRecord>(
    tmp: &Path,
    shard_id: u32,
    entries: &mut [SealEntry<R>],
) -> Result<(), IndexError> {
    entries.sort_unstable_by_key(|e| e.token_hash);

    let slot_count = slot_count_for(entries.len());
    let data_start = HEADER_SIZE as u64 + slot_count * SLOT_SIZE as u64;

    // Place every token by linear probing; token hashes are unique here.
    let mut slots: Vec<Slot> = vec![
        Slot {
            token_hash: 0,
            offset: 0,
            length_records: 0,
            total_count: 0,
        };
        slot_count as usize
    ];
    let mut offset = data_start;
    for entry in entries.iter() {
        let mut idx = (entry.token_hash % slot_count) as usize;
        while slots[idx].token_hash != 0 {
            idx = (idx + 1) % slot_count as usize;
        }
        slots[idx] = Slot {
            token_hash: entry.token_hash,
            offset,
            length_records: entry.records.len() as u32,
            total_count: entry.total_count.min(u32::MAX as u64) as u32,
        };
        offset += (entry.records.len() * R::WIDTH) as u64;
    }

    let file = File::create(tmp)?;
    let mut writer = BufWriter::with_capacity(1 << 20, file);

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&MAGIC);
    LittleEndian::write_u32(&mut header[4..8], FORMAT_VERSION);
    LittleEndian::write_u32(&mut header[8..12], shard_id);
    LittleEndian::write_u64(&mut header[12..20], slot_count);
    LittleEndian::write_u32(&mut header[20..24], R::WIDTH as u32);
    writer.write_all(&header)?;

    let mut slot_buf = [0u8; SLOT_SIZE];
    for slot in &slots {
        slot.write(&mut slot_buf);
        writer.write_all(&slot_buf)?;
    }

    for entry in entries.iter() {
        for record in &entry.records {
            record.write_to(&mut writer)?;
        }
    }

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}
