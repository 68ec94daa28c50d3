//! Result types and error taxonomy.

use crate::record::PostingRecord;
use memmap2::Mmap;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// Outcome status surfaced in every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Timeout,
    Degraded,
    Error,
}

impl Status {
    /// Keep the worst status seen so far; timeout outranks degraded.
    pub fn worsen(&mut self, other: Status) {
        let rank = |s: Status| match s {
            Status::Success => 0,
            Status::Degraded => 1,
            Status::Timeout => 2,
            Status::Error => 3,
        };
        if rank(other) > rank(*self) {
            *self = other;
        }
    }
}

/// One posting list materialised for a query, backed by the shard's mapping
/// or by an owned buffer. Records stay packed bytes; cursors decode on
/// demand.
pub struct ResultSet<R: PostingRecord> {
    data: ResultData,
    len: usize,
    total_count: u64,
    _marker: PhantomData<R>,
}

enum ResultData {
    Empty,
    Mapped { mmap: Arc<Mmap>, start: usize },
    Owned(Vec<u8>),
}

impl<R: PostingRecord> ResultSet<R> {
    pub fn empty() -> Self {
        Self {
            data: ResultData::Empty,
            len: 0,
            total_count: 0,
            _marker: PhantomData,
        }
    }

    /// Zero-copy view into a sealed shard's data region. The caller has
    /// bounds-checked `start .. start + len * WIDTH` against the mapping.
    pub(crate) fn mapped(mmap: Arc<Mmap>, start: usize, len: usize, total_count: u64) -> Self {
        Self {
            data: ResultData::Mapped { mmap, start },
            len,
            total_count,
            _marker: PhantomData,
        }
    }

    /// Build from records already in memory. Test and merge paths.
    pub fn from_records(records: &[R], total_count: u64) -> Self {
        let mut buf = Vec::with_capacity(records.len() * R::WIDTH);
        for r in records {
            // Vec<u8> writes cannot fail
            r.write_to(&mut buf).expect("in-memory write");
        }
        Self {
            data: ResultData::Owned(buf),
            len: records.len(),
            total_count,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of documents that ever contained the token; exceeds `len`
    /// exactly when the posting list was truncated at build time.
    #[inline]
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.total_count > self.len as u64
    }

    /// Raw packed record bytes.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        match &self.data {
            ResultData::Empty => &[],
            ResultData::Mapped { mmap, start } => &mmap[*start..*start + self.len * R::WIDTH],
            ResultData::Owned(buf) => buf,
        }
    }

    /// Primary key at position `i`.
    #[inline]
    pub fn value_at(&self, i: usize) -> u64 {
        R::key_in(&self.bytes()[i * R::WIDTH..])
    }

    /// Full record at position `i`.
    #[inline]
    pub fn record_at(&self, i: usize) -> R {
        R::read_from(&self.bytes()[i * R::WIDTH..(i + 1) * R::WIDTH])
    }

    pub fn records(&self) -> impl Iterator<Item = R> + '_ {
        (0..self.len).map(move |i| self.record_at(i))
    }
}

/// Search counters reported alongside the ranked results.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SearchMetrics {
    pub total_found: u64,
    pub total_url_links_found: u64,
    pub total_domain_links_found: u64,
    pub link_url_matches: u64,
}

/// One matched document before resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedDoc {
    pub doc_hash: u64,
    pub score: f32,
}

/// A resolved search hit ready for the response body.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub score: f32,
}

/// Errors on the build/open path. Builds are strict: the first I/O failure
/// aborts and leaves the previous sealed shard in place.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index missing at {0}")]
    Missing(String),

    #[error("shard corrupted: {0}")]
    Corrupted(String),

    #[error("another writer holds {0}")]
    Locked(String),

    #[error("snippet store: {0}")]
    Store(#[from] sled::Error),
}

/// Errors surfaced to the query path. Everything else degrades to an empty
/// posting list and a logged warning.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("malformed query: {0}")]
    MalformedQuery(String),
}

impl From<crate::tokenizer::TokenizeError> for SearchError {
    fn from(e: crate::tokenizer::TokenizeError) -> Self {
        SearchError::MalformedQuery(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DocRecord;

    fn set(keys: &[u64]) -> ResultSet<DocRecord> {
        let records: Vec<DocRecord> = keys
            .iter()
            .map(|&k| DocRecord {
                doc_hash: k,
                score: 1.0,
            })
            .collect();
        ResultSet::from_records(&records, keys.len() as u64)
    }

    #[test]
    fn test_cursors() {
        let rs = set(&[3, 7, 9]);
        assert_eq!(rs.len(), 3);
        assert_eq!(rs.value_at(1), 7);
        assert_eq!(rs.record_at(2).doc_hash, 9);
        assert!(!rs.is_truncated());
    }

    #[test]
    fn test_truncated_flag() {
        let records = [DocRecord {
            doc_hash: 1,
            score: 1.0,
        }];
        let rs = ResultSet::from_records(&records, 5);
        assert!(rs.is_truncated());
        assert_eq!(rs.total_count(), 5);
    }

    #[test]
    fn test_status_worsen() {
        let mut s = Status::Success;
        s.worsen(Status::Degraded);
        assert_eq!(s, Status::Degraded);
        s.worsen(Status::Timeout);
        assert_eq!(s, Status::Timeout);
        s.worsen(Status::Degraded);
        assert_eq!(s, Status::Timeout);
    }
}
