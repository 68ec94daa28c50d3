//! Per-worker scratch buffers.
//!
//! Each query worker owns one allocation and resets it at the start of
//! every request, so capacity survives across queries and the request path
//! stays allocation-quiet. Never shared between threads.

use crate::record::DocRecord;
use crate::result::RankedDoc;

pub struct SearchAllocation {
    /// Match positions into the driver result set
    pub matches: Vec<usize>,
    /// Link-search match positions, reused per link family
    pub link_matches: Vec<usize>,
    /// Matched documents with combined scores
    pub docs: Vec<RankedDoc>,
    /// Score copy for the nth-element partition
    pub scores: Vec<f32>,
    /// Raw matched records for the binary ids response
    pub records: Vec<DocRecord>,
}

impl SearchAllocation {
    pub fn new() -> Self {
        Self {
            matches: Vec::with_capacity(1024),
            link_matches: Vec::with_capacity(1024),
            docs: Vec::with_capacity(1024),
            scores: Vec::with_capacity(1024),
            records: Vec::with_capacity(1024),
        }
    }

    /// Clear everything, keeping capacity.
    pub fn reset(&mut self) {
        self.matches.clear();
        self.link_matches.clear();
        self.docs.clear();
        self.scores.clear();
        self.records.clear();
    }
}

impl Default for SearchAllocation {
    fn default() -> Self {
        Self::new()
    }
}
