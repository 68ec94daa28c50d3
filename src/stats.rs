//! Per-token document-frequency statistics.

use crate::hash::hash64;
use crate::index::Index;
use crate::record::PostingRecord;
use crate::result::Status;
use crate::tokenizer::Tokenizer;
use serde::Serialize;
use std::collections::BTreeMap;

/// Document frequency of each query word against one index family.
#[derive(Debug, Clone, Serialize)]
pub struct WordStats {
    /// word → document frequency in [0, 1], estimator-based
    pub words: BTreeMap<String, f64>,
    /// documents (or links) behind the index
    pub total: u64,
}

/// Compute frequencies for the unigrams of `phrase`. Uses the total-count
/// estimator, which is exact for lists the builder never capped.
pub fn word_stats<R: PostingRecord>(
    tokenizer: &Tokenizer,
    index: &Index<R>,
    total: u64,
    phrase: &str,
    status: &mut Status,
) -> WordStats {
    let mut words = BTreeMap::new();
    for word in tokenizer.words(phrase) {
        if words.contains_key(&word) {
            continue;
        }
        let count = match index.lookup(hash64(word.as_bytes())) {
            Ok(rs) => rs.total_count(),
            Err(e) => {
                log::warn!("{}: stats lookup for {:?} failed: {}", index.name(), word, e);
                status.worsen(Status::Degraded);
                0
            }
        };
        let frequency = if total > 0 {
            count as f64 / total as f64
        } else {
            0.0
        };
        words.insert(word, frequency);
    }
    WordStats { words, total }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::shard_path;
    use crate::record::DocRecord;
    use crate::shard_builder::ShardBuilder;
    use tempfile::tempdir;

    #[test]
    fn test_word_frequencies() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("main_index")).unwrap();
        let num_shards = 2usize;
        let mut builders: Vec<ShardBuilder<DocRecord>> = (0..num_shards as u32)
            .map(|id| ShardBuilder::new(shard_path(dir.path(), "main_index", id), id))
            .collect();

        // "common" in all 8 documents, "rare" in one
        for doc in 1..=8u64 {
            let h = hash64(b"common");
            builders[(h % 2) as usize].add(
                h,
                DocRecord {
                    doc_hash: doc,
                    score: 1.0,
                },
            );
        }
        let h = hash64(b"rare");
        builders[(h % 2) as usize].add(
            h,
            DocRecord {
                doc_hash: 3,
                score: 1.0,
            },
        );
        for b in builders {
            b.flush().unwrap();
        }

        let index = crate::index::Index::<DocRecord>::open(dir.path(), "main_index", 2).unwrap();
        let mut status = Status::Success;
        let stats = word_stats(&Tokenizer::default(), &index, 8, "Common rare missing", &mut status);

        assert_eq!(status, Status::Success);
        assert_eq!(stats.total, 8);
        assert_eq!(stats.words["common"], 1.0);
        assert_eq!(stats.words["rare"], 0.125);
        assert_eq!(stats.words["missing"], 0.0);
    }
}
