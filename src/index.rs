//! Index fan-out over a fixed set of shards.
//!
//! An `Index<R>` owns N sealed shards under one directory and routes a
//! token hash to exactly one of them by modulo. Shard handles are
//! reference-counted so query workers share them without copying; a
//! rebuild that renames a new file into place leaves existing handles on
//! the old mapping until they drop.

use crate::record::PostingRecord;
use crate::result::{IndexError, ResultSet};
use crate::shard::Shard;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A fixed set of shards sharing one logical name.
pub struct Index<R: PostingRecord> {
    name: String,
    shards: Vec<Arc<Shard<R>>>,
}

impl<R: PostingRecord> std::fmt::Debug for Index<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name)
            .field("shards", &self.shards)
            .finish()
    }
}

/// `<root>/<name>/<shard_id>.idx`
pub fn shard_path(root: &Path, name: &str, shard_id: u32) -> PathBuf {
    root.join(name).join(format!("{}.idx", shard_id))
}

impl<R: PostingRecord> Index<R> {
    /// Open all N shards. Any missing or corrupt shard file fails the open;
    /// a missing index is fatal at startup, not at query time.
    pub fn open(root: &Path, name: &str, num_shards: usize) -> Result<Self, IndexError> {
        let dir = root.join(name);
        if !dir.is_dir() {
            return Err(IndexError::Missing(dir.display().to_string()));
        }
        let mut shards = Vec::with_capacity(num_shards);
        for shard_id in 0..num_shards as u32 {
            let shard = Shard::open(&shard_path(root, name, shard_id), shard_id)?;
            shards.push(Arc::new(shard));
        }
        log::info!("opened index {} with {} shards", name, num_shards);
        Ok(Self {
            name: name.to_string(),
            shards,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// The single shard responsible for a token hash.
    #[inline]
    pub fn route(&self, token_hash: u64) -> &Arc<Shard<R>> {
        &self.shards[(token_hash % self.shards.len() as u64) as usize]
    }

    /// Fetch the posting list for one token: exactly one shard consulted.
    pub fn lookup(&self, token_hash: u64) -> Result<ResultSet<R>, IndexError> {
        self.route(token_hash).lookup(token_hash)
    }

    pub fn disk_size(&self) -> u64 {
        self.shards.iter().map(|s| s.disk_size()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DocRecord;
    use crate::shard_builder::ShardBuilder;
    use tempfile::tempdir;

    fn build_index(root: &Path, name: &str, num_shards: usize, postings: &[(u64, u64, f32)]) {
        std::fs::create_dir_all(root.join(name)).unwrap();
        let mut builders: Vec<ShardBuilder<DocRecord>> = (0..num_shards as u32)
            .map(|id| ShardBuilder::new(shard_path(root, name, id), id))
            .collect();
        for &(token, doc_hash, score) in postings {
            builders[(token % num_shards as u64) as usize]
                .add(token, DocRecord { doc_hash, score });
        }
        for builder in builders {
            builder.flush().unwrap();
        }
    }

    #[test]
    fn test_missing_index_fatal() {
        let dir = tempdir().unwrap();
        let err = Index::<DocRecord>::open(dir.path(), "main_index", 2).unwrap_err();
        assert!(matches!(err, IndexError::Missing(_)));
    }

    #[test]
    fn test_routing_partitions_tokens() {
        let dir = tempdir().unwrap();
        let num_shards = 4;
        let postings: Vec<(u64, u64, f32)> =
            (1..200u64).map(|t| (t * 31 + 7, t, 1.0)).collect();
        build_index(dir.path(), "main_index", num_shards, &postings);

        let index = Index::<DocRecord>::open(dir.path(), "main_index", num_shards).unwrap();
        for &(token, doc_hash, _) in &postings {
            // the posting lives in shard token % N and nowhere else
            for (id, shard) in index.shards.iter().enumerate() {
                let rs = shard.lookup(token).unwrap();
                if id as u64 == token % num_shards as u64 {
                    assert_eq!(rs.len(), 1);
                    assert_eq!(rs.value_at(0), doc_hash);
                } else {
                    assert!(rs.is_empty());
                }
            }
            assert_eq!(index.lookup(token).unwrap().value_at(0), doc_hash);
        }
    }

    #[test]
    fn test_disk_size() {
        let dir = tempdir().unwrap();
        build_index(dir.path(), "main_index", 2, &[(1, 1, 1.0), (2, 2, 1.0)]);
        let index = Index::<DocRecord>::open(dir.path(), "main_index", 2).unwrap();
        assert!(index.disk_size() > 0);
    }
}
