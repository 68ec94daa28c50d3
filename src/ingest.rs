//! Batch ingestion: documents into the main index, links into the two
//! link families.
//!
//! Document streams are tab-separated `(url, title, h1, meta, text)`
//! tuples; every column is tokenised with its own score weight. Link
//! streams are `(source_url, target_url, anchor_text, score)` tuples,
//! gated on the URL→domain map: a URL-link posting requires the target
//! URL to be indexed, a domain-link posting only that the target domain
//! hosts some indexed document.
//!
//! A rebuild takes a directory-level writer lock; readers opened before
//! the final rename keep serving from the old file until they drop.

use crate::hash::{domain_hash, domain_link_hash, link_hash, url_hash};
use crate::index::shard_path;
use crate::record::{DocRecord, LinkRecord};
use crate::result::IndexError;
use crate::shard_builder::ShardBuilder;
use crate::store::{doc_key, SledStore, SnippetStore};
use crate::tokenizer::Tokenizer;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

/// Per-column score weights: url, title, h1, meta, text.
pub const FIELD_SCORES: [f32; 5] = [4.0, 2.0, 1.5, 1.0, 1.0];

pub fn url_to_domain_path(root: &Path) -> PathBuf {
    root.join(crate::MAIN_INDEX).join("url_to_domain.map")
}

pub fn snippet_store_path(root: &Path) -> PathBuf {
    root.join(crate::MAIN_INDEX).join("snippets")
}

pub fn link_count_path(root: &Path) -> PathBuf {
    root.join(crate::LINK_INDEX).join("links.count")
}

pub fn read_link_count(root: &Path) -> u64 {
    fs::read_to_string(link_count_path(root))
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

/// Lower-cased host of a URL, if it parses.
pub fn host_of(url_str: &str) -> Option<String> {
    url::Url::parse(url_str.trim())
        .ok()?
        .host_str()
        .map(|h| h.to_ascii_lowercase())
}

/// Exclusive writer lock on an index directory, released on drop.
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> Result<Self, IndexError> {
        let path = dir.join(".lock");
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(IndexError::Locked(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// The URL→domain mapping, total over indexed documents. Persisted beside
/// the main index and loaded by the query engine for domain-level joins.
#[derive(Default)]
pub struct UrlToDomain {
    map: FxHashMap<u64, u64>,
    domains: FxHashMap<u64, u32>,
}

impl UrlToDomain {
    pub fn insert(&mut self, doc_hash: u64, domain: u64) {
        if self.map.insert(doc_hash, domain).is_none() {
            *self.domains.entry(domain).or_insert(0) += 1;
        }
    }

    pub fn has_key(&self, doc_hash: u64) -> bool {
        self.map.contains_key(&doc_hash)
    }

    pub fn has_domain(&self, domain: u64) -> bool {
        self.domains.get(&domain).copied().unwrap_or(0) > 0
    }

    pub fn domain_of(&self, doc_hash: u64) -> Option<u64> {
        self.map.get(&doc_hash).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn map(&self) -> &FxHashMap<u64, u64> {
        &self.map
    }

    /// Load the persisted mapping. A missing file is an empty map: the
    /// index may legitimately predate link ingestion.
    pub fn read(path: &Path) -> Result<Self, IndexError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!("no url_to_domain map at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);
        let count = reader.read_u64::<LittleEndian>()?;
        let mut out = Self::default();
        for _ in 0..count {
            let doc_hash = reader.read_u64::<LittleEndian>()?;
            let domain = reader.read_u64::<LittleEndian>()?;
            out.insert(doc_hash, domain);
        }
        Ok(out)
    }

    pub fn write(&self, path: &Path) -> Result<(), IndexError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_u64::<LittleEndian>(self.map.len() as u64)?;
        for (&doc_hash, &domain) in &self.map {
            writer.write_u64::<LittleEndian>(doc_hash)?;
            writer.write_u64::<LittleEndian>(domain)?;
        }
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        Ok(())
    }
}

/// Builds the main index from document tuples.
pub struct Indexer {
    root: PathBuf,
    tokenizer: Tokenizer,
    builders: Vec<ShardBuilder<DocRecord>>,
    url_to_domain: UrlToDomain,
    store: Option<SledStore>,
    _lock: DirLock,
}

impl Indexer {
    /// `index_snippets` controls whether snippet records are written to
    /// the store; id-only deployments skip them.
    pub fn new(
        root: &Path,
        num_shards: usize,
        tokenizer: Tokenizer,
        index_snippets: bool,
    ) -> Result<Self, IndexError> {
        let dir = root.join(crate::MAIN_INDEX);
        fs::create_dir_all(&dir)?;
        let lock = DirLock::acquire(&dir)?;
        let builders = (0..num_shards as u32)
            .map(|id| ShardBuilder::new(shard_path(root, crate::MAIN_INDEX, id), id))
            .collect();
        let store = if index_snippets {
            Some(SledStore::open(&snippet_store_path(root))?)
        } else {
            None
        };
        Ok(Self {
            root: root.to_path_buf(),
            tokenizer,
            builders,
            url_to_domain: UrlToDomain::default(),
            store,
            _lock: lock,
        })
    }

    /// Index one document. `fields` are title, h1, meta, text; the URL
    /// string itself is tokenised as the first scored column.
    pub fn add_document(
        &mut self,
        url: &str,
        fields: &[&str],
        corpus: &str,
    ) -> Result<(), IndexError> {
        let domain = match host_of(url) {
            Some(d) => d,
            None => {
                log::warn!("skipping document with unparsable url {:?}", url);
                return Ok(());
            }
        };
        let doc_hash = url_hash(url);
        self.url_to_domain.insert(doc_hash, domain_hash(&domain));

        let num_shards = self.builders.len() as u64;
        for (i, column) in std::iter::once(url).chain(fields.iter().copied()).enumerate() {
            let score = FIELD_SCORES[i.min(FIELD_SCORES.len() - 1)];
            // column text is already UTF-8; the lax tokenizer cannot fail
            if let Ok(stream) = self.tokenizer.tokenize(column.as_bytes()) {
                for hash in stream {
                    self.builders[(hash % num_shards) as usize]
                        .add(hash, DocRecord { doc_hash, score });
                }
            }
        }

        if let Some(store) = &self.store {
            let mut line = String::from(url.trim());
            for i in 0..4 {
                line.push('\t');
                line.push_str(fields.get(i).copied().unwrap_or(""));
            }
            line.push('\t');
            line.push_str(corpus);
            store.put(&doc_key(doc_hash), &line)?;
        }
        Ok(())
    }

    /// Consume a tab-separated document stream:
    /// `url \t title \t h1 \t meta \t text`.
    pub fn add_stream<Rd: BufRead>(&mut self, stream: Rd, corpus: &str) -> Result<(), IndexError> {
        for line in stream.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let mut cols = line.split('\t');
            let url = cols.next().unwrap_or("");
            let fields: Vec<&str> = cols.collect();
            self.add_document(url, &fields, corpus)?;
        }
        Ok(())
    }

    /// Seal every shard, persist the URL→domain map, flush the store.
    /// Returns the mapping for the link ingestion pass.
    pub fn commit(self) -> Result<UrlToDomain, IndexError> {
        self.builders
            .into_par_iter()
            .map(|b| b.flush())
            .collect::<Result<Vec<_>, _>>()?;
        self.url_to_domain
            .write(&url_to_domain_path(&self.root))?;
        if let Some(store) = &self.store {
            store.flush()?;
        }
        log::info!("sealed main index with {} documents", self.url_to_domain.len());
        Ok(self.url_to_domain)
    }
}

/// Builds the URL-link and domain-link families from link tuples.
pub struct LinkIndexer<'a> {
    root: PathBuf,
    tokenizer: Tokenizer,
    url_builders: Vec<ShardBuilder<LinkRecord>>,
    domain_builders: Vec<ShardBuilder<LinkRecord>>,
    url_to_domain: &'a UrlToDomain,
    link_count: u64,
    _locks: [DirLock; 2],
}

impl<'a> LinkIndexer<'a> {
    pub fn new(
        root: &Path,
        num_shards: usize,
        tokenizer: Tokenizer,
        url_to_domain: &'a UrlToDomain,
    ) -> Result<Self, IndexError> {
        let link_dir = root.join(crate::LINK_INDEX);
        let domain_dir = root.join(crate::DOMAIN_LINK_INDEX);
        fs::create_dir_all(&link_dir)?;
        fs::create_dir_all(&domain_dir)?;
        let locks = [DirLock::acquire(&link_dir)?, DirLock::acquire(&domain_dir)?];
        let url_builders = (0..num_shards as u32)
            .map(|id| ShardBuilder::new(shard_path(root, crate::LINK_INDEX, id), id))
            .collect();
        let domain_builders = (0..num_shards as u32)
            .map(|id| ShardBuilder::new(shard_path(root, crate::DOMAIN_LINK_INDEX, id), id))
            .collect();
        Ok(Self {
            root: root.to_path_buf(),
            tokenizer,
            url_builders,
            domain_builders,
            url_to_domain,
            link_count: 0,
            _locks: locks,
        })
    }

    /// Index one link. Postings are keyed by the anchor-text tokens; the
    /// record's intersection key is the link (or domain-pair) identity.
    pub fn add_link(&mut self, source_url: &str, target_url: &str, anchor: &str, score: f32) {
        let (source_domain_name, target_domain_name) =
            match (host_of(source_url), host_of(target_url)) {
                (Some(s), Some(t)) => (s, t),
                _ => {
                    log::warn!("skipping link with unparsable endpoint");
                    return;
                }
            };
        let source_hash = url_hash(source_url);
        let target_hash = url_hash(target_url);
        let source_domain = domain_hash(&source_domain_name);
        let target_domain = domain_hash(&target_domain_name);

        let hashes = self.tokenizer.hashes(anchor);
        let num_shards = self.url_builders.len() as u64;

        if self.url_to_domain.has_key(target_hash) {
            let record = LinkRecord {
                value: link_hash(source_url, target_url),
                source_hash,
                target_hash,
                source_domain,
                target_domain,
                score,
            };
            for &hash in &hashes {
                self.url_builders[(hash % num_shards) as usize].add(hash, record);
            }
            self.link_count += 1;
        }

        if self.url_to_domain.has_domain(target_domain) {
            let record = LinkRecord {
                value: domain_link_hash(&source_domain_name, &target_domain_name),
                source_hash,
                target_hash,
                source_domain,
                target_domain,
                score,
            };
            for &hash in &hashes {
                self.domain_builders[(hash % num_shards) as usize].add(hash, record);
            }
        }
    }

    /// Consume a tab-separated link stream:
    /// `source_url \t target_url \t anchor_text \t score`.
    pub fn add_stream<Rd: BufRead>(&mut self, stream: Rd) -> Result<(), IndexError> {
        for line in stream.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let mut cols = line.split('\t');
            let source = cols.next().unwrap_or("");
            let target = cols.next().unwrap_or("");
            let anchor = cols.next().unwrap_or("");
            let score: f32 = cols.next().and_then(|s| s.parse().ok()).unwrap_or(1.0);
            self.add_link(source, target, anchor, score);
        }
        Ok(())
    }

    /// Seal both families and record the accepted link count.
    pub fn commit(self) -> Result<(), IndexError> {
        let link_count = self.link_count;
        self.url_builders
            .into_par_iter()
            .chain(self.domain_builders.into_par_iter())
            .map(|b| b.flush())
            .collect::<Result<Vec<_>, _>>()?;
        fs::write(link_count_path(&self.root), link_count.to_string())?;
        log::info!("sealed link indexes with {} url links", link_count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use tempfile::tempdir;

    #[test]
    fn test_url_to_domain_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("url_to_domain.map");
        let mut map = UrlToDomain::default();
        map.insert(1, 100);
        map.insert(2, 100);
        map.insert(3, 200);
        map.write(&path).unwrap();

        let loaded = UrlToDomain::read(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.domain_of(2), Some(100));
        assert!(loaded.has_domain(200));
        assert!(!loaded.has_domain(300));
    }

    #[test]
    fn test_missing_map_is_empty() {
        let dir = tempdir().unwrap();
        let map = UrlToDomain::read(&dir.path().join("absent.map")).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_dir_lock_exclusive() {
        let dir = tempdir().unwrap();
        let lock = DirLock::acquire(dir.path()).unwrap();
        assert!(matches!(
            DirLock::acquire(dir.path()),
            Err(IndexError::Locked(_))
        ));
        drop(lock);
        assert!(DirLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("http://Url1.COM/test").as_deref(), Some("url1.com"));
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn test_link_gating() {
        let dir = tempdir().unwrap();
        let tokenizer = Tokenizer::default();

        let mut indexer = Indexer::new(dir.path(), 2, tokenizer.clone(), false).unwrap();
        indexer
            .add_document("http://url1.com/test", &["t", "h", "m", "x"], "C")
            .unwrap();
        let url_to_domain = indexer.commit().unwrap();

        let mut links = LinkIndexer::new(dir.path(), 2, tokenizer, &url_to_domain).unwrap();
        // target page indexed: both families
        links.add_link("http://a.com/1", "http://url1.com/test", "anchor words", 1.0);
        // only target domain indexed: domain family alone
        links.add_link("http://b.com/1", "http://url1.com/other", "anchor words", 1.0);
        // neither: dropped
        links.add_link("http://c.com/1", "http://nowhere.com/", "anchor words", 1.0);
        links.commit().unwrap();

        let url_index = Index::<LinkRecord>::open(dir.path(), crate::LINK_INDEX, 2).unwrap();
        let domain_index =
            Index::<LinkRecord>::open(dir.path(), crate::DOMAIN_LINK_INDEX, 2).unwrap();
        let anchor = crate::hash::hash64(b"anchor");
        assert_eq!(url_index.lookup(anchor).unwrap().len(), 1);
        assert_eq!(domain_index.lookup(anchor).unwrap().len(), 2);
        assert_eq!(read_link_count(dir.path()), 1);
    }
}
