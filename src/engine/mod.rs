//! The query engine.
//!
//! Stateless between requests: tokenises the query, fans out to the
//! textual, URL-link and domain-link indexes, intersects per family,
//! joins link scores onto the match set, and selects the top-k. Each
//! worker passes in its own [`SearchAllocation`]; the engine itself is
//! shared immutably.

mod allocation;
mod rank;

pub use allocation::SearchAllocation;
pub use rank::{combined_score, dedupe_by_domain, select_top_k};

use crate::config::Config;
use crate::hash::hash64;
use crate::index::Index;
use crate::ingest::{self, UrlToDomain};
use crate::intersection::intersect_into;
use crate::record::{DocRecord, LinkRecord, PostingRecord};
use crate::result::{IndexError, RankedDoc, ResultSet, SearchError, SearchHit, SearchMetrics, Status};
use crate::stats::{word_stats, WordStats};
use crate::store::{doc_key, SledStore, SnippetStore};
use crate::tokenizer::Tokenizer;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-request wall-clock budget. Checked between phases only; phases are
/// short.
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn start(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    #[inline]
    pub fn expired(&self) -> bool {
        self.start.elapsed() >= self.budget
    }
}

/// Ranked output of one search request.
pub struct SearchOutcome {
    pub status: Status,
    pub metrics: SearchMetrics,
    pub docs: Vec<RankedDoc>,
}

/// Word statistics for both index families.
pub struct WordStatsOutcome {
    pub status: Status,
    pub index: WordStats,
    pub link_index: WordStats,
}

/// Intersection result for one index family: the pool that was
/// intersected, which set drives, and the reported total.
struct FamilyMatch<R: PostingRecord> {
    pool: Vec<ResultSet<R>>,
    driver: usize,
    total_found: u64,
}

impl<R: PostingRecord> FamilyMatch<R> {
    fn empty() -> Self {
        Self {
            pool: Vec::new(),
            driver: 0,
            total_found: 0,
        }
    }

    fn record_at(&self, position: usize) -> R {
        self.pool[self.driver].record_at(position)
    }
}

pub struct Engine {
    config: Config,
    tokenizer: Tokenizer,
    index: Index<DocRecord>,
    link_index: Index<LinkRecord>,
    domain_link_index: Index<LinkRecord>,
    url_to_domain: UrlToDomain,
    link_count: u64,
    store: Arc<dyn SnippetStore>,
}

impl Engine {
    /// Open every index family plus the URL→domain map and snippet store.
    /// A missing index is fatal here, never at query time.
    pub fn open(config: Config) -> Result<Self, IndexError> {
        let root = config.index_root.clone();
        let index = Index::open(&root, crate::MAIN_INDEX, config.num_shards)?;
        let link_index = Index::open(&root, crate::LINK_INDEX, config.num_link_shards)?;
        let domain_link_index = Index::open(&root, crate::DOMAIN_LINK_INDEX, config.num_link_shards)?;
        let url_to_domain = UrlToDomain::read(&ingest::url_to_domain_path(&root))?;
        let link_count = ingest::read_link_count(&root);
        let store: Arc<dyn SnippetStore> = Arc::new(SledStore::open(&ingest::snippet_store_path(&root))?);
        Ok(Self {
            tokenizer: config.tokenizer(),
            config,
            index,
            link_index,
            domain_link_index,
            url_to_domain,
            link_count,
            store,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SnippetStore> {
        &self.store
    }

    /// Documents known to the main index.
    pub fn doc_count(&self) -> u64 {
        self.url_to_domain.len() as u64
    }

    /// Deduplicated query token hashes, order preserved. Queries use
    /// unigrams only: n-grams enrich the index but must never constrain
    /// the conjunction, or an unindexed word pair would empty it.
    fn query_hashes(&self, query: &str) -> Result<Vec<u64>, SearchError> {
        let mut seen = FxHashSet::default();
        let mut hashes = Vec::new();
        for word in self.tokenizer.words(query) {
            let hash = hash64(word.as_bytes());
            if seen.insert(hash) {
                hashes.push(hash);
            }
        }
        Ok(hashes)
    }

    /// Fetch one posting list, retrying a failed read once before
    /// degrading to an empty list.
    fn fetch<R: PostingRecord>(
        &self,
        index: &Index<R>,
        token_hash: u64,
        status: &mut Status,
    ) -> ResultSet<R> {
        for _ in 0..2 {
            match index.lookup(token_hash) {
                Ok(rs) => return rs,
                Err(e) => log::warn!("{}: lookup {:#x} failed: {}", index.name(), token_hash, e),
            }
        }
        status.worsen(Status::Degraded);
        ResultSet::empty()
    }

    /// Gather per-token result sets from one family, split into the
    /// AND-pool (precise lists) and OR-pool (truncated lists), intersect,
    /// and report the total.
    ///
    /// A token absent from the index is a precise empty list: it joins the
    /// AND-pool and empties the intersection, the same as any other
    /// unmatched conjunct. Only when every list is truncated does the
    /// engine fall back to intersecting the OR-pool, with the total taken
    /// from the largest estimator among its members.
    fn search_family<R: PostingRecord>(
        &self,
        index: &Index<R>,
        hashes: &[u64],
        matches: &mut Vec<usize>,
        status: &mut Status,
        deadline: &Deadline,
    ) -> FamilyMatch<R> {
        let mut and_pool: Vec<ResultSet<R>> = Vec::new();
        let mut or_pool: Vec<ResultSet<R>> = Vec::new();

        for &hash in hashes {
            if deadline.expired() {
                status.worsen(Status::Timeout);
                return FamilyMatch::empty();
            }
            let rs = self.fetch(index, hash, status);
            if rs.is_truncated() {
                or_pool.push(rs);
            } else {
                and_pool.push(rs);
            }
        }

        let (pool, fallback) = if and_pool.is_empty() && !or_pool.is_empty() {
            (or_pool, true)
        } else {
            (and_pool, false)
        };

        matches.clear();
        let driver = intersect_into(&pool, matches);
        let total_found = if fallback {
            pool.iter().map(|rs| rs.total_count()).max().unwrap_or(0)
        } else {
            matches.len() as u64
        };

        FamilyMatch {
            pool,
            driver,
            total_found,
        }
    }

    /// Full textual search with link-aware ranking.
    pub fn search(
        &self,
        alloc: &mut SearchAllocation,
        query: &str,
        dedupe: bool,
    ) -> Result<SearchOutcome, SearchError> {
        alloc.reset();
        let deadline = Deadline::start(self.config.query_budget);
        let mut status = Status::Success;
        let mut metrics = SearchMetrics::default();

        let hashes = self.query_hashes(query)?;
        if hashes.is_empty() {
            return Ok(self.finalize(alloc, status, metrics, dedupe));
        }
        if deadline.expired() {
            status.worsen(Status::Timeout);
            return Ok(self.finalize(alloc, status, metrics, dedupe));
        }

        // Phase: textual match
        let main = self.search_family(&self.index, &hashes, &mut alloc.matches, &mut status, &deadline);
        metrics.total_found = main.total_found;
        if status == Status::Timeout {
            return Ok(self.finalize(alloc, status, metrics, dedupe));
        }
        for &p in alloc.matches.iter() {
            let rec = main.record_at(p);
            alloc.docs.push(RankedDoc {
                doc_hash: rec.doc_hash,
                score: rec.score,
            });
        }
        if deadline.expired() {
            status.worsen(Status::Timeout);
            return Ok(self.finalize(alloc, status, metrics, dedupe));
        }

        // Phase: URL links, joined on target hash
        let url_links =
            self.search_family(&self.link_index, &hashes, &mut alloc.link_matches, &mut status, &deadline);
        metrics.total_url_links_found = url_links.total_found;
        let mut url_link_scores: FxHashMap<u64, f32> = FxHashMap::default();
        if status != Status::Timeout {
            let doc_set: FxHashSet<u64> = alloc.docs.iter().map(|d| d.doc_hash).collect();
            for &p in alloc.link_matches.iter() {
                let rec = url_links.record_at(p);
                if doc_set.contains(&rec.target_hash) {
                    *url_link_scores.entry(rec.target_hash).or_insert(0.0) += rec.score;
                    metrics.link_url_matches += 1;
                }
            }
        }
        if deadline.expired() {
            status.worsen(Status::Timeout);
        }

        // Phase: domain links, joined on target domain
        let mut domain_link_scores: FxHashMap<u64, f32> = FxHashMap::default();
        if status != Status::Timeout {
            let domain_links = self.search_family(
                &self.domain_link_index,
                &hashes,
                &mut alloc.link_matches,
                &mut status,
                &deadline,
            );
            metrics.total_domain_links_found = domain_links.total_found;
            if status != Status::Timeout {
                let domain_set: FxHashSet<u64> = alloc
                    .docs
                    .iter()
                    .filter_map(|d| self.url_to_domain.domain_of(d.doc_hash))
                    .collect();
                for &p in alloc.link_matches.iter() {
                    let rec = domain_links.record_at(p);
                    if domain_set.contains(&rec.target_domain) {
                        *domain_link_scores.entry(rec.target_domain).or_insert(0.0) += rec.score;
                    }
                }
            }
        }

        // Phase: score combination
        let weights = &self.config.weights;
        for doc in alloc.docs.iter_mut() {
            doc.score = combined_score(
                weights,
                doc.score,
                doc.doc_hash,
                self.url_to_domain.domain_of(doc.doc_hash),
                &url_link_scores,
                &domain_link_scores,
            );
        }
        if deadline.expired() {
            status.worsen(Status::Timeout);
        }

        Ok(self.finalize(alloc, status, metrics, dedupe))
    }

    /// Rank whatever the phases produced and copy out the top of the list.
    fn finalize(
        &self,
        alloc: &mut SearchAllocation,
        status: Status,
        metrics: SearchMetrics,
        dedupe: bool,
    ) -> SearchOutcome {
        if dedupe {
            dedupe_by_domain(&mut alloc.docs, self.url_to_domain.map());
        }
        select_top_k(&mut alloc.docs, &mut alloc.scores, self.config.result_limit);
        SearchOutcome {
            status,
            metrics,
            docs: alloc.docs.clone(),
        }
    }

    /// Binary variant: the raw matched main-index records, in primary-key
    /// order, without ranking or resolution.
    pub fn search_ids(
        &self,
        alloc: &mut SearchAllocation,
        query: &str,
    ) -> Result<(Status, Vec<u8>), SearchError> {
        alloc.reset();
        let deadline = Deadline::start(self.config.query_budget);
        let mut status = Status::Success;

        let hashes = self.query_hashes(query)?;
        if hashes.is_empty() {
            return Ok((status, Vec::new()));
        }
        let main = self.search_family(&self.index, &hashes, &mut alloc.matches, &mut status, &deadline);
        for &p in alloc.matches.iter() {
            alloc.records.push(main.record_at(p));
        }

        let mut body = Vec::with_capacity(alloc.records.len() * DocRecord::WIDTH);
        for record in alloc.records.iter() {
            // Vec<u8> writes cannot fail
            let _ = record.write_to(&mut body);
        }
        Ok((status, body))
    }

    /// Per-token document frequencies against both families.
    pub fn word_stats(&self, phrase: &str) -> WordStatsOutcome {
        let mut status = Status::Success;
        let index = word_stats(
            &self.tokenizer,
            &self.index,
            self.doc_count(),
            phrase,
            &mut status,
        );
        let link_index = word_stats(
            &self.tokenizer,
            &self.link_index,
            self.link_count,
            phrase,
            &mut status,
        );
        WordStatsOutcome {
            status,
            index,
            link_index,
        }
    }

    /// Resolve ranked documents to snippet records, preserving order.
    /// Documents without a stored record are dropped from the listing.
    pub fn resolve(&self, docs: &[RankedDoc], status: &mut Status) -> Vec<SearchHit> {
        let mut hits = Vec::with_capacity(docs.len());
        for doc in docs {
            match self.store_get(&doc_key(doc.doc_hash), status) {
                Some(line) => {
                    let mut cols = line.split('\t');
                    let url = cols.next().unwrap_or_default().to_string();
                    let title = cols.next().unwrap_or_default().to_string();
                    let snippet = cols.nth(2).unwrap_or_default().to_string();
                    hits.push(SearchHit {
                        url,
                        title,
                        snippet,
                        score: doc.score,
                    });
                }
                None => log::debug!("no snippet record for {:#x}", doc.doc_hash),
            }
        }
        hits
    }

    /// Exact-URL snippet lookup; unknown URLs resolve to the empty string.
    pub fn url_lookup(&self, url: &str, status: &mut Status) -> String {
        self.store_get(&doc_key(crate::hash::url_hash(url)), status)
            .unwrap_or_default()
    }

    fn store_get(&self, key: &str, status: &mut Status) -> Option<String> {
        for _ in 0..2 {
            match self.store.get(key) {
                Ok(value) => return value,
                Err(e) => log::warn!("snippet store read failed: {}", e),
            }
        }
        status.worsen(Status::Degraded);
        None
    }
}
