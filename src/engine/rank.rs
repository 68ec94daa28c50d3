//! Score combination and top-k selection.

use crate::config::Weights;
use crate::result::RankedDoc;
use rustc_hash::FxHashMap;

/// Combine the textual score with the link and domain-link contributions
/// joined on target hash and target domain.
#[inline]
pub fn combined_score(
    weights: &Weights,
    text_score: f32,
    doc_hash: u64,
    domain_hash: Option<u64>,
    url_link_scores: &FxHashMap<u64, f32>,
    domain_link_scores: &FxHashMap<u64, f32>,
) -> f32 {
    let link = url_link_scores.get(&doc_hash).copied().unwrap_or(0.0);
    let dom = domain_hash
        .and_then(|d| domain_link_scores.get(&d))
        .copied()
        .unwrap_or(0.0);
    weights.text * text_score + weights.link * link + weights.domain * dom
}

/// Keep only the top `limit` documents, sorted by score descending.
///
/// Above the limit an nth-element partition finds the cut score in O(n)
/// expected time; everything at or above the cut is collected (ties above
/// the cut truncate at `limit`) and only that slice is sorted.
pub fn select_top_k(docs: &mut Vec<RankedDoc>, scores: &mut Vec<f32>, limit: usize) {
    if docs.len() > limit && limit > 0 {
        scores.clear();
        scores.extend(docs.iter().map(|d| d.score));
        scores.select_nth_unstable_by(limit - 1, |a, b| b.total_cmp(a));
        let cut = scores[limit - 1];

        let mut kept = 0;
        let mut i = 0;
        while i < docs.len() && kept < limit {
            if docs[i].score >= cut {
                docs.swap(kept, i);
                kept += 1;
            }
            i += 1;
        }
        docs.truncate(kept);
    }
    docs.sort_unstable_by(|a, b| b.score.total_cmp(&a.score));
}

/// Collapse the match set to the best-scoring document per domain.
/// Documents without a known domain are kept as-is.
pub fn dedupe_by_domain(docs: &mut Vec<RankedDoc>, url_to_domain: &FxHashMap<u64, u64>) {
    let mut best: FxHashMap<u64, usize> = FxHashMap::default();
    let mut out: Vec<RankedDoc> = Vec::with_capacity(docs.len());
    for doc in docs.iter() {
        match url_to_domain.get(&doc.doc_hash) {
            Some(&domain) => match best.get(&domain) {
                Some(&at) => {
                    if doc.score > out[at].score {
                        out[at] = *doc;
                    }
                }
                None => {
                    best.insert(domain, out.len());
                    out.push(*doc);
                }
            },
            None => out.push(*doc),
        }
    }
    *docs = out;
}
