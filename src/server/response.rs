//! JSON response bodies for the query protocol.

use crate::result::{SearchHit, Status};
use crate::stats::WordStats;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub status: Status,
    pub time_ms: f64,
    pub total_found: u64,
    pub total_url_links_found: u64,
    pub total_domain_links_found: u64,
    pub link_url_matches: u64,
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
pub struct WordStatsResponse {
    pub status: Status,
    pub time_ms: f64,
    pub index: WordStats,
    pub link_index: WordStats,
}

#[derive(Debug, Serialize)]
pub struct UrlResponse {
    pub status: Status,
    pub time_ms: f64,
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: Status,
    pub message: String,
}

/// Serialisation of these plain structs cannot fail; fall back to a
/// hand-written error body if it somehow does.
pub fn to_json<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_else(|e| {
        log::error!("response serialisation failed: {}", e);
        br#"{"status":"error","message":"internal error"}"#.to_vec()
    })
}
