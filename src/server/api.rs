//! Request routing and response assembly.
//!
//! Protocol: `q` searches (deduplicated unless `d=a`), `s` reports word
//! statistics, `u` resolves a snippet record by exact URL, `i` returns the
//! matched posting records as a binary body.

use super::http::Request;
use super::response::{to_json, ErrorResponse, SearchResponse, UrlResponse, WordStatsResponse};
use crate::engine::{Engine, SearchAllocation};
use crate::result::{SearchError, Status};
use std::time::Instant;

pub enum Reply {
    Json(Vec<u8>),
    Binary(Vec<u8>),
    BadRequest(Vec<u8>),
}

pub fn handle(engine: &Engine, alloc: &mut SearchAllocation, request: &Request) -> Reply {
    let started = Instant::now();
    let deduplicate = request.param("d") != Some("a");

    if let Some(query) = request.param("q") {
        return search(engine, alloc, query, deduplicate, started);
    }
    if let Some(phrase) = request.param("s") {
        return word_stats(engine, phrase, started);
    }
    if let Some(url) = request.param("u") {
        return url_lookup(engine, url, started);
    }
    if let Some(query) = request.param("i") {
        return ids(engine, alloc, query);
    }

    Reply::BadRequest(to_json(&ErrorResponse {
        status: Status::Error,
        message: "expected one of q, s, u, i".to_string(),
    }))
}

fn time_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn malformed(e: SearchError) -> Reply {
    Reply::BadRequest(to_json(&ErrorResponse {
        status: Status::Error,
        message: e.to_string(),
    }))
}

fn search(
    engine: &Engine,
    alloc: &mut SearchAllocation,
    query: &str,
    deduplicate: bool,
    started: Instant,
) -> Reply {
    let outcome = match engine.search(alloc, query, deduplicate) {
        Ok(outcome) => outcome,
        Err(e) => return malformed(e),
    };
    let mut status = outcome.status;
    let results = engine.resolve(&outcome.docs, &mut status);
    Reply::Json(to_json(&SearchResponse {
        status,
        time_ms: time_ms(started),
        total_found: outcome.metrics.total_found,
        total_url_links_found: outcome.metrics.total_url_links_found,
        total_domain_links_found: outcome.metrics.total_domain_links_found,
        link_url_matches: outcome.metrics.link_url_matches,
        results,
    }))
}

fn word_stats(engine: &Engine, phrase: &str, started: Instant) -> Reply {
    let outcome = engine.word_stats(phrase);
    Reply::Json(to_json(&WordStatsResponse {
        status: outcome.status,
        time_ms: time_ms(started),
        index: outcome.index,
        link_index: outcome.link_index,
    }))
}

fn url_lookup(engine: &Engine, url: &str, started: Instant) -> Reply {
    let mut status = Status::Success;
    let response = engine.url_lookup(url, &mut status);
    Reply::Json(to_json(&UrlResponse {
        status,
        time_ms: time_ms(started),
        response,
    }))
}

fn ids(engine: &Engine, alloc: &mut SearchAllocation, query: &str) -> Reply {
    match engine.search_ids(alloc, query) {
        Ok((_, body)) => Reply::Binary(body),
        Err(e) => malformed(e),
    }
}
