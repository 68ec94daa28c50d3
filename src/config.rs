//! Process configuration.
//!
//! The server binary takes no arguments; everything comes from `ALEX_*`
//! environment variables with workable defaults. The shard counts are
//! build-time constants per index family, not runtime knobs.

use crate::tokenizer::{Tokenizer, DEFAULT_MAX_TOKEN_LEN};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: expected {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Score-combination weights: text, URL links, domain links.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub text: f32,
    pub link: f32,
    pub domain: f32,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            text: 1.0,
            link: 1.0,
            domain: 1.0,
        }
    }
}

impl Weights {
    /// Parse `w_text,w_link,w_dom`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split(',').map(|p| p.trim().parse::<f32>());
        let text = parts.next()?.ok()?;
        let link = parts.next()?.ok()?;
        let domain = parts.next()?.ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { text, link, domain })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Query worker threads
    pub worker_count: usize,
    /// Root directory holding every index family
    pub index_root: PathBuf,
    pub weights: Weights,
    /// host:port for the listening socket
    pub listen: String,
    pub num_shards: usize,
    pub num_link_shards: usize,
    /// Ranked results returned per query
    pub result_limit: usize,
    /// N-gram order shared by ingestion and query
    pub n_grams: usize,
    pub max_token_len: usize,
    /// Write snippet records during ingestion
    pub index_snippets: bool,
    /// Per-request wall-clock budget
    pub query_budget: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            index_root: PathBuf::from("data"),
            weights: Weights::default(),
            listen: "127.0.0.1:8000".to_string(),
            num_shards: crate::DEFAULT_NUM_SHARDS,
            num_link_shards: crate::DEFAULT_NUM_LINK_SHARDS,
            result_limit: 30,
            n_grams: 1,
            max_token_len: DEFAULT_MAX_TOKEN_LEN,
            index_snippets: true,
            query_budget: Duration::from_millis(2000),
        }
    }
}

impl Config {
    /// Read `ALEX_WORKER_COUNT`, `ALEX_INDEX_ROOT`, `ALEX_WEIGHTS` and
    /// `ALEX_LISTEN`, defaulting everything that is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("ALEX_WORKER_COUNT") {
            config.worker_count = value.parse().ok().filter(|&n| n > 0).ok_or_else(|| {
                ConfigError::Invalid {
                    var: "ALEX_WORKER_COUNT",
                    expected: "a positive integer",
                    value: value.clone(),
                }
            })?;
        }
        if let Ok(value) = std::env::var("ALEX_INDEX_ROOT") {
            config.index_root = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("ALEX_WEIGHTS") {
            config.weights = Weights::parse(&value).ok_or_else(|| ConfigError::Invalid {
                var: "ALEX_WEIGHTS",
                expected: "three comma-separated floats",
                value: value.clone(),
            })?;
        }
        if let Ok(value) = std::env::var("ALEX_LISTEN") {
            config.listen = value;
        }
        Ok(config)
    }

    /// The tokenizer every component of this process shares.
    pub fn tokenizer(&self) -> Tokenizer {
        Tokenizer::new(self.max_token_len, self.n_grams, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_parse() {
        assert_eq!(
            Weights::parse("1,0.5,0.25"),
            Some(Weights {
                text: 1.0,
                link: 0.5,
                domain: 0.25
            })
        );
        assert_eq!(Weights::parse("1, 2 ,3"), Some(Weights {
            text: 1.0,
            link: 2.0,
            domain: 3.0
        }));
        assert_eq!(Weights::parse("1,2"), None);
        assert_eq!(Weights::parse("1,2,3,4"), None);
        assert_eq!(Weights::parse("a,b,c"), None);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.worker_count > 0);
        assert_eq!(config.listen, "127.0.0.1:8000");
        assert_eq!(config.result_limit, 30);
    }
}
