//! Byte-level tokenisation for documents and queries.
//!
//! Normalisation is ASCII-only: case-fold a-z, split on anything outside
//! `[a-z0-9]`. Tokens become stable 64-bit hashes via [`crate::hash`];
//! ingestion and query share one `Tokenizer` configuration so hashes line
//! up on both sides.

use crate::hash::{hash64, Fnv64};
use std::collections::VecDeque;

/// Tokens shorter than this are dropped.
pub const MIN_TOKEN_LEN: usize = 2;

/// Default upper bound on token length.
pub const DEFAULT_MAX_TOKEN_LEN: usize = 64;

/// Separator byte between unigrams when hashing an n-gram.
const NGRAM_SEPARATOR: u8 = b'_';

/// Pre-computed character lookup table.
/// 0 = split byte, otherwise = lowercase ASCII value.
static CHAR_LUT: [u8; 256] = {
    let mut t = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        t[i] = if i >= b'a' as usize && i <= b'z' as usize {
            i as u8
        } else if i >= b'A' as usize && i <= b'Z' as usize {
            (i as u8) | 0x20
        } else if i >= b'0' as usize && i <= b'9' as usize {
            i as u8
        } else {
            0
        };
        i += 1;
    }
    t
};

fn is_stop_word(word: &str) -> bool {
    matches!(
        word,
        "an" | "and"
            | "are"
            | "as"
            | "at"
            | "be"
            | "by"
            | "for"
            | "from"
            | "has"
            | "he"
            | "in"
            | "is"
            | "it"
            | "its"
            | "of"
            | "on"
            | "or"
            | "that"
            | "the"
            | "to"
            | "was"
            | "were"
            | "will"
            | "with"
    )
}

/// Input rejected in strict mode.
#[derive(Debug, thiserror::Error)]
#[error("input is not valid UTF-8 at byte {at}")]
pub struct TokenizeError {
    pub at: usize,
}

/// Byte-level tokenizer with optional n-gram emission.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    /// Maximum token length
    max_length: usize,
    /// Emit n-grams of up to this many adjacent unigrams (1 = unigrams only)
    n_grams: usize,
    /// Reject non-UTF-8 input instead of treating it as raw bytes
    strict: bool,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_TOKEN_LEN,
            n_grams: 1,
            strict: false,
        }
    }
}

impl Tokenizer {
    pub fn new(max_length: usize, n_grams: usize, strict: bool) -> Self {
        Self {
            max_length,
            n_grams: n_grams.max(1),
            strict,
        }
    }

    pub fn with_n_grams(n_grams: usize) -> Self {
        Self {
            n_grams: n_grams.max(1),
            ..Self::default()
        }
    }

    /// Lazy sequence of token hashes over raw bytes. Unigrams always; when
    /// `n_grams > 1`, also every n-gram of adjacent kept unigrams joined by
    /// a single separator byte before hashing.
    pub fn tokenize<'a>(&'a self, text: &'a [u8]) -> Result<TokenStream<'a>, TokenizeError> {
        if self.strict {
            if let Err(e) = std::str::from_utf8(text) {
                return Err(TokenizeError {
                    at: e.valid_up_to(),
                });
            }
        }
        Ok(TokenStream {
            tokenizer: self,
            text,
            pos: 0,
            window: VecDeque::new(),
            pending: VecDeque::new(),
        })
    }

    /// All token hashes of a string, n-grams included.
    pub fn hashes(&self, text: &str) -> Vec<u64> {
        match self.tokenize(text.as_bytes()) {
            Ok(stream) => stream.collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Kept unigram words of a string, normalised, in order. Used where the
    /// word itself is needed (statistics keys), never for matching.
    pub fn words(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        let bytes = text.as_bytes();
        let mut word = String::new();
        for i in 0..=bytes.len() {
            let c = if i < bytes.len() {
                CHAR_LUT[bytes[i] as usize]
            } else {
                0
            };
            if c != 0 {
                word.push(c as char);
            } else if !word.is_empty() {
                if self.keep(&word) {
                    out.push(std::mem::take(&mut word));
                } else {
                    word.clear();
                }
            }
        }
        out
    }

    fn keep(&self, word: &str) -> bool {
        word.len() >= MIN_TOKEN_LEN && word.len() <= self.max_length && !is_stop_word(word)
    }
}

/// Lazy token-hash stream. Each kept unigram yields its own hash plus the
/// hashes of every n-gram ending at it.
pub struct TokenStream<'a> {
    tokenizer: &'a Tokenizer,
    text: &'a [u8],
    pos: usize,
    /// Most recent kept unigrams, at most `n_grams` of them
    window: VecDeque<String>,
    /// Hashes emitted for the current unigram, drained before scanning on
    pending: VecDeque<u64>,
}

impl<'a> TokenStream<'a> {
    /// Scan the next kept unigram; fill `pending` with its hash and the
    /// hashes of every n-gram it completes.
    fn advance(&mut self) -> bool {
        let text = self.text;
        let len = text.len();
        loop {
            // Skip split bytes
            while self.pos < len && CHAR_LUT[text[self.pos] as usize] == 0 {
                self.pos += 1;
            }
            if self.pos >= len {
                return false;
            }

            let start = self.pos;
            while self.pos < len && CHAR_LUT[text[self.pos] as usize] != 0 {
                self.pos += 1;
            }

            let token_len = self.pos - start;
            if token_len < MIN_TOKEN_LEN || token_len > self.tokenizer.max_length {
                continue;
            }
            let word: String = text[start..self.pos]
                .iter()
                .map(|&b| CHAR_LUT[b as usize] as char)
                .collect();
            if is_stop_word(&word) {
                continue;
            }

            self.pending.push_back(hash64(word.as_bytes()));

            if self.tokenizer.n_grams > 1 {
                self.window.push_back(word);
                if self.window.len() > self.tokenizer.n_grams {
                    self.window.pop_front();
                }
                // n-grams ending at the current word, shortest first
                for n in 2..=self.window.len() {
                    let skip = self.window.len() - n;
                    let mut h = Fnv64::new();
                    for (i, w) in self.window.iter().skip(skip).enumerate() {
                        if i > 0 {
                            h.write(&[NGRAM_SEPARATOR]);
                        }
                        h.write(w.as_bytes());
                    }
                    self.pending.push_back(h.finish());
                }
            }
            return true;
        }
    }
}

impl<'a> Iterator for TokenStream<'a> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.pending.is_empty() && !self.advance() {
            return None;
        }
        self.pending.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_tokenization() {
        let tokenizer = Tokenizer::default();
        let hashes = tokenizer.hashes("Hello World hello");
        assert_eq!(hashes.len(), 3);
        assert_eq!(hashes[0], hash64(b"hello"));
        assert_eq!(hashes[1], hash64(b"world"));
        assert_eq!(hashes[0], hashes[2]);
    }

    #[test]
    fn test_min_length() {
        let tokenizer = Tokenizer::default();
        let hashes = tokenizer.hashes("x ab abc");
        assert_eq!(hashes, vec![hash64(b"ab"), hash64(b"abc")]);
    }

    #[test]
    fn test_split_bytes() {
        let tokenizer = Tokenizer::default();
        assert_eq!(
            tokenizer.hashes("url1.com/test"),
            vec![hash64(b"url1"), hash64(b"com"), hash64(b"test")]
        );
    }

    #[test]
    fn test_stop_words() {
        let tokenizer = Tokenizer::default();
        assert_eq!(
            tokenizer.words("the quick and the dead"),
            vec!["quick", "dead"]
        );
    }

    #[test]
    fn test_n_grams() {
        let tokenizer = Tokenizer::with_n_grams(3);
        let hashes = tokenizer.hashes("alpha beta gamma");
        // alpha, beta, alpha_beta, gamma, beta_gamma, alpha_beta_gamma
        assert_eq!(hashes.len(), 6);
        assert_eq!(hashes[2], hash64(b"alpha_beta"));
        assert_eq!(hashes[4], hash64(b"beta_gamma"));
        assert_eq!(hashes[5], hash64(b"alpha_beta_gamma"));
    }

    #[test]
    fn test_n_grams_bridge_dropped_unigrams() {
        let tokenizer = Tokenizer::with_n_grams(2);
        // "x" is below the length floor, so the bigram bridges across it
        let hashes = tokenizer.hashes("alpha x beta");
        assert!(hashes.contains(&hash64(b"alpha_beta")));
    }

    #[test]
    fn test_strict_rejects_bad_utf8() {
        let tokenizer = Tokenizer::new(DEFAULT_MAX_TOKEN_LEN, 1, true);
        assert!(tokenizer.tokenize(b"ok \xff nope").is_err());

        let lax = Tokenizer::default();
        let hashes: Vec<u64> = lax.tokenize(b"ok \xff nope").unwrap().collect();
        assert_eq!(hashes, vec![hash64(b"ok"), hash64(b"nope")]);
    }

    #[test]
    fn test_query_hashes_line_up_with_document_hashes() {
        let tokenizer = Tokenizer::with_n_grams(5);
        let doc = tokenizer.hashes("Test h1 text");
        assert!(doc.contains(&hash64(b"h1")));
        assert!(doc.contains(&hash64(b"text")));
        assert!(doc.contains(&hash64(b"h1_text")));
        for h in tokenizer.hashes("h1 text") {
            assert!(doc.contains(&h));
        }
    }
}
