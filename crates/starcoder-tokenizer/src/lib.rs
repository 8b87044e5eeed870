//! # starcoder-tokenizer
//!
//! Vocabulary and tokenization for starcoder.rs.
//!
//! This crate provides:
//! - A `Tokenizer` trait for pluggable tokenization backends
//! - [`Vocabulary`], the bidirectional id ⇄ fragment table loaded with the model
//! - GPT-2 style word splitting followed by greedy longest-match encoding
//! - Byte-exact detokenization (fragments are raw bytes, not necessarily UTF-8)

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use starcoder_engine::{StarcoderError, TokenId};

/// Error type for tokenization operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizerError {
    #[error("Invalid token ID: {0}")]
    InvalidToken(TokenId),
}

pub type TokenizerResult<T> = std::result::Result<T, TokenizerError>;

impl From<TokenizerError> for StarcoderError {
    fn from(err: TokenizerError) -> Self {
        match err {
            TokenizerError::InvalidToken(id) => StarcoderError::UnknownToken(id),
        }
    }
}

/// Core tokenizer trait. Implementations can be swapped without changing app code.
pub trait Tokenizer: Send + Sync {
    /// Encode text into a sequence of token IDs.
    fn encode(&self, text: &str) -> TokenizerResult<Vec<TokenId>>;

    /// Decode a complete sequence of tokens into text.
    fn decode(&self, tokens: &[TokenId]) -> TokenizerResult<String>;

    /// Get vocabulary size.
    fn vocab_size(&self) -> usize;
}

/// Pre-tokenizer pattern used by ggml's `gpt_tokenize`: GPT-2's word classes,
/// with whitespace runs matched whole.
const WORD_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?[[:alpha:]]+| ?[[:digit:]]+| ?[^\s[:alpha:][:digit:]]+|\s+";

fn word_regex() -> &'static Regex {
    static WORDS: OnceLock<Regex> = OnceLock::new();
    WORDS.get_or_init(|| Regex::new(WORD_PATTERN).expect("word pattern is valid"))
}

/// Split text into pre-tokenizer words.
fn split_words<'a>(text: &'a str, words: &mut Vec<&'a str>) {
    words.extend(word_regex().find_iter(text).map(|m| m.as_str()));
}

/// Bidirectional mapping between token ids and text fragments.
///
/// Read-only once the model is loaded; shared by every request.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    id_to_token: HashMap<TokenId, Vec<u8>>,
    token_to_id: HashMap<Vec<u8>, TokenId>,
    special_tokens: Vec<String>,
    special_pattern: Option<Regex>,
    max_token_len: usize,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a vocabulary where each fragment's id is its index.
    pub fn from_fragments<I, F>(fragments: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Vec<u8>>,
    {
        let mut vocab = Self::new();
        for (id, fragment) in fragments.into_iter().enumerate() {
            vocab.insert(id as TokenId, fragment);
        }
        vocab
    }

    /// Register `fragment` under `id`. A repeated fragment maps to the latest id.
    pub fn insert(&mut self, id: TokenId, fragment: impl Into<Vec<u8>>) {
        let fragment = fragment.into();
        self.max_token_len = self.max_token_len.max(fragment.len());
        self.token_to_id.insert(fragment.clone(), id);
        self.id_to_token.insert(id, fragment);
    }

    /// Mark an existing fragment as special: it is matched whole, before word splitting.
    ///
    /// Returns `false` if the fragment is not in the vocabulary.
    pub fn add_special_token(&mut self, token: &str) -> bool {
        if !self.token_to_id.contains_key(token.as_bytes()) {
            return false;
        }
        if !self.special_tokens.iter().any(|t| t == token) {
            self.special_tokens.push(token.to_string());
            let alternation = self
                .special_tokens
                .iter()
                .map(|t| regex::escape(t))
                .collect::<Vec<_>>()
                .join("|");
            // Escaped literals always form a valid pattern.
            self.special_pattern = Regex::new(&alternation).ok();
        }
        true
    }

    pub fn special_tokens(&self) -> &[String] {
        &self.special_tokens
    }

    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    /// Look up the id of an exact fragment.
    pub fn token_id(&self, fragment: &[u8]) -> Option<TokenId> {
        self.token_to_id.get(fragment).copied()
    }

    /// Raw bytes of a token's fragment.
    pub fn fragment(&self, id: TokenId) -> TokenizerResult<&[u8]> {
        self.id_to_token
            .get(&id)
            .map(Vec::as_slice)
            .ok_or(TokenizerError::InvalidToken(id))
    }

    pub fn contains(&self, id: TokenId) -> bool {
        self.id_to_token.contains_key(&id)
    }

    fn words<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut words = Vec::new();
        let mut rest = text;
        if let Some(special) = &self.special_pattern {
            while let Some(m) = special.find(rest) {
                split_words(&rest[..m.start()], &mut words);
                words.push(m.as_str());
                rest = &rest[m.end()..];
            }
        }
        split_words(rest, &mut words);
        words
    }

    /// Greedy longest-prefix match of one word. Bytes with no fragment are skipped.
    fn encode_word(&self, word: &[u8], out: &mut Vec<TokenId>) {
        let mut i = 0;
        while i < word.len() {
            let longest = (i + 1..=word.len().min(i + self.max_token_len))
                .rev()
                .find_map(|j| self.token_id(&word[i..j]).map(|id| (id, j)));
            match longest {
                Some((id, j)) => {
                    out.push(id);
                    i = j;
                }
                None => {
                    tracing::warn!(byte = word[i], "unknown token, skipping byte");
                    i += 1;
                }
            }
        }
    }
}

impl Tokenizer for Vocabulary {
    fn encode(&self, text: &str) -> TokenizerResult<Vec<TokenId>> {
        let mut ids = Vec::new();
        for word in self.words(text) {
            self.encode_word(word.as_bytes(), &mut ids);
        }
        Ok(ids)
    }

    fn decode(&self, tokens: &[TokenId]) -> TokenizerResult<String> {
        let mut bytes = Vec::new();
        for &id in tokens {
            bytes.extend_from_slice(self.fragment(id)?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn vocab_size(&self) -> usize {
        self.len()
    }
}
