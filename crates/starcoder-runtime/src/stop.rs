//! End-of-sequence detection.

use std::collections::BTreeSet;

use starcoder_engine::{Result, StarcoderError, TokenId};
use starcoder_tokenizer::Vocabulary;

/// The universal end fragment of the StarCoder vocabularies.
pub const END_OF_TEXT: &str = "<|endoftext|>";

/// Halts generation as soon as the latest emitted id is a configured end id.
///
/// Configured once per loaded model; requests never change it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StopPolicy {
    end_ids: BTreeSet<TokenId>,
}

impl StopPolicy {
    pub fn new(end_ids: impl IntoIterator<Item = TokenId>) -> Self {
        Self {
            end_ids: end_ids.into_iter().collect(),
        }
    }

    /// A policy that never stops; generation always runs to its budget.
    pub fn never() -> Self {
        Self::default()
    }

    /// Resolve the end-id set for a loaded vocabulary.
    ///
    /// Explicit ids win and must exist in the vocabulary. Without them the
    /// vocabulary's `<|endoftext|>` fragment is used.
    pub fn resolve(vocab: &Vocabulary, explicit: &[TokenId]) -> Result<Self> {
        if !explicit.is_empty() {
            if let Some(&missing) = explicit.iter().find(|&&id| !vocab.contains(id)) {
                return Err(StarcoderError::LoadFailure(format!(
                    "end-of-sequence id {missing} is not in the vocabulary"
                )));
            }
            return Ok(Self::new(explicit.iter().copied()));
        }

        vocab
            .token_id(END_OF_TEXT.as_bytes())
            .map(|id| Self::new([id]))
            .ok_or_else(|| {
                StarcoderError::LoadFailure(format!(
                    "vocabulary has no {END_OF_TEXT} token; pass the end-of-sequence id explicitly"
                ))
            })
    }

    pub fn should_stop(&self, token: TokenId) -> bool {
        self.end_ids.contains(&token)
    }

    pub fn end_ids(&self) -> impl Iterator<Item = TokenId> + '_ {
        self.end_ids.iter().copied()
    }
}
