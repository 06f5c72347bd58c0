use thiserror::Error;

use crate::config::PipelineConfig;

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WordLimits {
    pub min: usize,
    pub max: usize,
}

impl Default for WordLimits {
    fn default() -> Self {
        Self { min: 1, max: 700 }
    }
}

impl From<&PipelineConfig> for WordLimits {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            min: config.min_words,
            max: config.max_words,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum ValidationError {
    #[error("the text is too long ({count} words, limit {max})")]
    TooLong { count: usize, max: usize },
    #[error("the text is too short ({count} words, minimum {min})")]
    TooShort { count: usize, min: usize },
}

/// Verse that passed the word-count gate. Stages only ever see a `PoemText`,
/// which is also the reference every stage measures itself against.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoemText {
    text: String,
    word_count: usize,
}

impl PoemText {
    pub fn parse(text: impl Into<String>, limits: WordLimits) -> Result<Self, ValidationError> {
        let text = text.into();
        let count = word_count(&text);
        if count > limits.max {
            return Err(ValidationError::TooLong {
                count,
                max: limits.max,
            });
        }
        if count < limits.min {
            return Err(ValidationError::TooShort {
                count,
                min: limits.min,
            });
        }
        Ok(Self {
            text,
            word_count: count,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn word_count(&self) -> usize {
        self.word_count
    }
}

impl AsRef<str> for PoemText {
    fn as_ref(&self) -> &str {
        &self.text
    }
}
