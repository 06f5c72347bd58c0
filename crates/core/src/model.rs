use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::cancel::CancelScope;
use crate::retry::Retryable;

/// One chat-completion call: a system instruction plus a single user message.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub user: &'a str,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl<'a> CompletionRequest<'a> {
    pub fn new(model: &'a str, system: &'a str, user: &'a str) -> Self {
        Self {
            model,
            system,
            user,
            temperature: 0.0,
            max_tokens: 1000,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// Worth another attempt: transport hiccups, throttling, server errors.
    Transient,
    /// Retrying cannot help: bad credentials, malformed requests.
    Fatal,
    Cancelled,
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

#[derive(Debug)]
pub struct LanguageModelError {
    class: ErrorClass,
    inner: Box<dyn StdError + Send + Sync>,
}

impl LanguageModelError {
    pub fn new<E>(class: ErrorClass, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            class,
            inner: Box::new(error),
        }
    }

    pub fn transient<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::new(ErrorClass::Transient, error)
    }

    pub fn fatal<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::new(ErrorClass::Fatal, error)
    }

    pub fn message(class: ErrorClass, message: impl Into<String>) -> Self {
        Self::new(class, Message(message.into()))
    }

    pub fn cancelled() -> Self {
        Self::message(ErrorClass::Cancelled, "request cancelled")
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    pub fn is_cancelled(&self) -> bool {
        self.class == ErrorClass::Cancelled
    }

    pub fn as_inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.inner.as_ref()
    }
}

impl fmt::Display for LanguageModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for LanguageModelError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl Retryable for LanguageModelError {
    fn is_retryable(&self) -> bool {
        self.class == ErrorClass::Transient
    }
}

/// A remote completion endpoint. Implementations make exactly one attempt per
/// call; retrying is the caller's business.
pub trait LanguageModel: Send + Sync {
    fn complete(
        &self,
        request: &CompletionRequest<'_>,
        scope: &CancelScope,
    ) -> Result<String, LanguageModelError>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn complete(
        &self,
        request: &CompletionRequest<'_>,
        scope: &CancelScope,
    ) -> Result<String, LanguageModelError> {
        (**self).complete(request, scope)
    }
}

impl<M: LanguageModel + ?Sized> LanguageModel for Arc<M> {
    fn complete(
        &self,
        request: &CompletionRequest<'_>,
        scope: &CancelScope,
    ) -> Result<String, LanguageModelError> {
        (**self).complete(request, scope)
    }
}
