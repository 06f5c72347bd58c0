use poem_core::{ErrorClass, LanguageModelError, Retryable};
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
    #[error("interface `{interface}` requires an API key")]
    MissingCredential { interface: String },
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("API returned an empty response")]
    EmptyResponse,
    #[error("request cancelled before completion")]
    Cancelled,
}

impl AdapterError {
    /// Throttling, server-side failures and flaky transport are worth another
    /// attempt; anything the caller has to fix is not.
    pub fn class(&self) -> ErrorClass {
        match self {
            AdapterError::Http(err) if err.is_builder() => ErrorClass::Fatal,
            AdapterError::Http(_) | AdapterError::Json(_) | AdapterError::EmptyResponse => {
                ErrorClass::Transient
            }
            AdapterError::HttpStatus { status, .. } => status_class(*status),
            AdapterError::InvalidConfig(_) | AdapterError::MissingCredential { .. } => {
                ErrorClass::Fatal
            }
            AdapterError::Cancelled => ErrorClass::Cancelled,
        }
    }
}

impl Retryable for AdapterError {
    fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<AdapterError> for LanguageModelError {
    fn from(err: AdapterError) -> Self {
        LanguageModelError::new(err.class(), err)
    }
}

fn status_class(status: StatusCode) -> ErrorClass {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::CONFLICT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> AdapterError {
        AdapterError::HttpStatus {
            status: StatusCode::from_u16(code).unwrap(),
            body: String::new(),
        }
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        for code in [408, 409, 429, 500, 502, 503, 504] {
            assert!(status(code).is_retryable(), "{code} should be retryable");
        }
        assert!(AdapterError::EmptyResponse.is_retryable());
    }

    #[test]
    fn client_errors_are_fatal() {
        for code in [400, 401, 403, 404, 422] {
            assert!(!status(code).is_retryable(), "{code} should be fatal");
        }
        assert!(!AdapterError::InvalidConfig("bad".into()).is_retryable());
        assert!(!AdapterError::MissingCredential {
            interface: "openai".into()
        }
        .is_retryable());
    }

    #[test]
    fn conversion_keeps_the_classification() {
        let err: LanguageModelError = status(429).into();
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.to_string().contains("429"));

        let err: LanguageModelError = AdapterError::Cancelled.into();
        assert!(err.is_cancelled());
    }
}
