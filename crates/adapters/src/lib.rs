mod base_url;
mod error;
mod llm;

pub use base_url::{check_base_url, resolve_base_url};
pub use error::AdapterError;
pub use llm::{
    create_chat_model, create_chat_model_from_profile, AzureOpenAiChatModel, OpenAiChatModel,
};

pub use poem_core::config::{Config, ConfigStore, LlmConfig};
pub use poem_core::{CancelScope, CompletionRequest, Credential, LanguageModel, LanguageModelError};
