pub mod cancel;
pub mod config;
pub mod credential;
pub mod logging;
pub mod model;
pub mod outcome;
pub mod pipeline;
pub mod prompts;
pub mod retry;
pub mod translator;
pub mod validation;
pub mod watchdog;

pub use cancel::CancelScope;
pub use config::{
    Config, ConfigError, ConfigStore, LlmConfig, PipelineConfig, PromptConfig, RecentUsage,
    DEFAULT_CONFIG_FILE, DEFAULT_LLM_PROFILE,
};
pub use credential::Credential;
pub use logging::{
    FacadeLogSink, LogLevel, LogRecord, LogSink, NullLogSink, SharedLogSink, VecLogSink,
};
pub use model::{CompletionRequest, ErrorClass, LanguageModel, LanguageModelError};
pub use outcome::{is_warning_text, Outcome, Warning, WarningKind, WARNING_MARKER};
pub use pipeline::{PoemPipeline, Stage, StageError, StageRequest, REFERENCE_PLACEHOLDER};
pub use prompts::{PromptArguments, PromptError, PromptRegistry, PromptSource, PromptTemplate};
pub use retry::{retry_with_policy, RetryError, RetryPolicy, Retryable};
pub use translator::PoemTranslator;
pub use validation::{word_count, PoemText, ValidationError, WordLimits};
pub use watchdog::{Watchdog, WatchdogError};
