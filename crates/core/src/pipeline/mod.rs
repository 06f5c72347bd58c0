use std::fmt;

use thiserror::Error;

use crate::cancel::CancelScope;
use crate::config::PipelineConfig;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::{CompletionRequest, ErrorClass, LanguageModel, LanguageModelError};
use crate::prompts::{PromptError, PromptRegistry};
use crate::retry::{retry_with_policy, RetryError, RetryPolicy};
use crate::validation::PoemText;

/// Placeholder the meter and rhyme instructions use for the original poem.
pub const REFERENCE_PLACEHOLDER: &str = "reference_poem";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Stage {
    Translate,
    Meter,
    Rhyme,
}

impl Stage {
    /// Execution order. Each stage consumes the previous stage's output.
    pub const ALL: [Stage; 3] = [Stage::Translate, Stage::Meter, Stage::Rhyme];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Translate => "translation",
            Self::Meter => "meter adjustment",
            Self::Rhyme => "rhyme adjustment",
        }
    }

    pub fn prompt_key(&self) -> &'static str {
        match self {
            Self::Translate => "translate",
            Self::Meter => "meter",
            Self::Rhyme => "rhyme",
        }
    }

    pub fn progress_message(&self) -> &'static str {
        match self {
            Self::Translate => "Translating...",
            Self::Meter => "Adjusting meter...",
            Self::Rhyme => "Rhyming...",
        }
    }

    /// Translation runs on the cheaper model; the structural rewrites need the
    /// stronger one.
    pub fn model<'a>(&self, config: &'a PipelineConfig) -> &'a str {
        match self {
            Self::Translate => &config.translator_model,
            Self::Meter | Self::Rhyme => &config.adjuster_model,
        }
    }

    /// Translation is always deterministic.
    pub fn temperature(&self, requested: f32) -> f32 {
        match self {
            Self::Translate => 0.0,
            Self::Meter | Self::Rhyme => requested.clamp(0.0, 1.0),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Input for one stage. `reference` is always the original poem; `working`
/// is the previous stage's output, or the poem itself for translation.
#[derive(Clone, Copy, Debug)]
pub struct StageRequest<'a> {
    pub reference: &'a PoemText,
    pub working: &'a str,
    pub temperature: f32,
}

impl<'a> StageRequest<'a> {
    pub fn translation(reference: &'a PoemText) -> Self {
        Self {
            reference,
            working: reference.as_str(),
            temperature: 0.0,
        }
    }

    pub fn adjustment(reference: &'a PoemText, working: &'a str, temperature: f32) -> Self {
        Self {
            reference,
            working,
            temperature,
        }
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("failed to render prompt for stage {stage}: {source}")]
    Prompt {
        stage: Stage,
        #[source]
        source: PromptError,
    },
    #[error("stage {stage} failed after {attempts} attempts: {source}")]
    Exhausted {
        stage: Stage,
        attempts: usize,
        #[source]
        source: LanguageModelError,
    },
    #[error("stage {stage} failed: {source}")]
    Model {
        stage: Stage,
        #[source]
        source: LanguageModelError,
    },
    #[error("stage {stage} was cancelled")]
    Cancelled { stage: Stage },
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Prompt { stage, .. }
            | Self::Exhausted { stage, .. }
            | Self::Model { stage, .. }
            | Self::Cancelled { stage } => *stage,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Runs the translate → meter → rhyme chain against a [`LanguageModel`].
///
/// Every stage can also be run on its own with an explicit working text, so a
/// caller can redo meter or rhyme without paying for a fresh translation.
pub struct PoemPipeline<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    settings: &'a PipelineConfig,
    retry: RetryPolicy,
}

impl<'a> PoemPipeline<'a> {
    pub fn new(
        prompts: &'a PromptRegistry,
        sink: &'a dyn LogSink,
        settings: &'a PipelineConfig,
    ) -> Self {
        Self {
            prompts,
            sink,
            settings,
            retry: RetryPolicy::from_config(settings),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn run<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        reference: &PoemText,
        temperature: f32,
        scope: &CancelScope,
    ) -> Result<String, StageError> {
        self.log(
            LogLevel::Info,
            format!(
                "Starting pipeline for a {}-word poem (temperature {:.2})",
                reference.word_count(),
                temperature
            ),
        );
        let translated = self.translate(model, reference, scope)?;
        let metered = self.adjust_meter(
            model,
            &StageRequest::adjustment(reference, &translated, temperature),
            scope,
        )?;
        self.adjust_rhyme(
            model,
            &StageRequest::adjustment(reference, &metered, temperature),
            scope,
        )
    }

    pub fn translate<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        reference: &PoemText,
        scope: &CancelScope,
    ) -> Result<String, StageError> {
        self.run_stage(
            model,
            Stage::Translate,
            &StageRequest::translation(reference),
            scope,
        )
    }

    pub fn adjust_meter<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &StageRequest<'_>,
        scope: &CancelScope,
    ) -> Result<String, StageError> {
        self.run_stage(model, Stage::Meter, request, scope)
    }

    pub fn adjust_rhyme<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &StageRequest<'_>,
        scope: &CancelScope,
    ) -> Result<String, StageError> {
        self.run_stage(model, Stage::Rhyme, request, scope)
    }

    pub fn run_stage<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        stage: Stage,
        request: &StageRequest<'_>,
        scope: &CancelScope,
    ) -> Result<String, StageError> {
        let system = self
            .prompts
            .format_with(
                stage.prompt_key(),
                [(REFERENCE_PLACEHOLDER, request.reference.as_str())],
            )
            .map_err(|source| StageError::Prompt { stage, source })?;

        let completion = CompletionRequest::new(stage.model(self.settings), &system, request.working)
            .with_temperature(stage.temperature(request.temperature))
            .with_max_tokens(self.settings.max_tokens);

        self.log(LogLevel::Info, stage.progress_message());

        let result = retry_with_policy(&self.retry, scope, self.sink, stage.label(), |attempt| {
            self.log(
                LogLevel::Debug,
                format!(
                    "Sending {} request to `{}` (attempt {attempt})",
                    stage.label(),
                    completion.model
                ),
            );
            let text = model.complete(&completion, scope)?;
            if text.trim().is_empty() {
                return Err(LanguageModelError::message(
                    ErrorClass::Transient,
                    "model returned empty content",
                ));
            }
            Ok(text)
        });

        match result {
            Ok(text) => {
                self.log(
                    LogLevel::Debug,
                    format!("{} result:\n{}", stage.label(), text),
                );
                Ok(text)
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                self.log(
                    LogLevel::Error,
                    format!("Error communicating with the completion service: {last}"),
                );
                Err(StageError::Exhausted {
                    stage,
                    attempts,
                    source: last,
                })
            }
            Err(RetryError::Fatal(err)) if err.is_cancelled() => {
                Err(StageError::Cancelled { stage })
            }
            Err(RetryError::Fatal(source)) => {
                self.log(
                    LogLevel::Error,
                    format!("Error communicating with the completion service: {source}"),
                );
                Err(StageError::Model { stage, source })
            }
            Err(RetryError::Cancelled { .. }) => Err(StageError::Cancelled { stage }),
        }
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}
