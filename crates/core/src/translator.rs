use std::time::Duration;

use crate::cancel::CancelScope;
use crate::config::PipelineConfig;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::LanguageModel;
use crate::outcome::{Outcome, Warning, WarningKind};
use crate::pipeline::{PoemPipeline, StageError};
use crate::prompts::PromptRegistry;
use crate::retry::RetryPolicy;
use crate::validation::{PoemText, ValidationError, WordLimits};
use crate::watchdog::{Watchdog, WatchdogError};

/// Entry point for a single submission: word-count gate, then the stage
/// pipeline under a watchdog. Every failure comes back as an
/// [`Outcome::Warning`].
pub struct PoemTranslator<'a> {
    pipeline: PoemPipeline<'a>,
    limits: WordLimits,
    watchdog: Watchdog,
    sink: &'a dyn LogSink,
}

impl<'a> PoemTranslator<'a> {
    pub fn new(
        prompts: &'a PromptRegistry,
        sink: &'a dyn LogSink,
        settings: &'a PipelineConfig,
    ) -> Self {
        Self {
            pipeline: PoemPipeline::new(prompts, sink, settings),
            limits: WordLimits::from(settings),
            watchdog: Watchdog::new(settings.timeout()),
            sink,
        }
    }

    pub fn with_timeout(mut self, ceiling: Duration) -> Self {
        self.watchdog = Watchdog::new(ceiling);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.pipeline = self.pipeline.with_retry_policy(retry);
        self
    }

    pub fn limits(&self) -> WordLimits {
        self.limits
    }

    /// Checks the word count only; no remote call is made.
    pub fn validate(&self, text: &str) -> Result<PoemText, Warning> {
        PoemText::parse(text, self.limits).map_err(|err| {
            let kind = match err {
                ValidationError::TooLong { .. } => WarningKind::TextTooLong,
                ValidationError::TooShort { .. } => WarningKind::TextTooShort,
            };
            Warning::with_detail(kind, err.to_string())
        })
    }

    pub fn translate_poem<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        text: &str,
        temperature: f32,
    ) -> Outcome {
        self.translate_poem_with_scope(model, text, temperature, &CancelScope::new())
    }

    /// Like [`translate_poem`](Self::translate_poem), but stops early once
    /// `scope` is cancelled.
    pub fn translate_poem_with_scope<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        text: &str,
        temperature: f32,
        scope: &CancelScope,
    ) -> Outcome {
        let poem = match self.validate(text) {
            Ok(poem) => poem,
            Err(warning) => {
                self.log(
                    LogLevel::Warn,
                    format!(
                        "Rejected input: {}",
                        warning.detail.as_deref().unwrap_or("invalid text")
                    ),
                );
                return Outcome::Warning(warning);
            }
        };

        let temperature = if temperature.is_nan() {
            0.0
        } else {
            temperature.clamp(0.0, 1.0)
        };
        let pipeline = &self.pipeline;
        let result = self.watchdog.run(scope, |worker_scope| {
            pipeline.run(model, &poem, temperature, worker_scope)
        });

        match result {
            Ok(text) if text.trim().is_empty() => {
                self.log(LogLevel::Error, "Pipeline produced an empty poem");
                Outcome::Warning(Warning::new(WarningKind::EmptyResult))
            }
            Ok(text) => {
                self.log(LogLevel::Info, "Translation finished");
                Outcome::Poem(text)
            }
            Err(WatchdogError::TimedOut { ceiling }) => {
                self.log(
                    LogLevel::Error,
                    format!("Translation timed out after {}s", ceiling.as_secs_f32()),
                );
                Outcome::Warning(Warning::with_detail(
                    WarningKind::TimedOut,
                    format!("no result within {ceiling:?}"),
                ))
            }
            Err(WatchdogError::Crashed(message)) => {
                self.log(
                    LogLevel::Error,
                    format!("Translation worker crashed: {message}"),
                );
                Outcome::Warning(Warning::with_detail(WarningKind::Crashed, message))
            }
            Err(WatchdogError::Failed(err)) => self.stage_failure(err, scope),
        }
    }

    fn stage_failure(&self, err: StageError, scope: &CancelScope) -> Outcome {
        self.log(LogLevel::Error, format!("Translation failed: {err}"));
        // A stage can observe the watchdog deadline before the watchdog does.
        let kind = if err.is_cancelled() && !scope.is_cancelled() {
            WarningKind::TimedOut
        } else {
            WarningKind::ServiceFailure
        };
        Outcome::Warning(Warning::with_detail(kind, err.to_string()))
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}
