use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use poem_core::{
    CancelScope, CompletionRequest, ErrorClass, LanguageModel, LanguageModelError, Outcome,
    PipelineConfig, PoemTranslator, PromptRegistry, RetryPolicy, VecLogSink, WarningKind,
};

const GOETHE: &str = "\
Über allen Gipfeln
Ist Ruh,
In allen Wipfeln
Spürest du
Kaum einen Hauch;
Die Vögelein schweigen im Walde.
Warte nur, balde
Ruhest du auch.";

#[derive(Clone, Debug)]
struct Call {
    model: String,
    system: String,
    user: String,
    temperature: f32,
}

struct MockLanguageModel {
    responses: Mutex<VecDeque<Result<String, LanguageModelError>>>,
    calls: Mutex<Vec<Call>>,
}

impl MockLanguageModel {
    fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::scripted(responses.into_iter().map(|text| Ok(text.into())))
    }

    fn scripted<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = Result<String, LanguageModelError>>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("mock mutex poisoned").clone()
    }

    fn assert_empty(&self) {
        let guard = self.responses.lock().expect("mock mutex poisoned");
        assert!(
            guard.is_empty(),
            "expected all mock responses to be consumed"
        );
    }
}

impl LanguageModel for MockLanguageModel {
    fn complete(
        &self,
        request: &CompletionRequest<'_>,
        _scope: &CancelScope,
    ) -> Result<String, LanguageModelError> {
        self.calls.lock().expect("mock mutex poisoned").push(Call {
            model: request.model.to_string(),
            system: request.system.to_string(),
            user: request.user.to_string(),
            temperature: request.temperature,
        });
        let mut guard = self.responses.lock().expect("mock mutex poisoned");
        guard.pop_front().unwrap_or_else(|| {
            Err(LanguageModelError::fatal(io::Error::new(
                io::ErrorKind::Other,
                "mock language model has no remaining responses",
            )))
        })
    }
}

/// Blocks until the scope is cancelled, the way a hung HTTP call bounded by
/// the scope would.
struct StalledLanguageModel {
    calls: AtomicUsize,
}

impl LanguageModel for StalledLanguageModel {
    fn complete(
        &self,
        _request: &CompletionRequest<'_>,
        scope: &CancelScope,
    ) -> Result<String, LanguageModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        while !scope.is_cancelled() {
            thread::sleep(Duration::from_millis(5));
        }
        Err(LanguageModelError::cancelled())
    }
}

struct PanickingLanguageModel;

impl LanguageModel for PanickingLanguageModel {
    fn complete(
        &self,
        _request: &CompletionRequest<'_>,
        _scope: &CancelScope,
    ) -> Result<String, LanguageModelError> {
        panic!("decoder blew up")
    }
}

fn transient(message: &str) -> Result<String, LanguageModelError> {
    Err(LanguageModelError::message(ErrorClass::Transient, message))
}

#[test]
fn full_pipeline_returns_the_rhymed_poem() {
    let prompts = PromptRegistry::new().expect("built-in prompts");
    let sink = VecLogSink::new();
    let settings = PipelineConfig::default();
    let translator = PoemTranslator::new(&prompts, &sink, &settings);
    let model = MockLanguageModel::new([
        "Over all the summits\nIs rest",
        "Over all the hilltops\nIs rest",
        "O'er all the hilltops\nIs rest, and blest",
    ]);

    let outcome = translator.translate_poem(&model, GOETHE, 0.25);

    assert_eq!(
        outcome,
        Outcome::Poem("O'er all the hilltops\nIs rest, and blest".to_string())
    );
    model.assert_empty();

    let calls = model.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].user, GOETHE);
    assert_eq!(calls[0].temperature, 0.0);
    assert_eq!(calls[0].model, settings.translator_model);
    assert!(!calls[0].system.contains(GOETHE));
    assert_eq!(calls[1].user, "Over all the summits\nIs rest");
    assert_eq!(calls[1].model, settings.adjuster_model);
    assert!(calls[1].system.contains(GOETHE));
    assert_eq!(calls[2].user, "Over all the hilltops\nIs rest");
    assert!(calls[2].system.contains(GOETHE));
    assert_eq!(calls[2].temperature, 0.25);

    assert!(sink.contains("Translating..."));
    assert!(sink.contains("Adjusting meter..."));
    assert!(sink.contains("Rhyming..."));
}

#[test]
fn sonnet_length_input_passes_the_gate() {
    let sonnet = vec!["Ich sah dich gestern Abend wieder stehen"; 20].join("\n");
    assert_eq!(sonnet.split_whitespace().count(), 140);

    let prompts = PromptRegistry::new().expect("built-in prompts");
    let settings = PipelineConfig::default();
    let sink = VecLogSink::new();
    let translator = PoemTranslator::new(&prompts, &sink, &settings);
    let model = MockLanguageModel::new(["translated", "metered", "rhymed sonnet"]);

    let outcome = translator.translate_poem(&model, &sonnet, 0.6);
    assert_eq!(outcome.poem(), Some("rhymed sonnet"));
    assert_eq!(model.calls()[0].user, sonnet);
}

#[test]
fn empty_input_is_rejected_without_remote_calls() {
    let prompts = PromptRegistry::new().expect("built-in prompts");
    let settings = PipelineConfig::default();
    let sink = VecLogSink::new();
    let translator = PoemTranslator::new(&prompts, &sink, &settings);
    let model = MockLanguageModel::new(Vec::<String>::new());

    for input in ["", "   \n\t "] {
        let outcome = translator.translate_poem(&model, input, 0.25);
        assert_eq!(
            outcome.display_text(),
            "@#$%^&*()Warning: The text is too short."
        );
    }
    assert!(model.calls().is_empty());
}

#[test]
fn oversized_input_is_rejected_without_remote_calls() {
    let prompts = PromptRegistry::new().expect("built-in prompts");
    let settings = PipelineConfig::default();
    let sink = VecLogSink::new();
    let translator = PoemTranslator::new(&prompts, &sink, &settings);
    let model = MockLanguageModel::new(Vec::<String>::new());

    let too_long = vec!["line"; 701].join(" ");
    let outcome = translator.translate_poem(&model, &too_long, 0.25);
    assert_eq!(
        outcome.display_text(),
        "@#$%^&*()Warning: The text is too long."
    );
    assert!(model.calls().is_empty());

    let at_limit = vec!["line"; 700].join(" ");
    let model = MockLanguageModel::new(["a", "b", "c"]);
    assert!(!translator.translate_poem(&model, &at_limit, 0.25).is_warning());
}

#[test]
fn exhausted_retries_surface_the_service_failure() {
    let prompts = PromptRegistry::new().expect("built-in prompts");
    let sink = VecLogSink::new();
    let settings = PipelineConfig::default();
    let translator = PoemTranslator::new(&prompts, &sink, &settings);
    let model = MockLanguageModel::scripted((0..5).map(|_| transient("HTTP 503")));

    let outcome = translator.translate_poem(&model, GOETHE, 0.25);

    assert_eq!(outcome.warning_kind(), Some(WarningKind::ServiceFailure));
    assert_eq!(
        outcome.display_text(),
        "@#$%^&*()Error: Failed to get response from OpenAI."
    );
    assert_eq!(model.calls().len(), 5);
    assert!(sink.contains("attempt 5/5 failed"));
}

#[test]
fn failed_stage_never_feeds_the_next_one() {
    let prompts = PromptRegistry::new().expect("built-in prompts");
    let settings = PipelineConfig::default();
    let sink = VecLogSink::new();
    let translator = PoemTranslator::new(&prompts, &sink, &settings)
        .with_retry_policy(RetryPolicy::new(2, Duration::ZERO));
    let model = MockLanguageModel::scripted([
        Ok("translated".to_string()),
        transient("HTTP 500"),
        transient("HTTP 500"),
    ]);

    let outcome = translator.translate_poem(&model, GOETHE, 0.25);

    assert!(outcome.is_warning());
    let calls = model.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|call| !call.user.contains("HTTP 500")));
}

#[test]
fn blank_final_poem_is_a_failure() {
    let prompts = PromptRegistry::new().expect("built-in prompts");
    let settings = PipelineConfig::default();
    let sink = VecLogSink::new();
    let translator = PoemTranslator::new(&prompts, &sink, &settings)
        .with_retry_policy(RetryPolicy::new(1, Duration::ZERO));
    let model = MockLanguageModel::new(["translated", "metered", "   "]);

    let outcome = translator.translate_poem(&model, GOETHE, 0.25);
    assert!(outcome.warning_kind().is_some_and(|kind| kind.is_failure()));
}

#[test]
fn watchdog_ceiling_cancels_a_hung_call() {
    let prompts = PromptRegistry::new().expect("built-in prompts");
    let settings = PipelineConfig::default();
    let sink = VecLogSink::new();
    let translator = PoemTranslator::new(&prompts, &sink, &settings)
        .with_timeout(Duration::from_millis(100));
    let model = StalledLanguageModel {
        calls: AtomicUsize::new(0),
    };

    let started = Instant::now();
    let outcome = translator.translate_poem(&model, GOETHE, 0.25);

    assert_eq!(outcome.warning_kind(), Some(WarningKind::TimedOut));
    assert_eq!(
        outcome.display_text(),
        "@#$%^&*()Error: Failed to get response from OpenAI."
    );
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn worker_panic_becomes_a_warning() {
    let prompts = PromptRegistry::new().expect("built-in prompts");
    let sink = VecLogSink::new();
    let settings = PipelineConfig::default();
    let translator = PoemTranslator::new(&prompts, &sink, &settings);

    let outcome = translator.translate_poem(&PanickingLanguageModel, GOETHE, 0.25);

    assert_eq!(outcome.warning_kind(), Some(WarningKind::Crashed));
    assert!(sink.contains("decoder blew up"));
}

#[test]
fn temperature_is_clamped_into_range() {
    let prompts = PromptRegistry::new().expect("built-in prompts");
    let settings = PipelineConfig::default();
    let sink = VecLogSink::new();
    let translator = PoemTranslator::new(&prompts, &sink, &settings);
    let model = MockLanguageModel::new(["a", "b", "c"]);

    translator.translate_poem(&model, GOETHE, 3.0);

    let calls = model.calls();
    assert_eq!(calls[0].temperature, 0.0);
    assert_eq!(calls[1].temperature, 1.0);
    assert_eq!(calls[2].temperature, 1.0);
}
