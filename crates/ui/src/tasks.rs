use std::path::PathBuf;
use std::thread;

use poem_adapters::{create_chat_model, AdapterError};
use poem_core::config::{ConfigError, ConfigStore};
use poem_core::logging::{LogLevel, LogRecord, LogSink};
use poem_core::prompts::{PromptError, PromptRegistry};
use poem_core::{
    CancelScope, CompletionRequest, Credential, LanguageModel, LanguageModelError, Outcome,
    PoemTranslator, WarningKind,
};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub type EventSender = UnboundedSender<TaskEvent>;

const TEST_PROMPT: &str = "Please reply 'OK'";

#[derive(Clone, Debug)]
pub enum TaskCommand {
    TranslatePoem(TranslatePoemCommand),
    TestLlm(TestLlmCommand),
}

impl TaskCommand {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskCommand::TranslatePoem(_) => TaskKind::TranslatePoem,
            TaskCommand::TestLlm(_) => TaskKind::TestLlm,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskKind {
    TranslatePoem,
    TestLlm,
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::TranslatePoem => "Translate poem",
            TaskKind::TestLlm => "Test LLM interface",
        }
    }
}

/// One form submission. The credential travels with the command and is gone
/// once the task finishes.
#[derive(Clone, Debug)]
pub struct TranslatePoemCommand {
    pub config_path: PathBuf,
    pub llm_interface: Option<String>,
    pub poem: String,
    pub temperature: f32,
    pub credential: Credential,
}

#[derive(Clone, Debug)]
pub struct TestLlmCommand {
    pub config_path: PathBuf,
    pub interface: Option<String>,
    pub credential: Option<Credential>,
}

/// Runs commands on a background thread with its own runtime so the form
/// stays responsive.
#[derive(Debug)]
pub struct TaskController {
    sender: UnboundedSender<TaskCommand>,
    receiver: UnboundedReceiver<TaskEvent>,
    _worker: thread::JoinHandle<()>,
}

impl TaskController {
    pub fn new() -> Self {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let worker_tx = event_tx.clone();

        let handle = thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    log::error!("failed to build task runtime: {err}");
                    return;
                }
            };

            runtime.block_on(async move {
                while let Some(command) = command_rx.recv().await {
                    let sender = worker_tx.clone();
                    tokio::spawn(run_command(command, sender));
                }
            });
        });

        Self {
            sender: command_tx,
            receiver: event_rx,
            _worker: handle,
        }
    }

    pub fn send(&self, command: TaskCommand) -> Result<(), TaskSendError> {
        self.sender
            .send(command)
            .map_err(|_| TaskSendError::ChannelClosed)
    }

    pub fn try_recv(&mut self) -> Option<TaskEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Default for TaskController {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum TaskSendError {
    #[error("task channel is closed")]
    ChannelClosed,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("prompt error: {0}")]
    Prompt(#[from] PromptError),
    #[error("language model error: {0}")]
    Model(#[from] LanguageModelError),
    #[error("{0}")]
    Custom(String),
    #[error("background task crashed: {0}")]
    Join(String),
}

#[derive(Debug)]
pub enum TaskEvent {
    Log(LogRecord),
    TaskStarted(TaskKind),
    TranslationReady(Outcome),
    TaskFinished {
        kind: TaskKind,
        result: Result<(), TaskError>,
    },
}

struct ChannelLogSink {
    sender: EventSender,
}

impl ChannelLogSink {
    fn new(sender: EventSender) -> Self {
        Self { sender }
    }

    fn emit(&self, record: LogRecord) {
        let _ = self.sender.send(TaskEvent::Log(record));
    }
}

impl LogSink for ChannelLogSink {
    fn log(&self, record: LogRecord) {
        self.emit(record);
    }
}

async fn run_command(command: TaskCommand, sender: EventSender) {
    let kind = command.kind();
    let _ = sender.send(TaskEvent::TaskStarted(kind));
    let sender_clone = sender.clone();
    let result = tokio::task::spawn_blocking(move || execute_command(command, sender_clone)).await;
    let outcome = match result {
        Ok(res) => res,
        Err(err) => Err(TaskError::Join(err.to_string())),
    };
    let _ = sender.send(TaskEvent::TaskFinished {
        kind,
        result: outcome,
    });
}

fn execute_command(command: TaskCommand, sender: EventSender) -> Result<(), TaskError> {
    match command {
        TaskCommand::TranslatePoem(cmd) => run_translate_poem(cmd, sender),
        TaskCommand::TestLlm(cmd) => run_test_llm(cmd, sender),
    }
}

fn run_translate_poem(command: TranslatePoemCommand, sender: EventSender) -> Result<(), TaskError> {
    let mut store = ConfigStore::open(command.config_path)?;
    store.ensure_recent_defaults();
    let selected = resolve_llm_interface(&store, command.llm_interface)?;
    let sink = ChannelLogSink::new(sender.clone());
    sink.emit(LogRecord::new(
        LogLevel::Debug,
        format!("Using LLM interface `{selected}`"),
    ));

    let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;
    let settings = store.config().pipeline.clone();
    let translator = PoemTranslator::new(&prompts, &sink, &settings);

    let outcome = match translator.validate(&command.poem) {
        Err(warning) => Outcome::Warning(warning),
        Ok(_) => match create_chat_model(store.config(), &selected, Some(command.credential)) {
            Ok(model) => {
                translator.translate_poem(model.as_ref(), &command.poem, command.temperature)
            }
            Err(AdapterError::MissingCredential { .. }) => {
                Outcome::warning(WarningKind::MissingCredential)
            }
            Err(err) => {
                sink.emit(LogRecord::new(
                    LogLevel::Error,
                    format!("Failed to create the model client: {err}"),
                ));
                Outcome::warning(WarningKind::ServiceFailure)
            }
        },
    };

    let succeeded = !outcome.is_warning();
    let _ = sender.send(TaskEvent::TranslationReady(outcome));
    if succeeded {
        store.touch_llm_interface(selected);
        store.save()?;
    }
    Ok(())
}

fn run_test_llm(command: TestLlmCommand, sender: EventSender) -> Result<(), TaskError> {
    let mut store = ConfigStore::open(command.config_path)?;
    store.ensure_recent_defaults();
    let selected = resolve_llm_interface(&store, command.interface)?;
    let sink = ChannelLogSink::new(sender);
    sink.emit(LogRecord::info(format!("Testing LLM interface `{selected}`")));
    let profile = store
        .config()
        .get_llm_profile(&selected)
        .cloned()
        .ok_or_else(|| TaskError::Custom(format!("no interface profile named `{selected}`")))?;
    sink.emit(LogRecord::new(
        LogLevel::Debug,
        format!(
            "Interface format: {} | Base URL: {}",
            profile.interface_format, profile.base_url
        ),
    ));

    let model = create_chat_model(store.config(), &selected, command.credential)?;
    let settings = &store.config().pipeline;
    let request = CompletionRequest::new(
        &settings.translator_model,
        "You are a helpful assistant.",
        TEST_PROMPT,
    );
    sink.emit(LogRecord::info(format!("Sending test prompt: {TEST_PROMPT}")));
    let response = model.complete(&request, &CancelScope::with_timeout(settings.timeout()))?;
    if response.trim().is_empty() {
        sink.emit(LogRecord::new(
            LogLevel::Error,
            "LLM test failed: no response received",
        ));
        return Err(TaskError::Custom(
            "LLM test failed: no response received".to_string(),
        ));
    }
    sink.emit(LogRecord::info("LLM test succeeded"));
    sink.emit(LogRecord::new(
        LogLevel::Debug,
        format!("Test reply: {response}"),
    ));
    store.touch_llm_interface(selected);
    store.save()?;
    Ok(())
}

fn resolve_llm_interface(
    store: &ConfigStore,
    requested: Option<String>,
) -> Result<String, TaskError> {
    store
        .resolve_llm_interface(requested.as_deref())
        .ok_or_else(|| TaskError::Custom("no LLM profile is configured".to_string()))
}
