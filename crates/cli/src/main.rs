use clap::{Args, Parser, Subcommand, ValueEnum};
use poem_adapters::{create_chat_model, AdapterError, LanguageModelError};
use poem_core::{
    CancelScope, CompletionRequest, Config, ConfigError, ConfigStore, Credential, FacadeLogSink,
    LanguageModel, LogLevel, LogRecord, LogSink, Outcome, PipelineConfig, PoemPipeline,
    PoemText, PoemTranslator, PromptError, PromptRegistry, Stage, StageError,
    StageRequest, ValidationError, Watchdog, WatchdogError, WarningKind, WordLimits,
    DEFAULT_CONFIG_FILE, DEFAULT_LLM_PROFILE,
};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const TEST_PROMPT: &str = "Please reply 'OK'";

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter(None, log::LevelFilter::Warn)
        .filter(Some("poem"), level)
        .filter(Some("poem_adapters"), level)
        .parse_default_env()
        .init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let sink = FacadeLogSink::new("poem");

    match cli.command {
        Command::Translate(args) => run_translate(&cli.config, args, &sink),
        Command::Stage(args) => run_stage(&cli.config, args, &sink),
        Command::Config(command) => handle_config(&cli.config, command, &sink),
    }
}

fn handle_config(
    config_path: &Path,
    command: ConfigCommand,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    match command {
        ConfigCommand::Init(args) => run_config_init(config_path, args, sink),
        ConfigCommand::TestLlm(args) => run_test_llm(config_path, args, sink),
    }
}

fn run_translate(
    config_path: &Path,
    args: TranslateArgs,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let settings = pipeline_settings(store.config(), &args.overrides)?;
    let poem = read_input(args.file.as_deref())?;
    let temperature = args.temperature.unwrap_or(settings.default_temperature);
    let selected = select_llm_interface(&store, args.connection.llm_interface.clone())?;
    let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;

    sink.log(LogRecord::new(
        LogLevel::Debug,
        format!("Using LLM interface `{selected}`"),
    ));

    let translator = PoemTranslator::new(&prompts, sink, &settings);
    let outcome = match translator.validate(&poem) {
        Err(warning) => Outcome::Warning(warning),
        Ok(_) => match create_chat_model(
            store.config(),
            &selected,
            args.connection.credential(),
        ) {
            Ok(model) => translator.translate_poem(model.as_ref(), &poem, temperature),
            Err(AdapterError::MissingCredential { .. }) => {
                Outcome::warning(WarningKind::MissingCredential)
            }
            Err(err) => return Err(err.into()),
        },
    };

    println!("{}", outcome.display_text());
    match outcome {
        Outcome::Poem(_) => {
            store.touch_llm_interface(selected);
            store.save()?;
            Ok(())
        }
        Outcome::Warning(warning) => Err(CliError::NoPoem(
            warning
                .detail
                .unwrap_or_else(|| warning.kind.message().to_string()),
        )),
    }
}

fn run_stage(config_path: &Path, args: StageArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let settings = pipeline_settings(store.config(), &args.overrides)?;
    let stage = Stage::from(args.stage);
    let reference = PoemText::parse(read_file(&args.reference)?, WordLimits::from(&settings))?;
    let working = args.working.as_deref().map(read_file).transpose()?;
    let temperature = args.temperature.unwrap_or(settings.default_temperature);
    let request = stage_request(stage, &reference, working.as_deref(), temperature)?;

    let selected = select_llm_interface(&store, args.connection.llm_interface.clone())?;
    let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;
    let model = create_chat_model(store.config(), &selected, args.connection.credential())?;

    let pipeline = PoemPipeline::new(&prompts, sink, &settings);
    let watchdog = Watchdog::new(settings.timeout());
    let output = watchdog
        .run(&CancelScope::new(), |scope| {
            pipeline.run_stage(model.as_ref(), stage, &request, scope)
        })
        .map_err(|err| match err {
            WatchdogError::TimedOut { ceiling } => CliError::TimedOut(ceiling),
            WatchdogError::Failed(err) => CliError::Stage(err),
            WatchdogError::Crashed(message) => CliError::Crashed(message),
        })?;

    println!("{output}");
    store.touch_llm_interface(selected);
    store.save()?;
    Ok(())
}

/// Translation always reads the reference; meter and rhyme need a draft.
fn stage_request<'a>(
    stage: Stage,
    reference: &'a PoemText,
    working: Option<&'a str>,
    temperature: f32,
) -> Result<StageRequest<'a>, CliError> {
    match (stage, working) {
        (Stage::Translate, None) => Ok(StageRequest::translation(reference)),
        (Stage::Translate, Some(_)) => Err(CliError::UnexpectedWorkingText),
        (other, None) => Err(CliError::MissingWorkingText(other)),
        (_, Some(working)) => Ok(StageRequest::adjustment(reference, working, temperature)),
    }
}

fn run_config_init(
    config_path: &Path,
    args: ConfigInitArgs,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    if config_path.exists() && !args.force {
        return Err(CliError::ConfigExists(config_path.to_path_buf()));
    }

    let mut config = Config::with_default_profile();
    config.recent.last_llm_interface = Some(DEFAULT_LLM_PROFILE.to_string());
    config.to_path(config_path)?;

    sink.log(LogRecord::info(format!(
        "Wrote default configuration to {}",
        config_path.display()
    )));
    Ok(())
}

fn run_test_llm(config_path: &Path, args: TestLlmArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let selected = select_llm_interface(&store, args.connection.llm_interface.clone())?;
    let profile = store
        .config()
        .get_llm_profile(&selected)
        .cloned()
        .ok_or_else(|| CliError::UnknownInterface(selected.clone()))?;

    sink.log(LogRecord::info(format!("Testing LLM interface `{selected}`")));
    sink.log(LogRecord::new(
        LogLevel::Debug,
        format!(
            "Interface format: {} | Base URL: {}",
            profile.interface_format, profile.base_url
        ),
    ));

    let model = create_chat_model(store.config(), &selected, args.connection.credential())?;
    let settings = &store.config().pipeline;
    let request = CompletionRequest::new(
        &settings.translator_model,
        "You are a helpful assistant.",
        TEST_PROMPT,
    );
    sink.log(LogRecord::info(format!("Sending test prompt: {TEST_PROMPT}")));

    let scope = CancelScope::with_timeout(settings.timeout());
    match model.complete(&request, &scope) {
        Ok(response) if response.trim().is_empty() => {
            sink.log(LogRecord::new(
                LogLevel::Error,
                "LLM test failed: no response received",
            ));
            return Err(CliError::TestFailed(
                "LLM test failed: no response received".to_string(),
            ));
        }
        Ok(response) => {
            sink.log(LogRecord::info("LLM test succeeded"));
            sink.log(LogRecord::new(
                LogLevel::Debug,
                format!("Test reply: {response}"),
            ));
        }
        Err(err) => {
            sink.log(LogRecord::new(
                LogLevel::Error,
                format!("LLM test failed: {err}"),
            ));
            return Err(CliError::Model(err));
        }
    }

    store.touch_llm_interface(selected);
    store.save()?;
    Ok(())
}

fn pipeline_settings(
    config: &Config,
    overrides: &PipelineOverrides,
) -> Result<PipelineConfig, CliError> {
    let mut settings = config.pipeline.clone();
    if let Some(timeout) = overrides.timeout_secs {
        settings.timeout_secs = timeout;
    }
    if let Some(attempts) = overrides.max_attempts {
        settings.max_attempts = attempts;
    }
    settings.validate()?;
    Ok(settings)
}

fn select_llm_interface(
    store: &ConfigStore,
    preferred: Option<String>,
) -> Result<String, CliError> {
    let selected = store
        .resolve_llm_interface(preferred.as_deref())
        .ok_or(CliError::MissingLlmProfile)?;
    if store.config().get_llm_profile(&selected).is_none() {
        return Err(CliError::UnknownInterface(selected));
    }
    Ok(selected)
}

fn read_input(file: Option<&Path>) -> Result<String, CliError> {
    match file {
        Some(path) => read_file(path),
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|source| CliError::Io {
                    path: PathBuf::from("<stdin>"),
                    source,
                })?;
            Ok(buffer)
        }
    }
}

fn read_file(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("no LLM profile is configured")]
    MissingLlmProfile,
    #[error("no interface profile named `{0}`")]
    UnknownInterface(String),
    #[error("config file {0} already exists; pass --force to overwrite it")]
    ConfigExists(PathBuf),
    #[error("failed to read `{path}`: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("LLM call failed: {0}")]
    Model(#[from] LanguageModelError),
    #[error("failed to load prompts: {0}")]
    Prompt(#[from] PromptError),
    #[error("rejected input: {0}")]
    Validation(#[from] ValidationError),
    #[error("the {0} stage needs --working")]
    MissingWorkingText(Stage),
    #[error("the translation stage reads --reference only; drop --working")]
    UnexpectedWorkingText,
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error("no result within {0:?}")]
    TimedOut(Duration),
    #[error("stage worker crashed: {0}")]
    Crashed(String),
    #[error("translation did not produce a poem: {0}")]
    NoPoem(String),
    #[error("{0}")]
    TestFailed(String),
}

#[derive(Parser)]
#[command(
    name = "poemctl",
    version,
    about = "Translate poems to English while keeping their meter and rhyme"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Translate a poem through all three stages
    Translate(TranslateArgs),
    /// Run a single stage on its own
    Stage(StageArgs),
    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write a default configuration file
    Init(ConfigInitArgs),
    /// Send a test prompt through the selected LLM interface
    TestLlm(TestLlmArgs),
}

#[derive(Args)]
struct ConnectionArgs {
    /// API key for this run; never written to the config file
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// LLM interface profile to use, defaults to the most recently used one
    #[arg(long)]
    llm_interface: Option<String>,
}

impl ConnectionArgs {
    fn credential(&self) -> Option<Credential> {
        self.api_key.as_deref().and_then(Credential::from_input)
    }
}

#[derive(Args)]
struct PipelineOverrides {
    /// Overall time limit for one run in seconds
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,
    /// Attempts per stage before giving up
    #[arg(long, value_name = "N")]
    max_attempts: Option<usize>,
}

#[derive(Args)]
struct TranslateArgs {
    /// Read the poem from this file instead of stdin
    #[arg(long, value_name = "FILE")]
    file: Option<PathBuf>,
    /// Creativity of the meter and rhyme stages, 0.0 to 1.0
    #[arg(long, value_name = "T")]
    temperature: Option<f32>,
    #[command(flatten)]
    connection: ConnectionArgs,
    #[command(flatten)]
    overrides: PipelineOverrides,
}

#[derive(Clone, Copy, ValueEnum)]
enum StageName {
    Translate,
    Meter,
    Rhyme,
}

impl From<StageName> for Stage {
    fn from(name: StageName) -> Self {
        match name {
            StageName::Translate => Stage::Translate,
            StageName::Meter => Stage::Meter,
            StageName::Rhyme => Stage::Rhyme,
        }
    }
}

#[derive(Args)]
struct StageArgs {
    /// Stage to run
    #[arg(value_enum)]
    stage: StageName,
    /// The original poem
    #[arg(long, value_name = "FILE")]
    reference: PathBuf,
    /// Text to adjust; required for meter and rhyme, rejected for translate
    #[arg(long, value_name = "FILE")]
    working: Option<PathBuf>,
    /// Creativity of the meter and rhyme stages, 0.0 to 1.0
    #[arg(long, value_name = "T")]
    temperature: Option<f32>,
    #[command(flatten)]
    connection: ConnectionArgs,
    #[command(flatten)]
    overrides: PipelineOverrides,
}

#[derive(Args)]
struct ConfigInitArgs {
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct TestLlmArgs {
    #[command(flatten)]
    connection: ConnectionArgs,
}
