use crate::tasks::{TaskCommand, TaskKind, TestLlmCommand, TranslatePoemCommand};
use poem_core::config::{Config, ConfigError, ConfigStore, LlmConfig, PipelineConfig};
use poem_core::logging::LogRecord;
use poem_core::{Credential, Outcome, Stage};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActiveTab {
    Translate,
    Settings,
    Logs,
}

impl ActiveTab {
    pub const ALL: [Self; 3] = [ActiveTab::Translate, ActiveTab::Settings, ActiveTab::Logs];

    pub fn label(&self) -> &'static str {
        match self {
            ActiveTab::Translate => "Translate",
            ActiveTab::Settings => "Settings",
            ActiveTab::Logs => "Logs",
        }
    }
}

/// Problems caught by the form before anything is submitted.
#[derive(Debug, Error)]
pub enum FormError {
    #[error("{}", join_notices(.0))]
    MissingInput(Vec<FormNotice>),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl FormError {
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }
}

fn join_notices(notices: &[FormNotice]) -> String {
    notices
        .iter()
        .map(FormNotice::message)
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct AppState {
    config_store: ConfigStore,
    pub config_path_input: String,
    pub config_panel: ConfigPanelState,
    pub form: TranslateFormState,
    pub logs: LogPanelState,
    pub active_tab: ActiveTab,
    pub active_task: Option<TaskKind>,
    pub current_stage: Option<Stage>,
}

impl AppState {
    pub fn new(config_path: PathBuf) -> Result<Self, ConfigError> {
        Ok(Self::from_store(ConfigStore::open(config_path)?))
    }

    /// Starts from the built-in defaults, leaving the file at `config_path`
    /// untouched until the next save.
    pub fn with_defaults(config_path: PathBuf) -> Self {
        Self::from_store(ConfigStore::with_config(
            config_path,
            Config::with_default_profile(),
        ))
    }

    fn from_store(mut store: ConfigStore) -> Self {
        store.ensure_recent_defaults();
        let config_panel = ConfigPanelState::from_store(&store);
        let form = TranslateFormState::from_config(store.config());
        let config_path_input = store.path().to_string_lossy().to_string();

        Self {
            config_store: store,
            config_path_input,
            config_panel,
            form,
            logs: LogPanelState::new(),
            active_tab: ActiveTab::Translate,
            active_task: None,
            current_stage: None,
        }
    }

    pub fn config_path(&self) -> &Path {
        self.config_store.path()
    }

    pub fn reload_from_path(&mut self, path: PathBuf) -> Result<(), ConfigError> {
        let mut store = ConfigStore::open(path)?;
        store.ensure_recent_defaults();
        self.config_store = store;
        self.config_path_input = self.config_store.path().to_string_lossy().to_string();
        self.refresh_from_store();
        Ok(())
    }

    pub fn refresh_from_store(&mut self) {
        self.config_panel = ConfigPanelState::from_store(&self.config_store);
    }

    pub fn sync_form_state(&mut self) -> Result<(), FormError> {
        let config = self.config_store.config_mut();
        self.config_panel.apply_to_store(config)?;
        Ok(())
    }

    pub fn persist_config(&mut self) -> Result<(), FormError> {
        self.sync_form_state()?;
        self.config_store.save()?;
        self.refresh_from_store();
        Ok(())
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn select_llm_profile(&mut self, name: Option<String>) {
        self.config_panel.select_llm(name, &self.config_store);
    }

    pub fn set_active_task(&mut self, task: Option<TaskKind>) {
        if task.is_none() || task != self.active_task {
            self.current_stage = None;
        }
        self.active_task = task;
    }

    /// Marks the form busy as soon as a command is handed to the worker, so a
    /// second click cannot queue another run before `TaskStarted` arrives.
    pub fn begin_task(&mut self, kind: TaskKind) {
        self.set_active_task(Some(kind));
    }

    /// Label for the spinner next to the translate button.
    pub fn progress_label(&self) -> &'static str {
        self.current_stage
            .map(|stage| stage.progress_message())
            .unwrap_or("Translating your poem...")
    }

    pub fn is_busy(&self) -> bool {
        self.active_task.is_some()
    }

    pub fn push_log(&mut self, record: LogRecord) {
        if self.active_task == Some(TaskKind::TranslatePoem) {
            if let Some(stage) = Stage::ALL
                .into_iter()
                .find(|stage| stage.progress_message() == record.message)
            {
                self.current_stage = Some(stage);
            }
        }
        self.logs.push(record);
    }

    pub fn clear_logs(&mut self) {
        self.logs.clear();
    }

    pub fn add_llm_profile(&mut self, name: &str) -> Result<(), String> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err("Enter a profile name first".to_string());
        }
        if self.config_store.config().llm_profiles.contains_key(trimmed) {
            return Err(format!("Profile `{trimmed}` already exists"));
        }
        self.config_store
            .config_mut()
            .upsert_llm_profile(trimmed.to_string(), LlmConfig::default());
        self.refresh_from_store();
        self.select_llm_profile(Some(trimmed.to_string()));
        self.config_panel.new_llm_name.clear();
        Ok(())
    }

    pub fn remove_llm_profile(&mut self, name: &str) -> Result<(), String> {
        if self.config_store.config().llm_profiles.len() <= 1 {
            return Err("At least one LLM profile must remain".to_string());
        }
        if self
            .config_store
            .config_mut()
            .remove_llm_profile(name)
            .is_none()
        {
            return Err(format!("No profile named `{name}`"));
        }
        self.config_store.ensure_recent_defaults();
        self.refresh_from_store();
        Ok(())
    }

    pub fn make_translate_command(&self) -> Result<TaskCommand, FormError> {
        let command = self.form.to_command(
            self.config_path().to_path_buf(),
            self.config_panel.selected_llm.clone(),
        )?;
        Ok(TaskCommand::TranslatePoem(command))
    }

    pub fn make_test_llm_command(&self) -> TaskCommand {
        TaskCommand::TestLlm(TestLlmCommand {
            config_path: self.config_path().to_path_buf(),
            interface: self.config_panel.selected_llm.clone(),
            credential: Credential::from_input(&self.form.api_key),
        })
    }
}

/// The poem form: input, creativity slider, API key and the last result.
#[derive(Clone, Debug)]
pub struct TranslateFormState {
    pub poem: String,
    pub temperature: f32,
    pub api_key: String,
    pub output: Option<Outcome>,
    pub notices: Vec<FormNotice>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FormNotice {
    MissingPoem,
    MissingApiKey,
}

impl FormNotice {
    pub fn message(&self) -> &'static str {
        match self {
            FormNotice::MissingPoem => "Please enter a poem to translate.",
            FormNotice::MissingApiKey => "Please enter your OpenAI API Key.",
        }
    }
}

impl TranslateFormState {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poem: String::new(),
            temperature: config.pipeline.default_temperature,
            api_key: String::new(),
            output: None,
            notices: Vec::new(),
        }
    }

    /// Only an empty poem or a blank key is caught here. A poem of blanks
    /// goes through and meets the word-count gate in the translator.
    pub fn to_command(
        &self,
        config_path: PathBuf,
        llm_interface: Option<String>,
    ) -> Result<TranslatePoemCommand, FormError> {
        let credential = Credential::from_input(&self.api_key);
        let mut missing = Vec::new();
        if self.poem.is_empty() {
            missing.push(FormNotice::MissingPoem);
        }
        if credential.is_none() {
            missing.push(FormNotice::MissingApiKey);
        }
        let Some(credential) = credential.filter(|_| missing.is_empty()) else {
            return Err(FormError::MissingInput(missing));
        };
        Ok(TranslatePoemCommand {
            config_path,
            llm_interface,
            poem: self.poem.clone(),
            temperature: self.temperature.clamp(0.0, 1.0),
            credential,
        })
    }

    pub fn set_notice_from(&mut self, err: &FormError) -> bool {
        self.notices = match err {
            FormError::MissingInput(missing) => missing.clone(),
            _ => Vec::new(),
        };
        !self.notices.is_empty()
    }

    pub fn output_text(&self) -> String {
        self.output
            .as_ref()
            .map(Outcome::display_text)
            .unwrap_or_default()
    }
}

pub struct ConfigPanelState {
    pub selected_llm: Option<String>,
    pub llm_profiles: Vec<String>,
    pub llm_form: LlmProfileForm,
    pub pipeline_form: PipelineForm,
    pub new_llm_name: String,
}

impl ConfigPanelState {
    pub fn from_store(store: &ConfigStore) -> Self {
        let llm_profiles = store
            .config()
            .llm_profiles
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        let selected_llm = store.last_llm_interface().map(|s| s.to_string());
        let llm_form = selected_llm
            .as_ref()
            .and_then(|name| store.config().llm_profiles.get(name))
            .map(LlmProfileForm::from_config)
            .unwrap_or_default();
        Self {
            selected_llm,
            llm_profiles,
            llm_form,
            pipeline_form: PipelineForm::from_config(&store.config().pipeline),
            new_llm_name: String::new(),
        }
    }

    pub fn select_llm(&mut self, name: Option<String>, store: &ConfigStore) {
        self.selected_llm = name.clone();
        if let Some(name) = name {
            if let Some(profile) = store.config().llm_profiles.get(&name) {
                self.llm_form = LlmProfileForm::from_config(profile);
            }
        }
    }

    pub fn apply_to_store(&self, config: &mut Config) -> Result<(), FormError> {
        if let Some(name) = &self.selected_llm {
            let parsed = self.llm_form.to_config()?;
            config.upsert_llm_profile(name.clone(), parsed);
            config.recent.last_llm_interface = Some(name.clone());
        }
        config.pipeline = self.pipeline_form.to_config(&config.pipeline)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct LlmProfileForm {
    pub base_url: String,
    pub interface_format: String,
    pub timeout: String,
}

impl LlmProfileForm {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            interface_format: config.interface_format.clone(),
            timeout: config.timeout.to_string(),
        }
    }

    pub fn to_config(&self) -> Result<LlmConfig, FormError> {
        let timeout: u64 = self
            .timeout
            .trim()
            .parse()
            .map_err(|_| FormError::message("Request timeout must be a whole number of seconds"))?;
        let interface_format = self.interface_format.trim();
        if interface_format.is_empty() {
            return Err(FormError::message("Interface format must not be empty"));
        }
        Ok(LlmConfig {
            base_url: self.base_url.trim().to_string(),
            interface_format: interface_format.to_string(),
            timeout,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct PipelineForm {
    pub translator_model: String,
    pub adjuster_model: String,
    pub max_attempts: String,
    pub timeout_secs: String,
    pub max_words: String,
}

impl PipelineForm {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            translator_model: config.translator_model.clone(),
            adjuster_model: config.adjuster_model.clone(),
            max_attempts: config.max_attempts.to_string(),
            timeout_secs: config.timeout_secs.to_string(),
            max_words: config.max_words.to_string(),
        }
    }

    /// Fields not on the form keep their current values.
    pub fn to_config(&self, current: &PipelineConfig) -> Result<PipelineConfig, FormError> {
        let max_attempts = self
            .max_attempts
            .trim()
            .parse()
            .map_err(|_| FormError::message("Attempts must be a whole number"))?;
        let timeout_secs = self
            .timeout_secs
            .trim()
            .parse()
            .map_err(|_| FormError::message("Time limit must be a whole number of seconds"))?;
        let max_words = self
            .max_words
            .trim()
            .parse()
            .map_err(|_| FormError::message("Word limit must be a whole number"))?;
        let config = PipelineConfig {
            translator_model: self.translator_model.trim().to_string(),
            adjuster_model: self.adjuster_model.trim().to_string(),
            max_attempts,
            timeout_secs,
            max_words,
            ..current.clone()
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Clone, Debug)]
pub struct LogPanelState {
    records: VecDeque<LogRecord>,
    capacity: usize,
}

impl LogPanelState {
    pub fn new() -> Self {
        Self {
            records: VecDeque::new(),
            capacity: 500,
        }
    }

    pub fn push(&mut self, record: LogRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogRecord> {
        self.records.iter()
    }
}

impl Default for LogPanelState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poem_core::logging::LogLevel;
    use tempfile::tempdir;

    fn state() -> (tempfile::TempDir, AppState) {
        let dir = tempdir().unwrap();
        let state = AppState::new(dir.path().join("config.json")).unwrap();
        (dir, state)
    }

    #[test]
    fn empty_poem_is_caught_before_submission() {
        let (_dir, mut state) = state();
        state.form.api_key = "sk-test".to_string();
        let err = state.make_translate_command().unwrap_err();
        match &err {
            FormError::MissingInput(missing) => assert_eq!(missing, &[FormNotice::MissingPoem]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.to_string(), "Please enter a poem to translate.");
        assert!(state.form.set_notice_from(&err));
        assert_eq!(state.form.notices, vec![FormNotice::MissingPoem]);
    }

    #[test]
    fn blank_poem_and_key_report_both_notices() {
        let (_dir, mut state) = state();
        let err = state.make_translate_command().unwrap_err();
        assert!(state.form.set_notice_from(&err));
        assert_eq!(
            state.form.notices,
            vec![FormNotice::MissingPoem, FormNotice::MissingApiKey]
        );
        assert_eq!(
            err.to_string(),
            "Please enter a poem to translate. Please enter your OpenAI API Key."
        );
    }

    #[test]
    fn whitespace_poem_is_left_to_the_word_gate() {
        let (_dir, mut state) = state();
        state.form.poem = "   \n\t ".to_string();
        state.form.api_key = "sk-test".to_string();
        match state.make_translate_command().unwrap() {
            TaskCommand::TranslatePoem(command) => assert_eq!(command.poem, "   \n\t "),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn submitting_marks_the_form_busy() {
        let (_dir, mut state) = state();
        assert!(!state.is_busy());
        state.begin_task(TaskKind::TranslatePoem);
        assert!(state.is_busy());

        state.set_active_task(Some(TaskKind::TranslatePoem));
        assert!(state.is_busy());
        state.set_active_task(None);
        assert!(!state.is_busy());
    }

    #[test]
    fn spinner_label_follows_the_running_stage() {
        let (_dir, mut state) = state();
        state.begin_task(TaskKind::TranslatePoem);
        assert_eq!(state.progress_label(), "Translating your poem...");

        state.push_log(LogRecord::info("Adjusting meter..."));
        assert_eq!(state.current_stage, Some(Stage::Meter));
        state.push_log(LogRecord::info("unrelated line"));
        state.push_log(LogRecord::info("Rhyming..."));
        assert_eq!(state.current_stage, Some(Stage::Rhyme));
        assert_eq!(state.progress_label(), "Rhyming...");

        state.set_active_task(None);
        assert_eq!(state.current_stage, None);
        assert_eq!(state.progress_label(), "Translating your poem...");
    }

    #[test]
    fn empty_key_is_caught_before_submission() {
        let (_dir, state) = state();
        let mut form = state.form.clone();
        form.poem = "Über allen Gipfeln ist Ruh".to_string();
        form.api_key = "   ".to_string();
        let err = form
            .to_command(state.config_path().to_path_buf(), None)
            .unwrap_err();
        assert_eq!(err.to_string(), "Please enter your OpenAI API Key.");
    }

    #[test]
    fn valid_form_builds_a_translate_command() {
        let (_dir, mut state) = state();
        state.form.poem = "Über allen Gipfeln ist Ruh".to_string();
        state.form.api_key = " sk-test ".to_string();
        state.form.temperature = 0.6;

        match state.make_translate_command().unwrap() {
            TaskCommand::TranslatePoem(command) => {
                assert_eq!(command.poem, "Über allen Gipfeln ist Ruh");
                assert_eq!(command.temperature, 0.6);
                assert_eq!(command.credential.expose(), "sk-test");
                assert_eq!(command.llm_interface.as_deref(), Some("openai"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn creativity_defaults_to_a_quarter() {
        let (_dir, state) = state();
        assert_eq!(state.form.temperature, 0.25);
        assert_eq!(state.form.output_text(), "");
    }

    #[test]
    fn output_shows_the_display_text() {
        let (_dir, mut state) = state();
        state.form.output = Some(Outcome::warning(poem_core::WarningKind::TextTooLong));
        assert_eq!(
            state.form.output_text(),
            "@#$%^&*()Warning: The text is too long."
        );
    }

    #[test]
    fn settings_round_trip_through_the_config_file() {
        let (dir, mut state) = state();
        state.config_panel.llm_form.base_url = "http://localhost:11434".to_string();
        state.config_panel.llm_form.interface_format = "ollama".to_string();
        state.config_panel.pipeline_form.max_attempts = "3".to_string();
        state.persist_config().unwrap();

        let reloaded = ConfigStore::open(dir.path().join("config.json")).unwrap();
        let profile = reloaded.config().get_llm_profile("openai").unwrap();
        assert_eq!(profile.interface_format, "ollama");
        assert_eq!(reloaded.config().pipeline.max_attempts, 3);
        assert!(!std::fs::read_to_string(dir.path().join("config.json"))
            .unwrap()
            .contains("sk-"));
    }

    #[test]
    fn invalid_pipeline_settings_are_rejected() {
        let (_dir, mut state) = state();
        state.config_panel.pipeline_form.max_attempts = "0".to_string();
        assert!(matches!(
            state.persist_config(),
            Err(FormError::Config(ConfigError::Invalid(_)))
        ));

        state.config_panel.pipeline_form.max_attempts = "many".to_string();
        assert!(matches!(
            state.persist_config(),
            Err(FormError::Message(_))
        ));
    }

    #[test]
    fn profiles_can_be_added_but_not_all_removed() {
        let (_dir, mut state) = state();
        state.config_panel.new_llm_name = "local".to_string();
        state.add_llm_profile("local").unwrap();
        assert_eq!(state.config_panel.selected_llm.as_deref(), Some("local"));
        assert!(state.add_llm_profile("local").is_err());

        state.remove_llm_profile("local").unwrap();
        assert!(state.remove_llm_profile("openai").is_err());
    }

    #[test]
    fn corrupt_config_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(AppState::new(path.clone()).is_err());
        let state = AppState::with_defaults(path.clone());
        assert_eq!(state.config_panel.selected_llm.as_deref(), Some("openai"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn log_panel_is_bounded() {
        let mut logs = LogPanelState::new();
        for i in 0..510 {
            logs.push(LogRecord::new(LogLevel::Info, format!("line {i}")));
        }
        assert_eq!(logs.iter().count(), 500);
        assert_eq!(logs.iter().next().map(|r| r.message.as_str()), Some("line 10"));
    }
}
