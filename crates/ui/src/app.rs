use std::path::PathBuf;

use eframe::egui::{self, Color32};

use crate::state::{ActiveTab, AppState};
use crate::tasks::{TaskCommand, TaskController, TaskEvent, TaskKind};
use poem_core::logging::{LogLevel, LogRecord};
use poem_core::DEFAULT_CONFIG_FILE;

pub struct PoemTranslatorApp {
    state: AppState,
    tasks: TaskController,
    status_message: Option<String>,
}

impl PoemTranslatorApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        let mut status_message = None;
        let state = match AppState::new(default_path.clone()) {
            Ok(state) => state,
            Err(err) => {
                status_message = Some(format!(
                    "Failed to load config: {err}. Using defaults until the next save."
                ));
                AppState::with_defaults(default_path)
            }
        };

        Self {
            state,
            tasks: TaskController::new(),
            status_message,
        }
    }

    fn handle_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::Log(record) => self.state.push_log(record),
            TaskEvent::TaskStarted(kind) => {
                self.state.set_active_task(Some(kind));
            }
            TaskEvent::TranslationReady(outcome) => {
                if let Some(kind) = outcome.warning_kind() {
                    self.state.push_log(LogRecord::warn(format!(
                        "Translation ended with: {}",
                        kind.message()
                    )));
                }
                self.state.form.output = Some(outcome);
            }
            TaskEvent::TaskFinished { kind, result } => {
                self.state.set_active_task(None);
                match result {
                    Ok(()) => {
                        self.state
                            .push_log(LogRecord::info(format!("{} finished", kind.label())));
                        self.status_message = Some(format!("{} finished", kind.label()));
                    }
                    Err(err) => {
                        self.state.push_log(LogRecord::new(
                            LogLevel::Error,
                            format!("{} failed: {err}", kind.label()),
                        ));
                        self.status_message = Some(format!("Task failed: {err}"));
                    }
                }
            }
        }
    }

    fn save_config(&mut self) {
        match self.state.persist_config() {
            Ok(()) => self.status_message = Some("Config saved".to_string()),
            Err(err) => self.status_message = Some(format!("Failed to save config: {err}")),
        }
    }

    fn reload_config(&mut self) {
        let trimmed = self.state.config_path_input.trim();
        if trimmed.is_empty() {
            self.status_message = Some("Enter a config file path first".to_string());
            return;
        }
        let path = PathBuf::from(trimmed);
        match self.state.reload_from_path(path.clone()) {
            Ok(()) => self.status_message = Some(format!("Reloaded config: {}", path.display())),
            Err(err) => self.status_message = Some(format!("Failed to load config: {err}")),
        }
    }

    fn dispatch_command(&mut self, command: TaskCommand) {
        if let Err(err) = self.state.persist_config() {
            self.status_message = Some(format!("Failed to save config: {err}"));
            return;
        }
        let kind = command.kind();
        match self.tasks.send(command) {
            Ok(()) => self.state.begin_task(kind),
            Err(err) => self.status_message = Some(format!("Failed to start task: {err}")),
        }
    }

    fn submit_translation(&mut self) {
        match self.state.make_translate_command() {
            Ok(command) => {
                self.state.form.notices.clear();
                self.state.form.output = None;
                self.dispatch_command(command);
            }
            Err(err) => {
                if !self.state.form.set_notice_from(&err) {
                    self.status_message = Some(err.to_string());
                }
            }
        }
    }

    fn show_translate_tab(&mut self, ui: &mut egui::Ui) {
        let busy = self.state.is_busy();

        ui.label("Poem");
        ui.add(
            egui::TextEdit::multiline(&mut self.state.form.poem)
                .desired_rows(12)
                .desired_width(f32::INFINITY)
                .hint_text("Paste the poem to translate"),
        );

        ui.horizontal(|ui| {
            ui.label("Creativity");
            ui.add(egui::Slider::new(&mut self.state.form.temperature, 0.0..=1.0).step_by(0.01));
        });

        ui.horizontal(|ui| {
            ui.label("OpenAI API Key");
            ui.add(
                egui::TextEdit::singleline(&mut self.state.form.api_key)
                    .password(true)
                    .desired_width(320.0),
            );
        });

        ui.horizontal(|ui| {
            if ui
                .add_enabled(!busy, egui::Button::new("Translate Poem"))
                .clicked()
            {
                self.submit_translation();
            }
            if self.state.active_task == Some(TaskKind::TranslatePoem) {
                ui.spinner();
                ui.label(self.state.progress_label());
            }
        });

        for notice in &self.state.form.notices {
            ui.colored_label(Color32::YELLOW, notice.message());
        }

        ui.separator();
        ui.label("Translation");
        let output = self.state.form.output_text();
        let color = match &self.state.form.output {
            Some(outcome) if outcome.is_warning() => Color32::LIGHT_RED,
            _ => ui.visuals().text_color(),
        };
        ui.add(
            egui::TextEdit::multiline(&mut output.as_str())
                .desired_rows(12)
                .desired_width(f32::INFINITY)
                .text_color(color),
        );
    }

    fn show_settings_tab(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label("Config file");
            let response = ui.text_edit_singleline(&mut self.state.config_path_input);
            if response.changed() {
                self.status_message = None;
            }
            if ui.button("Reload").clicked() {
                self.reload_config();
            }
            if ui.button("Save").clicked() {
                self.save_config();
            }
        });

        if let Some(status) = &self.status_message {
            ui.colored_label(Color32::LIGHT_BLUE, status);
        }

        ui.separator();
        self.show_llm_section(ui);
        ui.separator();
        self.show_pipeline_section(ui);

        ui.separator();
        let busy = self.state.is_busy();
        if ui
            .add_enabled(!busy, egui::Button::new("Test LLM interface"))
            .on_hover_text("Uses the API key from the Translate tab")
            .clicked()
        {
            let command = self.state.make_test_llm_command();
            self.dispatch_command(command);
        }
    }

    fn show_llm_section(&mut self, ui: &mut egui::Ui) {
        ui.heading("LLM interface");
        let profiles = self.state.config_panel.llm_profiles.clone();
        ui.horizontal(|ui| {
            let selected = self
                .state
                .config_panel
                .selected_llm
                .clone()
                .unwrap_or_else(|| "None".to_string());
            egui::ComboBox::from_label("Profile")
                .selected_text(selected)
                .show_ui(ui, |ui| {
                    for name in profiles.iter() {
                        let is_selected =
                            self.state.config_panel.selected_llm.as_ref() == Some(name);
                        if ui.selectable_label(is_selected, name).clicked() {
                            self.state.select_llm_profile(Some(name.clone()));
                        }
                    }
                });
            if ui.button("Add").clicked() {
                let name = self.state.config_panel.new_llm_name.clone();
                match self.state.add_llm_profile(&name) {
                    Ok(()) => self.status_message = Some(format!("Added profile `{}`", name.trim())),
                    Err(err) => self.status_message = Some(err),
                }
            }
            if ui.button("Remove").clicked() {
                if let Some(name) = self.state.config_panel.selected_llm.clone() {
                    match self.state.remove_llm_profile(&name) {
                        Ok(()) => self.status_message = Some(format!("Removed profile `{name}`")),
                        Err(err) => self.status_message = Some(err),
                    }
                }
            }
        });
        ui.horizontal(|ui| {
            ui.label("New profile name");
            ui.text_edit_singleline(&mut self.state.config_panel.new_llm_name);
        });
        let form = &mut self.state.config_panel.llm_form;
        ui.horizontal(|ui| {
            ui.label("Base URL");
            ui.text_edit_singleline(&mut form.base_url);
        });
        ui.horizontal(|ui| {
            ui.label("Interface format");
            ui.text_edit_singleline(&mut form.interface_format);
        });
        ui.horizontal(|ui| {
            ui.label("Request timeout (s)");
            ui.text_edit_singleline(&mut form.timeout);
        });
    }

    fn show_pipeline_section(&mut self, ui: &mut egui::Ui) {
        ui.heading("Pipeline");
        let form = &mut self.state.config_panel.pipeline_form;
        egui::Grid::new("pipeline_grid")
            .num_columns(2)
            .spacing([12.0, 6.0])
            .show(ui, |ui| {
                ui.label("Translation model");
                ui.text_edit_singleline(&mut form.translator_model);
                ui.end_row();
                ui.label("Meter and rhyme model");
                ui.text_edit_singleline(&mut form.adjuster_model);
                ui.end_row();
                ui.label("Attempts per stage");
                ui.text_edit_singleline(&mut form.max_attempts);
                ui.end_row();
                ui.label("Time limit (s)");
                ui.text_edit_singleline(&mut form.timeout_secs);
                ui.end_row();
                ui.label("Word limit");
                ui.text_edit_singleline(&mut form.max_words);
                ui.end_row();
            });
    }

    fn show_logs_tab(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("Clear").clicked() {
                self.state.clear_logs();
            }
            if let Some(task) = self.state.active_task {
                ui.label(format!("Running: {}", task.label()));
            }
        });
        egui::ScrollArea::vertical()
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for record in self.state.logs.iter() {
                    let color = match record.level {
                        LogLevel::Error => Color32::RED,
                        LogLevel::Warn => Color32::YELLOW,
                        LogLevel::Info => Color32::LIGHT_GREEN,
                        LogLevel::Debug => Color32::LIGHT_BLUE,
                        LogLevel::Trace => Color32::GRAY,
                    };
                    ui.colored_label(color, format!("[{}] {}", record.level, record.message));
                }
            });
    }
}

impl eframe::App for PoemTranslatorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        while let Some(event) = self.tasks.try_recv() {
            self.handle_event(event);
        }

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("Poem Translator");
                if let Some(status) = &self.status_message {
                    ui.colored_label(Color32::LIGHT_BLUE, status);
                }
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.horizontal(|ui| {
                for tab in ActiveTab::ALL {
                    let selected = self.state.active_tab == tab;
                    if ui.selectable_label(selected, tab.label()).clicked() {
                        self.state.active_tab = tab;
                    }
                }
            });
            ui.separator();
            match self.state.active_tab {
                ActiveTab::Translate => {
                    egui::ScrollArea::vertical().show(ui, |ui| self.show_translate_tab(ui));
                }
                ActiveTab::Settings => {
                    egui::ScrollArea::vertical().show(ui, |ui| self.show_settings_tab(ui));
                }
                ActiveTab::Logs => self.show_logs_tab(ui),
            }
        });

        // Events arrive from the worker thread, so keep polling while busy.
        if self.state.is_busy() {
            ctx.request_repaint_after(std::time::Duration::from_millis(100));
        }
    }
}
