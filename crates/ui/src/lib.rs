pub mod app;
pub mod state;
pub mod tasks;

pub use app::PoemTranslatorApp;
pub use tasks::{TaskCommand, TaskController, TaskEvent, TaskKind};

#[cfg(not(target_arch = "wasm32"))]
pub fn run() -> eframe::Result<()> {
    use eframe::NativeOptions;

    let options = NativeOptions {
        centered: true,
        ..Default::default()
    };
    eframe::run_native(
        "Poem Translator",
        options,
        Box::new(|cc| Box::new(PoemTranslatorApp::new(cc))),
    )
}
