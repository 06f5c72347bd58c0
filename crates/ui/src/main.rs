fn main() -> eframe::Result<()> {
    env_logger::Builder::new()
        .filter(None, log::LevelFilter::Warn)
        .filter(Some("poem_ui"), log::LevelFilter::Info)
        .parse_default_env()
        .init();
    poem_ui::run()
}
