use std::sync::Arc;

use relay_core::{
    applications::ApplicationBook, config::Config, persistence::JsonFileRepository,
};

#[tokio::main]
async fn main() -> Result<(), relay_core::Error> {
    relay_core::logging::init("relay")?;

    let cfg = Arc::new(Config::load()?);
    let repo = Arc::new(JsonFileRepository::from_config(&cfg)?);
    let book = Arc::new(ApplicationBook::load(repo));
    tracing::info!(data_dir = %cfg.data_dir.display(), "application data ready");

    relay_telegram::router::run_polling(cfg, book)
        .await
        .map_err(|e| relay_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
