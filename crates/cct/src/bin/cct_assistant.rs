use std::sync::Arc;

use cct_core::config::{BotKind, Config};

#[tokio::main]
async fn main() -> Result<(), cct_core::Error> {
    cct_core::logging::init("cct_assistant");

    let cfg = Arc::new(Config::load_for(BotKind::Assistant)?);
    cct_telegram::assistant::run_polling(cfg).await
}
