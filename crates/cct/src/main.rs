use std::sync::Arc;

use cct_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), cct_core::Error> {
    cct_core::logging::init("cct");

    let cfg = Arc::new(Config::load()?);

    // Both bots share one config; each builds its own API client and bot.
    let reminders = cct_telegram::reminders::run_polling(cfg.clone());
    let assistant = cct_telegram::assistant::run_polling(cfg);
    tokio::try_join!(reminders, assistant)?;

    Ok(())
}
