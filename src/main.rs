use std::sync::Arc;

use dotenvy::dotenv;
use envconfig::Envconfig;
use teloxide::Bot;

use medminder::bot::{self, BotContext};
use medminder::clock::LocalClock;
use medminder::config::Config;
use medminder::db::{MedicineStore, MemoryStore, PgStore};
use medminder::mailer::SmtpMailer;
use medminder::notify::{LogNotifier, Notifier};
use medminder::services::{ReminderScanner, ReminderScheduler};
use medminder::Error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize the logger with default settings or "info" level if not specified
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    log::info!("Starting the medicine reminder bot...");

    // Load environment variables from a .env file if present
    dotenv().ok();

    let config = Config::init_from_env()?;

    let store: Arc<dyn MedicineStore> = if config.uses_memory_store() {
        log::warn!("Using the in-memory store, data is lost on restart");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(PgStore::connect(&config.database_url).await?)
    };

    let notifier: Arc<dyn Notifier> = match config.smtp() {
        Some(smtp) => {
            log::info!("Sending email through {}:{}", smtp.host, smtp.port);
            Arc::new(SmtpMailer::new(smtp)?)
        }
        None => {
            log::warn!("SMTP_USERNAME not set, notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    let scanner = ReminderScanner::new(
        store.clone(),
        notifier.clone(),
        Arc::new(LocalClock),
        config.zero_stock_policy,
    );
    let mut scheduler = ReminderScheduler::new(Arc::new(scanner), config.reminder_schedule.clone());
    scheduler.start().await?;

    let bot = Bot::new(config.telegram_bot_token.clone());
    bot::run(bot, BotContext::new(store, notifier)).await;

    scheduler.stop().await?;
    log::info!("Shutting down gracefully");
    Ok(())
}
