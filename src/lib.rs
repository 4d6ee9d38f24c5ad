//! Household medicine reminders over Telegram and email.
//!
//! Users register through the bot, record medicines with dose counts and
//! daily times, and a once-a-minute [`services::ReminderScanner`] mails
//! reminders and low-stock alerts.

pub mod bot;
pub mod clock;
pub mod config;
pub mod db;
pub mod mailer;
pub mod notify;
pub mod services;
pub mod utils;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
