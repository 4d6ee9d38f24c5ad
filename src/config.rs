use std::time::Duration;

use envconfig::Envconfig;

use crate::mailer::SmtpConfig;
use crate::services::ZeroStockPolicy;

/// `DATABASE_URL` value that selects the in-process store.
pub const MEMORY_DATABASE_URL: &str = "memory://";

#[derive(Envconfig, Debug)]
pub struct Config {
    #[envconfig(from = "TELEGRAM_BOT_TOKEN")]
    pub telegram_bot_token: String,

    #[envconfig(from = "DATABASE_URL")]
    pub database_url: String,

    #[envconfig(from = "SMTP_HOST", default = "smtp.gmail.com")]
    pub smtp_host: String,

    #[envconfig(from = "SMTP_PORT", default = "465")]
    pub smtp_port: u16,

    /// Empty means dry-run: messages are logged instead of mailed.
    #[envconfig(from = "SMTP_USERNAME", default = "")]
    pub smtp_username: String,

    #[envconfig(from = "SMTP_PASSWORD", default = "")]
    pub smtp_password: String,

    #[envconfig(from = "MAIL_FROM")]
    pub mail_from: Option<String>,

    #[envconfig(from = "SMTP_TIMEOUT_SECS", default = "30")]
    pub smtp_timeout_secs: u64,

    #[envconfig(from = "REMINDER_SCHEDULE", default = "0 * * * * *")]
    pub reminder_schedule: String,

    #[envconfig(from = "ZERO_STOCK_POLICY", default = "repeat")]
    pub zero_stock_policy: ZeroStockPolicy,
}

impl Config {
    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }

    /// SMTP settings, or `None` when no account is configured.
    pub fn smtp(&self) -> Option<SmtpConfig> {
        if self.smtp_username.is_empty() {
            return None;
        }
        Some(SmtpConfig {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            username: self.smtp_username.clone(),
            password: self.smtp_password.clone(),
            from: self
                .mail_from
                .clone()
                .unwrap_or_else(|| self.smtp_username.clone()),
            timeout: Duration::from_secs(self.smtp_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_only_required_keys_are_set() {
        let config = Config::init_from_hashmap(&env(&[
            ("TELEGRAM_BOT_TOKEN", "token"),
            ("DATABASE_URL", "memory://"),
        ]))
        .unwrap();

        assert!(config.uses_memory_store());
        assert_eq!(config.smtp_port, 465);
        assert_eq!(config.reminder_schedule, "0 * * * * *");
        assert_eq!(config.zero_stock_policy, ZeroStockPolicy::Repeat);
        assert!(config.smtp().is_none());
    }

    #[test]
    fn mail_from_falls_back_to_username() {
        let config = Config::init_from_hashmap(&env(&[
            ("TELEGRAM_BOT_TOKEN", "token"),
            ("DATABASE_URL", "postgres://localhost/medminder"),
            ("SMTP_USERNAME", "bot@example.com"),
            ("SMTP_PASSWORD", "secret"),
            ("ZERO_STOCK_POLICY", "once"),
        ]))
        .unwrap();

        let smtp = config.smtp().unwrap();
        assert_eq!(smtp.from, "bot@example.com");
        assert_eq!(smtp.timeout, Duration::from_secs(30));
        assert_eq!(config.zero_stock_policy, ZeroStockPolicy::Once);
    }

    #[test]
    fn missing_token_is_an_error() {
        assert!(Config::init_from_hashmap(&env(&[("DATABASE_URL", "memory://")])).is_err());
    }
}
