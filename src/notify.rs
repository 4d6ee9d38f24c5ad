use std::sync::Mutex;

use async_trait::async_trait;

/// Outbound notification channel.
///
/// Implementations never surface failures to the caller: a message that
/// cannot be delivered is logged and dropped.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, body: &str, subject: &str);
}

/// The messages this service sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification<'a> {
    Reminder { medicine: &'a str },
    ZeroStock { medicine: &'a str },
    LowStock { medicine: &'a str, quantity: i32 },
    Otp { code: u32 },
}

impl Notification<'_> {
    pub fn subject(&self) -> &'static str {
        match self {
            Notification::Reminder { .. } => "Medicine Reminder",
            Notification::ZeroStock { .. } | Notification::LowStock { .. } => "Low Stock Alert",
            Notification::Otp { .. } => "Your OTP",
        }
    }

    pub fn body(&self) -> String {
        match self {
            Notification::Reminder { medicine } => {
                format!("Reminder: Take your medicine '{}' now.", medicine)
            }
            Notification::ZeroStock { medicine } => {
                format!("Stock for '{}' is 0. Please restock immediately.", medicine)
            }
            Notification::LowStock { medicine, quantity } => {
                format!("Low stock of '{}' ({} left). Please restock.", medicine, quantity)
            }
            Notification::Otp { code } => format!("Your OTP is {}", code),
        }
    }

    pub async fn deliver(&self, notifier: &dyn Notifier, recipient: &str) {
        notifier.send(recipient, &self.body(), self.subject()).await;
    }
}

/// Writes each message to the log and forgets it.
///
/// Used as the dry-run channel when no SMTP account is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: &str, body: &str, subject: &str) {
        log::info!("[dry-run] To: {} | Subject: {} | {}", recipient, subject, body);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Keeps every message in memory instead of delivering it.
///
/// A test double: the list only grows until [`RecordingNotifier::clear`].
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count_with_subject(&self, subject: &str) -> usize {
        self.sent().iter().filter(|m| m.subject == subject).count()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipient: &str, body: &str, subject: &str) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentMessage {
                recipient: recipient.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_render_fixed_texts() {
        let reminder = Notification::Reminder { medicine: "Aspirin" };
        assert_eq!(reminder.subject(), "Medicine Reminder");
        assert_eq!(reminder.body(), "Reminder: Take your medicine 'Aspirin' now.");

        let empty = Notification::ZeroStock { medicine: "Aspirin" };
        assert_eq!(empty.subject(), "Low Stock Alert");
        assert_eq!(
            empty.body(),
            "Stock for 'Aspirin' is 0. Please restock immediately."
        );

        let low = Notification::LowStock {
            medicine: "Aspirin",
            quantity: 1,
        };
        assert_eq!(low.body(), "Low stock of 'Aspirin' (1 left). Please restock.");

        assert_eq!(Notification::Otp { code: 123456 }.body(), "Your OTP is 123456");
    }

    #[tokio::test]
    async fn recording_notifier_keeps_messages_in_order() {
        let notifier = RecordingNotifier::new();
        Notification::Otp { code: 111111 }
            .deliver(&notifier, "a@example.com")
            .await;
        Notification::Reminder { medicine: "Zinc" }
            .deliver(&notifier, "b@example.com")
            .await;

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].recipient, "a@example.com");
        assert_eq!(sent[1].subject, "Medicine Reminder");
        assert_eq!(notifier.count_with_subject("Your OTP"), 1);

        notifier.clear();
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn log_notifier_retains_nothing() {
        assert_eq!(std::mem::size_of::<LogNotifier>(), 0);

        let notifier: &dyn Notifier = &LogNotifier;
        for code in 0..1000 {
            Notification::Otp { code }
                .deliver(notifier, "a@example.com")
                .await;
        }
    }
}
