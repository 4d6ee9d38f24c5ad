use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::db::models::{Medicine, MedicineUpdate, User};
use crate::db::{MedicineStore, StoreError};
use crate::notify::{Notification, Notifier};
use crate::services::low_stock::LowStockAlerts;

/// What the reminder phase does when a slot is due but the stock is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeroStockPolicy {
    /// Send the restock alert on every matching cycle, setting no flag.
    #[default]
    Repeat,
    /// Send the restock alert once, then stay quiet until the entry is
    /// restocked. Tracked by `zero_stock_alert_sent`.
    Once,
}

impl FromStr for ZeroStockPolicy {
    type Err = &'static str;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "repeat" => Ok(ZeroStockPolicy::Repeat),
            "once" => Ok(ZeroStockPolicy::Once),
            _ => Err("Allowed zero stock policies: repeat, once"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub users: usize,
    pub medicines: usize,
    pub reminders: usize,
    pub zero_stock_alerts: usize,
    pub low_stock_alerts: usize,
}

impl ScanReport {
    pub fn notifications(&self) -> usize {
        self.reminders + self.zero_stock_alerts + self.low_stock_alerts
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} users, {} medicines, {} reminders, {} zero stock alerts, {} low stock alerts",
            self.users,
            self.medicines,
            self.reminders,
            self.zero_stock_alerts,
            self.low_stock_alerts
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct EntryOutcome {
    reminder: bool,
    zero_stock: bool,
    low_stock: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReminderOutcome {
    Reminded,
    ZeroStock,
}

/// Periodic pass over every user's medicines.
///
/// Matches each entry's timings against the current `HH:MM` reading, sends at
/// most one reminder per entry and cycle, and hands low quantities to
/// [`LowStockAlerts`]. Flags written here are only ever set, never cleared.
pub struct ReminderScanner {
    store: Arc<dyn MedicineStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    low_stock: LowStockAlerts,
    policy: ZeroStockPolicy,
    in_flight: Mutex<()>,
}

impl ReminderScanner {
    pub fn new(
        store: Arc<dyn MedicineStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        policy: ZeroStockPolicy,
    ) -> Self {
        let low_stock = LowStockAlerts::new(store.clone(), notifier.clone());
        Self {
            store,
            notifier,
            clock,
            low_stock,
            policy,
            in_flight: Mutex::new(()),
        }
    }

    /// Runs one cycle unless another one is still in flight.
    pub async fn tick(&self) -> Option<ScanReport> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            log::warn!("Previous reminder scan still running, skipping this cycle");
            return None;
        };

        match self.scan().await {
            Ok(report) => {
                log::info!("Reminder scan completed: {}", report);
                Some(report)
            }
            Err(e) => {
                log::error!("Reminder scan failed to read users: {}", e);
                None
            }
        }
    }

    /// One scan cycle over a snapshot of every user.
    ///
    /// Entries of a user are processed concurrently. Each entry first gets
    /// its reminder phase, then its low-stock phase.
    ///
    /// # Returns
    ///
    /// A [`ScanReport`] with the number of notifications sent. Only the
    /// initial snapshot read can fail; per-entry store failures are logged
    /// and the entry is left for the next cycle.
    pub async fn scan(&self) -> Result<ScanReport, StoreError> {
        let now = self.clock.now_hhmm();
        let users = self.store.list_users_with_medicines().await?;

        let mut report = ScanReport {
            users: users.len(),
            ..ScanReport::default()
        };

        for user in &users {
            let outcomes = future::join_all(
                user.medicines
                    .iter()
                    .map(|medicine| self.process_entry(user, medicine, &now)),
            )
            .await;

            report.medicines += outcomes.len();
            for outcome in outcomes {
                report.reminders += usize::from(outcome.reminder);
                report.zero_stock_alerts += usize::from(outcome.zero_stock);
                report.low_stock_alerts += usize::from(outcome.low_stock);
            }
        }

        Ok(report)
    }

    async fn process_entry(&self, user: &User, medicine: &Medicine, now: &str) -> EntryOutcome {
        let mut outcome = EntryOutcome::default();

        match self.reminder_phase(&user.email, medicine, now).await {
            Some(ReminderOutcome::Reminded) => outcome.reminder = true,
            Some(ReminderOutcome::ZeroStock) => outcome.zero_stock = true,
            None => {}
        }

        match self.low_stock.check(&user.email, medicine).await {
            Ok(sent) => outcome.low_stock = sent,
            Err(e) => log::error!(
                "Failed to record low stock alert for '{}' ({}): {}",
                medicine.name,
                user.email,
                e
            ),
        }

        outcome
    }

    async fn reminder_phase(
        &self,
        email: &str,
        medicine: &Medicine,
        now: &str,
    ) -> Option<ReminderOutcome> {
        if medicine.reminder_pending {
            return None;
        }
        let slot = medicine.slot_due_at(now)?;

        if medicine.quantity > 0 {
            Notification::Reminder {
                medicine: &medicine.name,
            }
            .deliver(self.notifier.as_ref(), email)
            .await;
            log::info!(
                "[REMINDER SENT] {} reminded for '{}' at {} ({})",
                email,
                medicine.name,
                now,
                slot
            );
            self.record(
                email,
                medicine,
                MedicineUpdate::new().reminder_pending(true),
                "reminder",
            )
            .await;
            return Some(ReminderOutcome::Reminded);
        }

        let once = self.policy == ZeroStockPolicy::Once;
        if once && medicine.zero_stock_alert_sent {
            return None;
        }

        Notification::ZeroStock {
            medicine: &medicine.name,
        }
        .deliver(self.notifier.as_ref(), email)
        .await;
        log::info!(
            "[RESTOCK ALERT] Sent to {} for '{}' (stock=0)",
            email,
            medicine.name
        );
        if once {
            self.record(
                email,
                medicine,
                MedicineUpdate::new().zero_stock_alert_sent(true),
                "restock alert",
            )
            .await;
        }
        Some(ReminderOutcome::ZeroStock)
    }

    /// Writes a flag after a notification went out. Failures are logged and
    /// left for the next cycle.
    async fn record(&self, email: &str, medicine: &Medicine, update: MedicineUpdate, what: &str) {
        match self
            .store
            .update_medicine_fields(email, medicine.id, update)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => log::debug!(
                "Medicine '{}' of {} vanished before its {} flag was set",
                medicine.name,
                email,
                what
            ),
            Err(e) => log::error!(
                "Failed to set {} flag for '{}' ({}): {}",
                what,
                medicine.name,
                email,
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::models::{NewMedicine, NewUser, Slot};
    use crate::db::MemoryStore;
    use crate::notify::RecordingNotifier;

    async fn due_scanner() -> (ReminderScanner, Arc<RecordingNotifier>) {
        let store = Arc::new(MemoryStore::new());
        store
            .create_user(NewUser {
                email: "ann@example.com".to_string(),
                chat_id: None,
            })
            .await
            .unwrap();
        store
            .add_medicine(
                "ann@example.com",
                NewMedicine {
                    name: "Aspirin".to_string(),
                    quantity: 5,
                    timings: [(Slot::Morning, "08:00".to_string())].into(),
                },
            )
            .await
            .unwrap();
        let notifier = Arc::new(RecordingNotifier::new());
        let scanner = ReminderScanner::new(
            store,
            notifier.clone(),
            Arc::new(FixedClock::new("08:00")),
            ZeroStockPolicy::default(),
        );
        (scanner, notifier)
    }

    #[tokio::test]
    async fn tick_skips_while_a_cycle_is_in_flight() {
        let (scanner, notifier) = due_scanner().await;

        let guard = scanner.in_flight.lock().await;
        assert!(scanner.tick().await.is_none());
        assert!(notifier.sent().is_empty());
        drop(guard);

        let report = scanner.tick().await.unwrap();
        assert_eq!(report.reminders, 1);
    }

    #[test]
    fn zero_stock_policy_parses_case_insensitively() {
        assert_eq!("Repeat".parse::<ZeroStockPolicy>(), Ok(ZeroStockPolicy::Repeat));
        assert_eq!("once".parse::<ZeroStockPolicy>(), Ok(ZeroStockPolicy::Once));
        assert!("never".parse::<ZeroStockPolicy>().is_err());
    }

    #[test]
    fn report_totals_every_notification_kind() {
        let report = ScanReport {
            users: 2,
            medicines: 5,
            reminders: 2,
            zero_stock_alerts: 1,
            low_stock_alerts: 3,
        };
        assert_eq!(report.notifications(), 6);
        assert!(report.to_string().starts_with("2 users, 5 medicines"));
    }
}
