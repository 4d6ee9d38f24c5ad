use std::sync::Arc;

use crate::db::models::{Medicine, MedicineUpdate, LOW_STOCK_THRESHOLD};
use crate::db::{MedicineStore, StoreError};
use crate::notify::{Notification, Notifier};

/// Single low-stock alert path shared by the scanner and the user actions.
///
/// The `low_stock_alert_sent` flag is claimed with a guarded update before
/// anything is sent. The guard re-checks the stored quantity as well as the
/// flag, so a caller holding an outdated snapshot cannot claim an entry that
/// has since been restocked.
#[derive(Clone)]
pub struct LowStockAlerts {
    store: Arc<dyn MedicineStore>,
    notifier: Arc<dyn Notifier>,
}

impl LowStockAlerts {
    pub fn new(store: Arc<dyn MedicineStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Sends a low-stock alert for `medicine` unless one already went out
    /// for the current episode.
    ///
    /// # Arguments
    ///
    /// * `email` - Owner of the entry, also the alert recipient.
    /// * `medicine` - The caller's view of the entry. It may be outdated; the
    ///   store decides whether the claim still holds.
    ///
    /// # Returns
    ///
    /// `Ok(true)` when this call claimed the flag and sent the alert.
    pub async fn check(&self, email: &str, medicine: &Medicine) -> Result<bool, StoreError> {
        if !medicine.is_low_on_stock() || medicine.low_stock_alert_sent {
            return Ok(false);
        }

        let claim = MedicineUpdate::new()
            .low_stock_alert_sent(true)
            .if_low_stock_alert_sent(false)
            .if_quantity_below(LOW_STOCK_THRESHOLD);
        let Some(claimed) = self
            .store
            .update_medicine_fields(email, medicine.id, claim)
            .await?
        else {
            log::debug!(
                "Low stock alert for '{}' ({}) already claimed, restocked or gone",
                medicine.name,
                email
            );
            return Ok(false);
        };

        Notification::LowStock {
            medicine: &claimed.name,
            quantity: claimed.quantity,
        }
        .deliver(self.notifier.as_ref(), email)
        .await;
        log::info!(
            "[LOW STOCK ALERT] {} warned for '{}' (stock={})",
            email,
            claimed.name,
            claimed.quantity
        );
        Ok(true)
    }
}
