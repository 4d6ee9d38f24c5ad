use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::db::models::{Medicine, MedicineUpdate, NewMedicine, QuantityChange, LOW_STOCK_THRESHOLD};
use crate::db::{MedicineStore, StoreError};
use crate::notify::Notifier;
use crate::services::low_stock::LowStockAlerts;

#[derive(Error, Debug)]
pub enum ActionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Medicine not found")]
    MedicineNotFound,
    #[error("Quantity must be at least {min}, got {got}")]
    InvalidQuantity { min: i32, got: i32 },
}

/// Answer to a reminder: the dose was taken, or skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Took {
    Yes,
    No,
}

impl FromStr for Took {
    type Err = &'static str;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yes" | "y" | "took" => Ok(Took::Yes),
            "no" | "n" | "skip" | "skipped" => Ok(Took::No),
            _ => Err("Answer yes or no"),
        }
    }
}

/// User-initiated mutations of medicine entries.
#[derive(Clone)]
pub struct MedicineActions {
    store: Arc<dyn MedicineStore>,
    low_stock: LowStockAlerts,
}

impl MedicineActions {
    pub fn new(store: Arc<dyn MedicineStore>, notifier: Arc<dyn Notifier>) -> Self {
        let low_stock = LowStockAlerts::new(store.clone(), notifier);
        Self { store, low_stock }
    }

    /// Records a new medicine for `email`. Negative quantities are rejected.
    pub async fn add_medicine(
        &self,
        email: &str,
        medicine: NewMedicine,
    ) -> Result<Medicine, ActionError> {
        if medicine.quantity < 0 {
            return Err(ActionError::InvalidQuantity {
                min: 0,
                got: medicine.quantity,
            });
        }
        let medicine = self.store.add_medicine(email, medicine).await?;
        log::info!(
            "{} added '{}' (quantity={}, slots={})",
            email,
            medicine.name,
            medicine.quantity,
            medicine.timings.len()
        );
        Ok(medicine)
    }

    /// Acknowledges a reminder.
    ///
    /// `Took::Yes` consumes one dose (floored at 0), clears the pending
    /// reminder and either closes the low-stock episode (quantity back at or
    /// above the threshold) or raises its alert right away. `Took::No` only
    /// clears the pending reminder.
    pub async fn acknowledge(
        &self,
        email: &str,
        id: Uuid,
        took: Took,
    ) -> Result<Medicine, ActionError> {
        let update = match took {
            Took::Yes => MedicineUpdate::new()
                .quantity(QuantityChange::Add(-1))
                .reminder_pending(false),
            Took::No => MedicineUpdate::new().reminder_pending(false),
        };
        let medicine = self
            .store
            .update_medicine_fields(email, id, update)
            .await?
            .ok_or(ActionError::MedicineNotFound)?;

        if took == Took::No {
            return Ok(medicine);
        }
        log::info!(
            "{} took '{}', {} left",
            email,
            medicine.name,
            medicine.quantity
        );
        self.settle_low_stock(email, medicine).await
    }

    /// Adds `amount` doses to an entry.
    ///
    /// A restock starts a new stock episode: both alert flags are cleared, and
    /// the low-stock alert is raised again at once if the result is still
    /// below the threshold.
    ///
    /// # Arguments
    ///
    /// * `email` - Owner of the entry.
    /// * `id` - The entry to restock.
    /// * `amount` - Doses added, at least 1.
    ///
    /// # Returns
    ///
    /// The stored entry after the restock, or `MedicineNotFound`.
    pub async fn restock(&self, email: &str, id: Uuid, amount: i32) -> Result<Medicine, ActionError> {
        if amount < 1 {
            return Err(ActionError::InvalidQuantity { min: 1, got: amount });
        }
        let update = MedicineUpdate::new()
            .quantity(QuantityChange::Add(amount))
            .low_stock_alert_sent(false)
            .zero_stock_alert_sent(false);
        let medicine = self
            .store
            .update_medicine_fields(email, id, update)
            .await?
            .ok_or(ActionError::MedicineNotFound)?;

        log::info!(
            "{} restocked '{}' by {} to {}",
            email,
            medicine.name,
            amount,
            medicine.quantity
        );
        self.settle_low_stock(email, medicine).await
    }

    pub async fn delete_medicine(&self, email: &str, id: Uuid) -> Result<(), ActionError> {
        if !self.store.delete_medicine(email, id).await? {
            return Err(ActionError::MedicineNotFound);
        }
        log::info!("{} deleted medicine {}", email, id);
        Ok(())
    }

    // Closes the episode when stock is back up, otherwise raises its alert.
    async fn settle_low_stock(
        &self,
        email: &str,
        medicine: Medicine,
    ) -> Result<Medicine, ActionError> {
        if medicine.quantity >= LOW_STOCK_THRESHOLD {
            if !medicine.low_stock_alert_sent {
                return Ok(medicine);
            }
            let reset = MedicineUpdate::new().low_stock_alert_sent(false);
            return self
                .store
                .update_medicine_fields(email, medicine.id, reset)
                .await?
                .ok_or(ActionError::MedicineNotFound);
        }

        if self.low_stock.check(email, &medicine).await? {
            return Ok(Medicine {
                low_stock_alert_sent: true,
                ..medicine
            });
        }
        Ok(medicine)
    }
}
