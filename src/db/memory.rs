use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{Medicine, MedicineUpdate, NewMedicine, NewUser, User};
use super::{MedicineStore, StoreError};

/// In-process store with the same semantics as [`super::PgStore`].
///
/// Each method takes the lock once, so every update is atomic with respect
/// to the others, just like a single-row `UPDATE`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<Vec<User>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a single entry, mostly for assertions.
    pub async fn medicine(&self, email: &str, id: Uuid) -> Option<Medicine> {
        self.users
            .read()
            .await
            .iter()
            .find(|u| u.email == email)
            .and_then(|u| u.medicines.iter().find(|m| m.id == id))
            .cloned()
    }
}

#[async_trait]
impl MedicineStore for MemoryStore {
    async fn list_users_with_medicines(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.users.read().await.clone())
    }

    async fn update_medicine_fields(
        &self,
        email: &str,
        id: Uuid,
        update: MedicineUpdate,
    ) -> Result<Option<Medicine>, StoreError> {
        let mut users = self.users.write().await;
        let entry = users
            .iter_mut()
            .find(|u| u.email == email)
            .and_then(|u| u.medicines.iter_mut().find(|m| m.id == id));

        Ok(match entry {
            Some(medicine) if update.guard_matches(medicine) => {
                update.apply_to(medicine);
                Some(medicine.clone())
            }
            _ => None,
        })
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_user_by_chat(&self, chat_id: i64) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| u.chat_id == Some(chat_id))
            .cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::EmailTaken(user.email));
        }
        if let Some(chat_id) = user.chat_id {
            if users.iter().any(|u| u.chat_id == Some(chat_id)) {
                return Err(StoreError::ChatTaken(chat_id));
            }
        }

        let created = User {
            email: user.email,
            chat_id: user.chat_id,
            medicines: Vec::new(),
        };
        users.push(created.clone());
        Ok(created)
    }

    async fn add_medicine(
        &self,
        email: &str,
        medicine: NewMedicine,
    ) -> Result<Medicine, StoreError> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.email == email)
            .ok_or_else(|| StoreError::UserNotFound(email.to_string()))?;

        let medicine = medicine.into_medicine();
        user.medicines.push(medicine.clone());
        Ok(medicine)
    }

    async fn delete_medicine(&self, email: &str, id: Uuid) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        let Some(user) = users.iter_mut().find(|u| u.email == email) else {
            return Ok(false);
        };
        let before = user.medicines.len();
        user.medicines.retain(|m| m.id != id);
        Ok(user.medicines.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{QuantityChange, Slot};

    async fn store_with_medicine(quantity: i32) -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        store
            .create_user(NewUser {
                email: "ann@example.com".to_string(),
                chat_id: Some(7),
            })
            .await
            .unwrap();
        let med = store
            .add_medicine(
                "ann@example.com",
                NewMedicine {
                    name: "Aspirin".to_string(),
                    quantity,
                    timings: [(Slot::Morning, "08:00".to_string())].into(),
                },
            )
            .await
            .unwrap();
        (store, med.id)
    }

    #[tokio::test]
    async fn update_of_missing_entry_is_a_no_op() {
        let (store, _) = store_with_medicine(3).await;
        let result = store
            .update_medicine_fields(
                "ann@example.com",
                Uuid::new_v4(),
                MedicineUpdate::new().reminder_pending(true),
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn guarded_claim_succeeds_once() {
        let (store, id) = store_with_medicine(1).await;
        let claim = MedicineUpdate::new()
            .low_stock_alert_sent(true)
            .if_low_stock_alert_sent(false);

        let first = store
            .update_medicine_fields("ann@example.com", id, claim.clone())
            .await
            .unwrap();
        let second = store
            .update_medicine_fields("ann@example.com", id, claim)
            .await
            .unwrap();

        assert!(first.is_some_and(|m| m.low_stock_alert_sent));
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn decrement_is_floored_at_zero() {
        let (store, id) = store_with_medicine(0).await;
        let updated = store
            .update_medicine_fields(
                "ann@example.com",
                id,
                MedicineUpdate::new().quantity(QuantityChange::Add(-1)),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.quantity, 0);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let (store, _) = store_with_medicine(1).await;
        let by_email = store
            .create_user(NewUser {
                email: "ann@example.com".to_string(),
                chat_id: None,
            })
            .await;
        let by_chat = store
            .create_user(NewUser {
                email: "bob@example.com".to_string(),
                chat_id: Some(7),
            })
            .await;
        assert!(matches!(by_email, Err(StoreError::EmailTaken(_))));
        assert!(matches!(by_chat, Err(StoreError::ChatTaken(7))));
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let (store, id) = store_with_medicine(1).await;
        assert!(store.delete_medicine("ann@example.com", id).await.unwrap());
        assert!(!store.delete_medicine("ann@example.com", id).await.unwrap());
        assert!(store.medicine("ann@example.com", id).await.is_none());
    }
}
