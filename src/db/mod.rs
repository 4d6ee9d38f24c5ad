use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use models::{Medicine, MedicineUpdate, NewMedicine, NewUser, User};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to parse database URL: {0}")]
    UrlParse(String),
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Failed to create database: {0}")]
    CreateDb(String),
    #[error("Email {0} is already registered")]
    EmailTaken(String),
    #[error("Chat {0} is already linked to an account")]
    ChatTaken(i64),
    #[error("No user with email {0}")]
    UserNotFound(String),
}

/// Read/write contract over users and their embedded medicine entries.
///
/// The reminder scanner only needs [`list_users_with_medicines`] and
/// [`update_medicine_fields`]; the remaining methods back the bot actions.
///
/// [`list_users_with_medicines`]: MedicineStore::list_users_with_medicines
/// [`update_medicine_fields`]: MedicineStore::update_medicine_fields
#[async_trait]
pub trait MedicineStore: Send + Sync {
    /// Full snapshot of every user with their medicines in insertion order.
    async fn list_users_with_medicines(&self) -> Result<Vec<User>, StoreError>;

    /// Applies `update` to the entry `(email, id)`.
    ///
    /// Returns the entry as stored after the update, or `None` when the entry
    /// no longer exists or the update's guard did not match.
    async fn update_medicine_fields(
        &self,
        email: &str,
        id: Uuid,
        update: MedicineUpdate,
    ) -> Result<Option<Medicine>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_chat(&self, chat_id: i64) -> Result<Option<User>, StoreError>;

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn add_medicine(&self, email: &str, medicine: NewMedicine)
        -> Result<Medicine, StoreError>;

    /// Returns `false` when nothing was removed.
    async fn delete_medicine(&self, email: &str, id: Uuid) -> Result<bool, StoreError>;
}
