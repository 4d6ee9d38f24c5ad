use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Remaining quantity below which a medicine counts as low on stock.
pub const LOW_STOCK_THRESHOLD: i32 = 2;

/// The fixed set of daily dosing slots.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Morning,
    Noon,
    Evening,
    Night,
}

static SLOT_LABELS: phf::Map<&'static str, Slot> = phf::phf_map! {
    "morning" => Slot::Morning,
    "noon" => Slot::Noon,
    "midday" => Slot::Noon,
    "evening" => Slot::Evening,
    "night" => Slot::Night,
    "bedtime" => Slot::Night,
};

impl Slot {
    pub fn label(self) -> &'static str {
        match self {
            Slot::Morning => "morning",
            Slot::Noon => "noon",
            Slot::Evening => "evening",
            Slot::Night => "night",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Slot {
    type Err = &'static str;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SLOT_LABELS
            .get(s.to_ascii_lowercase().as_str())
            .copied()
            .ok_or("Allowed slots: morning, noon, evening, night")
    }
}

/// Enabled slots mapped to their `HH:MM` wall-clock time.
pub type Timings = BTreeMap<Slot, String>;

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Medicine {
    pub id: Uuid,
    pub name: String,
    pub quantity: i32,
    #[sqlx(json)]
    pub timings: Timings,
    pub reminder_pending: bool,
    pub low_stock_alert_sent: bool,
    /// Set once the out-of-stock notice has gone out under the `once` policy.
    pub zero_stock_alert_sent: bool,
    pub created_at: DateTime<Utc>,
}

impl Medicine {
    pub fn is_low_on_stock(&self) -> bool {
        self.quantity < LOW_STOCK_THRESHOLD
    }

    /// First enabled slot whose time equals `now` exactly.
    pub fn slot_due_at(&self, now: &str) -> Option<Slot> {
        self.timings
            .iter()
            .find(|(_, time)| time.as_str() == now)
            .map(|(slot, _)| *slot)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub email: String,
    pub chat_id: Option<i64>,
    pub medicines: Vec<Medicine>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub email: String,
    pub chat_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMedicine {
    pub name: String,
    pub quantity: i32,
    pub timings: Timings,
}

impl NewMedicine {
    pub fn into_medicine(self) -> Medicine {
        Medicine {
            id: Uuid::new_v4(),
            name: self.name,
            quantity: self.quantity,
            timings: self.timings,
            reminder_pending: false,
            low_stock_alert_sent: false,
            zero_stock_alert_sent: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityChange {
    Set(i32),
    /// Signed delta; the stored result never drops below zero.
    Add(i32),
}

impl QuantityChange {
    pub fn apply(self, current: i32) -> i32 {
        match self {
            QuantityChange::Set(q) => q.max(0),
            QuantityChange::Add(delta) => current.saturating_add(delta).max(0),
        }
    }
}

/// Partial update of one embedded medicine entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MedicineUpdate {
    pub quantity: Option<QuantityChange>,
    pub reminder_pending: Option<bool>,
    pub low_stock_alert_sent: Option<bool>,
    pub zero_stock_alert_sent: Option<bool>,
    /// Only apply when the stored `low_stock_alert_sent` has this value.
    pub if_low_stock_alert_sent: Option<bool>,
    /// Only apply when the stored quantity is strictly below this value.
    pub if_quantity_below: Option<i32>,
}

impl MedicineUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quantity(mut self, change: QuantityChange) -> Self {
        self.quantity = Some(change);
        self
    }

    pub fn reminder_pending(mut self, value: bool) -> Self {
        self.reminder_pending = Some(value);
        self
    }

    pub fn low_stock_alert_sent(mut self, value: bool) -> Self {
        self.low_stock_alert_sent = Some(value);
        self
    }

    pub fn zero_stock_alert_sent(mut self, value: bool) -> Self {
        self.zero_stock_alert_sent = Some(value);
        self
    }

    pub fn if_low_stock_alert_sent(mut self, value: bool) -> Self {
        self.if_low_stock_alert_sent = Some(value);
        self
    }

    pub fn if_quantity_below(mut self, limit: i32) -> Self {
        self.if_quantity_below = Some(limit);
        self
    }

    /// Whether the stored entry satisfies every `if_*` condition.
    pub fn guard_matches(&self, medicine: &Medicine) -> bool {
        let flag_ok = self
            .if_low_stock_alert_sent
            .map_or(true, |expected| medicine.low_stock_alert_sent == expected);
        let quantity_ok = self
            .if_quantity_below
            .map_or(true, |limit| medicine.quantity < limit);
        flag_ok && quantity_ok
    }

    pub fn apply_to(&self, medicine: &mut Medicine) {
        if let Some(change) = self.quantity {
            medicine.quantity = change.apply(medicine.quantity);
        }
        if let Some(pending) = self.reminder_pending {
            medicine.reminder_pending = pending;
        }
        if let Some(sent) = self.low_stock_alert_sent {
            medicine.low_stock_alert_sent = sent;
        }
        if let Some(sent) = self.zero_stock_alert_sent {
            medicine.zero_stock_alert_sent = sent;
        }
    }
}
