use std::sync::Mutex;

use chrono::{Local, NaiveTime};

/// Wall-clock source for the scanner, read at minute resolution.
pub trait Clock: Send + Sync {
    /// Current local time formatted as `HH:MM`.
    fn now_hhmm(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now_hhmm(&self) -> String {
        format_clock(Local::now().time())
    }
}

/// A clock pinned to a settable reading.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<String>,
}

impl FixedClock {
    pub fn new(now: impl Into<String>) -> Self {
        Self {
            now: Mutex::new(now.into()),
        }
    }

    pub fn set(&self, now: impl Into<String>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now.into();
    }
}

impl Clock for FixedClock {
    fn now_hhmm(&self) -> String {
        self.now.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

pub fn format_clock(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_reading_is_zero_padded() {
        let time = NaiveTime::from_hms_opt(8, 5, 59).unwrap();
        assert_eq!(format_clock(time), "08:05");
    }

    #[test]
    fn fixed_clock_can_be_moved() {
        let clock = FixedClock::new("08:00");
        assert_eq!(clock.now_hhmm(), "08:00");
        clock.set("08:01");
        assert_eq!(clock.now_hhmm(), "08:01");
    }

    #[test]
    fn local_clock_produces_hh_mm() {
        let now = LocalClock.now_hhmm();
        assert!(NaiveTime::parse_from_str(&now, "%H:%M").is_ok());
        assert_eq!(now.len(), 5);
    }
}
