use chrono::NaiveTime;
use thiserror::Error;

use crate::clock::format_clock;
use crate::db::models::{Medicine, NewMedicine, Slot, Timings};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Usage: /add <name> <quantity> <slot>=<HH:MM> ...")]
    Usage,
    #[error("Invalid time '{0}', expected HH:MM")]
    Time(String),
    #[error("{0}")]
    Slot(&'static str),
    #[error("Slot {0} given twice")]
    DuplicateSlot(Slot),
    #[error("Invalid email address '{0}'")]
    Email(String),
}

/// Helper function to escape special characters for Telegram MarkdownV2
///
/// Every reserved character is prefixed with a backslash so user supplied
/// text (medicine names, emails) renders literally.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if "_*[]()~`>#+-=|{}.!\\".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Parses a wall-clock time and normalises it to zero-padded `HH:MM`.
pub fn parse_time(input: &str) -> Result<String, ParseError> {
    NaiveTime::parse_from_str(input.trim(), "%H:%M")
        .map(format_clock)
        .map_err(|_| ParseError::Time(input.to_string()))
}

/// Parses the arguments of `/add`: `<name> <quantity> <slot>=<HH:MM> ...`.
///
/// The name may span several words; the first token that parses as an
/// integer is the quantity and ends the name.
pub fn parse_add_args(args: &str) -> Result<NewMedicine, ParseError> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    let qty_pos = tokens
        .iter()
        .position(|t| t.parse::<i32>().is_ok())
        .filter(|&pos| pos > 0)
        .ok_or(ParseError::Usage)?;

    let name = tokens[..qty_pos].join(" ");
    let quantity = tokens[qty_pos].parse::<i32>().map_err(|_| ParseError::Usage)?;
    if quantity < 0 {
        return Err(ParseError::Usage);
    }

    let mut timings = Timings::new();
    for token in &tokens[qty_pos + 1..] {
        let (slot, time) = token.split_once('=').ok_or(ParseError::Usage)?;
        let slot: Slot = slot.parse().map_err(ParseError::Slot)?;
        if timings.insert(slot, parse_time(time)?).is_some() {
            return Err(ParseError::DuplicateSlot(slot));
        }
    }

    Ok(NewMedicine {
        name,
        quantity,
        timings,
    })
}

pub fn validate_email(input: &str) -> Result<String, ParseError> {
    let email = input.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && domain.contains('.')
                && !email.contains(char::is_whitespace)
                && !domain.contains('@')
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(ParseError::Email(input.to_string()))
    }
}

/// Renders the medicine dashboard as MarkdownV2, numbered from 1.
pub fn format_medicine_list(medicines: &[Medicine]) -> String {
    if medicines.is_empty() {
        return "No medicines yet\\. Add one with /add".to_string();
    }

    medicines
        .iter()
        .enumerate()
        .map(|(i, medicine)| {
            let timings = if medicine.timings.is_empty() {
                "no reminders".to_string()
            } else {
                medicine
                    .timings
                    .iter()
                    .map(|(slot, time)| format!("{} {}", slot, time))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let mut line = format!(
                "{}\\. *{}*\n   Stock: {} units\n   Times: {}",
                i + 1,
                escape_markdown(&medicine.name),
                medicine.quantity,
                escape_markdown(&timings),
            );
            if medicine.reminder_pending {
                line.push_str("\n   ⏰ Reminder pending, answer with /take");
            }
            if medicine.is_low_on_stock() {
                line.push_str("\n   ⚠️ Low stock");
            }
            line
        })
        .collect::<Vec<String>>()
        .join("\n\n")
}
