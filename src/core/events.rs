//! Block and transaction events, including the validator-update event emitted after finalization.

use serde::{Deserialize, Serialize};

use crate::core::state::ValidatorUpdate;

/// Event kind emitted when the validator set changed in a block.
pub const EVENT_UPDATE_VALIDATORS: &str = "update_validators";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: String,
    pub attributes: Vec<EventAttribute>,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.attributes.push(EventAttribute {
            key: key.into(),
            value: value.to_string(),
        });
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

/// Encodes a validator-set diff as a block event, one `pubkey`/`power` attribute pair per entry.
/// Returns `None` for an empty diff.
pub fn validator_update_event(updates: &[ValidatorUpdate]) -> Option<Event> {
    if updates.is_empty() {
        return None;
    }
    let event = updates.iter().fold(
        Event::new(EVENT_UPDATE_VALIDATORS).with_attr("count", updates.len()),
        |event, update| {
            event
                .with_attr("pubkey", &update.pubkey)
                .with_attr("power", update.power)
        },
    );
    Some(event)
}
