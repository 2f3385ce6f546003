//! Change intents and account transitions.

use serde::{Deserialize, Serialize};

use crate::ZoneId;

/// A locally pending intent for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    /// Create or update the remote copy.
    Save,
    /// Delete the remote copy.
    Delete,
}

/// A pending zone-level change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "zone", rename_all = "snake_case")]
pub enum ZoneChange {
    /// Create the zone if absent.
    Save(ZoneId),
    /// Delete the zone and everything in it.
    Delete(ZoneId),
}

impl ZoneChange {
    /// The zone this change targets.
    pub fn zone(&self) -> &ZoneId {
        match self {
            ZoneChange::Save(zone) | ZoneChange::Delete(zone) => zone,
        }
    }
}

/// Account state transitions reported by the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountChange {
    /// An account became available.
    SignIn,
    /// The account signed out.
    SignOut,
    /// A different account signed in.
    SwitchAccounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_action_json() {
        assert_eq!(
            serde_json::to_string(&PendingAction::Delete).unwrap(),
            "\"delete\""
        );
    }

    #[test]
    fn zone_change_json_is_tagged() {
        let change = ZoneChange::Save(ZoneId::new("Quotes").unwrap());
        assert_eq!(
            serde_json::to_string(&change).unwrap(),
            r#"{"kind":"save","zone":"Quotes"}"#
        );
        assert_eq!(change.zone().name(), "Quotes");
    }
}
