//! Sync scopes - the named partitions of synchronized state.
//!
//! Each scope owns its own local table, watermark and protocol traffic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A partition of synchronized state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Inventory,
    Tickets,
}

impl Scope {
    /// All scopes, in a stable order.
    pub const ALL: [Scope; 2] = [Scope::Inventory, Scope::Tickets];

    /// Canonical string form used on the wire and in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Inventory => "inventory",
            Scope::Tickets => "tickets",
        }
    }

    /// The local table holding this scope's records.
    pub fn table(self) -> &'static str {
        match self {
            Scope::Inventory => "items",
            Scope::Tickets => "tickets",
        }
    }

    /// Scope-specific payload key a nested record may hide under.
    pub fn record_alias(self) -> &'static str {
        match self {
            Scope::Inventory => "item",
            Scope::Tickets => "ticket",
        }
    }

    /// Field (besides `id`) a record-shaped payload must carry for this scope.
    pub fn identity_field(self) -> &'static str {
        match self {
            Scope::Inventory => "sku",
            Scope::Tickets => "code",
        }
    }

    /// Infer the scope from an event type's prefix (`inventory.*` / `ticket.*`).
    pub fn of_event_type(event_type: &str) -> Option<Scope> {
        let prefix = event_type.split('.').next()?;
        match prefix {
            "inventory" => Some(Scope::Inventory),
            "ticket" | "tickets" => Some(Scope::Tickets),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inventory" => Ok(Scope::Inventory),
            "tickets" => Ok(Scope::Tickets),
            other => Err(format!("unknown scope: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_from_event_type() {
        assert_eq!(
            Scope::of_event_type("inventory.adjustment"),
            Some(Scope::Inventory)
        );
        assert_eq!(Scope::of_event_type("ticket.checkin"), Some(Scope::Tickets));
        assert_eq!(Scope::of_event_type("casting.assigned"), None);
        assert_eq!(Scope::of_event_type(""), None);
    }

    #[test]
    fn wire_form_roundtrip() {
        for scope in Scope::ALL {
            assert_eq!(scope.as_str().parse::<Scope>().unwrap(), scope);
        }
        assert!("stagecraft".parse::<Scope>().is_err());
    }

    #[test]
    fn serde_lowercase() {
        let json = serde_json::to_string(&Scope::Inventory).unwrap();
        assert_eq!(json, r#""inventory""#);
        let parsed: Scope = serde_json::from_str(r#""tickets""#).unwrap();
        assert_eq!(parsed, Scope::Tickets);
    }
}
