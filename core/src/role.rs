//! Role codec
//!
//! Callers speak the external vocabulary (`sales`, `operations`, `daily`).
//! The store persists the canonical [`Role`] as a small integer code. The two
//! directions are total over the closed enum and fail loudly otherwise:
//! unknown external strings are caller errors (`InvalidRole`), unknown stored
//! codes are corruption (`UnmappableRole`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{Result, RosterError};

/// Canonical role of a member on a contact page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Sales,
    Operations,
    Daily,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Sales, Role::Operations, Role::Daily];

    /// Integer code written to the `members.role` column.
    pub fn stored(self) -> i64 {
        match self {
            Self::Sales => 1,
            Self::Operations => 2,
            Self::Daily => 3,
        }
    }

    /// Read a stored code back. Anything outside the canonical set means the
    /// row was written by something other than this codec.
    pub fn from_stored(code: i64) -> Result<Self> {
        match code {
            1 => Ok(Self::Sales),
            2 => Ok(Self::Operations),
            3 => Ok(Self::Daily),
            other => Err(RosterError::UnmappableRole { stored: other }),
        }
    }
}

/// External string to canonical role. No trimming or case folding.
pub fn decode(external: &str) -> Result<Role> {
    match external {
        "sales" => Ok(Role::Sales),
        "operations" => Ok(Role::Operations),
        "daily" => Ok(Role::Daily),
        other => Err(RosterError::InvalidRole {
            value: other.to_string(),
        }),
    }
}

/// Canonical role to external string.
pub fn encode(role: Role) -> &'static str {
    match role {
        Role::Sales => "sales",
        Role::Operations => "operations",
        Role::Daily => "daily",
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(encode(*self))
    }
}

impl std::str::FromStr for Role {
    type Err = RosterError;

    fn from_str(s: &str) -> Result<Self> {
        decode(s)
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(encode(*self))
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        decode(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn external_round_trip_holds_for_every_role() {
        for external in ["sales", "operations", "daily"] {
            let role = decode(external).expect("valid role");
            assert_eq!(encode(role), external);
        }
    }

    #[test]
    fn stored_round_trip_holds_for_every_role() {
        for role in Role::ALL {
            assert_eq!(Role::from_stored(role.stored()).expect("known code"), role);
        }
    }

    #[test]
    fn mapping_is_a_bijection() {
        let externals: HashSet<&str> = Role::ALL.iter().map(|r| encode(*r)).collect();
        let codes: HashSet<i64> = Role::ALL.iter().map(|r| r.stored()).collect();
        assert_eq!(externals.len(), Role::ALL.len());
        assert_eq!(codes.len(), Role::ALL.len());
    }

    #[test]
    fn unknown_external_role_is_rejected_without_default() {
        for bad in ["unknown", "Sales", " sales", "", "manager"] {
            let err = decode(bad).expect_err("must reject");
            assert!(matches!(err, RosterError::InvalidRole { ref value } if value == bad));
        }
    }

    #[test]
    fn unknown_stored_code_is_an_integrity_fault() {
        let err = Role::from_stored(42).expect_err("must reject");
        assert!(matches!(err, RosterError::UnmappableRole { stored: 42 }));
        assert_eq!(err.category(), ErrorCategory::UnmappableRole);
    }

    #[test]
    fn serde_uses_external_vocabulary() {
        let json = serde_json::to_string(&Role::Operations).expect("serialize");
        assert_eq!(json, "\"operations\"");
        let back: Role = serde_json::from_str("\"daily\"").expect("deserialize");
        assert_eq!(back, Role::Daily);
        assert!(serde_json::from_str::<Role>("\"boss\"").is_err());
    }
}
