use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::CENTS_PER_BRL;

/// Money in centavos (1 BRL = 100 centavos).
pub type Cents = u64;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

/// Current wall-clock time as a `Timestamp`.
pub fn unix_now() -> Timestamp {
    chrono::Utc::now().timestamp()
}

/// Render centavos the way the dashboard shows them: `R$ 50.00`.
pub fn format_brl(cents: Cents) -> String {
    format!("R$ {}.{:02}", cents / CENTS_PER_BRL, cents % CENTS_PER_BRL)
}

// ── Ids ──────────────────────────────────────────────────────────────────────

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Big-endian key bytes, so sled iteration follows id order.
            pub fn to_key(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }

            pub fn from_key(key: &[u8]) -> Option<Self> {
                let arr: [u8; 8] = key.get(..8)?.try_into().ok()?;
                Some(Self(u64::from_be_bytes(arr)))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "({})"), self.0)
            }
        }
    };
}

row_id!(
    /// Opaque participant identifier, assigned once at registration.
    ParticipantId,
    "ParticipantId"
);
row_id!(
    /// Identifier of one recorded donation.
    TransferId,
    "TransferId"
);
row_id!(AuditId, "AuditId");

// ── Roles and capabilities ───────────────────────────────────────────────────

/// Account role. Admin rights are checked through `Capability`, never by
/// comparing role names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Standard,
    Admin,
}

/// Privileged operations that a role may or may not perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    DeleteParticipant,
    EditAnyPixKey,
    AssignReferrer,
}

impl Role {
    pub fn can(self, capability: Capability) -> bool {
        match self {
            Role::Admin => true,
            Role::Standard => match capability {
                Capability::DeleteParticipant
                | Capability::EditAnyPixKey
                | Capability::AssignReferrer => false,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Standard => "standard",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::DeleteParticipant => "delete_participant",
            Capability::EditAnyPixKey => "edit_any_pix_key",
            Capability::AssignReferrer => "assign_referrer",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brl_formatting() {
        assert_eq!(format_brl(5_000), "R$ 50.00");
        assert_eq!(format_brl(30_005), "R$ 300.05");
        assert_eq!(format_brl(0), "R$ 0.00");
    }

    #[test]
    fn id_keys_sort_numerically() {
        let a = ParticipantId(2).to_key();
        let b = ParticipantId(256).to_key();
        assert!(a < b);
        assert_eq!(ParticipantId::from_key(&b), Some(ParticipantId(256)));
        assert_eq!(ParticipantId::from_key(&[1, 2]), None);
    }

    #[test]
    fn standard_role_has_no_admin_capabilities() {
        for cap in [
            Capability::DeleteParticipant,
            Capability::EditAnyPixKey,
            Capability::AssignReferrer,
        ] {
            assert!(!Role::Standard.can(cap));
            assert!(Role::Admin.can(cap));
        }
    }
}
