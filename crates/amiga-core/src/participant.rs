use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_PLAN, FIRST_STAGE};
use crate::types::{format_brl, AuditId, Cents, ParticipantId, Role, Timestamp, TransferId};

// ── Participant ───────────────────────────────────────────────────────────────

/// One registered member of the donation cycle, as stored in the registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub username: String,
    pub email: Option<String>,
    pub full_name: String,
    /// Payment-routing key shown to donors. Opaque to the engine.
    pub pix_key: Option<String>,
    pub role: Role,
    /// Membership plan label.
    pub plan: String,
    /// Current stage, `1..=max_stage`. Never decreases.
    pub stage: u8,
    /// Transfers received in the current stage cycle.
    pub quota_count: u32,
    /// Explicit upstream beneficiary. Always an existing participant.
    pub referrer_id: Option<ParticipantId>,
    pub created_at: Timestamp,
    /// Bumped on every write; used to detect stale snapshots.
    pub version: u64,
}

impl Participant {
    /// A freshly registered participant: stage 1, empty quota.
    pub fn new(
        id: ParticipantId,
        username: String,
        full_name: String,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            username,
            email: None,
            full_name,
            pix_key: None,
            role: Role::Standard,
            plan: DEFAULT_PLAN.to_string(),
            stage: FIRST_STAGE,
            quota_count: 0,
            referrer_id: None,
            created_at,
            version: 0,
        }
    }

    /// Name shown to donors; falls back to the username.
    pub fn display_name(&self) -> &str {
        if self.full_name.trim().is_empty() {
            &self.username
        } else {
            &self.full_name
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Registration request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewParticipant {
    pub username: String,
    pub full_name: String,
    pub password: String,
    pub email: Option<String>,
    pub pix_key: Option<String>,
    pub referrer_username: Option<String>,
}

/// What a successful login hands back to the caller's session layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantIdentity {
    pub id: ParticipantId,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub plan: String,
    pub stage: u8,
    pub quota_count: u32,
    pub pix_key: Option<String>,
    pub referrer_id: Option<ParticipantId>,
}

impl From<&Participant> for ParticipantIdentity {
    fn from(p: &Participant) -> Self {
        Self {
            id: p.id,
            username: p.username.clone(),
            full_name: p.full_name.clone(),
            role: p.role,
            plan: p.plan.clone(),
            stage: p.stage,
            quota_count: p.quota_count,
            pix_key: p.pix_key.clone(),
            referrer_id: p.referrer_id,
        }
    }
}

// ── Transfer ──────────────────────────────────────────────────────────────────

/// Only `Confirmed` exists today: the engine records transfers, it does not
/// settle them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Confirmed,
}

/// One recorded donation. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from_id: ParticipantId,
    pub to_id: ParticipantId,
    /// Fixed by the beneficiary's stage at record time.
    pub amount: Cents,
    /// Beneficiary's stage at record time.
    pub stage: u8,
    pub status: TransferStatus,
    pub created_at: Timestamp,
}

/// Both sides of a participant's donation history, newest first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DonationHistory {
    pub sent: Vec<Transfer>,
    pub received: Vec<Transfer>,
}

// ── Audit ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    CreateUser,
    DonationSent,
    StageUp,
    UpdatePix,
    DeleteUser,
    AssignReferrer,
}

/// Append-only trail entry. The engine writes these and never reads them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    /// `None` once the actor has been deleted.
    pub actor_id: Option<ParticipantId>,
    pub action: AuditAction,
    /// JSON text; bincode cannot carry a self-describing value.
    pub payload: String,
    pub created_at: Timestamp,
}

impl AuditEntry {
    pub fn payload_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

// ── Views ─────────────────────────────────────────────────────────────────────

/// Who a donor should pay next, and how much.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DonationTarget {
    pub beneficiary_id: ParticipantId,
    pub username: String,
    pub full_name: String,
    pub pix_key: Option<String>,
    pub stage: u8,
    pub amount: Cents,
    /// `true` when the donor's explicit referrer was chosen.
    pub via_referrer: bool,
}

/// Outcome of a recorded donation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DonationReceipt {
    pub transfer: Transfer,
    pub beneficiary_username: String,
    pub beneficiary_name: String,
    /// `Some((from, to))` when this donation promoted the beneficiary.
    pub promotion: Option<(u8, u8)>,
}

impl DonationReceipt {
    /// Confirmation line for the donor.
    pub fn message(&self) -> String {
        format!(
            "Donation recorded and confirmed for {} ({}).",
            self.beneficiary_name,
            format_brl(self.transfer.amount)
        )
    }
}
