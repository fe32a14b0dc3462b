use amiga_core::cycle::{CycleParams, TerminalPolicy};
use amiga_core::participant::{DonationReceipt, DonationTarget, Participant, Transfer, TransferStatus};
use amiga_core::types::{format_brl, Role};
use serde::{Deserialize, Serialize};

/// Username and password sent with every call that acts on someone's
/// behalf. The server derives the actor from these, never from an id.
#[derive(Clone, Serialize, Deserialize)]
pub struct RpcCredentials {
    pub username: String,
    pub password: String,
}

impl RpcCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }
}

impl std::fmt::Debug for RpcCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// JSON-serializable participant returned by the `amiga_get*` methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcParticipant {
    pub id: u64,
    pub username: String,
    pub full_name: String,
    pub email: Option<String>,
    pub pix_key: Option<String>,
    pub role: Role,
    pub plan: String,
    pub stage: u8,
    /// Transfers received in the current stage cycle.
    pub quota_count: u32,
    pub referrer_id: Option<u64>,
    pub created_at: i64,
}

impl From<&Participant> for RpcParticipant {
    fn from(p: &Participant) -> Self {
        Self {
            id: p.id.0,
            username: p.username.clone(),
            full_name: p.full_name.clone(),
            email: p.email.clone(),
            pix_key: p.pix_key.clone(),
            role: p.role,
            plan: p.plan.clone(),
            stage: p.stage,
            quota_count: p.quota_count,
            referrer_id: p.referrer_id.map(|r| r.0),
            created_at: p.created_at,
        }
    }
}

/// One recorded donation. Usernames are filled in when the counterpart
/// still exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcTransfer {
    pub id: u64,
    pub from_id: u64,
    pub from_username: Option<String>,
    pub to_id: u64,
    pub to_username: Option<String>,
    pub amount_cents: u64,
    /// e.g. "R$ 50.00"
    pub amount: String,
    pub stage: u8,
    pub status: TransferStatus,
    pub created_at: i64,
}

impl RpcTransfer {
    pub fn new(t: &Transfer, from_username: Option<String>, to_username: Option<String>) -> Self {
        Self {
            id: t.id.0,
            from_id: t.from_id.0,
            from_username,
            to_id: t.to_id.0,
            to_username,
            amount_cents: t.amount,
            amount: format_brl(t.amount),
            stage: t.stage,
            status: t.status,
            created_at: t.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcDonationHistory {
    pub sent: Vec<RpcTransfer>,
    pub received: Vec<RpcTransfer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcDonationTarget {
    pub beneficiary_id: u64,
    pub username: String,
    pub full_name: String,
    pub pix_key: Option<String>,
    pub stage: u8,
    pub amount_cents: u64,
    pub amount: String,
    /// `true` when the donor's own referrer was chosen.
    pub via_referrer: bool,
}

impl From<DonationTarget> for RpcDonationTarget {
    fn from(t: DonationTarget) -> Self {
        Self {
            beneficiary_id: t.beneficiary_id.0,
            username: t.username,
            full_name: t.full_name,
            pix_key: t.pix_key,
            stage: t.stage,
            amount_cents: t.amount,
            amount: format_brl(t.amount),
            via_referrer: t.via_referrer,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcDonationReceipt {
    pub transfer_id: u64,
    pub beneficiary_id: u64,
    pub beneficiary_username: String,
    pub beneficiary_name: String,
    pub amount_cents: u64,
    pub stage: u8,
    /// Set when this donation promoted the beneficiary.
    pub promoted_to: Option<u8>,
    /// Human-readable confirmation.
    pub message: String,
}

impl From<&DonationReceipt> for RpcDonationReceipt {
    fn from(r: &DonationReceipt) -> Self {
        Self {
            transfer_id: r.transfer.id.0,
            beneficiary_id: r.transfer.to_id.0,
            beneficiary_username: r.beneficiary_username.clone(),
            beneficiary_name: r.beneficiary_name.clone(),
            amount_cents: r.transfer.amount,
            stage: r.transfer.stage,
            promoted_to: r.promotion.map(|(_, to)| to),
            message: r.message(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcStageAmount {
    pub stage: u8,
    pub amount_cents: u64,
    pub amount: String,
}

/// Active cycle rules, returned by `amiga_getCycleInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcCycleInfo {
    pub quota: u32,
    pub max_stage: u8,
    pub stages: Vec<RpcStageAmount>,
    pub terminal_policy: TerminalPolicy,
    pub participants: usize,
    pub transfers: usize,
}

impl RpcCycleInfo {
    pub fn new(params: &CycleParams, participants: usize, transfers: usize) -> Self {
        Self {
            quota: params.quota,
            max_stage: params.max_stage,
            stages: params
                .stage_amounts
                .iter()
                .map(|(&stage, &cents)| RpcStageAmount {
                    stage,
                    amount_cents: cents,
                    amount: format_brl(cents),
                })
                .collect(),
            terminal_policy: params.terminal_policy,
            participants,
            transfers,
        }
    }
}
