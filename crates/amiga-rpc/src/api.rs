use amiga_core::participant::{NewParticipant, ParticipantIdentity};
use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{
    RpcCredentials, RpcCycleInfo, RpcDonationHistory, RpcDonationReceipt, RpcDonationTarget, RpcParticipant,
};

/// Donation cycle JSON-RPC 2.0 API definition.
///
/// All method names are prefixed with "amiga_" via `namespace = "amiga"`.
/// Participant ids are plain integers. Calls that change state on someone's
/// behalf authenticate `credentials` and act as that participant.
#[rpc(server, namespace = "amiga")]
pub trait AmigaApi {
    /// Register a participant at stage 1. Returns the new id.
    #[method(name = "createParticipant")]
    async fn create_participant(&self, request: NewParticipant) -> RpcResult<u64>;

    /// Check a username/password pair.
    #[method(name = "authenticate")]
    async fn authenticate(&self, username: String, password: String)
        -> RpcResult<ParticipantIdentity>;

    #[method(name = "getParticipant")]
    async fn get_participant(&self, id: u64) -> RpcResult<Option<RpcParticipant>>;

    #[method(name = "getParticipantByUsername")]
    async fn get_participant_by_username(&self, username: String)
        -> RpcResult<Option<RpcParticipant>>;

    /// Every participant in registration order.
    #[method(name = "getParticipants")]
    async fn get_participants(&self) -> RpcResult<Vec<RpcParticipant>>;

    /// The beneficiary the donor's next transfer goes to. No side effects.
    #[method(name = "resolveDonationTarget")]
    async fn resolve_donation_target(&self, donor: u64) -> RpcResult<RpcDonationTarget>;

    /// Record one confirmed donation from the caller to its resolved
    /// beneficiary.
    #[method(name = "recordDonation")]
    async fn record_donation(&self, credentials: RpcCredentials)
        -> RpcResult<RpcDonationReceipt>;

    /// Sent and received transfers, newest first.
    #[method(name = "listDonations")]
    async fn list_donations(&self, participant: u64) -> RpcResult<RpcDonationHistory>;

    // ── Account management ────────────────────────────────────────────────────

    /// Set (or clear, with `null` or blank) a payment key. The caller must be
    /// the participant itself or an administrator.
    #[method(name = "updatePixKey")]
    async fn update_pix_key(
        &self,
        credentials: RpcCredentials,
        participant: u64,
        pix_key: Option<String>,
    ) -> RpcResult<bool>;

    /// Administrator only. Removes the participant and its transfers.
    #[method(name = "deleteParticipant")]
    async fn delete_participant(&self, credentials: RpcCredentials, participant: u64)
        -> RpcResult<bool>;

    /// Administrator only. Rejects self-reference and referral loops.
    #[method(name = "assignReferrer")]
    async fn assign_referrer(
        &self,
        credentials: RpcCredentials,
        participant: u64,
        referrer: u64,
    ) -> RpcResult<bool>;

    // ── Cycle views ───────────────────────────────────────────────────────────

    /// Participants at `stage` in the order the fallback queue serves them.
    #[method(name = "getStageQueue")]
    async fn get_stage_queue(&self, stage: u8) -> RpcResult<Vec<RpcParticipant>>;

    #[method(name = "getCycleInfo")]
    async fn get_cycle_info(&self) -> RpcResult<RpcCycleInfo>;
}
