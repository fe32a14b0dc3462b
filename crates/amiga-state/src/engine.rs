use std::collections::HashSet;
use std::sync::Arc;

use amiga_core::constants::{
    ADMIN_PLAN, FIRST_STAGE, MAX_FULL_NAME_LEN, MAX_PIX_KEY_LEN, MAX_REFERRAL_DEPTH,
    MAX_USERNAME_LEN,
};
use amiga_core::cycle::CycleParams;
use amiga_core::error::AmigaError;
use amiga_core::participant::{
    AuditAction, DonationHistory, DonationReceipt, DonationTarget, NewParticipant, Participant,
    ParticipantIdentity, Transfer, TransferStatus,
};
use amiga_core::queue;
use amiga_core::types::{Capability, ParticipantId, Role, Timestamp};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::auth::{Argon2Authenticator, Authenticator};
use crate::db::{abort, StateDb, TxResult, TxView};

// ── Resolution ────────────────────────────────────────────────────────────────

/// How a beneficiary was chosen. Re-checked inside the commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Resolution {
    /// The donor's explicit referrer.
    Referrer(ParticipantId),
    /// Head of the donor's stage queue.
    Fallback(ParticipantId),
}

impl Resolution {
    fn beneficiary(self) -> ParticipantId {
        match self {
            Resolution::Referrer(id) | Resolution::Fallback(id) => id,
        }
    }
}

fn stale<T>() -> TxResult<T> {
    // `attempts` is filled in by the retry loop.
    abort(AmigaError::ConcurrentUpdateConflict { attempts: 0 })
}

// ── CycleEngine ───────────────────────────────────────────────────────────────

/// The donation cycle engine.
///
/// Resolves beneficiaries, records transfers and promotes participants
/// through stages. Each mutating call is one atomic unit: either every row
/// it touches (participants, transfers, audit) is written, or none is.
pub struct CycleEngine {
    pub db: Arc<StateDb>,
    params: CycleParams,
    credentials: Arc<dyn Authenticator>,
}

impl CycleEngine {
    pub fn new(db: Arc<StateDb>, params: CycleParams) -> Result<Self, AmigaError> {
        Self::with_authenticator(db, params, Arc::new(Argon2Authenticator))
    }

    pub fn with_authenticator(
        db: Arc<StateDb>,
        params: CycleParams,
        credentials: Arc<dyn Authenticator>,
    ) -> Result<Self, AmigaError> {
        params.validate()?;
        Ok(Self { db, params, credentials })
    }

    pub fn params(&self) -> &CycleParams {
        &self.params
    }

    // ── Registry ─────────────────────────────────────────────────────────────

    /// Register a standard participant at stage 1.
    pub fn create_participant(
        &self,
        req: &NewParticipant,
        now: Timestamp,
    ) -> Result<ParticipantId, AmigaError> {
        self.register(req, Role::Standard, FIRST_STAGE, now)
    }

    pub(crate) fn register(
        &self,
        req: &NewParticipant,
        role: Role,
        stage: u8,
        now: Timestamp,
    ) -> Result<ParticipantId, AmigaError> {
        let username = required("username", &req.username, MAX_USERNAME_LEN)?;
        if username.chars().any(char::is_whitespace) {
            return Err(AmigaError::InvalidInput("username must not contain spaces".into()));
        }
        let full_name = required("full name", &req.full_name, MAX_FULL_NAME_LEN)?;
        if req.password.is_empty() {
            return Err(AmigaError::InvalidInput("password is required".into()));
        }
        let email = optional(req.email.as_deref());
        let pix_key = normalize_pix_key(req.pix_key.as_deref())?;
        let referrer_username = optional(req.referrer_username.as_deref());

        // Hashing is slow; keep it out of the transaction.
        let hash = self.credentials.hash_password(&req.password)?;

        let id = self.db.atomically(|tx| {
            let referrer_id = match referrer_username {
                Some(name) => match tx.lookup_username(name)? {
                    Some(rid) => Some(rid),
                    None => return abort(AmigaError::NotFound(format!("referrer '{name}'"))),
                },
                None => None,
            };

            let id = tx.next_participant_id()?;
            tx.claim_identity(id, username, email)?;

            let mut p = Participant::new(id, username.to_string(), full_name.to_string(), now);
            p.email = email.map(str::to_string);
            p.pix_key = pix_key.clone();
            p.role = role;
            if role == Role::Admin {
                p.plan = ADMIN_PLAN.to_string();
            }
            p.stage = stage;
            if let Some(rid) = referrer_id {
                ensure_acyclic(tx, id, rid)?;
                tx.touch(rid)?;
                p.referrer_id = Some(rid);
            }
            tx.put_participant(&p)?;
            tx.put_credential(id, &hash)?;
            tx.append_audit(
                Some(id),
                AuditAction::CreateUser,
                json!({ "username": username, "referrer_id": referrer_id.map(|r| r.0) }),
                now,
            )?;
            Ok(id)
        })?;

        info!(participant = %id, username, role = %role, "participant registered");
        Ok(id)
    }

    /// Verify a username/password pair. Unknown users and bad passwords are
    /// indistinguishable to the caller.
    pub fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<ParticipantIdentity, AmigaError> {
        let Some(id) = self.db.participant_id_by_username(username.trim())? else {
            return Err(AmigaError::InvalidCredentials);
        };
        let (Some(p), Some(hash)) = (self.db.get_participant(id)?, self.db.get_credential(id)?)
        else {
            return Err(AmigaError::InvalidCredentials);
        };
        if !self.credentials.verify_password(password, &hash)? {
            debug!(participant = %id, "password mismatch");
            return Err(AmigaError::InvalidCredentials);
        }
        Ok(ParticipantIdentity::from(&p))
    }

    pub fn participant(&self, id: ParticipantId) -> Result<Participant, AmigaError> {
        self.db
            .get_participant(id)?
            .ok_or_else(|| AmigaError::NotFound(format!("participant {id}")))
    }

    pub fn participant_by_username(&self, username: &str) -> Result<Participant, AmigaError> {
        let id = self
            .db
            .participant_id_by_username(username.trim())?
            .ok_or_else(|| AmigaError::NotFound(format!("participant '{username}'")))?;
        self.participant(id)
    }

    /// Every participant, in registration order.
    pub fn list_participants(&self) -> Result<Vec<Participant>, AmigaError> {
        self.db.participants()
    }

    /// Participants at `stage`, in the order the fair queue serves them.
    pub fn stage_queue(&self, stage: u8) -> Result<Vec<Participant>, AmigaError> {
        self.db.stage_members(stage)
    }

    // ── Referral resolver ────────────────────────────────────────────────────

    /// The participant `donor_id`'s next transfer goes to. No side effects.
    pub fn resolve_donation_target(
        &self,
        donor_id: ParticipantId,
    ) -> Result<ParticipantId, AmigaError> {
        let donor = self.participant(donor_id)?;
        Ok(self.resolve(&donor)?.beneficiary())
    }

    /// Resolver output with what a donor needs to actually pay.
    pub fn donation_target(&self, donor_id: ParticipantId) -> Result<DonationTarget, AmigaError> {
        let donor = self.participant(donor_id)?;
        let resolution = self.resolve(&donor)?;
        let b = self.participant(resolution.beneficiary())?;
        Ok(DonationTarget {
            beneficiary_id: b.id,
            username: b.username.clone(),
            full_name: b.display_name().to_string(),
            pix_key: b.pix_key.clone(),
            stage: b.stage,
            amount: self.params.amount_for(b.stage),
            via_referrer: matches!(resolution, Resolution::Referrer(_)),
        })
    }

    fn resolve(&self, donor: &Participant) -> Result<Resolution, AmigaError> {
        if let Some(rid) = donor.referrer_id {
            return Ok(Resolution::Referrer(rid));
        }
        for slot in self.db.queue_slots(donor.stage) {
            let slot = slot?;
            // Slots are ordered by quota count: once one is full, all are.
            if !self.params.has_open_slot(slot.quota_count) {
                break;
            }
            if slot.id != donor.id {
                return Ok(Resolution::Fallback(slot.id));
            }
        }
        Err(AmigaError::NoTargetAvailable)
    }

    // ── Donation ledger ──────────────────────────────────────────────────────

    /// Record one donation from `donor_id` to its resolved beneficiary.
    ///
    /// Selection happens on a snapshot; the commit re-reads donor and
    /// beneficiary and re-validates the choice before writing. A stale
    /// choice is re-resolved, up to `max_commit_attempts` times.
    pub fn record_donation(
        &self,
        donor_id: ParticipantId,
        now: Timestamp,
    ) -> Result<DonationReceipt, AmigaError> {
        let receipt = self.with_retries("donation", || {
            let donor = self.participant(donor_id)?;
            let resolution = self.resolve(&donor)?;
            self.db
                .atomically(|tx| self.commit_donation(tx, donor_id, resolution, now))
        })?;

        info!(
            donor = %donor_id,
            beneficiary = %receipt.transfer.to_id,
            amount = receipt.transfer.amount,
            stage = receipt.transfer.stage,
            "donation recorded"
        );
        if let Some((from, to)) = receipt.promotion {
            info!(participant = %receipt.transfer.to_id, from, to, "stage up");
        }
        Ok(receipt)
    }

    fn commit_donation(
        &self,
        tx: &TxView<'_>,
        donor_id: ParticipantId,
        resolution: Resolution,
        now: Timestamp,
    ) -> TxResult<DonationReceipt> {
        let mut donor = tx.require_participant(donor_id)?;
        let Some(mut beneficiary) = tx.get_participant(resolution.beneficiary())? else {
            return stale();
        };

        let still_valid = match resolution {
            Resolution::Referrer(rid) => donor.referrer_id == Some(rid),
            Resolution::Fallback(_) => {
                donor.referrer_id.is_none() && queue::is_eligible(&self.params, &donor, &beneficiary)
            }
        };
        if !still_valid || beneficiary.id == donor.id {
            return stale();
        }

        let amount = self.params.amount_for(beneficiary.stage);
        let transfer = Transfer {
            id: tx.next_transfer_id()?,
            from_id: donor.id,
            to_id: beneficiary.id,
            amount,
            stage: beneficiary.stage,
            status: TransferStatus::Confirmed,
            created_at: now,
        };
        tx.insert_transfer(&transfer)?;

        let step = self.params.receive(beneficiary.stage, beneficiary.quota_count);
        beneficiary.stage = step.stage;
        beneficiary.quota_count = step.quota_count;
        beneficiary.version += 1;
        donor.version += 1;
        tx.put_participant(&beneficiary)?;
        tx.put_participant(&donor)?;

        tx.append_audit(
            Some(donor.id),
            AuditAction::DonationSent,
            json!({
                "transfer_id": transfer.id.0,
                "to": beneficiary.id.0,
                "amount": amount,
                "stage": transfer.stage,
            }),
            now,
        )?;
        if let Some((from, to)) = step.promoted {
            tx.append_audit(
                Some(beneficiary.id),
                AuditAction::StageUp,
                json!({ "from_stage": from, "to_stage": to }),
                now,
            )?;
        }

        Ok(DonationReceipt {
            transfer,
            beneficiary_username: beneficiary.username.clone(),
            beneficiary_name: beneficiary.display_name().to_string(),
            promotion: step.promoted,
        })
    }

    /// Both sides of `id`'s history, newest first.
    pub fn list_donations(&self, id: ParticipantId) -> Result<DonationHistory, AmigaError> {
        self.participant(id)?;
        let mut sent = self.db.transfers_sent(id)?;
        let mut received = self.db.transfers_received(id)?;
        sent.reverse();
        received.reverse();
        Ok(DonationHistory { sent, received })
    }

    // ── Account management ───────────────────────────────────────────────────

    /// Change a payment key. Participants may edit their own; editing anyone
    /// else's needs `Capability::EditAnyPixKey`. A blank key clears it.
    pub fn update_pix_key(
        &self,
        actor_id: ParticipantId,
        target_id: ParticipantId,
        pix_key: Option<&str>,
        now: Timestamp,
    ) -> Result<(), AmigaError> {
        if actor_id != target_id {
            self.require_capability(actor_id, Capability::EditAnyPixKey)?;
        }
        let pix_key = normalize_pix_key(pix_key)?;

        self.db.atomically(|tx| {
            let mut target = tx.require_participant(target_id)?;
            if actor_id != target_id {
                tx.touch(actor_id)?;
            }
            target.pix_key = pix_key.clone();
            target.version += 1;
            tx.put_participant(&target)?;
            tx.append_audit(
                Some(actor_id),
                AuditAction::UpdatePix,
                json!({
                    "participant": target_id.0,
                    "username": target.username,
                    "pix_key": pix_key,
                }),
                now,
            )?;
            Ok(())
        })?;

        info!(actor = %actor_id, participant = %target_id, "pix key updated");
        Ok(())
    }

    /// Point `target_id` at a new explicit referrer. Rejects self-reference
    /// and anything that would close a referral loop.
    pub fn assign_referrer(
        &self,
        actor_id: ParticipantId,
        target_id: ParticipantId,
        referrer_id: ParticipantId,
        now: Timestamp,
    ) -> Result<(), AmigaError> {
        self.require_capability(actor_id, Capability::AssignReferrer)?;
        if target_id == referrer_id {
            return Err(AmigaError::SelfReferral);
        }

        self.db.atomically(|tx| {
            let mut target = tx.require_participant(target_id)?;
            tx.require_participant(referrer_id)?;
            ensure_acyclic(tx, target_id, referrer_id)?;

            let previous = target.referrer_id;
            target.referrer_id = Some(referrer_id);
            target.version += 1;
            tx.put_participant(&target)?;
            tx.touch(referrer_id)?;
            if actor_id != target_id && actor_id != referrer_id {
                tx.touch(actor_id)?;
            }
            tx.append_audit(
                Some(actor_id),
                AuditAction::AssignReferrer,
                json!({
                    "participant": target_id.0,
                    "from": previous.map(|r| r.0),
                    "to": referrer_id.0,
                }),
                now,
            )?;
            Ok(())
        })?;

        info!(actor = %actor_id, participant = %target_id, referrer = %referrer_id, "referrer assigned");
        Ok(())
    }

    /// Remove a participant and everything that points at it: its transfers
    /// (both directions), identity and credential rows. Participants it
    /// referred lose their referrer; its audit entries lose their actor.
    pub fn delete_participant(
        &self,
        actor_id: ParticipantId,
        target_id: ParticipantId,
        now: Timestamp,
    ) -> Result<(), AmigaError> {
        self.require_capability(actor_id, Capability::DeleteParticipant)?;
        if actor_id == target_id {
            return Err(AmigaError::InvalidInput(
                "administrators cannot delete their own account".into(),
            ));
        }

        let removed = self.with_retries("delete", || {
            let snapshot = self.participant(target_id)?;
            let mut transfer_ids: Vec<_> = self
                .db
                .transfers_sent(target_id)?
                .into_iter()
                .chain(self.db.transfers_received(target_id)?)
                .map(|t| t.id)
                .collect();
            transfer_ids.sort();
            transfer_ids.dedup();
            let referees: Vec<ParticipantId> = self
                .db
                .participants()?
                .into_iter()
                .filter(|p| p.referrer_id == Some(target_id))
                .map(|p| p.id)
                .collect();
            let audit_ids = self.db.audit_ids_by_actor(target_id)?;

            self.db.atomically(|tx| {
                let Some(current) = tx.get_participant(target_id)? else {
                    return abort(AmigaError::NotFound(format!("participant {target_id}")));
                };
                // Anything that adds a transfer, referee or audit row for the
                // target also bumps its version.
                if current.version != snapshot.version {
                    return stale();
                }
                tx.touch(actor_id)?;

                let mut removed = 0usize;
                for tid in &transfer_ids {
                    if tx.remove_transfer(*tid)? {
                        removed += 1;
                    }
                }
                for rid in &referees {
                    if let Some(mut referee) = tx.get_participant(*rid)? {
                        if referee.referrer_id == Some(target_id) {
                            referee.referrer_id = None;
                            referee.version += 1;
                            tx.put_participant(&referee)?;
                        }
                    }
                }
                for aid in &audit_ids {
                    tx.detach_audit_actor(*aid)?;
                }
                tx.release_identity(&current.username, current.email.as_deref())?;
                tx.remove_participant(target_id)?;
                tx.append_audit(
                    Some(actor_id),
                    AuditAction::DeleteUser,
                    json!({
                        "deleted_user": current.username,
                        "participant": target_id.0,
                        "transfers_removed": removed,
                    }),
                    now,
                )?;
                Ok(removed)
            })
        })?;

        info!(
            actor = %actor_id,
            participant = %target_id,
            transfers_removed = removed,
            "participant deleted"
        );
        Ok(())
    }

    /// Run `attempt` until it succeeds, fails for good, or
    /// `max_commit_attempts` runs out. Stale snapshots and transient storage
    /// errors are retried; exhausted conflicts report the attempt count.
    fn with_retries<T>(
        &self,
        operation: &str,
        mut attempt: impl FnMut() -> Result<T, AmigaError>,
    ) -> Result<T, AmigaError> {
        let attempts = self.params.max_commit_attempts;
        let mut last = AmigaError::ConcurrentUpdateConflict { attempts };
        for n in 1..=attempts {
            match attempt() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() => {
                    debug!(operation, attempt = n, error = %e, "retrying");
                    last = e;
                }
                Err(e) => return Err(e),
            }
        }
        warn!(operation, attempts, error = %last, "giving up after repeated retryable failures");
        match last {
            AmigaError::ConcurrentUpdateConflict { .. } => {
                Err(AmigaError::ConcurrentUpdateConflict { attempts })
            }
            other => Err(other),
        }
    }

    fn require_capability(
        &self,
        actor_id: ParticipantId,
        capability: Capability,
    ) -> Result<Participant, AmigaError> {
        let actor = self.participant(actor_id)?;
        if !actor.role.can(capability) {
            warn!(actor = %actor_id, %capability, "permission denied");
            return Err(AmigaError::PermissionDenied { capability });
        }
        Ok(actor)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Walk the referrer chain upward from `referrer`; reaching `subject` means
/// the new edge would close a loop.
fn ensure_acyclic(tx: &TxView<'_>, subject: ParticipantId, referrer: ParticipantId) -> TxResult<()> {
    if subject == referrer {
        return abort(AmigaError::SelfReferral);
    }
    let mut seen = HashSet::new();
    let mut cursor = Some(referrer);
    while let Some(id) = cursor {
        if id == subject || !seen.insert(id) || seen.len() > MAX_REFERRAL_DEPTH {
            return abort(AmigaError::ReferralCycle);
        }
        cursor = tx.get_participant(id)?.and_then(|p| p.referrer_id);
    }
    Ok(())
}

fn required<'a>(field: &str, value: &'a str, max_len: usize) -> Result<&'a str, AmigaError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AmigaError::InvalidInput(format!("{field} is required")));
    }
    if value.chars().count() > max_len {
        return Err(AmigaError::InvalidInput(format!(
            "{field} exceeds {max_len} characters"
        )));
    }
    Ok(value)
}

fn optional(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn normalize_pix_key(value: Option<&str>) -> Result<Option<String>, AmigaError> {
    match optional(value) {
        Some(key) if key.chars().count() > MAX_PIX_KEY_LEN => Err(AmigaError::InvalidInput(
            format!("pix key exceeds {MAX_PIX_KEY_LEN} characters"),
        )),
        other => Ok(other.map(str::to_string)),
    }
}
