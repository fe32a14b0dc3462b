use std::io::ErrorKind;
use std::path::Path;

use amiga_core::error::AmigaError;
use amiga_core::participant::{AuditAction, AuditEntry, Participant, Transfer};
use amiga_core::types::{AuditId, ParticipantId, Timestamp, TransferId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::Transactional;

/// Persistent registry, ledger and audit trail backed by sled.
///
/// Named trees (one per table):
///   participants   - ParticipantId BE → bincode(Participant)
///   stage_queue    - stage ++ quota_count BE ++ created_at ++ ParticipantId BE → []
///   identities     - "u:" username / "e:" e-mail → ParticipantId BE
///   transfers      - TransferId BE    → bincode(Transfer)
///   transfer_index - 's'|'r' ++ ParticipantId BE ++ TransferId BE → []
///   audit          - AuditId BE       → bincode(AuditEntry)
///   credentials    - ParticipantId BE → PHC password hash
///   meta           - utf8 key bytes   → raw bytes
pub struct StateDb {
    _db: sled::Db,
    participants: sled::Tree,
    stage_queue: sled::Tree,
    identities: sled::Tree,
    transfers: sled::Tree,
    transfer_index: sled::Tree,
    audit: sled::Tree,
    credentials: sled::Tree,
    meta: sled::Tree,
}

const SENT: u8 = b's';
const RECEIVED: u8 = b'r';

fn storage(e: sled::Error) -> AmigaError {
    match &e {
        sled::Error::Io(io)
            if matches!(
                io.kind(),
                ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
            ) =>
        {
            AmigaError::TransientPersistence(e.to_string())
        }
        _ => AmigaError::Persistence(e.to_string()),
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, AmigaError> {
    Ok(bincode::deserialize(bytes)?)
}

fn username_key(username: &str) -> Vec<u8> {
    [b"u:".as_ref(), username.as_bytes()].concat()
}

fn email_key(email: &str) -> Vec<u8> {
    [b"e:".as_ref(), email.to_lowercase().as_bytes()].concat()
}

fn index_key(direction: u8, participant: ParticipantId, transfer: TransferId) -> [u8; 17] {
    let mut key = [0u8; 17];
    key[0] = direction;
    key[1..9].copy_from_slice(&participant.to_key());
    key[9..].copy_from_slice(&transfer.to_key());
    key
}

fn index_prefix(direction: u8, participant: ParticipantId) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = direction;
    key[1..].copy_from_slice(&participant.to_key());
    key
}

/// Stage-queue key. Byte order equals fair-queue order within a stage:
/// quota count, then registration time (sign bit flipped so negative
/// timestamps sort first), then id.
fn queue_key(p: &Participant) -> [u8; 21] {
    let mut key = [0u8; 21];
    key[0] = p.stage;
    key[1..5].copy_from_slice(&p.quota_count.to_be_bytes());
    key[5..13].copy_from_slice(&((p.created_at as u64) ^ (1 << 63)).to_be_bytes());
    key[13..].copy_from_slice(&p.id.to_key());
    key
}

/// One stage-queue position, decoded from its key alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueSlot {
    pub id: ParticipantId,
    pub quota_count: u32,
}

fn decode_queue_key(key: &[u8]) -> Option<QueueSlot> {
    if key.len() != 21 {
        return None;
    }
    let quota_count = u32::from_be_bytes(key[1..5].try_into().ok()?);
    let id = ParticipantId::from_key(&key[13..])?;
    Some(QueueSlot { id, quota_count })
}

impl StateDb {
    /// Open or create the state database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AmigaError> {
        let db = sled::open(path).map_err(storage)?;
        Self::from_db(db)
    }

    /// A throwaway database that lives only in memory.
    pub fn temporary() -> Result<Self, AmigaError> {
        let db = sled::Config::new().temporary(true).open().map_err(storage)?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, AmigaError> {
        let participants   = db.open_tree("participants").map_err(storage)?;
        let stage_queue    = db.open_tree("stage_queue").map_err(storage)?;
        let identities     = db.open_tree("identities").map_err(storage)?;
        let transfers      = db.open_tree("transfers").map_err(storage)?;
        let transfer_index = db.open_tree("transfer_index").map_err(storage)?;
        let audit          = db.open_tree("audit").map_err(storage)?;
        let credentials    = db.open_tree("credentials").map_err(storage)?;
        let meta           = db.open_tree("meta").map_err(storage)?;
        if stage_queue.is_empty() {
            for item in participants.iter() {
                let (_, bytes) = item.map_err(storage)?;
                let p: Participant = decode(&bytes)?;
                stage_queue
                    .insert(&queue_key(&p)[..], b"".as_ref())
                    .map_err(storage)?;
            }
        }
        Ok(Self {
            _db: db,
            participants,
            stage_queue,
            identities,
            transfers,
            transfer_index,
            audit,
            credentials,
            meta,
        })
    }

    /// Run `f` as one serializable transaction over every table.
    ///
    /// sled re-runs `f` on write conflicts, so it must be free of outside
    /// side effects. An abort carries the `AmigaError` out unchanged;
    /// nothing staged by `f` is kept.
    pub fn atomically<F, T>(&self, f: F) -> Result<T, AmigaError>
    where
        F: Fn(&TxView<'_>) -> TxResult<T>,
    {
        (
            &self.participants,
            &self.stage_queue,
            &self.identities,
            &self.transfers,
            &self.transfer_index,
            &self.audit,
            &self.credentials,
        )
            .transaction(|(participants, stage_queue, identities, transfers, transfer_index, audit, credentials)| {
                f(&TxView {
                    participants,
                    stage_queue,
                    identities,
                    transfers,
                    transfer_index,
                    audit,
                    credentials,
                })
            })
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => storage(e),
            })
    }

    // ── Participants ─────────────────────────────────────────────────────────

    pub fn get_participant(&self, id: ParticipantId) -> Result<Option<Participant>, AmigaError> {
        match self.participants.get(id.to_key()).map_err(storage)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn participant_id_by_username(
        &self,
        username: &str,
    ) -> Result<Option<ParticipantId>, AmigaError> {
        Ok(self
            .identities
            .get(username_key(username))
            .map_err(storage)?
            .and_then(|v| ParticipantId::from_key(&v)))
    }

    /// Stage-queue positions at `stage`, head first. Reads keys only.
    pub fn queue_slots(
        &self,
        stage: u8,
    ) -> impl Iterator<Item = Result<QueueSlot, AmigaError>> + '_ {
        self.stage_queue.scan_prefix([stage]).filter_map(|item| match item {
            Ok((key, _)) => decode_queue_key(&key).map(Ok),
            Err(e) => Some(Err(storage(e))),
        })
    }

    /// Participants at `stage`, in fair-queue order.
    pub fn stage_members(&self, stage: u8) -> Result<Vec<Participant>, AmigaError> {
        let mut out = Vec::new();
        for slot in self.queue_slots(stage) {
            if let Some(p) = self.get_participant(slot?.id)? {
                out.push(p);
            }
        }
        Ok(out)
    }

    /// Every participant, in id order.
    pub fn participants(&self) -> Result<Vec<Participant>, AmigaError> {
        let mut out = Vec::new();
        for item in self.participants.iter() {
            let (_, bytes) = item.map_err(storage)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn get_credential(&self, id: ParticipantId) -> Result<Option<String>, AmigaError> {
        match self.credentials.get(id.to_key()).map_err(storage)? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| AmigaError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    // ── Transfers ────────────────────────────────────────────────────────────

    pub fn get_transfer(&self, id: TransferId) -> Result<Option<Transfer>, AmigaError> {
        match self.transfers.get(id.to_key()).map_err(storage)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Transfers sent by `id`, oldest first.
    pub fn transfers_sent(&self, id: ParticipantId) -> Result<Vec<Transfer>, AmigaError> {
        self.indexed_transfers(SENT, id)
    }

    /// Transfers received by `id`, oldest first.
    pub fn transfers_received(&self, id: ParticipantId) -> Result<Vec<Transfer>, AmigaError> {
        self.indexed_transfers(RECEIVED, id)
    }

    fn indexed_transfers(
        &self,
        direction: u8,
        id: ParticipantId,
    ) -> Result<Vec<Transfer>, AmigaError> {
        let mut out = Vec::new();
        for item in self.transfer_index.scan_prefix(index_prefix(direction, id)) {
            let (key, _) = item.map_err(storage)?;
            let Some(tid) = key.get(9..).and_then(TransferId::from_key) else {
                continue;
            };
            if let Some(t) = self.get_transfer(tid)? {
                out.push(t);
            }
        }
        Ok(out)
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }

    // ── Audit ────────────────────────────────────────────────────────────────

    /// The full audit trail in append order. For external inspection only.
    pub fn audit_entries(&self) -> Result<Vec<AuditEntry>, AmigaError> {
        let mut out = Vec::new();
        for item in self.audit.iter() {
            let (_, bytes) = item.map_err(storage)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    /// Ids of every audit entry written by `actor`.
    pub fn audit_ids_by_actor(&self, actor: ParticipantId) -> Result<Vec<AuditId>, AmigaError> {
        Ok(self
            .audit_entries()?
            .into_iter()
            .filter(|e| e.actor_id == Some(actor))
            .map(|e| e.id)
            .collect())
    }

    // ── Meta ─────────────────────────────────────────────────────────────────

    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), AmigaError> {
        self.meta.insert(key.as_bytes(), value).map_err(storage)?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, AmigaError> {
        self.meta
            .get(key.as_bytes())
            .map(|v| v.map(|iv| iv.to_vec()))
            .map_err(storage)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), AmigaError> {
        self._db.flush().map_err(storage)?;
        Ok(())
    }
}

// ── Transactional view ────────────────────────────────────────────────────────

pub type TxResult<T> = ConflictableTransactionResult<T, AmigaError>;

/// Abort the surrounding transaction with `e`.
pub fn abort<T>(e: AmigaError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(e))
}

fn tx_encode<T: Serialize>(value: &T) -> TxResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn tx_decode<T: DeserializeOwned>(bytes: &[u8]) -> TxResult<T> {
    bincode::deserialize(bytes).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

/// Every table, as seen from inside one `StateDb::atomically` call.
pub struct TxView<'a> {
    participants: &'a TransactionalTree,
    stage_queue: &'a TransactionalTree,
    identities: &'a TransactionalTree,
    transfers: &'a TransactionalTree,
    transfer_index: &'a TransactionalTree,
    audit: &'a TransactionalTree,
    credentials: &'a TransactionalTree,
}

impl TxView<'_> {
    // ── Participants ─────────────────────────────────────────────────────────

    pub fn next_participant_id(&self) -> TxResult<ParticipantId> {
        self.participants
            .generate_id()
            .map(ParticipantId)
            .map_err(ConflictableTransactionError::Storage)
    }

    pub fn get_participant(&self, id: ParticipantId) -> TxResult<Option<Participant>> {
        match self.participants.get(id.to_key())? {
            Some(bytes) => Ok(Some(tx_decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like `get_participant`, aborting with `NotFound` when absent.
    pub fn require_participant(&self, id: ParticipantId) -> TxResult<Participant> {
        match self.get_participant(id)? {
            Some(p) => Ok(p),
            None => abort(AmigaError::NotFound(format!("participant {id}"))),
        }
    }

    /// Write a participant row and move its stage-queue entry along with it.
    pub fn put_participant(&self, participant: &Participant) -> TxResult<()> {
        if let Some(old) = self.get_participant(participant.id)? {
            self.stage_queue.remove(&queue_key(&old)[..])?;
        }
        self.participants
            .insert(&participant.id.to_key()[..], tx_encode(participant)?)?;
        self.stage_queue
            .insert(&queue_key(participant)[..], b"".as_ref())?;
        Ok(())
    }

    pub fn remove_participant(&self, id: ParticipantId) -> TxResult<()> {
        if let Some(old) = self.get_participant(id)? {
            self.stage_queue.remove(&queue_key(&old)[..])?;
        }
        self.participants.remove(&id.to_key()[..])?;
        self.credentials.remove(&id.to_key()[..])?;
        Ok(())
    }

    /// Bump the row version of `id` without changing anything else.
    pub fn touch(&self, id: ParticipantId) -> TxResult<Participant> {
        let mut p = self.require_participant(id)?;
        p.version += 1;
        self.put_participant(&p)?;
        Ok(p)
    }

    // ── Identities ───────────────────────────────────────────────────────────

    pub fn lookup_username(&self, username: &str) -> TxResult<Option<ParticipantId>> {
        Ok(self
            .identities
            .get(username_key(username))?
            .and_then(|v| ParticipantId::from_key(&v)))
    }

    /// Reserve `username` and `email` for `id`, aborting on collision.
    pub fn claim_identity(
        &self,
        id: ParticipantId,
        username: &str,
        email: Option<&str>,
    ) -> TxResult<()> {
        if self.identities.get(username_key(username))?.is_some() {
            return abort(AmigaError::DuplicateUsername(username.to_string()));
        }
        if let Some(email) = email {
            if self.identities.get(email_key(email))?.is_some() {
                return abort(AmigaError::DuplicateEmail(email.to_string()));
            }
            self.identities.insert(email_key(email), &id.to_key()[..])?;
        }
        self.identities.insert(username_key(username), &id.to_key()[..])?;
        Ok(())
    }

    pub fn release_identity(&self, username: &str, email: Option<&str>) -> TxResult<()> {
        self.identities.remove(username_key(username))?;
        if let Some(email) = email {
            self.identities.remove(email_key(email))?;
        }
        Ok(())
    }

    pub fn put_credential(&self, id: ParticipantId, hash: &str) -> TxResult<()> {
        self.credentials.insert(&id.to_key()[..], hash.as_bytes())?;
        Ok(())
    }

    // ── Transfers ────────────────────────────────────────────────────────────

    pub fn next_transfer_id(&self) -> TxResult<TransferId> {
        self.transfers
            .generate_id()
            .map(TransferId)
            .map_err(ConflictableTransactionError::Storage)
    }

    /// Write the transfer row and both index rows.
    pub fn insert_transfer(&self, transfer: &Transfer) -> TxResult<()> {
        self.transfers
            .insert(&transfer.id.to_key()[..], tx_encode(transfer)?)?;
        self.transfer_index
            .insert(&index_key(SENT, transfer.from_id, transfer.id)[..], b"".as_ref())?;
        self.transfer_index
            .insert(&index_key(RECEIVED, transfer.to_id, transfer.id)[..], b"".as_ref())?;
        Ok(())
    }

    /// Remove a transfer and its index rows. Returns `false` if it was
    /// already gone.
    pub fn remove_transfer(&self, id: TransferId) -> TxResult<bool> {
        let Some(bytes) = self.transfers.remove(&id.to_key()[..])? else {
            return Ok(false);
        };
        let transfer: Transfer = tx_decode(&bytes)?;
        self.transfer_index
            .remove(&index_key(SENT, transfer.from_id, transfer.id)[..])?;
        self.transfer_index
            .remove(&index_key(RECEIVED, transfer.to_id, transfer.id)[..])?;
        Ok(true)
    }

    // ── Audit ────────────────────────────────────────────────────────────────

    pub fn append_audit(
        &self,
        actor_id: Option<ParticipantId>,
        action: AuditAction,
        payload: serde_json::Value,
        now: Timestamp,
    ) -> TxResult<AuditId> {
        let id = self
            .audit
            .generate_id()
            .map(AuditId)
            .map_err(ConflictableTransactionError::Storage)?;
        let entry = AuditEntry {
            id,
            actor_id,
            action,
            payload: payload.to_string(),
            created_at: now,
        };
        self.audit.insert(&id.to_key()[..], tx_encode(&entry)?)?;
        Ok(id)
    }

    /// Null out the actor of an audit entry. Missing entries are ignored.
    pub fn detach_audit_actor(&self, id: AuditId) -> TxResult<()> {
        let Some(bytes) = self.audit.get(id.to_key())? else {
            return Ok(());
        };
        let mut entry: AuditEntry = tx_decode(&bytes)?;
        entry.actor_id = None;
        self.audit.insert(&id.to_key()[..], tx_encode(&entry)?)?;
        Ok(())
    }
}
