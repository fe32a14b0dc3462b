use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tracing::{debug, info};

use amiga_core::error::AmigaError;
use amiga_core::participant::{NewParticipant, ParticipantIdentity, Transfer};
use amiga_core::types::{unix_now, ParticipantId};
use amiga_state::CycleEngine;

use crate::api::AmigaApiServer;
use crate::types::{
    RpcCredentials, RpcCycleInfo, RpcDonationHistory, RpcDonationReceipt, RpcDonationTarget, RpcParticipant,
    RpcTransfer,
};

// ── Error codes ───────────────────────────────────────────────────────────────

pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const NOT_FOUND: i32 = -32001;
pub const DUPLICATE: i32 = -32002;
pub const NO_TARGET: i32 = -32003;
pub const CONFLICT: i32 = -32004;
pub const BAD_CREDENTIALS: i32 = -32005;
pub const PERMISSION_DENIED: i32 = -32006;

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

/// Stable JSON-RPC code for each engine error.
pub fn error_code(e: &AmigaError) -> i32 {
    match e {
        AmigaError::InvalidInput(_) | AmigaError::SelfReferral | AmigaError::ReferralCycle => {
            INVALID_PARAMS
        }
        AmigaError::NotFound(_) => NOT_FOUND,
        AmigaError::DuplicateUsername(_) | AmigaError::DuplicateEmail(_) => DUPLICATE,
        AmigaError::NoTargetAvailable => NO_TARGET,
        AmigaError::ConcurrentUpdateConflict { .. } => CONFLICT,
        AmigaError::InvalidCredentials => BAD_CREDENTIALS,
        AmigaError::PermissionDenied { .. } => PERMISSION_DENIED,
        AmigaError::Serialization(_)
        | AmigaError::Persistence(_)
        | AmigaError::TransientPersistence(_) => INTERNAL_ERROR,
    }
}

fn engine_err(e: AmigaError) -> ErrorObject<'static> {
    rpc_err(error_code(&e), e.to_string())
}

/// Shared state passed to the RPC server.
pub struct RpcServerState {
    pub engine: Arc<CycleEngine>,
}

/// The RPC server implementation.
pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr`. Returns the bound address (useful
    /// with port 0) and a handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<(SocketAddr, ServerHandle)> {
        let server = Server::builder().build(addr).await?;
        let bound = server.local_addr()?;
        let module = self.into_rpc();
        let handle = server.start(module);
        info!(addr = %bound, "RPC server started");
        Ok((bound, handle))
    }

    /// Run `f` against the engine off the async executor. Password hashing
    /// and sled transactions both block.
    async fn run<T, F>(&self, f: F) -> RpcResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&CycleEngine) -> Result<T, AmigaError> + Send + 'static,
    {
        let engine = Arc::clone(&self.state.engine);
        tokio::task::spawn_blocking(move || f(&engine))
            .await
            .map_err(|e| rpc_err(INTERNAL_ERROR, format!("engine task failed: {e}")))?
            .map_err(engine_err)
    }
}

/// The participant `credentials` log in as.
fn actor(engine: &CycleEngine, credentials: &RpcCredentials) -> Result<ParticipantId, AmigaError> {
    let identity = engine.authenticate(&credentials.username, &credentials.password)?;
    Ok(identity.id)
}

fn not_found_as_none<T>(result: Result<T, AmigaError>) -> Result<Option<T>, AmigaError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(AmigaError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn with_usernames(engine: &CycleEngine, transfers: &[Transfer]) -> Result<Vec<RpcTransfer>, AmigaError> {
    let username = |id: ParticipantId| -> Result<Option<String>, AmigaError> {
        Ok(engine.db.get_participant(id)?.map(|p| p.username))
    };
    transfers
        .iter()
        .map(|t| Ok(RpcTransfer::new(t, username(t.from_id)?, username(t.to_id)?)))
        .collect()
}

#[async_trait]
impl AmigaApiServer for RpcServer {
    async fn create_participant(&self, request: NewParticipant) -> RpcResult<u64> {
        debug!(username = %request.username, "RPC: createParticipant");
        self.run(move |engine| engine.create_participant(&request, unix_now()).map(|id| id.0))
            .await
    }

    async fn authenticate(&self, username: String, password: String)
        -> RpcResult<ParticipantIdentity>
    {
        self.run(move |engine| engine.authenticate(&username, &password)).await
    }

    async fn get_participant(&self, id: u64) -> RpcResult<Option<RpcParticipant>> {
        self.run(move |engine| {
            Ok(engine.db.get_participant(ParticipantId(id))?.as_ref().map(RpcParticipant::from))
        })
        .await
    }

    async fn get_participant_by_username(&self, username: String)
        -> RpcResult<Option<RpcParticipant>>
    {
        self.run(move |engine| {
            Ok(not_found_as_none(engine.participant_by_username(&username))?
                .as_ref()
                .map(RpcParticipant::from))
        })
        .await
    }

    async fn get_participants(&self) -> RpcResult<Vec<RpcParticipant>> {
        self.run(|engine| {
            Ok(engine.list_participants()?.iter().map(RpcParticipant::from).collect())
        })
        .await
    }

    async fn resolve_donation_target(&self, donor: u64) -> RpcResult<RpcDonationTarget> {
        self.run(move |engine| engine.donation_target(ParticipantId(donor)).map(Into::into))
            .await
    }

    async fn record_donation(&self, credentials: RpcCredentials)
        -> RpcResult<RpcDonationReceipt>
    {
        debug!(username = %credentials.username, "RPC: recordDonation");
        self.run(move |engine| {
            let donor = actor(engine, &credentials)?;
            engine
                .record_donation(donor, unix_now())
                .map(|r| RpcDonationReceipt::from(&r))
        })
        .await
    }

    async fn list_donations(&self, participant: u64) -> RpcResult<RpcDonationHistory> {
        self.run(move |engine| {
            let history = engine.list_donations(ParticipantId(participant))?;
            Ok(RpcDonationHistory {
                sent: with_usernames(engine, &history.sent)?,
                received: with_usernames(engine, &history.received)?,
            })
        })
        .await
    }

    async fn update_pix_key(
        &self,
        credentials: RpcCredentials,
        participant: u64,
        pix_key: Option<String>,
    ) -> RpcResult<bool> {
        self.run(move |engine| {
            engine.update_pix_key(
                actor(engine, &credentials)?,
                ParticipantId(participant),
                pix_key.as_deref(),
                unix_now(),
            )?;
            Ok(true)
        })
        .await
    }

    async fn delete_participant(&self, credentials: RpcCredentials, participant: u64)
        -> RpcResult<bool>
    {
        self.run(move |engine| {
            let admin = actor(engine, &credentials)?;
            engine.delete_participant(admin, ParticipantId(participant), unix_now())?;
            Ok(true)
        })
        .await
    }

    async fn assign_referrer(
        &self,
        credentials: RpcCredentials,
        participant: u64,
        referrer: u64,
    ) -> RpcResult<bool> {
        self.run(move |engine| {
            engine.assign_referrer(
                actor(engine, &credentials)?,
                ParticipantId(participant),
                ParticipantId(referrer),
                unix_now(),
            )?;
            Ok(true)
        })
        .await
    }

    async fn get_stage_queue(&self, stage: u8) -> RpcResult<Vec<RpcParticipant>> {
        let max_stage = self.state.engine.params().max_stage;
        if stage == 0 || stage > max_stage {
            return Err(rpc_err(
                INVALID_PARAMS,
                format!("stage must be between 1 and {max_stage}"),
            ));
        }
        self.run(move |engine| {
            Ok(engine.stage_queue(stage)?.iter().map(RpcParticipant::from).collect())
        })
        .await
    }

    async fn get_cycle_info(&self) -> RpcResult<RpcCycleInfo> {
        self.run(|engine| {
            Ok(RpcCycleInfo::new(
                engine.params(),
                engine.db.participant_count(),
                engine.db.transfer_count(),
            ))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amiga_core::cycle::CycleParams;
    use amiga_core::types::Role;
    use amiga_state::{ensure_admin_seed, StateDb};
    use jsonrpsee::core::client::{ClientT, Error as ClientError};
    use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
    use jsonrpsee::rpc_params;

    async fn start(params: CycleParams) -> (HttpClient, ServerHandle) {
        let engine = CycleEngine::new(Arc::new(StateDb::temporary().unwrap()), params).unwrap();
        ensure_admin_seed(&engine, "admin", "admin123", 0).unwrap();
        let state = Arc::new(RpcServerState { engine: Arc::new(engine) });
        let (addr, handle) = RpcServer::new(state)
            .start("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let client = HttpClientBuilder::default()
            .build(format!("http://{addr}"))
            .unwrap();
        (client, handle)
    }

    async fn register(client: &HttpClient, username: &str, referrer: Option<&str>) -> u64 {
        let req = NewParticipant {
            username: username.into(),
            full_name: format!("{username} Souza"),
            password: "pw".into(),
            pix_key: Some(format!("{username}@pix")),
            referrer_username: referrer.map(str::to_string),
            ..Default::default()
        };
        client
            .request("amiga_createParticipant", rpc_params![req])
            .await
            .unwrap()
    }

    fn code<T: std::fmt::Debug>(result: Result<T, ClientError>) -> i32 {
        match result {
            Err(ClientError::Call(e)) => e.code(),
            other => panic!("expected call error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn donation_flow_over_rpc() {
        let (client, handle) = start(CycleParams::default()).await;
        let boss = register(&client, "boss", None).await;
        let donor = register(&client, "donor", Some("boss")).await;

        let target: RpcDonationTarget = client
            .request("amiga_resolveDonationTarget", rpc_params![donor])
            .await
            .unwrap();
        assert_eq!(target.beneficiary_id, boss);
        assert_eq!(target.amount, "R$ 50.00");
        assert!(target.via_referrer);

        let receipt: RpcDonationReceipt = client
            .request("amiga_recordDonation", rpc_params![RpcCredentials::new("donor", "pw")])
            .await
            .unwrap();
        assert_eq!(receipt.beneficiary_id, boss);
        assert_eq!(receipt.message, "Donation recorded and confirmed for boss Souza (R$ 50.00).");

        let history: RpcDonationHistory = client
            .request("amiga_listDonations", rpc_params![boss])
            .await
            .unwrap();
        assert_eq!(history.received.len(), 1);
        assert_eq!(history.received[0].from_username.as_deref(), Some("donor"));

        let queue: Vec<RpcParticipant> = client
            .request("amiga_getStageQueue", rpc_params![1u8])
            .await
            .unwrap();
        assert_eq!(queue.last().map(|p| p.id), Some(boss));

        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn errors_carry_stable_codes() {
        let (client, handle) = start(CycleParams::default()).await;
        let solo = register(&client, "solo", None).await;

        let r = client
            .request::<RpcDonationReceipt, _>(
                "amiga_recordDonation",
                rpc_params![RpcCredentials::new("solo", "pw")],
            )
            .await;
        assert_eq!(code(r), NO_TARGET);

        let r = client
            .request::<ParticipantIdentity, _>("amiga_authenticate", rpc_params!["solo", "wrong"])
            .await;
        assert_eq!(code(r), BAD_CREDENTIALS);

        let dup = NewParticipant {
            username: "solo".into(),
            full_name: "Again".into(),
            password: "pw".into(),
            ..Default::default()
        };
        let r = client
            .request::<u64, _>("amiga_createParticipant", rpc_params![dup])
            .await;
        assert_eq!(code(r), DUPLICATE);

        let r = client
            .request::<bool, _>(
                "amiga_deleteParticipant",
                rpc_params![RpcCredentials::new("solo", "pw"), solo],
            )
            .await;
        assert_eq!(code(r), PERMISSION_DENIED);

        let r = client
            .request::<Vec<RpcParticipant>, _>("amiga_getStageQueue", rpc_params![9u8])
            .await;
        assert_eq!(code(r), INVALID_PARAMS);

        let missing: Option<RpcParticipant> = client
            .request("amiga_getParticipant", rpc_params![999u64])
            .await
            .unwrap();
        assert!(missing.is_none());

        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn admin_operations() {
        let (client, handle) = start(CycleParams::default()).await;
        let admin: ParticipantIdentity = client
            .request("amiga_authenticate", rpc_params!["admin", "admin123"])
            .await
            .unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert_eq!(admin.plan, "Diamante");
        let root = RpcCredentials::new("admin", "admin123");
        let a = register(&client, "a", None).await;
        let b = register(&client, "b", Some("a")).await;

        let r = client
            .request::<bool, _>("amiga_assignReferrer", rpc_params![root.clone(), a, b])
            .await;
        assert_eq!(code(r), INVALID_PARAMS);

        let ok: bool = client
            .request("amiga_updatePixKey", rpc_params![root.clone(), b, Option::<String>::None])
            .await
            .unwrap();
        assert!(ok);
        let b_row: Option<RpcParticipant> = client
            .request("amiga_getParticipantByUsername", rpc_params!["b"])
            .await
            .unwrap();
        assert_eq!(b_row.and_then(|p| p.pix_key), None);

        let ok: bool = client
            .request("amiga_deleteParticipant", rpc_params![root, a])
            .await
            .unwrap();
        assert!(ok);
        let info: RpcCycleInfo = client
            .request("amiga_getCycleInfo", rpc_params![])
            .await
            .unwrap();
        assert_eq!(info.participants, 2);
        assert_eq!(info.quota, 12);
        assert_eq!(info.stages.len(), 3);

        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn actor_comes_from_credentials_not_ids() {
        let (client, handle) = start(CycleParams::default()).await;
        let victim = register(&client, "victim", None).await;
        register(&client, "mallory", None).await;

        // The admin id is public; knowing it grants nothing.
        let everyone: Vec<RpcParticipant> = client
            .request("amiga_getParticipants", rpc_params![])
            .await
            .unwrap();
        let admin_id = everyone.iter().find(|p| p.role == Role::Admin).map(|p| p.id).unwrap();

        let r = client
            .request::<bool, _>("amiga_updatePixKey", rpc_params![admin_id, victim, "mallory@pix"])
            .await;
        assert_eq!(code(r), INVALID_PARAMS);
        let r = client
            .request::<bool, _>("amiga_deleteParticipant", rpc_params![admin_id, victim])
            .await;
        assert_eq!(code(r), INVALID_PARAMS);
        let r = client
            .request::<RpcDonationReceipt, _>("amiga_recordDonation", rpc_params![victim])
            .await;
        assert_eq!(code(r), INVALID_PARAMS);

        let mallory = RpcCredentials::new("mallory", "pw");
        let r = client
            .request::<bool, _>(
                "amiga_updatePixKey",
                rpc_params![mallory.clone(), victim, "mallory@pix"],
            )
            .await;
        assert_eq!(code(r), PERMISSION_DENIED);
        let r = client
            .request::<bool, _>("amiga_deleteParticipant", rpc_params![mallory, victim])
            .await;
        assert_eq!(code(r), PERMISSION_DENIED);

        let guessed = RpcCredentials::new("admin", "guess");
        let r = client
            .request::<bool, _>("amiga_deleteParticipant", rpc_params![guessed, victim])
            .await;
        assert_eq!(code(r), BAD_CREDENTIALS);

        let row: Option<RpcParticipant> = client
            .request("amiga_getParticipant", rpc_params![victim])
            .await
            .unwrap();
        assert_eq!(row.and_then(|p| p.pix_key).as_deref(), Some("victim@pix"));

        handle.stop().unwrap();
    }
}
