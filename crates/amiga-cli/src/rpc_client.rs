use anyhow::{bail, Context};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use amiga_core::participant::{NewParticipant, ParticipantIdentity};
use amiga_rpc::{
    RpcCredentials, RpcCycleInfo, RpcDonationHistory, RpcDonationReceipt, RpcDonationTarget, RpcParticipant,
};

/// JSON-RPC 2.0 client for a running amiga node.
///
/// Raw HTTP POST with serde_json; each method decodes the `result` field
/// into the server's `Rpc*` type.
pub struct CycleRpcClient {
    url: String,
    client: reqwest::Client,
}

impl CycleRpcClient {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Call a JSON-RPC method and return the `result` field.
    async fn call(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("connecting to node at {}", self.url))?;

        let json: Value = resp.json().await.context("parsing RPC response")?;

        if let Some(err) = json.get("error") {
            let message = err["message"].as_str().unwrap_or("unknown error");
            bail!("{} (code {})", message, err["code"]);
        }

        Ok(json["result"].clone())
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> anyhow::Result<T> {
        let result = self.call(method, params).await?;
        serde_json::from_value(result).with_context(|| format!("decoding {method} response"))
    }

    pub async fn create_participant(&self, request: &NewParticipant) -> anyhow::Result<u64> {
        self.call_as("amiga_createParticipant", json!([request])).await
    }

    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> anyhow::Result<ParticipantIdentity> {
        self.call_as("amiga_authenticate", json!([username, password])).await
    }

    /// Look a participant up by username, failing if it does not exist.
    pub async fn participant_by_username(&self, username: &str) -> anyhow::Result<RpcParticipant> {
        let found: Option<RpcParticipant> = self
            .call_as("amiga_getParticipantByUsername", json!([username]))
            .await?;
        found.with_context(|| format!("no participant named '{username}'"))
    }

    pub async fn resolve_donation_target(&self, donor: u64) -> anyhow::Result<RpcDonationTarget> {
        self.call_as("amiga_resolveDonationTarget", json!([donor])).await
    }

    pub async fn record_donation(
        &self,
        donor: &RpcCredentials,
    ) -> anyhow::Result<RpcDonationReceipt> {
        self.call_as("amiga_recordDonation", json!([donor])).await
    }

    pub async fn list_donations(&self, participant: u64) -> anyhow::Result<RpcDonationHistory> {
        self.call_as("amiga_listDonations", json!([participant])).await
    }

    pub async fn update_pix_key(
        &self,
        actor: &RpcCredentials,
        participant: u64,
        pix_key: Option<&str>,
    ) -> anyhow::Result<()> {
        let _: bool = self
            .call_as("amiga_updatePixKey", json!([actor, participant, pix_key]))
            .await?;
        Ok(())
    }

    pub async fn delete_participant(
        &self,
        actor: &RpcCredentials,
        participant: u64,
    ) -> anyhow::Result<()> {
        let _: bool = self
            .call_as("amiga_deleteParticipant", json!([actor, participant]))
            .await?;
        Ok(())
    }

    pub async fn assign_referrer(
        &self,
        actor: &RpcCredentials,
        participant: u64,
        referrer: u64,
    ) -> anyhow::Result<()> {
        let _: bool = self
            .call_as("amiga_assignReferrer", json!([actor, participant, referrer]))
            .await?;
        Ok(())
    }

    pub async fn stage_queue(&self, stage: u8) -> anyhow::Result<Vec<RpcParticipant>> {
        self.call_as("amiga_getStageQueue", json!([stage])).await
    }

    pub async fn cycle_info(&self) -> anyhow::Result<RpcCycleInfo> {
        self.call_as("amiga_getCycleInfo", json!([])).await
    }
}
