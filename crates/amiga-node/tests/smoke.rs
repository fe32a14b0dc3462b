//! End-to-end smoke test for amiga-node.
//!
//! Starts a real node process on a fresh database with a small quota,
//! registers participants via JSON-RPC, records donations and asserts the
//! ledger and stage progression are reflected.
//!
//! Run with:
//!   cargo test -p amiga-node --test smoke

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

// ── Node lifecycle ────────────────────────────────────────────────────────────

struct NodeGuard {
    child: Child,
    data_dir: PathBuf,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

/// Find a free TCP port on loopback.
fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

// ── RPC helpers ───────────────────────────────────────────────────────────────

async fn rpc_raw(client: &reqwest::Client, url: &str, method: &str, params: Value) -> Value {
    let body = json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1
    });
    let resp = client
        .post(url)
        .json(&body)
        .send()
        .await
        .unwrap_or_else(|e| panic!("RPC call {method} failed: {e}"));
    resp.json().await.expect("parse RPC JSON")
}

async fn rpc_call(client: &reqwest::Client, url: &str, method: &str, params: Value) -> Value {
    let json = rpc_raw(client, url, method, params).await;
    if let Some(err) = json.get("error") {
        panic!("RPC error from {method}: {err}");
    }
    json["result"].clone()
}

/// Poll until the RPC server responds or the timeout elapses.
async fn wait_for_rpc(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    let body = json!({
        "jsonrpc": "2.0",
        "method": "amiga_getCycleInfo",
        "params": [],
        "id": 1
    });
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = client.post(url).json(&body).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}

async fn register(client: &reqwest::Client, url: &str, username: &str, referrer: Option<&str>) -> u64 {
    let req = json!({
        "username": username,
        "full_name": format!("{username} Pereira"),
        "password": "senha",
        "email": format!("{username}@example.com"),
        "pix_key": format!("{username}@pix"),
        "referrer_username": referrer,
    });
    rpc_call(client, url, "amiga_createParticipant", json!([req]))
        .await
        .as_u64()
        .expect("participant id")
}

fn creds(username: &str, password: &str) -> Value {
    json!({ "username": username, "password": password })
}

// ── Smoke test ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn smoke_donation_cycle() {
    // ── 1. Prepare temp dir and cycle params ──────────────────────────────────
    let data_dir = std::env::temp_dir().join(format!("amiga_e2e_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&data_dir);
    std::fs::create_dir_all(&data_dir).unwrap();

    let params_path = data_dir.join("cycle-params.json");
    std::fs::write(&params_path, r#"{"quota": 2}"#).unwrap();

    // ── 2. Start node ─────────────────────────────────────────────────────────
    let rpc_port = free_port();
    let rpc_url = format!("http://127.0.0.1:{}", rpc_port);

    let node_bin = env!("CARGO_BIN_EXE_amiga-node");
    let child = Command::new(node_bin)
        .args([
            "--data-dir",       data_dir.join("state").to_str().unwrap(),
            "--rpc-addr",       &format!("127.0.0.1:{}", rpc_port),
            "--cycle-params",   params_path.to_str().unwrap(),
            "--admin-password", "s3nha-forte",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn amiga-node");

    let _guard = NodeGuard { child, data_dir };

    // ── 3. Wait for RPC ready ─────────────────────────────────────────────────
    let http = reqwest::Client::new();
    assert!(
        wait_for_rpc(&http, &rpc_url, Duration::from_secs(20)).await,
        "amiga-node did not become ready within 20 seconds"
    );

    let info = rpc_call(&http, &rpc_url, "amiga_getCycleInfo", json!([])).await;
    assert_eq!(info["quota"], 2);
    assert_eq!(info["participants"], 1, "administrator should be seeded");

    let admin = rpc_call(&http, &rpc_url, "amiga_authenticate", json!(["admin", "s3nha-forte"])).await;
    assert_eq!(admin["role"], "admin");

    // ── 4. Register a referrer and two referees ───────────────────────────────
    let boss = register(&http, &rpc_url, "boss", None).await;
    let d1 = register(&http, &rpc_url, "d1", Some("boss")).await;
    let d2 = register(&http, &rpc_url, "d2", Some("boss")).await;

    // ── 5. Two donations fill the quota and promote the referrer ──────────────
    let r1 = rpc_call(&http, &rpc_url, "amiga_recordDonation", json!([creds("d1", "senha")])).await;
    assert_eq!(r1["beneficiary_id"], boss);
    assert_eq!(r1["amount_cents"], 5_000);
    assert!(r1["promoted_to"].is_null());

    let r2 = rpc_call(&http, &rpc_url, "amiga_recordDonation", json!([creds("d2", "senha")])).await;
    assert_eq!(r2["promoted_to"], 2);

    let boss_row = rpc_call(&http, &rpc_url, "amiga_getParticipant", json!([boss])).await;
    assert_eq!(boss_row["stage"], 2);
    assert_eq!(boss_row["quota_count"], 0);

    let history = rpc_call(&http, &rpc_url, "amiga_listDonations", json!([boss])).await;
    assert_eq!(history["received"].as_array().map(Vec::len), Some(2));

    // ── 6. A donor without a referrer is routed through the stage queue ───────
    let solo = register(&http, &rpc_url, "solo", None).await;
    let target = rpc_call(&http, &rpc_url, "amiga_resolveDonationTarget", json!([solo])).await;
    assert_eq!(target["beneficiary_id"], d1);
    assert_eq!(target["via_referrer"], false);

    let info = rpc_call(&http, &rpc_url, "amiga_getCycleInfo", json!([])).await;
    assert_eq!(info["transfers"], 2);

    // ── 7. Bad credentials and bare actor ids are refused ─────────────────────
    let bad = rpc_raw(&http, &rpc_url, "amiga_recordDonation", json!([creds("ghost", "x")])).await;
    assert_eq!(bad["error"]["code"], -32005);

    let spoofed = rpc_raw(&http, &rpc_url, "amiga_deleteParticipant", json!([admin["id"], boss])).await;
    assert_eq!(spoofed["error"]["code"], -32602);
    let boss_row = rpc_call(&http, &rpc_url, "amiga_getParticipant", json!([boss])).await;
    assert_eq!(boss_row["username"], "boss");
    assert_eq!(boss_row["plan"], "Bronze");
}
