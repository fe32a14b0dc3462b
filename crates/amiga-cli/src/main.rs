//! amiga
//!
//! Command-line client for a running amiga node. Commands that act on behalf
//! of a participant send `--user` / `--password` with the call; the node
//! works out who is acting from them.
//!
//! Usage:
//!   amiga register --username <u> --full-name <n> --password <p> [--email <e>] [--pix-key <k>] [--referrer <u>]
//!   amiga login    --user <u> --password <p>
//!   amiga target   --user <u> --password <p>
//!   amiga donate   --user <u> --password <p>
//!   amiga history  --user <u> --password <p>
//!   amiga set-pix  --user <u> --password <p> [--key <k>] [--participant <u>]
//!   amiga delete   --user <admin> --password <p> --participant <u>
//!   amiga assign-referrer --user <admin> --password <p> --participant <u> --referrer <u>
//!   amiga queue    --stage <n>
//!   amiga info

use anyhow::{bail, Context};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::info;

use amiga_core::participant::{NewParticipant, ParticipantIdentity};
use amiga_rpc::{RpcCredentials, RpcParticipant, RpcTransfer};

mod rpc_client;
use rpc_client::CycleRpcClient;

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "amiga",
    version,
    about = "Referral donation cycle client"
)]
struct Args {
    /// Node RPC endpoint.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8645")]
    rpc: String,

    #[command(subcommand)]
    command: Command,
}

/// Who is acting.
#[derive(ClapArgs, Debug)]
struct Login {
    /// Username to log in as.
    #[arg(long)]
    user: String,
    /// Password (or set AMIGA_PASSWORD).
    #[arg(long, env = "AMIGA_PASSWORD", hide_env_values = true)]
    password: String,
}

impl Login {
    fn credentials(&self) -> RpcCredentials {
        RpcCredentials::new(self.user.trim(), self.password.as_str())
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new participant.
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        full_name: String,
        #[arg(long, env = "AMIGA_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        pix_key: Option<String>,
        /// Username of the participant who referred you.
        #[arg(long)]
        referrer: Option<String>,
    },

    /// Check credentials and print the participant's state.
    Login {
        #[command(flatten)]
        login: Login,
    },

    /// Show who your next donation goes to.
    Target {
        #[command(flatten)]
        login: Login,
    },

    /// Record a donation to your current target.
    Donate {
        #[command(flatten)]
        login: Login,
    },

    /// List donations sent and received.
    History {
        #[command(flatten)]
        login: Login,
    },

    /// Set or clear a PIX key. Administrators may pass `--participant`.
    SetPix {
        #[command(flatten)]
        login: Login,
        /// New key. Omit to clear.
        #[arg(long)]
        key: Option<String>,
        /// Participant to edit (defaults to yourself).
        #[arg(long)]
        participant: Option<String>,
    },

    /// Administrator: delete a participant and its transfers.
    Delete {
        #[command(flatten)]
        login: Login,
        #[arg(long)]
        participant: String,
    },

    /// Administrator: set a participant's referrer.
    AssignReferrer {
        #[command(flatten)]
        login: Login,
        #[arg(long)]
        participant: String,
        #[arg(long)]
        referrer: String,
    },

    /// Show a stage's queue in the order it is served.
    Queue {
        #[arg(long, default_value_t = 1)]
        stage: u8,
    },

    /// Print the node's cycle parameters.
    Info,
}

// ── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,amiga_cli=info")),
        )
        .init();

    let args = Args::parse();
    let client = CycleRpcClient::new(&args.rpc);

    match args.command {
        Command::Register { username, full_name, password, email, pix_key, referrer } => {
            let request = NewParticipant {
                username,
                full_name,
                password,
                email,
                pix_key,
                referrer_username: referrer,
            };
            let id = client.create_participant(&request).await?;
            info!(participant = id, "registered");
            println!("Registered {} (id {})", request.username, id);
            Ok(())
        }

        Command::Login { login } => {
            let me = log_in(&client, &login).await?;
            print_identity(&me);
            Ok(())
        }

        Command::Target { login } => {
            let me = log_in(&client, &login).await?;
            let target = client.resolve_donation_target(me.id.0).await?;
            println!("Donate to:  {} (@{})", target.full_name, target.username);
            println!("Amount:     {}", target.amount);
            println!("Stage:      {}", target.stage);
            println!("PIX key:    {}", target.pix_key.as_deref().unwrap_or("(not set)"));
            if target.via_referrer {
                println!("Source:     your referrer");
            } else {
                println!("Source:     stage {} queue", target.stage);
            }
            Ok(())
        }

        Command::Donate { login } => {
            log_in(&client, &login).await?;
            let receipt = client.record_donation(&login.credentials()).await?;
            println!("{}", receipt.message);
            if let Some(stage) = receipt.promoted_to {
                println!("@{} advanced to stage {}", receipt.beneficiary_username, stage);
            }
            Ok(())
        }

        Command::History { login } => {
            let me = log_in(&client, &login).await?;
            let history = client.list_donations(me.id.0).await?;
            println!("Sent ({}):", history.sent.len());
            for t in &history.sent {
                println!("  {}", transfer_line(t, t.to_username.as_deref(), "to"));
            }
            println!("Received ({}):", history.received.len());
            for t in &history.received {
                println!("  {}", transfer_line(t, t.from_username.as_deref(), "from"));
            }
            Ok(())
        }

        Command::SetPix { login, key, participant } => {
            let me = log_in(&client, &login).await?;
            let target = match participant {
                Some(username) => client.participant_by_username(&username).await?.id,
                None => me.id.0,
            };
            client.update_pix_key(&login.credentials(), target, key.as_deref()).await?;
            match key {
                Some(k) if !k.trim().is_empty() => println!("PIX key set to {}", k.trim()),
                _ => println!("PIX key cleared"),
            }
            Ok(())
        }

        Command::Delete { login, participant } => {
            log_in(&client, &login).await?;
            let target = client.participant_by_username(&participant).await?;
            client.delete_participant(&login.credentials(), target.id).await?;
            println!("Deleted @{} (id {})", target.username, target.id);
            Ok(())
        }

        Command::AssignReferrer { login, participant, referrer } => {
            log_in(&client, &login).await?;
            let target = client.participant_by_username(&participant).await?;
            let upstream = client.participant_by_username(&referrer).await?;
            client.assign_referrer(&login.credentials(), target.id, upstream.id).await?;
            println!("@{} now donates to @{}", target.username, upstream.username);
            Ok(())
        }

        Command::Queue { stage } => {
            let info = client.cycle_info().await?;
            let queue = client.stage_queue(stage).await?;
            println!("Stage {} ({} participants):", stage, queue.len());
            for (pos, p) in queue.iter().enumerate() {
                println!("  {:>3}. {}", pos + 1, queue_line(p, info.quota));
            }
            Ok(())
        }

        Command::Info => {
            let info = client.cycle_info().await?;
            println!("Quota:         {} transfers per stage", info.quota);
            println!("Stages:        1..={}", info.max_stage);
            for s in &info.stages {
                println!("  stage {}:     {}", s.stage, s.amount);
            }
            println!("Terminal:      {:?}", info.terminal_policy);
            println!("Participants:  {}", info.participants);
            println!("Transfers:     {}", info.transfers);
            Ok(())
        }
    }
}

async fn log_in(client: &CycleRpcClient, login: &Login) -> anyhow::Result<ParticipantIdentity> {
    if login.user.trim().is_empty() {
        bail!("--user must not be empty");
    }
    client
        .authenticate(&login.user, &login.password)
        .await
        .with_context(|| format!("logging in as {}", login.user))
}

fn print_identity(me: &ParticipantIdentity) {
    println!("Participant:  {} (@{}, id {})", me.full_name, me.username, me.id);
    println!("Role:         {}", me.role);
    println!("Plan:         {}", me.plan);
    println!("Stage:        {}", me.stage);
    println!("Received:     {} this stage", me.quota_count);
    println!("PIX key:      {}", me.pix_key.as_deref().unwrap_or("(not set)"));
    match me.referrer_id {
        Some(r) => println!("Referrer:     id {}", r),
        None => println!("Referrer:     none (stage queue)"),
    }
}

fn transfer_line(t: &RpcTransfer, counterpart: Option<&str>, direction: &str) -> String {
    let when = chrono::DateTime::from_timestamp(t.created_at, 0)
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| t.created_at.to_string());
    let who = counterpart.map(|u| format!("@{u}")).unwrap_or_else(|| "(deleted)".into());
    format!("#{} {} {} {} {}  stage {}", t.id, when, direction, who, t.amount, t.stage)
}

fn queue_line(p: &RpcParticipant, quota: u32) -> String {
    format!("@{:<20} {:>3}/{} received  since {}", p.username, p.quota_count, quota, p.created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use amiga_core::participant::TransferStatus;

    #[test]
    fn parses_admin_command() {
        let args = Args::try_parse_from([
            "amiga",
            "--rpc",
            "http://node:9000",
            "assign-referrer",
            "--user",
            "admin",
            "--password",
            "x",
            "--participant",
            "ana",
            "--referrer",
            "bia",
        ])
        .unwrap();
        assert_eq!(args.rpc, "http://node:9000");
        match args.command {
            Command::AssignReferrer { login, participant, referrer } => {
                assert_eq!(login.user, "admin");
                let creds = login.credentials();
                assert_eq!((creds.username.as_str(), creds.password.as_str()), ("admin", "x"));
                assert_eq!((participant.as_str(), referrer.as_str()), ("ana", "bia"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn transfer_line_marks_deleted_counterparts() {
        let t = RpcTransfer {
            id: 7,
            from_id: 1,
            from_username: None,
            to_id: 2,
            to_username: Some("bia".into()),
            amount_cents: 5_000,
            amount: "R$ 50.00".into(),
            stage: 1,
            status: TransferStatus::Confirmed,
            created_at: 0,
        };
        let line = transfer_line(&t, t.from_username.as_deref(), "from");
        assert_eq!(line, "#7 1970-01-01 00:00 from (deleted) R$ 50.00  stage 1");
    }
}
