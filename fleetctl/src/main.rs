mod client;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client::ControlClient;
use kiosk_shared::{CommandKind, PostgrestStore, StoreConfig};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Operator tool for the kiosk fleet
#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(about = "Enqueue device commands, toggle kiosk mode and query local agents", long_about = None)]
struct Cli {
    /// Backend base URL
    #[arg(long, env = "SUPABASE_URL", default_value = "http://127.0.0.1:54321")]
    url: String,

    /// Backend API key
    #[arg(long, env = "SUPABASE_KEY", default_value = "", hide_env_values = true)]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a command for a device
    Send {
        /// reboot or restart-app
        kind: CommandKind,

        #[arg(long)]
        device: String,
    },

    /// List commands not yet executed
    Pending {
        #[arg(long)]
        device: Option<String>,
    },

    /// Turn kiosk mode on or off for a device
    Kiosk {
        state: Toggle,

        #[arg(long)]
        device: String,
    },

    /// Show the status of the agent on this machine
    Status {
        #[arg(long, default_value = "127.0.0.1:7878")]
        agent: String,
    },

    /// Ask the agent on this machine to restart its application now
    Restart {
        #[arg(long, default_value = "127.0.0.1:7878")]
        agent: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

const AGENT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Send { kind, device } => {
            let store = backend(&cli.url, &cli.key)?;
            let command = store.insert_command(&device, kind).await?;
            info!("Inserted command {} for {}", command.id, device);
            println!("queued {} for {} (id {})", kind, device, command.id);
        }
        Commands::Pending { device } => {
            let store = backend(&cli.url, &cli.key)?;
            let pending = store.list_pending(device.as_deref()).await?;
            if pending.is_empty() {
                println!("no pending commands");
            }
            for cmd in pending {
                let created = cmd
                    .created_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".into());
                println!("{:>8}  {:<12}  {:<24}  {}", cmd.id, cmd.kind, cmd.device_id, created);
            }
        }
        Commands::Kiosk { state, device } => {
            let enabled = matches!(state, Toggle::On);
            let store = backend(&cli.url, &cli.key)?;
            store.set_kiosk_mode(&device, enabled).await?;
            println!(
                "kiosk mode {} for {}",
                if enabled { "enabled" } else { "disabled" },
                device
            );
        }
        Commands::Status { agent } => {
            let mut client = connect(&agent).await?;
            let report = client.status().await?;
            println!("device:           {}", report.device_id);
            println!("running:          {}", report.service_running);
            println!("last poll:        {}", format_ms(report.last_poll_at_ms));
            println!("last reboot:      {}", format_ms(report.last_reboot_at_ms));
            println!("last restart:     {}", format_ms(report.last_restart_at_ms));
            println!("kiosk active:     {}", report.kiosk_active);
            println!("target:           {}", or_dash(&report.target_package));
            println!("boot:             {}", or_dash(&report.boot_outcome));
            if report.reboot_capability_missing {
                println!("warning:          reboot requested but the agent lacks the grant");
            }
        }
        Commands::Restart { agent } => {
            let mut client = connect(&agent).await?;
            let ack = client.manual_restart().await?;
            if ack.accepted {
                println!("{}", ack.message);
            } else {
                anyhow::bail!("agent refused: {}", ack.message);
            }
        }
    }

    Ok(())
}

fn backend(url: &str, key: &str) -> Result<PostgrestStore> {
    let store = PostgrestStore::new(StoreConfig {
        base_url: url.to_string(),
        api_key: key.to_string(),
        ..Default::default()
    })?;
    debug!(
        "Backend: {} (timeout {:?})",
        store.config().base_url,
        store.config().request_timeout
    );
    Ok(store)
}

async fn connect(agent: &str) -> Result<ControlClient> {
    ControlClient::connect(agent, AGENT_REPLY_TIMEOUT)
        .await
        .with_context(|| format!("is the agent running on {}?", agent))
}

fn format_ms(ms: u64) -> String {
    if ms == 0 {
        return "never".into();
    }
    chrono::DateTime::from_timestamp_millis(ms as i64)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_send() {
        let cli = Cli::try_parse_from(["fleetctl", "send", "restart-app", "--device", "dev-1"])
            .unwrap();
        match cli.command {
            Commands::Send { kind, device } => {
                assert_eq!(kind, CommandKind::RestartApp);
                assert_eq!(device, "dev-1");
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_kind() {
        assert!(Cli::try_parse_from(["fleetctl", "send", "shutdown", "--device", "d"]).is_err());
    }

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(0), "never");
        assert!(format_ms(1_715_555_027_000).starts_with("2024-05-12"));
    }
}
