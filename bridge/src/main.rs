use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use trestle_observability::{canonical_logs_dir_from_root, init_process_logging, ProcessKind};
use trestle_providers::ProviderCatalog;
use trestle_server::{serve, AppState};

const LOG_RETENTION_DAYS: u64 = 14;

#[derive(Parser, Debug)]
#[command(name = "trestle-bridge")]
#[command(about = "Relay between web chat clients and a code-editor extension")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge server.
    Serve {
        #[arg(long, alias = "host", default_value = "0.0.0.0")]
        hostname: String,
        #[arg(long, default_value_t = 8000)]
        port: u16,
        /// Host of the editor extension's IPC server.
        #[arg(long, default_value = "127.0.0.1")]
        ipc_host: String,
        #[arg(long, default_value_t = 9999)]
        ipc_port: u16,
        /// Sessions idle longer than this are swept.
        #[arg(long, default_value_t = 30)]
        session_timeout_mins: i64,
        #[arg(long)]
        logs_dir: Option<PathBuf>,
    },
    /// Print the provider catalog as JSON.
    Providers,
    /// Structurally check a provider configuration file.
    ValidateConfig { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            hostname,
            port,
            ipc_host,
            ipc_port,
            session_timeout_mins,
            logs_dir,
        } => {
            let logs_dir = logs_dir.unwrap_or_else(default_logs_dir);
            let (_guard, log_info) =
                init_process_logging(ProcessKind::Bridge, &logs_dir, LOG_RETENTION_DAYS)?;
            info!(logs_dir = %log_info.logs_dir, "logging initialized");

            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .with_context(|| format!("invalid listen address {hostname}:{port}"))?;
            let extension_addr: SocketAddr = format!("{ipc_host}:{ipc_port}")
                .parse()
                .with_context(|| format!("invalid IPC address {ipc_host}:{ipc_port}"))?;

            let state = AppState::with_session_timeout(
                extension_addr,
                chrono::Duration::minutes(session_timeout_mins),
            );
            serve(addr, state).await
        }
        Command::Providers => {
            let catalog = ProviderCatalog::new();
            println!(
                "{}",
                serde_json::to_string_pretty(&catalog.list_providers())?
            );
            Ok(())
        }
        Command::ValidateConfig { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: serde_json::Value =
                serde_json::from_str(&raw).context("config file is not valid JSON")?;
            let catalog = ProviderCatalog::new();
            if catalog.validate(&config) {
                println!("ok");
                Ok(())
            } else {
                anyhow::bail!("configuration failed validation");
            }
        }
    }
}

fn default_logs_dir() -> PathBuf {
    let root = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trestle");
    canonical_logs_dir_from_root(&root)
}
