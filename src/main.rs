//! td-mcp - serve the tool endpoint over stdio or Streamable HTTP
//!
//! Configuration sources, later ones win:
//!
//! 1. `type = "stdio"`
//! 2. TOML file given with `--config`
//! 3. `TD_MCP_*` environment variables, `__` separating nested keys
//!    (`TD_MCP_SESSION__TTL_MILLIS=60000`)
//! 4. command line flags
//!
//! | Exit code | Meaning               |
//! |-----------|-----------------------|
//! | 0         | clean shutdown        |
//! | 1         | runtime failure       |
//! | 2         | invalid configuration |
//! | 3         | could not bind        |

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::RpcModule;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use td_mcp_transport::{validate, RpcModuleEngine, TransportError, TransportFactory};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const EXIT_RUNTIME: u8 = 1;
const EXIT_INVALID_CONFIG: u8 = 2;
const EXIT_BIND: u8 = 3;
const PROTOCOL_VERSION: &str = "2025-03-26";

#[derive(Parser, Debug)]
#[command(name = "td-mcp")]
#[command(about = "Tool endpoint over stdio or Streamable HTTP")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Force the stdio transport
    #[arg(long, conflicts_with_all = ["host", "port"])]
    stdio: bool,

    /// Bind address for Streamable HTTP (implies the HTTP transport)
    #[arg(long)]
    host: Option<String>,

    /// Port for Streamable HTTP (implies the HTTP transport)
    #[arg(short, long)]
    port: Option<u16>,
}

fn load_config(cli: &Cli) -> anyhow::Result<Value> {
    let mut figment = Figment::from(Serialized::default("type", "stdio"));

    if let Some(path) = &cli.config {
        anyhow::ensure!(path.exists(), "config file {} does not exist", path.display());
        figment = figment.merge(Toml::file(path));
    }
    figment = figment.merge(Env::prefixed("TD_MCP_").split("__").ignore(&["log"]));

    if cli.stdio {
        figment = figment.merge(("type", "stdio"));
    }
    if cli.host.is_some() || cli.port.is_some() {
        figment = figment.merge(("type", "streamable-http"));
    }
    if let Some(host) = &cli.host {
        figment = figment.merge(("host", host));
    }
    if let Some(port) = cli.port {
        figment = figment.merge(("port", port));
    }

    figment
        .extract::<Value>()
        .context("Failed to read configuration")
}

/// Minimal method table so the binary is usable without an external engine
fn builtin_module() -> anyhow::Result<RpcModule<()>> {
    let mut module = RpcModule::new(());

    module.register_method("initialize", |_, _, _| {
        Ok::<_, ErrorObjectOwned>(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        }))
    })?;
    module.register_method("ping", |_, _, _| Ok::<_, ErrorObjectOwned>(json!({})))?;
    module.register_method("tools/list", |_, _, _| {
        Ok::<_, ErrorObjectOwned>(json!({ "tools": [] }))
    })?;

    Ok(module)
}

fn exit_code(error: &TransportError) -> u8 {
    match error {
        TransportError::Config(_) => EXIT_INVALID_CONFIG,
        TransportError::Bind(_) => EXIT_BIND,
        TransportError::Io(_) => EXIT_RUNTIME,
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries protocol traffic in stdio mode
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("TD_MCP_LOG")
                .unwrap_or_else(|_| EnvFilter::new("td_mcp_transport=info,td_mcp=info")),
        )
        .init();

    let cli = Cli::parse();

    let raw = match load_config(&cli) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::error!("{:#}", e);
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
    };
    let config = match validate(&raw) {
        Ok(config) => config,
        Err(errors) => {
            tracing::error!("{}", errors);
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
    };

    let engine = match builtin_module() {
        Ok(module) => Arc::new(RpcModuleEngine::new(module)),
        Err(e) => {
            tracing::error!("Failed to build method table: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let transport = match TransportFactory::build(config, engine).await {
        Ok(transport) => transport,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::from(exit_code(&e));
        }
    };

    match transport.run_until(shutdown_signal(), DRAIN_TIMEOUT).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Transport failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
