//! Pod network conformance checker
//!
//! Exits non-zero when any check reports an error.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use pod_network_conformance::{run_checks, ClusterState};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(version, about = "Check a cluster against the pod network attachment contract")]
struct Args {
    /// Read a recorded multi-document YAML dump instead of a live cluster
    #[arg(long, env = "CONFORMANCE_RECORDED")]
    recorded: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, default_value = "text")]
    output: OutputFormat,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let Args { recorded, output } = Args::parse();

    let state = match recorded {
        Some(path) => {
            info!(path = %path.display(), "Reading recorded state");
            let input = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            ClusterState::from_yaml(&input)?
        }
        None => {
            if rustls::crypto::ring::default_provider().install_default().is_err() {
                info!("rustls crypto provider already installed");
            }
            let client = kube::Client::try_default().await.context("connecting to the cluster")?;
            ClusterState::from_cluster(client).await?
        }
    };

    let report = run_checks(&state);
    match output {
        OutputFormat::Text => println!("{report}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(if report.has_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
