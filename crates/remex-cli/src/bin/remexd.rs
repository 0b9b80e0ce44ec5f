//! remexd: the remex process-execution daemon.

#![deny(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tonic::transport::Server;
use tracing::info;

use gateway::{methods, tls, ExecutorService};
use policy::{AccessRule, Policy};
use supervisor::Supervisor;

#[derive(Parser, Debug)]
#[command(name = "remexd", about = "Remote process execution daemon")]
struct Cli {
    /// CA certificate that client certificates must chain to (PEM).
    #[arg(long)]
    ca_cert: PathBuf,
    /// Server certificate (PEM).
    #[arg(long)]
    cert: PathBuf,
    /// Server private key (PEM).
    #[arg(long)]
    key: PathBuf,
    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:8443")]
    listen: SocketAddr,
    /// Root directory for captured process output. Defaults to
    /// remexd under the system temp directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Access rule as JSON, e.g.
    /// '{"Principal":"alice","Action":"*","Effect":"allow"}'.
    /// Repeatable; evaluated in order, any applying deny wins.
    #[arg(long = "rule")]
    rules: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_json_logging();
    let cli = Cli::parse();

    let policy = Policy::chain(parse_rules(&cli.rules)?);
    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let supervisor = Arc::new(Supervisor::new(&data_dir));
    let svc = ExecutorService::new(supervisor, policy).into_server();
    let tls_config =
        tls::server_tls_config(&cli.ca_cert, &cli.cert, &cli.key).context("loading tls material")?;

    info!(addr = %cli.listen, data_dir = %data_dir.display(), "serving");
    Server::builder().tls_config(tls_config)?.add_service(svc).serve(cli.listen).await?;
    Ok(())
}

fn parse_rules(raw: &[String]) -> anyhow::Result<Vec<AccessRule>> {
    raw.iter()
        .map(|rule| {
            AccessRule::from_json_checked(rule, &methods::ALL)
                .with_context(|| format!("invalid --rule {rule:?}"))
        })
        .collect()
}

fn default_data_dir() -> PathBuf {
    std::env::temp_dir().join("remexd")
}
