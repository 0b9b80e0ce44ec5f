//! remex: command-line client for the remex daemon.

#![deny(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use clap::{Parser, Subcommand};
use uuid::Uuid;

use gateway::client::{CallOptions, Client};
use gateway::tls;
use remex_core::process::{OutputStream, ProcessInfo};

#[derive(Parser, Debug)]
#[command(name = "remex", about = "Remote process execution client")]
struct Cli {
    /// CA certificate the server certificate must chain to (PEM).
    #[arg(long)]
    ca_cert: PathBuf,
    /// Client certificate (PEM); its subject CN is the caller identity.
    #[arg(long)]
    cert: PathBuf,
    /// Client private key (PEM).
    #[arg(long)]
    key: PathBuf,
    /// Server url.
    #[arg(long, default_value = "https://localhost:8443")]
    server: String,
    /// Domain name the server certificate is verified under.
    #[arg(long, default_value = "localhost")]
    domain: String,
    /// Per-call deadline in seconds.
    #[arg(long)]
    deadline: Option<u64>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Spawn an executable on the server; prints the process id.
    Exec {
        /// Executable to run.
        path: String,
        /// Arguments passed to the executable.
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Send a POSIX signal to a process.
    Kill {
        /// Process id.
        id: Uuid,
        /// Signal number; defaults to SIGTERM.
        #[arg(default_value_t = 15)]
        signal: i32,
    },
    /// List all processes, newest first.
    Ps,
    /// Show one process.
    Get {
        /// Process id.
        id: Uuid,
    },
    /// Print a captured output stream (stdout or stderr).
    Read {
        /// Process id.
        id: Uuid,
        /// Which stream to read.
        target: OutputStream,
    },
}

#[tokio::main]
async fn main() {
    telemetry::init_plain_logging();
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let tls_config = tls::client_tls_config(&cli.ca_cert, &cli.cert, &cli.key, &cli.domain)?;
    let mut client = Client::connect(cli.server, tls_config).await?;
    let opts = CallOptions { deadline: cli.deadline.map(Duration::from_secs) };

    match cli.cmd {
        Command::Exec { path, args } => {
            let id = client.exec(opts, &path, &args).await?;
            println!("{id}");
        }
        Command::Kill { id, signal } => client.kill(opts, id, signal).await?,
        Command::Ps => print_listing(&client.list_process_info(opts).await?),
        Command::Get { id } => print_info(&client.get_process_info(opts, id).await?),
        Command::Read { id, target } => {
            let content = client.read(opts, id, target).await?;
            std::io::stdout().write_all(&content)?;
        }
    }
    Ok(())
}

fn print_listing(infos: &[ProcessInfo]) {
    println!("{:<36}  {:>7}  {:<7}  {:>4}  COMMAND", "ID", "PID", "RUNNING", "EXIT");
    for info in infos {
        println!(
            "{:<36}  {:>7}  {:<7}  {:>4}  {}",
            info.id,
            info.pid,
            info.running,
            info.exit_code,
            command_line(info)
        );
    }
}

fn print_info(info: &ProcessInfo) {
    println!("id:        {}", info.id);
    println!("owner:     {}", info.owner_id);
    println!("pid:       {}", info.pid);
    println!("command:   {}", command_line(info));
    println!("running:   {}", info.running);
    println!("exit code: {}", info.exit_code);
    println!("create:    {}", format_instant(info.create));
    println!("exit:      {}", format_instant(info.exit));
}

fn command_line(info: &ProcessInfo) -> String {
    if info.args.is_empty() {
        info.path.clone()
    } else {
        format!("{} {}", info.path, info.args.join(" "))
    }
}

// Seconds.nanos since the UNIX epoch; "-" for the zero instant.
fn format_instant(instant: SystemTime) -> String {
    match instant.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(since) if !since.is_zero() => {
            format!("{}.{:09}", since.as_secs(), since.subsec_nanos())
        }
        _ => "-".to_string(),
    }
}
