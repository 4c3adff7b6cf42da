//! Pagesync CLI
//!
//! Make REPLICA into a copy of ORIGIN while ORIGIN stays in use.
//!
//! ```text
//! pagesync ORIGIN REPLICA [OPTIONS]
//! ```
//!
//! One of ORIGIN or REPLICA may be of the form `USER@HOST:PATH`, naming a
//! database on a machine reached over ssh. The same binary, started with
//! `--origin` or `--replica`, serves as the peer on the other end; stdout
//! then carries the protocol, so all logging goes to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use pagesync::{
    run_peer, summary_lines, CommandBuilder, Orchestrator, OrchestratorConfig, Role,
    ShellFlavor, NOT_SYNCED,
};

/// Synchronize a live SQLite database into a replica, transferring only
/// the pages that differ.
#[derive(Parser)]
#[command(name = "pagesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database holding the current content: PATH or [USER@]HOST:PATH
    #[arg(value_name = "ORIGIN")]
    origin_db: Option<String>,

    /// Database to bring up to date: PATH or [USER@]HOST:PATH
    #[arg(value_name = "REPLICA")]
    replica_db: Option<String>,

    /// Name of the SSH program used to reach the remote side
    #[arg(long, value_name = "PATH", default_value = "ssh")]
    ssh: String,

    /// Name of the pagesync program on the remote side
    #[arg(long, value_name = "PATH", default_value = "pagesync")]
    exe: String,

    /// Verbose. Repeat for more output
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Check that the remote side can be reached, without touching any
    /// database
    #[arg(long)]
    commcheck: bool,

    /// Append error messages on this side to FILE
    #[arg(long, value_name = "FILE")]
    errorfile: Option<PathBuf>,

    /// Append error messages on the remote side to FILE on that side
    #[arg(long = "remote-errorfile", value_name = "FILE")]
    remote_errorfile: Option<String>,

    /// Copy everything sent to the other side into FILE
    #[arg(long, value_name = "FILE", hide = true)]
    logfile: Option<PathBuf>,

    /// Highest protocol version to use
    #[arg(long, value_name = "N", hide = true, default_value_t = pagesync::PROTOCOL_VERSION)]
    protocol: u8,

    /// Serve as the origin over stdin/stdout
    #[arg(long = "origin", hide = true, conflicts_with = "as_replica")]
    as_origin: bool,

    /// Serve as the replica over stdin/stdout
    #[arg(long = "replica", hide = true)]
    as_replica: bool,

    /// Print the arguments as they would be escaped for the remote shell
    #[arg(long = "arg-escape-check", hide = true)]
    arg_escape_check: bool,
}

impl Cli {
    fn config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            ssh: self.ssh.clone(),
            remote_exe: self.exe.clone(),
            comm_check: self.commcheck,
            error_file: self.errorfile.clone(),
            remote_error_file: self.remote_errorfile.clone(),
            log_file: self.logfile.clone(),
            max_protocol_version: self.protocol,
            ..OrchestratorConfig::default()
        }
    }

    fn endpoints(&self) -> anyhow::Result<(&str, &str)> {
        let Some(origin) = self.origin_db.as_deref() else {
            bail!("missing ORIGIN database filename");
        };
        let Some(replica) = self.replica_db.as_deref() else {
            bail!("missing REPLICA database filename");
        };
        Ok((origin, replica))
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Render this process's own command line through the escaping rules.
fn arg_escape_check() -> anyhow::Result<()> {
    let mut builder = CommandBuilder::new(ShellFlavor::native());
    for arg in std::env::args() {
        builder = if arg == "--arg-escape-check" {
            builder.arg(&arg)?
        } else {
            builder.file_arg(&arg)?
        };
    }
    println!("{}", builder.line());
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    if cli.arg_escape_check {
        arg_escape_check()?;
        return Ok(0);
    }
    let (origin, replica) = cli.endpoints()?;
    let config = cli.config();

    if cli.as_origin || cli.as_replica {
        let role = if cli.as_origin {
            Role::Origin
        } else {
            Role::Replica
        };
        tracing::debug!(?role, origin, replica, "serving as peer");
        let report = run_peer(role, origin, replica, &config)
            .await
            .context("peer session failed")?;
        return Ok(report.exit_code());
    }

    let orchestrator = Orchestrator::new(config);
    let plan = orchestrator.plan(origin, replica)?;
    tracing::info!(topology = ?plan.topology, local = %plan.local_path, "sync planned");
    if cli.verbose >= 2 {
        println!("{}", plan.launch.display);
    }

    let opener = pagesync::store::SqliteOpener::with_config(
        &plan.local_path,
        orchestrator.config().store.clone(),
    );
    let report = orchestrator.run(&plan, &opener).await?;

    if cli.commcheck {
        for message in &report.messages {
            println!("{message}");
        }
    }
    if !report.is_success() {
        println!("{NOT_SYNCED}");
    }
    if cli.verbose >= 1 {
        for line in summary_lines(&report) {
            println!("{line}");
        }
    }
    Ok(report.exit_code())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(1)
        }
    }
}
