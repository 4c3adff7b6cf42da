//! The Orchestrator: decides who plays which role and connects the two.
//!
//! One process always runs locally with the user's arguments. It starts the
//! peer, either over ssh when one endpoint is remote or as a second copy of
//! this executable when both are local, and runs its own role against the
//! peer's standard input and output.
//!
//! ```text
//! ORIGIN          REPLICA          local role   peer
//! ------------    -------------    ----------   -----------------------------
//! path            path             origin       exe --replica ORIGIN REPLICA
//! path            host:path        origin       ssh host exe --replica ...
//! host:path       path             replica      ssh host exe --origin ...
//! host:path       host:path        (usage error)
//! ```

use std::fs::File;
use std::path::PathBuf;

use pagesync_store::{OpenStore, SqliteOpener, SqliteStoreConfig};
use pagesync_sync::{
    Launch, PeerInvocation, ProcessSpawner, Role, Session, Spawner, SyncConfig, SyncReport,
    PROTOCOL_VERSION,
};

use crate::endpoint::Endpoint;
use crate::error::{PagesyncError, Result};
use crate::shell::{CommandBuilder, ShellFlavor};

/// Configuration for the Orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Program used to reach remote hosts.
    pub ssh: String,
    /// Name of this executable on remote hosts.
    pub remote_exe: String,
    /// This executable, for local-to-local syncs. `None` uses the running
    /// binary.
    pub local_exe: Option<PathBuf>,
    /// Quoting rules of the remote shell.
    pub remote_shell: ShellFlavor,
    /// Only check that the peer can be reached.
    pub comm_check: bool,
    /// Errors on this side are appended here.
    pub error_file: Option<PathBuf>,
    /// Passed to the peer as its error file.
    pub remote_error_file: Option<String>,
    /// Everything this side sends is copied here.
    pub log_file: Option<PathBuf>,
    /// Highest protocol version to use.
    pub max_protocol_version: u8,
    /// Store settings for the local database.
    pub store: SqliteStoreConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ssh: "ssh".to_string(),
            remote_exe: "pagesync".to_string(),
            local_exe: None,
            remote_shell: ShellFlavor::native(),
            comm_check: false,
            error_file: None,
            remote_error_file: None,
            log_file: None,
            max_protocol_version: PROTOCOL_VERSION,
            store: SqliteStoreConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Session settings for either side.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_protocol_version: self.max_protocol_version,
            comm_check: self.comm_check,
            error_file: self.error_file.clone(),
        }
    }
}

/// Where the two databases live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// Both files are on this machine.
    Local,
    /// The origin is reached over ssh.
    RemoteOrigin { host: String },
    /// The replica is reached over ssh.
    RemoteReplica { host: String },
}

/// A decided session: the local side's role and how to start the peer.
#[derive(Debug, Clone)]
pub struct Plan {
    pub topology: Topology,
    /// Role of this process.
    pub local_role: Role,
    /// Database this process opens.
    pub local_path: String,
    /// Origin name as given by the user.
    pub origin: String,
    /// Replica name as given by the user.
    pub replica: String,
    /// How to start the peer.
    pub launch: Launch,
}

/// Decide the topology for `origin` and `replica` and build the peer's
/// command line.
pub fn plan(origin: &str, replica: &str, config: &OrchestratorConfig) -> Result<Plan> {
    if origin.is_empty() || replica.is_empty() {
        return Err(PagesyncError::Usage(
            "both ORIGIN and REPLICA must be given".into(),
        ));
    }
    let origin_ep = Endpoint::parse(origin);
    let replica_ep = Endpoint::parse(replica);

    match (&origin_ep, &replica_ep) {
        (Endpoint::Remote { .. }, Endpoint::Remote { .. }) => Err(PagesyncError::BothRemote),
        (Endpoint::Remote { host, path }, Endpoint::Local(local)) => {
            let invocation = PeerInvocation {
                role: Role::Origin,
                origin: path.clone(),
                replica: replica_ep.file_tail().to_string(),
                comm_check: config.comm_check,
                error_file: config.remote_error_file.clone(),
            };
            Ok(Plan {
                topology: Topology::RemoteOrigin { host: host.clone() },
                local_role: Role::Replica,
                local_path: local.clone(),
                origin: origin.to_string(),
                replica: replica.to_string(),
                launch: remote_launch(host, invocation, config)?,
            })
        }
        (Endpoint::Local(local), Endpoint::Remote { host, path }) => {
            let invocation = PeerInvocation {
                role: Role::Replica,
                origin: origin_ep.file_tail().to_string(),
                replica: path.clone(),
                comm_check: config.comm_check,
                error_file: config.remote_error_file.clone(),
            };
            Ok(Plan {
                topology: Topology::RemoteReplica { host: host.clone() },
                local_role: Role::Origin,
                local_path: local.clone(),
                origin: origin.to_string(),
                replica: replica.to_string(),
                launch: remote_launch(host, invocation, config)?,
            })
        }
        (Endpoint::Local(local), Endpoint::Local(_)) => {
            let invocation = PeerInvocation {
                role: Role::Replica,
                origin: origin.to_string(),
                replica: replica.to_string(),
                comm_check: config.comm_check,
                error_file: config.remote_error_file.clone(),
            };
            Ok(Plan {
                topology: Topology::Local,
                local_role: Role::Origin,
                local_path: local.clone(),
                origin: origin.to_string(),
                replica: replica.to_string(),
                launch: local_launch(invocation, config)?,
            })
        }
    }
}

/// Append the peer's own arguments: role flag, options, both endpoints.
fn peer_args(builder: CommandBuilder, invocation: &PeerInvocation) -> Result<CommandBuilder> {
    let mut builder = builder.arg(match invocation.role {
        Role::Origin => "--origin",
        Role::Replica => "--replica",
    })?;
    if invocation.comm_check {
        builder = builder.arg("--commcheck")?;
    }
    if let Some(file) = &invocation.error_file {
        builder = builder.arg("--errorfile")?.file_arg(file)?;
    }
    builder
        .file_arg(&invocation.origin)?
        .file_arg(&invocation.replica)
}

fn remote_launch(
    host: &str,
    invocation: PeerInvocation,
    config: &OrchestratorConfig,
) -> Result<Launch> {
    if host.is_empty() || host.starts_with('-') {
        return Err(PagesyncError::Usage(format!("invalid host name {host:?}")));
    }
    let remote = CommandBuilder::new(config.remote_shell).file_arg(&config.remote_exe)?;
    let (remote_line, _) = peer_args(remote, &invocation)?.into_parts();

    let display = CommandBuilder::new(ShellFlavor::native())
        .file_arg(&config.ssh)?
        .arg("-e")?
        .arg("none")?
        .arg(host)?;
    Ok(Launch {
        program: config.ssh.clone(),
        args: vec![
            "-e".to_string(),
            "none".to_string(),
            host.to_string(),
            remote_line.clone(),
        ],
        display: format!("{} {}", display.line(), remote_line),
        invocation,
    })
}

fn local_launch(invocation: PeerInvocation, config: &OrchestratorConfig) -> Result<Launch> {
    let exe = match &config.local_exe {
        Some(path) => path.clone(),
        None => std::env::current_exe()?,
    };
    let exe = exe.to_string_lossy().into_owned();
    let builder = CommandBuilder::new(ShellFlavor::native()).file_arg(&exe)?;
    let (display, mut words) = peer_args(builder, &invocation)?.into_parts();
    words.remove(0);
    Ok(Launch {
        program: exe,
        args: words,
        display,
        invocation,
    })
}

/// Runs the local side of a sync against a spawned peer.
pub struct Orchestrator<S: Spawner = ProcessSpawner> {
    spawner: S,
    config: OrchestratorConfig,
}

impl Orchestrator<ProcessSpawner> {
    /// An orchestrator that starts real child processes.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_spawner(ProcessSpawner, config)
    }
}

impl<S: Spawner> Orchestrator<S> {
    /// An orchestrator that starts peers with `spawner`.
    pub fn with_spawner(spawner: S, config: OrchestratorConfig) -> Self {
        Self { spawner, config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Decide the session for `origin` and `replica`.
    pub fn plan(&self, origin: &str, replica: &str) -> Result<Plan> {
        plan(origin, replica, &self.config)
    }

    /// Plan and run a sync of the SQLite databases at `origin` and
    /// `replica`.
    pub async fn sync(&self, origin: &str, replica: &str) -> Result<SyncReport> {
        let plan = self.plan(origin, replica)?;
        let opener = SqliteOpener::with_config(&plan.local_path, self.config.store.clone());
        self.run(&plan, &opener).await
    }

    /// Start the peer described by `plan` and run the local role against
    /// the database opened by `opener`.
    ///
    /// Fails only if the peer cannot be started or the traffic log cannot
    /// be created; everything after that is counted in the report.
    pub async fn run<O: OpenStore>(&self, plan: &Plan, opener: &O) -> Result<SyncReport> {
        let mirror = match &self.config.log_file {
            Some(path) => Some(File::create(path)?),
            None => None,
        };
        tracing::debug!(command = %plan.launch.display, "starting peer");
        let channel = self.spawner.spawn(&plan.launch).await?;

        let mut session = Session::new(
            plan.local_role,
            channel.reader,
            channel.writer,
            self.config.sync_config(),
        )
        .with_names(&plan.origin, &plan.replica);
        if let Some(file) = mirror {
            session = session.with_mirror(Box::new(file));
        }
        let mut report = session.run(opener).await;

        let mut process = channel.process;
        match process.wait().await {
            Ok(Some(0)) => {}
            Ok(status) => {
                tracing::debug!(?status, "peer exited");
                // A peer that never answered cannot have reported why.
                if report.bytes_received == 0 {
                    let text = match status {
                        Some(code) => format!("peer exited with status {code} before responding"),
                        None => "peer was terminated before responding".to_string(),
                    };
                    tracing::error!("{}", text);
                    report.errors += 1;
                    report.messages.push(format!("ERROR: {text}"));
                }
            }
            Err(err) => tracing::warn!(error = %err, "cannot wait for peer"),
        }
        Ok(report)
    }
}

/// Run as a spawned peer: play `role` over this process's standard input
/// and output.
pub async fn run_peer(
    role: Role,
    origin: &str,
    replica: &str,
    config: &OrchestratorConfig,
) -> Result<SyncReport> {
    let path = match role {
        Role::Origin => origin,
        Role::Replica => replica,
    };
    let opener = SqliteOpener::with_config(path, config.store.clone());
    let mut session = Session::new(
        role,
        tokio::io::stdin(),
        tokio::io::stdout(),
        config.sync_config(),
    )
    .remote(true)
    .with_names(origin, replica);
    if let Some(path) = &config.log_file {
        session = session.with_mirror(Box::new(File::create(path)?));
    }
    Ok(session.run(&opener).await)
}
