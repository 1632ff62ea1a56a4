// src/main.rs
mod cert;
mod component;
mod config;
mod error;
mod storage;
mod types;
mod utils;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use component::openvpn_client::render_listing;
use component::{ClientCredentialManager, ClusterComponent, Etcd, JoinRetryDriver, Master, OpenVpn};
use config::{resolve_config_path, AgentConfig};
use error::{AgentError, Result};
use storage::SecretStore;
use types::{ClientAction, ClientRequest, ConfigureRequest, OutputFormat};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Creates cluster certificate authorities and distributes them through object storage",
    long_about = None
)]
pub struct Args {
    /// Configuration file (default: ./pki-agent.yml)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Also append logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a component's CA material and upload it
    Init {
        #[command(subcommand)]
        target: InitTarget,
    },
    /// Download a component's material onto this host
    Configure {
        #[command(subcommand)]
        target: ConfigureTarget,
    },
    /// Print the effective configuration with credentials masked
    ParsedConfig,
    /// Print the version
    Version,
}

#[derive(Subcommand, Debug)]
pub enum InitTarget {
    Etcd(InitArgs),
    Master(InitArgs),
    Openvpn(InitArgs),
}

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Upload existing files from this directory instead of generating them
    #[arg(long)]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigureTarget {
    Etcd(ConfigureArgs),
    Master(ConfigureArgs),
    Openvpn(ConfigureArgs),
    /// Join this node to the cluster
    Node(ConfigureArgs),
    /// Issue, revoke or list VPN client certificates
    OpenvpnClient(ClientArgs),
}

#[derive(clap::Args, Debug)]
pub struct ConfigureArgs {
    /// Replace local files that already exist
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(clap::Args, Debug)]
pub struct ClientArgs {
    #[arg(long)]
    pub client_name: Option<String>,

    #[arg(long, conflicts_with = "list")]
    pub revoke: bool,

    #[arg(long)]
    pub list: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    /// Write the profile or listing here instead of stdout
    #[arg(long)]
    pub output_file: Option<PathBuf>,
}

impl ClientArgs {
    fn request(&self) -> Result<ClientRequest> {
        let action = if self.list {
            ClientAction::List
        } else if self.revoke {
            ClientAction::Revoke
        } else {
            ClientAction::Create
        };
        if action != ClientAction::List && self.client_name.is_none() {
            return Err(AgentError::Config("--client-name is required".to_string()));
        }
        Ok(ClientRequest {
            name: self.client_name.clone(),
            action,
            output: self.output,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = utils::logging::init(args.debug, args.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match run(args, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, cancel: CancellationToken) -> Result<()> {
    if let Command::Version = args.command {
        println!("pki-agent {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let path = resolve_config_path(args.config.as_deref());
    info!(path = %path.display(), "loading configuration");
    let config = AgentConfig::load_from_file(&path)?;
    config.validate()?;

    if let Command::ParsedConfig = args.command {
        println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        return Ok(());
    }

    let store = SecretStore::connect(&config.storage, cancel.clone()).await?;

    let result = dispatch(args.command, &store, &config, &cancel).await;
    store.close();
    result
}

async fn dispatch(
    command: Command,
    store: &SecretStore,
    config: &AgentConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    match command {
        Command::Init { target } => {
            let (selected, init_args): (&dyn ClusterComponent, InitArgs) = match target {
                InitTarget::Etcd(a) => (&Etcd as &dyn ClusterComponent, a),
                InitTarget::Master(a) => (&Master as &dyn ClusterComponent, a),
                InitTarget::Openvpn(a) => (&OpenVpn as &dyn ClusterComponent, a),
            };
            match init_args.directory {
                Some(dir) => {
                    let dir = utils::expand_path(&dir.to_string_lossy());
                    component::init_from_directory(selected, store, config, &dir).await
                }
                None => component::init(selected, store, config).await,
            }
        }

        Command::Configure { target } => match target {
            ConfigureTarget::Etcd(a) => {
                component::configure(&Etcd, store, config, configure_request(&a)).await
            }
            ConfigureTarget::Openvpn(a) => {
                component::configure(&OpenVpn, store, config, configure_request(&a)).await
            }
            ConfigureTarget::Master(a) => {
                component::master::configure(store, config, configure_request(&a), cancel).await
            }
            ConfigureTarget::Node(a) => {
                let mut driver = JoinRetryDriver::new(store, &config.node, cancel.clone());
                let outcome = driver.configure(configure_request(&a)).await?;
                info!(
                    attempts = outcome.attempts,
                    elapsed = ?outcome.elapsed,
                    state = ?driver.state(),
                    "join finished"
                );
                println!("{}", outcome.output.trim_end());
                Ok(())
            }
            ConfigureTarget::OpenvpnClient(a) => {
                let request = a.request()?;
                run_client(store, config, request, a.output_file.as_deref()).await
            }
        },

        Command::ParsedConfig | Command::Version => Ok(()),
    }
}

fn configure_request(args: &ConfigureArgs) -> ConfigureRequest {
    ConfigureRequest {
        overwrite: args.overwrite,
    }
}

async fn run_client(
    store: &SecretStore,
    config: &AgentConfig,
    request: ClientRequest,
    output_file: Option<&Path>,
) -> Result<()> {
    let manager = ClientCredentialManager::new(store, config);
    let name = request.name.as_deref().unwrap_or_default();

    match request.action {
        ClientAction::Create => {
            let bundle = manager.create_user(name).await?;
            let issued = &bundle.certificate;
            info!(
                user = %issued.common_name,
                serial = %hex::encode(&issued.serial),
                not_before = %issued.not_before,
                not_after = %issued.not_after,
                "client certificate issued"
            );
            emit(&bundle.profile, output_file)
        }
        ClientAction::Revoke => {
            let outcome = manager.revoke_user(name).await?;
            let verb = if outcome.newly_revoked {
                "revoked"
            } else {
                "already revoked"
            };
            println!(
                "{} {} (serial {}) at {}",
                outcome.user,
                verb,
                hex::encode(&outcome.serial),
                outcome.revoked_at.to_rfc3339()
            );
            Ok(())
        }
        ClientAction::List => {
            let entries = manager.list_user_certificates().await?;
            emit(&render_listing(&entries, request.output)?, output_file)
        }
    }
}

/// Write to `path` (new file, owner-only) or stdout.
fn emit(text: &str, path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        print!("{}", text);
        if !text.ends_with('\n') {
            println!();
        }
        return Ok(());
    };

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            AgentError::LocalFileExists(path.to_path_buf())
        } else {
            AgentError::local_file(path, e)
        }
    })?;
    file.write_all(text.as_bytes())
        .map_err(|e| AgentError::local_file(path, e))?;
    info!(path = %path.display(), "wrote output file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_subcommand() {
        let args = Args::try_parse_from([
            "pki-agent",
            "configure",
            "openvpn-client",
            "--client-name",
            "alice",
            "--revoke",
        ])
        .unwrap();
        match args.command {
            Command::Configure {
                target: ConfigureTarget::OpenvpnClient(client),
            } => {
                let request = client.request().unwrap();
                assert_eq!(request.action, ClientAction::Revoke);
                assert_eq!(request.name.as_deref(), Some("alice"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn revoke_and_list_conflict() {
        assert!(Args::try_parse_from([
            "pki-agent",
            "configure",
            "openvpn-client",
            "--revoke",
            "--list",
        ])
        .is_err());
    }

    #[test]
    fn create_requires_a_name() {
        let args =
            Args::try_parse_from(["pki-agent", "configure", "openvpn-client"]).unwrap();
        match args.command {
            Command::Configure {
                target: ConfigureTarget::OpenvpnClient(client),
            } => assert!(matches!(client.request(), Err(AgentError::Config(_)))),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_init_with_directory_and_global_flags() {
        let args = Args::try_parse_from([
            "pki-agent",
            "--debug",
            "--config",
            "/etc/pki-agent.yml",
            "init",
            "openvpn",
            "--directory",
            "/srv/pki",
        ])
        .unwrap();
        assert!(args.debug);
        assert_eq!(args.config.as_deref(), Some("/etc/pki-agent.yml"));
        match args.command {
            Command::Init {
                target: InitTarget::Openvpn(a),
            } => assert_eq!(a.directory, Some(PathBuf::from("/srv/pki"))),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn output_file_is_never_clobbered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice.ovpn");
        emit("profile", Some(&path)).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "profile");
        let err = emit("other", Some(&path)).unwrap_err();
        assert!(matches!(err, AgentError::LocalFileExists(_)));
    }
}
