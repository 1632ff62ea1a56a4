// src/component/master.rs
use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{ClusterComponent, CA_CERT, CA_KEY, JOIN_PREFIX, MASTER_PREFIX};
use crate::cert::{CertificateAuthority, CertificateConfig, ServiceAccountKeys};
use crate::config::{AgentConfig, BootstrapConfig};
use crate::error::{AgentError, Result};
use crate::storage::{remote_path, FileMapping, SecretStore};
use crate::types::ConfigureRequest;
use crate::utils::run_captured;

pub const SA_KEY: &str = "sa.key";
pub const SA_PUB: &str = "sa.pub";
pub const FRONT_PROXY_CA_CERT: &str = "front-proxy-ca.crt";
pub const FRONT_PROXY_CA_KEY: &str = "front-proxy-ca.key";

pub struct Master;

impl ClusterComponent for Master {
    fn name(&self) -> &'static str {
        "master"
    }

    fn prefix(&self) -> &'static str {
        MASTER_PREFIX
    }

    fn local_dir(&self, config: &AgentConfig) -> PathBuf {
        config.master.cert_dir.clone()
    }

    fn file_mappings(&self, config: &AgentConfig) -> Vec<FileMapping> {
        let master = &config.master;
        vec![
            FileMapping::new(&master.ca_cert_file, CA_CERT),
            FileMapping::new(&master.ca_key_file, CA_KEY),
            FileMapping::new(&master.sa_key_file, SA_KEY),
            FileMapping::new(&master.sa_pub_file, SA_PUB),
            FileMapping::new(&master.proxy_ca_cert_file, FRONT_PROXY_CA_CERT),
            FileMapping::new(&master.proxy_ca_key_file, FRONT_PROXY_CA_KEY),
        ]
    }

    fn generate(&self, config: &AgentConfig) -> Result<BTreeMap<String, Vec<u8>>> {
        let org = &config.cluster.organization;
        let ca = CertificateAuthority::generate(&CertificateConfig::ca("kubernetes", org))?;
        let front_proxy = ca.issue(&CertificateConfig::ca("front-proxy-ca", org))?;

        let sa = ServiceAccountKeys::generate()?;
        sa.verify_keypair()?;

        let mut files = BTreeMap::new();
        files.insert(CA_CERT.to_string(), ca.cert_pem().as_bytes().to_vec());
        files.insert(CA_KEY.to_string(), ca.key_pem().as_bytes().to_vec());
        files.insert(SA_KEY.to_string(), sa.private_pem.into_bytes());
        files.insert(SA_PUB.to_string(), sa.public_pem.into_bytes());
        files.insert(FRONT_PROXY_CA_CERT.to_string(), front_proxy.cert_pem.into_bytes());
        files.insert(FRONT_PROXY_CA_KEY.to_string(), front_proxy.key_pem.into_bytes());
        Ok(files)
    }
}

/// Download the control-plane material, then bootstrap the control plane
/// and publish the join command when configured to.
pub async fn configure(
    store: &SecretStore,
    config: &AgentConfig,
    request: ConfigureRequest,
    cancel: &CancellationToken,
) -> Result<()> {
    super::configure(&Master, store, config, request).await?;

    match &config.master.bootstrap {
        Some(bootstrap) => publish_join_command(store, config, bootstrap, cancel).await,
        None => Ok(()),
    }
}

async fn publish_join_command(
    store: &SecretStore,
    config: &AgentConfig,
    bootstrap: &BootstrapConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let timeout = config.node.attempt_timeout();

    if let Some((program, args)) = bootstrap.init_command.split_first() {
        info!(command = %program, "bootstrapping control plane");
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_captured(program, &args, None, timeout, cancel).await?;
    }

    let (program, args) = bootstrap
        .join_command
        .split_first()
        .ok_or_else(|| AgentError::Config("master.bootstrap.join_command is empty".to_string()))?;
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = run_captured(program, &args, None, timeout, cancel).await?;

    let join_command = output.stdout.trim();
    if join_command.is_empty() {
        return Err(AgentError::SubprocessFailure {
            command: bootstrap.join_command.join(" "),
            code: output.code,
            output: "join command printed nothing".to_string(),
        });
    }

    let script = render_join_script(join_command);
    let path = remote_path(JOIN_PREFIX, &config.node.script_name);
    // a new token supersedes the previous one
    store.upload_bytes_force(&path, script).await?;
    info!(path = %path, "published join command");
    Ok(())
}

fn render_join_script(join_command: &str) -> String {
    format!("#!/bin/sh\nset -e\n{}\n", join_command)
}
