// src/component/mod.rs
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::cert::CertificateAuthority;
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::storage::{remote_path, FileMapping, SecretStore};
use crate::types::ConfigureRequest;

pub mod etcd;
pub mod master;
pub mod node;
pub mod openvpn;
pub mod openvpn_client;

pub use etcd::Etcd;
pub use master::Master;
pub use node::JoinRetryDriver;
pub use openvpn::OpenVpn;
pub use openvpn_client::ClientCredentialManager;

pub const ETCD_PREFIX: &str = "pki/etcd";
pub const MASTER_PREFIX: &str = "pki/master";
pub const OPENVPN_PREFIX: &str = "pki/vpn";
pub const OPENVPN_CLIENT_PREFIX: &str = "pki/vpn-client";
pub const OPENVPN_CLIENT_REVOKED_PREFIX: &str = "pki/vpn-client/revoked";
pub const JOIN_PREFIX: &str = "join";

pub const CA_CERT: &str = "ca.crt";
pub const CA_KEY: &str = "ca.key";
pub const CA_CRL: &str = "ca.crl";
pub const CA_CRL_STAGED: &str = "ca.crl.next";

/// A cluster component whose secrets live under one storage prefix.
pub trait ClusterComponent {
    fn name(&self) -> &'static str;

    fn prefix(&self) -> &'static str;

    /// Where `configure` puts the files on this host.
    fn local_dir(&self, config: &AgentConfig) -> PathBuf;

    /// Local file name to remote object name, for every file the
    /// component owns.
    fn file_mappings(&self, config: &AgentConfig) -> Vec<FileMapping>;

    /// Fresh material keyed by remote object name.
    fn generate(&self, config: &AgentConfig) -> Result<BTreeMap<String, Vec<u8>>>;
}

/// Refuse when the component already has a CA in the bucket.
pub async fn ensure_uninitialized(store: &SecretStore, prefix: &str) -> Result<()> {
    let ca_path = remote_path(prefix, CA_CERT);
    if store.exists(&ca_path).await? {
        return Err(AgentError::AlreadyExists(ca_path));
    }
    Ok(())
}

/// Fetch and parse the CA stored under `prefix`.
pub async fn load_ca(store: &SecretStore, prefix: &str) -> Result<CertificateAuthority> {
    let files = store
        .download_files_to_memory(&[CA_CERT, CA_KEY], prefix)
        .await?;
    let cert = pem_text(&files, CA_CERT)?;
    let key = pem_text(&files, CA_KEY)?;
    CertificateAuthority::from_pem(&cert, &key)
}

fn pem_text(files: &BTreeMap<String, Vec<u8>>, name: &str) -> Result<String> {
    let bytes = files
        .get(name)
        .ok_or_else(|| AgentError::NotFound(name.to_string()))?;
    String::from_utf8(bytes.clone()).map_err(|e| AgentError::crypto(name, e))
}

/// Generate the component's material and upload it, never replacing
/// anything already stored.
pub async fn init(
    component: &dyn ClusterComponent,
    store: &SecretStore,
    config: &AgentConfig,
) -> Result<()> {
    info!(component = component.name(), prefix = component.prefix(), "initializing");
    ensure_uninitialized(store, component.prefix()).await?;

    let files = component.generate(config)?;
    store
        .upload_files_from_memory(&files, component.prefix())
        .await?;

    info!(
        component = component.name(),
        files = files.len(),
        "component initialized"
    );
    Ok(())
}

/// Upload operator-provided material from `dir` instead of generating it.
pub async fn init_from_directory(
    component: &dyn ClusterComponent,
    store: &SecretStore,
    config: &AgentConfig,
    dir: &Path,
) -> Result<()> {
    info!(
        component = component.name(),
        dir = %dir.display(),
        "initializing from existing files"
    );
    ensure_uninitialized(store, component.prefix()).await?;
    store
        .upload_files_from_directory(&component.file_mappings(config), dir, component.prefix())
        .await
}

/// Download the component's material into its local directory.
pub async fn configure(
    component: &dyn ClusterComponent,
    store: &SecretStore,
    config: &AgentConfig,
    request: ConfigureRequest,
) -> Result<()> {
    let dir = component.local_dir(config);
    info!(
        component = component.name(),
        dir = %dir.display(),
        overwrite = request.overwrite,
        "configuring"
    );
    store
        .download_files_to_directory(
            &component.file_mappings(config),
            &dir,
            component.prefix(),
            request.overwrite,
        )
        .await
}
