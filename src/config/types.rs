// config/types.rs
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::component::openvpn_client::ReissuePolicy;
use crate::error::{AgentError, Result};
use crate::storage::StorageConfig;
use crate::utils::{expand_path, BackoffConfig};

/// Whole agent configuration, one YAML document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub etcd: EtcdConfig,
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub openvpn: OpenVpnConfig,
    #[serde(default)]
    pub openvpn_client: OpenVpnClientConfig,
    #[serde(default)]
    pub node: NodeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Organization written into every subject
    pub organization: String,
    pub server_validity_days: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            organization: "pki-agent".to_string(),
            server_validity_days: 3650,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    pub cert_dir: PathBuf,
    pub ca_cert_file: String,
    pub ca_key_file: String,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            cert_dir: PathBuf::from("/etc/etcd/pki"),
            ca_cert_file: "ca.crt".to_string(),
            ca_key_file: "ca.key".to_string(),
        }
    }
}

/// Commands run by `configure master` after the certificates are in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BootstrapConfig {
    /// Brings up the control plane, e.g. `kubeadm init --config ...`
    #[serde(default)]
    pub init_command: Vec<String>,
    /// Prints the command nodes run to join
    pub join_command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub cert_dir: PathBuf,
    pub ca_cert_file: String,
    pub ca_key_file: String,
    pub sa_key_file: String,
    pub sa_pub_file: String,
    pub proxy_ca_cert_file: String,
    pub proxy_ca_key_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapConfig>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            cert_dir: PathBuf::from("/etc/kubernetes/pki"),
            ca_cert_file: "ca.crt".to_string(),
            ca_key_file: "ca.key".to_string(),
            sa_key_file: "sa.key".to_string(),
            sa_pub_file: "sa.pub".to_string(),
            proxy_ca_cert_file: "front-proxy-ca.crt".to_string(),
            proxy_ca_key_file: "front-proxy-ca.key".to_string(),
            bootstrap: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenVpnConfig {
    pub cert_dir: PathBuf,
    pub ca_cert_file: String,
    pub ca_key_file: String,
    pub server_cert_file: String,
    pub server_key_file: String,
    pub crl_file: String,
    pub ta_key_file: String,
    pub server_common_name: String,
}

impl Default for OpenVpnConfig {
    fn default() -> Self {
        Self {
            cert_dir: PathBuf::from("/etc/openvpn/pki"),
            ca_cert_file: "ca.crt".to_string(),
            ca_key_file: "ca.key".to_string(),
            server_cert_file: "server.crt".to_string(),
            server_key_file: "server.key".to_string(),
            crl_file: "ca.crl".to_string(),
            ta_key_file: "ta.key".to_string(),
            server_common_name: "server".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenVpnClientConfig {
    /// Gateways written as `remote` lines into client profiles
    pub servers: Vec<String>,
    pub client_validity_days: u32,
    pub reissue_policy: ReissuePolicy,
}

impl Default for OpenVpnClientConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            client_validity_days: 3650,
            reissue_policy: ReissuePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub join_dir: PathBuf,
    pub script_name: String,
    /// Falls back to the host name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    pub node_name_flag: String,
    pub shell: String,
    pub attempt_timeout_secs: u64,
    pub backoff: BackoffConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            join_dir: PathBuf::from("/var/lib/pki-agent/join"),
            script_name: "join.sh".to_string(),
            node_name: None,
            node_name_flag: "--node-name".to_string(),
            shell: "sh".to_string(),
            attempt_timeout_secs: 300,
            backoff: BackoffConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

impl AgentConfig {
    /// Defaults for every section around the given storage.
    pub fn with_storage(storage: StorageConfig) -> Self {
        Self {
            storage,
            cluster: ClusterConfig::default(),
            etcd: EtcdConfig::default(),
            master: MasterConfig::default(),
            openvpn: OpenVpnConfig::default(),
            openvpn_client: OpenVpnClientConfig::default(),
            node: NodeConfig::default(),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let mut config: AgentConfig = serde_yaml::from_str(text)?;
        config.expand_paths();
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let config_str =
            std::fs::read_to_string(path).map_err(|e| AgentError::local_file(path, e))?;
        Self::from_yaml(&config_str)
    }

    fn expand_paths(&mut self) {
        for dir in [
            &mut self.etcd.cert_dir,
            &mut self.master.cert_dir,
            &mut self.openvpn.cert_dir,
            &mut self.node.join_dir,
        ] {
            let expanded = expand_path(&dir.to_string_lossy());
            *dir = expanded;
        }
        if let crate::storage::StorageBackend::Local { path } = &mut self.storage.backend {
            let expanded = expand_path(&path.to_string_lossy());
            *path = expanded;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;

        if self.node.script_name.is_empty() || self.node.script_name.contains('/') {
            return Err(AgentError::Config(format!(
                "node.script_name '{}' must be a plain file name",
                self.node.script_name
            )));
        }
        if self.node.attempt_timeout_secs == 0 {
            return Err(AgentError::Config(
                "node.attempt_timeout_secs must be greater than zero".to_string(),
            ));
        }
        let backoff = &self.node.backoff;
        if backoff.multiplier < 1.0 {
            return Err(AgentError::Config(
                "node.backoff.multiplier must be at least 1.0".to_string(),
            ));
        }
        if backoff.initial_interval_ms == 0 || backoff.max_interval_ms < backoff.initial_interval_ms
        {
            return Err(AgentError::Config(
                "node.backoff intervals must be positive with max_interval_ms >= initial_interval_ms"
                    .to_string(),
            ));
        }
        if let Some(bootstrap) = &self.master.bootstrap {
            if bootstrap.join_command.is_empty() {
                return Err(AgentError::Config(
                    "master.bootstrap.join_command must not be empty".to_string(),
                ));
            }
        }
        if self.openvpn_client.client_validity_days == 0 || self.cluster.server_validity_days == 0 {
            return Err(AgentError::Config(
                "certificate validity must be at least one day".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy safe to print.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.storage = self.storage.redacted();
        copy
    }
}
