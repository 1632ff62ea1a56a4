// src/config/mod.rs
mod types;

use std::path::{Path, PathBuf};

pub use types::{AgentConfig, BootstrapConfig, NodeConfig};

use crate::utils::expand_path;

pub const DEFAULT_CONFIG_FILE: &str = "pki-agent.yml";

/// `--config` when given, else `./pki-agent.yml`, else the per-user
/// config directory. Falls back to `./pki-agent.yml` so the error names it.
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return expand_path(path);
    }
    let local = Path::new(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local.to_path_buf();
    }
    if let Some(dir) = dirs::config_dir() {
        let user = dir.join("pki-agent").join(DEFAULT_CONFIG_FILE);
        if user.exists() {
            return user;
        }
    }
    local.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::openvpn_client::ReissuePolicy;
    use crate::error::AgentError;
    use crate::storage::{StorageBackend, StorageConfig};

    #[test]
    fn minimal_file_only_needs_storage() {
        let config = AgentConfig::from_yaml("storage:\n  provider: memory\n").unwrap();
        assert!(matches!(config.storage.backend, StorageBackend::Memory));
        assert_eq!(config.node.script_name, "join.sh");
        assert_eq!(config.node.backoff.max_elapsed_secs, 1800);
        assert_eq!(config.openvpn_client.reissue_policy, ReissuePolicy::Block);
        config.validate().unwrap();
    }

    #[test]
    fn full_file_parses() {
        let yaml = r#"
storage:
  provider: s3
  url: https://s3.example.com
  bucket_name: secrets
  timeout_secs: 10
cluster:
  organization: example
openvpn_client:
  servers: [vpn1.example.com, vpn2.example.com]
  reissue_policy: allow
master:
  bootstrap:
    init_command: [kubeadm, init, --config=/etc/kubeadm.yml]
    join_command: [kubeadm, token, create, --print-join-command, --ttl=0]
node:
  node_name: worker-1
  backoff:
    max_elapsed_secs: 60
"#;
        let config = AgentConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.storage.timeout_secs, 10);
        assert_eq!(config.cluster.organization, "example");
        assert_eq!(config.openvpn_client.servers.len(), 2);
        assert_eq!(config.openvpn_client.reissue_policy, ReissuePolicy::Allow);
        assert_eq!(config.node.node_name.as_deref(), Some("worker-1"));
        assert_eq!(config.node.backoff.initial_interval_ms, 500);
        assert!(config.master.bootstrap.is_some());
        config.validate().unwrap();
    }

    #[test]
    fn rejects_script_paths() {
        let mut config = AgentConfig::with_storage(StorageConfig::memory());
        config.node.script_name = "../join.sh".to_string();
        assert!(matches!(config.validate(), Err(AgentError::Config(_))));
    }

    #[test]
    fn tilde_is_expanded() {
        let config =
            AgentConfig::from_yaml("storage:\n  provider: local\n  path: ~/bucket\n").unwrap();
        match config.storage.backend {
            StorageBackend::Local { path } => assert!(!path.to_string_lossy().starts_with('~')),
            other => panic!("unexpected backend: {other:?}"),
        }
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pki-agent.yml");
        std::fs::write(
            &path,
            "storage:\n  provider: local\n  path: /srv/pki\nopenvpn_client:\n  servers: [vpn.example.com]\n",
        )
        .unwrap();

        let loaded = AgentConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.openvpn_client.servers, vec!["vpn.example.com".to_string()]);
    }

    #[test]
    fn explicit_path_wins() {
        assert_eq!(
            resolve_config_path(Some("/etc/pki-agent/custom.yml")),
            PathBuf::from("/etc/pki-agent/custom.yml")
        );
    }
}
