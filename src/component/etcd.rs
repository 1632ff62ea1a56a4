// src/component/etcd.rs
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{ClusterComponent, CA_CERT, CA_KEY, ETCD_PREFIX};
use crate::cert::{CertificateAuthority, CertificateConfig};
use crate::config::AgentConfig;
use crate::error::Result;
use crate::storage::FileMapping;

pub struct Etcd;

impl ClusterComponent for Etcd {
    fn name(&self) -> &'static str {
        "etcd"
    }

    fn prefix(&self) -> &'static str {
        ETCD_PREFIX
    }

    fn local_dir(&self, config: &AgentConfig) -> PathBuf {
        config.etcd.cert_dir.clone()
    }

    fn file_mappings(&self, config: &AgentConfig) -> Vec<FileMapping> {
        vec![
            FileMapping::new(&config.etcd.ca_cert_file, CA_CERT),
            FileMapping::new(&config.etcd.ca_key_file, CA_KEY),
        ]
    }

    fn generate(&self, config: &AgentConfig) -> Result<BTreeMap<String, Vec<u8>>> {
        let ca = CertificateAuthority::generate(&CertificateConfig::ca(
            "etcd-ca",
            &config.cluster.organization,
        ))?;

        let mut files = BTreeMap::new();
        files.insert(CA_CERT.to_string(), ca.cert_pem().as_bytes().to_vec());
        files.insert(CA_KEY.to_string(), ca.key_pem().as_bytes().to_vec());
        Ok(files)
    }
}
