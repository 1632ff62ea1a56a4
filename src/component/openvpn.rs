// src/component/openvpn.rs
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::PathBuf;

use rand::rngs::OsRng;
use rand::RngCore;

use super::{ClusterComponent, CA_CERT, CA_CRL, CA_KEY, OPENVPN_PREFIX};
use crate::cert::{CertificateAuthority, CertificateConfig, RevocationList};
use crate::config::AgentConfig;
use crate::error::Result;
use crate::storage::FileMapping;

pub const SERVER_CERT: &str = "server.crt";
pub const SERVER_KEY: &str = "server.key";
pub const TLS_AUTH_KEY: &str = "ta.key";

const STATIC_KEY_BYTES: usize = 256;

pub struct OpenVpn;

impl ClusterComponent for OpenVpn {
    fn name(&self) -> &'static str {
        "openvpn"
    }

    fn prefix(&self) -> &'static str {
        OPENVPN_PREFIX
    }

    fn local_dir(&self, config: &AgentConfig) -> PathBuf {
        config.openvpn.cert_dir.clone()
    }

    fn file_mappings(&self, config: &AgentConfig) -> Vec<FileMapping> {
        let vpn = &config.openvpn;
        vec![
            FileMapping::new(&vpn.ca_cert_file, CA_CERT),
            FileMapping::new(&vpn.ca_key_file, CA_KEY),
            FileMapping::new(&vpn.server_cert_file, SERVER_CERT),
            FileMapping::new(&vpn.server_key_file, SERVER_KEY),
            FileMapping::new(&vpn.crl_file, CA_CRL),
            FileMapping::new(&vpn.ta_key_file, TLS_AUTH_KEY),
        ]
    }

    fn generate(&self, config: &AgentConfig) -> Result<BTreeMap<String, Vec<u8>>> {
        let org = &config.cluster.organization;
        let ca = CertificateAuthority::generate(&CertificateConfig::ca("openvpn-ca", org))?;
        let server = ca.issue(&CertificateConfig::server(
            &config.openvpn.server_common_name,
            org,
            config.cluster.server_validity_days,
        ))?;
        let crl = RevocationList::new().sign(&ca)?;

        let mut files = BTreeMap::new();
        files.insert(CA_CERT.to_string(), ca.cert_pem().as_bytes().to_vec());
        files.insert(CA_KEY.to_string(), ca.key_pem().as_bytes().to_vec());
        files.insert(SERVER_CERT.to_string(), server.cert_pem.into_bytes());
        files.insert(SERVER_KEY.to_string(), server.key_pem.into_bytes());
        files.insert(CA_CRL.to_string(), crl.into_bytes());
        files.insert(TLS_AUTH_KEY.to_string(), generate_tls_auth_key().into_bytes());
        Ok(files)
    }
}

/// OpenVPN static key V1: 2048 random bits as hex, 16 bytes per line.
pub fn generate_tls_auth_key() -> String {
    let mut key = vec![0u8; STATIC_KEY_BYTES];
    OsRng.fill_bytes(&mut key);

    let mut out = String::from("#\n# 2048 bit OpenVPN static key\n#\n");
    out.push_str("-----BEGIN OpenVPN Static key V1-----\n");
    for line in key.chunks(16) {
        let _ = writeln!(out, "{}", hex::encode(line));
    }
    out.push_str("-----END OpenVPN Static key V1-----\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{parse_certificate, verify_issued_by};
    use crate::storage::StorageConfig;

    #[test]
    fn tls_auth_key_has_static_key_layout() {
        let key = generate_tls_auth_key();
        let lines: Vec<&str> = key.lines().collect();
        assert_eq!(lines[3], "-----BEGIN OpenVPN Static key V1-----");
        assert_eq!(*lines.last().unwrap(), "-----END OpenVPN Static key V1-----");

        let body = &lines[4..lines.len() - 1];
        assert_eq!(body.len(), 16);
        assert!(body
            .iter()
            .all(|l| l.len() == 32 && l.chars().all(|c| c.is_ascii_hexdigit())));
        assert_ne!(key, generate_tls_auth_key());
    }

    #[test]
    fn generates_server_cert_and_empty_crl() {
        let config = AgentConfig::with_storage(StorageConfig::memory());
        let files = OpenVpn.generate(&config).unwrap();

        let ca = String::from_utf8(files[CA_CERT].clone()).unwrap();
        let server = String::from_utf8(files[SERVER_CERT].clone()).unwrap();
        verify_issued_by(&server, &ca).unwrap();
        assert_eq!(parse_certificate(server.as_bytes()).unwrap().common_name, "server");

        let crl = RevocationList::parse(&files[CA_CRL]).unwrap();
        assert!(crl.entries.is_empty());
    }
}
