// cert/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CA_VALIDITY_DAYS: u32 = 3650;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CertificateType {
    CertificateAuthority,
    Server,
    Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateConfig {
    pub cert_type: CertificateType,
    pub common_name: String,
    pub organization: Option<String>,
    pub validity_days: u32,
    pub alt_names: Vec<String>,
}

impl CertificateConfig {
    pub fn ca(common_name: &str, organization: &str) -> Self {
        Self {
            cert_type: CertificateType::CertificateAuthority,
            common_name: common_name.to_string(),
            organization: Some(organization.to_string()),
            validity_days: CA_VALIDITY_DAYS,
            alt_names: Vec::new(),
        }
    }

    pub fn server(common_name: &str, organization: &str, validity_days: u32) -> Self {
        Self {
            cert_type: CertificateType::Server,
            common_name: common_name.to_string(),
            organization: Some(organization.to_string()),
            validity_days,
            alt_names: vec![common_name.to_string()],
        }
    }

    pub fn client(common_name: &str, organization: &str, validity_days: u32) -> Self {
        Self {
            cert_type: CertificateType::Client,
            common_name: common_name.to_string(),
            organization: Some(organization.to_string()),
            validity_days,
            alt_names: Vec::new(),
        }
    }
}

/// A freshly minted certificate together with its private key.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub cert_pem: String,
    pub key_pem: String,
    /// Big-endian serial as written into the certificate
    pub serial: Vec<u8>,
    pub common_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}
