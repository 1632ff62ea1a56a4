// src/cert/crl.rs
use chrono::{DateTime, Utc};
use rcgen::{CertificateRevocationListParams, KeyIdMethod, RevokedCertParams, SerialNumber};
use serde::Serialize;
use tracing::{debug, info};
use x509_parser::prelude::{CertificateRevocationList, FromDer};

use super::ca::{to_offset, CertificateAuthority};
use super::verification::{normalize_serial, timestamp};
use crate::error::{AgentError, Result};

const CRL_PEM_TAG: &str = "X509 CRL";
const CRL_VALIDITY_DAYS: i64 = 3650;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevokedEntry {
    #[serde(serialize_with = "hex_serial")]
    pub serial: Vec<u8>,
    pub revoked_at: DateTime<Utc>,
}

fn hex_serial<S: serde::Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}

/// Decoded CRL content. Entries keep their insertion order and are never
/// removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevocationList {
    pub number: u64,
    pub entries: Vec<RevokedEntry>,
}

impl RevocationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a PEM or DER CRL. The signature is not checked here.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let der = if data.starts_with(b"-----BEGIN") {
            let block =
                pem::parse(data).map_err(|e| AgentError::crypto("invalid CRL PEM", e))?;
            if block.tag() != CRL_PEM_TAG {
                return Err(AgentError::Crypto(format!(
                    "expected {} PEM block, found {}",
                    CRL_PEM_TAG,
                    block.tag()
                )));
            }
            block.contents().to_vec()
        } else {
            data.to_vec()
        };

        let (_, crl) = CertificateRevocationList::from_der(&der)
            .map_err(|e| AgentError::crypto("invalid CRL", e))?;

        let number = match crl.crl_number() {
            Some(n) => n.to_u64_digits().first().copied().unwrap_or(0),
            None => 0,
        };

        let mut entries = Vec::new();
        for revoked in crl.iter_revoked_certificates() {
            entries.push(RevokedEntry {
                serial: normalize_serial(revoked.raw_serial()).to_vec(),
                revoked_at: timestamp(revoked.revocation_date.timestamp())?,
            });
        }

        debug!(number, entries = entries.len(), "parsed CRL");
        Ok(Self { number, entries })
    }

    pub fn entry(&self, serial: &[u8]) -> Option<&RevokedEntry> {
        let serial = normalize_serial(serial);
        self.entries.iter().find(|e| e.serial == serial)
    }

    pub fn contains(&self, serial: &[u8]) -> bool {
        self.entry(serial).is_some()
    }

    /// Append `serial` unless it is already listed. Returns whether the list
    /// changed; a change bumps the CRL number.
    pub fn revoke(&mut self, serial: &[u8], at: DateTime<Utc>) -> bool {
        if self.contains(serial) {
            return false;
        }
        let revoked_at = DateTime::<Utc>::from_timestamp(at.timestamp(), 0).unwrap_or(at);
        self.entries.push(RevokedEntry {
            serial: normalize_serial(serial).to_vec(),
            revoked_at,
        });
        self.number += 1;
        true
    }

    /// Sign the list with `ca` and return it as PEM.
    pub fn sign(&self, ca: &CertificateAuthority) -> Result<String> {
        let now = DateTime::<Utc>::from_timestamp(Utc::now().timestamp(), 0)
            .ok_or_else(|| AgentError::Crypto("clock out of range".to_string()))?;

        let mut revoked_certs = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            revoked_certs.push(RevokedCertParams {
                serial_number: SerialNumber::from_slice(&entry.serial),
                revocation_time: to_offset(entry.revoked_at)?,
                reason_code: None,
                invalidity_date: None,
            });
        }

        let params = CertificateRevocationListParams {
            this_update: to_offset(now)?,
            next_update: to_offset(now + chrono::Duration::days(CRL_VALIDITY_DAYS))?,
            crl_number: SerialNumber::from_slice(&crl_number_bytes(self.number)),
            issuing_distribution_point: None,
            revoked_certs,
            key_identifier_method: KeyIdMethod::Sha256,
        };

        let issuer = ca.issuer()?;
        let crl = params
            .signed_by(&issuer)
            .map_err(|e| AgentError::crypto("failed to sign CRL", e))?;

        info!(number = self.number, entries = self.entries.len(), "signed CRL");
        Ok(pem::encode(&pem::Pem::new(CRL_PEM_TAG, crl.der().to_vec())))
    }
}

fn crl_number_bytes(number: u64) -> Vec<u8> {
    let bytes = number.to_be_bytes();
    normalize_serial(&bytes).to_vec()
}
