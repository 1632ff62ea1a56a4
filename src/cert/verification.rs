// src/cert/verification.rs
use chrono::{DateTime, TimeZone, Utc};
use openssl::hash::{hash, MessageDigest};
use openssl::x509::X509;
use serde::Serialize;
use x509_parser::prelude::{FromDer, ParsedExtension, X509Certificate};

use crate::error::{AgentError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct CertificateInfo {
    pub common_name: String,
    pub issuer: String,
    #[serde(serialize_with = "as_hex")]
    pub serial: Vec<u8>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub fingerprint: String,
    pub is_ca: bool,
}

impl CertificateInfo {
    pub fn serial_hex(&self) -> String {
        hex::encode(&self.serial)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.not_after
    }
}

fn as_hex<S: serde::Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}

/// Serial without DER sign padding, for comparisons.
pub fn normalize_serial(serial: &[u8]) -> &[u8] {
    let start = serial
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(serial.len().saturating_sub(1));
    &serial[start..]
}

/// Parse a PEM (or raw DER) certificate.
pub fn parse_certificate(data: &[u8]) -> Result<CertificateInfo> {
    let cert_der = if data.starts_with(b"-----BEGIN CERTIFICATE-----") {
        X509::from_pem(data)
            .and_then(|cert| cert.to_der())
            .map_err(|e| AgentError::crypto("invalid PEM certificate", e))?
    } else {
        data.to_vec()
    };

    let (_remainder, cert) = X509Certificate::from_der(&cert_der)
        .map_err(|e| AgentError::crypto("invalid certificate", e))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();

    let not_before = timestamp(cert.validity().not_before.timestamp())?;
    let not_after = timestamp(cert.validity().not_after.timestamp())?;

    let is_ca = cert
        .extensions()
        .iter()
        .find_map(|ext| match ext.parsed_extension() {
            ParsedExtension::BasicConstraints(bc) => Some(bc.ca),
            _ => None,
        })
        .unwrap_or(false);

    let fingerprint = hash(MessageDigest::sha256(), &cert_der)
        .map_err(|e| AgentError::crypto("failed to fingerprint certificate", e))?;

    Ok(CertificateInfo {
        common_name,
        issuer: cert.issuer().to_string(),
        serial: normalize_serial(cert.raw_serial()).to_vec(),
        not_before,
        not_after,
        fingerprint: hex::encode(fingerprint),
        is_ca,
    })
}

/// Check that `cert_pem` carries a valid signature from the CA in `ca_pem`.
pub fn verify_issued_by(cert_pem: &str, ca_pem: &str) -> Result<()> {
    let cert = X509::from_pem(cert_pem.as_bytes())
        .map_err(|e| AgentError::crypto("invalid certificate", e))?;
    let ca = X509::from_pem(ca_pem.as_bytes())
        .map_err(|e| AgentError::crypto("invalid CA certificate", e))?;
    let ca_key = ca
        .public_key()
        .map_err(|e| AgentError::crypto("invalid CA public key", e))?;

    let valid = cert
        .verify(&ca_key)
        .map_err(|e| AgentError::crypto("signature check failed", e))?;
    if !valid {
        return Err(AgentError::Crypto(
            "certificate was not signed by this CA".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| AgentError::Crypto(format!("invalid timestamp {}", secs)))
}
