// src/cert/ca.rs
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use tracing::{debug, info};

use super::types::{CertificateConfig, CertificateType, IssuedCertificate};
use crate::error::{AgentError, Result};

/// Root of trust for one component prefix.
///
/// Holds PEM text only; the signing key is re-parsed per operation since
/// `KeyPair` is not `Clone`.
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    cert_pem: String,
    key_pem: String,
}

impl CertificateAuthority {
    /// Self-sign a new CA with a fresh P-256 key.
    pub fn generate(config: &CertificateConfig) -> Result<Self> {
        info!(common_name = %config.common_name, "generating CA certificate");

        let key = KeyPair::generate()
            .map_err(|e| AgentError::crypto("failed to generate CA key", e))?;
        let (params, _, _, _) = build_params(config, CertificateType::CertificateAuthority)?;
        let cert = params
            .self_signed(&key)
            .map_err(|e| AgentError::crypto("failed to self-sign CA certificate", e))?;

        debug!(common_name = %config.common_name, "CA certificate generated");
        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }

    /// Load an existing CA, checking the key and certificate parse.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let ca = Self {
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
        };
        ca.issuer()?;
        Ok(ca)
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    pub(crate) fn issuer(&self) -> Result<Issuer<'static, KeyPair>> {
        let key = KeyPair::from_pem(&self.key_pem)
            .map_err(|e| AgentError::crypto("failed to parse CA key", e))?;
        Issuer::from_ca_cert_pem(&self.cert_pem, key)
            .map_err(|e| AgentError::crypto("failed to load CA certificate", e))
    }

    /// Mint a certificate signed by this CA.
    pub fn issue(&self, config: &CertificateConfig) -> Result<IssuedCertificate> {
        info!(
            common_name = %config.common_name,
            cert_type = ?config.cert_type,
            "issuing certificate"
        );

        let key = KeyPair::generate()
            .map_err(|e| AgentError::crypto("failed to generate key", e))?;
        let (params, serial, not_before, not_after) = build_params(config, config.cert_type)?;
        let issuer = self.issuer()?;
        let cert = params.signed_by(&key, &issuer).map_err(|e| {
            AgentError::crypto(&format!("failed to sign certificate for {}", config.common_name), e)
        })?;

        Ok(IssuedCertificate {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            serial,
            common_name: config.common_name.clone(),
            not_before,
            not_after,
        })
    }
}

/// Positive 128-bit serial.
pub fn random_serial() -> Vec<u8> {
    let mut serial = vec![0u8; 16];
    OsRng.fill_bytes(&mut serial);
    serial[0] &= 0x7f;
    if serial[0] == 0 {
        serial[0] = 1;
    }
    serial
}

pub(crate) fn to_offset(at: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| AgentError::crypto("timestamp out of range", e))
}

type Params = (CertificateParams, Vec<u8>, DateTime<Utc>, DateTime<Utc>);

fn build_params(config: &CertificateConfig, cert_type: CertificateType) -> Result<Params> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(config.common_name.clone()),
    );
    if let Some(org) = &config.organization {
        dn.push(DnType::OrganizationName, DnValue::Utf8String(org.clone()));
    }
    params.distinguished_name = dn;

    // X.509 times carry whole seconds
    let not_before = DateTime::<Utc>::from_timestamp(Utc::now().timestamp(), 0)
        .ok_or_else(|| AgentError::Crypto("clock out of range".to_string()))?;
    let not_after = not_before + chrono::Duration::days(i64::from(config.validity_days));
    params.not_before = to_offset(not_before)?;
    params.not_after = to_offset(not_after)?;

    let serial = random_serial();
    params.serial_number = Some(SerialNumber::from_slice(&serial));

    match cert_type {
        CertificateType::CertificateAuthority => {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::CrlSign,
                KeyUsagePurpose::DigitalSignature,
            ];
        }
        CertificateType::Server => {
            params.is_ca = IsCa::ExplicitNoCa;
            params.key_usages = vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyEncipherment,
            ];
            params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        }
        CertificateType::Client => {
            params.is_ca = IsCa::ExplicitNoCa;
            params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
            params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        }
    }

    for name in &config.alt_names {
        let san = match name.parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => SanType::DnsName(
                Ia5String::try_from(name.as_str())
                    .map_err(|e| AgentError::crypto(&format!("invalid SAN {}", name), e))?,
            ),
        };
        params.subject_alt_names.push(san);
    }

    Ok((params, serial, not_before, not_after))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::verification::{parse_certificate, verify_issued_by};

    #[test]
    fn generated_ca_is_self_signed_ca() {
        let ca = CertificateAuthority::generate(&CertificateConfig::ca("etcd-ca", "pki-agent"))
            .unwrap();
        let info = parse_certificate(ca.cert_pem().as_bytes()).unwrap();
        assert_eq!(info.common_name, "etcd-ca");
        assert!(info.is_ca);
        assert!(info.not_after - info.not_before >= chrono::Duration::days(3650));
        verify_issued_by(ca.cert_pem(), ca.cert_pem()).unwrap();
    }

    #[test]
    fn issued_certificate_round_trips_through_pem() {
        let ca = CertificateAuthority::generate(&CertificateConfig::ca("vpn-ca", "pki-agent"))
            .unwrap();
        let issued = ca
            .issue(&CertificateConfig::client("alice", "pki-agent", 365))
            .unwrap();

        let info = parse_certificate(issued.cert_pem.as_bytes()).unwrap();
        assert_eq!(info.common_name, "alice");
        assert_eq!(info.serial, issued.serial);
        assert_eq!(info.not_before, issued.not_before);
        assert_eq!(info.not_after, issued.not_after);
        assert!(!info.is_ca);
        verify_issued_by(&issued.cert_pem, ca.cert_pem()).unwrap();
    }

    #[test]
    fn reloaded_ca_signs_for_the_same_root() {
        let ca = CertificateAuthority::generate(&CertificateConfig::ca("vpn-ca", "pki-agent"))
            .unwrap();
        let reloaded = CertificateAuthority::from_pem(ca.cert_pem(), ca.key_pem()).unwrap();
        let server = reloaded
            .issue(&CertificateConfig::server("server", "pki-agent", 3650))
            .unwrap();
        verify_issued_by(&server.cert_pem, ca.cert_pem()).unwrap();
    }

    #[test]
    fn rejects_garbage_key() {
        let ca = CertificateAuthority::generate(&CertificateConfig::ca("ca", "pki-agent")).unwrap();
        let err = CertificateAuthority::from_pem(ca.cert_pem(), "not a key").unwrap_err();
        assert!(matches!(err, AgentError::Crypto(_)));
    }

    #[test]
    fn serials_are_positive_and_distinct() {
        let a = random_serial();
        let b = random_serial();
        assert_eq!(a.len(), 16);
        assert!(a[0] >= 1 && a[0] <= 0x7f);
        assert_ne!(a, b);
    }
}
