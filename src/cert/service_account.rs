// src/cert/service_account.rs
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use tracing::info;

use crate::error::{AgentError, Result};

const SA_KEY_BITS: u32 = 2048;

/// Bare RSA signing keypair used for service-account tokens.
#[derive(Debug, Clone)]
pub struct ServiceAccountKeys {
    pub private_pem: String,
    pub public_pem: String,
}

impl ServiceAccountKeys {
    pub fn generate() -> Result<Self> {
        info!("Generating service account key pair");

        let rsa = Rsa::generate(SA_KEY_BITS)
            .map_err(|e| AgentError::crypto("failed to generate SA key", e))?;
        let key = PKey::from_rsa(rsa)
            .map_err(|e| AgentError::crypto("failed to wrap SA key", e))?;

        let private_pem = key
            .private_key_to_pem_pkcs8()
            .map_err(|e| AgentError::crypto("failed to encode SA private key", e))?;
        let public_pem = key
            .public_key_to_pem()
            .map_err(|e| AgentError::crypto("failed to encode SA public key", e))?;

        Ok(Self {
            private_pem: pem_string(private_pem)?,
            public_pem: pem_string(public_pem)?,
        })
    }

    /// Check that the public half belongs to the private key.
    pub fn verify_keypair(&self) -> Result<()> {
        let private = PKey::private_key_from_pem(self.private_pem.as_bytes())
            .map_err(|e| AgentError::crypto("invalid SA private key", e))?;
        let public = PKey::public_key_from_pem(self.public_pem.as_bytes())
            .map_err(|e| AgentError::crypto("invalid SA public key", e))?;

        let rsa = private
            .rsa()
            .map_err(|e| AgentError::crypto("SA key is not RSA", e))?;
        if !rsa
            .check_key()
            .map_err(|e| AgentError::crypto("SA private key check failed", e))?
        {
            return Err(AgentError::Crypto(
                "Service account private key verification failed".to_string(),
            ));
        }

        if !private.public_eq(&public) {
            return Err(AgentError::Crypto(
                "Service account key pair verification failed".to_string(),
            ));
        }
        Ok(())
    }
}

fn pem_string(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| AgentError::crypto("PEM is not UTF-8", e))
}
