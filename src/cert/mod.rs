// src/cert/mod.rs
mod ca;
mod crl;
mod service_account;
mod types;
pub mod verification;

pub use ca::CertificateAuthority;
pub use crl::RevocationList;
pub use service_account::ServiceAccountKeys;
pub use types::{CertificateConfig, IssuedCertificate};
pub use verification::{parse_certificate, verify_issued_by};
