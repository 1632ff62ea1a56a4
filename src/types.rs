// types.rs
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

/// Per-command options for `configure`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigureRequest {
    /// Replace local files that already exist
    pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    Create,
    Revoke,
    List,
}

/// Per-command options for `configure openvpn-client`.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub name: Option<String>,
    pub action: ClientAction,
    pub output: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationStatus {
    pub revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_time: Option<DateTime<Utc>>,
}

/// One row of the client certificate listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCertificateStatus {
    pub user: String,
    pub serial: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub expired: bool,
    pub revoked: RevocationStatus,
}
