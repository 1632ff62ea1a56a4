// src/component/openvpn_client.rs
use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, Table};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::openvpn::TLS_AUTH_KEY;
use super::{
    load_ca, CA_CERT, CA_CRL, CA_CRL_STAGED, CA_KEY, OPENVPN_CLIENT_PREFIX,
    OPENVPN_CLIENT_REVOKED_PREFIX, OPENVPN_PREFIX,
};
use crate::cert::{
    parse_certificate, verify_issued_by, CertificateAuthority, CertificateConfig,
    IssuedCertificate, RevocationList,
};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::storage::{remote_path, SecretStore};
use crate::types::{OutputFormat, RevocationStatus, UserCertificateStatus};

/// Whether a name whose certificate was revoked may be issued again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReissuePolicy {
    /// An archived certificate under `revoked/` keeps the name taken
    #[default]
    Block,
    /// Only the active certificate is checked
    Allow,
}

/// What `create_user` hands back; nothing here but the certificate is
/// kept remotely.
#[derive(Debug, Clone)]
pub struct ClientBundle {
    pub certificate: IssuedCertificate,
    pub profile: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationOutcome {
    pub user: String,
    pub serial: Vec<u8>,
    pub revoked_at: DateTime<Utc>,
    /// False when the serial was already listed
    pub newly_revoked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrlSource {
    Active,
    Staged,
    Missing,
}

pub struct ClientCredentialManager<'a> {
    store: &'a SecretStore,
    config: &'a AgentConfig,
}

impl<'a> ClientCredentialManager<'a> {
    pub fn new(store: &'a SecretStore, config: &'a AgentConfig) -> Self {
        Self { store, config }
    }

    fn active_path(name: &str) -> String {
        remote_path(OPENVPN_CLIENT_PREFIX, &format!("{}.crt", name))
    }

    fn archived_path(name: &str) -> String {
        remote_path(OPENVPN_CLIENT_REVOKED_PREFIX, &format!("{}.crt", name))
    }

    /// Issue a client certificate for `name` and render its profile.
    pub async fn create_user(&self, name: &str) -> Result<ClientBundle> {
        validate_username(name)?;
        let path = Self::active_path(name);

        if self.store.exists(&path).await? {
            return Err(AgentError::AlreadyExists(path));
        }
        if self.config.openvpn_client.reissue_policy == ReissuePolicy::Block {
            let archived = Self::archived_path(name);
            if self.store.exists(&archived).await? {
                warn!(user = name, "name belongs to a revoked certificate");
                return Err(AgentError::AlreadyExists(archived));
            }
        }

        let files = self
            .store
            .download_files_to_memory(&[CA_CERT, CA_KEY, TLS_AUTH_KEY], OPENVPN_PREFIX)
            .await?;
        let text = |object: &str| -> Result<String> {
            let bytes = files
                .get(object)
                .ok_or_else(|| AgentError::NotFound(remote_path(OPENVPN_PREFIX, object)))?;
            String::from_utf8(bytes.clone()).map_err(|e| AgentError::crypto(object, e))
        };
        let ca_pem = text(CA_CERT)?;
        let ca = CertificateAuthority::from_pem(&ca_pem, &text(CA_KEY)?)?;
        let tls_auth = text(TLS_AUTH_KEY)?;

        let certificate = ca.issue(&CertificateConfig::client(
            name,
            &self.config.cluster.organization,
            self.config.openvpn_client.client_validity_days,
        ))?;

        // plain upload: a concurrent create for the same name loses here
        self.store
            .upload_bytes(&path, certificate.cert_pem.clone())
            .await?;
        info!(
            user = name,
            serial = %hex::encode(&certificate.serial),
            "client certificate issued"
        );

        let profile = render_client_profile(
            &self.config.openvpn_client.servers,
            &ca_pem,
            &certificate.cert_pem,
            &certificate.key_pem,
            &tls_auth,
        );
        Ok(ClientBundle {
            certificate,
            profile,
        })
    }

    /// Every stored client certificate, active and archived, with its
    /// expiry and revocation status.
    pub async fn list_user_certificates(&self) -> Result<Vec<UserCertificateStatus>> {
        let (crl, _) = self.load_crl(false).await?;
        let crl = crl.unwrap_or_default();
        let now = Utc::now();

        let mut entries = Vec::new();
        for path in self.store.list(OPENVPN_CLIENT_PREFIX).await? {
            if !path.ends_with(".crt") {
                debug!(path = %path, "skipping non-certificate object");
                continue;
            }
            let data = self.store.download_bytes(&path).await?;
            let info = parse_certificate(&data)?;
            let revocation = crl.entry(&info.serial);

            entries.push(UserCertificateStatus {
                user: info.common_name.clone(),
                serial: info.serial_hex(),
                valid_from: info.not_before,
                valid_to: info.not_after,
                expired: info.is_expired(now),
                revoked: RevocationStatus {
                    revoked: revocation.is_some(),
                    revoke_time: revocation.map(|e| e.revoked_at),
                },
            });
        }

        entries.sort_by(|a, b| {
            a.user
                .cmp(&b.user)
                .then_with(|| a.valid_from.cmp(&b.valid_from))
        });
        Ok(entries)
    }

    /// Revoke the certificate issued to `name`.
    ///
    /// Steps: append to the CRL, stage the re-signed CRL, swap it in, then
    /// archive the certificate. Each step checks what is already done, so
    /// re-running after a failure converges. Two revocations racing on the
    /// CRL are last-writer-wins.
    pub async fn revoke_user(&self, name: &str) -> Result<RevocationOutcome> {
        validate_username(name)?;
        info!(user = name, "revoking client certificate");

        let ca = load_ca(self.store, OPENVPN_PREFIX).await?;
        let (crl, source) = self.load_crl(true).await?;
        let mut crl = crl.unwrap_or_else(|| {
            warn!("no CRL found, starting an empty one");
            RevocationList::new()
        });

        let (cert_pem, is_active) = self.load_user_certificate(name).await?;
        verify_issued_by(&cert_pem, ca.cert_pem())?;
        let info = parse_certificate(cert_pem.as_bytes())?;

        let newly_revoked = crl.revoke(&info.serial, Utc::now());
        if !newly_revoked {
            info!(user = name, serial = %info.serial_hex(), "serial already revoked");
        }
        let revoked_at = crl
            .entry(&info.serial)
            .map(|e| e.revoked_at)
            .ok_or_else(|| AgentError::Crypto("revocation entry missing".to_string()))?;

        if newly_revoked || source != CrlSource::Active {
            self.publish_crl(&crl, &ca).await?;
        }

        if is_active {
            let file = format!("{}.crt", name);
            self.store
                .move_to_force(&file, OPENVPN_CLIENT_PREFIX, OPENVPN_CLIENT_REVOKED_PREFIX)
                .await?;
        }

        info!(user = name, serial = %info.serial_hex(), %revoked_at, "client certificate revoked");
        Ok(RevocationOutcome {
            user: name.to_string(),
            serial: info.serial,
            revoked_at,
            newly_revoked,
        })
    }

    /// Current CRL. The staged copy is a superset of the active one, so a
    /// revocation resumes from it when present; listings read what is
    /// published.
    async fn load_crl(&self, prefer_staged: bool) -> Result<(Option<RevocationList>, CrlSource)> {
        let order = if prefer_staged {
            [(CA_CRL_STAGED, CrlSource::Staged), (CA_CRL, CrlSource::Active)]
        } else {
            [(CA_CRL, CrlSource::Active), (CA_CRL_STAGED, CrlSource::Staged)]
        };

        for (name, source) in order {
            match self
                .store
                .download_bytes(&remote_path(OPENVPN_PREFIX, name))
                .await
            {
                Ok(data) => {
                    debug!(object = name, "loaded CRL");
                    return Ok((Some(RevocationList::parse(&data)?), source));
                }
                Err(AgentError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok((None, CrlSource::Missing))
    }

    /// The user's certificate, from the active prefix or, when a previous
    /// revoke already moved it, from the archive.
    async fn load_user_certificate(&self, name: &str) -> Result<(String, bool)> {
        let active = Self::active_path(name);
        for (path, is_active) in [(active.clone(), true), (Self::archived_path(name), false)] {
            match self.store.download_bytes(&path).await {
                Ok(data) => {
                    let pem = String::from_utf8(data.to_vec())
                        .map_err(|e| AgentError::crypto(&path, e))?;
                    return Ok((pem, is_active));
                }
                Err(AgentError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(AgentError::NotFound(active))
    }

    async fn publish_crl(&self, crl: &RevocationList, ca: &CertificateAuthority) -> Result<()> {
        let staged = remote_path(OPENVPN_PREFIX, CA_CRL_STAGED);
        let active = remote_path(OPENVPN_PREFIX, CA_CRL);

        let pem = crl.sign(ca)?;
        self.store.upload_bytes_force(&staged, pem).await?;
        if self.store.exists(&active).await? {
            self.store.remove(&active).await?;
        }
        self.store.rename(&staged, &active).await?;
        info!(number = crl.number, entries = crl.entries.len(), "published CRL");
        Ok(())
    }
}

/// Accept `[A-Za-z0-9._@-]+` without `..`, so the name is stored verbatim
/// as `pki/vpn-client/<name>.crt`.
pub fn validate_username(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.contains("..")
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-'));
    if invalid {
        return Err(AgentError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub fn render_listing(entries: &[UserCertificateStatus], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(entries)?),
        OutputFormat::Yaml => serde_yaml::to_string(entries)
            .map_err(|e| AgentError::Serialization(e.to_string())),
        OutputFormat::Table => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec![
                Cell::new("User").add_attribute(Attribute::Bold),
                Cell::new("Valid from").add_attribute(Attribute::Bold),
                Cell::new("Valid to").add_attribute(Attribute::Bold),
                Cell::new("Expired").add_attribute(Attribute::Bold),
                Cell::new("Revoked").add_attribute(Attribute::Bold),
                Cell::new("Revoke time").add_attribute(Attribute::Bold),
            ]);

            for entry in entries {
                let revoked = if entry.revoked.revoked {
                    Cell::new("true").fg(Color::Red)
                } else {
                    Cell::new("false").fg(Color::Green)
                };
                let revoke_time = entry
                    .revoked
                    .revoke_time
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                table.add_row(vec![
                    Cell::new(&entry.user),
                    Cell::new(entry.valid_from.format("%Y-%m-%d")),
                    Cell::new(entry.valid_to.format("%Y-%m-%d")),
                    Cell::new(entry.expired),
                    revoked,
                    Cell::new(revoke_time),
                ]);
            }
            Ok(table.to_string())
        }
    }
}

/// OpenVPN client profile with every credential inlined.
pub fn render_client_profile(
    servers: &[String],
    ca_pem: &str,
    cert_pem: &str,
    key_pem: &str,
    tls_auth: &str,
) -> String {
    let mut out = String::from(
        "client
dev tun
proto udp
remote-random
remote-cert-tls server
tls-version-min 1.2
tls-cipher TLS-ECDHE-ECDSA-WITH-AES-128-GCM-SHA256:TLS-ECDHE-ECDSA-WITH-AES-256-GCM-SHA384:TLS-ECDHE-RSA-WITH-AES-128-GCM-SHA256:TLS-ECDHE-RSA-WITH-AES-256-GCM-SHA384
cipher AES-256-CBC
auth SHA512
resolv-retry infinite
auth-retry none
nobind
key-direction 1
persist-key
persist-tun
verb 3
tls-client

",
    );
    for server in servers {
        out.push_str(&format!("remote {} 1194\n", server));
    }
    for (tag, body) in [
        ("ca", ca_pem),
        ("cert", cert_pem),
        ("key", key_pem),
        ("tls-auth", tls_auth),
    ] {
        out.push_str(&format!("\n<{}>\n{}", tag, body));
        if !body.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&format!("</{}>\n", tag));
    }
    out
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::component::{init, OpenVpn};
    use crate::storage::StorageConfig;

    async fn bootstrap(policy: ReissuePolicy) -> (SecretStore, AgentConfig) {
        let store = SecretStore::memory();
        let mut config = AgentConfig::with_storage(StorageConfig::memory());
        config.openvpn_client.servers = vec!["vpn.example.com".to_string()];
        config.openvpn_client.reissue_policy = policy;
        init(&OpenVpn, &store, &config).await.unwrap();
        (store, config)
    }

    async fn published_crl(store: &SecretStore) -> RevocationList {
        let data = store.download_bytes("pki/vpn/ca.crl").await.unwrap();
        RevocationList::parse(&data).unwrap()
    }

    async fn crl_serials(store: &SecretStore) -> Vec<Vec<u8>> {
        published_crl(store)
            .await
            .entries
            .into_iter()
            .map(|e| e.serial)
            .collect()
    }

    #[test]
    fn username_validation() {
        for good in ["alice", "bob.smith", "ci-runner_01", "ops@example.com"] {
            validate_username(good).unwrap();
        }
        for bad in [
            "", "a/b", "..", "al..ice", "bob smith", "tab\there", "bob~1", "50%", "a#b", "x*",
            "[admin]", "ünïcode",
        ] {
            assert!(
                matches!(validate_username(bad), Err(AgentError::InvalidName(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[tokio::test]
    async fn invalid_name_fails_before_any_remote_call() {
        let store = SecretStore::memory();
        let config = AgentConfig::with_storage(StorageConfig::memory());
        let manager = ClientCredentialManager::new(&store, &config);
        let err = manager.create_user("../ca").await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidName(_)));
    }

    #[tokio::test]
    async fn create_user_twice_is_refused() {
        let (store, config) = bootstrap(ReissuePolicy::Block).await;
        let manager = ClientCredentialManager::new(&store, &config);

        let bundle = manager.create_user("alice").await.unwrap();
        let stored = store.download_bytes("pki/vpn-client/alice.crt").await.unwrap();
        assert_eq!(&stored[..], bundle.certificate.cert_pem.as_bytes());

        let err = manager.create_user("alice").await.unwrap_err();
        assert!(matches!(err, AgentError::AlreadyExists(ref p) if p == "pki/vpn-client/alice.crt"));
        let after = store.download_bytes("pki/vpn-client/alice.crt").await.unwrap();
        assert_eq!(after, stored);
    }

    #[tokio::test]
    async fn private_key_is_never_stored() {
        let (store, config) = bootstrap(ReissuePolicy::Block).await;
        let manager = ClientCredentialManager::new(&store, &config);
        let bundle = manager.create_user("carol").await.unwrap();

        for path in store.list("pki/vpn-client").await.unwrap() {
            let data = store.download_bytes(&path).await.unwrap();
            assert!(!String::from_utf8_lossy(&data).contains("PRIVATE KEY"));
        }
        assert!(bundle.profile.contains(&bundle.certificate.key_pem));
    }

    #[tokio::test]
    async fn profile_embeds_all_credentials() {
        let (store, config) = bootstrap(ReissuePolicy::Block).await;
        let manager = ClientCredentialManager::new(&store, &config);
        let bundle = manager.create_user("dave").await.unwrap();

        let ca = store.download_bytes("pki/vpn/ca.crt").await.unwrap();
        let ta = store.download_bytes("pki/vpn/ta.key").await.unwrap();
        let profile = &bundle.profile;
        assert!(profile.contains("remote vpn.example.com 1194\n"));
        assert!(profile.contains(std::str::from_utf8(&ca).unwrap()));
        assert!(profile.contains(std::str::from_utf8(&ta).unwrap()));
        assert!(profile.contains(&bundle.certificate.cert_pem));
        for tag in ["ca", "cert", "key", "tls-auth"] {
            assert!(profile.contains(&format!("<{}>\n", tag)));
            assert!(profile.contains(&format!("</{}>\n", tag)));
        }
    }

    #[tokio::test]
    async fn stored_certificate_round_trips() {
        let (store, config) = bootstrap(ReissuePolicy::Block).await;
        let manager = ClientCredentialManager::new(&store, &config);
        let bundle = manager.create_user("erin").await.unwrap();

        let stored = store.download_bytes("pki/vpn-client/erin.crt").await.unwrap();
        let info = parse_certificate(&stored).unwrap();
        assert_eq!(info.common_name, "erin");
        assert_eq!(info.serial, bundle.certificate.serial);
        assert_eq!(info.not_before, bundle.certificate.not_before);
        assert_eq!(info.not_after, bundle.certificate.not_after);
    }

    #[tokio::test]
    async fn revoke_appends_exactly_one_entry_with_plausible_time() {
        let (store, config) = bootstrap(ReissuePolicy::Block).await;
        let manager = ClientCredentialManager::new(&store, &config);
        manager.create_user("alice").await.unwrap();
        manager.create_user("bob").await.unwrap();
        manager.revoke_user("bob").await.unwrap();

        let before = crl_serials(&store).await;
        let called_at = Utc::now().timestamp();
        let outcome = manager.revoke_user("alice").await.unwrap();
        let returned_at = Utc::now().timestamp();

        assert!(outcome.newly_revoked);
        let after = crl_serials(&store).await;
        assert_eq!(after.len(), before.len() + 1);
        assert!(before.iter().all(|s| after.contains(s)));
        assert!(after.contains(&outcome.serial));

        let listing = manager.list_user_certificates().await.unwrap();
        let alice = listing.iter().find(|e| e.user == "alice").unwrap();
        assert!(alice.revoked.revoked);
        let at = alice.revoked.revoke_time.unwrap().timestamp();
        assert!(at >= called_at && at <= returned_at + 5);

        assert!(!store.exists("pki/vpn-client/alice.crt").await.unwrap());
        assert!(store.exists("pki/vpn-client/revoked/alice.crt").await.unwrap());
        assert!(!store.exists("pki/vpn/ca.crl.next").await.unwrap());
    }

    #[tokio::test]
    async fn second_revoke_is_a_no_op() {
        let (store, config) = bootstrap(ReissuePolicy::Block).await;
        let manager = ClientCredentialManager::new(&store, &config);
        manager.create_user("alice").await.unwrap();

        let first = manager.revoke_user("alice").await.unwrap();
        let crl_before = store.download_bytes("pki/vpn/ca.crl").await.unwrap();
        let second = manager.revoke_user("alice").await.unwrap();

        assert!(!second.newly_revoked);
        assert_eq!(second.serial, first.serial);
        assert_eq!(second.revoked_at, first.revoked_at);
        assert_eq!(crl_serials(&store).await, vec![first.serial.clone()]);
        assert_eq!(store.download_bytes("pki/vpn/ca.crl").await.unwrap(), crl_before);
    }

    #[tokio::test]
    async fn revoke_resumes_after_crash_between_delete_and_rename() {
        let (store, config) = bootstrap(ReissuePolicy::Block).await;
        let manager = ClientCredentialManager::new(&store, &config);
        manager.create_user("alice").await.unwrap();

        // simulate: staged CRL written, active CRL deleted, rename never ran
        let ca = load_ca(&store, OPENVPN_PREFIX).await.unwrap();
        let info = parse_certificate(
            &store.download_bytes("pki/vpn-client/alice.crt").await.unwrap(),
        )
        .unwrap();
        let mut staged = RevocationList::new();
        staged.revoke(&info.serial, Utc::now());
        store
            .upload_bytes_force("pki/vpn/ca.crl.next", staged.sign(&ca).unwrap())
            .await
            .unwrap();
        store.remove("pki/vpn/ca.crl").await.unwrap();

        let outcome = manager.revoke_user("alice").await.unwrap();
        assert!(!outcome.newly_revoked);
        assert_eq!(crl_serials(&store).await, vec![info.serial]);
        assert!(!store.exists("pki/vpn/ca.crl.next").await.unwrap());
        assert!(store.exists("pki/vpn-client/revoked/alice.crt").await.unwrap());
    }

    #[tokio::test]
    async fn listing_reads_back_every_stored_key() {
        let (store, config) = bootstrap(ReissuePolicy::Block).await;
        let manager = ClientCredentialManager::new(&store, &config);
        let alice = manager.create_user("alice").await.unwrap();

        assert!(matches!(
            manager.create_user("bob~1").await,
            Err(AgentError::InvalidName(_))
        ));
        // written by an older release that accepted any name
        store
            .upload_bytes("pki/vpn-client/bob~1.crt", alice.certificate.cert_pem.clone())
            .await
            .unwrap();

        let listing = manager.list_user_certificates().await.unwrap();
        assert_eq!(listing.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_revocations_are_last_writer_wins() {
        let (store, config) = bootstrap(ReissuePolicy::Block).await;
        let manager = ClientCredentialManager::new(&store, &config);
        manager.create_user("alice").await.unwrap();
        manager.create_user("bob").await.unwrap();

        let ca = load_ca(&store, OPENVPN_PREFIX).await.unwrap();
        let serial_of = |pem: Bytes| parse_certificate(&pem).unwrap().serial;
        let alice = serial_of(store.download_bytes("pki/vpn-client/alice.crt").await.unwrap());
        let bob = serial_of(store.download_bytes("pki/vpn-client/bob.crt").await.unwrap());

        // both revocations start from the same published CRL
        let (snapshot, _) = manager.load_crl(true).await.unwrap();
        let snapshot = snapshot.unwrap();
        let mut for_alice = snapshot.clone();
        for_alice.revoke(&alice, Utc::now());
        let mut for_bob = snapshot;
        for_bob.revoke(&bob, Utc::now());

        manager.publish_crl(&for_alice, &ca).await.unwrap();
        store
            .move_to_force("alice.crt", OPENVPN_CLIENT_PREFIX, OPENVPN_CLIENT_REVOKED_PREFIX)
            .await
            .unwrap();
        manager.publish_crl(&for_bob, &ca).await.unwrap();

        // the later writer dropped alice's entry
        let published = published_crl(&store).await;
        assert_eq!(published.entries.len(), 1);
        assert!(published.contains(&bob) && !published.contains(&alice));

        let outcome = manager.revoke_user("alice").await.unwrap();
        assert!(outcome.newly_revoked);
        let published = published_crl(&store).await;
        assert_eq!(published.entries.len(), 2);
        assert!(published.contains(&alice) && published.contains(&bob));
    }

    #[tokio::test]
    async fn revoking_unknown_user_is_not_found() {
        let (store, config) = bootstrap(ReissuePolicy::Block).await;
        let manager = ClientCredentialManager::new(&store, &config);
        let err = manager.revoke_user("mallory").await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound(ref p) if p == "pki/vpn-client/mallory.crt"));
    }

    #[tokio::test]
    async fn alice_lifecycle_with_blocking_policy() {
        let (store, config) = bootstrap(ReissuePolicy::Block).await;
        let manager = ClientCredentialManager::new(&store, &config);

        manager.create_user("alice").await.unwrap();
        let listing = manager.list_user_certificates().await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].user, "alice");
        assert!(!listing[0].expired);
        assert!(!listing[0].revoked.revoked);

        manager.revoke_user("alice").await.unwrap();
        let listing = manager.list_user_certificates().await.unwrap();
        assert_eq!(listing.len(), 1);
        assert!(listing[0].revoked.revoked);

        let err = manager.create_user("alice").await.unwrap_err();
        assert!(
            matches!(err, AgentError::AlreadyExists(ref p) if p == "pki/vpn-client/revoked/alice.crt")
        );
    }

    #[tokio::test]
    async fn alice_lifecycle_with_reuse_allowed() {
        let (store, config) = bootstrap(ReissuePolicy::Allow).await;
        let manager = ClientCredentialManager::new(&store, &config);

        let first = manager.create_user("alice").await.unwrap();
        manager.revoke_user("alice").await.unwrap();
        let second = manager.create_user("alice").await.unwrap();
        assert_ne!(first.certificate.serial, second.certificate.serial);

        let listing = manager.list_user_certificates().await.unwrap();
        assert_eq!(listing.len(), 2);
        assert!(listing.iter().all(|e| e.user == "alice"));
        assert!(listing[0].valid_from <= listing[1].valid_from);
        let revoked: Vec<_> = listing.iter().filter(|e| e.revoked.revoked).collect();
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].serial, hex::encode(&first.certificate.serial));
    }

    #[tokio::test]
    async fn listing_renders_in_every_format() {
        let (store, config) = bootstrap(ReissuePolicy::Block).await;
        let manager = ClientCredentialManager::new(&store, &config);
        manager.create_user("alice").await.unwrap();
        let listing = manager.list_user_certificates().await.unwrap();

        let table = render_listing(&listing, OutputFormat::Table).unwrap();
        assert!(table.contains("alice"));
        assert!(table.contains("Revoked"));

        let json = render_listing(&listing, OutputFormat::Json).unwrap();
        let parsed: Vec<UserCertificateStatus> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, listing);

        let yaml = render_listing(&listing, OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("user: alice"));
    }
}
