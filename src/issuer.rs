//! The issuance orchestrator.
//!
//! [`Issuer::issue`] drives one CSR through
//! `Received → Decoded → IdentityAllocated → Signed → Recorded`. Any failure
//! moves it to `Failed(stage)` and removes whatever artifacts were written,
//! so a failed issuance leaves no trace in storage.
//!
//! Each issuance runs on its own task. Dropping the future returned by
//! `issue` abandons the result but not the work: the task still either
//! commits or cleans up.

use crate::cert::csr;
use crate::cert::loader::CaKeyMaterial;
use crate::cert::serial::IdentityAllocator;
use crate::cert::x509_signing::{cert_to_pem, SigningEngine};
use crate::config::IssuerConfig;
use crate::error::{IssuerError, Result, StorageError};
use crate::storage::artifacts::{ArtifactHandle, ArtifactKind, ArtifactStore, FsArtifactStore};
use crate::storage::ledger::{IssuanceLedger, JsonFileLedger};
use crate::storage::record::IssuedCertificate;
use crate::upload::{check_upload, sanitize_file_stem};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default bound on serial re-allocation after conflicts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default bound on one ledger commit.
pub const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where an issuance is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuanceState {
    Received,
    Decoded,
    IdentityAllocated,
    Signed,
    Recorded,
    Failed(&'static str),
}

impl fmt::Display for IssuanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssuanceState::Received => f.write_str("received"),
            IssuanceState::Decoded => f.write_str("decoded"),
            IssuanceState::IdentityAllocated => f.write_str("identity-allocated"),
            IssuanceState::Signed => f.write_str("signed"),
            IssuanceState::Recorded => f.write_str("recorded"),
            IssuanceState::Failed(stage) => write!(f, "failed({})", stage),
        }
    }
}

/// A successfully recorded issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issuance {
    pub record: IssuedCertificate,
    pub certificate_pem: String,
}

impl Issuance {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Suggested filename for handing the certificate back: `<cn>.crt`.
    pub fn download_name(&self) -> String {
        format!("{}.crt", sanitize_file_stem(&self.record.common_name))
    }
}

/// Issues certificates. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Issuer {
    engine: Arc<SigningEngine>,
    allocator: IdentityAllocator,
    ledger: Arc<dyn IssuanceLedger>,
    artifacts: Arc<dyn ArtifactStore>,
    max_attempts: u32,
    commit_timeout: Duration,
}

impl fmt::Debug for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Issuer")
            .field("engine", &self.engine)
            .field("allocator", &self.allocator)
            .field("max_attempts", &self.max_attempts)
            .field("commit_timeout", &self.commit_timeout)
            .finish_non_exhaustive()
    }
}

impl Issuer {
    pub fn new(
        engine: SigningEngine,
        allocator: IdentityAllocator,
        ledger: Arc<dyn IssuanceLedger>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            allocator,
            ledger,
            artifacts,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            commit_timeout: DEFAULT_COMMIT_TIMEOUT,
        }
    }

    /// Serial allocations tried per issuance; at least one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Build an issuer from configuration: CA files, JSON ledger and
    /// filesystem artifact store.
    ///
    /// Fails with `Configuration` if the CA material cannot be loaded.
    pub fn from_config(config: &IssuerConfig) -> Result<Self> {
        config.validate()?;

        let material = CaKeyMaterial::load(&config.ca.key_path, &config.ca.cert_path)?;
        info!(
            issuer = %material.subject(),
            key = material.key_kind(),
            "Loaded intermediate CA"
        );

        let engine = SigningEngine::new(
            material,
            config.issuance.extension_policy()?,
            config.issuance.signature_digest,
        )?;
        let allocator = IdentityAllocator::new(
            config.issuance.validity_period(),
            config.issuance.serial_bit_width,
        )?;
        info!(
            digest = %engine.digest(),
            allowed_extensions = engine.policy().allowed().count(),
            validity_days = allocator.validity_period().num_days(),
            "Issuance policy"
        );
        let ledger = JsonFileLedger::open(&config.storage.ledger_path)?;
        let artifacts = FsArtifactStore::open(&config.storage.csr_dir, &config.storage.certs_dir)?;

        Ok(Self::new(engine, allocator, Arc::new(ledger), Arc::new(artifacts))
            .with_max_attempts(config.issuance.max_allocation_attempts)
            .with_commit_timeout(config.storage.commit_timeout()))
    }

    /// Issue a certificate for a PEM-encoded CSR.
    pub async fn issue(&self, csr_bytes: &[u8]) -> Result<Issuance> {
        let issuer = self.clone();
        let csr_bytes = csr_bytes.to_vec();

        match tokio::spawn(async move { issuer.run(csr_bytes).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(IssuerError::Storage(StorageError::Unavailable(format!(
                "Issuance task cancelled: {}",
                e
            )))),
        }
    }

    /// Apply the upload rule, then [`issue`](Self::issue).
    pub async fn issue_upload(
        &self,
        content_type: Option<&str>,
        filename: Option<&str>,
        csr_bytes: &[u8],
    ) -> Result<Issuance> {
        check_upload(content_type, filename)?;
        self.issue(csr_bytes).await
    }

    /// The intermediate CA certificate (PEM). Touches no storage.
    pub fn fetch_intermediate_certificate(&self) -> &str {
        self.engine.ca_certificate_pem()
    }

    pub async fn lookup(&self, id: &str) -> Result<IssuedCertificate> {
        Ok(self.ledger.lookup(id).await?)
    }

    pub async fn find_by_serial(&self, serial: u64) -> Result<Option<IssuedCertificate>> {
        Ok(self.ledger.find_by_serial(serial).await?)
    }

    pub async fn list(&self) -> Result<Vec<IssuedCertificate>> {
        Ok(self.ledger.list().await?)
    }

    async fn run(&self, csr_bytes: Vec<u8>) -> Result<Issuance> {
        let id = Uuid::new_v4().to_string();

        let csr_handle = self
            .artifacts
            .put(ArtifactKind::Csr, &id, &csr_bytes)
            .await
            .map_err(|e| {
                let err = IssuerError::from(e);
                warn!(%id, state = %IssuanceState::Failed(err.stage()), error = %err, "Issuance failed");
                err
            })?;
        debug!(%id, state = %IssuanceState::Received, "Stored CSR");

        match self.sign_and_record(&id, &csr_bytes, &csr_handle).await {
            Ok(issuance) => {
                info!(
                    %id,
                    serial = %issuance.record.serial_hex(),
                    common_name = %issuance.record.common_name,
                    state = %IssuanceState::Recorded,
                    "Issued certificate"
                );
                Ok(issuance)
            }
            Err(err) => {
                self.discard(&csr_handle).await;
                warn!(%id, state = %IssuanceState::Failed(err.stage()), error = %err, "Issuance failed");
                Err(err)
            }
        }
    }

    async fn sign_and_record(
        &self,
        id: &str,
        csr_bytes: &[u8],
        csr_handle: &ArtifactHandle,
    ) -> Result<Issuance> {
        let request = csr::decode(csr_bytes)?;
        debug!(%id, common_name = %request.common_name, state = %IssuanceState::Decoded, "Decoded CSR");

        for attempt in 1..=self.max_attempts {
            let identity = self.allocator.allocate(Utc::now())?;
            debug!(%id, serial = identity.serial, attempt, state = %IssuanceState::IdentityAllocated, "Allocated identity");

            let certificate = self.engine.sign(&request, &identity)?;
            let certificate_pem = cert_to_pem(&certificate)?;
            debug!(%id, serial = identity.serial, state = %IssuanceState::Signed, "Signed certificate");

            let cert_handle = self
                .artifacts
                .put(ArtifactKind::Certificate, id, certificate_pem.as_bytes())
                .await?;

            let record = IssuedCertificate {
                id: id.to_string(),
                common_name: request.common_name.clone(),
                subject: request.subject.to_string(),
                issuer: self.engine.issuer().to_string(),
                csr_filename: csr_handle.file_name.clone(),
                cert_filename: cert_handle.file_name.clone(),
                issue_time: identity.not_before,
                expire_time: identity.not_after,
                serial_number: identity.serial,
            };

            match self.commit(&record).await {
                Ok(()) => {
                    return Ok(Issuance {
                        record,
                        certificate_pem,
                    })
                }
                Err(e) if e.is_conflict() => {
                    self.discard(&cert_handle).await;
                    warn!(%id, serial = identity.serial, attempt, "Serial already recorded, re-allocating");
                }
                Err(e) => {
                    self.discard(&cert_handle).await;
                    return Err(e.into());
                }
            }
        }

        Err(IssuerError::Allocation(format!(
            "No unique serial after {} attempts",
            self.max_attempts
        )))
    }

    /// Commit on a separate task so the deadline holds even when the ledger
    /// blocks its thread.
    async fn commit(&self, record: &IssuedCertificate) -> std::result::Result<(), StorageError> {
        let ledger = self.ledger.clone();
        let record = record.clone();
        let mut commit = tokio::spawn(async move { ledger.record(&record).await });

        match tokio::time::timeout(self.commit_timeout, &mut commit).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Ok(Err(e)) => Err(StorageError::Unavailable(format!(
                "Ledger commit cancelled: {}",
                e
            ))),
            Err(_) => {
                // dropping the ledger future abandons its write
                commit.abort();
                Err(StorageError::Timeout(self.commit_timeout))
            }
        }
    }

    async fn discard(&self, handle: &ArtifactHandle) {
        if let Err(e) = self.artifacts.delete(handle).await {
            error!(file = %handle.file_name, error = %e, "Failed to remove artifact");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::extensions::ExtensionPolicy;
    use crate::crypto::keys::SignatureDigest;
    use crate::testing::{p256_ca, p256_csr};
    use tempfile::TempDir;

    fn issuer(temp_dir: &TempDir) -> Issuer {
        let engine = SigningEngine::new(
            p256_ca().material(),
            ExtensionPolicy::default(),
            SignatureDigest::Sha256,
        )
        .unwrap();
        let allocator = IdentityAllocator::new(chrono::Duration::days(365), 63).unwrap();
        let ledger = JsonFileLedger::open_in(temp_dir.path()).unwrap();
        let artifacts =
            FsArtifactStore::open(&temp_dir.path().join("csr"), &temp_dir.path().join("certs"))
                .unwrap();
        Issuer::new(engine, allocator, Arc::new(ledger), Arc::new(artifacts))
    }

    #[test]
    fn test_state_display() {
        assert_eq!(IssuanceState::IdentityAllocated.to_string(), "identity-allocated");
        assert_eq!(IssuanceState::Failed("decode").to_string(), "failed(decode)");
    }

    #[test]
    fn test_issuer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Issuer>();
    }

    #[tokio::test]
    async fn test_issue_records_and_stores() {
        let temp_dir = TempDir::new().unwrap();
        let issuer = issuer(&temp_dir);

        let pem = p256_csr("alice.example.com", &[], vec![]);
        let issuance = issuer.issue(pem.as_bytes()).await.unwrap();

        assert_eq!(issuance.record.common_name, "alice.example.com");
        assert_eq!(issuance.download_name(), "alice.example.com.crt");
        assert_eq!(issuance.record.csr_filename, format!("{}.csr", issuance.id()));
        assert_eq!(issuance.record.cert_filename, format!("{}.crt", issuance.id()));
        assert!(temp_dir.path().join("certs").join(&issuance.record.cert_filename).exists());
        assert_eq!(issuer.lookup(issuance.id()).await.unwrap(), issuance.record);
    }

    #[tokio::test]
    async fn test_garbage_leaves_nothing_behind() {
        let temp_dir = TempDir::new().unwrap();
        let issuer = issuer(&temp_dir);

        let result = issuer.issue(b"garbage").await;
        assert!(matches!(result, Err(IssuerError::Decode(_))));
        assert_eq!(std::fs::read_dir(temp_dir.path().join("csr")).unwrap().count(), 0);
        assert!(issuer.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_rule_applies_before_issuing() {
        let temp_dir = TempDir::new().unwrap();
        let issuer = issuer(&temp_dir);
        let pem = p256_csr("alice.example.com", &[], vec![]);

        let rejected = issuer
            .issue_upload(Some("image/png"), Some("alice.png"), pem.as_bytes())
            .await;
        assert!(matches!(rejected, Err(IssuerError::RejectedUpload(_))));

        let accepted = issuer
            .issue_upload(None, Some("alice.csr"), pem.as_bytes())
            .await;
        assert!(accepted.is_ok());
    }
}
