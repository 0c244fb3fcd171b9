//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use ca_issuer::cert::extensions::ExtensionPolicy;
use ca_issuer::cert::loader::CaKeyMaterial;
use ca_issuer::cert::serial::IdentityAllocator;
use ca_issuer::cert::x509_signing::SigningEngine;
use ca_issuer::crypto::keys::SignatureDigest;
use ca_issuer::error::StorageError;
use ca_issuer::storage::artifacts::FsArtifactStore;
use ca_issuer::storage::ledger::{IssuanceLedger, JsonFileLedger};
use ca_issuer::storage::record::IssuedCertificate;
use ca_issuer::{Issuer, IssuerConfig};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CustomExtension, DistinguishedName, DnType,
    IsCa, KeyUsagePurpose,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A working directory with a freshly minted intermediate CA.
pub struct Fixture {
    pub temp_dir: TempDir,
    pub config: IssuerConfig,
    pub ca_key_pem: String,
    pub ca_cert_pem: String,
}

impl Fixture {
    pub fn new() -> Self {
        let (ca_key_pem, ca_cert_pem) = intermediate_ca();
        Self::with_ca(ca_key_pem, ca_cert_pem)
    }

    /// A fixture whose intermediate holds an RSA key stored as PKCS#1.
    pub fn rsa() -> Self {
        let (ca_key_pem, ca_cert_pem) = rsa_intermediate_ca();
        Self::with_ca(ca_key_pem, ca_cert_pem)
    }

    pub fn with_ca(ca_key_pem: String, ca_cert_pem: String) -> Self {
        let temp_dir = TempDir::new().unwrap();

        let ca_dir = temp_dir.path().join("ca/intermediate");
        std::fs::create_dir_all(&ca_dir).unwrap();
        std::fs::write(ca_dir.join("intermediate.key.pem"), &ca_key_pem).unwrap();
        std::fs::write(ca_dir.join("intermediate.cert.pem"), &ca_cert_pem).unwrap();

        let config = IssuerConfig::default().rebase(temp_dir.path());

        Self {
            temp_dir,
            config,
            ca_key_pem,
            ca_cert_pem,
        }
    }

    pub fn issuer(&self) -> Issuer {
        Issuer::from_config(&self.config).unwrap()
    }

    /// An issuer on this fixture's CA and artifact dirs, with a custom ledger.
    pub fn issuer_with_ledger(&self, ledger: Arc<dyn IssuanceLedger>) -> Issuer {
        let material = CaKeyMaterial::from_pem(&self.ca_key_pem, &self.ca_cert_pem).unwrap();
        let engine =
            SigningEngine::new(material, ExtensionPolicy::default(), SignatureDigest::Sha256)
                .unwrap();
        let allocator = IdentityAllocator::new(chrono::Duration::days(365), 63).unwrap();
        let artifacts =
            FsArtifactStore::open(&self.config.storage.csr_dir, &self.config.storage.certs_dir)
                .unwrap();

        Issuer::new(engine, allocator, ledger, Arc::new(artifacts))
    }

    pub fn json_ledger(&self) -> JsonFileLedger {
        JsonFileLedger::open(&self.config.storage.ledger_path).unwrap()
    }

    pub fn csr_count(&self) -> usize {
        count_files(&self.config.storage.csr_dir)
    }

    pub fn cert_count(&self) -> usize {
        count_files(&self.config.storage.certs_dir)
    }
}

fn count_files(dir: &Path) -> usize {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

fn intermediate_params(alg: &'static rcgen::SignatureAlgorithm) -> CertificateParams {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "Example Intermediate CA");
    dn.push(DnType::OrganizationName, "Example Org");

    let mut params = CertificateParams::default();
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.alg = alg;
    params
}

/// P-256 intermediate CA as (key PEM, certificate PEM).
pub fn intermediate_ca() -> (String, String) {
    let params = intermediate_params(&rcgen::PKCS_ECDSA_P256_SHA256);
    let cert = Certificate::from_params(params).unwrap();
    (cert.serialize_private_key_pem(), cert.serialize_pem().unwrap())
}

/// RSA-2048 intermediate CA as (PKCS#1 key PEM, certificate PEM).
pub fn rsa_intermediate_ca() -> (String, String) {
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};

    let private = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
    let pkcs8_pem = private.to_pkcs8_pem(LineEnding::LF).unwrap();

    let mut params = intermediate_params(&rcgen::PKCS_RSA_SHA256);
    params.key_pair = Some(rcgen::KeyPair::from_pem(&pkcs8_pem).unwrap());
    let cert = Certificate::from_params(params).unwrap();

    (
        private.to_pkcs1_pem(LineEnding::LF).unwrap().to_string(),
        cert.serialize_pem().unwrap(),
    )
}

/// CSR with a fresh P-256 key.
pub fn csr(cn: &str, sans: &[&str], custom: Vec<CustomExtension>) -> String {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn.push(DnType::OrganizationName, "Example Org");
    csr_with_dn(dn, sans, custom)
}

/// CSR whose subject has an Organization but no Common Name.
pub fn csr_without_cn() -> String {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "Example Org");
    csr_with_dn(dn, &[], vec![])
}

fn csr_with_dn(dn: DistinguishedName, sans: &[&str], custom: Vec<CustomExtension>) -> String {
    let mut params =
        CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    params.distinguished_name = dn;
    params.custom_extensions = custom;
    params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;

    Certificate::from_params(params)
        .unwrap()
        .serialize_request_pem()
        .unwrap()
}

/// A private-arc extension no allow-list knows about.
pub fn private_extension(critical: bool) -> CustomExtension {
    let mut ext = CustomExtension::from_oid_content(&[1, 3, 6, 1, 4, 1, 55555, 7], vec![0x05, 0x00]);
    ext.set_criticality(critical);
    ext
}

/// Ledger whose backend is down.
pub struct UnavailableLedger;

#[async_trait]
impl IssuanceLedger for UnavailableLedger {
    async fn record(&self, _certificate: &IssuedCertificate) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("connection refused".to_string()))
    }

    async fn lookup(&self, _id: &str) -> Result<IssuedCertificate, StorageError> {
        Err(StorageError::Unavailable("connection refused".to_string()))
    }

    async fn find_by_serial(&self, _serial: u64) -> Result<Option<IssuedCertificate>, StorageError> {
        Err(StorageError::Unavailable("connection refused".to_string()))
    }

    async fn list(&self) -> Result<Vec<IssuedCertificate>, StorageError> {
        Err(StorageError::Unavailable("connection refused".to_string()))
    }
}

/// Reports a serial conflict for the first `conflicts` commits, then
/// delegates to a real ledger.
pub struct ConflictingLedger {
    inner: JsonFileLedger,
    conflicts: usize,
    pub calls: AtomicUsize,
}

impl ConflictingLedger {
    pub fn new(inner: JsonFileLedger, conflicts: usize) -> Self {
        Self {
            inner,
            conflicts,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IssuanceLedger for ConflictingLedger {
    async fn record(&self, certificate: &IssuedCertificate) -> Result<(), StorageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.conflicts {
            return Err(StorageError::SerialConflict(certificate.serial_number));
        }
        self.inner.record(certificate).await
    }

    async fn lookup(&self, id: &str) -> Result<IssuedCertificate, StorageError> {
        self.inner.lookup(id).await
    }

    async fn find_by_serial(&self, serial: u64) -> Result<Option<IssuedCertificate>, StorageError> {
        self.inner.find_by_serial(serial).await
    }

    async fn list(&self) -> Result<Vec<IssuedCertificate>, StorageError> {
        self.inner.list().await
    }
}

/// Ledger that never answers a commit within `delay`.
pub struct StalledLedger {
    pub delay: Duration,
}

#[async_trait]
impl IssuanceLedger for StalledLedger {
    async fn record(&self, _certificate: &IssuedCertificate) -> Result<(), StorageError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn lookup(&self, id: &str) -> Result<IssuedCertificate, StorageError> {
        Err(StorageError::NotFound(id.to_string()))
    }

    async fn find_by_serial(&self, _serial: u64) -> Result<Option<IssuedCertificate>, StorageError> {
        Ok(None)
    }

    async fn list(&self) -> Result<Vec<IssuedCertificate>, StorageError> {
        Ok(Vec::new())
    }
}

/// Ledger whose commit holds its thread, as a stalled synchronous disk write
/// would.
pub struct BlockingLedger {
    pub delay: Duration,
}

#[async_trait]
impl IssuanceLedger for BlockingLedger {
    async fn record(&self, _certificate: &IssuedCertificate) -> Result<(), StorageError> {
        std::thread::sleep(self.delay);
        Ok(())
    }

    async fn lookup(&self, id: &str) -> Result<IssuedCertificate, StorageError> {
        Err(StorageError::NotFound(id.to_string()))
    }

    async fn find_by_serial(&self, _serial: u64) -> Result<Option<IssuedCertificate>, StorageError> {
        Ok(None)
    }

    async fn list(&self) -> Result<Vec<IssuedCertificate>, StorageError> {
        Ok(Vec::new())
    }
}
