//! Issuer configuration.
//!
//! Loaded from a TOML file; a missing file means "all defaults", which match
//! the conventional layout of an intermediate CA working directory:
//!
//! ```toml
//! [issuance]
//! validity_days = 365
//! extension_allow_list = ["2.5.29.17", "2.5.29.15"]
//! reject_unknown_critical = true
//! signature_digest = "sha256"
//! serial_bit_width = 63
//! max_allocation_attempts = 3
//!
//! [ca]
//! key_path = "ca/intermediate/intermediate.key.pem"
//! cert_path = "ca/intermediate/intermediate.cert.pem"
//!
//! [storage]
//! csr_dir = "csr"
//! certs_dir = "certs"
//! ledger_path = "issued_certificates.json"
//! commit_timeout_ms = 5000
//! ```

use crate::cert::extensions::ExtensionPolicy;
use crate::cert::serial::MAX_SERIAL_BITS;
use crate::crypto::keys::SignatureDigest;
use crate::error::{IssuerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssuerConfig {
    #[serde(default)]
    pub issuance: IssuanceConfig,

    #[serde(default)]
    pub ca: CaConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// What gets issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssuanceConfig {
    /// Certificate lifetime in days (default: 365).
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,

    /// Dotted OIDs of extensions copied from the CSR.
    #[serde(default = "default_extension_allow_list")]
    pub extension_allow_list: Vec<String>,

    /// Fail requests carrying critical extensions outside the allow-list.
    #[serde(default = "default_true")]
    pub reject_unknown_critical: bool,

    #[serde(default)]
    pub signature_digest: SignatureDigest,

    /// Random serial width in bits, 1..=63 (default: 63).
    #[serde(default = "default_serial_bit_width")]
    pub serial_bit_width: u32,

    /// Serial allocations tried before giving up on conflicts (default: 3).
    #[serde(default = "default_max_allocation_attempts")]
    pub max_allocation_attempts: u32,
}

/// Intermediate CA key and certificate files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaConfig {
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,

    #[serde(default = "default_cert_path")]
    pub cert_path: PathBuf,
}

/// Where artifacts and the ledger live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "default_csr_dir")]
    pub csr_dir: PathBuf,

    #[serde(default = "default_certs_dir")]
    pub certs_dir: PathBuf,

    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Upper bound on one ledger commit (default: 5000).
    #[serde(default = "default_commit_timeout_ms")]
    pub commit_timeout_ms: u64,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            validity_days: default_validity_days(),
            extension_allow_list: default_extension_allow_list(),
            reject_unknown_critical: true,
            signature_digest: SignatureDigest::default(),
            serial_bit_width: default_serial_bit_width(),
            max_allocation_attempts: default_max_allocation_attempts(),
        }
    }
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            key_path: default_key_path(),
            cert_path: default_cert_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            csr_dir: default_csr_dir(),
            certs_dir: default_certs_dir(),
            ledger_path: default_ledger_path(),
            commit_timeout_ms: default_commit_timeout_ms(),
        }
    }
}

impl IssuerConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                IssuerError::Configuration(format!("Failed to read {}: {}", path.display(), e))
            })?;
            Self::from_toml_str(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| IssuerError::Configuration(e.to_string()))
    }

    /// Resolve relative paths against `base`.
    pub fn rebase(mut self, base: &Path) -> Self {
        for path in [
            &mut self.ca.key_path,
            &mut self.ca.cert_path,
            &mut self.storage.csr_dir,
            &mut self.storage.certs_dir,
            &mut self.storage.ledger_path,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }

    /// Check ranges and OIDs.
    pub fn validate(&self) -> Result<()> {
        let issuance = &self.issuance;

        if issuance.validity_days == 0 {
            return Err(IssuerError::Configuration(
                "validity_days must be at least 1".to_string(),
            ));
        }
        if issuance.serial_bit_width == 0 || issuance.serial_bit_width > MAX_SERIAL_BITS {
            return Err(IssuerError::Configuration(format!(
                "serial_bit_width must be between 1 and {}",
                MAX_SERIAL_BITS
            )));
        }
        if issuance.max_allocation_attempts == 0 {
            return Err(IssuerError::Configuration(
                "max_allocation_attempts must be at least 1".to_string(),
            ));
        }
        if self.storage.commit_timeout_ms == 0 {
            return Err(IssuerError::Configuration(
                "commit_timeout_ms must be at least 1".to_string(),
            ));
        }
        issuance.extension_policy()?;

        Ok(())
    }
}

impl IssuanceConfig {
    pub fn validity_period(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.validity_days))
    }

    pub fn extension_policy(&self) -> Result<ExtensionPolicy> {
        ExtensionPolicy::from_dotted(&self.extension_allow_list, self.reject_unknown_critical)
    }
}

impl StorageConfig {
    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }
}

// Default value functions for serde.
const fn default_validity_days() -> u32 {
    365
}

fn default_extension_allow_list() -> Vec<String> {
    vec![String::from("2.5.29.17"), String::from("2.5.29.15")]
}

const fn default_true() -> bool {
    true
}

const fn default_serial_bit_width() -> u32 {
    MAX_SERIAL_BITS
}

const fn default_max_allocation_attempts() -> u32 {
    3
}

fn default_key_path() -> PathBuf {
    PathBuf::from("ca/intermediate/intermediate.key.pem")
}

fn default_cert_path() -> PathBuf {
    PathBuf::from("ca/intermediate/intermediate.cert.pem")
}

fn default_csr_dir() -> PathBuf {
    PathBuf::from("csr")
}

fn default_certs_dir() -> PathBuf {
    PathBuf::from("certs")
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("issued_certificates.json")
}

const fn default_commit_timeout_ms() -> u64 {
    5000
}
