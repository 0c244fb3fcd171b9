//! Which requested extensions make it into an issued certificate.

use crate::error::{IssuerError, Result, SignError};
use const_oid::db::rfc5280;
use const_oid::ObjectIdentifier;
use std::collections::BTreeSet;
use tracing::debug;
use x509_cert::ext::Extension;

/// Extensions the CA asserts itself; a requester's copy is always dropped.
pub const CA_ASSERTED: [ObjectIdentifier; 2] = [
    rfc5280::ID_CE_BASIC_CONSTRAINTS,
    rfc5280::ID_CE_AUTHORITY_KEY_IDENTIFIER,
];

/// Allow-list filter applied to CSR extensions.
///
/// Default: subjectAltName and keyUsage are copied, unknown critical
/// extensions fail the request and unknown non-critical ones are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPolicy {
    allowed: BTreeSet<ObjectIdentifier>,
    reject_unknown_critical: bool,
}

impl Default for ExtensionPolicy {
    fn default() -> Self {
        Self::new(
            [rfc5280::ID_CE_SUBJECT_ALT_NAME, rfc5280::ID_CE_KEY_USAGE],
            true,
        )
    }
}

impl ExtensionPolicy {
    pub fn new(
        allowed: impl IntoIterator<Item = ObjectIdentifier>,
        reject_unknown_critical: bool,
    ) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            reject_unknown_critical,
        }
    }

    /// Build a policy from dotted OID strings, as found in the config file.
    pub fn from_dotted<S: AsRef<str>>(oids: &[S], reject_unknown_critical: bool) -> Result<Self> {
        let allowed = oids
            .iter()
            .map(|oid| {
                ObjectIdentifier::new(oid.as_ref()).map_err(|e| {
                    IssuerError::Configuration(format!(
                        "Invalid extension OID '{}': {}",
                        oid.as_ref(),
                        e
                    ))
                })
            })
            .collect::<Result<BTreeSet<_>>>()?;

        if let Some(reserved) = allowed.iter().find(|oid| CA_ASSERTED.contains(oid)) {
            return Err(IssuerError::Configuration(format!(
                "Extension {} is set by the CA and cannot be allow-listed",
                reserved
            )));
        }

        Ok(Self {
            allowed,
            reject_unknown_critical,
        })
    }

    pub fn allows(&self, oid: &ObjectIdentifier) -> bool {
        self.allowed.contains(oid)
    }

    pub fn allowed(&self) -> impl Iterator<Item = &ObjectIdentifier> {
        self.allowed.iter()
    }

    /// Select the requested extensions to copy, in request order.
    ///
    /// # Errors
    ///
    /// - [`SignError::DuplicateExtension`] if an OID is requested twice
    /// - [`SignError::UnsupportedCriticalExtension`] for a critical extension
    ///   outside the allow-list while rejection is enabled
    pub fn filter(&self, requested: &[Extension]) -> std::result::Result<Vec<Extension>, SignError> {
        let mut seen = BTreeSet::new();
        if let Some(dup) = requested.iter().find(|ext| !seen.insert(ext.extn_id)) {
            return Err(SignError::DuplicateExtension(dup.extn_id));
        }

        let mut copied = Vec::new();
        for ext in requested {
            if CA_ASSERTED.contains(&ext.extn_id) {
                debug!(oid = %ext.extn_id, "Ignoring CA-asserted extension from request");
            } else if self.allows(&ext.extn_id) {
                copied.push(ext.clone());
            } else if ext.critical && self.reject_unknown_critical {
                return Err(SignError::UnsupportedCriticalExtension(ext.extn_id));
            } else {
                debug!(oid = %ext.extn_id, critical = ext.critical, "Dropping extension not on allow-list");
            }
        }

        Ok(copied)
    }
}
