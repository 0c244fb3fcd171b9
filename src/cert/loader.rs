//! Loading the intermediate CA's key and certificate from PEM files.
//!
//! Both are read once at startup. A missing file, an unreadable key, or a
//! key that does not belong to the certificate is a configuration error and
//! the engine refuses to start.

use crate::crypto::keys::CaSigningKey;
use crate::error::{IssuerError, Result};
use const_oid::db::rfc5280;
use der::asn1::OctetString;
use der::Decode;
use rustls_pemfile::Item;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use x509_cert::certificate::Certificate;
use x509_cert::ext::pkix::SubjectKeyIdentifier;
use x509_cert::name::Name;

/// The intermediate CA's signing key together with its certificate.
///
/// The key is only reachable inside the crate.
pub struct CaKeyMaterial {
    key: CaSigningKey,
    certificate: Certificate,
    certificate_pem: String,
    subject_key_identifier: Option<OctetString>,
}

impl fmt::Debug for CaKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaKeyMaterial")
            .field("subject", &self.subject().to_string())
            .field("key", &self.key)
            .finish()
    }
}

impl CaKeyMaterial {
    /// Read the key and certificate files.
    pub fn load(key_path: &Path, cert_path: &Path) -> Result<Self> {
        let key_pem = std::fs::read_to_string(key_path).map_err(|e| {
            IssuerError::Configuration(format!(
                "Failed to read CA key {}: {}",
                key_path.display(),
                e
            ))
        })?;
        let cert_pem = std::fs::read_to_string(cert_path).map_err(|e| {
            IssuerError::Configuration(format!(
                "Failed to read CA certificate {}: {}",
                cert_path.display(),
                e
            ))
        })?;

        Self::from_pem(&key_pem, &cert_pem)
    }

    /// Build from PEM text.
    ///
    /// `cert_pem` may be a bundle; the first certificate is taken as the
    /// intermediate.
    pub fn from_pem(key_pem: &str, cert_pem: &str) -> Result<Self> {
        let key = load_signing_key_from_pem(key_pem)?;
        let chain = load_certificates_from_pem(cert_pem)?;
        let certificate = Certificate::from_der(&chain[0]).map_err(|e| {
            IssuerError::Configuration(format!("Failed to decode CA certificate: {}", e))
        })?;

        let public_key = key.public_key_info()?;
        let cert_key = &certificate.tbs_certificate.subject_public_key_info;
        if public_key.algorithm.oid != cert_key.algorithm.oid
            || public_key.subject_public_key != cert_key.subject_public_key
        {
            return Err(IssuerError::Configuration(
                "CA private key does not match the CA certificate".to_string(),
            ));
        }

        let subject_key_identifier = find_subject_key_identifier(&certificate)?;
        let certificate_pem = pem::encode(&pem::Pem::new("CERTIFICATE", chain[0].clone()));

        Ok(Self {
            key,
            certificate,
            certificate_pem,
            subject_key_identifier,
        })
    }

    pub(crate) fn key(&self) -> &CaSigningKey {
        &self.key
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// The intermediate certificate alone, PEM encoded.
    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    pub fn subject(&self) -> &Name {
        &self.certificate.tbs_certificate.subject
    }

    pub fn key_kind(&self) -> &'static str {
        self.key.kind()
    }

    pub(crate) fn subject_key_identifier(&self) -> Option<&OctetString> {
        self.subject_key_identifier.as_ref()
    }
}

/// Parse the first private key in a PEM document.
///
/// Accepts `PRIVATE KEY` (PKCS#8), `RSA PRIVATE KEY` and `EC PRIVATE KEY`.
pub fn load_signing_key_from_pem(pem_str: &str) -> Result<CaSigningKey> {
    let mut cursor = Cursor::new(pem_str.as_bytes());

    loop {
        let item = rustls_pemfile::read_one(&mut cursor).map_err(|e| {
            IssuerError::Configuration(format!("Failed to read CA key PEM: {}", e))
        })?;

        match item {
            Some(Item::Pkcs8Key(key)) => return CaSigningKey::from_pkcs8_der(key.secret_pkcs8_der()),
            Some(Item::Pkcs1Key(key)) => return CaSigningKey::from_pkcs1_der(key.secret_pkcs1_der()),
            Some(Item::Sec1Key(key)) => return CaSigningKey::from_sec1_der(key.secret_sec1_der()),
            Some(_) => continue,
            None => {
                return Err(IssuerError::Configuration(
                    "No private key found in CA key file".to_string(),
                ))
            }
        }
    }
}

/// Load every certificate in a PEM document, in file order.
pub fn load_certificates_from_pem(pem_str: &str) -> Result<Vec<Vec<u8>>> {
    let mut cursor = Cursor::new(pem_str.as_bytes());
    let mut certificates = Vec::new();

    loop {
        match rustls_pemfile::read_one(&mut cursor).map_err(|e| {
            IssuerError::Configuration(format!("Failed to read certificate PEM: {}", e))
        })? {
            Some(Item::X509Certificate(cert_der)) => {
                certificates.push(cert_der.to_vec());
            }
            Some(_) => continue,
            None => break,
        }
    }

    if certificates.is_empty() {
        return Err(IssuerError::Configuration(
            "No certificates found in CA certificate file".to_string(),
        ));
    }

    Ok(certificates)
}

fn find_subject_key_identifier(certificate: &Certificate) -> Result<Option<OctetString>> {
    let extensions = match &certificate.tbs_certificate.extensions {
        Some(extensions) => extensions,
        None => return Ok(None),
    };

    extensions
        .iter()
        .find(|ext| ext.extn_id == rfc5280::ID_CE_SUBJECT_KEY_IDENTIFIER)
        .map(|ext| {
            SubjectKeyIdentifier::from_der(ext.extn_value.as_bytes())
                .map(|ski| ski.0)
                .map_err(|e| {
                    IssuerError::Configuration(format!(
                        "Invalid subjectKeyIdentifier on CA certificate: {}",
                        e
                    ))
                })
        })
        .transpose()
}
