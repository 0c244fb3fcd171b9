//! X.509 certificate signing using x509-cert.
//!
//! The [`SigningEngine`] owns the intermediate CA's key and turns a decoded
//! CSR plus an allocated identity into a signed end-entity certificate:
//!
//! - subject and public key are copied from the CSR unchanged
//! - issuer is the CA certificate's subject
//! - basicConstraints (cA=false, critical) is always added, as is
//!   authorityKeyIdentifier when the CA certificate has a subjectKeyIdentifier
//! - requested extensions pass through [`ExtensionPolicy`]
//!
//! Signing is synchronous and deterministic given its inputs (apart from
//! RSA blinding), so a caller can never observe a half-built certificate.

use crate::cert::csr::SigningRequest;
use crate::cert::extensions::ExtensionPolicy;
use crate::cert::loader::CaKeyMaterial;
use crate::cert::serial::Identity;
use crate::crypto::keys::{CaSigningKey, SignatureDigest};
use crate::error::{IssuerError, Result, SignError};
use const_oid::db::rfc5280;
use der::asn1::{BitString, OctetString};
use der::{Decode, Encode};
use x509_cert::certificate::{Certificate, Version};
use x509_cert::ext::pkix::{AuthorityKeyIdentifier, BasicConstraints};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::TbsCertificate;

/// Signs end-entity certificates with the intermediate CA key.
#[derive(Debug)]
pub struct SigningEngine {
    material: CaKeyMaterial,
    policy: ExtensionPolicy,
    digest: SignatureDigest,
}

impl SigningEngine {
    /// # Errors
    ///
    /// `Configuration` if the digest cannot be used with the CA key type.
    pub fn new(
        material: CaKeyMaterial,
        policy: ExtensionPolicy,
        digest: SignatureDigest,
    ) -> Result<Self> {
        material.key().check_digest(digest)?;

        Ok(Self {
            material,
            policy,
            digest,
        })
    }

    /// Issuer name stamped on every certificate.
    pub fn issuer(&self) -> &Name {
        self.material.subject()
    }

    /// The intermediate certificate, PEM encoded.
    pub fn ca_certificate_pem(&self) -> &str {
        self.material.certificate_pem()
    }

    pub fn policy(&self) -> &ExtensionPolicy {
        &self.policy
    }

    pub fn digest(&self) -> SignatureDigest {
        self.digest
    }

    /// Build and sign a certificate for `request` using `identity`.
    pub fn sign(
        &self,
        request: &SigningRequest,
        identity: &Identity,
    ) -> std::result::Result<Certificate, SignError> {
        let mut extensions = self.ca_asserted_extensions()?;
        extensions.extend(self.policy.filter(&request.extensions)?);

        let signature_algorithm = self.material.key().signature_algorithm(self.digest);

        let tbs = TbsCertificate {
            version: Version::V3,
            serial_number: identity.serial_number()?,
            signature: signature_algorithm.clone(),
            issuer: self.issuer().clone(),
            validity: identity.validity()?,
            subject: request.subject.clone(),
            subject_public_key_info: request.public_key.clone(),
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: Some(extensions),
        };

        let signature = sign_tbs(&tbs, self.material.key(), self.digest)?;

        Ok(Certificate {
            tbs_certificate: tbs,
            signature_algorithm,
            signature,
        })
    }

    fn ca_asserted_extensions(&self) -> std::result::Result<Vec<Extension>, SignError> {
        let basic_constraints = BasicConstraints {
            ca: false,
            path_len_constraint: None,
        };
        let mut extensions = vec![encode_extension(
            rfc5280::ID_CE_BASIC_CONSTRAINTS,
            true,
            &basic_constraints,
        )?];

        if let Some(key_id) = self.material.subject_key_identifier() {
            let authority_key_id = AuthorityKeyIdentifier {
                key_identifier: Some(key_id.clone()),
                authority_cert_issuer: None,
                authority_cert_serial_number: None,
            };
            extensions.push(encode_extension(
                rfc5280::ID_CE_AUTHORITY_KEY_IDENTIFIER,
                false,
                &authority_key_id,
            )?);
        }

        Ok(extensions)
    }
}

/// Convert a Certificate to PEM format.
pub fn cert_to_pem(cert: &Certificate) -> std::result::Result<String, SignError> {
    let der = cert
        .to_der()
        .map_err(|e| SignError::Encoding(format!("Failed to encode certificate: {}", e)))?;

    Ok(pem::encode(&pem::Pem::new("CERTIFICATE", der)))
}

/// Load a Certificate from PEM format.
pub fn cert_from_pem(pem_str: &str) -> Result<Certificate> {
    let pem = pem::parse(pem_str)
        .map_err(|e| IssuerError::Configuration(format!("Failed to parse PEM: {}", e)))?;

    if pem.tag() != "CERTIFICATE" {
        return Err(IssuerError::Configuration(format!(
            "Expected CERTIFICATE, got {}",
            pem.tag()
        )));
    }

    Certificate::from_der(pem.contents()).map_err(|e| {
        IssuerError::Configuration(format!("Failed to decode certificate: {}", e))
    })
}

fn encode_extension<T: Encode>(
    oid: const_oid::ObjectIdentifier,
    critical: bool,
    value: &T,
) -> std::result::Result<Extension, SignError> {
    let der = value
        .to_der()
        .map_err(|e| SignError::Encoding(format!("Failed to encode extension {}: {}", oid, e)))?;
    let extn_value = OctetString::new(der)
        .map_err(|e| SignError::Encoding(format!("Failed to wrap extension {}: {}", oid, e)))?;

    Ok(Extension {
        extn_id: oid,
        critical,
        extn_value,
    })
}

fn sign_tbs(
    tbs: &TbsCertificate,
    key: &CaSigningKey,
    digest: SignatureDigest,
) -> std::result::Result<BitString, SignError> {
    let tbs_der = tbs
        .to_der()
        .map_err(|e| SignError::Encoding(format!("Failed to encode TBS: {}", e)))?;

    let signature = key.sign(digest, &tbs_der)?;

    BitString::from_bytes(&signature).map_err(|e| {
        SignError::Encoding(format!("Failed to create signature bitstring: {}", e))
    })
}
