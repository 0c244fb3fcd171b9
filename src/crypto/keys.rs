//! CA signing keys.
//!
//! The intermediate CA may hold an RSA, ECDSA P-256 or Ed25519 key. This
//! module hides which one behind [`CaSigningKey`] so the signing engine only
//! deals with "sign these TBS bytes with the configured digest".

use crate::error::{IssuerError, Result, SignError};
use const_oid::db::{rfc5912, rfc8410};
use const_oid::AssociatedOid;
use der::asn1::Any;
use der::Decode;
use pkcs8::{DecodePrivateKey, EncodePublicKey, PrivateKeyInfo};
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::{RandomizedSigner, SignatureEncoding, Signer};
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use std::fmt;

/// Hash algorithm used in the certificate signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureDigest {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl fmt::Display for SignatureDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignatureDigest::Sha256 => "sha256",
            SignatureDigest::Sha384 => "sha384",
            SignatureDigest::Sha512 => "sha512",
        };
        f.write_str(name)
    }
}

/// The intermediate CA's private key.
///
/// `Debug` prints only the key type.
pub enum CaSigningKey {
    Ed25519(ed25519_dalek::SigningKey),
    EcdsaP256(p256::ecdsa::SigningKey),
    Rsa(RsaPrivateKey),
}

impl fmt::Debug for CaSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CaSigningKey")
            .field(&self.kind())
            .field(&"<redacted>")
            .finish()
    }
}

impl CaSigningKey {
    /// Import a PKCS#8 `PRIVATE KEY` document.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let info = PrivateKeyInfo::from_der(der)
            .map_err(|e| config_error(format!("Invalid PKCS#8 private key: {}", e)))?;
        let oid = info.algorithm.oid;

        if oid == rfc8410::ID_ED_25519 {
            ed25519_dalek::SigningKey::from_pkcs8_der(der)
                .map(CaSigningKey::Ed25519)
                .map_err(|e| config_error(format!("Invalid Ed25519 private key: {}", e)))
        } else if oid == rfc5912::ID_EC_PUBLIC_KEY {
            p256::ecdsa::SigningKey::from_pkcs8_der(der)
                .map(CaSigningKey::EcdsaP256)
                .map_err(|e| {
                    config_error(format!("Unsupported EC private key (P-256 only): {}", e))
                })
        } else if oid == rfc5912::RSA_ENCRYPTION {
            RsaPrivateKey::from_pkcs8_der(der)
                .map(CaSigningKey::Rsa)
                .map_err(|e| config_error(format!("Invalid RSA private key: {}", e)))
        } else {
            Err(config_error(format!(
                "Unsupported CA key algorithm: {}",
                oid
            )))
        }
    }

    /// Import a PKCS#1 `RSA PRIVATE KEY` document.
    pub fn from_pkcs1_der(der: &[u8]) -> Result<Self> {
        RsaPrivateKey::from_pkcs1_der(der)
            .map(CaSigningKey::Rsa)
            .map_err(|e| config_error(format!("Invalid PKCS#1 RSA private key: {}", e)))
    }

    /// Import a SEC1 `EC PRIVATE KEY` document.
    pub fn from_sec1_der(der: &[u8]) -> Result<Self> {
        let secret = p256::SecretKey::from_sec1_der(der)
            .map_err(|e| config_error(format!("Invalid SEC1 EC private key: {}", e)))?;
        Ok(CaSigningKey::EcdsaP256(p256::ecdsa::SigningKey::from(secret)))
    }

    /// Short name of the key type, safe to log.
    pub fn kind(&self) -> &'static str {
        match self {
            CaSigningKey::Ed25519(_) => "ed25519",
            CaSigningKey::EcdsaP256(_) => "ecdsa-p256",
            CaSigningKey::Rsa(_) => "rsa",
        }
    }

    /// Reject digest/key combinations this engine does not sign with.
    ///
    /// Ed25519 hashes internally, so any configured digest is accepted and
    /// has no effect.
    pub fn check_digest(&self, digest: SignatureDigest) -> Result<()> {
        match (self, digest) {
            (CaSigningKey::EcdsaP256(_), SignatureDigest::Sha256) => Ok(()),
            (CaSigningKey::EcdsaP256(_), other) => Err(config_error(format!(
                "P-256 CA keys sign with sha256 only, configured {}",
                other
            ))),
            _ => Ok(()),
        }
    }

    /// AlgorithmIdentifier placed in both the TBS and the outer certificate.
    pub fn signature_algorithm(&self, digest: SignatureDigest) -> AlgorithmIdentifierOwned {
        match self {
            CaSigningKey::Ed25519(_) => AlgorithmIdentifierOwned {
                oid: rfc8410::ID_ED_25519,
                parameters: None,
            },
            CaSigningKey::EcdsaP256(_) => AlgorithmIdentifierOwned {
                oid: rfc5912::ECDSA_WITH_SHA_256,
                parameters: None,
            },
            CaSigningKey::Rsa(_) => {
                let oid = match digest {
                    SignatureDigest::Sha256 => rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
                    SignatureDigest::Sha384 => rfc5912::SHA_384_WITH_RSA_ENCRYPTION,
                    SignatureDigest::Sha512 => rfc5912::SHA_512_WITH_RSA_ENCRYPTION,
                };
                // RFC 4055: RSA PKCS#1 v1.5 identifiers carry explicit NULL parameters
                AlgorithmIdentifierOwned {
                    oid,
                    parameters: Some(Any::null()),
                }
            }
        }
    }

    /// The SubjectPublicKeyInfo matching this private key.
    pub fn public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned> {
        let document = match self {
            CaSigningKey::Ed25519(key) => key.verifying_key().to_public_key_der(),
            CaSigningKey::EcdsaP256(key) => key.verifying_key().to_public_key_der(),
            CaSigningKey::Rsa(key) => key.to_public_key().to_public_key_der(),
        }
        .map_err(|e| config_error(format!("Failed to encode CA public key: {}", e)))?;

        SubjectPublicKeyInfoOwned::from_der(document.as_bytes())
            .map_err(|e| config_error(format!("Failed to decode CA public key: {}", e)))
    }

    /// Sign `message` (the DER-encoded TBS certificate).
    pub fn sign(
        &self,
        digest: SignatureDigest,
        message: &[u8],
    ) -> std::result::Result<Vec<u8>, SignError> {
        match self {
            CaSigningKey::Ed25519(key) => {
                let signature: ed25519_dalek::Signature =
                    key.try_sign(message).map_err(crypto_error)?;
                Ok(signature.to_vec())
            }
            CaSigningKey::EcdsaP256(key) => {
                let signature: p256::ecdsa::Signature =
                    key.try_sign(message).map_err(crypto_error)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            CaSigningKey::Rsa(key) => match digest {
                SignatureDigest::Sha256 => sign_rsa::<Sha256>(key, message),
                SignatureDigest::Sha384 => sign_rsa::<Sha384>(key, message),
                SignatureDigest::Sha512 => sign_rsa::<Sha512>(key, message),
            },
        }
    }
}

fn sign_rsa<D>(key: &RsaPrivateKey, message: &[u8]) -> std::result::Result<Vec<u8>, SignError>
where
    D: Digest + AssociatedOid,
{
    let signing_key = rsa::pkcs1v15::SigningKey::<D>::new(key.clone());
    let signature = signing_key
        .try_sign_with_rng(&mut OsRng, message)
        .map_err(crypto_error)?;
    Ok(signature.to_vec())
}

fn crypto_error(e: signature::Error) -> SignError {
    SignError::Crypto(format!("CA signing failed: {}", e))
}

fn config_error(message: String) -> IssuerError {
    IssuerError::Configuration(message)
}
