//! Signature verification against a SubjectPublicKeyInfo.
//!
//! Used to check the proof-of-possession signature on incoming CSRs.

use crate::error::DecodeError;
use const_oid::db::{rfc5912, rfc8410};
use const_oid::AssociatedOid;
use der::Encode;
use pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::hazmat::PrehashVerifier;
use signature::Verifier;
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

/// Verify `signature` over `message` made by the holder of `public_key`.
///
/// Supported algorithms: Ed25519, ecdsa-with-SHA{256,384,512} on P-256 and
/// P-384 keys, and sha{256,384,512}WithRSAEncryption.
pub fn verify_signature(
    public_key: &SubjectPublicKeyInfoOwned,
    algorithm: &AlgorithmIdentifierOwned,
    message: &[u8],
    signature: &[u8],
) -> Result<(), DecodeError> {
    let spki_der = public_key
        .to_der()
        .map_err(|e| DecodeError::MalformedCsr(format!("Failed to encode public key: {}", e)))?;
    let oid = algorithm.oid;

    if oid == rfc8410::ID_ED_25519 {
        let key = ed25519_dalek::VerifyingKey::from_public_key_der(&spki_der)
            .map_err(|_| DecodeError::InvalidSignature)?;
        let signature = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|_| DecodeError::InvalidSignature)?;
        key.verify(message, &signature)
            .map_err(|_| DecodeError::InvalidSignature)
    } else if oid == rfc5912::ECDSA_WITH_SHA_256 {
        verify_ecdsa(&spki_der, &Sha256::digest(message), signature)
    } else if oid == rfc5912::ECDSA_WITH_SHA_384 {
        verify_ecdsa(&spki_der, &Sha384::digest(message), signature)
    } else if oid == rfc5912::ECDSA_WITH_SHA_512 {
        verify_ecdsa(&spki_der, &Sha512::digest(message), signature)
    } else if oid == rfc5912::SHA_256_WITH_RSA_ENCRYPTION {
        verify_rsa::<Sha256>(&spki_der, message, signature)
    } else if oid == rfc5912::SHA_384_WITH_RSA_ENCRYPTION {
        verify_rsa::<Sha384>(&spki_der, message, signature)
    } else if oid == rfc5912::SHA_512_WITH_RSA_ENCRYPTION {
        verify_rsa::<Sha512>(&spki_der, message, signature)
    } else {
        Err(DecodeError::UnsupportedAlgorithm(oid.to_string()))
    }
}

/// ECDSA over a precomputed digest. The curve comes from the key.
fn verify_ecdsa(spki_der: &[u8], prehash: &[u8], signature: &[u8]) -> Result<(), DecodeError> {
    if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_der(spki_der) {
        let signature = p256::ecdsa::Signature::from_der(signature)
            .map_err(|_| DecodeError::InvalidSignature)?;
        return key
            .verify_prehash(prehash, &signature)
            .map_err(|_| DecodeError::InvalidSignature);
    }
    if let Ok(key) = p384::ecdsa::VerifyingKey::from_public_key_der(spki_der) {
        let signature = p384::ecdsa::Signature::from_der(signature)
            .map_err(|_| DecodeError::InvalidSignature)?;
        return key
            .verify_prehash(prehash, &signature)
            .map_err(|_| DecodeError::InvalidSignature);
    }
    Err(DecodeError::UnsupportedAlgorithm(
        "ECDSA keys must be on P-256 or P-384".to_string(),
    ))
}

fn verify_rsa<D>(spki_der: &[u8], message: &[u8], signature: &[u8]) -> Result<(), DecodeError>
where
    D: Digest + AssociatedOid,
{
    let key =
        RsaPublicKey::from_public_key_der(spki_der).map_err(|_| DecodeError::InvalidSignature)?;
    let verifying_key = rsa::pkcs1v15::VerifyingKey::<D>::new(key);
    let signature = rsa::pkcs1v15::Signature::try_from(signature)
        .map_err(|_| DecodeError::InvalidSignature)?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| DecodeError::InvalidSignature)
}
