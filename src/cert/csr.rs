//! PKCS#10 certificate signing request decoding.
//!
//! [`decode`] turns PEM bytes into a [`SigningRequest`]: the subject, the
//! requester's public key and every extension the requester asked for. The
//! decoder does not judge extensions; that is the signing engine's job.

use crate::crypto::verify::verify_signature;
use crate::error::DecodeError;
use const_oid::db::rfc4519;
use const_oid::AssociatedOid;
use der::{Decode, Encode, Tag, Tagged};
use spki::SubjectPublicKeyInfoOwned;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::request::{CertReq, ExtensionReq};

/// PEM labels accepted for a PKCS#10 request.
const CSR_PEM_TAGS: [&str; 2] = ["CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST"];

/// A decoded, signature-checked certificate signing request.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    /// The PEM bytes exactly as received
    pub raw_pem: Vec<u8>,

    /// Subject distinguished name, in encoding order
    pub subject: Name,

    /// First Common Name in the subject
    pub common_name: String,

    /// Requester's public key
    pub public_key: SubjectPublicKeyInfoOwned,

    /// Extensions from the `extensionRequest` attribute, unfiltered
    pub extensions: Vec<Extension>,
}

/// Decode and validate a PEM-encoded CSR.
///
/// # Errors
///
/// - [`DecodeError::MalformedCsr`] for bad PEM, a non-CSR PEM block or invalid ASN.1
/// - [`DecodeError::MissingCommonName`] when the subject has no CN
/// - [`DecodeError::InvalidSignature`] when the self-signature does not verify
/// - [`DecodeError::UnsupportedAlgorithm`] for signature schemes we cannot check
pub fn decode(pem_bytes: &[u8]) -> Result<SigningRequest, DecodeError> {
    let block = pem::parse(pem_bytes)
        .map_err(|e| DecodeError::MalformedCsr(format!("Failed to parse PEM: {}", e)))?;

    if !CSR_PEM_TAGS.contains(&block.tag()) {
        return Err(DecodeError::MalformedCsr(format!(
            "Expected CERTIFICATE REQUEST, got {}",
            block.tag()
        )));
    }

    let request = CertReq::from_der(block.contents())
        .map_err(|e| DecodeError::MalformedCsr(format!("Failed to decode PKCS#10: {}", e)))?;

    let common_name = first_common_name(&request.info.subject)?;
    let extensions = requested_extensions(&request)?;
    verify_proof_of_possession(&request)?;

    Ok(SigningRequest {
        raw_pem: pem_bytes.to_vec(),
        subject: request.info.subject,
        common_name,
        public_key: request.info.public_key,
        extensions,
    })
}

/// Return the first CN in subject encoding order.
///
/// Several CN values are legal in a DN; taking the first one is a fixed
/// tie-break, not an error.
pub fn first_common_name(subject: &Name) -> Result<String, DecodeError> {
    subject
        .0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|atv| atv.oid == rfc4519::CN)
        .ok_or(DecodeError::MissingCommonName)
        .and_then(directory_string)
}

fn directory_string(atv: &AttributeTypeAndValue) -> Result<String, DecodeError> {
    let bytes = atv.value.value();

    match atv.value.tag() {
        Tag::Utf8String | Tag::PrintableString | Tag::Ia5String => {
            String::from_utf8(bytes.to_vec()).map_err(|e| {
                DecodeError::MalformedCsr(format!("Common Name is not valid text: {}", e))
            })
        }
        // T.61 in practice carries Latin-1
        Tag::TeletexString => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        Tag::BmpString => {
            if bytes.len() % 2 != 0 {
                return Err(DecodeError::MalformedCsr(
                    "BMPString Common Name has odd length".to_string(),
                ));
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units).map_err(|e| {
                DecodeError::MalformedCsr(format!("Common Name is not valid UCS-2: {}", e))
            })
        }
        other => Err(DecodeError::MalformedCsr(format!(
            "Unsupported Common Name string type: {}",
            other
        ))),
    }
}

fn requested_extensions(request: &CertReq) -> Result<Vec<Extension>, DecodeError> {
    let mut extensions = Vec::new();

    for attribute in request.info.attributes.iter() {
        if attribute.oid != ExtensionReq::OID {
            continue;
        }
        for value in attribute.values.iter() {
            let der = value.to_der().map_err(|e| {
                DecodeError::MalformedCsr(format!("Failed to re-encode extensionRequest: {}", e))
            })?;
            let requested = ExtensionReq::from_der(&der).map_err(|e| {
                DecodeError::MalformedCsr(format!("Invalid extensionRequest: {}", e))
            })?;
            extensions.extend(requested.0);
        }
    }

    Ok(extensions)
}

fn verify_proof_of_possession(request: &CertReq) -> Result<(), DecodeError> {
    let info_der = request
        .info
        .to_der()
        .map_err(|e| DecodeError::MalformedCsr(format!("Failed to encode CSR info: {}", e)))?;
    let signature = request.signature.as_bytes().ok_or_else(|| {
        DecodeError::MalformedCsr("Signature has unused bits".to_string())
    })?;

    verify_signature(
        &request.info.public_key,
        &request.algorithm,
        &info_der,
        signature,
    )
}
