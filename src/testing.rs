//! Fixtures for unit tests: throwaway CAs and CSRs.

use const_oid::db::{rfc4519, rfc8410};
use der::asn1::{BitString, SetOfVec, Utf8StringRef};
use der::{Decode, Encode};
use ed25519_dalek::Signer;
use pkcs8::EncodePublicKey;
use rand::rngs::OsRng;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CustomExtension, DistinguishedName, DnType,
    IsCa, KeyUsagePurpose, SignatureAlgorithm,
};
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{RdnSequence, RelativeDistinguishedName};
use x509_cert::request::{CertReq, CertReqInfo, Version};

use crate::cert::loader::CaKeyMaterial;

pub(crate) struct TestCa {
    pub key_pem: String,
    pub cert_pem: String,
}

impl TestCa {
    pub fn material(&self) -> CaKeyMaterial {
        CaKeyMaterial::from_pem(&self.key_pem, &self.cert_pem).unwrap()
    }
}

fn ca_params(alg: &'static SignatureAlgorithm) -> CertificateParams {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "Test Intermediate CA");
    dn.push(DnType::OrganizationName, "Example Org");

    let mut params = CertificateParams::default();
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.alg = alg;
    params
}

pub(crate) fn test_ca(alg: &'static SignatureAlgorithm) -> TestCa {
    let cert = Certificate::from_params(ca_params(alg)).unwrap();
    TestCa {
        key_pem: cert.serialize_private_key_pem(),
        cert_pem: cert.serialize_pem().unwrap(),
    }
}

/// RSA-2048 CA. The key PEM is PKCS#1 (`RSA PRIVATE KEY`), as OpenSSL
/// writes it.
pub(crate) fn rsa_ca() -> TestCa {
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};

    let private = rsa::RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
    let pkcs8_pem = private.to_pkcs8_pem(LineEnding::LF).unwrap();

    let mut params = ca_params(&rcgen::PKCS_RSA_SHA256);
    params.key_pair = Some(rcgen::KeyPair::from_pem(&pkcs8_pem).unwrap());
    let cert = Certificate::from_params(params).unwrap();

    TestCa {
        key_pem: private.to_pkcs1_pem(LineEnding::LF).unwrap().to_string(),
        cert_pem: cert.serialize_pem().unwrap(),
    }
}

/// Re-encode a PKCS#8 P-256 key PEM as SEC1 (`EC PRIVATE KEY`).
pub(crate) fn sec1_key_pem(pkcs8_pem: &str) -> String {
    use pkcs8::DecodePrivateKey;

    let pkcs8 = pem::parse(pkcs8_pem).unwrap();
    let secret = p256::SecretKey::from_pkcs8_der(pkcs8.contents()).unwrap();
    let der = secret.to_sec1_der().unwrap();
    pem::encode(&pem::Pem::new("EC PRIVATE KEY", der.to_vec()))
}

pub(crate) fn p256_ca() -> TestCa {
    test_ca(&rcgen::PKCS_ECDSA_P256_SHA256)
}

pub(crate) fn ed25519_ca() -> TestCa {
    test_ca(&rcgen::PKCS_ED25519)
}

fn csr_pem(
    alg: &'static SignatureAlgorithm,
    cn: &str,
    sans: &[&str],
    custom: Vec<CustomExtension>,
) -> String {
    let mut params =
        CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    params.custom_extensions = custom;
    params.alg = alg;

    Certificate::from_params(params)
        .unwrap()
        .serialize_request_pem()
        .unwrap()
}

/// CSR with a fresh P-256 key.
pub(crate) fn p256_csr(cn: &str, sans: &[&str], custom: Vec<CustomExtension>) -> String {
    csr_pem(&rcgen::PKCS_ECDSA_P256_SHA256, cn, sans, custom)
}

/// CSR with a fresh P-384 key, signed ecdsa-with-SHA384.
pub(crate) fn p384_csr(cn: &str) -> String {
    csr_pem(&rcgen::PKCS_ECDSA_P384_SHA384, cn, &[], vec![])
}

/// CSR with a fresh Ed25519 key and no extensions.
pub(crate) fn ed25519_csr(cn: &str) -> String {
    csr_pem(&rcgen::PKCS_ED25519, cn, &[], vec![])
}

/// keyUsage = digitalSignature, keyEncipherment
pub(crate) fn key_usage_extension() -> CustomExtension {
    CustomExtension::from_oid_content(&[2, 5, 29, 15], vec![0x03, 0x02, 0x05, 0xa0])
}

/// A private-arc extension no allow-list knows about.
pub(crate) fn private_extension() -> CustomExtension {
    CustomExtension::from_oid_content(&[1, 3, 6, 1, 4, 1, 55555, 1], vec![0x05, 0x00])
}

/// Hand-built Ed25519 CSR with one RDN per attribute, in the given order.
///
/// `tamper` flips a byte of the signature after signing.
pub(crate) fn csr_with_subject(attrs: &[(&str, &str)], tamper: bool) -> String {
    let key = ed25519_dalek::SigningKey::generate(&mut OsRng);

    let rdns = attrs
        .iter()
        .map(|(kind, value)| {
            let oid = match *kind {
                "CN" => rfc4519::CN,
                "O" => rfc4519::O,
                other => panic!("unsupported attribute {}", other),
            };
            let atv = AttributeTypeAndValue {
                oid,
                value: Utf8StringRef::new(value).unwrap().into(),
            };
            let mut set = SetOfVec::new();
            set.insert_ordered(atv).unwrap();
            RelativeDistinguishedName::from(set)
        })
        .collect();

    let spki_der = key.verifying_key().to_public_key_der().unwrap();
    let info = CertReqInfo {
        version: Version::V1,
        subject: RdnSequence(rdns),
        public_key: SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes()).unwrap(),
        attributes: Default::default(),
    };

    let mut signature = key.sign(&info.to_der().unwrap()).to_bytes();
    if tamper {
        signature[0] ^= 0xff;
    }

    let request = CertReq {
        info,
        algorithm: AlgorithmIdentifierOwned {
            oid: rfc8410::ID_ED_25519,
            parameters: None,
        },
        signature: BitString::from_bytes(&signature).unwrap(),
    };

    pem::encode(&pem::Pem::new(
        "CERTIFICATE REQUEST",
        request.to_der().unwrap(),
    ))
}
