//! Cryptographic primitives for the issuance engine.
//!
//! - [`keys`]: the intermediate CA's signing key (RSA, ECDSA P-256, Ed25519)
//! - [`verify`]: signature verification used for CSR proof of possession
//!
//! Private keys never leave [`keys::CaSigningKey`]; its `Debug` output is
//! redacted so a stray `{:?}` cannot leak key bytes into logs.

pub mod keys;
pub mod verify;
