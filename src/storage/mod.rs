//! Issuance persistence.
//!
//! Two stores, both behind traits so the orchestrator can be tested against
//! failing or conflicting doubles:
//!
//! - [`ledger::IssuanceLedger`]: one [`record::IssuedCertificate`] per issuance,
//!   unique by id and by serial
//! - [`artifacts::ArtifactStore`]: the submitted CSR and the signed certificate

pub mod artifacts;
pub mod ledger;
pub mod record;
