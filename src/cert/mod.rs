//! Certificate issuance building blocks.
//!
//! A request flows through these modules in order: [`csr`] decodes it,
//! [`serial`] allocates its identity, and [`x509_signing`] signs it with the
//! material from [`loader`] after [`extensions`] has filtered what was asked for.

pub mod csr;
pub mod extensions;
pub mod loader;
pub mod serial;
pub mod x509_signing;
