//! ca-issuer: certificate issuance for an intermediate CA
//!
//! This library turns PKCS#10 certificate signing requests into X.509
//! certificates signed by a pre-provisioned intermediate CA key, and keeps a
//! durable ledger of everything it issued. It provides:
//!
//! - CSR decoding with proof-of-possession checks
//! - Random, ledger-enforced unique serial numbers
//! - An extension allow-list between what is requested and what is signed
//! - An orchestrator that either records an issuance or leaves no trace
//!
//! # Architecture
//!
//! Components are small and composed by [`issuer::Issuer`]. Storage sits
//! behind the [`storage::ledger::IssuanceLedger`] and
//! [`storage::artifacts::ArtifactStore`] traits. All operations return
//! `Result` with the error taxonomy in [`error`].
//!
//! # Example
//!
//! ```rust,no_run
//! use ca_issuer::config::IssuerConfig;
//! use ca_issuer::issuer::Issuer;
//! use std::path::Path;
//!
//! # async fn example() -> ca_issuer::Result<()> {
//! let config = IssuerConfig::load(Path::new("ca-issuer.toml"))?;
//! let issuer = Issuer::from_config(&config)?;
//!
//! let csr = std::fs::read("alice.csr").unwrap_or_default();
//! let issuance = issuer.issue(&csr).await?;
//! println!("{} -> serial {}", issuance.id(), issuance.record.serial_hex());
//! # Ok(())
//! # }
//! ```

pub mod cert;
pub mod config;
pub mod crypto;
pub mod error;
pub mod issuer;
pub mod storage;
pub mod upload;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::IssuerConfig;
pub use error::{IssuerError, Result};
pub use issuer::{Issuance, Issuer};
