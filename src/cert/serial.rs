//! Certificate identity allocation: serial number and validity window.
//!
//! Serials are drawn from the OS random source and masked to a configurable
//! bit width (63 by default, so the DER INTEGER stays positive and fits a
//! signed 64-bit column). Uniqueness is not checked here; the ledger enforces
//! it and the orchestrator re-allocates on conflict.

use crate::error::{IssuerError, Result, SignError};
use chrono::{DateTime, SubsecRound, Utc};
use der::asn1::{GeneralizedTime, UtcTime};
use rand::rngs::OsRng;
use rand::RngCore;
use std::time::Duration;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity};

/// Widest serial this allocator produces.
pub const MAX_SERIAL_BITS: u32 = 63;

/// Zero is not a valid serial; redraw at most this many times.
const MAX_DRAWS: usize = 8;

/// Serial and validity window for one signing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub serial: u64,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl Identity {
    /// Serial as an X.509 `CertificateSerialNumber`.
    pub fn serial_number(&self) -> std::result::Result<SerialNumber, SignError> {
        let bytes = self.serial.to_be_bytes();
        let first = bytes
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(bytes.len() - 1);

        SerialNumber::new(&bytes[first..])
            .map_err(|e| SignError::Encoding(format!("Failed to create serial number: {}", e)))
    }

    /// Validity as X.509 times (UTCTime through 2049, GeneralizedTime after).
    pub fn validity(&self) -> std::result::Result<Validity, SignError> {
        Ok(Validity {
            not_before: to_x509_time(self.not_before)?,
            not_after: to_x509_time(self.not_after)?,
        })
    }
}

/// Hands out identities for signing attempts.
#[derive(Debug, Clone, Copy)]
pub struct IdentityAllocator {
    validity_period: chrono::Duration,
    serial_mask: u64,
}

impl IdentityAllocator {
    /// # Errors
    ///
    /// `Configuration` if the period is not positive or `serial_bits` is
    /// outside `1..=63`.
    pub fn new(validity_period: chrono::Duration, serial_bits: u32) -> Result<Self> {
        if validity_period <= chrono::Duration::zero() {
            return Err(IssuerError::Configuration(
                "Validity period must be positive".to_string(),
            ));
        }
        if serial_bits == 0 || serial_bits > MAX_SERIAL_BITS {
            return Err(IssuerError::Configuration(format!(
                "Serial bit width must be between 1 and {}, got {}",
                MAX_SERIAL_BITS, serial_bits
            )));
        }

        Ok(Self {
            validity_period,
            serial_mask: (1u64 << serial_bits) - 1,
        })
    }

    pub fn validity_period(&self) -> chrono::Duration {
        self.validity_period
    }

    /// Allocate a fresh identity starting at `now`, truncated to the second.
    pub fn allocate(&self, now: DateTime<Utc>) -> Result<Identity> {
        let not_before = now.trunc_subsecs(0);
        let not_after = not_before
            .checked_add_signed(self.validity_period)
            .ok_or_else(|| IssuerError::Allocation("Validity end overflows".to_string()))?;

        Ok(Identity {
            serial: self.draw_serial()?,
            not_before,
            not_after,
        })
    }

    fn draw_serial(&self) -> Result<u64> {
        for _ in 0..MAX_DRAWS {
            let mut bytes = [0u8; 8];
            OsRng.try_fill_bytes(&mut bytes).map_err(|e| {
                IssuerError::Allocation(format!("OS random source failed: {}", e))
            })?;

            let serial = u64::from_be_bytes(bytes) & self.serial_mask;
            if serial != 0 {
                return Ok(serial);
            }
        }

        Err(IssuerError::Allocation(
            "Random source produced only zero serials".to_string(),
        ))
    }
}

/// Read a serial back as `u64`, if it fits.
pub fn serial_to_u64(serial: &SerialNumber) -> Option<u64> {
    let bytes = serial.as_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    let significant = &bytes[first..];

    if significant.len() > 8 {
        return None;
    }
    Some(significant.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

/// Convert an X.509 time back to a chrono timestamp.
pub fn from_x509_time(time: &Time) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(time.to_unix_duration().as_secs()).ok()?;
    DateTime::from_timestamp(secs, 0)
}

fn to_x509_time(at: DateTime<Utc>) -> std::result::Result<Time, SignError> {
    let secs = u64::try_from(at.timestamp())
        .map_err(|_| SignError::Encoding(format!("Time before 1970: {}", at)))?;
    let since_epoch = Duration::from_secs(secs);

    match UtcTime::from_unix_duration(since_epoch) {
        Ok(utc) => Ok(Time::UtcTime(utc)),
        Err(_) => GeneralizedTime::from_unix_duration(since_epoch)
            .map(Time::GeneralTime)
            .map_err(|e| SignError::Encoding(format!("Failed to encode time {}: {}", at, e))),
    }
}
