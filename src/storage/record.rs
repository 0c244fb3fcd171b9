//! The ledger record for one issued certificate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One successful issuance, as stored in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// Issuance identifier, also the artifact file stem.
    pub id: String,

    /// First CN of the subject.
    pub common_name: String,

    /// Subject DN in RFC 4514 form.
    pub subject: String,

    /// Issuer DN in RFC 4514 form.
    pub issuer: String,

    /// Stored CSR artifact name.
    pub csr_filename: String,

    /// Stored certificate artifact name.
    pub cert_filename: String,

    pub issue_time: DateTime<Utc>,

    pub expire_time: DateTime<Utc>,

    /// Certificate serial number; unique across the ledger.
    pub serial_number: u64,
}

impl IssuedCertificate {
    /// Serial as uppercase hex, the way `openssl x509 -serial` prints it.
    pub fn serial_hex(&self) -> String {
        let bytes = self.serial_number.to_be_bytes();
        let first = bytes
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(bytes.len() - 1);
        hex::encode_upper(&bytes[first..])
    }

    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.expire_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(serial: u64) -> IssuedCertificate {
        let issued = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        IssuedCertificate {
            id: "0b6f6a43-2f7e-4a6c-9d0e-3c1e6b7b8a11".to_string(),
            common_name: "alice.example.com".to_string(),
            subject: "CN=alice.example.com".to_string(),
            issuer: "CN=Test Intermediate CA".to_string(),
            csr_filename: "0b6f6a43-2f7e-4a6c-9d0e-3c1e6b7b8a11.csr".to_string(),
            cert_filename: "0b6f6a43-2f7e-4a6c-9d0e-3c1e6b7b8a11.crt".to_string(),
            issue_time: issued,
            expire_time: issued + chrono::Duration::days(365),
            serial_number: serial,
        }
    }

    #[test]
    fn test_serial_hex() {
        assert_eq!(record(1).serial_hex(), "01");
        assert_eq!(record(0x1234_abcd).serial_hex(), "1234ABCD");
    }

    #[test]
    fn test_expiry() {
        let record = record(1);
        assert!(!record.is_expired_at(record.issue_time));
        assert!(record.is_expired_at(record.expire_time));
    }

    #[test]
    fn test_json_roundtrip() {
        let record = record(0x7fff_ffff_ffff_ffff);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"serial_number\":9223372036854775807"));
        let parsed: IssuedCertificate = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
