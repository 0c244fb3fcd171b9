//! The issuance ledger: a durable record of every certificate issued.
//!
//! [`JsonFileLedger`] keeps the ledger as one pretty-printed JSON document
//! and rewrites it atomically on each commit: a uniquely named temp file is
//! written and fsynced, renamed over the ledger, and the directory fsynced.
//! Serial uniqueness is checked and the file written under one lock, so two
//! concurrent commits can never both claim a serial.
//!
//! Every commit rewrites the whole document, so a commit costs time linear
//! in the number of records. That suits the volumes one intermediate CA
//! issues; a much larger ledger wants an append-only or database backend
//! behind [`IssuanceLedger`].
//!
//! The file write runs on the blocking pool from a task that owns the whole
//! commit, so a caller that stops waiting (a timeout) never blocks on a
//! stalled disk and never leaves the index out of step with the file. An
//! abandoned commit is not renamed into place unless the rename had already
//! begun.

use crate::error::StorageError;
use crate::storage::record::IssuedCertificate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default ledger filename.
pub const LEDGER_FILENAME: &str = "issued_certificates.json";

/// Durable storage for issuance records.
#[async_trait]
pub trait IssuanceLedger: Send + Sync {
    /// Atomically add a record.
    ///
    /// Fails with [`StorageError::SerialConflict`] if the serial is already
    /// recorded and [`StorageError::DuplicateId`] if the id is. A failed call
    /// leaves the ledger unchanged.
    async fn record(&self, certificate: &IssuedCertificate) -> Result<(), StorageError>;

    /// Fetch a record by id.
    async fn lookup(&self, id: &str) -> Result<IssuedCertificate, StorageError>;

    async fn find_by_serial(&self, serial: u64) -> Result<Option<IssuedCertificate>, StorageError>;

    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<IssuedCertificate>, StorageError>;
}

/// On-disk document layout.
#[derive(Debug, Default, Deserialize)]
struct LedgerDocument {
    certificates: Vec<IssuedCertificate>,
}

#[derive(Serialize)]
struct LedgerDocumentRef<'a> {
    certificates: &'a [IssuedCertificate],
}

#[derive(Debug, Default)]
struct LedgerIndex {
    /// Oldest first.
    records: Vec<IssuedCertificate>,
    by_id: HashMap<String, usize>,
    by_serial: HashMap<u64, usize>,
}

impl LedgerIndex {
    fn get(&self, position: Option<&usize>) -> Option<&IssuedCertificate> {
        position.and_then(|&position| self.records.get(position))
    }

    /// Where `certificate` goes to keep `records` in issue order.
    fn position_for(&self, certificate: &IssuedCertificate) -> usize {
        self.records
            .partition_point(|existing| issue_order(existing, certificate).is_le())
    }

    fn reindex_from(&mut self, start: usize) {
        for (position, certificate) in self.records.iter().enumerate().skip(start) {
            self.by_id.insert(certificate.id.clone(), position);
            self.by_serial.insert(certificate.serial_number, position);
        }
    }
}

fn issue_order(a: &IssuedCertificate, b: &IssuedCertificate) -> cmp::Ordering {
    a.issue_time.cmp(&b.issue_time).then_with(|| a.id.cmp(&b.id))
}

/// A ledger stored in a single JSON file.
#[derive(Debug)]
pub struct JsonFileLedger {
    path: PathBuf,
    index: Arc<Mutex<LedgerIndex>>,
}

impl JsonFileLedger {
    /// Open the ledger at `path`, creating an empty one if it does not exist.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let index = if path.exists() {
            let contents = fs::read_to_string(path)?;
            let document: LedgerDocument = serde_json::from_str(&contents)?;
            build_index(document)?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_vec_pretty(&LedgerDocumentRef { certificates: &[] })?;
            write_document(path, &json, &AtomicBool::new(false))?;
            LedgerIndex::default()
        };

        debug!(path = %path.display(), records = index.records.len(), "Opened issuance ledger");

        Ok(Self {
            path: path.to_path_buf(),
            index: Arc::new(Mutex::new(index)),
        })
    }

    /// Open `<directory>/issued_certificates.json`.
    pub fn open_in(directory: &Path) -> Result<Self, StorageError> {
        Self::open(&directory.join(LEDGER_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Flags a commit as abandoned when the caller stops waiting for it.
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl IssuanceLedger for JsonFileLedger {
    async fn record(&self, certificate: &IssuedCertificate) -> Result<(), StorageError> {
        let abandoned = Arc::new(AtomicBool::new(false));
        let _abandon_on_drop = AbandonOnDrop(abandoned.clone());

        let commit = tokio::spawn(commit_record(
            self.index.clone(),
            self.path.clone(),
            certificate.clone(),
            abandoned,
        ));

        match commit.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(StorageError::Unavailable(format!(
                "Ledger commit cancelled: {}",
                e
            ))),
        }
    }

    async fn lookup(&self, id: &str) -> Result<IssuedCertificate, StorageError> {
        let index = self.index.lock().await;
        index
            .get(index.by_id.get(id))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn find_by_serial(&self, serial: u64) -> Result<Option<IssuedCertificate>, StorageError> {
        let index = self.index.lock().await;
        Ok(index.get(index.by_serial.get(&serial)).cloned())
    }

    async fn list(&self) -> Result<Vec<IssuedCertificate>, StorageError> {
        Ok(self.index.lock().await.records.clone())
    }
}

/// Check, write and index one record. Runs on its own task so the index is
/// only updated together with the file.
async fn commit_record(
    shared: Arc<Mutex<LedgerIndex>>,
    path: PathBuf,
    certificate: IssuedCertificate,
    abandoned: Arc<AtomicBool>,
) -> Result<(), StorageError> {
    let mut index = shared.lock().await;

    if index.by_id.contains_key(&certificate.id) {
        return Err(StorageError::DuplicateId(certificate.id));
    }
    if index.by_serial.contains_key(&certificate.serial_number) {
        return Err(StorageError::SerialConflict(certificate.serial_number));
    }

    let position = index.position_for(&certificate);
    index.records.insert(position, certificate);

    let written = match serde_json::to_vec_pretty(&LedgerDocumentRef {
        certificates: &index.records,
    }) {
        Ok(json) => {
            match tokio::task::spawn_blocking(move || write_document(&path, &json, &abandoned))
                .await
            {
                Ok(result) => result,
                Err(e) => Err(StorageError::Unavailable(format!(
                    "Ledger write task failed: {}",
                    e
                ))),
            }
        }
        Err(e) => Err(e.into()),
    };

    match written {
        Ok(()) => {
            index.reindex_from(position);
            Ok(())
        }
        Err(e) => {
            index.records.remove(position);
            Err(e)
        }
    }
}

fn build_index(document: LedgerDocument) -> Result<LedgerIndex, StorageError> {
    let mut records = document.certificates;
    records.sort_by(issue_order);

    let mut index = LedgerIndex {
        records,
        ..LedgerIndex::default()
    };
    for (position, certificate) in index.records.iter().enumerate() {
        if index
            .by_id
            .insert(certificate.id.clone(), position)
            .is_some()
        {
            return Err(StorageError::Unavailable(format!(
                "Ledger file lists record '{}' twice",
                certificate.id
            )));
        }
        if index
            .by_serial
            .insert(certificate.serial_number, position)
            .is_some()
        {
            return Err(StorageError::Unavailable(format!(
                "Ledger file lists serial {:#x} twice",
                certificate.serial_number
            )));
        }
    }

    Ok(index)
}

/// Replace the file at `path` with `json`: unique temp file, fsync, rename,
/// fsync of the parent directory. Gives up before the rename once
/// `abandoned` is set.
fn write_document(path: &Path, json: &[u8], abandoned: &AtomicBool) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let tmp_path = temp_path(path, parent);

    let mut file = File::create(&tmp_path)?;
    let written = file.write_all(json).and_then(|()| file.sync_all());
    drop(file);
    if let Err(e) = written {
        remove_temp(&tmp_path);
        return Err(e.into());
    }

    if abandoned.load(Ordering::SeqCst) {
        remove_temp(&tmp_path);
        return Err(StorageError::Unavailable(
            "Ledger commit abandoned before rename".to_string(),
        ));
    }

    if let Err(e) = fs::rename(&tmp_path, path) {
        remove_temp(&tmp_path);
        return Err(e.into());
    }
    fsync_dir(parent)?;
    Ok(())
}

fn temp_path(path: &Path, parent: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(LEDGER_FILENAME);
    parent.join(format!(".{}.tmp.{}", file_name, Uuid::new_v4()))
}

fn remove_temp(tmp_path: &Path) {
    if let Err(e) = fs::remove_file(tmp_path) {
        warn!(file = %tmp_path.display(), error = %e, "Failed to remove ledger temp file");
    }
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
