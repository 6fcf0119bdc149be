//! Contact Ledger - flat CSV store of contacts and their outreach status.
//!
//! The backing file has no transactions, so every update is a
//! read-modify-write that is re-read and verified before it counts. Two
//! writers implement that shape behind [`LedgerWriter`]:
//!
//! - [`VerifiedWriter`] backs the file up first and restores it on any
//!   failure, so callers see either the whole update or no change.
//! - [`DirectWriter`] skips the backup. It is the operational fallback and
//!   can be invoked on its own through [`ContactLedger::update_direct`].
//!
//! [`EscalatingWriter`] runs primary then fallback. All mutations go through
//! one async mutex per ledger, so concurrent sessions never interleave writes.

use crate::contact::{
    ContactRecord, ContactStatus, ContactUpdate, COLUMN_EMAIL, COLUMN_NAME, COLUMN_PHONE,
    COLUMN_STATUS, HEADERS,
};
use crate::error::{LedgerError, LedgerResult};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Raw byte access to the ledger and its backup slot.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn exists(&self) -> io::Result<bool>;
    async fn read(&self) -> io::Result<Vec<u8>>;
    /// Replace the whole store.
    async fn write(&self, bytes: &[u8]) -> io::Result<()>;
    /// Copy the current store into the backup slot.
    async fn backup(&self) -> io::Result<()>;
    /// Copy the backup slot over the store.
    async fn restore(&self) -> io::Result<()>;
    /// Remove the backup slot. Missing backup is not an error.
    async fn discard_backup(&self) -> io::Result<()>;
}

/// File-backed store. The backup lives next to the ledger as `<file>.backup`.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    backup_path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let backup_path = sibling(&path, "backup");
        Self { path, backup_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[async_trait]
impl LedgerStore for FileStore {
    async fn exists(&self) -> io::Result<bool> {
        tokio::fs::try_exists(&self.path).await
    }

    async fn read(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }

    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        // Stage then rename so a crash mid-write never leaves a torn ledger.
        let staging = sibling(&self.path, "tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &self.path).await
    }

    async fn backup(&self) -> io::Result<()> {
        tokio::fs::copy(&self.path, &self.backup_path).await.map(|_| ())
    }

    async fn restore(&self) -> io::Result<()> {
        tokio::fs::copy(&self.backup_path, &self.path).await.map(|_| ())
    }

    async fn discard_backup(&self) -> io::Result<()> {
        match tokio::fs::remove_file(&self.backup_path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Parse the full ledger. Blank rows (including the all-empty row some tools
/// emit under the header) are skipped.
///
/// Writes always emit the canonical header, so a named column outside it is
/// rejected rather than dropped on the next update.
pub fn parse_records(bytes: &[u8]) -> LedgerResult<Vec<ContactRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    if let Some(extra) = headers
        .iter()
        .find(|h| !h.is_empty() && !HEADERS.contains(h))
    {
        return Err(LedgerError::UnexpectedColumn(extra.to_string()));
    }
    let column = |name: &str| headers.iter().position(|h| h == name);
    let name_idx = column(COLUMN_NAME).ok_or(LedgerError::MissingColumn(COLUMN_NAME))?;
    let phone_idx = column(COLUMN_PHONE).ok_or(LedgerError::MissingColumn(COLUMN_PHONE))?;
    let email_idx = column(COLUMN_EMAIL);
    let status_idx = column(COLUMN_STATUS);

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        if row.iter().all(|field| field.is_empty()) {
            continue;
        }
        let field = |idx: Option<usize>| idx.and_then(|i| row.get(i)).unwrap_or("");
        let email = field(email_idx);
        records.push(ContactRecord {
            name: field(Some(name_idx)).to_string(),
            phone_number: field(Some(phone_idx)).to_string(),
            email: (!email.is_empty()).then(|| email.to_string()),
            status: field(status_idx).parse::<ContactStatus>()?,
        });
    }
    Ok(records)
}

/// Serialize records with the canonical header row.
pub fn serialize_records(records: &[ContactRecord]) -> LedgerResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADERS)?;
    for record in records {
        writer.write_record([
            record.name.as_str(),
            record.phone_number.as_str(),
            record.email.as_deref().unwrap_or(""),
            record.status.as_str(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| LedgerError::Io(e.into_error()))
}

/// Index of the single record with `phone`. Duplicates are an error.
fn locate(records: &[ContactRecord], phone: &str) -> LedgerResult<usize> {
    let phone = phone.trim();
    let mut hits = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.phone_number == phone)
        .map(|(i, _)| i);
    match (hits.next(), hits.next()) {
        (Some(idx), None) => Ok(idx),
        (Some(_), Some(_)) => Err(LedgerError::DuplicatePhoneNumber(phone.to_string())),
        (None, _) => Err(LedgerError::ContactNotFound(phone.to_string())),
    }
}

/// Read, apply `update` to the one matching record, write everything back.
/// Returns the record set that should now be on disk. `wrote` flips once the
/// store has been touched.
async fn apply_update(
    store: &dyn LedgerStore,
    phone: &str,
    update: &ContactUpdate,
    wrote: &mut bool,
) -> LedgerResult<Vec<ContactRecord>> {
    let bytes = store.read().await?;
    let mut records = parse_records(&bytes)?;
    let idx = locate(&records, phone)?;
    records[idx].apply(update);
    let out = serialize_records(&records)?;
    *wrote = true;
    store.write(&out).await?;
    Ok(records)
}

/// Re-read the store and confirm it holds exactly `expected`.
async fn verify(
    store: &dyn LedgerStore,
    phone: &str,
    update: &ContactUpdate,
    expected: &[ContactRecord],
) -> LedgerResult<()> {
    let failed = |detail: String| LedgerError::VerificationFailed {
        phone: phone.to_string(),
        detail,
    };
    let bytes = store.read().await?;
    let actual = parse_records(&bytes).map_err(|e| failed(format!("re-read failed: {}", e)))?;
    let idx = locate(&actual, phone).map_err(|e| failed(e.to_string()))?;
    if let Some(detail) = actual[idx].mismatch(update) {
        return Err(failed(detail));
    }
    if actual != expected {
        return Err(failed("other ledger rows changed during write".to_string()));
    }
    Ok(())
}

/// One strategy for durably applying a contact update.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn write(
        &self,
        store: &dyn LedgerStore,
        phone: &str,
        update: &ContactUpdate,
    ) -> LedgerResult<()>;
}

/// Backup, write, verify; restore the backup on any failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct VerifiedWriter;

#[async_trait]
impl LedgerWriter for VerifiedWriter {
    fn name(&self) -> &'static str {
        "verified"
    }

    async fn write(
        &self,
        store: &dyn LedgerStore,
        phone: &str,
        update: &ContactUpdate,
    ) -> LedgerResult<()> {
        store.backup().await?;

        let mut wrote = false;
        let result = match apply_update(store, phone, update, &mut wrote).await {
            Ok(expected) => verify(store, phone, update, &expected).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                if let Err(e) = store.discard_backup().await {
                    warn!(phone, error = %e, "Ledger backup could not be removed");
                }
                Ok(())
            }
            Err(err) => {
                if wrote {
                    match store.restore().await {
                        Ok(()) => {
                            warn!(phone, error = %err, "↩️ Ledger restored from backup");
                            let _ = store.discard_backup().await;
                        }
                        Err(restore_err) => {
                            error!(
                                phone,
                                error = %restore_err,
                                "Ledger restore failed; backup left in place"
                            );
                        }
                    }
                } else {
                    let _ = store.discard_backup().await;
                }
                Err(err)
            }
        }
    }
}

/// Write and verify without a backup.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectWriter;

#[async_trait]
impl LedgerWriter for DirectWriter {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn write(
        &self,
        store: &dyn LedgerStore,
        phone: &str,
        update: &ContactUpdate,
    ) -> LedgerResult<()> {
        let mut wrote = false;
        let expected = apply_update(store, phone, update, &mut wrote).await?;
        verify(store, phone, update, &expected).await
    }
}

/// Primary writer first; fallback only when the primary failed while writing
/// or verifying. Lookup failures are final for both.
pub struct EscalatingWriter {
    primary: Box<dyn LedgerWriter>,
    fallback: Box<dyn LedgerWriter>,
}

impl EscalatingWriter {
    pub fn new(primary: Box<dyn LedgerWriter>, fallback: Box<dyn LedgerWriter>) -> Self {
        Self { primary, fallback }
    }
}

impl Default for EscalatingWriter {
    fn default() -> Self {
        Self::new(Box::new(VerifiedWriter), Box::new(DirectWriter))
    }
}

fn escalates(err: &LedgerError) -> bool {
    !matches!(
        err,
        LedgerError::ContactNotFound(_)
            | LedgerError::DuplicatePhoneNumber(_)
            | LedgerError::MissingColumn(_)
            | LedgerError::UnexpectedColumn(_)
            | LedgerError::UnknownStatus(_)
    )
}

#[async_trait]
impl LedgerWriter for EscalatingWriter {
    fn name(&self) -> &'static str {
        "escalating"
    }

    async fn write(
        &self,
        store: &dyn LedgerStore,
        phone: &str,
        update: &ContactUpdate,
    ) -> LedgerResult<()> {
        match self.primary.write(store, phone, update).await {
            Ok(()) => Ok(()),
            Err(err) if escalates(&err) => {
                warn!(
                    phone,
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    error = %err,
                    "⚠️ Primary ledger write failed, trying fallback"
                );
                self.fallback.write(store, phone, update).await
            }
            Err(err) => Err(err),
        }
    }
}

/// The contact ledger: one store, one writer pipeline, one write lock.
pub struct ContactLedger {
    store: Box<dyn LedgerStore>,
    writer: Box<dyn LedgerWriter>,
    fallback: Box<dyn LedgerWriter>,
    lock: Mutex<()>,
}

impl ContactLedger {
    /// Ledger over the CSV file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self::with_store(Box::new(FileStore::new(path)))
    }

    pub fn with_store(store: Box<dyn LedgerStore>) -> Self {
        Self {
            store,
            writer: Box::new(EscalatingWriter::default()),
            fallback: Box::new(DirectWriter),
            lock: Mutex::new(()),
        }
    }

    /// Create a header-only ledger if none exists yet.
    pub async fn ensure_initialized(&self) -> LedgerResult<()> {
        let _guard = self.lock.lock().await;
        if self.store.exists().await? {
            debug!("Ledger file present");
            return Ok(());
        }
        info!("📝 Ledger not found, creating one with headers");
        self.store.write(&serialize_records(&[])?).await?;
        Ok(())
    }

    pub async fn read_all(&self) -> LedgerResult<Vec<ContactRecord>> {
        let _guard = self.lock.lock().await;
        let bytes = self.store.read().await?;
        let records = parse_records(&bytes)?;
        debug!(count = records.len(), "Read contacts from ledger");
        Ok(records)
    }

    /// The record for `phone`, or `None`. Duplicate rows are an error.
    pub async fn find(&self, phone: &str) -> LedgerResult<Option<ContactRecord>> {
        let records = self.read_all().await?;
        match locate(&records, phone) {
            Ok(idx) => Ok(records.into_iter().nth(idx)),
            Err(LedgerError::ContactNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_status(&self, phone: &str) -> LedgerResult<Option<ContactStatus>> {
        Ok(self.find(phone).await?.map(|r| r.status))
    }

    /// Apply `update` through the primary → fallback pipeline.
    pub async fn try_update_by_phone_number(
        &self,
        phone: &str,
        update: &ContactUpdate,
    ) -> LedgerResult<()> {
        let _guard = self.lock.lock().await;
        self.writer.write(self.store.as_ref(), phone, update).await?;
        info!(phone, ?update, "✅ Ledger updated");
        Ok(())
    }

    /// Same as [`Self::try_update_by_phone_number`], reduced to success/failure.
    /// Failures are logged here.
    pub async fn update_by_phone_number(&self, phone: &str, update: &ContactUpdate) -> bool {
        match self.try_update_by_phone_number(phone, update).await {
            Ok(()) => true,
            Err(e) => {
                error!(phone, error = %e, "❌ Ledger update failed");
                false
            }
        }
    }

    /// The fallback path on its own: write and verify, no backup.
    pub async fn update_direct(&self, phone: &str, update: &ContactUpdate) -> LedgerResult<()> {
        let _guard = self.lock.lock().await;
        self.fallback.write(self.store.as_ref(), phone, update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SEED: &str = "Name,Phone Number,Email,Status\n\
        Jane,+15550000,,Pending\n\
        Omar,+15550001,omar@x.com,Call Initiated\n";

    fn seeded(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("contacts.csv");
        std::fs::write(&path, SEED).unwrap();
        path
    }

    /// Drops the email column from every write, simulating a corrupted save.
    struct CorruptingStore {
        inner: FileStore,
        writes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LedgerStore for CorruptingStore {
        async fn exists(&self) -> io::Result<bool> {
            self.inner.exists().await
        }
        async fn read(&self) -> io::Result<Vec<u8>> {
            self.inner.read().await
        }
        async fn write(&self, bytes: &[u8]) -> io::Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let text = String::from_utf8_lossy(bytes).replace("jane@x.com", "");
            self.inner.write(text.as_bytes()).await
        }
        async fn backup(&self) -> io::Result<()> {
            self.inner.backup().await
        }
        async fn restore(&self) -> io::Result<()> {
            self.inner.restore().await
        }
        async fn discard_backup(&self) -> io::Result<()> {
            self.inner.discard_backup().await
        }
    }

    #[tokio::test]
    async fn update_changes_only_requested_fields() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ContactLedger::open(seeded(&dir));

        let before = ledger.read_all().await.unwrap();
        assert!(ledger
            .update_by_phone_number("+15550000", &ContactUpdate::email_collected("jane@x.com"))
            .await);

        let after = ledger.read_all().await.unwrap();
        assert_eq!(after.len(), before.len());
        assert_eq!(after[0].name, "Jane");
        assert_eq!(after[0].email.as_deref(), Some("jane@x.com"));
        assert_eq!(after[0].status, ContactStatus::EmailCollected);
        assert_eq!(after[1], before[1]);
        assert!(!dir.path().join("contacts.csv.backup").exists());
    }

    #[tokio::test]
    async fn missing_contact_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = seeded(&dir);
        let ledger = ContactLedger::open(&path);

        let ok = ledger
            .update_by_phone_number("+19999999", &ContactUpdate::status(ContactStatus::CallFailed))
            .await;
        assert!(!ok);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), SEED);
        assert!(matches!(
            ledger
                .try_update_by_phone_number(
                    "+19999999",
                    &ContactUpdate::status(ContactStatus::CallFailed)
                )
                .await,
            Err(LedgerError::ContactNotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_verification_restores_backup_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = seeded(&dir);
        let store = FileStore::new(&path);
        let corrupting = CorruptingStore {
            inner: store.clone(),
            writes: Arc::new(AtomicUsize::new(0)),
        };

        let err = VerifiedWriter
            .write(&corrupting, "+15550000", &ContactUpdate::email_collected("jane@x.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::VerificationFailed { .. }));
        assert_eq!(corrupting.writes.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), SEED);
        assert!(!store.backup_path().exists());
    }

    #[tokio::test]
    async fn escalation_reaches_fallback_after_verification_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = seeded(&dir);
        let writes = Arc::new(AtomicUsize::new(0));
        let ledger = ContactLedger::with_store(Box::new(CorruptingStore {
            inner: FileStore::new(&path),
            writes: Arc::clone(&writes),
        }));

        let ok = ledger
            .update_by_phone_number("+15550000", &ContactUpdate::email_collected("jane@x.com"))
            .await;

        // Primary and fallback both wrote and both failed verification.
        assert!(!ok);
        assert_eq!(writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn lookup_rejects_duplicate_phone_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contacts.csv");
        std::fs::write(
            &path,
            "Name,Phone Number,Email,Status\nA,+1555,,Pending\nB,+1555,,Pending\n",
        )
        .unwrap();
        let ledger = ContactLedger::open(&path);

        assert!(matches!(
            ledger.get_status("+1555").await,
            Err(LedgerError::DuplicatePhoneNumber(_))
        ));
        assert!(!ledger
            .update_by_phone_number("+1555", &ContactUpdate::status(ContactStatus::CallFailed))
            .await);
    }

    #[tokio::test]
    async fn direct_update_is_independently_invocable() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ContactLedger::open(seeded(&dir));

        ledger
            .update_direct("+15550001", &ContactUpdate::status(ContactStatus::CallFailed))
            .await
            .unwrap();
        assert_eq!(
            ledger.get_status("+15550001").await.unwrap(),
            Some(ContactStatus::CallFailed)
        );
    }

    #[tokio::test]
    async fn initializes_missing_ledger_with_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.csv");
        let ledger = ContactLedger::open(&path);

        ledger.ensure_initialized().await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Name,Phone Number,Email,Status\n"
        );
        assert!(ledger.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_columns_are_rejected_not_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contacts.csv");
        let seed = "Name,Phone Number,Email,Status,Notes\n\
            Jane,+15550000,,Pending,prefers mornings\n";
        std::fs::write(&path, seed).unwrap();
        let ledger = ContactLedger::open(&path);

        assert!(matches!(
            ledger.read_all().await,
            Err(LedgerError::UnexpectedColumn(col)) if col == "Notes"
        ));
        let ok = ledger
            .update_by_phone_number("+15550000", &ContactUpdate::status(ContactStatus::CallFailed))
            .await;
        assert!(!ok);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), seed);
    }

    #[test]
    fn blank_rows_are_skipped() {
        let records = parse_records(b"Name,Phone Number,Email,Status\n,,,\nJane,+1,,\n").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ContactStatus::Pending);
    }
}
