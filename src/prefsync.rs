//! Handset-to-watch preference sync.
//!
//! The handset publishes its confirmation-mode setting as a data record at
//! [`PREFERENCES_RECORD_PATH`]; the watch polls the record and folds changes
//! into its local store. Sync is one-directional and last-write-wins, and
//! only change events are applied: the listener remembers the last record
//! revision it consumed and ignores anything at or below it, so a restarted
//! poll loop does not replay an old snapshot over fresher local state.

use crate::protocol::{ConfirmationRecord, PREFERENCES_RECORD_PATH};
use crate::storage::{Storage, StorageError, PREF_KEY_USE_CONFIRMATION_BTN};
use crate::transport::{PairingTransport, TransportError};
use crate::wlog;

/// Handset side: publish the current confirmation mode.
///
/// Called whenever the user flips the setting, and once on startup so a
/// freshly paired watch converges without waiting for the next change.
pub fn publish_confirmation_mode(
    transport: &dyn PairingTransport,
    use_button: bool,
) -> Result<(), TransportError> {
    let record = ConfirmationRecord {
        use_button_confirmation: use_button,
    };
    transport.put_record(PREFERENCES_RECORD_PATH, record.to_value())?;
    wlog!("prefsync: published confirmation mode, use_button={use_button}");
    Ok(())
}

#[derive(Debug)]
pub enum SyncError {
    Transport(TransportError),
    Storage(StorageError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Transport(e) => write!(f, "transport error: {e}"),
            SyncError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<TransportError> for SyncError {
    fn from(e: TransportError) -> Self {
        SyncError::Transport(e)
    }
}

impl From<StorageError> for SyncError {
    fn from(e: StorageError) -> Self {
        SyncError::Storage(e)
    }
}

/// Watch side: applies confirmation-record changes to local storage.
pub struct ConfirmationSyncListener<T: PairingTransport> {
    transport: T,
    storage: Storage,
    last_revision: u64,
}

impl<T: PairingTransport> ConfirmationSyncListener<T> {
    pub fn new(transport: T, storage: Storage) -> Self {
        Self {
            transport,
            storage,
            last_revision: 0,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// One poll cycle. Returns `Ok(true)` when a change was applied.
    ///
    /// A missing record is not a change: deletion of the preference record
    /// leaves the watch's last-synced value in place.
    pub fn poll_once(&mut self) -> Result<bool, SyncError> {
        let snapshot = match self.transport.fetch_record(PREFERENCES_RECORD_PATH)? {
            Some(snapshot) => snapshot,
            None => return Ok(false),
        };
        if snapshot.revision <= self.last_revision {
            return Ok(false);
        }

        let record = ConfirmationRecord::from_value(&snapshot.value);
        self.storage
            .set_bool(PREF_KEY_USE_CONFIRMATION_BTN, record.use_button_confirmation)?;
        self.last_revision = snapshot.revision;
        wlog!(
            "prefsync: applied confirmation mode revision {}, use_button={}",
            snapshot.revision,
            record.use_button_confirmation
        );
        Ok(true)
    }
}
