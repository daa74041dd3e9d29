//! SQLite-backed preference store.
//!
//! Both endpoints keep their user-entered settings in a small key-value
//! table: the handset owns the alert preferences (destination number,
//! message text, location/notification flags) and the watch keeps the synced
//! confirmation-button flag. Values are stored as text; booleans as
//! "true"/"false".

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

// Preference keys. Names are part of the on-disk format; do not rename.
pub const PREF_KEY_SMS_NUMBER: &str = "_contact_phone_number";
pub const PREF_KEY_SMS_MESSAGE: &str = "_sms_emergency_message";
pub const PREF_KEY_SEND_LOCATION: &str = "_sms_send_location";
pub const PREF_KEY_SHOW_NOTIFICATION: &str = "_show_notification";
pub const PREF_KEY_USE_CONFIRMATION_BTN: &str = "_pref_use_confirmation_btn";

/// Message body used when the user never customised one.
pub const DEFAULT_EMERGENCY_MESSAGE: &str =
    "This is an emergency! I need help, please contact me as soon as possible.";

#[derive(Debug)]
pub enum StorageError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            StorageError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Sqlite(e)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

/// Alert preferences as read by the dispatcher at trigger time.
///
/// Always the latest stored values; there is no snapshotting or versioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertPreferences {
    pub sms_number: String,
    pub sms_message: String,
    pub include_location: bool,
    pub show_notification: bool,
}

impl AlertPreferences {
    pub fn load(storage: &Storage) -> Result<Self, StorageError> {
        Ok(Self {
            sms_number: storage.get(PREF_KEY_SMS_NUMBER)?.unwrap_or_default(),
            sms_message: storage
                .get(PREF_KEY_SMS_MESSAGE)?
                .unwrap_or_else(|| DEFAULT_EMERGENCY_MESSAGE.to_string()),
            include_location: storage.get_bool(PREF_KEY_SEND_LOCATION, true)?,
            show_notification: storage.get_bool(PREF_KEY_SHOW_NOTIFICATION, true)?,
        })
    }

    /// A configuration error: no destination or nothing to say.
    pub fn is_incomplete(&self) -> bool {
        self.sms_number.trim().is_empty() || self.sms_message.trim().is_empty()
    }
}

/// Key-value preference storage backed by SQLite.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS preferences (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO preferences (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, StorageError> {
        Ok(self
            .get(key)?
            .map(|value| value == "true")
            .unwrap_or(default))
    }

    pub fn set_bool(&self, key: &str, value: bool) -> Result<(), StorageError> {
        self.set(key, if value { "true" } else { "false" })
    }

    /// Watch side: whether confirmation requires an explicit button press.
    /// Defaults to false (auto-confirm after the countdown).
    pub fn use_confirmation_button(&self) -> Result<bool, StorageError> {
        self.get_bool(PREF_KEY_USE_CONFIRMATION_BTN, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip_and_overwrite() {
        let storage = Storage::open_in_memory().expect("open storage");
        assert_eq!(storage.get("missing").expect("get"), None);

        storage.set(PREF_KEY_SMS_NUMBER, "+15551234567").expect("set");
        assert_eq!(
            storage.get(PREF_KEY_SMS_NUMBER).expect("get"),
            Some("+15551234567".to_string())
        );

        storage.set(PREF_KEY_SMS_NUMBER, "+15557654321").expect("set");
        assert_eq!(
            storage.get(PREF_KEY_SMS_NUMBER).expect("get"),
            Some("+15557654321".to_string())
        );
    }

    #[test]
    fn preferences_defaults() {
        let storage = Storage::open_in_memory().expect("open storage");
        let prefs = AlertPreferences::load(&storage).expect("load prefs");
        assert!(prefs.sms_number.is_empty());
        assert_eq!(prefs.sms_message, DEFAULT_EMERGENCY_MESSAGE);
        assert!(prefs.include_location);
        assert!(prefs.show_notification);
        assert!(prefs.is_incomplete());
    }

    #[test]
    fn preferences_complete_when_number_set() {
        let storage = Storage::open_in_memory().expect("open storage");
        storage.set(PREF_KEY_SMS_NUMBER, "+15551234567").expect("set");
        let prefs = AlertPreferences::load(&storage).expect("load prefs");
        assert!(!prefs.is_incomplete());
    }

    #[test]
    fn confirmation_button_defaults_to_auto() {
        let storage = Storage::open_in_memory().expect("open storage");
        assert!(!storage.use_confirmation_button().expect("get"));
        storage
            .set_bool(PREF_KEY_USE_CONFIRMATION_BTN, true)
            .expect("set");
        assert!(storage.use_confirmation_button().expect("get"));
    }
}
