//! Wrist-to-handset emergency alert coordination.
//!
//! A watch endpoint turns a confirmed gesture into an alert signal, a
//! pairing relay carries signals and synced preference records between
//! paired devices, and a handset endpoint turns received signals into SMS
//! messages, a notification, and a bounded live-location fetch.

pub mod dispatcher;
pub mod location;
pub mod logging;
pub mod prefsync;
pub mod protocol;
pub mod relay;
pub mod sim;
pub mod sms;
pub mod storage;
pub mod transport;
pub mod trigger;
