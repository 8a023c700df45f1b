//! Centralized constants for timeouts, intervals, and limits.
//!
//! This module provides a single location for the default values used
//! throughout the daemon. Most of them can be overridden in the config file.

/// Exported service identity on the session bus.
pub mod service {
    /// Well-known bus name requested at startup.
    pub const BUS_NAME: &str = "org.tizen.phone";

    /// Interface name of the exported object.
    pub const INTERFACE: &str = "org.tizen.Phone";

    /// Path the service object is served at.
    pub const OBJECT_PATH: &str = "/";
}

/// Watchdog and delay constants.
pub mod timeouts {
    /// A pull that neither completes nor errors within this time is stalled (seconds).
    pub const STALLED_TRANSFER_SECS: u64 = 120;

    /// Interval of the periodic modem power check (seconds).
    /// The only automatic recovery for a modem that dropped power.
    pub const MODEM_WATCHDOG_SECS: u64 = 60;

    /// Delay between a call ending and the call history refresh (milliseconds).
    /// The phone needs a moment to add the entry to its own list.
    pub const CALL_HISTORY_REFRESH_DELAY_MS: u64 = 5000;
}

/// Phonebook synchronization constants.
pub mod sync {
    /// Number of latest call history entries pulled after a call ends.
    pub const CALL_HISTORY_REFRESH_COUNT: u16 = 10;

    /// Card format requested from the phone.
    pub const VCARD_FORMAT: &str = "vcard30";
}

/// Persistence constants.
pub mod persistence {
    /// Name of the last-selected device file in the home directory.
    pub const STATE_FILE_NAME: &str = ".phoned";
}

/// Public notification payload constants.
pub mod notifications {
    /// Error text sent when SelectRemoteDevice gets a malformed address.
    pub const INVALID_ADDRESS: &str = "Invalid MAC address";

    /// Call state reported when no call is tracked.
    pub const NO_CALL_STATE: &str = "disconnected";
}
