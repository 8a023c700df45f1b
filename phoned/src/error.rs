//! Daemon error type.

use std::path::PathBuf;

use phoned_dbus::{AddressError, BusError};

/// Errors surfaced by daemon operations and public methods.
#[derive(Debug, thiserror::Error)]
pub enum PhoneError {
    #[error("Invalid MAC address")]
    InvalidAddress(#[from] AddressError),
    #[error("No active modem set")]
    NoModem,
    #[error("No active call")]
    NoActiveCall,
    #[error("Already active call")]
    CallInProgress,
    #[error("Session not created")]
    NoSession,
    #[error("No remote device selected")]
    NoRemoteDevice,
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Daemon is shutting down")]
    Unavailable,
}

pub type Result<T> = std::result::Result<T, PhoneError>;

impl From<PhoneError> for zbus::fdo::Error {
    fn from(err: PhoneError) -> Self {
        zbus::fdo::Error::Failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_public_protocol() {
        assert_eq!(PhoneError::NoModem.to_string(), "No active modem set");
        assert_eq!(PhoneError::CallInProgress.to_string(), "Already active call");
        assert_eq!(PhoneError::NoActiveCall.to_string(), "No active call");

        let err = PhoneError::from(AddressError::Invalid("xx".into()));
        assert_eq!(err.to_string(), "Invalid MAC address");
    }

    #[test]
    fn test_converts_to_fdo_failed() {
        let fdo: zbus::fdo::Error = PhoneError::NoActiveCall.into();
        assert!(matches!(fdo, zbus::fdo::Error::Failed(msg) if msg == "No active call"));
    }
}
