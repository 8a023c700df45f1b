//! Persistence of the last selected remote device.
//!
//! The file holds one colon-form address on a single line.

use std::path::{Path, PathBuf};

use phoned_dbus::MacAddress;

use crate::error::{PhoneError, Result};

#[derive(Debug, Clone)]
pub struct SelectionStore {
    path: Option<PathBuf>,
}

impl SelectionStore {
    /// `None` disables persistence (no home directory).
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Reads the remembered device. Missing or malformed files yield `None`.
    pub fn load(&self) -> Option<MacAddress> {
        let path = self.path.as_ref()?;
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                return None;
            }
        };

        let line = content.lines().next().unwrap_or_default().trim();
        if line.is_empty() {
            return None;
        }
        match MacAddress::normalize(line) {
            Ok(address) => {
                tracing::info!("Last selected device: {}", address);
                Some(address)
            }
            Err(e) => {
                tracing::warn!("Ignoring stored selection in {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn store(&self, address: &MacAddress) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        std::fs::write(path, format!("{}\n", address)).map_err(|e| PhoneError::Io {
            path: path.clone(),
            source: e,
        })?;
        tracing::debug!("Stored selection {} in {}", address, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_store_and_load() {
        let dir = tempdir().unwrap();
        let store = SelectionStore::new(Some(dir.path().join(".phoned")));
        assert_eq!(store.load(), None);

        let address: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        store.store(&address).unwrap();
        assert_eq!(
            std::fs::read_to_string(store.path().unwrap()).unwrap(),
            "AA:BB:CC:DD:EE:FF\n"
        );
        assert_eq!(store.load(), Some(address));
    }

    #[test]
    fn test_lenient_and_malformed_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("selected");
        let store = SelectionStore::new(Some(path.clone()));

        std::fs::write(&path, "aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(store.load(), "AA:BB:CC:DD:EE:FF".parse().ok());

        std::fs::write(&path, "not an address\n").unwrap();
        assert_eq!(store.load(), None);

        std::fs::write(&path, "\n").unwrap();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_disabled_store() {
        let store = SelectionStore::new(None);
        assert_eq!(store.load(), None);
        let address: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        assert!(store.store(&address).is_ok());
    }

    #[test]
    fn test_write_failure_is_reported() {
        let dir = tempdir().unwrap();
        let store = SelectionStore::new(Some(dir.path().join("missing").join("selected")));
        let address: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        assert!(matches!(store.store(&address), Err(PhoneError::Io { .. })));
    }
}
