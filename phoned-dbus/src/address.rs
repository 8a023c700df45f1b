//! Bluetooth MAC address handling.
//!
//! Peers spell the same remote device three ways: the colon form
//! `AA:BB:CC:DD:EE:FF` used on the public interface and in BlueZ
//! properties, the raw form `AABBCCDDEEFF` embedded in oFono modem paths,
//! and the underscore form `dev_AA_BB_CC_DD_EE_FF` in BlueZ device paths.
//! [`MacAddress`] is the single normalized representation all of them
//! convert into, so identity checks are plain equality.

use std::fmt;
use std::str::FromStr;

/// Errors raised while normalizing an address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Invalid MAC address: {0:?}")]
    Invalid(String),
    #[error("No address in object path {0:?}")]
    NoAddressInPath(String),
}

/// A normalized 6-octet Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Lenient parse: drops every non-hex character, then requires exactly
    /// 12 hex digits. Accepts the raw, colon and dash forms alike.
    pub fn normalize(input: &str) -> Result<Self, AddressError> {
        let digits: Vec<u8> = input
            .bytes()
            .filter(u8::is_ascii_hexdigit)
            .collect();
        if digits.len() != 12 {
            return Err(AddressError::Invalid(input.to_string()));
        }

        let mut octets = [0u8; 6];
        for (octet, pair) in octets.iter_mut().zip(digits.chunks_exact(2)) {
            *octet = (hex_value(pair[0]) << 4) | hex_value(pair[1]);
        }
        Ok(Self(octets))
    }

    /// Address of a BlueZ device object, e.g. `/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF`.
    pub fn from_device_path(path: &str) -> Result<Self, AddressError> {
        let Some(idx) = path.find("dev_") else {
            return Err(AddressError::NoAddressInPath(path.to_string()));
        };
        Self::normalize(&path[idx + 4..])
    }

    /// Remote address of an oFono hands-free modem.
    ///
    /// Modem paths look like `/hfp/<local>_<remote>`; the remote device is
    /// the part after the last `_` of the final path segment. Paths that
    /// embed a BlueZ device path (`.../dev_AA_BB_...`) are also understood.
    pub fn from_modem_path(path: &str) -> Result<Self, AddressError> {
        if path.contains("dev_") {
            return Self::from_device_path(path);
        }
        let segment = path.rsplit('/').next().unwrap_or(path);
        match segment.rsplit_once('_') {
            Some((_, remote)) => Self::normalize(remote),
            None => Err(AddressError::NoAddressInPath(path.to_string())),
        }
    }

    /// Uppercase raw form, `AABBCCDDEEFF`.
    pub fn to_raw(&self) -> String {
        self.0.iter().map(|b| format!("{:02X}", b)).collect()
    }

    /// BlueZ object-path form, `dev_AA_BB_CC_DD_EE_FF`.
    pub fn to_device_segment(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(|b| format!("{:02X}", b)).collect();
        format!("dev_{}", parts.join("_"))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

/// Strict parse of the colon form accepted on the public interface.
impl FromStr for MacAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        let well_formed = bytes.len() == 17
            && bytes.iter().enumerate().all(|(i, b)| {
                if i % 3 == 2 {
                    *b == b':'
                } else {
                    b.is_ascii_hexdigit()
                }
            });
        if !well_formed {
            return Err(AddressError::Invalid(s.to_string()));
        }
        Self::normalize(s)
    }
}

/// `AABBCCDDEEFF` to `AA:BB:CC:DD:EE:FF`. Input separators are ignored.
pub fn raw_to_colon(raw: &str) -> Result<String, AddressError> {
    MacAddress::normalize(raw).map(|mac| mac.to_string())
}

/// `AA:BB:CC:DD:EE:FF` to `AABBCCDDEEFF`.
pub fn colon_to_raw(colon: &str) -> Result<String, AddressError> {
    MacAddress::normalize(colon).map(|mac| mac.to_raw())
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        b'A'..=b'F' => digit - b'A' + 10,
        _ => 0,
    }
}
