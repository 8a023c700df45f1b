//! Paired-phone session daemon.
//!
//! Watches BlueZ, ConnMan, oFono and obexd for the device the user selected,
//! brings up its modem and phonebook session when it shows up, keeps the
//! contact and call history pulls flowing through one queue, and exposes the
//! result as the `org.tizen.Phone` D-Bus object.
//!
//! Everything runs on one task: trackers report through [`events::Event`]s
//! and the [`orchestrator::Orchestrator`] reacts to them one at a time.

pub mod adapter;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod modem;
pub mod orchestrator;
pub mod records;
pub mod selection;
pub mod service;
pub mod sync;
pub mod technology;
pub mod transfer;
pub mod vcard;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{PhoneError, Result};
pub use orchestrator::{Inbox, Orchestrator};
