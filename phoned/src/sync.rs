//! Phonebook pull requests and the FIFO they are serialized through.
//!
//! The remote phonebook service handles one pull at a time, so requests
//! queue here. The head of the queue is the pull in flight (or the one
//! about to be attempted); the transfer tracker pops it when the pull
//! completes, fails or is abandoned.

use std::collections::VecDeque;
use std::fmt;

/// Phonebook repository on the phone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhonebookLocation {
    Internal,
    Sim1,
    Sim2,
}

impl PhonebookLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhonebookLocation::Internal => "INT",
            PhonebookLocation::Sim1 => "SIM1",
            PhonebookLocation::Sim2 => "SIM2",
        }
    }
}

/// Which records a pull returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhonebookFolder {
    /// Contacts.
    Phonebook,
    /// Received calls.
    Incoming,
    /// Dialed calls.
    Outgoing,
    /// Missed calls.
    Missed,
    /// All of the call lists combined.
    Combined,
}

impl PhonebookFolder {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhonebookFolder::Phonebook => "pb",
            PhonebookFolder::Incoming => "ich",
            PhonebookFolder::Outgoing => "och",
            PhonebookFolder::Missed => "mch",
            PhonebookFolder::Combined => "cch",
        }
    }

    pub fn is_call_history(&self) -> bool {
        !matches!(self, PhonebookFolder::Phonebook)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    pub location: PhonebookLocation,
    pub folder: PhonebookFolder,
    /// Zero pulls everything.
    pub max_count: u16,
}

impl SyncRequest {
    pub fn new(location: PhonebookLocation, folder: PhonebookFolder, max_count: u16) -> Self {
        Self {
            location,
            folder,
            max_count,
        }
    }

    /// Every contact in internal memory.
    pub fn contacts() -> Self {
        Self::new(PhonebookLocation::Internal, PhonebookFolder::Phonebook, 0)
    }

    /// The latest `max_count` entries of the combined call history.
    pub fn call_history(max_count: u16) -> Self {
        Self::new(
            PhonebookLocation::Internal,
            PhonebookFolder::Combined,
            max_count,
        )
    }
}

impl fmt::Display for SyncRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} (max {})",
            self.location.as_str(),
            self.folder.as_str(),
            self.max_count
        )
    }
}

#[derive(Debug, Default)]
pub struct SyncQueue {
    items: VecDeque<SyncRequest>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `request`. Returns `true` when it became the head, meaning
    /// the caller has to start it.
    pub fn push(&mut self, request: SyncRequest) -> bool {
        let was_empty = self.items.is_empty();
        self.items.push_back(request);
        was_empty
    }

    pub fn head(&self) -> Option<&SyncRequest> {
        self.items.front()
    }

    pub fn pop(&mut self) -> Option<SyncRequest> {
        self.items.pop_front()
    }

    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            tracing::debug!("Dropping {} queued sync requests", self.items.len());
        }
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_first_push_reports_head() {
        let mut queue = SyncQueue::new();
        assert!(queue.push(SyncRequest::contacts()));
        assert!(!queue.push(SyncRequest::call_history(0)));
        assert!(!queue.push(SyncRequest::call_history(10)));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = SyncQueue::new();
        queue.push(SyncRequest::contacts());
        queue.push(SyncRequest::call_history(5));

        assert_eq!(queue.head(), Some(&SyncRequest::contacts()));
        assert_eq!(queue.pop(), Some(SyncRequest::contacts()));
        assert_eq!(queue.head(), Some(&SyncRequest::call_history(5)));
        assert_eq!(queue.pop(), Some(SyncRequest::call_history(5)));
        assert_eq!(queue.pop(), None);

        // Empty again, so the next push is the new head.
        assert!(queue.push(SyncRequest::contacts()));
    }

    #[test]
    fn test_clear() {
        let mut queue = SyncQueue::new();
        queue.push(SyncRequest::contacts());
        queue.push(SyncRequest::call_history(0));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.head(), None);
    }

    #[test]
    fn test_wire_names() {
        let request = SyncRequest::call_history(10);
        assert_eq!(request.location.as_str(), "INT");
        assert_eq!(request.folder.as_str(), "cch");
        assert!(request.folder.is_call_history());
        assert!(!PhonebookFolder::Phonebook.is_call_history());
        assert_eq!(request.to_string(), "INT/cch (max 10)");
    }
}
