//! Contacts and call history pulled from the selected phone.
//!
//! Records are keyed by [`Card::derived_uid`]. The first batch into an
//! empty list keeps payload order; later batches only carry news, so new
//! records go to the front. Known keys are skipped.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::vcard::{parse_cards, Card, Photo};

/// Which list a pull feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Contacts,
    CallHistory,
}

#[derive(Debug, Default)]
struct RecordList {
    order: Vec<String>,
    cards: HashMap<String, Card>,
}

impl RecordList {
    fn insert_batch(&mut self, batch: Vec<(String, Card)>) -> Vec<String> {
        let first = self.cards.is_empty();
        let mut added = Vec::new();
        for (uid, card) in batch {
            if self.cards.contains_key(&uid) {
                continue;
            }
            if first {
                self.order.push(uid.clone());
            } else {
                self.order.insert(0, uid.clone());
            }
            self.cards.insert(uid.clone(), card);
            added.push(uid);
        }
        added
    }

    /// The first `count` records, all of them when `count` is zero.
    fn latest(&self, count: u32) -> impl Iterator<Item = (&str, &Card)> {
        let limit = match count as usize {
            0 => self.order.len(),
            n => n.min(self.order.len()),
        };
        self.order[..limit]
            .iter()
            .filter_map(|uid| self.cards.get(uid).map(|card| (uid.as_str(), card)))
    }

    fn clear(&mut self) {
        self.order.clear();
        self.cards.clear();
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Debug)]
pub struct RecordStore {
    contacts: RecordList,
    call_history: RecordList,
    /// Inline contact photos are written here and referenced by URI.
    photo_dir: PathBuf,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl RecordStore {
    pub fn new(photo_dir: PathBuf) -> Self {
        Self {
            contacts: RecordList::default(),
            call_history: RecordList::default(),
            photo_dir,
        }
    }

    /// Parses `payload` and stores its new records. Returns the keys
    /// that were added, in insertion order.
    pub fn ingest(&mut self, kind: RecordKind, payload: &str) -> Vec<String> {
        let mut batch = Vec::new();
        for mut card in parse_cards(payload) {
            let Some(uid) = card.derived_uid() else {
                tracing::debug!("Skipping vCard without number, name or timestamp");
                continue;
            };
            if kind == RecordKind::Contacts {
                self.store_inline_photo(&uid, &mut card);
            }
            batch.push((uid, card));
        }

        let added = match kind {
            RecordKind::Contacts => self.contacts.insert_batch(batch),
            RecordKind::CallHistory => self.call_history.insert_batch(batch),
        };
        tracing::debug!(
            "Ingested {} new {:?} records ({} contacts, {} calls stored)",
            added.len(),
            kind,
            self.contacts.len(),
            self.call_history.len()
        );
        added
    }

    fn store_inline_photo(&self, uid: &str, card: &mut Card) {
        let Some(Photo::Inline(data)) = &card.photo else {
            return;
        };
        let path = self.photo_dir.join(format!("{}.jif", uid.replace('/', "_")));
        match std::fs::write(&path, data) {
            Ok(()) => {
                tracing::debug!("Saved contact photo {}", path.display());
                card.photo = Some(Photo::Uri(format!("file://{}", path.display())));
            }
            Err(e) => {
                tracing::warn!("Unable to store contact photo {}: {}", path.display(), e);
                card.photo = None;
            }
        }
    }

    /// Drops every cached record.
    pub fn clear(&mut self) {
        self.contacts.clear();
        self.call_history.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.len() == 0 && self.call_history.len() == 0
    }

    pub fn contacts_len(&self) -> usize {
        self.contacts.len()
    }

    pub fn call_history_len(&self) -> usize {
        self.call_history.len()
    }

    pub fn contacts_json(&self, count: u32) -> String {
        let list: Vec<ContactJson<'_>> = self
            .contacts
            .latest(count)
            .map(|(uid, card)| ContactJson::new(uid, card))
            .collect();
        to_json(&list, "[]")
    }

    pub fn call_history_json(&self, count: u32) -> String {
        let list: Vec<CallEntryJson<'_>> = self
            .call_history
            .latest(count)
            .map(|(uid, card)| CallEntryJson::new(uid, card))
            .collect();
        to_json(&list, "[]")
    }

    /// JSON of one call history entry, if stored.
    pub fn call_history_entry_json(&self, uid: &str) -> Option<String> {
        self.call_history
            .cards
            .get(uid)
            .map(|card| to_json(&CallEntryJson::new(uid, card), "{}"))
    }

    /// First contact whose primary number is `number`, or `{}`.
    pub fn contact_by_number(&self, number: &str) -> String {
        if number.is_empty() {
            return "{}".to_string();
        }
        self.contacts
            .latest(0)
            .find(|(_, card)| card.first_phone() == Some(number))
            .map(|(uid, card)| to_json(&ContactJson::new(uid, card), "{}"))
            .unwrap_or_else(|| "{}".to_string())
    }
}

fn to_json<T: Serialize>(value: &T, fallback: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        tracing::error!("Failed to serialize records: {}", e);
        fallback.to_string()
    })
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContactJson<'a> {
    uid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    person_id: Option<&'a str>,
    name: NameJson<'a>,
    addresses: Vec<AddressJson<'a>>,
    #[serde(rename = "photoURI", skip_serializing_if = "Option::is_none")]
    photo_uri: Option<&'a str>,
    phone_numbers: Vec<NumberJson<'a>>,
    emails: Vec<EmailJson<'a>>,
}

impl<'a> ContactJson<'a> {
    fn new(uid: &'a str, card: &'a Card) -> Self {
        Self {
            uid,
            person_id: card.first_phone().and_then(non_empty),
            name: NameJson {
                first_name: non_empty(&card.given_name),
                last_name: non_empty(&card.family_name),
                display_name: non_empty(&card.full_name),
            },
            addresses: card
                .addresses
                .iter()
                .map(|a| AddressJson {
                    is_default: "false",
                    country: non_empty(&a.country),
                    region: non_empty(&a.region),
                    city: non_empty(&a.locality),
                    street_address: non_empty(&a.street),
                    postal_code: non_empty(&a.postal_code),
                    types: [a.kind.as_str()],
                })
                .collect(),
            photo_uri: match &card.photo {
                Some(Photo::Uri(uri)) => non_empty(uri),
                _ => None,
            },
            phone_numbers: card
                .phones
                .iter()
                .map(|number| NumberJson { number })
                .collect(),
            emails: card
                .emails
                .iter()
                .map(|email| EmailJson {
                    email,
                    is_default: "false",
                    types: ["WORK"],
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NameJson<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddressJson<'a> {
    is_default: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    country: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    city: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    street_address: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    postal_code: Option<&'a str>,
    types: [&'static str; 1],
}

#[derive(Serialize)]
struct NumberJson<'a> {
    number: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailJson<'a> {
    email: &'a str,
    is_default: &'static str,
    types: [&'static str; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CallEntryJson<'a> {
    uid: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    features: [&'static str; 1],
    remote_parties: [RemotePartyJson<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<String>,
    duration: &'static str,
    direction: &'a str,
}

impl<'a> CallEntryJson<'a> {
    fn new(uid: &'a str, card: &'a Card) -> Self {
        let stamp = card.call.as_ref();
        Self {
            uid,
            kind: "TEL",
            features: ["VOICECALL"],
            remote_parties: [RemotePartyJson {
                person_id: card.first_phone().unwrap_or_default(),
                remote_party: non_empty(&card.full_name),
            }],
            start_time: stamp
                .map(|s| s.timestamp.as_str())
                .and_then(non_empty)
                .map(format_start_time),
            duration: "0",
            direction: stamp
                .and_then(|s| s.direction.as_deref())
                .unwrap_or("UNDEFINED"),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemotePartyJson<'a> {
    person_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_party: Option<&'a str>,
}

/// `20140812T101530` becomes `2014-08-12T10:15:30`. Unparseable stamps
/// are passed through.
fn format_start_time(raw: &str) -> String {
    ["%Y%m%dT%H%M%S", "%Y%m%dT%H%M%SZ"]
        .iter()
        .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn contact(phone: &str, given: &str, family: &str) -> String {
        format!(
            "BEGIN:VCARD\r\nVERSION:3.0\r\nN:{};{};;;\r\nFN:{} {}\r\nTEL:{}\r\nEND:VCARD\r\n",
            family, given, given, family, phone
        )
    }

    fn call(phone: &str, direction: &str, stamp: &str) -> String {
        format!(
            "BEGIN:VCARD\r\nVERSION:3.0\r\nN:;;;;\r\nTEL:{}\r\nX-IRMC-CALL-DATETIME;TYPE={}:{}\r\nEND:VCARD\r\n",
            phone, direction, stamp
        )
    }

    fn uids(json: &str) -> Vec<String> {
        let list: Vec<Value> = serde_json::from_str(json).unwrap();
        list.iter()
            .map(|v| v["uid"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_first_batch_appends_later_batches_prepend() {
        let mut store = RecordStore::default();
        let first = format!("{}{}", contact("1", "A", "X"), contact("2", "B", "Y"));
        assert_eq!(store.ingest(RecordKind::Contacts, &first).len(), 2);

        let second = format!(
            "{}{}{}",
            contact("2", "B", "Y"),
            contact("3", "C", "Z"),
            contact("4", "D", "W")
        );
        let added = store.ingest(RecordKind::Contacts, &second);
        assert_eq!(added, vec!["3:C:Z:", "4:D:W:"]);

        assert_eq!(
            uids(&store.contacts_json(0)),
            vec!["4:D:W:", "3:C:Z:", "1:A:X:", "2:B:Y:"]
        );
        assert_eq!(uids(&store.contacts_json(2)), vec!["4:D:W:", "3:C:Z:"]);
        assert_eq!(store.contacts_len(), 4);
    }

    #[test]
    fn test_contact_json_shape() {
        let mut store = RecordStore::default();
        let payload = "BEGIN:VCARD\nVERSION:3.0\nN:Doe;Jane;;;\nFN:Jane Doe\nTEL:+4911\n\
EMAIL:jane@example.com\nADR;TYPE=HOME:;;Street 1;Town;;12345;DE\n\
PHOTO;VALUE=uri:http://example.com/p.jpg\nEND:VCARD\n";
        store.ingest(RecordKind::Contacts, payload);

        let value: Value = serde_json::from_str(&store.contact_by_number("+4911")).unwrap();
        assert_eq!(
            value,
            json!({
                "uid": "+4911:Jane:Doe:",
                "personId": "+4911",
                "name": {"firstName": "Jane", "lastName": "Doe", "displayName": "Jane Doe"},
                "addresses": [{
                    "isDefault": "false",
                    "country": "DE",
                    "city": "Town",
                    "streetAddress": "Street 1",
                    "postalCode": "12345",
                    "types": ["HOME"]
                }],
                "photoURI": "http://example.com/p.jpg",
                "phoneNumbers": [{"number": "+4911"}],
                "emails": [{"email": "jane@example.com", "isDefault": "false", "types": ["WORK"]}]
            })
        );
        assert_eq!(store.contact_by_number("+4912"), "{}");
        assert_eq!(store.contact_by_number(""), "{}");
    }

    #[test]
    fn test_call_history_entry_shape() {
        let mut store = RecordStore::default();
        let added = store.ingest(
            RecordKind::CallHistory,
            &call("+4911", "RECEIVED", "20140812T101530"),
        );
        assert_eq!(added.len(), 1);

        let entry: Value =
            serde_json::from_str(&store.call_history_entry_json(&added[0]).unwrap()).unwrap();
        assert_eq!(
            entry,
            json!({
                "uid": "+4911:::20140812T101530",
                "type": "TEL",
                "features": ["VOICECALL"],
                "remoteParties": [{"personId": "+4911"}],
                "startTime": "2014-08-12T10:15:30",
                "duration": "0",
                "direction": "RECEIVED"
            })
        );
    }

    #[test]
    fn test_call_without_type_is_undefined() {
        let mut store = RecordStore::default();
        let payload = "BEGIN:VCARD\nTEL:5\nX-IRMC-CALL-DATETIME:20140101T000000\nEND:VCARD\n";
        let added = store.ingest(RecordKind::CallHistory, payload);
        let entry: Value =
            serde_json::from_str(&store.call_history_entry_json(&added[0]).unwrap()).unwrap();
        assert_eq!(entry["direction"], "UNDEFINED");
    }

    #[test]
    fn test_duplicates_and_anonymous_cards_are_skipped() {
        let mut store = RecordStore::default();
        let payload = format!(
            "{}{}BEGIN:VCARD\nFN:Anonymous\nEND:VCARD\n",
            call("1", "DIALED", "20140101T000000"),
            call("1", "DIALED", "20140101T000000")
        );
        assert_eq!(store.ingest(RecordKind::CallHistory, &payload).len(), 1);
        assert_eq!(store.call_history_len(), 1);
        assert_eq!(store.contacts_len(), 0);
    }

    #[test]
    fn test_inline_photo_is_saved_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordStore::new(dir.path().to_path_buf());
        let payload = "BEGIN:VCARD\nN:Doe;Jane\nTEL:77\nPHOTO;ENCODING=b;TYPE=JPEG:aGVsbG8=\nEND:VCARD\n";
        store.ingest(RecordKind::Contacts, payload);

        let saved = dir.path().join("77:Jane:Doe:.jif");
        assert_eq!(std::fs::read(&saved).unwrap(), b"hello");

        let value: Value = serde_json::from_str(&store.contact_by_number("77")).unwrap();
        assert_eq!(
            value["photoURI"],
            format!("file://{}", saved.display()).as_str()
        );
    }

    #[test]
    fn test_clear() {
        let mut store = RecordStore::default();
        store.ingest(RecordKind::Contacts, &contact("1", "A", "B"));
        store.ingest(
            RecordKind::CallHistory,
            &call("1", "MISSED", "20140101T000000"),
        );
        assert!(!store.is_empty());
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.contacts_json(0), "[]");
        assert_eq!(store.call_history_json(0), "[]");
    }

    #[test]
    fn test_start_time_format() {
        assert_eq!(format_start_time("20140812T101530"), "2014-08-12T10:15:30");
        assert_eq!(format_start_time("20140812T101530Z"), "2014-08-12T10:15:30");
        assert_eq!(format_start_time("garbage"), "garbage");
    }
}
