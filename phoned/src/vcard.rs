//! Minimal vCard reader for phonebook pulls.
//!
//! Understands the subset phones send over PBAP: names, phone numbers,
//! e-mails, postal addresses, photos and the IrMC call timestamp used by
//! call history listings. Unknown properties are skipped.

use base64::Engine;

/// Postal address slot. A card keeps at most one address per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Home,
    Work,
    Other,
}

impl AddressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressKind::Home => "HOME",
            AddressKind::Work => "WORK",
            AddressKind::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostalAddress {
    pub kind: AddressKind,
    pub street: String,
    pub locality: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Photo {
    Uri(String),
    Inline(Vec<u8>),
}

/// Call direction and time from `X-IRMC-CALL-DATETIME`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStamp {
    /// MISSED, RECEIVED or DIALED as sent by the phone.
    pub direction: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Card {
    pub given_name: String,
    pub family_name: String,
    pub full_name: String,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
    pub addresses: Vec<PostalAddress>,
    pub photo: Option<Photo>,
    pub call: Option<CallStamp>,
}

/// Phones carry at most this many e-mail addresses per contact.
const MAX_EMAILS: usize = 4;

impl Card {
    pub fn first_phone(&self) -> Option<&str> {
        self.phones.first().map(String::as_str)
    }

    /// Store key. Phones do not send UIDs reliably, so the key is built
    /// from the first number, the name parts and the call timestamp.
    /// `None` when all of them are empty.
    pub fn derived_uid(&self) -> Option<String> {
        let phone = self.first_phone().unwrap_or_default();
        let timestamp = self
            .call
            .as_ref()
            .map(|c| c.timestamp.as_str())
            .unwrap_or_default();

        if phone.is_empty()
            && self.given_name.is_empty()
            && self.family_name.is_empty()
            && timestamp.is_empty()
        {
            return None;
        }
        Some(format!(
            "{}:{}:{}:{}",
            phone, self.given_name, self.family_name, timestamp
        ))
    }

    fn apply(&mut self, line: &ContentLine) {
        match line.name.as_str() {
            "N" => {
                let parts = split_components(&line.value);
                self.family_name = parts.first().cloned().unwrap_or_default();
                self.given_name = parts.get(1).cloned().unwrap_or_default();
            }
            "FN" => self.full_name = unescape(&line.value),
            "TEL" => {
                let number = unescape(&line.value);
                if !number.is_empty() {
                    self.phones.push(number);
                }
            }
            "EMAIL" => {
                let email = unescape(&line.value);
                if !email.is_empty() && self.emails.len() < MAX_EMAILS {
                    self.emails.push(email);
                }
            }
            "ADR" => {
                let kind = if line.has_type("HOME") {
                    AddressKind::Home
                } else if line.has_type("WORK") {
                    AddressKind::Work
                } else {
                    AddressKind::Other
                };
                if self.addresses.iter().any(|a| a.kind == kind) {
                    return;
                }
                // PO box; extended; street; locality; region; postal code; country
                let parts = split_components(&line.value);
                let part = |i: usize| parts.get(i).cloned().unwrap_or_default();
                self.addresses.push(PostalAddress {
                    kind,
                    street: part(2),
                    locality: part(3),
                    region: part(4),
                    postal_code: part(5),
                    country: part(6),
                });
            }
            "PHOTO" => self.photo = line.photo(),
            "X-IRMC-CALL-DATETIME" => {
                let timestamp = line.value.trim().to_string();
                if !timestamp.is_empty() {
                    self.call = Some(CallStamp {
                        direction: line.param("TYPE").map(str::to_ascii_uppercase),
                        timestamp,
                    });
                }
            }
            _ => {}
        }
    }
}

/// Parses every `BEGIN:VCARD`..`END:VCARD` block in `payload`.
pub fn parse_cards(payload: &str) -> Vec<Card> {
    let mut cards = Vec::new();
    let mut current: Option<Card> = None;

    for raw in unfold(payload) {
        let Some(line) = ContentLine::parse(&raw) else {
            continue;
        };
        match (line.name.as_str(), line.value.trim().to_ascii_uppercase().as_str()) {
            ("BEGIN", "VCARD") => current = Some(Card::default()),
            ("END", "VCARD") => {
                if let Some(card) = current.take() {
                    cards.push(card);
                }
            }
            _ => {
                if let Some(card) = current.as_mut() {
                    card.apply(&line);
                }
            }
        }
    }

    if current.is_some() {
        tracing::debug!("Dropping unterminated vCard");
    }
    cards
}

/// Joins folded lines (continuations start with a space or tab).
fn unfold(payload: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in payload.lines() {
        let line = line.trim_end_matches('\r');
        match line.strip_prefix([' ', '\t']) {
            Some(rest) if !lines.is_empty() => {
                if let Some(last) = lines.last_mut() {
                    last.push_str(rest);
                }
            }
            _ => lines.push(line.to_string()),
        }
    }
    lines
}

struct ContentLine {
    name: String,
    params: Vec<(String, String)>,
    value: String,
}

impl ContentLine {
    fn parse(line: &str) -> Option<Self> {
        let (head, value) = line.split_once(':')?;
        let mut parts = head.split(';');
        let name = parts.next()?.trim();
        // Drop an "item1." style group prefix.
        let name = name.rsplit('.').next().unwrap_or(name).to_ascii_uppercase();
        if name.is_empty() {
            return None;
        }

        let params = parts
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((key, value)) => (key.trim().to_ascii_uppercase(), value.trim().to_string()),
                // vCard 2.1 bare parameters are types.
                None => ("TYPE".to_string(), p.trim().to_string()),
            })
            .collect();

        Some(Self {
            name,
            params,
            value: value.to_string(),
        })
    }

    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn has_type(&self, wanted: &str) -> bool {
        self.params
            .iter()
            .filter(|(k, _)| k == "TYPE")
            .flat_map(|(_, v)| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(wanted))
    }

    fn photo(&self) -> Option<Photo> {
        let value = self.value.trim();
        if value.is_empty() {
            return None;
        }
        let encoding = self.param("ENCODING").unwrap_or_default();
        if encoding.eq_ignore_ascii_case("b") || encoding.eq_ignore_ascii_case("BASE64") {
            let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
            return match base64::engine::general_purpose::STANDARD.decode(compact) {
                Ok(data) => Some(Photo::Inline(data)),
                Err(e) => {
                    tracing::debug!("Ignoring undecodable inline photo: {}", e);
                    None
                }
            };
        }
        Some(Photo::Uri(unescape(value)))
    }
}

/// Splits a structured value on unescaped `;`.
fn split_components(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    push_escaped(&mut current, next);
                }
            }
            ';' => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                push_escaped(&mut out, next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn push_escaped(out: &mut String, c: char) {
    match c {
        'n' | 'N' => out.push('\n'),
        other => out.push(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTACT: &str = "BEGIN:VCARD\r\n\
VERSION:3.0\r\n\
UID:ignored-by-the-store\r\n\
N:Doe;John;;;\r\n\
FN:John Doe\r\n\
TEL;TYPE=CELL:+15550001\r\n\
TEL;TYPE=HOME:+15550002\r\n\
EMAIL;TYPE=INTERNET:john@example.com\r\n\
ADR;TYPE=HOME:;;1 Main St;Springfield;IL;62701;USA\r\n\
item1.ADR;TYPE=WORK:;;2 Office Rd\\, Suite 4;Shelbyville;;;\r\n\
END:VCARD\r\n";

    #[test]
    fn test_parse_contact() {
        let cards = parse_cards(CONTACT);
        assert_eq!(cards.len(), 1);
        let card = &cards[0];

        assert_eq!(card.given_name, "John");
        assert_eq!(card.family_name, "Doe");
        assert_eq!(card.full_name, "John Doe");
        assert_eq!(card.phones, vec!["+15550001", "+15550002"]);
        assert_eq!(card.emails, vec!["john@example.com"]);
        assert_eq!(card.addresses.len(), 2);
        assert_eq!(card.addresses[0].kind, AddressKind::Home);
        assert_eq!(card.addresses[0].street, "1 Main St");
        assert_eq!(card.addresses[0].country, "USA");
        assert_eq!(card.addresses[1].kind, AddressKind::Work);
        assert_eq!(card.addresses[1].street, "2 Office Rd, Suite 4");
        assert_eq!(card.derived_uid().as_deref(), Some("+15550001:John:Doe:"));
    }

    #[test]
    fn test_parse_call_history_entry() {
        let payload = "BEGIN:VCARD\nVERSION:3.0\nN:;;;;\nFN:\nTEL:+15550003\n\
X-IRMC-CALL-DATETIME;TYPE=MISSED:20140812T101530\nEND:VCARD\n";
        let cards = parse_cards(payload);
        assert_eq!(cards.len(), 1);

        let call = cards[0].call.as_ref().unwrap();
        assert_eq!(call.direction.as_deref(), Some("MISSED"));
        assert_eq!(call.timestamp, "20140812T101530");
        assert_eq!(
            cards[0].derived_uid().as_deref(),
            Some("+15550003:::20140812T101530")
        );
    }

    #[test]
    fn test_card_without_identity_has_no_uid() {
        let cards = parse_cards("BEGIN:VCARD\nVERSION:3.0\nFN:Nobody\nEND:VCARD\n");
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].derived_uid(), None);
    }

    #[test]
    fn test_folded_inline_photo() {
        // "hello" in base64, folded across two lines.
        let payload = "BEGIN:VCARD\nN:A;B\nPHOTO;ENCODING=b;TYPE=JPEG:aGVs\n bG8=\nEND:VCARD\n";
        let cards = parse_cards(payload);
        assert_eq!(cards[0].photo, Some(Photo::Inline(b"hello".to_vec())));

        let payload = "BEGIN:VCARD\nN:A;B\nPHOTO;VALUE=uri:http://example.com/a.jpg\nEND:VCARD\n";
        let cards = parse_cards(payload);
        assert_eq!(
            cards[0].photo,
            Some(Photo::Uri("http://example.com/a.jpg".into()))
        );
    }

    #[test]
    fn test_multiple_cards_and_garbage() {
        let payload = "garbage\nBEGIN:VCARD\nTEL:1\nEND:VCARD\nTEL:2\nBEGIN:VCARD\nTEL:3\nEND:VCARD\nBEGIN:VCARD\nTEL:4\n";
        let cards = parse_cards(payload);
        let phones: Vec<_> = cards.iter().map(|c| c.first_phone().unwrap()).collect();
        assert_eq!(phones, vec!["1", "3"]);
    }

    #[test]
    fn test_email_limit() {
        let payload = "BEGIN:VCARD\nEMAIL:a@x\nEMAIL:b@x\nEMAIL:c@x\nEMAIL:d@x\nEMAIL:e@x\nEND:VCARD\n";
        assert_eq!(parse_cards(payload)[0].emails.len(), 4);
    }
}
