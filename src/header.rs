//! Header cards and the insertion-ordered metadata store.
//!
//! A [`Header`] is the metadata section attached to a data handle (the
//! global section) or to one of its subunits. It preserves insertion
//! order, tolerates duplicate keywords (lookups are last-write-wins), and
//! keeps the optional comment carried by each card.

use crate::error::{Error, Result};

// ── Values ──

/// A parsed header value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// FITS logical (T/F).
    Logical(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Real(f64),
    /// Character string, trailing blanks trimmed.
    Str(String),
}

impl Value {
    /// Return the logical value, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Logical(b) => Some(*b),
            _ => None,
        }
    }

    /// Return the integer value, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Return the value as a float. Integers coerce.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Real(x) => Some(*x),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Return the string value, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Logical(true) => write!(f, "T"),
            Value::Logical(false) => write!(f, "F"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Real(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Logical(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Real(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(String::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

// ── Cards ──

/// One keyword record: keyword, optional value, optional comment.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    /// Keyword name, uppercase, at most eight characters on disk.
    pub keyword: String,
    /// The parsed value, if the card carries a value indicator.
    pub value: Option<Value>,
    /// An optional comment string.
    pub comment: Option<String>,
}

impl Card {
    /// Create a card with a value and no comment.
    pub fn new(keyword: &str, value: impl Into<Value>) -> Self {
        Card {
            keyword: String::from(keyword),
            value: Some(value.into()),
            comment: None,
        }
    }

    /// Create a card with a value and a comment.
    pub fn with_comment(keyword: &str, value: impl Into<Value>, comment: &str) -> Self {
        Card {
            keyword: String::from(keyword),
            value: Some(value.into()),
            comment: Some(String::from(comment)),
        }
    }

    /// Returns `true` if this card carries a commentary keyword
    /// (COMMENT, HISTORY, or blank).
    pub fn is_commentary(&self) -> bool {
        self.keyword == "COMMENT" || self.keyword == "HISTORY" || self.keyword.is_empty()
    }
}

// ── Header store ──

/// An insertion-ordered keyword/value/comment store.
///
/// Duplicate keywords are tolerated: [`Header::get`] returns the value of
/// the last matching card, and [`Header::set`] updates the last matching
/// card in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    /// Create an empty header.
    pub fn new() -> Self {
        Header { cards: Vec::new() }
    }

    /// Create a header from an existing card list, preserving order.
    pub fn from_cards(cards: Vec<Card>) -> Self {
        Header { cards }
    }

    /// Number of cards, commentary included.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Returns `true` if the header holds no cards.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Returns `true` if any card carries the given keyword.
    pub fn contains(&self, keyword: &str) -> bool {
        self.cards.iter().any(|c| c.keyword == keyword)
    }

    /// Return the value for `keyword`, last write wins on duplicates.
    pub fn get(&self, keyword: &str) -> Option<&Value> {
        self.cards
            .iter()
            .rev()
            .find(|c| c.keyword == keyword)
            .and_then(|c| c.value.as_ref())
    }

    /// String value for `keyword`, or `None` if absent or not a string.
    pub fn get_str(&self, keyword: &str) -> Option<&str> {
        self.get(keyword).and_then(Value::as_str)
    }

    /// Integer value for `keyword`.
    pub fn get_int(&self, keyword: &str) -> Option<i64> {
        self.get(keyword).and_then(Value::as_int)
    }

    /// Float value for `keyword`; integers coerce.
    pub fn get_float(&self, keyword: &str) -> Option<f64> {
        self.get(keyword).and_then(Value::as_float)
    }

    /// Logical value for `keyword`.
    pub fn get_bool(&self, keyword: &str) -> Option<bool> {
        self.get(keyword).and_then(Value::as_bool)
    }

    /// Return the comment attached to the last card with `keyword`.
    pub fn comment(&self, keyword: &str) -> Option<&str> {
        self.cards
            .iter()
            .rev()
            .find(|c| c.keyword == keyword)
            .and_then(|c| c.comment.as_deref())
    }

    /// Set `keyword` to `value`, updating the last matching card in place
    /// or appending a new one. An existing comment is preserved.
    pub fn set(&mut self, keyword: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.cards.iter_mut().rev().find(|c| c.keyword == keyword) {
            Some(card) => card.value = Some(value),
            None => self.cards.push(Card {
                keyword: String::from(keyword),
                value: Some(value),
                comment: None,
            }),
        }
    }

    /// Set `keyword` to `value` with a comment, replacing any previous
    /// comment on the card.
    pub fn set_with_comment(&mut self, keyword: &str, value: impl Into<Value>, comment: &str) {
        let value = value.into();
        match self.cards.iter_mut().rev().find(|c| c.keyword == keyword) {
            Some(card) => {
                card.value = Some(value);
                card.comment = Some(String::from(comment));
            }
            None => self.cards.push(Card {
                keyword: String::from(keyword),
                value: Some(value),
                comment: Some(String::from(comment)),
            }),
        }
    }

    /// Append a card verbatim, allowing duplicates.
    pub fn push(&mut self, card: Card) {
        self.cards.push(card);
    }

    /// Remove every card with `keyword`. Returns `true` if any was removed.
    pub fn remove(&mut self, keyword: &str) -> Result<()> {
        let before = self.cards.len();
        self.cards.retain(|c| c.keyword != keyword);
        if self.cards.len() == before {
            return Err(Error::KeyNotFound(String::from(keyword)));
        }
        Ok(())
    }

    /// Iterate over all cards in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Card> {
        self.cards.iter()
    }

    /// Keywords in insertion order, duplicates included.
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.cards.iter().map(|c| c.keyword.as_str())
    }
}

impl<'a> IntoIterator for &'a Header {
    type Item = &'a Card;
    type IntoIter = std::slice::Iter<'a, Card>;

    fn into_iter(self) -> Self::IntoIter {
        self.cards.iter()
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        let mut hdr = Header::new();
        hdr.set("TELESCOP", "GEMINI-NORTH");
        hdr.set("OBSTYPE", "OBJECT");
        hdr.set_with_comment("EXPTIME", 120.0, "exposure time in seconds");
        hdr.set("NAXIS", 2i64);
        hdr
    }

    #[test]
    fn set_then_get_string() {
        let hdr = sample();
        assert_eq!(hdr.get_str("TELESCOP"), Some("GEMINI-NORTH"));
    }

    #[test]
    fn get_missing_is_none() {
        let hdr = sample();
        assert!(hdr.get("GRATING").is_none());
    }

    #[test]
    fn typed_getters() {
        let hdr = sample();
        assert_eq!(hdr.get_int("NAXIS"), Some(2));
        assert_eq!(hdr.get_float("EXPTIME"), Some(120.0));
        assert!(hdr.get_bool("TELESCOP").is_none());
    }

    #[test]
    fn integer_coerces_to_float() {
        let hdr = sample();
        assert_eq!(hdr.get_float("NAXIS"), Some(2.0));
    }

    #[test]
    fn set_updates_in_place() {
        let mut hdr = sample();
        hdr.set("OBSTYPE", "DARK");
        assert_eq!(hdr.get_str("OBSTYPE"), Some("DARK"));
        // Same number of cards: the existing one was updated.
        assert_eq!(hdr.len(), 4);
    }

    #[test]
    fn set_preserves_comment() {
        let mut hdr = sample();
        hdr.set("EXPTIME", 60.0);
        assert_eq!(hdr.comment("EXPTIME"), Some("exposure time in seconds"));
        assert_eq!(hdr.get_float("EXPTIME"), Some(60.0));
    }

    #[test]
    fn duplicate_keywords_last_write_wins() {
        let mut hdr = Header::new();
        hdr.push(Card::new("FILTER", "g"));
        hdr.push(Card::new("FILTER", "r"));
        assert_eq!(hdr.get_str("FILTER"), Some("r"));
        assert_eq!(hdr.len(), 2);
    }

    #[test]
    fn remove_deletes_all_duplicates() {
        let mut hdr = Header::new();
        hdr.push(Card::new("FILTER", "g"));
        hdr.push(Card::new("FILTER", "r"));
        hdr.remove("FILTER").unwrap();
        assert!(!hdr.contains("FILTER"));
    }

    #[test]
    fn remove_missing_is_key_not_found() {
        let mut hdr = sample();
        assert!(matches!(
            hdr.remove("GRATING"),
            Err(Error::KeyNotFound(k)) if k == "GRATING"
        ));
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let hdr = sample();
        let keys: Vec<&str> = hdr.keywords().collect();
        assert_eq!(keys, vec!["TELESCOP", "OBSTYPE", "EXPTIME", "NAXIS"]);
    }

    #[test]
    fn commentary_card_detection() {
        let card = Card {
            keyword: String::from("HISTORY"),
            value: None,
            comment: Some(String::from("stacked by the pipeline")),
        };
        assert!(card.is_commentary());
        assert!(!Card::new("OBJECT", "M31").is_commentary());
    }

    #[test]
    fn value_display() {
        assert_eq!(Value::Logical(true).to_string(), "T");
        assert_eq!(Value::Integer(-32).to_string(), "-32");
        assert_eq!(Value::Str(String::from("NGC 1234")).to_string(), "NGC 1234");
    }
}
