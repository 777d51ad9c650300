//! Feed Record Types
//!
//! A decoded feed update is a ticker plus a sparse map from small integer
//! field IDs to values. The wire format does not declare value types, so
//! each value is either numeric (when the whole token parses as a number)
//! or kept as text.
//!
//! Well-known field IDs get named accessors; everything else stays reachable
//! through the backing map. Records are immutable once decoded and are
//! shared across consumers behind `Arc`, so no consumer can observe another
//! consumer's mutation.

use std::collections::BTreeMap;

use serde::Serialize;

// =============================================================================
// Field Values
// =============================================================================

/// One field value from the wire: numeric if the entire token parses as a
/// finite number, text otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Numeric value (`12`, `-3.5`, and also `000000` -> 0).
    Number(f64),
    /// Textual value (`0-`, `WDO`, anything that is not a full number).
    Text(String),
}

impl FieldValue {
    /// Coerce a raw wire token into a value.
    ///
    /// The token becomes numeric whenever it parses as a finite number in
    /// its entirety, including decimals and a leading sign. Zero-padded
    /// tokens such as `"000000"` therefore coerce to `0`, losing their
    /// fixed-width formatting; that matches the upstream feed contract and
    /// is deliberate.
    #[must_use]
    pub fn coerce(token: &str) -> Self {
        match token.parse::<f64>() {
            Ok(n) if n.is_finite() => Self::Number(n),
            _ => Self::Text(token.to_string()),
        }
    }

    /// Numeric view of this value.
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    /// Textual view of this value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Text(s) => Some(s.as_str()),
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

// =============================================================================
// Well-Known Field IDs
// =============================================================================

/// Well-known field IDs carried by the feed.
pub mod ids {
    /// Raw feed timestamp (positional token, always kept as text).
    pub const TIMESTAMP: u16 = 0;
    /// Last trade price.
    pub const LAST_PRICE: u16 = 2;
    /// Best bid price.
    pub const BID: u16 = 3;
    /// Best ask price.
    pub const ASK: u16 = 4;
    /// Time of the last trade.
    pub const TRADE_TIME: u16 = 5;
    /// Size of the last trade.
    pub const TRADE_SIZE: u16 = 6;
    /// Opening price.
    pub const OPEN: u16 = 7;
    /// Daily low.
    pub const LOW: u16 = 8;
    /// Daily high.
    pub const HIGH: u16 = 9;
    /// Previous session close.
    pub const PREV_CLOSE: u16 = 10;
    /// Cumulative traded volume.
    pub const VOLUME: u16 = 11;
    /// Daily variation percentage.
    pub const CHANGE_PERCENT: u16 = 21;
    /// Trading phase code.
    pub const PHASE: u16 = 60;
    /// Market segment code.
    pub const MARKET: u16 = 84;
    /// Tick direction of the last price movement.
    pub const TICK_DIRECTION: u16 = 106;
    /// Number of trades in the session.
    pub const TRADE_COUNT: u16 = 147;
}

/// Human-readable label for a well-known field ID.
#[must_use]
pub const fn field_label(id: u16) -> Option<&'static str> {
    match id {
        ids::TIMESTAMP => Some("timestamp"),
        ids::LAST_PRICE => Some("last price"),
        ids::BID => Some("bid"),
        ids::ASK => Some("ask"),
        ids::TRADE_TIME => Some("trade time"),
        ids::TRADE_SIZE => Some("trade size"),
        ids::OPEN => Some("open"),
        ids::LOW => Some("low"),
        ids::HIGH => Some("high"),
        ids::PREV_CLOSE => Some("previous close"),
        ids::VOLUME => Some("volume"),
        ids::CHANGE_PERCENT => Some("change %"),
        ids::PHASE => Some("phase"),
        ids::MARKET => Some("market"),
        ids::TICK_DIRECTION => Some("tick direction"),
        ids::TRADE_COUNT => Some("trade count"),
        _ => None,
    }
}

/// Label for a trading phase code.
#[must_use]
pub const fn phase_label(code: u8) -> Option<&'static str> {
    match code {
        1 => Some("pre-open"),
        2 => Some("open"),
        3 => Some("closing call"),
        4 => Some("closed"),
        5 => Some("auction"),
        _ => None,
    }
}

/// Label for a market segment code.
#[must_use]
pub const fn market_label(code: u8) -> Option<&'static str> {
    match code {
        1 => Some("equities"),
        2 => Some("options"),
        3 => Some("futures"),
        4 => Some("fx"),
        _ => None,
    }
}

/// Label for a tick-direction token (`+`, `0+`, `-`, `0-`).
#[must_use]
pub fn tick_direction_label(token: &str) -> Option<&'static str> {
    match token {
        "+" => Some("up"),
        "0+" => Some("zero-up"),
        "-" => Some("down"),
        "0-" => Some("zero-down"),
        _ => None,
    }
}

// =============================================================================
// Message
// =============================================================================

/// One decoded feed update.
///
/// Field-ID keys are unique by construction (map backing). The ticker is
/// never empty for a well-formed record; non-conforming input decodes to a
/// degenerate record whose ticker is the raw input and whose map is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    ticker: String,
    fields: BTreeMap<u16, FieldValue>,
    #[serde(skip)]
    degenerate: bool,
}

impl Message {
    /// Create a record from a ticker and its decoded fields.
    #[must_use]
    pub const fn new(ticker: String, fields: BTreeMap<u16, FieldValue>) -> Self {
        Self {
            ticker,
            fields,
            degenerate: false,
        }
    }

    /// Fallback record for input that does not match the wire grammar:
    /// the whole input becomes the ticker and the field map stays empty.
    #[must_use]
    pub fn degenerate(raw: &str) -> Self {
        Self {
            ticker: raw.to_string(),
            fields: BTreeMap::new(),
            degenerate: true,
        }
    }

    /// Instrument ticker.
    #[must_use]
    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    /// Look up a field by ID.
    #[must_use]
    pub fn get(&self, id: u16) -> Option<&FieldValue> {
        self.fields.get(&id)
    }

    /// All fields in ID order.
    pub fn fields(&self) -> impl Iterator<Item = (u16, &FieldValue)> {
        self.fields.iter().map(|(id, v)| (*id, v))
    }

    /// Number of decoded fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Whether this record came from the non-conforming-input fallback.
    /// A well-formed record with no decoded fields is not degenerate.
    #[must_use]
    pub const fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    fn number(&self, id: u16) -> Option<f64> {
        self.get(id).and_then(FieldValue::as_number)
    }

    fn text(&self, id: u16) -> Option<&str> {
        self.get(id).and_then(FieldValue::as_text)
    }

    /// Raw feed timestamp token.
    #[must_use]
    pub fn timestamp_raw(&self) -> Option<&str> {
        self.text(ids::TIMESTAMP)
    }

    /// Last trade price.
    #[must_use]
    pub fn last_price(&self) -> Option<f64> {
        self.number(ids::LAST_PRICE)
    }

    /// Best bid price.
    #[must_use]
    pub fn bid(&self) -> Option<f64> {
        self.number(ids::BID)
    }

    /// Best ask price.
    #[must_use]
    pub fn ask(&self) -> Option<f64> {
        self.number(ids::ASK)
    }

    /// Cumulative traded volume.
    #[must_use]
    pub fn volume(&self) -> Option<f64> {
        self.number(ids::VOLUME)
    }

    /// Daily variation percentage.
    #[must_use]
    pub fn change_percent(&self) -> Option<f64> {
        self.number(ids::CHANGE_PERCENT)
    }

    /// Trading phase code.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn phase_code(&self) -> Option<u8> {
        self.number(ids::PHASE).map(|n| n as u8)
    }

    /// Market segment code.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn market_code(&self) -> Option<u8> {
        self.number(ids::MARKET).map(|n| n as u8)
    }

    /// Tick direction token (`+`, `0+`, `-`, `0-`).
    #[must_use]
    pub fn tick_direction(&self) -> Option<&str> {
        self.text(ids::TICK_DIRECTION)
    }

    /// Number of trades in the session.
    #[must_use]
    pub fn trade_count(&self) -> Option<f64> {
        self.number(ids::TRADE_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_integer_token() {
        assert_eq!(FieldValue::coerce("133290"), FieldValue::Number(133_290.0));
    }

    #[test]
    fn coerce_decimal_and_signed_tokens() {
        assert_eq!(FieldValue::coerce("0.346307"), FieldValue::Number(0.346_307));
        assert_eq!(FieldValue::coerce("-1.5"), FieldValue::Number(-1.5));
        assert_eq!(FieldValue::coerce("+7"), FieldValue::Number(7.0));
    }

    #[test]
    fn coerce_keeps_partial_numbers_as_text() {
        assert_eq!(
            FieldValue::coerce("0-"),
            FieldValue::Text("0-".to_string())
        );
        assert_eq!(
            FieldValue::coerce("12x"),
            FieldValue::Text("12x".to_string())
        );
    }

    #[test]
    fn coerce_zero_padded_token_loses_padding() {
        // "000000" is a valid number, so the fixed-width time-of-day
        // formatting is lost. This mirrors the upstream feed contract.
        assert_eq!(FieldValue::coerce("000000"), FieldValue::Number(0.0));
    }

    #[test]
    fn coerce_rejects_non_finite() {
        assert_eq!(
            FieldValue::coerce("inf"),
            FieldValue::Text("inf".to_string())
        );
    }

    #[test]
    fn named_accessors_read_backing_map() {
        let mut fields = BTreeMap::new();
        fields.insert(ids::TIMESTAMP, FieldValue::Text("102635".to_string()));
        fields.insert(ids::LAST_PRICE, FieldValue::Number(133_290.0));
        fields.insert(ids::TICK_DIRECTION, FieldValue::Text("0-".to_string()));
        let msg = Message::new("WINJ25".to_string(), fields);

        assert_eq!(msg.ticker(), "WINJ25");
        assert_eq!(msg.timestamp_raw(), Some("102635"));
        assert_eq!(msg.last_price(), Some(133_290.0));
        assert_eq!(msg.tick_direction(), Some("0-"));
        assert_eq!(msg.bid(), None);
    }

    #[test]
    fn degenerate_record_keeps_raw_input() {
        let msg = Message::degenerate("not a feed message");
        assert_eq!(msg.ticker(), "not a feed message");
        assert!(msg.is_degenerate());
        assert_eq!(msg.field_count(), 0);
    }

    #[test]
    fn empty_field_map_alone_is_not_degenerate() {
        let msg = Message::new("PETR4".to_string(), BTreeMap::new());
        assert!(!msg.is_degenerate());
        assert_eq!(msg.field_count(), 0);
    }

    #[test]
    fn label_tables() {
        assert_eq!(field_label(ids::LAST_PRICE), Some("last price"));
        assert_eq!(field_label(9999), None);
        assert_eq!(phase_label(1), Some("pre-open"));
        assert_eq!(market_label(3), Some("futures"));
        assert_eq!(tick_direction_label("0-"), Some("zero-down"));
        assert_eq!(tick_direction_label("x"), None);
    }

    #[test]
    fn serializes_to_json_object() {
        let mut fields = BTreeMap::new();
        fields.insert(ids::LAST_PRICE, FieldValue::Number(10.5));
        fields.insert(ids::TICK_DIRECTION, FieldValue::Text("+".to_string()));
        let msg = Message::new("PETR4".to_string(), fields);

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"ticker\":\"PETR4\""));
        assert!(json.contains("\"2\":10.5"));
        assert!(json.contains("\"106\":\"+\""));
    }
}
