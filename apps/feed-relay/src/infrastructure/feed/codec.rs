//! Feed Wire Codec
//!
//! Pure functions over the colon-delimited wire format:
//!
//! ```text
//! T:<TICKER>:<TIME>(:<FIELD_ID>:<VALUE>)*[!]
//! ```
//!
//! `decode` never fails: input that does not carry the record marker decodes
//! to a degenerate record whose ticker is the raw input and whose field map
//! is empty. That is a defined fallback, not an error.
//!
//! The caller splits concatenated records on the terminator before calling
//! `decode`; see [`super::framing`]. `decode` operates on one already
//! isolated record.

use std::collections::BTreeMap;

use crate::domain::record::{
    FieldValue, Message, field_label, ids, market_label, phase_label, tick_direction_label,
};

/// Record marker prefix every well-formed record starts with.
pub const RECORD_MARKER: &str = "T:";

/// Record terminator, also the separator between concatenated records.
pub const TERMINATOR: char = '!';

// =============================================================================
// Decode
// =============================================================================

/// Decode one isolated record.
///
/// Token 1 of the split is the ticker and token 2 is the raw timestamp,
/// stored as text under field-ID 0. From token 3 onward tokens are consumed
/// in `(fieldID, value)` pairs; a malformed trailing single token is
/// silently dropped, as is a pair whose ID is not a small non-negative
/// integer. Values coerce to numbers whenever the entire token parses as
/// one (see [`FieldValue::coerce`]).
#[must_use]
pub fn decode(raw: &str) -> Message {
    let Some(body) = raw.strip_prefix(RECORD_MARKER) else {
        return Message::degenerate(raw);
    };
    let body = body.strip_suffix(TERMINATOR).unwrap_or(body);

    let mut tokens = body.split(':');
    let ticker = tokens.next().unwrap_or_default().to_string();

    let mut fields = BTreeMap::new();
    if let Some(time) = tokens.next() {
        fields.insert(ids::TIMESTAMP, FieldValue::Text(time.to_string()));
    }

    while let Some(id_token) = tokens.next() {
        let Some(value_token) = tokens.next() else {
            // Odd trailing token: dropped.
            break;
        };
        match id_token.parse::<u16>() {
            Ok(id) => {
                fields.insert(id, FieldValue::coerce(value_token));
            }
            Err(_) => {
                tracing::trace!(token = id_token, "skipping pair with malformed field ID");
            }
        }
    }

    Message::new(ticker, fields)
}

// =============================================================================
// Encode
// =============================================================================

/// Re-serialize a record to wire text.
///
/// The timestamp token takes its positional slot; remaining fields follow in
/// ID order as `(fieldID, value)` pairs and the terminator closes the
/// record. A degenerate record serializes back to its raw ticker text, so
/// decode/encode round-trips on the structured form. Cannot fail.
#[must_use]
pub fn encode(msg: &Message) -> String {
    if msg.is_degenerate() {
        return msg.ticker().to_string();
    }

    let mut out = String::with_capacity(64);
    out.push_str(RECORD_MARKER);
    out.push_str(msg.ticker());
    out.push(':');
    out.push_str(msg.timestamp_raw().unwrap_or_default());
    for (id, value) in msg.fields() {
        if id == ids::TIMESTAMP {
            continue;
        }
        out.push(':');
        out.push_str(&id.to_string());
        out.push(':');
        out.push_str(&value.to_string());
    }
    out.push(TERMINATOR);
    out
}

/// Render a record as human-readable text.
///
/// Named sections (price, bid/ask, volume, phase, tick direction, market)
/// go through the fixed code-to-label tables and are rendered only when the
/// backing field is present; a raw field dump is appended for traceability.
/// Cannot fail on missing fields.
#[must_use]
pub fn describe(msg: &Message) -> String {
    let mut out = String::with_capacity(128);
    out.push_str(msg.ticker());

    if let Some(time) = msg.timestamp_raw() {
        out.push_str(&format!(" @ {time}"));
    }
    if let Some(last) = msg.last_price() {
        out.push_str(&format!(" | last {last}"));
    }
    if let (Some(bid), Some(ask)) = (msg.bid(), msg.ask()) {
        out.push_str(&format!(" | bid/ask {bid}/{ask}"));
    }
    if let Some(volume) = msg.volume() {
        out.push_str(&format!(" | volume {volume}"));
    }
    if let Some(code) = msg.phase_code() {
        match phase_label(code) {
            Some(label) => out.push_str(&format!(" | phase {label}")),
            None => out.push_str(&format!(" | phase #{code}")),
        }
    }
    if let Some(token) = msg.tick_direction() {
        match tick_direction_label(token) {
            Some(label) => out.push_str(&format!(" | tick {label}")),
            None => out.push_str(&format!(" | tick {token}")),
        }
    }
    if let Some(code) = msg.market_code() {
        match market_label(code) {
            Some(label) => out.push_str(&format!(" | market {label}")),
            None => out.push_str(&format!(" | market #{code}")),
        }
    }

    out.push_str(" | raw {");
    let mut first = true;
    for (id, value) in msg.fields() {
        if !first {
            out.push_str(", ");
        }
        first = false;
        match field_label(id) {
            Some(label) => out.push_str(&format!("{id} ({label}): {value}")),
            None => out.push_str(&format!("{id}: {value}")),
        }
    }
    out.push('}');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "T:WINJ25:102635:2:133290:21:0.346307:106:0-:147:539!";

    #[test]
    fn decode_sample_record() {
        let msg = decode(SAMPLE);
        assert_eq!(msg.ticker(), "WINJ25");
        assert_eq!(msg.timestamp_raw(), Some("102635"));
        assert_eq!(msg.get(2), Some(&FieldValue::Number(133_290.0)));
        assert_eq!(msg.get(21), Some(&FieldValue::Number(0.346_307)));
        assert_eq!(msg.get(106), Some(&FieldValue::Text("0-".to_string())));
        assert_eq!(msg.get(147), Some(&FieldValue::Number(539.0)));
    }

    #[test]
    fn decode_without_terminator() {
        let msg = decode("T:PETR4:093000:2:37.5");
        assert_eq!(msg.ticker(), "PETR4");
        assert_eq!(msg.get(2), Some(&FieldValue::Number(37.5)));
    }

    #[test]
    fn decode_non_conforming_input_is_degenerate() {
        let msg = decode("not a feed message");
        assert_eq!(msg.ticker(), "not a feed message");
        assert!(msg.is_degenerate());
    }

    #[test]
    fn decode_drops_odd_trailing_token() {
        let msg = decode("T:PETR4:093000:2:37.5:99!");
        assert_eq!(msg.get(2), Some(&FieldValue::Number(37.5)));
        assert_eq!(msg.get(99), None);
        assert_eq!(msg.field_count(), 2); // timestamp + last price
    }

    #[test]
    fn decode_skips_malformed_field_id() {
        let msg = decode("T:PETR4:093000:xx:1:3:37.4!");
        assert_eq!(msg.get(3), Some(&FieldValue::Number(37.4)));
        assert_eq!(msg.field_count(), 2);
    }

    #[test]
    fn decode_ticker_only() {
        let msg = decode("T:PETR4");
        assert_eq!(msg.ticker(), "PETR4");
        assert_eq!(msg.field_count(), 0);
    }

    #[test]
    fn ticker_only_record_is_not_degenerate_and_keeps_marker() {
        let msg = decode("T:PETR4");
        assert!(!msg.is_degenerate());
        assert!(encode(&msg).starts_with("T:PETR4"));
    }

    #[test]
    fn encode_round_trips_structured_form() {
        let msg = decode(SAMPLE);
        let text = encode(&msg);
        let again = decode(&text);
        assert_eq!(again.ticker(), msg.ticker());
        for (id, value) in msg.fields() {
            if let Some(n) = value.as_number() {
                assert_eq!(again.get(id).and_then(FieldValue::as_number), Some(n));
            }
        }
    }

    #[test]
    fn encode_degenerate_round_trips() {
        let msg = decode("garbage line");
        let text = encode(&msg);
        assert_eq!(text, "garbage line");
        assert_eq!(decode(&text), msg);
    }

    #[test]
    fn describe_renders_known_sections() {
        let msg = decode("T:WINJ25:102635:2:133290:106:0-:60:2:84:3!");
        let text = describe(&msg);
        assert!(text.starts_with("WINJ25 @ 102635"));
        assert!(text.contains("last 133290"));
        assert!(text.contains("tick zero-down"));
        assert!(text.contains("phase open"));
        assert!(text.contains("market futures"));
        assert!(text.contains("raw {"));
    }

    #[test]
    fn describe_skips_missing_sections() {
        let msg = decode("T:PETR4:093000!");
        let text = describe(&msg);
        assert!(!text.contains("last"));
        assert!(!text.contains("bid/ask"));
        assert!(!text.contains("phase"));
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        fn ticker_strategy() -> impl Strategy<Value = String> {
            "[A-Z][A-Z0-9]{2,7}"
        }

        fn pairs_strategy() -> impl Strategy<Value = Vec<(u16, String)>> {
            proptest::collection::vec(
                (
                    1u16..500,
                    prop_oneof![
                        (0.0f64..1_000_000.0).prop_map(|n| format!("{n}")),
                        "[a-zA-Z+-]{1,4}".prop_map(|s| s),
                    ],
                ),
                0..8,
            )
        }

        proptest! {
            #[test]
            fn round_trip_preserves_ticker_and_numeric_fields(
                ticker in ticker_strategy(),
                time in "[0-9]{6}",
                pairs in pairs_strategy(),
            ) {
                let mut raw = format!("T:{ticker}:{time}");
                for (id, value) in &pairs {
                    raw.push_str(&format!(":{id}:{value}"));
                }
                raw.push('!');

                let msg = decode(&raw);
                let again = decode(&encode(&msg));

                prop_assert_eq!(again.ticker(), msg.ticker());
                for (id, value) in msg.fields() {
                    if let Some(n) = value.as_number() {
                        prop_assert_eq!(
                            again.get(id).and_then(FieldValue::as_number),
                            Some(n)
                        );
                    }
                }
            }
        }
    }
}
