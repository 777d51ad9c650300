//! Record Framing
//!
//! The upstream feed is a byte stream; records arrive partially, or several
//! concatenated in one chunk. `FrameBuffer` reassembles complete records
//! from arbitrary chunk boundaries, splitting on the configured delimiter.
//!
//! Both framing conventions of the protocol are supported: the `!` record
//! terminator and plain newline-delimited lines.

/// Framing convention used by a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Records end with (and are separated by) `!`.
    #[default]
    Terminator,
    /// Records are newline-delimited lines.
    Newline,
}

impl Framing {
    /// Parse a framing mode from configuration text.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "newline" | "line" => Self::Newline,
            _ => Self::Terminator,
        }
    }

    /// The delimiter byte for this convention.
    #[must_use]
    pub const fn delimiter(self) -> u8 {
        match self {
            Self::Terminator => b'!',
            Self::Newline => b'\n',
        }
    }
}

/// Default cap on bytes buffered while waiting for a delimiter.
pub const DEFAULT_MAX_PENDING: usize = 64 * 1024;

/// Reassembly buffer for partial records.
///
/// Bytes are pushed as they arrive from the socket; complete records are
/// popped out as owned strings. The partial tail stays buffered until its
/// delimiter arrives, up to a byte cap; a tail that outgrows the cap is
/// discarded (no record is that long, so the stream has lost its framing).
#[derive(Debug)]
pub struct FrameBuffer {
    framing: Framing,
    buf: Vec<u8>,
    max_pending: usize,
}

impl FrameBuffer {
    /// Create an empty buffer for the given convention with the default cap.
    #[must_use]
    pub const fn new(framing: Framing) -> Self {
        Self::with_max_pending(framing, DEFAULT_MAX_PENDING)
    }

    /// Create an empty buffer holding at most `max_pending` undelimited bytes.
    #[must_use]
    pub const fn with_max_pending(framing: Framing, max_pending: usize) -> Self {
        Self {
            framing,
            buf: Vec::new(),
            max_pending,
        }
    }

    /// Append a chunk and drain every complete record it finishes.
    ///
    /// Terminator framing keeps the `!` on each record (decode strips it);
    /// newline framing strips the `\n` and a preceding `\r`. Empty records
    /// (consecutive delimiters) are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let delim = self.framing.delimiter();
        let mut records = Vec::new();
        let mut start = 0;

        while let Some(pos) = self.buf[start..].iter().position(|&b| b == delim) {
            let end = start + pos;
            let body = match self.framing {
                // Keep the terminator so a record pops out exactly as sent.
                Framing::Terminator => &self.buf[start..=end],
                Framing::Newline => {
                    let mut line = &self.buf[start..end];
                    if line.last() == Some(&b'\r') {
                        line = &line[..line.len() - 1];
                    }
                    line
                }
            };
            let text = String::from_utf8_lossy(body).into_owned();
            if !text.is_empty() && text != "!" {
                records.push(text);
            }
            start = end + 1;
        }

        self.buf.drain(..start);

        if self.buf.len() > self.max_pending {
            tracing::warn!(
                pending = self.buf.len(),
                limit = self.max_pending,
                "Discarding oversized partial record"
            );
            self.buf.clear();
        }

        records
    }

    /// Bytes currently buffered waiting for a delimiter.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn single_record_in_one_chunk() {
        let mut fb = FrameBuffer::new(Framing::Terminator);
        let records = fb.push(b"T:WINJ25:102635:2:133290!");
        assert_eq!(records, vec!["T:WINJ25:102635:2:133290!"]);
        assert_eq!(fb.pending(), 0);
    }

    #[test]
    fn concatenated_records_split_on_terminator() {
        let mut fb = FrameBuffer::new(Framing::Terminator);
        let records = fb.push(b"T:A:1:2:10!T:B:2:2:20!T:C:3");
        assert_eq!(records, vec!["T:A:1:2:10!", "T:B:2:2:20!"]);
        assert_eq!(fb.pending(), 5); // "T:C:3" waits for its terminator
    }

    #[test]
    fn record_split_across_chunks() {
        let mut fb = FrameBuffer::new(Framing::Terminator);
        assert!(fb.push(b"T:WINJ25:1026").is_empty());
        let records = fb.push(b"35:2:133290!");
        assert_eq!(records, vec!["T:WINJ25:102635:2:133290!"]);
    }

    #[test]
    fn newline_framing_strips_line_endings() {
        let mut fb = FrameBuffer::new(Framing::Newline);
        let records = fb.push(b"T:A:1:2:10\r\nT:B:2:2:20\n");
        assert_eq!(records, vec!["T:A:1:2:10", "T:B:2:2:20"]);
    }

    #[test]
    fn oversized_partial_record_is_discarded() {
        let mut fb = FrameBuffer::with_max_pending(Framing::Terminator, 16);
        assert!(fb.push(&[b'x'; 32]).is_empty());
        assert_eq!(fb.pending(), 0);

        // The stream keeps working once framed records reappear.
        let records = fb.push(b"T:A:1:2:10!");
        assert_eq!(records, vec!["T:A:1:2:10!"]);
    }

    #[test]
    fn empty_records_are_dropped() {
        let mut fb = FrameBuffer::new(Framing::Terminator);
        let records = fb.push(b"!!T:A:1!!");
        assert_eq!(records, vec!["T:A:1!"]);
    }

    #[test_case("terminator", Framing::Terminator)]
    #[test_case("newline", Framing::Newline)]
    #[test_case("LINE", Framing::Newline)]
    #[test_case("anything-else", Framing::Terminator)]
    fn framing_parsing(input: &str, expected: Framing) {
        assert_eq!(Framing::from_str_case_insensitive(input), expected);
    }
}
