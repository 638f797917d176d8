//! Byte-stream-to-lines reassembly for one child output stream.

use chrono::{DateTime, Local};

/// Which of a child's two output streams a [`Line`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One completed line of child output.
#[derive(Debug, Clone)]
pub struct Line {
    pub stream: StreamKind,
    pub at: DateTime<Local>,
    pub bytes: Vec<u8>,
}

impl Line {
    /// Render the payload for display. Non-UTF-8 bytes are rendered with a
    /// permissive one-byte-per-code-point decoding rather than losing data
    /// to `replacement_character` mangling; storage always stays bytes.
    pub fn text(&self) -> String {
        decode_lossy_latin1(&self.bytes)
    }
}

/// Decode bytes for display: valid UTF-8 decodes normally, anything else
/// falls back to treating each byte as its own Latin-1 code point so every
/// payload renders to *something* printable.
pub fn decode_lossy_latin1(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Decorate a line's text with an optional name and/or timestamp, stderr
/// lines getting a doubled separator (`::`) to set them apart from stdout
/// (`:`). Mirrors the original's four-way `Line.Format` branch.
pub fn format_line(stream: StreamKind, text: &str, name: Option<&str>, at: Option<DateTime<Local>>) -> String {
    let sep = match stream {
        StreamKind::Stderr => "::",
        StreamKind::Stdout => ":",
    };
    match (name, at) {
        (Some(name), Some(at)) => format!("{name} @{}{sep} {text}", crate::timefmt::time_str(at)),
        (None, Some(at)) => format!("{}{sep} {text}", crate::timefmt::time_str(at)),
        (Some(name), None) => format!("{name}{sep} {text}"),
        (None, None) => text.to_string(),
    }
}

/// Splits fed byte chunks on `b'\n'` into completed [`Line`]s plus a
/// residual partial line carried across calls.
#[derive(Debug, Default)]
pub struct LineBuffer {
    stream: Option<StreamKind>,
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new(stream: StreamKind) -> Self {
        LineBuffer {
            stream: Some(stream),
            partial: Vec::new(),
        }
    }

    /// Feed a chunk of bytes, returning every line completed by it. The
    /// first split fragment is glued to any pre-existing partial; the
    /// last fragment becomes the new partial (possibly empty).
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Line> {
        if bytes.is_empty() {
            return Vec::new();
        }
        let stream = self.stream.expect("LineBuffer::new sets stream");
        let now = Local::now();
        let mut lines = Vec::new();
        let mut start = 0;
        for (i, &b) in bytes.iter().enumerate() {
            if b == b'\n' {
                let mut text = std::mem::take(&mut self.partial);
                text.extend_from_slice(&bytes[start..i]);
                lines.push(Line {
                    stream,
                    at: now,
                    bytes: text,
                });
                start = i + 1;
            }
        }
        self.partial.extend_from_slice(&bytes[start..]);
        lines
    }

    /// True if a partial (unterminated) line is pending.
    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }

    /// Take the residual partial line, if any, leaving the buffer empty.
    /// Called once after EOF; the result is reported separately (with an
    /// optional timestamp) and never folded into the normal `feed` output.
    pub fn take_partial(&mut self) -> Option<Line> {
        if self.partial.is_empty() {
            return None;
        }
        Some(Line {
            stream: self.stream.expect("LineBuffer::new sets stream"),
            at: Local::now(),
            bytes: std::mem::take(&mut self.partial),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(lines: &[Line]) -> Vec<String> {
        lines.iter().map(Line::text).collect()
    }

    #[test]
    fn test_feed_single_complete_line() {
        let mut buf = LineBuffer::new(StreamKind::Stdout);
        let lines = buf.feed(b"hello\n");
        assert_eq!(texts(&lines), vec!["hello"]);
        assert!(!buf.has_partial());
    }

    #[test]
    fn test_feed_partial_then_complete() {
        let mut buf = LineBuffer::new(StreamKind::Stdout);
        assert!(buf.feed(b"hel").is_empty());
        assert!(buf.has_partial());
        let lines = buf.feed(b"lo\nworld");
        assert_eq!(texts(&lines), vec!["hello"]);
        assert!(buf.has_partial());
    }

    #[test]
    fn test_feed_multiple_lines_in_one_chunk() {
        let mut buf = LineBuffer::new(StreamKind::Stdout);
        let lines = buf.feed(b"one\ntwo\nthree\n");
        assert_eq!(texts(&lines), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_drain_reports_partial_separately() {
        let mut buf = LineBuffer::new(StreamKind::Stdout);
        buf.feed(b"no newline yet");
        assert!(buf.has_partial());
        let partial = buf.take_partial().unwrap();
        assert_eq!(partial.text(), "no newline yet");
        assert!(!buf.has_partial());
        assert!(buf.take_partial().is_none());
    }

    #[test]
    fn test_empty_feed_is_noop() {
        let mut buf = LineBuffer::new(StreamKind::Stdout);
        assert!(buf.feed(b"").is_empty());
        assert!(!buf.has_partial());
    }

    #[test]
    fn test_reassembly_split_invariant() {
        // Feeding a byte stream in one call or split at any boundary must
        // yield the same completed lines and the same final partial.
        let whole = b"alpha\nbeta\ngamma\npart".to_vec();
        let mut one_shot = LineBuffer::new(StreamKind::Stdout);
        let one_shot_lines = texts(&one_shot.feed(&whole));
        let one_shot_partial = one_shot.take_partial().map(|l| l.text());

        for split_at in 0..=whole.len() {
            let mut split = LineBuffer::new(StreamKind::Stdout);
            let mut collected = Vec::new();
            collected.extend(texts(&split.feed(&whole[..split_at])));
            collected.extend(texts(&split.feed(&whole[split_at..])));
            assert_eq!(collected, one_shot_lines, "split_at={split_at}");
            assert_eq!(
                split.take_partial().map(|l| l.text()),
                one_shot_partial,
                "split_at={split_at}"
            );
        }
    }

    proptest::proptest! {
        /// Testable Property #5, generalized to an arbitrary number of feed
        /// calls: splitting a byte stream anywhere and feeding it in pieces
        /// yields the same completed lines and final partial as one `feed`.
        #[test]
        fn prop_reassembly_is_split_invariant(
            whole in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..200),
            cuts in proptest::collection::vec(0usize..200, 0..6),
        ) {
            let mut one_shot = LineBuffer::new(StreamKind::Stdout);
            let one_shot_lines = texts(&one_shot.feed(&whole));
            let one_shot_partial = one_shot.take_partial().map(|l| l.text());

            let mut bounds: Vec<usize> = cuts.iter().map(|c| c % (whole.len() + 1)).collect();
            bounds.push(whole.len());
            bounds.sort_unstable();
            bounds.dedup();

            let mut split = LineBuffer::new(StreamKind::Stdout);
            let mut collected = Vec::new();
            let mut start = 0;
            for &end in &bounds {
                collected.extend(texts(&split.feed(&whole[start..end])));
                start = end;
            }
            prop_assert_eq!(&collected, &one_shot_lines);
            prop_assert_eq!(split.take_partial().map(|l| l.text()), one_shot_partial);
        }
    }

    #[test]
    fn test_format_line_variants() {
        assert_eq!(format_line(StreamKind::Stdout, "hi", None, None), "hi");
        assert_eq!(
            format_line(StreamKind::Stdout, "hi", Some("job"), None),
            "job: hi"
        );
        assert_eq!(
            format_line(StreamKind::Stderr, "hi", Some("job"), None),
            "job:: hi"
        );
    }

    #[test]
    fn test_non_utf8_renders_permissively() {
        let mut buf = LineBuffer::new(StreamKind::Stdout);
        let lines = buf.feed(&[0xFF, 0x41, b'\n']);
        assert_eq!(lines.len(), 1);
        // 0xFF decodes to U+00FF rather than panicking or losing the byte.
        assert_eq!(lines[0].text().chars().next().unwrap() as u32, 0xFF);
    }
}
