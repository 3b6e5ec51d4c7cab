//! Output cleanup, retention and server detection.

use std::collections::VecDeque;
use std::sync::LazyLock;

use regex::Regex;

static CONTROL_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\x1b\[[0-9;?]*[ -/]*[@-~]",        // CSI: colours, cursor movement
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)", // OSC: titles, hyperlinks
        r"|\x1b[@-Z\\-_]",                     // two-byte escapes
        r"|[\x00-\x08\x0b\x0c\x0e-\x1f\x7f]",  // other C0 controls
    ))
    .expect("control sequence pattern")
});

static SERVER_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]|[A-Za-z0-9.-]+):(\d{2,5})")
        .expect("server url pattern")
});

static LISTENING_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)listening (?:on|at) (?:port\s*)?:?(\d{2,5})").expect("listening pattern")
});

/// Remove terminal escape sequences and normalize line endings.
pub fn strip_control_sequences(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    CONTROL_SEQUENCE.replace_all(&text, "").into_owned()
}

/// Find a `(host, port)` announcement in a chunk of output.
pub fn detect_server_ready(text: &str) -> Option<(String, u16)> {
    if let Some(caps) = SERVER_URL.captures(text) {
        let port = caps[2].parse().ok()?;
        let host = match &caps[1] {
            "0.0.0.0" | "[::]" => "localhost".to_string(),
            host => host.to_string(),
        };
        return Some((host, port));
    }
    let caps = LISTENING_PORT.captures(text)?;
    let port = caps[1].parse().ok()?;
    Some(("localhost".to_string(), port))
}

/// Bounded, append-only transcript of a run.
///
/// Once the cap is exceeded the oldest chunks are dropped.
#[derive(Debug)]
pub struct OutputBuffer {
    chunks: VecDeque<String>,
    bytes: usize,
    cap: usize,
    dropped: usize,
}

impl OutputBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            bytes: 0,
            cap,
            dropped: 0,
        }
    }

    pub fn push(&mut self, chunk: impl Into<String>) {
        let mut chunk = chunk.into();
        if chunk.len() > self.cap {
            // Keep the tail of an oversized chunk
            let mut start = chunk.len() - self.cap;
            while !chunk.is_char_boundary(start) {
                start += 1;
            }
            self.dropped += start;
            chunk = chunk.split_off(start);
        }
        self.bytes += chunk.len();
        self.chunks.push_back(chunk);
        while self.bytes > self.cap {
            let Some(old) = self.chunks.pop_front() else {
                break;
            };
            self.bytes -= old.len();
            self.dropped += old.len();
        }
    }

    pub fn len(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Bytes discarded to stay under the cap.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn contents(&self) -> String {
        self.chunks.iter().map(String::as_str).collect()
    }
}

/// Decodes a byte stream as UTF-8 without splitting characters across reads.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let split = match std::str::from_utf8(&self.carry) {
            Ok(_) => self.carry.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.carry.len(),
        };
        let rest = self.carry.split_off(split);
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry = rest;
        text
    }

    pub(crate) fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_colours_and_cursor_movement() {
        let raw = "\x1b[32m✔\x1b[0m added 12 packages\r\n\x1b[2K\x1b[1Gdone\x07";
        assert_eq!(strip_control_sequences(raw), "✔ added 12 packages\ndone");
        assert_eq!(
            strip_control_sequences("\x1b]0;npm install\x07ok"),
            "ok"
        );
        assert_eq!(strip_control_sequences("plain\ttext\n"), "plain\ttext\n");
    }

    #[test]
    fn detects_server_announcements() {
        assert_eq!(
            detect_server_ready("Server running at http://localhost:3000/"),
            Some(("localhost".to_string(), 3000))
        );
        assert_eq!(
            detect_server_ready("  ➜  Local:   http://127.0.0.1:5173/"),
            Some(("127.0.0.1".to_string(), 5173))
        );
        assert_eq!(
            detect_server_ready("Listening on port 8080"),
            Some(("localhost".to_string(), 8080))
        );
        assert_eq!(
            detect_server_ready("bound to http://0.0.0.0:4000"),
            Some(("localhost".to_string(), 4000))
        );
        assert_eq!(detect_server_ready("compiled successfully"), None);
        assert_eq!(detect_server_ready("listening on port 99999"), None);
    }

    #[test]
    fn buffer_drops_oldest_chunks() {
        let mut buffer = OutputBuffer::new(10);
        buffer.push("aaaa");
        buffer.push("bbbb");
        buffer.push("cccc");
        assert_eq!(buffer.contents(), "bbbbcccc");
        assert_eq!(buffer.dropped(), 4);

        buffer.push("0123456789xyz");
        assert_eq!(buffer.contents(), "3456789xyz");
        assert_eq!(buffer.len(), 10);
    }

    #[test]
    fn decoder_joins_split_characters() {
        let bytes = "héllo".as_bytes();
        let mut decoder = Utf8Decoder::default();
        let first = decoder.decode(&bytes[..2]);
        let second = decoder.decode(&bytes[2..]);
        assert_eq!(first, "h");
        assert_eq!(format!("{first}{second}"), "héllo");
        assert_eq!(decoder.finish(), "");
    }
}
