//! Newline framing for the server-sent event body.
//!
//! Bytes are buffered rather than text so a multi-byte UTF-8 sequence split
//! across two transport fragments is decoded only once the whole line is in.
//! `\n` never occurs inside a multi-byte sequence, which makes byte-level
//! splitting safe.

#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transport fragment and iterate over the lines it completed.
    pub fn push(&mut self, fragment: &[u8]) -> Lines<'_> {
        self.feed(fragment);
        self.lines()
    }

    /// Append a transport fragment without draining anything.
    pub fn feed(&mut self, fragment: &[u8]) {
        self.buf.extend_from_slice(fragment);
    }

    /// Iterate over complete lines currently buffered. Calling this again
    /// after the iterator is exhausted yields nothing until more bytes arrive.
    pub fn lines(&mut self) -> Lines<'_> {
        Lines { framer: self }
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Flush the trailing partial line at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        frame_line(&rest)
    }
}

/// Lazy iterator over the complete lines in a [`LineFramer`].
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let idx = self.framer.buf.iter().position(|b| *b == b'\n')?;
            let raw: Vec<u8> = self.framer.buf.drain(..=idx).collect();
            if let Some(line) = frame_line(&raw[..idx]) {
                return Some(line);
            }
        }
    }
}

/// Decode one raw line; blank and `:` comment lines are dropped.
fn frame_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim_matches('\r');
    if line.trim().is_empty() || line.starts_with(':') {
        return None;
    }
    Some(line.to_string())
}
