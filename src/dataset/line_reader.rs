//! Single-pass line reader over a text blob.

/// Yields one line per call without splitting the whole blob up front.
///
/// A bare `\n` at the cursor is skipped before reading, so the separator
/// that ended the previous line never produces an empty line of its own.
/// A trailing `\r` is stripped from every line.
#[derive(Debug, Clone)]
pub struct LineReader<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> LineReader<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    /// Byte offset of the cursor.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for LineReader<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let bytes = self.text.as_bytes();
        if bytes.get(self.pos) == Some(&b'\n') {
            self.pos += 1;
        }
        if self.pos >= bytes.len() {
            return None;
        }

        let start = self.pos;
        let end = bytes[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |offset| start + offset);
        self.pos = end;

        let line = &self.text[start..end];
        Some(line.strip_suffix('\r').unwrap_or(line))
    }
}
