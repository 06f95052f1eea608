//! Delimiter-aware row splitter with double-quote quoting.

/// Default field delimiter.
pub const DEFAULT_DELIMITER: char = ',';

/// Splits one row into fields.
///
/// - `"` toggles quote mode and is not part of the field.
/// - Inside quotes, `""` is a literal `"`.
/// - The delimiter splits fields only outside quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowParser {
    delimiter: char,
}

impl RowParser {
    pub fn new(delimiter: char) -> Self {
        Self { delimiter }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn parse(&self, row: &str) -> Vec<String> {
        let mut fields = Vec::new();
        let mut field = String::new();
        let mut quoted = false;
        let mut chars = row.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '"' {
                if quoted && chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    quoted = !quoted;
                }
            } else if c == self.delimiter && !quoted {
                fields.push(std::mem::take(&mut field));
            } else {
                field.push(c);
            }
        }
        fields.push(field);
        fields
    }
}

impl Default for RowParser {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER)
    }
}
