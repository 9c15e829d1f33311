//! Minimal SQL tokenizer
//!
//! Only distinguishes what the safety checks need: words, quoted
//! identifiers, string literals, numbers, structural punctuation,
//! comments and whitespace. Everything else is a single-char operator.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    QuotedIdent,
    StringLit,
    Number,
    Punct(char),
    Operator,
    Comment,
    Whitespace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    /// Raw source slice including quotes or comment markers
    pub text: &'a str,
    /// Unquoted value for identifiers and literals, raw text otherwise
    pub value: String,
}

impl<'a> Token<'a> {
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Comment | TokenKind::Whitespace)
    }

    /// Case-insensitive keyword comparison on bare words
    pub fn is_word(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct(c)
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Split SQL text into tokens. Never fails: unterminated quotes or
/// comments run to the end of input.
pub fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let b = bytes[i];

        let kind = if b.is_ascii_whitespace() {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            TokenKind::Whitespace
        } else if b == b'-' && bytes.get(i + 1) == Some(&b'-') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            TokenKind::Comment
        } else if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i += 2;
            while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                i += 1;
            }
            i = (i + 2).min(bytes.len());
            TokenKind::Comment
        } else if b == b'\'' {
            i = scan_quoted(bytes, i, b'\'');
            TokenKind::StringLit
        } else if b == b'"' || b == b'`' {
            i = scan_quoted(bytes, i, b);
            TokenKind::QuotedIdent
        } else if b == b'[' {
            while i < bytes.len() && bytes[i] != b']' {
                i += 1;
            }
            i = (i + 1).min(bytes.len());
            TokenKind::QuotedIdent
        } else if b.is_ascii_digit()
            || (b == b'.' && bytes.get(i + 1).is_some_and(|n| n.is_ascii_digit()))
        {
            while i < bytes.len() && (is_word_byte(bytes[i]) || bytes[i] == b'.') {
                i += 1;
            }
            TokenKind::Number
        } else if is_word_byte(b) {
            while i < bytes.len() && is_word_byte(bytes[i]) {
                i += 1;
            }
            TokenKind::Word
        } else if matches!(b, b';' | b',' | b'.' | b'(' | b')') {
            i += 1;
            TokenKind::Punct(b as char)
        } else {
            i += 1;
            TokenKind::Operator
        };

        let text = &sql[start..i];
        let value = match kind {
            TokenKind::StringLit | TokenKind::QuotedIdent => unquote(text),
            _ => text.to_string(),
        };
        tokens.push(Token { kind, text, value });
    }

    tokens
}

/// Returns the index just past the closing quote. A doubled quote is an
/// escaped quote character.
fn scan_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn unquote(text: &str) -> String {
    let mut chars = text.chars();
    let open = match chars.next() {
        Some(c) => c,
        None => return String::new(),
    };
    let close = if open == '[' { ']' } else { open };
    let inner = text[open.len_utf8()..].strip_suffix(close).unwrap_or(&text[open.len_utf8()..]);
    if open == '[' {
        inner.to_string()
    } else {
        let doubled: String = [close, close].iter().collect();
        inner.replace(&doubled, &close.to_string())
    }
}
