//! Script tokenizer.
//!
//! Produces a lazy token stream from raw source text. Identifiers are
//! case-insensitive (canonical form is lower-case), strings escape quotes by
//! doubling, and embedded SQL is captured as a start/body/end token triple so
//! the parser can lift statements out verbatim.

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Comment,
    Str,
    Ident,
    Keyword,
    Number,
    Punct,
    SqlBlockStart,
    SqlBlockBody,
    SqlBlockEnd,
    Newline,
    Eof,
}

/// One lexed token. `text` is the verbatim slice; identifiers expose a
/// canonical lower-case form through [`Token::canonical`].
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
    pub col: u32,
}

impl Token {
    pub fn canonical(&self) -> String {
        self.text.to_lowercase()
    }

    /// For `Str` tokens, the content without quotes, with doubled quotes
    /// collapsed. Other kinds return the raw text.
    pub fn string_value(&self) -> String {
        if self.kind != TokenKind::Str || self.text.len() < 2 {
            return self.text.clone();
        }
        let quote = self.text.chars().next().unwrap_or('"');
        let inner = &self.text[1..self.text.len().saturating_sub(1)];
        let doubled = format!("{quote}{quote}");
        inner.replace(&doubled, &quote.to_string())
    }

    pub fn is_keyword(&self, word: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text.eq_ignore_ascii_case(word)
    }

    pub fn is_punct(&self, ch: char) -> bool {
        self.kind == TokenKind::Punct && self.text.len() == 1 && self.text.starts_with(ch)
    }
}

/// Control words of the script language, lower-case.
const KEYWORDS: &[&str] = &[
    "if", "then", "else", "elseif", "end", "for", "to", "next", "do", "loop",
    "while", "until", "choose", "case", "return", "exit", "continue",
    "function", "subroutine", "event", "on", "type", "forward", "from",
    "global", "shared", "public", "private", "protected", "open",
    "openwithparm", "close", "trigger", "triggerevent", "post", "postevent",
    "create", "destroy", "not", "and", "or",
];

/// Keywords that open an embedded SQL block when they appear at statement
/// position.
const SQL_STARTERS: &[&str] = &[
    "select", "insert", "update", "delete", "merge", "declare", "open",
    "fetch", "close", "commit", "rollback",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word.to_lowercase().as_str())
}

/// Lazy tokenizer over a source text.
pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
    at_statement_start: bool,
    done: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            at_statement_start: true,
            done: false,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(byte)
    }

    fn make(&self, kind: TokenKind, text: String, line: u32, col: u32) -> Token {
        Token { kind, text, line, col }
    }

    fn skip_blanks(&mut self) {
        while let Some(byte) = self.peek() {
            if byte == b' ' || byte == b'\t' || byte == b'\r' {
                self.bump();
            } else if byte == b'&'
                && matches!(self.peek_at(1), Some(b'\n') | Some(b'\r'))
            {
                // line continuation: ampersand at end of line
                self.bump();
                while matches!(self.peek(), Some(b'\r')) {
                    self.bump();
                }
                if self.peek() == Some(b'\n') {
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    fn read_string(&mut self, quote: u8, line: u32, col: u32) -> Token {
        let start = self.pos;
        self.bump();
        while let Some(byte) = self.peek() {
            if byte == quote {
                if self.peek_at(1) == Some(quote) {
                    self.bump();
                    self.bump();
                    continue;
                }
                self.bump();
                break;
            }
            self.bump();
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        self.make(TokenKind::Str, text, line, col)
    }

    fn read_line_comment(&mut self, line: u32, col: u32) -> Token {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte == b'\n' {
                break;
            }
            self.bump();
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        self.make(TokenKind::Comment, text, line, col)
    }

    fn read_block_comment(&mut self, line: u32, col: u32) -> Token {
        let start = self.pos;
        self.bump();
        self.bump();
        while let Some(byte) = self.peek() {
            if byte == b'*' && self.peek_at(1) == Some(b'/') {
                self.bump();
                self.bump();
                break;
            }
            self.bump();
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        self.make(TokenKind::Comment, text, line, col)
    }

    fn read_number(&mut self, line: u32, col: u32) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.bump();
        }
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(b'0'..=b'9')) {
            self.bump();
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.bump();
            }
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        self.make(TokenKind::Number, text, line, col)
    }

    fn read_word(&mut self, line: u32, col: u32) -> Token {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$' || byte == b'#' {
                self.bump();
            } else {
                break;
            }
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let kind = if is_keyword(&text) {
            TokenKind::Keyword
        } else {
            TokenKind::Ident
        };
        self.make(kind, text, line, col)
    }

    /// Whether a word at statement position opens an embedded SQL block.
    /// `open`/`close` are shared with the script language; the SQL form is
    /// not followed by a parenthesis.
    fn starts_sql_block(&self, word: &str) -> bool {
        if !self.at_statement_start {
            return false;
        }
        let lower = word.to_lowercase();
        if !SQL_STARTERS.contains(&lower.as_str()) {
            return false;
        }
        if lower == "open" || lower == "close" {
            let mut offset = 0;
            while let Some(byte) = self.peek_at(offset) {
                match byte {
                    b' ' | b'\t' | b'\r' => offset += 1,
                    b'(' => return false,
                    _ => break,
                }
            }
        }
        true
    }

    /// Consume the body of an embedded SQL block up to a statement-level
    /// semicolon. Semicolons inside strings or parentheses do not terminate.
    fn read_sql_body(&mut self) -> (Token, Option<Token>) {
        let body_line = self.line;
        let body_col = self.col;
        let start = self.pos;
        let mut depth: i32 = 0;
        let mut terminator = None;

        while let Some(byte) = self.peek() {
            match byte {
                b'\'' | b'"' => {
                    let quote = byte;
                    self.bump();
                    while let Some(inner) = self.peek() {
                        if inner == quote {
                            if self.peek_at(1) == Some(quote) {
                                self.bump();
                                self.bump();
                                continue;
                            }
                            self.bump();
                            break;
                        }
                        self.bump();
                    }
                }
                b'(' => {
                    depth += 1;
                    self.bump();
                }
                b')' => {
                    depth -= 1;
                    self.bump();
                }
                b';' if depth <= 0 => {
                    let line = self.line;
                    let col = self.col;
                    let body_end = self.pos;
                    self.bump();
                    terminator = Some((body_end, line, col));
                    break;
                }
                _ => {
                    self.bump();
                }
            }
        }

        let body_end = terminator.map(|(end, _, _)| end).unwrap_or(self.pos);
        let body_text = String::from_utf8_lossy(&self.src[start..body_end]).into_owned();
        let body = self.make(TokenKind::SqlBlockBody, body_text, body_line, body_col);
        let end = terminator.map(|(_, line, col)| {
            self.make(TokenKind::SqlBlockEnd, ";".to_string(), line, col)
        });
        (body, end)
    }

    fn next_token(&mut self) -> Option<Token> {
        if self.done {
            return None;
        }
        self.skip_blanks();

        let line = self.line;
        let col = self.col;
        let byte = match self.peek() {
            Some(byte) => byte,
            None => {
                self.done = true;
                return Some(self.make(TokenKind::Eof, String::new(), line, col));
            }
        };

        let token = match byte {
            b'\n' => {
                self.bump();
                self.at_statement_start = true;
                return Some(self.make(TokenKind::Newline, "\n".to_string(), line, col));
            }
            b'/' if self.peek_at(1) == Some(b'/') => self.read_line_comment(line, col),
            b'/' if self.peek_at(1) == Some(b'*') => self.read_block_comment(line, col),
            b'\'' | b'"' => self.read_string(byte, line, col),
            b'0'..=b'9' => self.read_number(line, col),
            byte if byte.is_ascii_alphabetic() || byte == b'_' => {
                let word = self.read_word(line, col);
                if self.starts_sql_block(&word.text) {
                    let start = Token {
                        kind: TokenKind::SqlBlockStart,
                        ..word
                    };
                    self.at_statement_start = false;
                    return Some(start);
                }
                word
            }
            _ => {
                self.bump();
                let text = (byte as char).to_string();
                let token = self.make(TokenKind::Punct, text, line, col);
                if byte == b';' {
                    self.at_statement_start = true;
                    return Some(token);
                }
                token
            }
        };

        if token.kind != TokenKind::Comment {
            self.at_statement_start = false;
        }
        Some(token)
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.next_token()
    }
}

/// Tokenize a whole source text. SQL blocks expand to a start/body/end
/// triple in the output stream.
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut lexer = Lexer::new(source);
    while let Some(token) = lexer.next_token() {
        let is_sql_start = token.kind == TokenKind::SqlBlockStart;
        let is_eof = token.kind == TokenKind::Eof;
        tokens.push(token);
        if is_sql_start {
            let (body, end) = lexer.read_sql_body();
            tokens.push(body);
            if let Some(end) = end {
                tokens.push(end);
                lexer.at_statement_start = true;
            }
        }
        if is_eof {
            break;
        }
    }
    tokens
}
