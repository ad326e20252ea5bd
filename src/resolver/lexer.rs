//! Tokenizer shared by the Protobuf IDL and GraphQL SDL parsers.

use crate::error::ResolveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(String),
    StringLit(String),
    /// Any other single punctuation character.
    Punct(char),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Token { kind, span }
    }
}

/// Comment syntax of the language being tokenized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// `// line` and `/* block */`
    CFamily,
    /// `# line`
    Hash,
}

pub struct Lexer<'a> {
    document: &'a str,
    bytes: &'a [u8],
    pos: usize,
    comments: CommentStyle,
}

impl<'a> Lexer<'a> {
    pub fn new(document: &'a str, source: &'a str, comments: CommentStyle) -> Self {
        Lexer {
            document,
            bytes: source.as_bytes(),
            pos: 0,
            comments,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, ResolveError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            if self.pos >= self.bytes.len() {
                tokens.push(Token::new(TokenKind::Eof, Span::new(self.pos, self.pos)));
                break;
            }
            tokens.push(self.next_token()?);
        }
        Ok(tokens)
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> ResolveError {
        ResolveError::Syntax {
            document: self.document.to_string(),
            offset,
            message: message.into(),
        }
    }

    fn peek_byte(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), ResolveError> {
        while let Some(ch) = self.peek_byte(0) {
            if ch.is_ascii_whitespace() || (ch == b',' && self.comments == CommentStyle::Hash) {
                // commas are insignificant in GraphQL
                self.pos += 1;
            } else if ch == b'#' && self.comments == CommentStyle::Hash {
                self.skip_line();
            } else if ch == b'/' && self.comments == CommentStyle::CFamily {
                match self.peek_byte(1) {
                    Some(b'/') => self.skip_line(),
                    Some(b'*') => {
                        let start = self.pos;
                        self.pos += 2;
                        loop {
                            match (self.peek_byte(0), self.peek_byte(1)) {
                                (Some(b'*'), Some(b'/')) => {
                                    self.pos += 2;
                                    break;
                                }
                                (Some(_), _) => self.pos += 1,
                                (None, _) => return Err(self.error(start, "unterminated comment")),
                            }
                        }
                    }
                    _ => break,
                }
            } else if ch == 0xEF && self.pos == 0 {
                // byte order mark
                self.pos += 3;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn skip_line(&mut self) {
        while let Some(ch) = self.peek_byte(0) {
            if ch == b'\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> Result<Token, ResolveError> {
        let start = self.pos;
        let ch = self.bytes[self.pos];

        if ch.is_ascii_alphabetic() || ch == b'_' {
            while self
                .peek_byte(0)
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
            {
                self.pos += 1;
            }
            let ident = self.slice(start);
            return Ok(Token::new(TokenKind::Ident(ident), Span::new(start, self.pos)));
        }

        if ch.is_ascii_digit()
            || (ch == b'-' && self.peek_byte(1).is_some_and(|c| c.is_ascii_digit()))
        {
            self.pos += 1;
            while let Some(c) = self.peek_byte(0) {
                let exponent_sign = (c == b'+' || c == b'-')
                    && matches!(self.bytes[self.pos - 1], b'e' | b'E')
                    && !self.bytes[start..self.pos].starts_with(b"0x");
                if c.is_ascii_alphanumeric() || c == b'.' || c == b'_' || exponent_sign {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            let number = self.slice(start);
            return Ok(Token::new(TokenKind::Number(number), Span::new(start, self.pos)));
        }

        if ch == b'"' || ch == b'\'' {
            return self.lex_string(ch);
        }

        // Multi-byte UTF-8 outside strings and comments is not part of either grammar.
        if !ch.is_ascii() {
            return Err(self.error(start, "unexpected non-ASCII character"));
        }

        self.pos += 1;
        Ok(Token::new(TokenKind::Punct(ch as char), Span::new(start, self.pos)))
    }

    fn lex_string(&mut self, quote: u8) -> Result<Token, ResolveError> {
        let start = self.pos;

        if quote == b'"'
            && self.comments == CommentStyle::Hash
            && self.bytes[self.pos..].starts_with(b"\"\"\"")
        {
            self.pos += 3;
            let body_start = self.pos;
            while !self.bytes[self.pos..].starts_with(b"\"\"\"") {
                if self.pos >= self.bytes.len() {
                    return Err(self.error(start, "unterminated block string"));
                }
                self.pos += 1;
            }
            let body = String::from_utf8_lossy(&self.bytes[body_start..self.pos]).into_owned();
            self.pos += 3;
            return Ok(Token::new(TokenKind::StringLit(body), Span::new(start, self.pos)));
        }

        self.pos += 1;
        let mut value = Vec::new();
        loop {
            match self.peek_byte(0) {
                None | Some(b'\n') => return Err(self.error(start, "unterminated string")),
                Some(b'\\') => {
                    let escaped = self
                        .peek_byte(1)
                        .ok_or_else(|| self.error(start, "unterminated string"))?;
                    value.push(match escaped {
                        b'n' => b'\n',
                        b't' => b'\t',
                        b'r' => b'\r',
                        other => other,
                    });
                    self.pos += 2;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }
        let value = String::from_utf8_lossy(&value).into_owned();
        Ok(Token::new(TokenKind::StringLit(value), Span::new(start, self.pos)))
    }

    fn slice(&self, start: usize) -> String {
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }
}

/// Token cursor with the lookahead helpers both parsers need.
pub struct Cursor<'a> {
    document: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(document: &'a str, source: &'a str, comments: CommentStyle) -> Result<Self, ResolveError> {
        let tokens = Lexer::new(document, source, comments).tokenize()?;
        Ok(Cursor {
            document,
            tokens,
            pos: 0,
        })
    }

    pub fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    pub fn peek_at(&self, ahead: usize) -> &TokenKind {
        let index = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    pub fn span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    /// End offset of the most recently consumed token.
    pub fn previous_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .map(|i| self.tokens[i].span.end)
            .unwrap_or(0)
    }

    pub fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    pub fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    pub fn is_punct(&self, c: char) -> bool {
        matches!(self.peek(), TokenKind::Punct(p) if *p == c)
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), TokenKind::Ident(i) if i == keyword)
    }

    pub fn eat_punct(&mut self, c: char) -> bool {
        if self.is_punct(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn expect_punct(&mut self, c: char) -> Result<(), ResolveError> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", c)))
        }
    }

    pub fn expect_ident(&mut self) -> Result<String, ResolveError> {
        match self.peek() {
            TokenKind::Ident(ident) => {
                let ident = ident.clone();
                self.advance();
                Ok(ident)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    pub fn expect_string(&mut self) -> Result<String, ResolveError> {
        match self.peek() {
            TokenKind::StringLit(value) => {
                let value = value.clone();
                self.advance();
                Ok(value)
            }
            _ => Err(self.unexpected("string literal")),
        }
    }

    /// Skip a balanced `open ... close` group; the cursor must be on `open`.
    pub fn skip_balanced(&mut self, open: char, close: char) -> Result<(), ResolveError> {
        self.expect_punct(open)?;
        let mut depth = 1usize;
        while depth > 0 {
            match self.advance() {
                TokenKind::Punct(c) if c == open => depth += 1,
                TokenKind::Punct(c) if c == close => depth -= 1,
                TokenKind::Eof => return Err(self.error(format!("missing '{}'", close))),
                _ => {}
            }
        }
        Ok(())
    }

    pub fn unexpected(&self, expected: &str) -> ResolveError {
        let found = match self.peek() {
            TokenKind::Ident(i) => format!("'{}'", i),
            TokenKind::Number(n) => n.clone(),
            TokenKind::StringLit(_) => "string literal".to_string(),
            TokenKind::Punct(c) => format!("'{}'", c),
            TokenKind::Eof => "end of input".to_string(),
        };
        self.error(format!("expected {}, found {}", expected, found))
    }

    pub fn error(&self, message: impl Into<String>) -> ResolveError {
        ResolveError::Syntax {
            document: self.document.to_string(),
            offset: self.span().start,
            message: message.into(),
        }
    }
}
