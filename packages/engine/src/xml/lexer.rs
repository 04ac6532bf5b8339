//! XML tokenizer
//!
//! Converts source text into a flat token stream consumed by the tree
//! builder. Entities are decoded here; structural validation happens later.

use crate::chars;
use crate::parse_util::{ParseError, ParseLocation, ParseSourceFile, ParseSourceSpan};

/// Token kinds emitted by the tokenizer.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// `<name` — attributes follow until `TagOpenEnd` or `TagSelfClose`.
    TagOpenStart(String),
    AttrName(String),
    AttrValue(String),
    /// `>` closing a start tag.
    TagOpenEnd,
    /// `/>` closing a self-closing tag.
    TagSelfClose,
    /// `</name>`
    TagClose(String),
    Text(String),
    Comment(String),
    Cdata(String),
    /// `<?...?>` and `<!DOCTYPE ...>`; carried so the builder can skip them.
    Prolog,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub span: ParseSourceSpan,
}

/// Tokenization result
#[derive(Debug)]
pub struct TokenizeResult {
    pub tokens: Vec<Token>,
    pub errors: Vec<ParseError>,
}

/// Main tokenization entry point.
pub fn tokenize(source: &str, url: &str) -> TokenizeResult {
    let file = ParseSourceFile::new(source.to_string(), url.to_string());
    let mut tokenizer = Tokenizer::new(file);
    tokenizer.tokenize();
    TokenizeResult {
        tokens: tokenizer.tokens,
        errors: tokenizer.errors,
    }
}

struct Tokenizer {
    file: ParseSourceFile,
    input: Vec<char>,
    index: usize,
    line: usize,
    col: usize,
    tokens: Vec<Token>,
    errors: Vec<ParseError>,
}

impl Tokenizer {
    fn new(file: ParseSourceFile) -> Self {
        let input: Vec<char> = file.content.chars().collect();
        Tokenizer {
            file,
            input,
            index: 0,
            line: 0,
            col: 0,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn peek(&self) -> char {
        *self.input.get(self.index).unwrap_or(&chars::EOF)
    }

    fn peek_at(&self, ahead: usize) -> char {
        *self.input.get(self.index + ahead).unwrap_or(&chars::EOF)
    }

    fn advance(&mut self) -> char {
        let ch = self.peek();
        if ch != chars::EOF {
            self.index += 1;
            if ch == chars::NEWLINE {
                self.line += 1;
                self.col = 0;
            } else {
                self.col += 1;
            }
        }
        ch
    }

    fn location(&self) -> ParseLocation {
        ParseLocation::new(self.file.clone(), self.index, self.line, self.col)
    }

    fn span_from(&self, start: &ParseLocation) -> ParseSourceSpan {
        ParseSourceSpan::new(start.clone(), self.location())
    }

    fn emit(&mut self, kind: TokenKind, start: ParseLocation) {
        let span = self.span_from(&start);
        self.tokens.push(Token { kind, span });
    }

    fn error(&mut self, msg: impl Into<String>, start: ParseLocation) {
        let span = self.span_from(&start);
        self.errors.push(ParseError::new(span, msg));
    }

    fn at_eof(&self) -> bool {
        self.index >= self.input.len()
    }

    fn attempt(&mut self, literal: &str) -> bool {
        let chars: Vec<char> = literal.chars().collect();
        for (i, expected) in chars.iter().enumerate() {
            if self.peek_at(i) != *expected {
                return false;
            }
        }
        for _ in 0..chars.len() {
            self.advance();
        }
        true
    }

    fn skip_whitespace(&mut self) {
        while chars::is_whitespace(self.peek()) {
            self.advance();
        }
    }

    fn consume_name(&mut self) -> String {
        let mut name = String::new();
        if chars::is_name_start(self.peek()) {
            name.push(self.advance());
            while chars::is_name_char(self.peek()) {
                name.push(self.advance());
            }
        }
        name
    }

    fn tokenize(&mut self) {
        while !self.at_eof() {
            if self.peek() == chars::LT {
                self.consume_markup();
            } else {
                self.consume_text();
            }
        }
        let start = self.location();
        self.emit(TokenKind::Eof, start);
    }

    fn consume_markup(&mut self) {
        let start = self.location();
        if self.attempt("<!--") {
            self.consume_comment(start);
        } else if self.attempt("<![CDATA[") {
            self.consume_cdata(start);
        } else if self.attempt("<!") {
            self.consume_until('>');
            self.emit(TokenKind::Prolog, start);
        } else if self.attempt("<?") {
            self.consume_processing_instruction(start);
        } else if self.peek_at(1) == chars::SLASH {
            self.consume_close_tag(start);
        } else {
            self.consume_open_tag(start);
        }
    }

    fn consume_until(&mut self, terminator: char) {
        while !self.at_eof() && self.peek() != terminator {
            self.advance();
        }
        self.advance();
    }

    fn consume_comment(&mut self, start: ParseLocation) {
        let mut value = String::new();
        loop {
            if self.at_eof() {
                self.error("unterminated comment", start.clone());
                break;
            }
            if self.attempt("-->") {
                break;
            }
            value.push(self.advance());
        }
        self.emit(TokenKind::Comment(value), start);
    }

    fn consume_cdata(&mut self, start: ParseLocation) {
        let mut value = String::new();
        loop {
            if self.at_eof() {
                self.error("unterminated CDATA section", start.clone());
                break;
            }
            if self.attempt("]]>") {
                break;
            }
            value.push(self.advance());
        }
        self.emit(TokenKind::Cdata(value), start);
    }

    fn consume_processing_instruction(&mut self, start: ParseLocation) {
        loop {
            if self.at_eof() {
                self.error("unterminated processing instruction", start.clone());
                break;
            }
            if self.attempt("?>") {
                break;
            }
            self.advance();
        }
        self.emit(TokenKind::Prolog, start);
    }

    fn consume_close_tag(&mut self, start: ParseLocation) {
        self.advance(); // <
        self.advance(); // /
        let name = self.consume_name();
        if name.is_empty() {
            self.error("expected element name in close tag", start.clone());
        }
        self.skip_whitespace();
        if self.peek() == chars::GT {
            self.advance();
        } else {
            self.error(format!("malformed close tag '</{}'", name), start.clone());
            self.consume_until(chars::GT);
        }
        self.emit(TokenKind::TagClose(name), start);
    }

    fn consume_open_tag(&mut self, start: ParseLocation) {
        self.advance(); // <
        let name = self.consume_name();
        if name.is_empty() {
            self.error("expected element name after '<'", start.clone());
            self.emit(TokenKind::Text("<".to_string()), start);
            return;
        }
        self.emit(TokenKind::TagOpenStart(name), start);

        loop {
            self.skip_whitespace();
            let ch = self.peek();
            if ch == chars::GT {
                let tag_end = self.location();
                self.advance();
                self.emit(TokenKind::TagOpenEnd, tag_end);
                return;
            }
            if ch == chars::SLASH && self.peek_at(1) == chars::GT {
                let tag_end = self.location();
                self.advance();
                self.advance();
                self.emit(TokenKind::TagSelfClose, tag_end);
                return;
            }
            if ch == chars::EOF {
                let here = self.location();
                self.error("unterminated start tag", here);
                return;
            }
            self.consume_attribute();
        }
    }

    fn consume_attribute(&mut self) {
        let start = self.location();
        let name = self.consume_name();
        if name.is_empty() {
            self.error("expected attribute name", start);
            self.advance();
            return;
        }
        self.emit(TokenKind::AttrName(name), start);

        self.skip_whitespace();
        if self.peek() != chars::EQ {
            // Attribute without a value; emit an empty one to keep pairs aligned.
            let here = self.location();
            self.emit(TokenKind::AttrValue(String::new()), here);
            return;
        }
        self.advance(); // =
        self.skip_whitespace();

        let value_start = self.location();
        let quote = self.peek();
        if quote != chars::DQ && quote != chars::SQ {
            self.error("expected quoted attribute value", value_start);
            return;
        }
        self.advance();
        let mut value = String::new();
        loop {
            let ch = self.peek();
            if ch == chars::EOF {
                self.error("unterminated attribute value", value_start.clone());
                break;
            }
            if ch == quote {
                self.advance();
                break;
            }
            if ch == chars::AMPERSAND {
                value.push_str(&self.consume_entity());
            } else {
                value.push(self.advance());
            }
        }
        self.emit(TokenKind::AttrValue(value), value_start);
    }

    fn consume_text(&mut self) {
        let start = self.location();
        let mut value = String::new();
        while !self.at_eof() && self.peek() != chars::LT {
            if self.peek() == chars::AMPERSAND {
                value.push_str(&self.consume_entity());
            } else {
                value.push(self.advance());
            }
        }
        self.emit(TokenKind::Text(value), start);
    }

    /// Decode a character reference; an unknown reference is kept verbatim.
    fn consume_entity(&mut self) -> String {
        let start = self.location();
        self.advance(); // &
        let mut body = String::new();
        while !self.at_eof() && self.peek() != chars::SEMICOLON && body.len() < 12 {
            body.push(self.advance());
        }
        if self.peek() != chars::SEMICOLON {
            self.error(format!("unterminated entity '&{}'", body), start);
            return format!("&{}", body);
        }
        self.advance(); // ;

        let decoded = match body.as_str() {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => {
                if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
                } else if let Some(dec) = body.strip_prefix('#') {
                    dec.parse::<u32>().ok().and_then(char::from_u32)
                } else {
                    None
                }
            }
        };
        match decoded {
            Some(ch) => ch.to_string(),
            None => {
                self.error(format!("unknown entity '&{};'", body), start);
                format!("&{};", body)
            }
        }
    }
}
