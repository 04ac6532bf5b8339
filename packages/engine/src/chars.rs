#![allow(non_upper_case_globals)]

//! Character constants used by the XML front end

pub const EOF: char = '\0';
pub const TAB: char = '\t';
pub const NEWLINE: char = '\n';
pub const CR: char = '\r';
pub const SPACE: char = ' ';

pub const BANG: char = '!';
pub const DQ: char = '"';
pub const AMPERSAND: char = '&';
pub const SQ: char = '\'';
pub const MINUS: char = '-';
pub const SLASH: char = '/';
pub const COLON: char = ':';
pub const SEMICOLON: char = ';';
pub const LT: char = '<';
pub const EQ: char = '=';
pub const GT: char = '>';
pub const QUESTION: char = '?';
pub const LBRACKET: char = '[';
pub const RBRACKET: char = ']';
pub const UNDERSCORE: char = '_';

/// Whitespace per the XML production `S`.
pub fn is_whitespace(ch: char) -> bool {
    matches!(ch, SPACE | TAB | NEWLINE | CR)
}

/// First character of an XML name.
pub fn is_name_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == UNDERSCORE || ch == COLON
}

/// Any subsequent character of an XML name.
pub fn is_name_char(ch: char) -> bool {
    is_name_start(ch) || ch.is_ascii_digit() || matches!(ch, '-' | '.')
}
