//! Import-clause scanner.
//!
//! Reads only the header of a source file: the package clause followed
//! by any number of import declarations, single or parenthesized. Scanning
//! stops at the first token that starts anything else.

use std::path::Path;

use anyhow::{Context, Result};

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Ident(&'a str),
    Str(&'a str),
    Punct(u8),
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek_byte(&self, off: usize) -> Option<u8> {
        self.src.as_bytes().get(self.pos + off).copied()
    }

    fn skip_space_and_comments(&mut self) {
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() {
            match (bytes[self.pos], self.peek_byte(1)) {
                (b' ' | b'\t' | b'\r' | b'\n', _) => self.pos += 1,
                (b'/', Some(b'/')) => {
                    self.pos = self.src[self.pos..]
                        .find('\n')
                        .map_or(bytes.len(), |i| self.pos + i);
                }
                (b'/', Some(b'*')) => {
                    self.pos = self.src[self.pos + 2..]
                        .find("*/")
                        .map_or(bytes.len(), |i| self.pos + 2 + i + 2);
                }
                _ => return,
            }
        }
    }

    fn next(&mut self) -> Option<Token<'a>> {
        self.skip_space_and_comments();
        let bytes = self.src.as_bytes();
        let start = self.pos;
        let c = *bytes.get(start)?;
        let ch = self.src[start..].chars().next()?;

        if ch == '_' || ch.is_alphabetic() {
            let len = self.src[start..]
                .find(|ch: char| !(ch == '_' || ch.is_alphanumeric()))
                .unwrap_or(bytes.len() - start);
            self.pos += len;
            return Some(Token::Ident(&self.src[start..self.pos]));
        }
        if c == b'"' || c == b'`' {
            let mut i = start + 1;
            while i < bytes.len() && bytes[i] != c {
                if c == b'"' && bytes[i] == b'\\' {
                    i += 1;
                }
                i += 1;
            }
            self.pos = (i + 1).min(bytes.len());
            return Some(Token::Str(&self.src[start + 1..i.min(bytes.len())]));
        }
        self.pos += ch.len_utf8();
        Some(Token::Punct(c))
    }
}

/// Import paths declared by the source text, in order, without duplicates.
pub fn parse_imports(src: &str) -> Vec<String> {
    let mut lex = Lexer::new(src);
    let mut imports: Vec<String> = Vec::new();
    let mut push = |path: &str| {
        // cgo's pseudo-package is not a build target.
        if path != "C" && !imports.iter().any(|p| p == path) {
            imports.push(path.to_string());
        }
    };

    if lex.next() != Some(Token::Ident("package")) {
        return Vec::new();
    }
    let Some(Token::Ident(_)) = lex.next() else {
        return Vec::new();
    };

    loop {
        match lex.next() {
            Some(Token::Punct(b';')) => continue,
            Some(Token::Ident("import")) => {}
            _ => break,
        }
        match lex.next() {
            Some(Token::Punct(b'(')) => loop {
                match lex.next() {
                    Some(Token::Str(path)) => push(path),
                    Some(Token::Ident(_) | Token::Punct(b'.' | b';')) => {}
                    _ => break,
                }
            },
            Some(Token::Str(path)) => push(path),
            Some(Token::Ident(_) | Token::Punct(b'.')) => match lex.next() {
                Some(Token::Str(path)) => push(path),
                _ => break,
            },
            _ => break,
        }
    }
    imports
}

/// Import paths declared by the file at `path`.
pub fn read_imports(path: &Path) -> Result<Vec<String>> {
    let src =
        std::fs::read(path).with_context(|| format!("reading imports of {}", path.display()))?;
    Ok(parse_imports(&String::from_utf8_lossy(&src)))
}
