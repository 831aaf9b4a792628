use crate::ast::Span;
use crate::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    /// Identifiers and keywords alike; the parser decides which is which.
    Word(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// A line terminator separates this token from the previous one.
    pub newline_before: bool,
}

impl Token {
    pub fn is_punct(&self, p: &str) -> bool {
        matches!(&self.kind, TokenKind::Punct(q) if *q == p)
    }

    pub fn is_word(&self, w: &str) -> bool {
        matches!(&self.kind, TokenKind::Word(x) if x == w)
    }

    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Number(n) => format!("number {n}"),
            TokenKind::Str(s) => format!("string {s:?}"),
            TokenKind::Word(w) => format!("`{w}`"),
            TokenKind::Punct(p) => format!("`{p}`"),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

// Longest match first.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "**=", "...", "==", "!=", "<=", ">=", "&&", "||", "??", "=>", "++", "--", "+=",
    "-=", "*=", "/=", "%=", "**", "+", "-", "*", "/", "%", "<", ">", "=", "!", "?", ":", ";", ",",
    ".", "(", ")", "{", "}", "[", "]",
];

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

pub fn tokenize(src: &str) -> Result<Vec<Token>, CompileError> {
    let mut lexer = Lexer {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
    };
    lexer.run()
}

impl Lexer {
    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }

    /// Skips whitespace and comments; reports whether a line break was crossed.
    fn skip_trivia(&mut self) -> Result<bool, CompileError> {
        let mut newline = false;
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some('\n'), _) => {
                    newline = true;
                    self.bump();
                }
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek(0) {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.span();
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek(0), self.peek(1)) {
                            (Some('*'), Some('/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (Some(c), _) => {
                                if c == '\n' {
                                    newline = true;
                                }
                                self.bump();
                            }
                            (None, _) => {
                                return Err(CompileError::parse("unterminated comment", start))
                            }
                        }
                    }
                }
                _ => return Ok(newline),
            }
        }
    }

    fn run(&mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            let newline_before = self.skip_trivia()?;
            let span = self.span();
            let Some(c) = self.peek(0) else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    span,
                    newline_before: true,
                });
                return Ok(tokens);
            };
            let kind = if c.is_ascii_digit() || (c == '.' && self.peek(1).is_some_and(|d| d.is_ascii_digit())) {
                self.number(span)?
            } else if c == '"' || c == '\'' {
                self.string(c, span)?
            } else if c.is_alphabetic() || c == '_' || c == '$' {
                let mut word = String::new();
                while let Some(c) = self.peek(0) {
                    if c.is_alphanumeric() || c == '_' || c == '$' {
                        word.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                TokenKind::Word(word)
            } else {
                self.punct(span)?
            };
            tokens.push(Token {
                kind,
                span,
                newline_before,
            });
        }
    }

    fn number(&mut self, span: Span) -> Result<TokenKind, CompileError> {
        if self.peek(0) == Some('0') && matches!(self.peek(1), Some('x' | 'X')) {
            self.bump();
            self.bump();
            let mut digits = String::new();
            while let Some(c) = self.peek(0).filter(|c| c.is_ascii_hexdigit()) {
                digits.push(c);
                self.bump();
            }
            return u64::from_str_radix(&digits, 16)
                .map(|v| TokenKind::Number(v as f64))
                .map_err(|_| CompileError::parse("malformed hex literal", span));
        }
        let mut text = String::new();
        while let Some(c) = self.peek(0).filter(|c| c.is_ascii_digit()) {
            text.push(c);
            self.bump();
        }
        if self.peek(0) == Some('.') && self.peek(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.bump();
            while let Some(c) = self.peek(0).filter(|c| c.is_ascii_digit()) {
                text.push(c);
                self.bump();
            }
        } else if self.peek(0) == Some('.') && !self.peek(1).is_some_and(|c| c.is_alphabetic()) {
            // `1.` is a complete literal; `1.foo` is a member access.
            self.bump();
        }
        if matches!(self.peek(0), Some('e' | 'E')) {
            let sign = matches!(self.peek(1), Some('+' | '-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                for _ in 0..digit_at {
                    if let Some(c) = self.bump() {
                        text.push(c);
                    }
                }
                while let Some(c) = self.peek(0).filter(|c| c.is_ascii_digit()) {
                    text.push(c);
                    self.bump();
                }
            }
        }
        if self.peek(0).is_some_and(|c| c.is_alphabetic() || c == '_') {
            return Err(CompileError::parse("identifier starts immediately after number", self.span()));
        }
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| CompileError::parse(format!("malformed number `{text}`"), span))
    }

    fn string(&mut self, quote: char, span: Span) -> Result<TokenKind, CompileError> {
        self.bump();
        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(CompileError::parse("unterminated string", span));
            };
            match c {
                c if c == quote => return Ok(TokenKind::Str(out)),
                '\n' => return Err(CompileError::parse("unterminated string", span)),
                '\\' => {
                    let esc_span = self.span();
                    let Some(e) = self.bump() else {
                        return Err(CompileError::parse("unterminated string", span));
                    };
                    match e {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        '0' => out.push('\0'),
                        'u' => out.push(self.unicode_escape(esc_span)?),
                        other => out.push(other),
                    }
                }
                c => out.push(c),
            }
        }
    }

    fn unicode_escape(&mut self, span: Span) -> Result<char, CompileError> {
        let code = self.unicode_escape_raw(span)?;
        // Surrogate pairs are folded into one scalar.
        if (0xD800..0xDC00).contains(&code) && self.peek(0) == Some('\\') && self.peek(1) == Some('u') {
            self.bump();
            self.bump();
            let low = self.unicode_escape_raw(span)?;
            let combined = 0x10000 + ((code - 0xD800) << 10) + (low.wrapping_sub(0xDC00));
            return char::from_u32(combined)
                .ok_or_else(|| CompileError::parse("malformed unicode escape", span));
        }
        char::from_u32(code).ok_or_else(|| CompileError::parse("malformed unicode escape", span))
    }

    fn unicode_escape_raw(&mut self, span: Span) -> Result<u32, CompileError> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| CompileError::parse("malformed unicode escape", span))?;
            code = code * 16 + digit;
        }
        Ok(code)
    }

    fn punct(&mut self, span: Span) -> Result<TokenKind, CompileError> {
        let rest: String = self.chars[self.pos..self.chars.len().min(self.pos + 3)]
            .iter()
            .collect();
        for p in PUNCTUATORS {
            if rest.starts_with(p) {
                for _ in 0..p.chars().count() {
                    self.bump();
                }
                return Ok(TokenKind::Punct(*p));
            }
        }
        let c = rest.chars().next().unwrap_or(' ');
        Err(CompileError::parse(format!("unexpected character `{c}`"), span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn splits_longest_punctuators() {
        assert_eq!(
            kinds("a === b ** 2"),
            vec![
                TokenKind::Word("a".into()),
                TokenKind::Punct("==="),
                TokenKind::Word("b".into()),
                TokenKind::Punct("**"),
                TokenKind::Number(2.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers_and_strings() {
        assert_eq!(
            kinds("1.5e3 0x1f 'a\\n' \"\\u0041\""),
            vec![
                TokenKind::Number(1500.0),
                TokenKind::Number(31.0),
                TokenKind::Str("a\n".into()),
                TokenKind::Str("A".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tracks_newlines_and_positions() {
        let toks = tokenize("a // c\n  /* x\n */ b").unwrap();
        assert!(!toks[0].newline_before);
        assert!(toks[1].newline_before);
        assert_eq!(toks[1].span, Span::new(3, 5));
    }

    #[test]
    fn reports_bad_character() {
        let err = tokenize("a # b").unwrap_err();
        assert_eq!(err.span(), Span::new(1, 3));
    }
}
