use std::iter::Peekable;
use std::str::CharIndices;

use phf::phf_map;

use crate::token::{Token, TokenType};

#[derive(Debug)]
pub struct ScanErrors(pub Vec<ScanError>);

impl std::error::Error for ScanErrors {}

impl std::fmt::Display for ScanErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Found {} errors during scanning", self.0.len())?;
        for error in &self.0 {
            writeln!(f, "{}", error)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("[line {line}] Unexpected character '{found}'.")]
    UnexpectedCharacter { found: char, line: usize },
    #[error("[line {line}] Unterminated string.")]
    UnterminatedString { line: usize },
    #[error("[line {line}] Unterminated block comment.")]
    UnterminatedBlockComment { line: usize },
}

static KEYWORDS: phf::Map<&'static str, TokenType> = phf_map! {
    "and" => TokenType::And,
    "class" => TokenType::Class,
    "else" => TokenType::Else,
    "false" => TokenType::False,
    "for" => TokenType::For,
    "fun" => TokenType::Fun,
    "if" => TokenType::If,
    "nil" => TokenType::Nil,
    "or" => TokenType::Or,
    "print" => TokenType::Print,
    "return" => TokenType::Return,
    "super" => TokenType::Super,
    "this" => TokenType::This,
    "true" => TokenType::True,
    "var" => TokenType::Var,
    "while" => TokenType::While,
};

struct Scanner<'a> {
    source: &'a str,
    iter: Peekable<CharIndices<'a>>,
    start: usize,
    line: usize,
}

/// Scans the whole source, accumulating every lexical error instead of
/// stopping at the first. The token list always ends with an Eof token
/// carrying the final line number.
pub fn scan(source: &str) -> Result<Vec<Token>, ScanErrors> {
    let mut scanner = Scanner {
        source,
        iter: source.char_indices().peekable(),
        start: 0,
        line: 1,
    };
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    while let Some(&(idx, _)) = scanner.iter.peek() {
        scanner.start = idx;
        match scanner.scan_token() {
            Ok(Some(token)) => tokens.push(token),
            Ok(None) => {}
            Err(error) => errors.push(error),
        }
    }
    tokens.push(Token {
        token_type: TokenType::Eof,
        lexeme: String::new(),
        line: scanner.line,
    });

    if errors.is_empty() {
        Ok(tokens)
    } else {
        Err(ScanErrors(errors))
    }
}

impl<'a> Scanner<'a> {
    fn scan_token(&mut self) -> Result<Option<Token>, ScanError> {
        let Some((_, c)) = self.iter.next() else {
            return Ok(None);
        };
        match c {
            '(' => Ok(Some(self.token(TokenType::LeftParen))),
            ')' => Ok(Some(self.token(TokenType::RightParen))),
            '{' => Ok(Some(self.token(TokenType::LeftBrace))),
            '}' => Ok(Some(self.token(TokenType::RightBrace))),
            ',' => Ok(Some(self.token(TokenType::Comma))),
            '.' => Ok(Some(self.token(TokenType::Dot))),
            '-' => Ok(Some(self.token(TokenType::Minus))),
            '+' => Ok(Some(self.token(TokenType::Plus))),
            ';' => Ok(Some(self.token(TokenType::Semicolon))),
            '*' => Ok(Some(self.token(TokenType::Star))),
            '?' => Ok(Some(self.token(TokenType::Question))),
            ':' => Ok(Some(self.token(TokenType::Colon))),
            '!' => {
                let token_type = if self.next_if('=') {
                    TokenType::BangEqual
                } else {
                    TokenType::Bang
                };
                Ok(Some(self.token(token_type)))
            }
            '=' => {
                let token_type = if self.next_if('=') {
                    TokenType::EqualEqual
                } else {
                    TokenType::Equal
                };
                Ok(Some(self.token(token_type)))
            }
            '<' => {
                let token_type = if self.next_if('=') {
                    TokenType::LessEqual
                } else {
                    TokenType::Less
                };
                Ok(Some(self.token(token_type)))
            }
            '>' => {
                let token_type = if self.next_if('=') {
                    TokenType::GreaterEqual
                } else {
                    TokenType::Greater
                };
                Ok(Some(self.token(token_type)))
            }
            '/' => {
                if self.next_if('/') {
                    while let Some(&(_, c)) = self.iter.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.iter.next();
                    }
                    Ok(None)
                } else if self.next_if('*') {
                    self.block_comment().map(|_| None)
                } else {
                    Ok(Some(self.token(TokenType::Slash)))
                }
            }
            ' ' | '\r' | '\t' => Ok(None),
            '\n' => {
                self.line += 1;
                Ok(None)
            }
            '"' => self.string().map(Some),
            '0'..='9' => Ok(Some(self.number())),
            'a'..='z' | 'A'..='Z' | '_' => Ok(Some(self.identifier())),
            _ => Err(ScanError::UnexpectedCharacter {
                found: c,
                line: self.line,
            }),
        }
    }

    fn current(&mut self) -> usize {
        match self.iter.peek() {
            Some(&(idx, _)) => idx,
            None => self.source.len(),
        }
    }

    fn token(&mut self, token_type: TokenType) -> Token {
        let current = self.current();
        Token {
            token_type,
            lexeme: self.source[self.start..current].to_string(),
            line: self.line,
        }
    }

    fn next_if(&mut self, expected: char) -> bool {
        self.iter.next_if(|&(_, c)| c == expected).is_some()
    }

    // Block comments don't nest; a lone "*" inside is ordinary content.
    fn block_comment(&mut self) -> Result<(), ScanError> {
        loop {
            match self.iter.next() {
                None => {
                    return Err(ScanError::UnterminatedBlockComment { line: self.line });
                }
                Some((_, '\n')) => self.line += 1,
                Some((_, '*')) => {
                    if self.next_if('/') {
                        return Ok(());
                    }
                }
                Some(_) => {}
            }
        }
    }

    fn string(&mut self) -> Result<Token, ScanError> {
        while let Some(&(_, c)) = self.iter.peek() {
            match c {
                '"' => break,
                '\n' => {
                    self.line += 1;
                    self.iter.next();
                }
                _ => {
                    self.iter.next();
                }
            }
        }

        // The closing quote.
        if self.iter.next().is_none() {
            return Err(ScanError::UnterminatedString { line: self.line });
        }

        let current = self.current();
        let value = self.source[self.start + 1..current - 1].to_string();
        Ok(self.token(TokenType::String(value)))
    }

    fn number(&mut self) -> Token {
        while self.peek_digit() {
            self.iter.next();
        }

        // A '.' only belongs to the number when a digit follows it.
        if let Some(&(_, '.')) = self.iter.peek() {
            let mut lookahead = self.iter.clone();
            lookahead.next();
            if matches!(lookahead.peek(), Some(&(_, '0'..='9'))) {
                self.iter.next();
                while self.peek_digit() {
                    self.iter.next();
                }
            }
        }

        let current = self.current();
        let value = self.source[self.start..current]
            .parse()
            .expect("digit runs are valid f64 literals");
        self.token(TokenType::Number(value))
    }

    fn peek_digit(&mut self) -> bool {
        matches!(self.iter.peek(), Some(&(_, '0'..='9')))
    }

    fn identifier(&mut self) -> Token {
        while matches!(
            self.iter.peek(),
            Some(&(_, '0'..='9' | 'a'..='z' | 'A'..='Z' | '_'))
        ) {
            self.iter.next();
        }
        let current = self.current();
        let text = &self.source[self.start..current];
        match KEYWORDS.get(text) {
            Some(token_type) => self.token(token_type.clone()),
            None => self.token(TokenType::Identifier(text.to_string())),
        }
    }
}
