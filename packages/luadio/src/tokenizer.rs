//! Lexer for script source.
//!
//! Produces a flat, ordered list of positioned tokens. The lexer only knows
//! lexical categories; it does not understand Lua syntax beyond that. Every
//! token records the byte offset of its first character so that the
//! attribute compiler can splice text into the original source by offset.
//!
//! Lexing never fails: characters that do not start a known token become
//! `TokenKind::Unknown`, and the list always ends with one `EndOfFile`
//! token whose offset equals the source length.

use serde::Serialize;

/// Reserved words of the scripting language.
const KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if",
    "in", "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Single-character operators.
const OPERATOR_CHARS: &str = "+-*/=<>!&|";

/// Lexical category of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Number,
    Identifier,
    Keyword,
    String,
    Operator,
    Comma,
    Semicolon,
    Colon,
    SquareBracketOpen,
    SquareBracketClose,
    ParenthesisOpen,
    ParenthesisClose,
    CurlyBraceOpen,
    CurlyBraceClose,
    Comment,
    EndOfFile,
    Unknown,
}

impl TokenKind {
    /// Whether a token of this kind can end an operand, which makes a
    /// following `-` a binary minus rather than a sign.
    fn ends_operand(self) -> bool {
        matches!(
            self,
            TokenKind::Number
                | TokenKind::Identifier
                | TokenKind::String
                | TokenKind::ParenthesisClose
                | TokenKind::SquareBracketClose
                | TokenKind::CurlyBraceClose
        )
    }
}

/// A lexed token borrowing its text from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub text: &'src str,
    /// Byte offset of the first character in the source.
    pub offset: usize,
}

impl<'src> Token<'src> {
    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

impl std::fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:?} {}", self.offset, self.kind, self.text)
    }
}

/// Tokenize `source` into an ordered token list terminated by `EndOfFile`.
pub fn tokenize(source: &str) -> Vec<Token<'_>> {
    Lexer::new(source).run()
}

struct Lexer<'src> {
    src: &'src str,
    pos: usize,
    tokens: Vec<Token<'src>>,
}

impl<'src> Lexer<'src> {
    fn new(src: &'src str) -> Self {
        Self {
            src,
            pos: 0,
            tokens: Vec::new(),
        }
    }

    fn current(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek(&self) -> Option<char> {
        let mut chars = self.src[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current() {
            self.pos += c.len_utf8();
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            text: &self.src[start..self.pos],
            offset: start,
        });
    }

    /// Consume one character and emit it as a token of `kind`.
    fn single(&mut self, kind: TokenKind) {
        let start = self.pos;
        self.advance();
        self.push(kind, start);
    }

    fn previous_ends_operand(&self) -> bool {
        self.tokens
            .iter()
            .rev()
            .find(|t| t.kind != TokenKind::Comment)
            .is_some_and(|t| t.kind.ends_operand())
    }

    fn starts_number(c: Option<char>, next: Option<char>) -> bool {
        match c {
            Some(c) if c.is_ascii_digit() => true,
            Some('.') => next.is_some_and(|n| n.is_ascii_digit()),
            _ => false,
        }
    }

    fn run(mut self) -> Vec<Token<'src>> {
        while let Some(c) = self.current() {
            let next = self.peek();
            match c {
                c if c.is_whitespace() => self.advance(),
                '-' if next == Some('-') => self.comment(),
                '-' if next.is_some_and(|n| n.is_ascii_digit()) && !self.previous_ends_operand() => {
                    let start = self.pos;
                    self.advance();
                    self.number(start);
                }
                c if Self::starts_number(Some(c), next) => self.number(self.pos),
                c if c.is_alphabetic() || c == '_' => self.identifier(),
                '"' => self.string(),
                '[' if self.long_bracket_level(self.pos).is_some() => {
                    let start = self.pos;
                    self.long_bracket(start);
                    self.push(TokenKind::String, start);
                }
                c if OPERATOR_CHARS.contains(c) => self.single(TokenKind::Operator),
                '[' => self.single(TokenKind::SquareBracketOpen),
                ']' => self.single(TokenKind::SquareBracketClose),
                '(' => self.single(TokenKind::ParenthesisOpen),
                ')' => self.single(TokenKind::ParenthesisClose),
                '{' => self.single(TokenKind::CurlyBraceOpen),
                '}' => self.single(TokenKind::CurlyBraceClose),
                ',' => self.single(TokenKind::Comma),
                ';' => self.single(TokenKind::Semicolon),
                ':' => self.single(TokenKind::Colon),
                _ => self.single(TokenKind::Unknown),
            }
        }

        self.tokens.push(Token {
            kind: TokenKind::EndOfFile,
            text: "",
            offset: self.src.len(),
        });
        self.tokens
    }

    /// `--` up to (not including) the end of the line, or a `--[[ ]]`
    /// block comment.
    fn comment(&mut self) {
        let start = self.pos;
        let bracket = start + 2;
        if self.long_bracket_level(bracket).is_some() {
            self.long_bracket(bracket);
            self.push(TokenKind::Comment, start);
            return;
        }
        while let Some(c) = self.current() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
        self.push(TokenKind::Comment, start);
    }

    /// Digits with at most one decimal point and an optional exponent.
    /// `start` may point at a leading sign that was already consumed.
    fn number(&mut self, start: usize) {
        let mut seen_dot = false;
        while let Some(c) = self.current() {
            match c {
                '0'..='9' => self.advance(),
                '.' if !seen_dot => {
                    seen_dot = true;
                    self.advance();
                }
                'e' | 'E' => {
                    let after = self.peek();
                    let signed = matches!(after, Some('+') | Some('-'));
                    let digit_at = if signed {
                        self.src[self.pos..].chars().nth(2)
                    } else {
                        after
                    };
                    if !digit_at.is_some_and(|d| d.is_ascii_digit()) {
                        break;
                    }
                    self.advance();
                    if signed {
                        self.advance();
                    }
                    while self.current().is_some_and(|d| d.is_ascii_digit()) {
                        self.advance();
                    }
                    break;
                }
                _ => break,
            }
        }
        self.push(TokenKind::Number, start);
    }

    fn identifier(&mut self) {
        let start = self.pos;
        while self
            .current()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.advance();
        }
        let text = &self.src[start..self.pos];
        let kind = if KEYWORDS.contains(&text) {
            TokenKind::Keyword
        } else {
            TokenKind::Identifier
        };
        self.push(kind, start);
    }

    /// Level of a long bracket opening (`[[`, `[=[`, ...) at byte `at`.
    fn long_bracket_level(&self, at: usize) -> Option<usize> {
        let rest = self.src.get(at..)?.strip_prefix('[')?;
        let level = rest.bytes().take_while(|b| *b == b'=').count();
        (rest.as_bytes().get(level) == Some(&b'[')).then_some(level)
    }

    /// Skip a long bracket opening at `at` through its matching close, or to
    /// the end of the input when unterminated.
    fn long_bracket(&mut self, at: usize) {
        let Some(level) = self.long_bracket_level(at) else {
            return;
        };
        let body = at + level + 2;
        let close = format!("]{}]", "=".repeat(level));
        self.pos = match self.src[body..].find(&close) {
            Some(end) => body + end + close.len(),
            None => self.src.len(),
        };
    }

    /// Double-quoted string. A backslash escapes the next character, and an
    /// unterminated string runs to the end of the input.
    fn string(&mut self) {
        let start = self.pos;
        self.advance();
        while let Some(c) = self.current() {
            self.advance();
            match c {
                '\\' => self.advance(),
                '"' => break,
                _ => {}
            }
        }
        self.push(TokenKind::String, start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_empty_source() {
        let tokens = tokenize("");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::EndOfFile);
        assert_eq!(tokens[0].offset, 0);
    }

    #[test]
    fn test_end_of_file_offset_is_source_length() {
        let source = "gain = 0.5 -- trailing";
        let tokens = tokenize(source);
        let last = tokens.last().unwrap();
        assert_eq!(last.kind, TokenKind::EndOfFile);
        assert_eq!(last.offset, source.len());
    }

    #[test]
    fn test_annotation_tokens() {
        let source = "[SliderFloat(20, 880)]\nfrequency = 440.0";
        let tokens = tokenize(source);
        let expected = [
            (TokenKind::SquareBracketOpen, "[", 0),
            (TokenKind::Identifier, "SliderFloat", 1),
            (TokenKind::ParenthesisOpen, "(", 12),
            (TokenKind::Number, "20", 13),
            (TokenKind::Comma, ",", 15),
            (TokenKind::Number, "880", 17),
            (TokenKind::ParenthesisClose, ")", 20),
            (TokenKind::SquareBracketClose, "]", 21),
            (TokenKind::Identifier, "frequency", 23),
            (TokenKind::Operator, "=", 33),
            (TokenKind::Number, "440.0", 35),
            (TokenKind::EndOfFile, "", 40),
        ];
        assert_eq!(tokens.len(), expected.len());
        for (token, (kind, text, offset)) in tokens.iter().zip(expected) {
            assert_eq!(token.kind, kind);
            assert_eq!(token.text, text);
            assert_eq!(token.offset, offset);
        }
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let tokens = tokenize("local bypass = false");
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[3].kind, TokenKind::Keyword);
        assert_eq!(tokens[3].text, "false");
        assert_eq!(tokenize("goto done")[0].kind, TokenKind::Keyword);
    }

    #[test]
    fn test_negative_number_after_operator() {
        let tokens = tokenize("x = -12.5");
        assert_eq!(tokens[2].kind, TokenKind::Number);
        assert_eq!(tokens[2].text, "-12.5");
    }

    #[test]
    fn test_negative_number_in_argument_list() {
        let tokens = tokenize("[SliderFloat(-1, 1)]");
        assert_eq!(tokens[3].kind, TokenKind::Number);
        assert_eq!(tokens[3].text, "-1");
    }

    #[test]
    fn test_minus_after_operand_is_subtraction() {
        assert_eq!(
            kinds("a -1"),
            vec![
                TokenKind::Identifier,
                TokenKind::Operator,
                TokenKind::Number,
                TokenKind::EndOfFile
            ]
        );
        assert_eq!(
            kinds("5-3"),
            vec![
                TokenKind::Number,
                TokenKind::Operator,
                TokenKind::Number,
                TokenKind::EndOfFile
            ]
        );
        assert_eq!(
            kinds("f() - 2"),
            vec![
                TokenKind::Identifier,
                TokenKind::ParenthesisOpen,
                TokenKind::ParenthesisClose,
                TokenKind::Operator,
                TokenKind::Number,
                TokenKind::EndOfFile
            ]
        );
    }

    #[test]
    fn test_single_decimal_point() {
        let tokens = tokenize("1.2.3");
        assert_eq!(tokens[0].text, "1.2");
        assert_eq!(tokens[1].text, ".3");
    }

    #[test]
    fn test_exponent() {
        let tokens = tokenize("1e-3 2E5 3e");
        assert_eq!(tokens[0].text, "1e-3");
        assert_eq!(tokens[1].text, "2E5");
        assert_eq!(tokens[2].text, "3");
        assert_eq!(tokens[3].kind, TokenKind::Identifier);
    }

    #[test]
    fn test_comment_runs_to_end_of_line() {
        let tokens = tokenize("-- a [Checkbox] comment\nx");
        assert_eq!(tokens[0].kind, TokenKind::Comment);
        assert_eq!(tokens[0].text, "-- a [Checkbox] comment");
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].offset, 24);
    }

    #[test]
    fn test_long_string_is_one_token() {
        let source = "s = [==[\n[Checkbox]\nx = true\n]] still ]==]\ny = 1";
        let tokens = tokenize(source);
        assert_eq!(tokens[2].kind, TokenKind::String);
        assert_eq!(tokens[2].text, "[==[\n[Checkbox]\nx = true\n]] still ]==]");
        assert_eq!(tokens[3].text, "y");
    }

    #[test]
    fn test_block_comment_is_one_token() {
        let source = "--[[\n[SliderFloat(0, 1)]\ngain = 0.5\n]]\nx = 1";
        assert_eq!(
            kinds(source),
            vec![
                TokenKind::Comment,
                TokenKind::Identifier,
                TokenKind::Operator,
                TokenKind::Number,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn test_unterminated_long_bracket_consumes_rest() {
        let source = "--[[ open\n[Checkbox]\nx = true";
        let tokens = tokenize(source);
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].kind, TokenKind::Comment);
        assert_eq!(tokens[1].offset, source.len());
    }

    #[test]
    fn test_index_bracket_is_not_long_string() {
        assert_eq!(
            kinds("t[1]"),
            vec![
                TokenKind::Identifier,
                TokenKind::SquareBracketOpen,
                TokenKind::Number,
                TokenKind::SquareBracketClose,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn test_string_with_escaped_quote() {
        let tokens = tokenize(r#"print("say \"hi\"") x"#);
        assert_eq!(tokens[2].kind, TokenKind::String);
        assert_eq!(tokens[2].text, r#""say \"hi\"""#);
        assert_eq!(tokens[3].kind, TokenKind::ParenthesisClose);
    }

    #[test]
    fn test_unterminated_string_consumes_rest() {
        let source = "x = \"never closed [Checkbox]";
        let tokens = tokenize(source);
        assert_eq!(tokens[2].kind, TokenKind::String);
        assert_eq!(tokens[2].text, "\"never closed [Checkbox]");
        assert_eq!(tokens[3].kind, TokenKind::EndOfFile);
    }

    #[test]
    fn test_unknown_characters_are_not_fatal() {
        let tokens = tokenize("a @ b # 'c'");
        let unknown: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Unknown)
            .map(|t| t.text)
            .collect();
        assert_eq!(unknown, vec!["@", "#", "'", "'"]);
    }

    #[test]
    fn test_multibyte_offsets_are_byte_offsets() {
        let source = "é = 1\n[Checkbox]";
        let tokens = tokenize(source);
        let open = tokens
            .iter()
            .find(|t| t.kind == TokenKind::SquareBracketOpen)
            .unwrap();
        assert_eq!(&source[open.offset..open.offset + 1], "[");
    }
}
