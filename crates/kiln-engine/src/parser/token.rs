//! Token definitions for kiln source.

use logos::Logos;
use std::fmt;

/// A token in kiln source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    // Keywords
    /// `class`
    #[token("class")]
    Class,
    /// `attr`
    #[token("attr")]
    Attr,
    /// `def`
    #[token("def")]
    Def,
    /// `let`
    #[token("let")]
    Let,
    /// `if`
    #[token("if")]
    If,
    /// `else`
    #[token("else")]
    Else,
    /// `while`
    #[token("while")]
    While,
    /// `return`
    #[token("return")]
    Return,
    /// `and`
    #[token("and")]
    And,
    /// `or`
    #[token("or")]
    Or,
    /// `not`
    #[token("not")]
    Not,
    /// `self`
    #[token("self")]
    SelfKw,
    /// `ops`
    #[token("ops")]
    Ops,
    /// `CONSTANTS`
    #[token("CONSTANTS")]
    Constants,

    // Literals
    /// `true`
    #[token("true")]
    True,
    /// `false`
    #[token("false")]
    False,
    /// `None`
    #[token("None")]
    None,
    /// Integer literal
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    IntLiteral(i64),
    /// Float literal, with a fraction or exponent
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    FloatLiteral(f64),
    /// Double-quoted string literal, unescaped
    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    StringLiteral(String),

    // Identifiers (keywords take priority)
    /// Name that is not a keyword
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Identifier(String),

    // Operators
    /// `==`
    #[token("==")]
    EqualEqual,
    /// `!=`
    #[token("!=")]
    BangEqual,
    /// `<=`
    #[token("<=")]
    LessEqual,
    /// `>=`
    #[token(">=")]
    GreaterEqual,
    /// `<`
    #[token("<")]
    Less,
    /// `>`
    #[token(">")]
    Greater,
    /// `=`
    #[token("=")]
    Equal,
    /// `+`
    #[token("+")]
    Plus,
    /// `-`
    #[token("-")]
    Minus,
    /// `*`
    #[token("*")]
    Star,
    /// `/`
    #[token("/")]
    Slash,
    /// `%`
    #[token("%")]
    Percent,

    // Punctuation
    /// `(`
    #[token("(")]
    LeftParen,
    /// `)`
    #[token(")")]
    RightParen,
    /// `{`
    #[token("{")]
    LeftBrace,
    /// `}`
    #[token("}")]
    RightBrace,
    /// `[`
    #[token("[")]
    LeftBracket,
    /// `]`
    #[token("]")]
    RightBracket,
    /// `,`
    #[token(",")]
    Comma,
    /// `;`
    #[token(";")]
    Semicolon,
    /// `.`
    #[token(".")]
    Dot,

    /// End of input (never produced by logos)
    Eof,
}

/// Decode a quoted string literal. Returns `None` on a bad escape.
fn unescape(quoted: &str) -> Option<String> {
    let inner = &quoted[1..quoted.len() - 1];
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next()? {
            'n' => result.push('\n'),
            'r' => result.push('\r'),
            't' => result.push('\t'),
            '0' => result.push('\0'),
            '\\' => result.push('\\'),
            '"' => result.push('"'),
            'u' => {
                if chars.next()? != '{' {
                    return None;
                }
                let mut hex = String::new();
                loop {
                    match chars.next()? {
                        '}' => break,
                        ch if ch.is_ascii_hexdigit() && hex.len() < 6 => hex.push(ch),
                        _ => return None,
                    }
                }
                let code = u32::from_str_radix(&hex, 16).ok()?;
                result.push(char::from_u32(code)?);
            }
            _ => return None,
        }
    }

    Some(result)
}

/// Source location of a token or syntax node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset past the last character
    pub end: usize,
    /// Line number (1-indexed)
    pub line: u32,
    /// Column number (1-indexed)
    pub column: u32,
}

impl Span {
    /// Create a new span
    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// Span covering `self` through `other`
    pub fn merge(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: self.line,
            column: self.column,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Class => f.write_str("'class'"),
            Token::Attr => f.write_str("'attr'"),
            Token::Def => f.write_str("'def'"),
            Token::Let => f.write_str("'let'"),
            Token::If => f.write_str("'if'"),
            Token::Else => f.write_str("'else'"),
            Token::While => f.write_str("'while'"),
            Token::Return => f.write_str("'return'"),
            Token::And => f.write_str("'and'"),
            Token::Or => f.write_str("'or'"),
            Token::Not => f.write_str("'not'"),
            Token::SelfKw => f.write_str("'self'"),
            Token::Ops => f.write_str("'ops'"),
            Token::Constants => f.write_str("'CONSTANTS'"),
            Token::True => f.write_str("'true'"),
            Token::False => f.write_str("'false'"),
            Token::None => f.write_str("'None'"),
            Token::IntLiteral(n) => write!(f, "integer {n}"),
            Token::FloatLiteral(x) => write!(f, "float {x:?}"),
            Token::StringLiteral(s) => write!(f, "string {s:?}"),
            Token::Identifier(name) => write!(f, "identifier '{name}'"),
            Token::EqualEqual => f.write_str("'=='"),
            Token::BangEqual => f.write_str("'!='"),
            Token::LessEqual => f.write_str("'<='"),
            Token::GreaterEqual => f.write_str("'>='"),
            Token::Less => f.write_str("'<'"),
            Token::Greater => f.write_str("'>'"),
            Token::Equal => f.write_str("'='"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::Percent => f.write_str("'%'"),
            Token::LeftParen => f.write_str("'('"),
            Token::RightParen => f.write_str("')'"),
            Token::LeftBrace => f.write_str("'{'"),
            Token::RightBrace => f.write_str("'}'"),
            Token::LeftBracket => f.write_str("'['"),
            Token::RightBracket => f.write_str("']'"),
            Token::Comma => f.write_str("','"),
            Token::Semicolon => f.write_str("';'"),
            Token::Dot => f.write_str("'.'"),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r#""a\nb""#).as_deref(), Some("a\nb"));
        assert_eq!(unescape(r#""q\"q""#).as_deref(), Some("q\"q"));
        assert_eq!(unescape(r#""\u{1F600}""#).as_deref(), Some("\u{1F600}"));
        assert_eq!(unescape(r#""\q""#), None);
        assert_eq!(unescape(r#""\u{110000}""#), None);
    }

    #[test]
    fn test_fixed_tokens_lex_from_display_text() {
        use Token::*;
        let fixed = [
            Class, Attr, Def, Let, If, Else, While, Return, And, Or, Not, SelfKw, Ops,
            Constants, True, False, None, EqualEqual, BangEqual, LessEqual, GreaterEqual,
            Less, Greater, Equal, Plus, Minus, Star, Slash, Percent, LeftParen, RightParen,
            LeftBrace, RightBrace, LeftBracket, RightBracket, Comma, Semicolon, Dot,
        ];
        for token in fixed {
            let shown = token.to_string();
            let text = shown.trim_matches('\'');
            let mut lexer = Token::lexer(text);
            assert_eq!(lexer.next(), Some(Ok(token)), "{text}");
            assert_eq!(lexer.next(), Option::None);
        }
    }
}
