//! Lexer for kiln source.
//!
//! Tokens come from logos; this wrapper attaches line/column spans and
//! appends the `Eof` token.

use super::parser::ParseError;
use super::token::{Span, Token};
use logos::Logos;

/// Main lexer structure.
pub struct Lexer<'a> {
    source: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> Lexer<'a> {
    /// Create a lexer over `source`
    pub fn new(source: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            source,
            line_starts,
        }
    }

    /// Line and column (1-indexed) of a byte offset
    pub fn location(&self, offset: usize) -> (u32, u32) {
        let line = self.line_starts.partition_point(|&start| start <= offset);
        let line_start = self.line_starts[line.saturating_sub(1)];
        let column = self.source[line_start..offset.min(self.source.len())]
            .chars()
            .count();
        (line as u32, column as u32 + 1)
    }

    fn span(&self, range: std::ops::Range<usize>) -> Span {
        let (line, column) = self.location(range.start);
        Span::new(range.start, range.end, line, column)
    }

    /// Tokenize the whole input
    pub fn tokenize(self) -> Result<Vec<(Token, Span)>, ParseError> {
        let mut tokens = Vec::new();
        let mut lexer = Token::lexer(self.source);

        while let Some(result) = lexer.next() {
            let span = self.span(lexer.span());
            match result {
                Ok(token) => tokens.push((token, span)),
                Err(()) => {
                    let text = lexer.slice();
                    let first = text.chars().next().unwrap_or('\0');
                    return Err(if first.is_ascii_digit() {
                        ParseError::InvalidNumber {
                            text: text.to_string(),
                            line: span.line,
                            column: span.column,
                        }
                    } else if first == '"' {
                        ParseError::InvalidString {
                            line: span.line,
                            column: span.column,
                        }
                    } else {
                        ParseError::UnexpectedCharacter {
                            ch: first,
                            line: span.line,
                            column: span.column,
                        }
                    });
                }
            }
        }

        let end = self.source.len();
        tokens.push((Token::Eof, self.span(end..end)));
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|(token, _)| token)
            .collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("class selfish self ops opsx"),
            vec![
                Token::Class,
                Token::Identifier("selfish".to_string()),
                Token::SelfKw,
                Token::Ops,
                Token::Identifier("opsx".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 2.5 1e-7 3.0e2"),
            vec![
                Token::IntLiteral(1),
                Token::FloatLiteral(2.5),
                Token::FloatLiteral(1e-7),
                Token::FloatLiteral(300.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_and_operators() {
        assert_eq!(
            kinds("a // note\n/ b <= c"),
            vec![
                Token::Identifier("a".to_string()),
                Token::Slash,
                Token::Identifier("b".to_string()),
                Token::LessEqual,
                Token::Identifier("c".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_spans() {
        let tokens = Lexer::new("let x\n  = 1;").tokenize().unwrap();
        assert_eq!((tokens[0].1.line, tokens[0].1.column), (1, 1));
        assert_eq!((tokens[1].1.line, tokens[1].1.column), (1, 5));
        assert_eq!((tokens[2].1.line, tokens[2].1.column), (2, 3));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            Lexer::new("99999999999999999999").tokenize(),
            Err(ParseError::InvalidNumber { .. })
        ));
        assert!(matches!(
            Lexer::new("a $ b").tokenize(),
            Err(ParseError::UnexpectedCharacter { ch: '$', line: 1, column: 3 })
        ));
        assert!(matches!(
            Lexer::new(r#""\q""#).tokenize(),
            Err(ParseError::InvalidString { .. })
        ));
    }
}
