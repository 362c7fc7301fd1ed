use logos::Logos;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    // Keywords
    #[token("fn")]
    Function,
    #[token("let")]
    Let,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("return")]
    Return,

    // Operators
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("!")]
    Bang,
    #[token("*")]
    Asterisk,
    #[token("/")]
    Slash,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("==")]
    Eq,
    #[token("!=")]
    NotEq,

    // Delimiters
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    // Literals
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r#""[^"]*""#, |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].to_string()
    })]
    Str(String),

    #[regex(r"[a-zA-Z_]+", |lex| lex.slice().to_string())]
    Ident(String),
}

impl Token {
    /// Source text of the operator tokens the parser hands to the AST.
    pub fn operator(&self) -> Option<&'static str> {
        match self {
            Token::Plus => Some("+"),
            Token::Minus => Some("-"),
            Token::Bang => Some("!"),
            Token::Asterisk => Some("*"),
            Token::Slash => Some("/"),
            Token::Lt => Some("<"),
            Token::Gt => Some(">"),
            Token::Eq => Some("=="),
            Token::NotEq => Some("!="),
            _ => None,
        }
    }
}

/// Lex source code into a stream of tokens with byte ranges.
pub fn lex(source: &str) -> Result<Vec<(Token, std::ops::Range<usize>)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(()) => {
                let span = lexer.span();
                return Err(LexError {
                    position: span.start,
                    snippet: source[span].to_string(),
                });
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, thiserror::Error)]
#[error("lex error at position {position}: unexpected '{snippet}'")]
pub struct LexError {
    pub position: usize,
    pub snippet: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        lex(source).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn lex_let_statement() {
        assert_eq!(
            kinds("let five = 5;"),
            vec![
                Token::Let,
                Token::Ident("five".to_string()),
                Token::Assign,
                Token::Int(5),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn lex_two_char_operators() {
        assert_eq!(
            kinds("10 == 10; 10 != 9; !-/*5 < >"),
            vec![
                Token::Int(10),
                Token::Eq,
                Token::Int(10),
                Token::Semicolon,
                Token::Int(10),
                Token::NotEq,
                Token::Int(9),
                Token::Semicolon,
                Token::Bang,
                Token::Minus,
                Token::Slash,
                Token::Asterisk,
                Token::Int(5),
                Token::Lt,
                Token::Gt,
            ]
        );
    }

    #[test]
    fn lex_keywords_beat_identifiers() {
        assert_eq!(
            kinds("fn if else return true false fnord"),
            vec![
                Token::Function,
                Token::If,
                Token::Else,
                Token::Return,
                Token::True,
                Token::False,
                Token::Ident("fnord".to_string()),
            ]
        );
    }

    #[test]
    fn lex_strings_and_collections() {
        assert_eq!(
            kinds(r#""foo bar" "" [1, 2]; {"k": 1}"#),
            vec![
                Token::Str("foo bar".to_string()),
                Token::Str(String::new()),
                Token::LBracket,
                Token::Int(1),
                Token::Comma,
                Token::Int(2),
                Token::RBracket,
                Token::Semicolon,
                Token::LBrace,
                Token::Str("k".to_string()),
                Token::Colon,
                Token::Int(1),
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn lex_spans_are_byte_ranges() {
        let tokens = lex("let x").unwrap();
        assert_eq!(tokens[0].1, 0..3);
        assert_eq!(tokens[1].1, 4..5);
    }

    #[test]
    fn lex_error_reports_position() {
        let err = lex("let x = 5 @ 3").unwrap_err();
        assert_eq!(err.position, 10);
        assert_eq!(err.snippet, "@");
    }
}
