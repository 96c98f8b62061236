use logos::Logos;
use twin_types::TqlError;

/// Tokens of the rule language
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    // Keywords
    #[token("insert", ignore(ascii_case))]
    Insert,
    #[token("into", ignore(ascii_case))]
    Into,
    #[token("select", ignore(ascii_case))]
    Select,
    #[token("as", ignore(ascii_case))]
    As,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    // Identifiers and literals
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_-]*", |lex| lex.slice().to_string())]
    Identifier(String),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    IntLiteral(i64),

    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    FloatLiteral(f64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        s[1..s.len()-1].to_string()
    })]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| {
        let s = lex.slice();
        s[1..s.len()-1].to_string()
    })]
    StringLiteral(String),

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    // Delimiters
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    // Punctuation
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,

    // End of input
    Eof,
}

/// A token with its byte offset in the source
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub offset: usize,
}

/// Tokenize a rule, appending a trailing [`Token::Eof`].
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, TqlError> {
    let mut lex = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lex.next() {
        let span = lex.span();
        match result {
            Ok(token) => tokens.push(SpannedToken {
                token,
                offset: span.start,
            }),
            Err(_) => {
                return Err(TqlError::Lex {
                    offset: span.start,
                    message: format!("Invalid token: {}", &source[span.start..span.end]),
                });
            }
        }
    }

    tokens.push(SpannedToken {
        token: Token::Eof,
        offset: source.len(),
    });
    Ok(tokens)
}
