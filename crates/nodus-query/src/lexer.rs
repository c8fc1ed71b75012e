//! Query lexer using logos

use logos::Logos;
use nodus_core::{Error, Result};
use std::fmt;
use std::ops::Range;

/// Query tokens
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    // Keywords
    #[token("MATCH", ignore(ascii_case))]
    Match,

    #[token("OPTIONAL", ignore(ascii_case))]
    Optional,

    #[token("WHERE", ignore(ascii_case))]
    Where,

    #[token("RETURN", ignore(ascii_case))]
    Return,

    #[token("CREATE", ignore(ascii_case))]
    Create,

    #[token("DELETE", ignore(ascii_case))]
    Delete,

    #[token("DETACH", ignore(ascii_case))]
    Detach,

    #[token("SET", ignore(ascii_case))]
    Set,

    #[token("REMOVE", ignore(ascii_case))]
    Remove,

    #[token("MERGE", ignore(ascii_case))]
    Merge,

    #[token("WITH", ignore(ascii_case))]
    With,

    #[token("UNWIND", ignore(ascii_case))]
    Unwind,

    #[token("ORDER", ignore(ascii_case))]
    Order,

    #[token("BY", ignore(ascii_case))]
    By,

    #[token("SKIP", ignore(ascii_case))]
    Skip,

    #[token("LIMIT", ignore(ascii_case))]
    Limit,

    #[token("ASC", ignore(ascii_case))]
    #[token("ASCENDING", ignore(ascii_case))]
    Asc,

    #[token("DESC", ignore(ascii_case))]
    #[token("DESCENDING", ignore(ascii_case))]
    Desc,

    #[token("AS", ignore(ascii_case))]
    As,

    #[token("DISTINCT", ignore(ascii_case))]
    Distinct,

    #[token("IN", ignore(ascii_case))]
    In,

    #[token("ON", ignore(ascii_case))]
    On,

    #[token("USING", ignore(ascii_case))]
    Using,

    #[token("INDEX", ignore(ascii_case))]
    Index,

    // Boolean keywords
    #[token("AND", ignore(ascii_case))]
    And,

    #[token("OR", ignore(ascii_case))]
    Or,

    #[token("XOR", ignore(ascii_case))]
    Xor,

    #[token("NOT", ignore(ascii_case))]
    Not,

    #[token("TRUE", ignore(ascii_case))]
    True,

    #[token("FALSE", ignore(ascii_case))]
    False,

    #[token("NULL", ignore(ascii_case))]
    Null,

    #[token("IS", ignore(ascii_case))]
    Is,

    #[token("CONTAINS", ignore(ascii_case))]
    Contains,

    #[token("STARTS", ignore(ascii_case))]
    Starts,

    #[token("ENDS", ignore(ascii_case))]
    Ends,

    // Symbols
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token(":")]
    Colon,

    #[token(",")]
    Comma,

    #[token(".")]
    Dot,

    #[token("|")]
    Pipe,

    #[token("..")]
    DoubleDot,

    #[token("=")]
    Equals,

    #[token("<>")]
    #[token("!=")]
    NotEquals,

    #[token("<")]
    LessThan,

    #[token("<=")]
    LessEquals,

    #[token(">")]
    GreaterThan,

    #[token(">=")]
    GreaterEquals,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("%")]
    Percent,

    #[token("^")]
    Caret,

    #[token("+=")]
    PlusEquals,

    // Literals
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(i64),

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unescape(lex.slice()))]
    String(String),

    // Identifiers
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Identifier(String),

    #[regex(r"`[^`]+`", |lex| {
        let s = lex.slice();
        s[1..s.len()-1].to_string()
    })]
    EscapedIdentifier(String),

    // Parameter
    #[regex(r"\$[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice()[1..].to_string())]
    Parameter(String),

    // Comments (skipped)
    #[regex(r"//[^\n]*", logos::skip)]
    LineComment,

    #[regex(r"/\*([^*]|\*+[^*/])*\*+/", logos::skip)]
    BlockComment,

    /// Only matches when no terminated comment does; always an error
    #[token("/*", |_| false)]
    UnterminatedComment,
}

impl Token {
    /// Check if this token is a keyword
    pub fn is_keyword(&self) -> bool {
        self.keyword_text().is_some()
    }

    /// Source spelling of a keyword, used where keywords double as names
    pub fn keyword_text(&self) -> Option<&'static str> {
        let text = match self {
            Token::Match => "MATCH",
            Token::Optional => "OPTIONAL",
            Token::Where => "WHERE",
            Token::Return => "RETURN",
            Token::Create => "CREATE",
            Token::Delete => "DELETE",
            Token::Detach => "DETACH",
            Token::Set => "SET",
            Token::Remove => "REMOVE",
            Token::Merge => "MERGE",
            Token::With => "WITH",
            Token::Unwind => "UNWIND",
            Token::Order => "ORDER",
            Token::By => "BY",
            Token::Skip => "SKIP",
            Token::Limit => "LIMIT",
            Token::Asc => "ASC",
            Token::Desc => "DESC",
            Token::As => "AS",
            Token::Distinct => "DISTINCT",
            Token::In => "IN",
            Token::On => "ON",
            Token::Using => "USING",
            Token::Index => "INDEX",
            Token::And => "AND",
            Token::Or => "OR",
            Token::Xor => "XOR",
            Token::Not => "NOT",
            Token::True => "TRUE",
            Token::False => "FALSE",
            Token::Null => "NULL",
            Token::Is => "IS",
            Token::Contains => "CONTAINS",
            Token::Starts => "STARTS",
            Token::Ends => "ENDS",
            _ => return None,
        };
        Some(text)
    }

    /// Check if this token is a literal
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Token::Integer(_)
                | Token::Float(_)
                | Token::String(_)
                | Token::True
                | Token::False
                | Token::Null
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(keyword) = self.keyword_text() {
            return write!(f, "{keyword}");
        }
        match self {
            Token::Integer(i) => write!(f, "{i}"),
            Token::Float(x) => write!(f, "{x}"),
            Token::String(s) => write!(f, "'{s}'"),
            Token::Identifier(s) => write!(f, "{s}"),
            Token::EscapedIdentifier(s) => write!(f, "`{s}`"),
            Token::Parameter(s) => write!(f, "${s}"),
            other => {
                let symbol = match other {
                    Token::LParen => "(",
                    Token::RParen => ")",
                    Token::LBracket => "[",
                    Token::RBracket => "]",
                    Token::LBrace => "{",
                    Token::RBrace => "}",
                    Token::Colon => ":",
                    Token::Comma => ",",
                    Token::Dot => ".",
                    Token::Pipe => "|",
                    Token::DoubleDot => "..",
                    Token::Equals => "=",
                    Token::NotEquals => "<>",
                    Token::LessThan => "<",
                    Token::LessEquals => "<=",
                    Token::GreaterThan => ">",
                    Token::GreaterEquals => ">=",
                    Token::Plus => "+",
                    Token::Minus => "-",
                    Token::Star => "*",
                    Token::Slash => "/",
                    Token::Percent => "%",
                    Token::Caret => "^",
                    Token::PlusEquals => "+=",
                    _ => "comment",
                };
                write!(f, "{symbol}")
            }
        }
    }
}

/// A token with its byte range in the source
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Range<usize>,
}

/// Tokenize a query string
///
/// Fails on the first character sequence that is not a token, with the
/// byte offset and line/column of where it starts.
pub fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let mut lexer = Token::lexer(input);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => tokens.push(Spanned { token, span }),
            Err(()) => {
                let slice = lexer.slice();
                return Err(Error::syntax(input, span.start, describe_error(slice)));
            }
        }
    }
    Ok(tokens)
}

fn describe_error(slice: &str) -> String {
    let Some(first) = slice.chars().next() else {
        return "unexpected end of input".to_string();
    };
    match first {
        '"' | '\'' if slice.len() > 1 && slice.ends_with(first) => {
            "invalid escape sequence in string literal".to_string()
        }
        '"' | '\'' => "unterminated string literal".to_string(),
        '`' => "unterminated escaped identifier".to_string(),
        '/' if slice.starts_with("/*") => "unterminated block comment".to_string(),
        '$' => "parameter name expected after '$'".to_string(),
        c if c.is_ascii_digit() => format!("invalid numeric literal '{slice}'"),
        c => format!("unexpected character '{c}'"),
    }
}

/// Strip the quotes from a string literal and resolve escapes
fn unescape(quoted: &str) -> Option<String> {
    let body = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                if hex.len() != 4 {
                    return None;
                }
                out.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
            }
            _ => return None,
        }
    }
    Some(out)
}
