//! Tokenizer for Prism scripts.
//!
//! Whitespace is insignificant and comments (`#` or `//` to end of line) are
//! skipped. Dotted names are recognised as a single [`Token::Scoped`] token;
//! a dotted tail that follows a closing bracket is a [`Token::Suffix`].

use std::fmt;
use std::ops::Range;

use logos::Logos;
use thiserror::Error;

/// A lexical token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    #[regex(r"(#|//)[^\n]*", logos::skip)]
    Comment,

    // Keywords
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("None")]
    None,
    #[token("True")]
    True,
    #[token("False")]
    False,
    #[token("goto")]
    Goto,
    #[token("return")]
    Return,
    #[token("exit")]
    Exit,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("global")]
    Global,
    #[token("local")]
    Local,

    // Bitwise keyword operators
    #[token("and")]
    BitAnd,
    #[token("or")]
    BitOr,
    #[token("xor")]
    BitXor,
    #[token("nand")]
    BitNand,
    #[token("nor")]
    BitNor,

    // Comparison and logic
    #[token("==")]
    Eq,
    #[token("!=")]
    NotEq,
    #[token(">=")]
    Ge,
    #[token(">")]
    Gt,
    #[token("<=")]
    Le,
    #[token("<")]
    Lt,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,

    // Assignment
    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("\\=")]
    BackslashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("^=")]
    CaretAssign,

    // Arithmetic
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("\\")]
    Backslash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,

    // Delimiters
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
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,

    // Literals
    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unescape(lex.slice()))]
    String(String),

    // Names
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)+", |lex| lex.slice().to_string())]
    Scoped(String),

    /// A dotted tail such as `.length` or `.items.pop_tail`, stored without the
    /// leading dot.
    #[regex(r"(\.[A-Za-z_][A-Za-z0-9_]*)+", |lex| lex.slice()[1..].to_string())]
    Suffix(String),
}

/// Strip the quotes from a string literal and resolve its escapes.
///
/// Unknown escapes are kept verbatim, backslash included.
fn unescape(literal: &str) -> Option<String> {
    let body = &literal[1..literal.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('b') => out.push('\u{8}'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('a') => out.push('\u{7}'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Some(out)
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Comment => "<comment>",
            Token::If => "if",
            Token::Elif => "elif",
            Token::Else => "else",
            Token::While => "while",
            Token::For => "for",
            Token::In => "in",
            Token::None => "None",
            Token::True => "True",
            Token::False => "False",
            Token::Goto => "goto",
            Token::Return => "return",
            Token::Exit => "exit",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::Global => "global",
            Token::Local => "local",
            Token::BitAnd => "and",
            Token::BitOr => "or",
            Token::BitXor => "xor",
            Token::BitNand => "nand",
            Token::BitNor => "nor",
            Token::Eq => "==",
            Token::NotEq => "!=",
            Token::Ge => ">=",
            Token::Gt => ">",
            Token::Le => "<=",
            Token::Lt => "<",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Bang => "!",
            Token::Assign => "=",
            Token::PlusAssign => "+=",
            Token::MinusAssign => "-=",
            Token::StarAssign => "*=",
            Token::SlashAssign => "/=",
            Token::BackslashAssign => "\\=",
            Token::PercentAssign => "%=",
            Token::CaretAssign => "^=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Backslash => "\\",
            Token::Percent => "%",
            Token::Caret => "^",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Comma => ",",
            Token::Semicolon => ";",
            Token::Float(n) => return write!(f, "{}", n),
            Token::Int(n) => return write!(f, "{}", n),
            Token::String(s) => return write!(f, "{:?}", s),
            Token::Ident(s) | Token::Scoped(s) => s,
            Token::Suffix(s) => return write!(f, ".{}", s),
        };
        f.write_str(text)
    }
}

/// A token together with its byte span and 1-based line number.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Range<usize>,
    pub line: usize,
}

/// Source text the tokenizer could not recognise.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("unrecognised input on line {line}: '{text}'")]
pub struct LexError {
    pub line: usize,
    pub text: String,
}

/// Byte offsets at which each line of `input` starts.
fn build_line_starts(input: &str) -> Vec<usize> {
    let mut line_starts = vec![0];
    for (i, ch) in input.char_indices() {
        if ch == '\n' {
            line_starts.push(i + 1);
        }
    }
    line_starts
}

/// Map byte offsets to 1-based line numbers.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(input: &str) -> Self {
        Self {
            line_starts: build_line_starts(input),
        }
    }

    /// The 1-based line containing `offset`.
    pub fn line_of(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= offset)
    }

    /// Number of lines in the indexed input.
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

/// Tokenize a complete source text.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, LexError> {
    let lines = LineIndex::new(source);
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let line = lines.line_of(span.start);
        match result {
            Ok(token) => tokens.push(Spanned { token, span, line }),
            Err(()) => {
                return Err(LexError {
                    line,
                    text: source[span].to_string(),
                });
            }
        }
    }

    Ok(tokens)
}
