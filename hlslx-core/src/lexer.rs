use crate::bail_lex_at;
use crate::error::{Location, Result};
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_until, take_while},
    character::complete::{alpha1, alphanumeric1, char, digit0, digit1, hex_digit1, one_of},
    combinator::{map, map_opt, map_res, opt, recognize, value},
    multi::many0,
    sequence::{pair, preceded, terminated, tuple},
};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    Struct,
    Cbuffer,
    Tbuffer,
    Register,
    Packoffset,
    If,
    Else,
    For,
    While,
    Do,
    Return,
    Break,
    Continue,
    Discard,
    In,
    Out,
    InOut,
    Uniform,
    Const,
    Static,
    Extern,
    Inline,
    True,
    False,

    // Identifiers and literals
    Identifier(String),
    IntLiteral(i64),
    UintLiteral(u64),
    FloatLiteral(f64),
    HalfLiteral(f64),
    StringLiteral(String),

    // Assignment operators
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    ShlAssign,
    ShrAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Shl,
    Shr,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    AmpAmp,
    PipePipe,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Question,

    // Punctuation
    Colon,
    Semicolon,
    Comma,
    Dot,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,

    Eof,
}

impl TokenKind {
    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            TokenKind::Assign
                | TokenKind::PlusAssign
                | TokenKind::MinusAssign
                | TokenKind::StarAssign
                | TokenKind::SlashAssign
                | TokenKind::PercentAssign
                | TokenKind::ShlAssign
                | TokenKind::ShrAssign
                | TokenKind::AmpAssign
                | TokenKind::PipeAssign
                | TokenKind::CaretAssign
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

fn keyword(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "struct" => TokenKind::Struct,
        "cbuffer" => TokenKind::Cbuffer,
        "tbuffer" => TokenKind::Tbuffer,
        "register" => TokenKind::Register,
        "packoffset" => TokenKind::Packoffset,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "for" => TokenKind::For,
        "while" => TokenKind::While,
        "do" => TokenKind::Do,
        "return" => TokenKind::Return,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "discard" => TokenKind::Discard,
        "in" => TokenKind::In,
        "out" => TokenKind::Out,
        "inout" => TokenKind::InOut,
        "uniform" => TokenKind::Uniform,
        "const" => TokenKind::Const,
        "static" => TokenKind::Static,
        "extern" => TokenKind::Extern,
        "inline" => TokenKind::Inline,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        _ => return None,
    };
    Some(kind)
}

fn parse_line_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(tag("//"), take_while(|c| c != '\n')))(input)
}

fn parse_block_comment(input: &str) -> IResult<&str, &str> {
    recognize(tuple((tag("/*"), take_until("*/"), tag("*/"))))(input)
}

// Preprocessor lines (#line, #pragma, ...) carry nothing the translator uses.
fn parse_directive(input: &str) -> IResult<&str, &str> {
    recognize(pair(char('#'), take_while(|c| c != '\n')))(input)
}

fn parse_identifier(input: &str) -> IResult<&str, TokenKind> {
    map(
        recognize(pair(alt((alpha1, tag("_"))), many0(alt((alphanumeric1, tag("_")))))),
        |s: &str| keyword(s).unwrap_or_else(|| TokenKind::Identifier(s.to_string())),
    )(input)
}

fn parse_string_literal(input: &str) -> IResult<&str, TokenKind> {
    let (rest, _) = char('"')(input)?;
    let (rest, content) = take_while(|c| c != '"' && c != '\n')(rest)?;
    let (rest, _) = char('"')(rest)?;

    Ok((rest, TokenKind::StringLiteral(content.to_string())))
}

fn exponent(input: &str) -> IResult<&str, &str> {
    recognize(tuple((one_of("eE"), opt(one_of("+-")), digit1)))(input)
}

fn parse_float_literal(input: &str) -> IResult<&str, TokenKind> {
    let (rest, number) = map_opt(
        recognize(alt((
            recognize(tuple((digit1, char('.'), digit0, opt(exponent)))),
            recognize(tuple((char('.'), digit1, opt(exponent)))),
            recognize(pair(digit1, exponent)),
        ))),
        |text: &str| text.parse::<f64>().ok().filter(|n| n.is_finite()),
    )(input)?;
    let (rest, suffix) = opt(one_of("fFhHlL"))(rest)?;

    let kind = match suffix {
        Some('h') | Some('H') => TokenKind::HalfLiteral(number),
        _ => TokenKind::FloatLiteral(number),
    };
    Ok((rest, kind))
}

fn parse_int_literal(input: &str) -> IResult<&str, TokenKind> {
    // Integer literals are 32 bits wide on every target.
    let (rest, number) = alt((
        map_res(preceded(tag_no_case("0x"), hex_digit1), |d| u32::from_str_radix(d, 16)),
        map_res(digit1, |d: &str| d.parse::<u32>()),
    ))(input)?;
    let (rest, suffix) = opt(one_of("uUlL"))(rest)?;

    let kind = match suffix {
        Some('u') | Some('U') => TokenKind::UintLiteral(u64::from(number)),
        _ => TokenKind::IntLiteral(i64::from(number)),
    };
    Ok((rest, kind))
}

fn parse_operator(input: &str) -> IResult<&str, TokenKind> {
    alt((
        alt((
            // Three-character operators first
            value(TokenKind::ShlAssign, tag("<<=")),
            value(TokenKind::ShrAssign, tag(">>=")),
            // Compound assignment before the bare operators
            value(TokenKind::PlusAssign, tag("+=")),
            value(TokenKind::MinusAssign, tag("-=")),
            value(TokenKind::StarAssign, tag("*=")),
            value(TokenKind::SlashAssign, tag("/=")),
            value(TokenKind::PercentAssign, tag("%=")),
            value(TokenKind::AmpAssign, tag("&=")),
            value(TokenKind::PipeAssign, tag("|=")),
            value(TokenKind::CaretAssign, tag("^=")),
        )),
        alt((
            value(TokenKind::PlusPlus, tag("++")),
            value(TokenKind::MinusMinus, tag("--")),
            value(TokenKind::Shl, tag("<<")),
            value(TokenKind::Shr, tag(">>")),
            value(TokenKind::AmpAmp, tag("&&")),
            value(TokenKind::PipePipe, tag("||")),
            value(TokenKind::EqEq, tag("==")),
            value(TokenKind::NotEq, tag("!=")),
            value(TokenKind::LtEq, tag("<=")),
            value(TokenKind::GtEq, tag(">=")),
        )),
        alt((
            value(TokenKind::Plus, char('+')),
            value(TokenKind::Minus, char('-')),
            value(TokenKind::Star, char('*')),
            value(TokenKind::Slash, char('/')),
            value(TokenKind::Percent, char('%')),
            value(TokenKind::Amp, char('&')),
            value(TokenKind::Pipe, char('|')),
            value(TokenKind::Caret, char('^')),
            value(TokenKind::Tilde, char('~')),
            value(TokenKind::Bang, char('!')),
            value(TokenKind::Lt, char('<')),
            value(TokenKind::Gt, char('>')),
            value(TokenKind::Assign, char('=')),
            value(TokenKind::Question, char('?')),
        )),
    ))(input)
}

fn parse_punctuation(input: &str) -> IResult<&str, TokenKind> {
    alt((
        value(TokenKind::Colon, char(':')),
        value(TokenKind::Semicolon, char(';')),
        value(TokenKind::Comma, char(',')),
        value(TokenKind::Dot, char('.')),
        value(TokenKind::LeftParen, char('(')),
        value(TokenKind::RightParen, char(')')),
        value(TokenKind::LeftBracket, char('[')),
        value(TokenKind::RightBracket, char(']')),
        value(TokenKind::LeftBrace, char('{')),
        value(TokenKind::RightBrace, char('}')),
    ))(input)
}

fn parse_token(input: &str) -> IResult<&str, TokenKind> {
    alt((
        parse_string_literal,
        parse_identifier,
        terminated(parse_float_literal, not_identifier_char),
        terminated(parse_int_literal, not_identifier_char),
        parse_operator,
        parse_punctuation,
    ))(input)
}

// A numeric literal must not run straight into an identifier ("12ab").
fn not_identifier_char(input: &str) -> IResult<&str, ()> {
    match input.chars().next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        ))),
        _ => Ok((input, ())),
    }
}

/// Restartable tokenizer over one source buffer.
///
/// Produces tokens on demand and yields a single [`TokenKind::Eof`] sentinel
/// once the input is exhausted.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    file: &'a str,
    source: &'a str,
    pos: usize,
    line: u32,
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(file: &'a str, source: &'a str) -> Self {
        Lexer {
            file,
            source,
            pos: 0,
            line: 1,
            finished: false,
        }
    }

    /// Rewind to the start of the buffer.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.line = 1;
        self.finished = false;
    }

    fn location(&self) -> Location {
        Location::new(self.file, self.line)
    }

    fn advance(&mut self, consumed: &str) {
        self.line += consumed.matches('\n').count() as u32;
        self.pos += consumed.len();
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            let remaining = &self.source[self.pos..];
            let trimmed = remaining.trim_start();
            if trimmed.len() != remaining.len() {
                let skipped = &remaining[..remaining.len() - trimmed.len()];
                self.advance(skipped);
                continue;
            }

            if let Ok((_, comment)) = parse_line_comment(remaining) {
                self.advance(comment);
            } else if remaining.starts_with("/*") {
                match parse_block_comment(remaining) {
                    Ok((_, comment)) => self.advance(comment),
                    Err(_) => bail_lex_at!(self.location(), "unterminated block comment"),
                }
            } else if let Ok((_, directive)) = parse_directive(remaining) {
                self.advance(directive);
            } else {
                return Ok(());
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia()?;

        let remaining = &self.source[self.pos..];
        if remaining.is_empty() {
            self.finished = true;
            return Ok(Token {
                kind: TokenKind::Eof,
                line: self.line,
            });
        }

        match parse_token(remaining) {
            Ok((rest, kind)) => {
                let line = self.line;
                let consumed = &remaining[..remaining.len() - rest.len()];
                self.advance(consumed);
                Ok(Token { kind, line })
            }
            Err(_) => {
                let c = remaining.chars().next().unwrap_or('\0');
                if c.is_ascii_digit() {
                    let end = remaining
                        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
                        .unwrap_or(remaining.len());
                    bail_lex_at!(self.location(), "malformed numeric literal '{}'", &remaining[..end]);
                }
                if c == '"' {
                    bail_lex_at!(self.location(), "unterminated string literal");
                }
                bail_lex_at!(self.location(), "unexpected character '{}'", c)
            }
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let token = self.next_token();
        if token.is_err() {
            self.finished = true;
        }
        Some(token)
    }
}

/// Tokenize a whole buffer, including the trailing `Eof` sentinel.
pub fn tokenize(file: &str, source: &str) -> Result<Vec<Token>> {
    Lexer::new(file, source).collect()
}
