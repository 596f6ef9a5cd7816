use logos::Logos;

fn parse_int(s: &str) -> Option<i64> {
    let cleaned = s.replace('_', "");
    let (digits, radix) = match cleaned.get(..2) {
        Some("0x") | Some("0X") => (&cleaned[2..], 16),
        Some("0b") | Some("0B") => (&cleaned[2..], 2),
        Some("0o") | Some("0O") => (&cleaned[2..], 8),
        _ => (cleaned.as_str(), 10),
    };
    if digits.is_empty() {
        return None;
    }
    i64::from_str_radix(digits, radix).ok()
}

fn unescape(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some('0') => result.push('\0'),
            Some('\\') => result.push('\\'),
            Some('"') => result.push('"'),
            Some('\'') => result.push('\''),
            Some('\n') => {}
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }
    result
}

fn string_body(s: &str) -> Option<String> {
    let quote_len = if s.starts_with("\"\"\"") || s.starts_with("'''") { 3 } else { 1 };
    if s.len() < quote_len * 2 {
        return None;
    }
    Some(unescape(&s[quote_len..s.len() - quote_len]))
}

/// Width of the indentation following the last line break in the slice.
fn indent_width(s: &str) -> usize {
    let tail = match s.rfind('\n') {
        Some(pos) => &s[pos + 1..],
        None => s,
    };
    tail.chars().map(|c| if c == '\t' { 8 } else { 1 }).sum()
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\f]+")]
#[logos(skip r"\\\r?\n")]
pub enum Token {
    // Keywords
    #[token("def")]
    Def,
    #[token("class")]
    Class,
    #[token("return")]
    Return,
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
    #[token("not")]
    Not,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("is")]
    Is,
    #[token("pass")]
    Pass,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("True")]
    True,
    #[token("False")]
    False,
    #[token("None")]
    NoneKw,
    #[token("yield")]
    Yield,
    #[token("try")]
    Try,
    #[token("except")]
    Except,
    #[token("finally")]
    Finally,
    #[token("raise")]
    Raise,
    #[token("as")]
    As,
    #[token("import")]
    Import,
    #[token("from")]
    From,
    #[token("lambda")]
    Lambda,
    #[token("global")]
    Global,
    #[token("nonlocal")]
    Nonlocal,
    #[token("with")]
    With,
    #[token("assert")]
    Assert,
    #[token("del")]
    Del,

    // Literals
    #[regex(r"0[xX][0-9a-fA-F_]+|0[bB][01_]+|0[oO][0-7_]+|[0-9][0-9_]*", |lex| parse_int(lex.slice()))]
    IntLit(i64),

    #[regex(r"[0-9][0-9_]*\.[0-9_]*([eE][+-]?[0-9]+)?|\.[0-9][0-9_]*([eE][+-]?[0-9]+)?|[0-9][0-9_]*[eE][+-]?[0-9]+", |lex| lex.slice().replace('_', "").parse::<f64>().ok())]
    FloatLit(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| string_body(lex.slice()))]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, |lex| string_body(lex.slice()))]
    #[regex(r#""""([^"\\]|\\.|"[^"]|""[^"])*""""#, |lex| string_body(lex.slice()))]
    #[regex(r#"'''([^'\\]|\\.|'[^']|''[^'])*'''"#, |lex| string_body(lex.slice()))]
    StringLit(String),

    // Identifiers
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    StarStar,
    #[token("/")]
    Slash,
    #[token("//")]
    SlashSlash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("==")]
    EqEq,
    #[token("!=")]
    BangEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,
    #[token("=")]
    Eq,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("//=")]
    SlashSlashEq,
    #[token("%=")]
    PercentEq,
    #[token("&=")]
    AmpEq,
    #[token("|=")]
    PipeEq,
    #[token("^=")]
    CaretEq,
    #[token("<<=")]
    ShlEq,
    #[token(">>=")]
    ShrEq,
    #[token("**=")]
    StarStarEq,

    // Punctuation
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
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,
    #[token("->")]
    Arrow,
    #[token("@")]
    At,

    /// Raw line break plus the indentation width of the following line.
    /// Rewritten by `lex` into `Newline` / `Indent` / `Dedent`.
    #[regex(r"(\r?\n[ \t\f]*)+", |lex| indent_width(lex.slice()))]
    LineBreak(usize),

    #[regex(r"#[^\n]*")]
    Comment,

    // Layout tokens synthesized by `lex`
    Newline,
    Indent,
    Dedent,
}

/// Returns true if the given string is a reserved word of the source language.
pub fn is_keyword(s: &str) -> bool {
    matches!(
        s,
        "def" | "class" | "return" | "if" | "elif" | "else" | "while" | "for" | "in" | "not"
            | "and" | "or" | "is" | "pass" | "break" | "continue" | "True" | "False" | "None"
            | "yield" | "try" | "except" | "finally" | "raise" | "as" | "import" | "from"
            | "lambda" | "global" | "nonlocal" | "with" | "assert" | "del"
    )
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Token::Def => "def",
            Token::Class => "class",
            Token::Return => "return",
            Token::If => "if",
            Token::Elif => "elif",
            Token::Else => "else",
            Token::While => "while",
            Token::For => "for",
            Token::In => "in",
            Token::Not => "not",
            Token::And => "and",
            Token::Or => "or",
            Token::Is => "is",
            Token::Pass => "pass",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::True => "True",
            Token::False => "False",
            Token::NoneKw => "None",
            Token::Yield => "yield",
            Token::Try => "try",
            Token::Except => "except",
            Token::Finally => "finally",
            Token::Raise => "raise",
            Token::As => "as",
            Token::Import => "import",
            Token::From => "from",
            Token::Lambda => "lambda",
            Token::Global => "global",
            Token::Nonlocal => "nonlocal",
            Token::With => "with",
            Token::Assert => "assert",
            Token::Del => "del",
            Token::IntLit(n) => return write!(f, "{n}"),
            Token::FloatLit(n) => return write!(f, "{n}"),
            Token::StringLit(s) => return write!(f, "{s:?}"),
            Token::Ident => "identifier",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::StarStar => "**",
            Token::Slash => "/",
            Token::SlashSlash => "//",
            Token::Percent => "%",
            Token::Amp => "&",
            Token::Pipe => "|",
            Token::Caret => "^",
            Token::Tilde => "~",
            Token::Shl => "<<",
            Token::Shr => ">>",
            Token::EqEq => "==",
            Token::BangEq => "!=",
            Token::Lt => "<",
            Token::LtEq => "<=",
            Token::Gt => ">",
            Token::GtEq => ">=",
            Token::Eq => "=",
            Token::PlusEq => "+=",
            Token::MinusEq => "-=",
            Token::StarEq => "*=",
            Token::SlashEq => "/=",
            Token::SlashSlashEq => "//=",
            Token::PercentEq => "%=",
            Token::AmpEq => "&=",
            Token::PipeEq => "|=",
            Token::CaretEq => "^=",
            Token::ShlEq => "<<=",
            Token::ShrEq => ">>=",
            Token::StarStarEq => "**=",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Comma => ",",
            Token::Colon => ":",
            Token::Semicolon => ";",
            Token::Dot => ".",
            Token::Arrow => "->",
            Token::At => "@",
            Token::LineBreak(_) | Token::Newline => "newline",
            Token::Comment => "comment",
            Token::Indent => "indent",
            Token::Dedent => "dedent",
        };
        f.write_str(text)
    }
}
