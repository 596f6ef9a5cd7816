pub mod token;
pub use token::is_keyword;

use logos::Logos;
use crate::span::{Span, Spanned};
use crate::diagnostics::CompileError;
use token::Token;

/// Lex source text into tokens with Python layout: significant line breaks become
/// `Newline`, indentation changes become `Indent` / `Dedent`. Line breaks inside
/// brackets are dropped (implicit line joining), as are comments and blank lines.
pub fn lex(source: &str) -> Result<Vec<Spanned<Token>>, CompileError> {
    let mut raw: Vec<Spanned<Token>> = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(Token::Comment) => continue,
            Ok(Token::LineBreak(width)) => {
                // A comment-only line leaves two breaks back to back; the later width wins.
                if let Some(last) = raw.last_mut() {
                    if let Token::LineBreak(_) = last.node {
                        last.node = Token::LineBreak(width);
                        last.span.end = span.end;
                        continue;
                    }
                }
                raw.push(Spanned::new(Token::LineBreak(width), Span::new(span.start, span.end)));
            }
            Ok(tok) => raw.push(Spanned::new(tok, Span::new(span.start, span.end))),
            Err(()) => {
                let text = &source[span.start..span.end];
                return Err(CompileError::syntax(rejected_text(text), Span::new(span.start, span.end)));
            }
        }
    }

    if let Some(first) = raw.first() {
        let line_start = source[..first.span.start].rfind('\n').map_or(0, |p| p + 1);
        if !matches!(first.node, Token::LineBreak(_)) && first.span.start > line_start {
            return Err(CompileError::syntax("unexpected indent", first.span));
        }
    }

    layout(raw, source.len())
}

/// Message for a slice the token rules matched but could not convert.
fn rejected_text(text: &str) -> String {
    if !text.starts_with(|c: char| c.is_ascii_digit()) {
        return format!("unexpected character '{text}'");
    }
    let digits = match text.get(1..2) {
        Some("x" | "X" | "b" | "B" | "o" | "O") => &text[2..],
        _ => text,
    };
    if digits.chars().all(|c| c == '_') {
        return format!("invalid integer literal '{text}'");
    }
    "integer literal out of range".to_string()
}

fn layout(raw: Vec<Spanned<Token>>, eof: usize) -> Result<Vec<Spanned<Token>>, CompileError> {
    let mut tokens = Vec::with_capacity(raw.len() + 8);
    let mut indents: Vec<usize> = vec![0];
    let mut depth = 0usize;

    let mut iter = raw.into_iter().peekable();
    while let Some(tok) = iter.next() {
        match tok.node {
            Token::LineBreak(width) => {
                if depth > 0 {
                    continue;
                }
                if iter.peek().is_none() {
                    break;
                }
                if tokens.is_empty() {
                    if width != 0 {
                        return Err(CompileError::syntax("unexpected indent", tok.span));
                    }
                    continue;
                }
                let at = Span::new(tok.span.end, tok.span.end);
                tokens.push(Spanned::new(Token::Newline, Span::new(tok.span.start, tok.span.start + 1)));
                let top = indents.last().copied().unwrap_or(0);
                if width > top {
                    indents.push(width);
                    tokens.push(Spanned::new(Token::Indent, at));
                } else {
                    while width < indents.last().copied().unwrap_or(0) {
                        indents.pop();
                        tokens.push(Spanned::new(Token::Dedent, at));
                    }
                    if width != indents.last().copied().unwrap_or(0) {
                        return Err(CompileError::syntax(
                            "unindent does not match any outer indentation level",
                            at,
                        ));
                    }
                }
            }
            Token::LParen | Token::LBracket | Token::LBrace => {
                depth += 1;
                tokens.push(tok);
            }
            Token::RParen | Token::RBracket | Token::RBrace => {
                depth = depth.saturating_sub(1);
                tokens.push(tok);
            }
            _ => tokens.push(tok),
        }
    }

    let end = Span::new(eof, eof);
    if let Some(last) = tokens.last() {
        if !matches!(last.node, Token::Newline | Token::Dedent) {
            tokens.push(Spanned::new(Token::Newline, end));
        }
    }
    while indents.len() > 1 {
        indents.pop();
        tokens.push(Spanned::new(Token::Dedent, end));
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        lex(src).unwrap().into_iter().map(|t| t.node).collect()
    }

    #[test]
    fn lex_simple_function() {
        let toks = kinds("def f(a: int) -> int:\n    return a\n");
        assert_eq!(
            toks,
            vec![
                Token::Def, Token::Ident, Token::LParen, Token::Ident, Token::Colon, Token::Ident,
                Token::RParen, Token::Arrow, Token::Ident, Token::Colon, Token::Newline,
                Token::Indent, Token::Return, Token::Ident, Token::Newline, Token::Dedent,
            ]
        );
    }

    #[test]
    fn lex_nested_blocks_emit_matching_dedents() {
        let src = "def f():\n    while x:\n        y = 1\n    return y\n";
        let toks = kinds(src);
        let indents = toks.iter().filter(|t| **t == Token::Indent).count();
        let dedents = toks.iter().filter(|t| **t == Token::Dedent).count();
        assert_eq!(indents, 2);
        assert_eq!(dedents, 2);
    }

    #[test]
    fn lex_skips_blank_and_comment_lines() {
        let src = "x = 1\n\n# note\n   # indented note\ny = 2\n";
        let toks = kinds(src);
        assert_eq!(
            toks,
            vec![
                Token::Ident, Token::Eq, Token::IntLit(1), Token::Newline,
                Token::Ident, Token::Eq, Token::IntLit(2), Token::Newline,
            ]
        );
    }

    #[test]
    fn lex_joins_lines_inside_brackets() {
        let toks = kinds("x = [1,\n     2]\n");
        assert!(!toks[..toks.len() - 1].contains(&Token::Newline));
        assert!(!toks.contains(&Token::Indent));
    }

    #[test]
    fn lex_backslash_continuation() {
        let toks = kinds("x = 1 + \\\n    2\n");
        assert_eq!(
            toks,
            vec![Token::Ident, Token::Eq, Token::IntLit(1), Token::Plus, Token::IntLit(2), Token::Newline]
        );
    }

    #[test]
    fn lex_missing_trailing_newline() {
        let toks = kinds("def f():\n    pass");
        assert_eq!(toks.last(), Some(&Token::Dedent));
        assert!(toks.contains(&Token::Newline));
    }

    #[test]
    fn lex_number_literals() {
        let toks = kinds("a = 0xff + 1_000 + 2.5 + 1e3\n");
        assert!(toks.contains(&Token::IntLit(255)));
        assert!(toks.contains(&Token::IntLit(1000)));
        assert!(toks.contains(&Token::FloatLit(2.5)));
        assert!(toks.contains(&Token::FloatLit(1000.0)));
    }

    #[test]
    fn lex_operators_longest_match() {
        let toks = kinds("a //= b ** c\n");
        assert_eq!(toks[1], Token::SlashSlashEq);
        assert_eq!(toks[3], Token::StarStar);
    }

    #[test]
    fn lex_keywords_vs_identifiers() {
        let src = "None Nonesuch True"
            .to_string();
        let toks = kinds(&src);
        assert_eq!(toks[0], Token::NoneKw);
        assert_eq!(toks[1], Token::Ident);
        assert_eq!(toks[2], Token::True);
    }

    #[test]
    fn lex_bad_dedent_is_error() {
        let err = lex("def f():\n        x = 1\n    y = 2\n").unwrap_err();
        assert!(err.to_string().contains("unindent"));
    }

    #[test]
    fn lex_leading_indent_is_error() {
        assert!(lex("   x = 1\n").is_err());
    }

    #[test]
    fn lex_unexpected_character() {
        let err = lex("x = $\n").unwrap_err();
        assert!(err.to_string().contains("unexpected character '$'"));
    }

    #[test]
    fn lex_oversized_integer_is_out_of_range() {
        let err = lex("x = 99999999999999999999\n").unwrap_err();
        assert_eq!(err.message(), "integer literal out of range");
        assert_eq!(err.span(), Some(Span::new(4, 24)));
        assert!(lex("x = 9223372036854775807\n").is_ok());
    }

    #[test]
    fn lex_prefix_without_digits_is_invalid() {
        let err = lex("x = 0x_\n").unwrap_err();
        assert!(err.message().contains("invalid integer literal"));
    }
}
