// lexer for lir's textual syntax.

use std::ops::Range;

use derive_more::Display;
use logos::Logos;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Range<usize>,
}

#[derive(Logos, Clone, Copy, Debug, Display, Eq, PartialEq)]
#[logos(skip r"([ \t\r\n\f]+|//[^\n]*)")]
pub enum TokenKind {
    #[token("fn")]
    #[display(fmt = "fn")]
    Fn,

    #[token("let")]
    #[display(fmt = "let")]
    Let,

    #[token("extern")]
    #[display(fmt = "extern")]
    Extern,

    #[token("int")]
    #[display(fmt = "int")]
    Int,

    #[token("then")]
    #[display(fmt = "then")]
    Then,

    #[regex("-?[0-9]+")]
    #[display(fmt = "num")]
    Num,

    #[regex("[a-zA-Z_][a-zA-Z0-9_.]*")]
    #[display(fmt = "id")]
    Id,

    // `$arith`, `$load`, ...
    #[regex(r"\$[a-z_]+")]
    #[display(fmt = "opcode")]
    Opcode,

    #[token(":")]
    #[display(fmt = ":")]
    Colon,

    #[token(",")]
    #[display(fmt = ",")]
    Comma,

    #[token("->")]
    #[display(fmt = "->")]
    Arrow,

    #[token("&")]
    #[display(fmt = "&")]
    Address,

    #[token("=")]
    #[display(fmt = "=")]
    Gets,

    #[token("(")]
    #[display(fmt = "(")]
    OpenParen,

    #[token(")")]
    #[display(fmt = ")")]
    CloseParen,

    #[token("[")]
    #[display(fmt = "[")]
    OpenBracket,

    #[token("]")]
    #[display(fmt = "]")]
    CloseBracket,

    #[token("{")]
    #[display(fmt = "{{")]
    OpenBrace,

    #[token("}")]
    #[display(fmt = "}}")]
    CloseBrace,
}

/// Tokenizes the given string.  On an unrecognized lexeme, returns its span.
pub fn lex(code: &str) -> Result<Vec<Token>, Range<usize>> {
    TokenKind::lexer(code)
        .spanned()
        .map(|(kind, span)| match kind {
            Ok(kind) => Ok(Token { kind, span }),
            Err(()) => Err(span),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use TokenKind::*;

    fn kinds(code: &str) -> Vec<TokenKind> {
        lex(code).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_win_over_ids() {
        assert_eq!(kinds("fn fnord int integer"), vec![Fn, Id, Int, Id]);
    }

    #[test]
    fn opcodes_and_numbers() {
        assert_eq!(
            kinds("x = $arith div -3 y // trailing comment"),
            vec![Id, Gets, Opcode, Id, Num, Id]
        );
    }

    #[test]
    fn arrow_is_not_a_negative_number() {
        assert_eq!(kinds("() -> &int"), vec![OpenParen, CloseParen, Arrow, Address, Int]);
    }

    #[test]
    fn bad_character_is_reported() {
        assert_eq!(lex("a = #"), Err(4..5));
    }
}
