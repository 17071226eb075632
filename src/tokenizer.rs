//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! The tokenizer knows a little more than a bare lexer: it separates
//! keywords and built-in type names from plain identifiers, and it
//! reclassifies an identifier as a type name when another identifier follows
//! it directly (`Point p;`). The language never places two plain identifiers
//! next to each other anywhere else, so the rule needs no symbol table.
//! Multi-character punctuators are matched before single-character ones to
//! avoid ambiguity.

use tracing::trace;

use crate::error::{CompileError, CompileResult};

/// Reserved words of the language.
pub const KEYWORDS: [&str; 8] = [
  "class", "return", "if", "else", "while", "true", "false", "null",
];

/// Type names that exist without a class declaration.
pub const BUILTIN_TYPES: [&str; 2] = ["int", "void"];

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Ident,
  /// A built-in type or an identifier used in type position.
  Type,
  Keyword,
  Punctuator,
  Num,
  Eof,
}

/// Thin wrapper for lexical information needed by later stages.
///
/// The literal text is not copied; `token_text` slices it out of the source.
#[derive(Debug, Clone)]
pub struct Token {
  pub kind: TokenKind,
  pub value: Option<i64>,
  pub loc: usize,
  pub len: usize,
}

impl Token {
  /// Convenience constructor to keep the `tokenize` loop readable.
  pub fn new(kind: TokenKind, loc: usize, len: usize, value: Option<i64>) -> Self {
    Self {
      kind,
      value,
      loc,
      len,
    }
  }
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut tokens = Vec::new();
  let bytes = input.as_bytes();
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];
    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    if input[i..].starts_with("//") {
      while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
      }
      continue;
    }

    if input[i..].starts_with("/*") {
      let Some(end) = input[i + 2..].find("*/") else {
        return Err(CompileError::lex(input, i, "unterminated block comment"));
      };
      i += end + 4;
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      i += 1;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
      let text = &input[start..i];
      let value = text
        .parse::<i64>()
        .map_err(|err| CompileError::lex(input, start, format!("invalid number: {err}")))?;
      push_token(&mut tokens, Token::new(TokenKind::Num, start, i - start, Some(value)));
      continue;
    }

    if c.is_ascii_alphabetic() || c == b'_' {
      let start = i;
      i += 1;
      while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
      }
      let word = &input[start..i];
      let kind = if KEYWORDS.contains(&word) {
        TokenKind::Keyword
      } else if BUILTIN_TYPES.contains(&word) {
        TokenKind::Type
      } else {
        TokenKind::Ident
      };
      push_token(&mut tokens, Token::new(kind, start, i - start, None));
      continue;
    }

    if let Some(op) = ["==", "!=", "<=", ">=", "&&", "||"]
      .into_iter()
      .find(|op| input[i..].starts_with(op))
    {
      push_token(&mut tokens, Token::new(TokenKind::Punctuator, i, op.len(), None));
      i += op.len();
      continue;
    }

    if matches!(
      c,
      b'+'
        | b'-'
        | b'*'
        | b'/'
        | b'%'
        | b'='
        | b'<'
        | b'>'
        | b'!'
        | b'('
        | b')'
        | b'{'
        | b'}'
        | b','
        | b';'
        | b'.'
    ) {
      push_token(&mut tokens, Token::new(TokenKind::Punctuator, i, 1, None));
      i += 1;
      continue;
    }

    let invalid_char = input[i..].chars().next().unwrap_or('\0');
    return Err(CompileError::lex(
      input,
      i,
      format!("unknown character: '{invalid_char}'"),
    ));
  }

  tokens.push(Token::new(TokenKind::Eof, input.len(), 0, None));
  trace!(count = tokens.len(), "tokenized source");
  Ok(tokens)
}

/// Append a token, promoting the previous token to a type name when two
/// identifiers end up adjacent.
fn push_token(tokens: &mut Vec<Token>, token: Token) {
  if token.kind == TokenKind::Ident
    && let Some(last) = tokens.last_mut()
    && last.kind == TokenKind::Ident
  {
    last.kind = TokenKind::Type;
  }
  tokens.push(token);
}

/// Return the slice from the source that produced this token.
pub fn token_text<'a>(token: &Token, source: &'a str) -> &'a str {
  let end = token.loc + token.len;
  &source[token.loc..end]
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>, source: &str) -> String {
  match token {
    Some(t) => match t.kind {
      TokenKind::Eof => "EOF".to_string(),
      _ => token_text(t, source).to_string(),
    },
    None => "EOF".to_string(),
  }
}

/// Print the tokens around `index`, one per line, marking the token at `index`.
pub fn token_window(tokens: &[Token], source: &str, index: usize, radius: usize) -> String {
  if tokens.is_empty() {
    return String::new();
  }
  let index = index.min(tokens.len() - 1);
  let first = index.saturating_sub(radius);
  let last = (index + radius).min(tokens.len() - 1);

  let mut window = String::new();
  for (i, token) in tokens.iter().enumerate().take(last + 1).skip(first) {
    let marker = if i == index { "  <-- current" } else { "" };
    window.push_str(&format!(
      "[{:?}] \"{}\"{marker}\n",
      token.kind,
      describe_token(Some(token), source)
    ));
  }
  window.pop();
  window
}
