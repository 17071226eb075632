//! Shared error utilities used across the compilation pipeline.
//!
//! Diagnostics point at the offending byte with a caret under the source
//! line. Every stage fails fast: the first error aborts the whole
//! compilation and no partial assembly is ever returned.

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompileError {
  /// The source contains a character or literal the tokenizer cannot accept.
  #[snafu(display("lex error: {message}\n{location}"))]
  Lex { message: String, location: String },

  /// The token stream does not match the grammar, or a declaration is not
  /// allowed where it appears.
  #[snafu(display("parse error: {message}\n{location}\n{window}"))]
  Parse {
    message: String,
    location: String,
    window: String,
  },

  /// A name (variable, type, field or method) does not refer to anything visible.
  #[snafu(display("resolution error: {message}\n{location}"))]
  Resolution { message: String, location: String },

  /// Inline class fields form a loop, so the layout would be infinitely large.
  #[snafu(display(
    "cyclic class layout: {path}\nclass `{class}` would have to contain itself; \
     initialize one of the fields in the cycle to null to store it by reference"
  ))]
  Cycle { class: String, path: String },

  /// A `return` disagrees with the declared return type of its routine.
  #[snafu(display("return type error in `{function}`: {message}\n{location}"))]
  ReturnType {
    function: String,
    message: String,
    location: String,
  },

  /// The code generator met a tree shape the front end should never produce.
  #[snafu(display("internal code generation error: {message}"))]
  CodeGen { message: String },
}

impl CompileError {
  /// Construct a lexing error anchored at a specific byte offset in the source.
  pub fn lex(source: &str, loc: usize, message: impl Into<String>) -> Self {
    Self::Lex {
      message: message.into(),
      location: locate(source, loc),
    }
  }

  pub fn resolution(source: &str, loc: usize, message: impl Into<String>) -> Self {
    Self::Resolution {
      message: message.into(),
      location: locate(source, loc),
    }
  }

  pub fn return_type(
    source: &str,
    loc: usize,
    function: impl Into<String>,
    message: impl Into<String>,
  ) -> Self {
    Self::ReturnType {
      function: function.into(),
      message: message.into(),
      location: locate(source, loc),
    }
  }

  pub fn codegen(message: impl Into<String>) -> Self {
    Self::CodeGen {
      message: message.into(),
    }
  }
}

/// Render a byte offset as `--> line:column` followed by the source line and
/// a caret under the offending character.
pub fn locate(source: &str, loc: usize) -> String {
  let safe_loc = loc.min(source.len());
  let line_start = source[..safe_loc].rfind('\n').map_or(0, |i| i + 1);
  let line_end = source[safe_loc..]
    .find('\n')
    .map_or(source.len(), |i| safe_loc + i);
  let line_no = source[..line_start].matches('\n').count() + 1;
  let column = source[line_start..safe_loc].chars().count() + 1;
  let marker = format!("{}^", " ".repeat(column - 1));
  format!(
    "--> {line_no}:{column}\n  | {}\n  | {marker}",
    &source[line_start..line_end]
  )
}
