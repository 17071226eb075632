//! Crate root: wires together the compilation pipeline.
//!
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` owns all syntactic knowledge and resolves names against the
//!   scopes it builds, producing an arena-based [`ast::Program`].
//! - `resolve` links declarations to classes, rejects layout cycles (see
//!   `cycle`) and checks member accesses.
//! - `ty` computes instance layouts for the code generator.
//! - `codegen` lowers the resolved program into x86-64 AT&T assembly.
//! - `error` centralises reporting utilities shared by the other modules.

pub mod ast;
pub mod error;
pub mod parser;
pub mod resolve;
pub mod tokenizer;
pub mod ty;

mod codegen;
mod cycle;

pub use error::{CompileError, CompileResult};

/// Run the front end: tokenize, parse and resolve a source string.
pub fn analyze(source: &str) -> CompileResult<ast::Program> {
  let tokens = tokenizer::tokenize(source)?;
  let mut program = parser::parse(tokens, source)?;
  resolve::resolve(&mut program, source)?;
  Ok(program)
}

/// Compile a source string into AT&T assembly.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  let program = analyze(source)?;
  codegen::generate(&program, source)
}
