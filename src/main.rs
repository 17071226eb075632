//! Command-line front end.
//!
//! ```text
//! rkite [OPTIONS] <SOURCE>
//!
//! Options:
//!   -o, --output <PATH>  Write the result to a file instead of stdout
//!       --emit <KIND>    What to print [default: asm] [possible values: asm, tokens, ast]
//!   -v, --verbose        Increase log verbosity (can be repeated)
//! ```

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rkite::tokenizer::{self, TokenKind, describe_token};

#[derive(Parser)]
#[command(name = "rkite")]
#[command(version)]
#[command(about = "Compile a small class-based language to x86-64 assembly", long_about = None)]
struct Cli {
  /// Program text to compile
  #[arg(value_name = "SOURCE")]
  source: String,

  /// Write the result to a file instead of stdout
  #[arg(short, long, value_name = "PATH")]
  output: Option<PathBuf>,

  /// What to print
  #[arg(long, value_enum, default_value_t = Emit::Asm)]
  emit: Emit,

  /// Increase log verbosity (can be repeated: -v, -vv, -vvv)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Emit {
  /// x86-64 AT&T assembly
  Asm,
  /// The token stream, one token per line
  Tokens,
  /// The resolved program tree
  Ast,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let filter = match cli.verbose {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
    .with_writer(std::io::stderr)
    .init();

  match run(&cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      eprintln!("{err:#}");
      ExitCode::from(1)
    }
  }
}

fn run(cli: &Cli) -> Result<()> {
  let output = render(&cli.source, cli.emit)?;
  match &cli.output {
    Some(path) => {
      fs::write(path, output).with_context(|| format!("failed to write {}", path.display()))?;
      info!(path = %path.display(), "wrote output");
    }
    None => print!("{output}"),
  }
  Ok(())
}

fn render(source: &str, emit: Emit) -> Result<String> {
  let rendered = match emit {
    Emit::Asm => rkite::generate_assembly(source)?,
    Emit::Tokens => {
      let mut listing = String::new();
      for token in tokenizer::tokenize(source)? {
        if token.kind == TokenKind::Eof {
          listing.push_str("[Eof]\n");
          continue;
        }
        listing.push_str(&format!(
          "[{:?}] \"{}\"\n",
          token.kind,
          describe_token(Some(&token), source)
        ));
      }
      listing
    }
    Emit::Ast => format!("{:#?}\n", rkite::analyze(source)?),
  };
  Ok(rendered)
}
