//! Assembler for the [cynvm](../cynvm/index.html) virtual machine.
//!
//! The entry point is [`assemble`], which takes assembly source and produces
//! a linked [`CodeImage`](../cynfile/struct.CodeImage.html) ready for the
//! VM or for writing to disk. Parsing is implemented with [pest]; the error
//! type is `pest::error::Error<Rule>`, so every diagnostic carries a source
//! span and pretty-prints with line context.
//!
//! # Assembly language
//!
//! The language is line-oriented. A line holds a label, an instruction
//! (optionally preceded by a label), or a data declaration. Comments run
//! from `//` to the end of the line; `/* ... */` comments nest.
//!
//! ## Instructions
//!
//! ```text
//! mnemonic[.mode] [arg [, arg]]
//! ```
//!
//! The optional `.mode` suffix selects the destination width: `b`, `s`, `w`
//! or `q` for 1, 2, 4 or 8 bytes (the default is `q`). Arguments are
//! registers (`r0`-`r5`, `sp`, `ip`, `bp`, `flg`), integer/character/float
//! literals, declared variables, labels (forward references allowed), or
//! `#name` for the byte size of variable `name`. Wrapping an argument in
//! `[...]` makes it a memory reference; `[reg, +off]` (or `[reg + off]`)
//! forms an effective address.
//!
//! ## Data declarations
//!
//! ```text
//! $name = "bytes\n"          // string, written without a terminator
//! $name = { 1, 2, 'x' }      // byte list
//! $name = 42`w               // integer scalar with optional width
//! $name = 2.5                // float scalar (modes w/q)
//! $name = [64]`s             // uninitialized reservation of 64 shorts
//! ```
//!
//! ## Predefined symbols
//!
//! `argc` (16) and `argv` (24) name frame offsets for callees, `__stdin`,
//! `__stdout` and `__stderr` the standard descriptors, and `__<name>` the id
//! of every native builtin (for example `ncall __write`).
//!
//! [pest]: https://docs.rs/pest/

mod assembler;
mod linker;
mod literals;
mod parser;
mod symbols;


use cynfile::CodeImage;
use parser::AsmParser;
use pest::{Parser, Span};
use std::fmt;

pub use parser::Rule;
pub use symbols::{Patch, Symbol, SymbolTable, SymbolTag};

/// Diagnostics are pest errors over the assembly grammar, so each one
/// carries the offending source span and pretty-prints with line context.
pub type Error = pest::error::Error<Rule>;

pub(crate) type Result<T> = std::result::Result<T, Error>;

/// Builds a diagnostic with `message`, anchored at `span`.
pub(crate) fn err_at(message: impl Into<String>, span: Span) -> Error {
    let variant = pest::error::ErrorVariant::CustomError {
        message: message.into(),
    };
    Error::new_from_span(variant, span)
}

/// Every error an assembly pass produced. The pass recovers per line and at
/// link time, so one run reports as much as it can.
#[derive(Debug)]
pub struct Diagnostics {
    errors: Vec<Error>,
}

impl Diagnostics {
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Attaches the input path to every diagnostic, for display.
    pub fn with_path(self, path: &str) -> Diagnostics {
        Diagnostics {
            errors: self
                .errors
                .into_iter()
                .map(|err| err.with_path(path))
                .collect(),
        }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for error in &self.errors {
            writeln!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl From<Vec<Error>> for Diagnostics {
    fn from(errors: Vec<Error>) -> Diagnostics {
        Diagnostics { errors }
    }
}

/// Assembles and links `input` into a code image.
pub fn assemble(input: &str) -> std::result::Result<CodeImage, Diagnostics> {
    let mut pairs = AsmParser::parse(Rule::program, input)
        .map_err(|err| Diagnostics { errors: vec![err] })?;

    let asm = assembler::Assembler::new()
        .process(pairs.next().unwrap())
        .map_err(Diagnostics::from)?;
    linker::link(asm).map_err(Diagnostics::from)
}
