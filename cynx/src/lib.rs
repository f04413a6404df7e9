//! Host-side runner: loads a linked image (or assembles a source file in
//! memory) and executes it on a fresh VM.

use cynfile::CodeImage;
use cynvm::{Fault, Vm};
use std::fmt;
use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Image(cynfile::Error),
    Asm(cynasm::Diagnostics),
    Setup(Fault),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "{}", err),
            Error::Image(err) => write!(f, "{}", err),
            Error::Asm(diags) => write!(f, "{}", diags),
            Error::Setup(fault) => write!(f, "{}", fault),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<cynfile::Error> for Error {
    fn from(err: cynfile::Error) -> Error {
        Error::Image(err)
    }
}

/// Runs `image` to completion. A fault comes back alongside the VM so the
/// caller can dump its final state.
pub fn run_image(
    image: CodeImage,
    mem_size: u64,
    stack_size: u64,
    args: &[&str],
) -> Result<(Vm, Result<(), Fault>), Error> {
    let mut vm = Vm::new(image, mem_size, stack_size).map_err(Error::Setup)?;
    let result = vm.run(args);
    Ok((vm, result))
}

/// Loads a linked image from `path` and runs it.
pub fn run_image_file<P: AsRef<Path>>(
    path: P,
    mem_size: u64,
    stack_size: u64,
    args: &[&str],
) -> Result<(Vm, Result<(), Fault>), Error> {
    let image = cynfile::read_file(path)?;
    run_image(image, mem_size, stack_size, args)
}

/// Assembles the source file at `path` in memory and runs the result.
pub fn run_asm_file<P: AsRef<Path>>(
    path: P,
    mem_size: u64,
    stack_size: u64,
    args: &[&str],
) -> Result<(Vm, Result<(), Fault>), Error> {
    let mut input = String::new();
    BufReader::new(File::open(path)?).read_to_string(&mut input)?;

    let image = cynasm::assemble(&input).map_err(Error::Asm)?;
    run_image(image, mem_size, stack_size, args)
}
