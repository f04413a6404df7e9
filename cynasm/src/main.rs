#[macro_use]
extern crate clap;

use clap::{Arg, ArgMatches, SubCommand};
use std::fs::File;
use std::io::prelude::*;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process;

enum Error {
    /// An input path could not be read.
    Read(PathBuf, io::Error),
    /// An output path could not be written.
    Write(PathBuf, io::Error),
    Asm(cynasm::Diagnostics),
    Image(cynfile::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Read(path, err) => writeln!(f, "cannot read \"{}\": {}", path.display(), err),
            Error::Write(path, err) => {
                writeln!(f, "cannot write \"{}\": {}", path.display(), err)
            }
            Error::Asm(diags) => {
                writeln!(f, "assembly stopped after {} error(s)", diags.len())?;
                write!(f, "{}", diags)
            }
            Error::Image(err) => writeln!(f, "not a loadable image: {}", err),
        }
    }
}

fn main() {
    let matches = app_from_crate!()
        .subcommand(
            SubCommand::with_name("assemble")
                .about("Assembles a source file into a bytecode image")
                .arg(
                    Arg::with_name("INPUT")
                        .help("Sets the input file to use")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::with_name("output")
                        .short("o")
                        .long("output")
                        .takes_value(true)
                        .value_name("OUTPUT")
                        .help("Sets the output file to write to (default: <input>.bin)"),
                ),
        )
        .subcommand(
            SubCommand::with_name("disassemble")
                .about("Prints the instruction stream of a bytecode image")
                .arg(
                    Arg::with_name("INPUT")
                        .help("Sets the image file to use")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::with_name("output")
                        .short("o")
                        .long("output")
                        .takes_value(true)
                        .value_name("OUTPUT")
                        .help("Sets the output file to write to (default: stdout)"),
                )
                .arg(
                    Arg::with_name("hide_addr")
                        .long("hide-addr")
                        .help("Hides instruction addresses"),
                ),
        )
        .get_matches();

    let result = match matches.subcommand() {
        ("assemble", Some(sub)) => assemble(sub),
        ("disassemble", Some(sub)) => disassemble(sub),
        _ => {
            eprintln!("{}", matches.usage());
            process::exit(2);
        }
    };

    if let Err(err) = result {
        eprint!("{}", err);
        process::exit(1);
    }
}

fn read_to_string(path: &Path) -> Result<String, Error> {
    let read = || {
        let mut input = String::new();
        BufReader::new(File::open(path)?).read_to_string(&mut input)?;
        Ok(input)
    };
    read().map_err(|err| Error::Read(path.to_owned(), err))
}

fn assemble(matches: &ArgMatches) -> Result<(), Error> {
    let input_path = Path::new(matches.value_of("INPUT").unwrap());
    let input = read_to_string(input_path)?;

    let image = cynasm::assemble(&input).map_err(|diags| {
        Error::Asm(match input_path.to_str() {
            Some(path) => diags.with_path(path),
            None => diags,
        })
    })?;

    let output_path: PathBuf = matches
        .value_of("output")
        .map(PathBuf::from)
        .unwrap_or_else(|| input_path.with_extension("bin"));

    cynfile::write_file(&output_path, &image).map_err(|err| Error::Write(output_path, err))
}

fn disassemble(matches: &ArgMatches) -> Result<(), Error> {
    let input_path = Path::new(matches.value_of("INPUT").unwrap());
    let image = cynfile::read_file(input_path).map_err(Error::Image)?;

    let show_addr = !matches.is_present("hide_addr");

    match matches.value_of("output") {
        Some(path_str) => {
            let path = PathBuf::from(path_str);
            let write = || {
                let mut writer = BufWriter::new(File::create(&path)?);
                cynvm::disassemble(&image, &mut writer, show_addr)
            };
            write().map_err(|err| Error::Write(path.clone(), err))
        }
        None => {
            let stdout = io::stdout();
            cynvm::disassemble(&image, &mut stdout.lock(), show_addr)
                .map_err(|err| Error::Write(PathBuf::from("<stdout>"), err))
        }
    }
}
