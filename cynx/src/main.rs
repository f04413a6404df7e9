#[macro_use]
extern crate clap;

use clap::{Arg, ArgGroup};
use std::io;
use std::process;

fn main() {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("PROGRAM")
                .help("Sets the image file to run")
                .index(1),
        )
        .arg(
            Arg::with_name("assembly")
                .short("a")
                .long("assembly")
                .takes_value(true)
                .value_name("ASSEMBLY")
                .help("Assembles and runs the given source file"),
        )
        .arg(
            Arg::with_name("memory")
                .short("m")
                .long("memory")
                .takes_value(true)
                .value_name("MEMORY")
                .default_value("1048576")
                .help("Sets the size of the working memory"),
        )
        .arg(
            Arg::with_name("stack")
                .short("s")
                .long("stack")
                .takes_value(true)
                .value_name("STACK")
                .default_value("65536")
                .help("Sets the size of the stack"),
        )
        .arg(
            Arg::with_name("ARGS")
                .help("Arguments passed to the program")
                .multiple(true)
                .last(true),
        )
        .group(
            ArgGroup::with_name("input")
                .args(&["PROGRAM", "assembly"])
                .required(true),
        )
        .get_matches();

    let mem_size = value_t!(matches.value_of("memory"), u64).unwrap_or_else(|e| e.exit());
    let stack_size = value_t!(matches.value_of("stack"), u64).unwrap_or_else(|e| e.exit());
    let args: Vec<&str> = matches
        .values_of("ARGS")
        .map(|values| values.collect())
        .unwrap_or_default();

    let outcome = match matches.value_of("PROGRAM") {
        Some(program) => cynx::run_image_file(program, mem_size, stack_size, &args),
        None => {
            let asm = matches.value_of("assembly").unwrap();
            cynx::run_asm_file(asm, mem_size, stack_size, &args)
        }
    };

    match outcome {
        Ok((_, Ok(()))) => {}
        Ok((vm, Err(fault))) => {
            eprintln!("error: {}", fault);
            let stderr = io::stderr();
            let _ = vm.dump_state(&mut stderr.lock());
            process::exit(1);
        }
        Err(err) => {
            eprint!("{}", err);
            process::exit(1);
        }
    }
}
