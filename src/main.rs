//! # ifjc
//!
//! The compiler binary: reads an IFJ24 program from standard input, writes
//! IFJcode24 to standard output and diagnostics to standard error. The exit
//! code encodes the first error encountered.

mod cli;

use std::io::{self, Read};
use std::process;

use log::info;

use cli::Cli;
use ifjc::{lexer::Lexer, ErrorKind};

fn main() {
    let args = Cli::init();

    simple_logger::init_with_level((&args.verbosity).into()).unwrap();

    let mut source = String::new();
    if let Err(err) = io::stdin().read_to_string(&mut source) {
        eprintln!("Failed to read the program from stdin: {err}");
        process::exit(ErrorKind::Internal.exit_code());
    }

    if args.dump_tokens {
        match Lexer::new(&source).lex() {
            Ok(tokens) => {
                for token in tokens {
                    eprintln!("{token:?}");
                }
                return;
            }
            Err(err) => {
                eprintln!("{err}");
                process::exit(err.kind.exit_code());
            }
        }
    }

    let stdout = io::stdout();
    match ifjc::compile(&source, stdout.lock()) {
        Ok(()) => info!("compilation finished"),
        Err(err) => {
            eprintln!("{err}");
            process::exit(err.kind.exit_code());
        }
    }
}
