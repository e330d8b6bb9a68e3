#![forbid(unsafe_code)]

//! rsweep: repository sweep CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = match cli_app::Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Usage errors are configuration errors; help and version are not.
            let code = i32::from(e.use_stderr());
            let _ = e.print();
            std::process::exit(code);
        }
    };
    match cli_app::run(&args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("rsweep: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
