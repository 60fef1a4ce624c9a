//! # avpace
//!
//! Terminal media player and diagnostics for the avpace synchronization
//! engine.

use log::error;

mod cli;
mod controls;
mod logging;
mod runner;
mod ui;

fn main() {
    dotenv::dotenv().ok();
    let args = cli::args::build_cli().get_matches();

    let echo = args.subcommand_name().is_some() || args.get_flag("quiet");
    let log_buffer = logging::init(echo);

    let code = match runner::run(&args, log_buffer) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err.to_string().to_lowercase());
            if !echo {
                eprintln!("error: {}", err);
            }
            -1
        }
    };

    std::process::exit(code)
}
