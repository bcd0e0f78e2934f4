use std::process::ExitCode;

use clap::Parser;

use crate::cli::App;

mod api;
mod cli;
mod config;
mod redis;
mod utils;

fn main() -> ExitCode {
    if std::env::var("RUST_BACKTRACE").is_err() {
        // SAFETY: no other threads are running yet.
        unsafe { std::env::set_var("RUST_BACKTRACE", "1") };
    }

    match App::parse().run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}
