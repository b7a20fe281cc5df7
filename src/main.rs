//! CLI entry point.
//!
//! A single positional argument (the listen port); missing or malformed is a usage
//! error with a non-zero exit. Everything else comes from the environment
//! (`holt::config::Config::from_env`). All fatal startup failures funnel through one
//! `Result` with chained context printed before exiting.

use std::error::Error as _;
use std::process::ExitCode;

use holt::config::Config;
use holt::error::StartupError;

fn parse_port(args: &mut impl Iterator<Item = String>) -> Result<u16, StartupError> {
    let raw = args.next().ok_or(StartupError::MissingArgument("port"))?;
    raw.parse()
        .map_err(|_| StartupError::InvalidArgument { name: "port", value: raw })
}

fn main() -> ExitCode {
    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "holt".to_string());

    let result = parse_port(&mut args).map(Config::from_env).and_then(holt::run);

    if let Err(err) = result {
        eprintln!("{program}: fatal: {err}");
        let mut source = err.source();
        while let Some(s) = source {
            eprintln!("  caused by: {s}");
            source = s.source();
        }
        if matches!(err, StartupError::MissingArgument(_)) {
            eprintln!("usage: {program} <port>");
        }
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
