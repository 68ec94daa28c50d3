//! Query server binary. No arguments; configuration comes from `ALEX_*`
//! environment variables.

use alex::config::Config;
use alex::server::{self, ServeError};
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("configuration error: {}", e);
            return ExitCode::from(2);
        }
    };

    match server::serve(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ ServeError::Bind { .. }) => {
            log::error!("{}", e);
            ExitCode::from(1)
        }
        Err(e @ ServeError::Index(_)) => {
            log::error!("{}", e);
            ExitCode::from(2)
        }
    }
}
