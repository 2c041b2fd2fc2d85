use std::process::ExitCode;

use reactornet::config::Config;
use reactornet::error::ServerError;
use reactornet::server::Server;

const DEFAULT_CONFIG: &str = "reactornet.toml";

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = Config::from_file(&config_path);

    let mut server = match Server::new(&config) {
        Ok(server) => server,
        Err(err) => {
            log::error!("startup failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    match server.run() {
        Err(ServerError::ShutdownSignal) => {
            log::info!("shutdown requested, exiting");
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("fatal: {err}");
            ExitCode::FAILURE
        }
        Ok(()) => ExitCode::SUCCESS,
    }
}
