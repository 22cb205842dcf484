use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

mod config;
mod handler;
mod http;
mod logger;
mod params;
mod server;

/// Serves system parameters such as the app version and boot duration
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file, extension optional
    #[arg(short, long, default_value = "config")]
    config: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let cfg = match config::Config::load_from(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            logger::log_error(&format!("could not load configuration: {e}"));
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logger::init(&cfg) {
        logger::log_error(&format!("could not open log files: {e}"));
        return ExitCode::FAILURE;
    }

    // Worker thread count comes from config, CPU cores otherwise
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(workers) = cfg.server.workers {
        runtime_builder.worker_threads(workers);
    }

    let runtime = match runtime_builder.build() {
        Ok(rt) => rt,
        Err(e) => {
            logger::log_error(&format!("could not start runtime: {e}"));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(cfg)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logger::log_error(&format!("could not serve: {e}"));
            ExitCode::FAILURE
        }
    }
}

async fn async_main(cfg: config::Config) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(config::AppState::with_default_params(cfg));
    let server = server::Server::bind(config::LISTEN_ADDR, Arc::clone(&state))?;

    logger::log_server_start(&server.local_addr()?, &state.config);
    let mut names: Vec<_> = state.params.names().collect();
    names.sort_unstable();
    logger::log_info(&format!("Parameters: {}", names.join(", ")));

    server::start_signal_handler(server.shutdown_handle());
    server.serve().await;
    Ok(())
}
