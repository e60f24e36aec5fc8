use std::net::IpAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use mockyard::server::MockServer;
use mockyard::store::SessionStore;

/// CLI configuration (spec §6 "External Interfaces" ambient startup
/// knobs). `history_limit` isn't named by the spec itself — it's an
/// ambient operational knob, not a matching/dispatch feature.
#[derive(Debug, Parser)]
#[command(name = "mockyard", about = "An in-process HTTP mock server for test harnesses and CI")]
struct Config {
    /// Address to bind the mock-serving and admin HTTP surface to.
    #[arg(long, env = "MOCKYARD_BIND", default_value = "127.0.0.1")]
    bind_address: IpAddr,

    /// Port to listen on; 0 picks any free port.
    #[arg(long, env = "MOCKYARD_PORT", default_value_t = 0)]
    port: u16,

    /// Bind 0.0.0.0 regardless of `--bind-address`, for use from containers/CI runners.
    #[arg(long, env = "MOCKYARD_EXPOSE", default_value_t = false)]
    expose: bool,

    /// Caps retained history entries per session; unset means unlimited.
    #[arg(long, env = "MOCKYARD_HISTORY_LIMIT")]
    history_limit: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let bind_address = if config.expose { "0.0.0.0".parse().unwrap() } else { config.bind_address };
    let store = Arc::new(SessionStore::with_history_limit(config.history_limit));
    let server = MockServer::new(store, bind_address, config.port);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    match server.run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "fatal server error");
            ExitCode::FAILURE
        }
    }
}
