use gateway_server::config::settings::Settings;
use gateway_server::secrets::{FileSecretStore, SERVICE_NAME};
use gateway_server::supervisor::{shutdown_signal, Supervisor};
use std::path::Path;

#[tokio::main]
async fn main() {
    let config_path = Path::new("config.json");
    let settings = match Settings::load(config_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("FATAL: failed to load {config_path:?}: {e}");
            std::process::exit(1);
        }
    };

    gateway_server::logging::init_logging(None, settings.log_level.as_deref());

    tracing::info!(gateway_name = %settings.gateway_name, "gateway starting");

    let secrets = FileSecretStore::new(format!("{SERVICE_NAME}.secrets"));

    let supervisor = match Supervisor::bootstrap(settings, &secrets).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "FATAL: startup failed");
            std::process::exit(1);
        }
    };

    let shutdown = shutdown_signal();
    match supervisor.run(shutdown).await {
        Ok(()) => {
            tracing::info!("gateway stopped");
        }
        Err(e) => {
            tracing::error!(error = %e, "FATAL: supervisor exited with a fatal error");
            std::process::exit(1);
        }
    }
}
