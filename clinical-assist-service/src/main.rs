use anyhow::Context as _;
use clinical_assist_service::{ServiceConfig, create_app};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Structured JSON logs unless `LOG_FORMAT=pretty`.
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "clinical_assist=debug,clinical_assist_service=debug,tower_http=debug".into()
    });

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServiceConfig::from_env();
    info!(config = ?config.client, "Configuration loaded");

    let app = create_app(&config.client);
    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    let addr = listener.local_addr()?;

    info!("Clinical Assist Service listening on {}", addr);
    info!("Analysis endpoint: POST http://{}/analyze", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
