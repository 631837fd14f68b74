use std::sync::Arc;
use tracing::info;

use stock_pilot::{load_pilot_config, server, AppState};

fn parse_port_from_args() -> Option<u16> {
    let mut args = std::env::args().peekable();
    while let Some(a) = args.next() {
        if a == "--port" {
            if let Some(v) = args.next() {
                if let Ok(p) = v.parse::<u16>() {
                    return Some(p);
                }
            }
        } else if let Some(rest) = a.strip_prefix("--port=") {
            if let Ok(p) = rest.parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

fn port_from_env() -> Option<u16> {
    for k in ["STOCK_PILOT_PORT", "PORT"] {
        if let Ok(v) = std::env::var(k) {
            if let Ok(p) = v.trim().parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Starting stock-pilot control server");

    let config = load_pilot_config();
    if config.validate_credentials().is_err() {
        tracing::warn!(
            "portal credentials not configured - interactive runs will be rejected until they are"
        );
    }
    let state = Arc::new(AppState::new(config));

    let app = server::router(state.clone());

    // Start server
    let port: u16 = parse_port_from_args().or_else(port_from_env).unwrap_or(5000);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Address already in use: {}. Stop the existing process or run with --port {} (or set PORT/STOCK_PILOT_PORT).",
                bind_addr,
                port.saturating_add(1)
            )
        }
        Err(e) => return Err(e.into()),
    };
    info!("stock-pilot listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();
        let mut sigint = signal(SignalKind::interrupt()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
            _ = async {
                if let Some(ref mut s) = sigint {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    // Let the active run wind down cooperatively; session teardown is the
    // run task's own responsibility.
    state.controller.stop_active();
}
