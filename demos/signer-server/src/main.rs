//! Demo server exposing the signer session manager over a websocket.
//!
//! Run with: cargo run -p signer-server-demo
//!
//! Then open http://localhost:3000 in your browser. Both device families
//! are backed by the mock transport. Set `HW_SIGNER_CONFIG` to a JSON
//! config file to override the defaults.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{Router, response::Html, routing::get};
use hw_signer_core::{DeviceType, MockTransport, SignerConfig, WatchFeatureGate};
use hw_signer_session::{SessionManager, storage::FilePreferences};
use hw_signer_transport::websocket::create_ws_router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match std::env::var_os("HW_SIGNER_CONFIG") {
        Some(path) => SignerConfig::load(&path)
            .await
            .with_context(|| format!("loading config from {}", path.to_string_lossy()))?,
        None => SignerConfig::default(),
    };

    let preferences = FilePreferences::new(config.preferences_path());
    tracing::info!(path = %preferences.path().display(), "Using preference file");

    let gate = WatchFeatureGate::new(config.features);
    let manager = SessionManager::new(preferences, gate, config)
        .with_transport(
            DeviceType::Ledger,
            Arc::new(MockTransport::new(DeviceType::Ledger)),
        )
        .with_transport(
            DeviceType::Trezor,
            Arc::new(MockTransport::new(DeviceType::Trezor)),
        );
    let restored = manager.restore().await;
    tracing::info!(
        preferred_network = %restored.preferred_network,
        last_connected = ?restored.last_connected_type,
        "Signer preferences restored"
    );

    // Build router
    let app = Router::new()
        .route("/", get(index_handler))
        .merge(create_ws_router(Arc::new(manager)))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Hardware Signer Console</title>
    <style>
        body { margin: 0; padding: 20px; background: #1e1e1e; color: #ddd; font-family: system-ui, sans-serif; }
        h1 { color: #fff; margin-bottom: 10px; }
        button { margin: 2px; }
        #log { white-space: pre-wrap; font-family: monospace; font-size: 13px; margin-top: 12px; }
        .status { color: #888; font-size: 14px; margin-bottom: 10px; }
    </style>
</head>
<body>
    <h1>Hardware Signer Console</h1>
    <div class="status" id="status">Connecting...</div>
    <div>
        <button data-msg='{"type":"connect","device":"ledger"}'>Connect Ledger</button>
        <button data-msg='{"type":"connect","device":"trezor"}'>Connect Trezor</button>
        <button data-msg='{"type":"disconnect","device":"ledger"}'>Disconnect Ledger</button>
        <button data-msg='{"type":"disconnect","device":"trezor"}'>Disconnect Trezor</button>
        <button data-msg='{"type":"list_addresses","count":3,"network":"btc"}'>BTC addresses</button>
        <button data-msg='{"type":"list_addresses","count":3,"network":"eth"}'>ETH addresses</button>
        <button data-msg='{"type":"sign_message","network":"eth","payload":"aGVsbG8="}'>Sign "hello"</button>
        <button data-msg='{"type":"status"}'>Status</button>
    </div>
    <div id="log"></div>

    <script>
        const status = document.getElementById('status');
        const log = document.getElementById('log');
        const ws = new WebSocket(`ws://${location.host}/ws`);

        ws.onopen = () => { status.textContent = 'Connected'; };
        ws.onclose = () => { status.textContent = 'Disconnected'; };
        ws.onmessage = (event) => {
            log.textContent = event.data + '\n' + log.textContent;
        };

        document.querySelectorAll('button[data-msg]').forEach((button) => {
            button.addEventListener('click', () => ws.send(button.dataset.msg));
        });
    </script>
</body>
</html>
"#;
