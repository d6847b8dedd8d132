//! catalog-auth HTTP service entry point.
//!
//! # Purpose
//! Wires configuration, storage, the Google identity bridge, and the HTTP
//! router, then serves the API and the metrics endpoint until ctrl-c.
use anyhow::Context;
use catalog_auth::app::{AppState, StateSettings, build_router, build_state};
use catalog_auth::auth::oidc::{GoogleBridgeConfig, GoogleIdentityBridge, IdentityVerifier};
use catalog_auth::auth::session::SessionConfig;
use catalog_auth::config::{AuthServiceConfig, StorageBackend};
use catalog_auth::observability;
use catalog_auth::store::{memory::InMemoryStore, postgres::PostgresStore};
use std::future::Future;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AuthServiceConfig::from_env_or_yaml().context("catalog-auth config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: AuthServiceConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("catalog-auth")?;
    let state = connect_state(&config).await?;
    tracing::info!(
        backend = state.store.backend_name(),
        durable = state.store.is_durable(),
        admin_enabled = state.admin_token.is_some(),
        "storage ready"
    );
    if !state.store.is_durable() {
        tracing::warn!("in-memory storage: sessions and signing keys are lost on restart");
    }

    let (metrics_stop_tx, metrics_stop_rx) = tokio::sync::oneshot::channel::<()>();
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
        async move {
            let _ = metrics_stop_rx.await;
        },
    ));

    let app = build_router(state);
    let addr = config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "catalog-auth listening");
    tokio::pin!(shutdown);
    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result?;
        }
        _ = &mut shutdown => {
            tracing::info!("shutdown requested");
        }
    }

    let _ = metrics_stop_tx.send(());
    match metrics_task.await {
        Ok(Err(err)) => tracing::warn!(error = %err, "metrics endpoint failed"),
        Err(err) => tracing::warn!(error = %err, "metrics task aborted"),
        Ok(Ok(())) => {}
    }
    Ok(())
}

async fn connect_state(config: &AuthServiceConfig) -> anyhow::Result<AppState> {
    let identity: Arc<dyn IdentityVerifier> = Arc::new(GoogleIdentityBridge::new(
        GoogleBridgeConfig::new(&config.google.jwks_url, config.google.clock_skew_seconds),
    ));
    let settings = StateSettings {
        session: SessionConfig {
            identity_audiences: config.google.client_ids.clone(),
            allowed_audiences: config.allowed_audiences.clone(),
        },
        default_audience: config.default_audience.clone(),
        admin_token: config.admin_token.clone(),
    };
    let state = match config.storage {
        StorageBackend::Memory => build_state(Arc::new(InMemoryStore::new()), identity, settings),
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .context("postgres configuration missing")?;
            let store = PostgresStore::connect(pg)
                .await
                .context("connect to postgres")?;
            build_state(Arc::new(store), identity, settings)
        }
    };
    Ok(state)
}
