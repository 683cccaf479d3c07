use std::sync::Arc;

use gateway::config::Config;
use gateway::demux::Demultiplexer;
use gateway::dispatcher::Dispatcher;
use gateway::http::{build_router, AppState};
use gateway::resolver::Resolver;
use gateway::shared::Shared;
use gateway::terminator::Terminator;
use gateway::transport::AmqpBrokerTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gateway=info,tower_http=info")),
        )
        .init();

    let config = Config::load()?;
    tracing::info!(bind = %config.http_bind_addr, broker = %config.broker_url, "starting gateway");

    let transport = Arc::new(
        AmqpBrokerTransport::connect(
            &config.broker_url,
            &config.request_exchange,
            &config.gateway_exchange,
        )
        .await?,
    );

    let shared = Arc::new(Shared::new());
    let dispatcher = Arc::new(Dispatcher::new(shared.clone(), transport.clone()));
    let resolver = Arc::new(Resolver::new(
        shared.clone(),
        transport.clone(),
        config.resolver_max_depth,
    ));
    let demux = Arc::new(Demultiplexer::new(shared.clone(), resolver.clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // The inbox consume loop runs for the process lifetime; per §5, broker
    // channels close last, after the HTTP listener and the final sweep.
    let consume_transport = transport.clone();
    let frame_handler = demux.into_frame_handler();
    tokio::spawn(async move {
        if let Err(err) = consume_transport.consume(frame_handler).await {
            tracing::error!(%err, "broker consume loop exited");
        }
    });

    let terminator = Terminator::new(shared.clone(), config.request_deadline_ms, config.sweep_interval_ms);
    tokio::spawn(terminator.run(shutdown_rx));

    let app_state = AppState {
        shared,
        dispatcher,
        resolver,
    };
    let app = build_router(app_state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.http_bind_addr).await?;
    tracing::info!(addr = %config.http_bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}
