use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use chartify_rs::config::{load_config, AppConfig};
use chartify_rs::observability::init_tracing;
use chartify_rs::routing::dispatch::dispatch_request;
use chartify_rs::state::AppState;
use chartify_rs::upstream::UpstreamClient;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;

fn main() {
    let config = load_config("config.yaml").unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    runtime.block_on(async move {
        run(config).await;
    });
}

async fn run(config: AppConfig) {
    let host = config.server.host.clone();
    let port = config.server.port;

    let upstream = UpstreamClient::new(&config.server, config.upstream.clone()).unwrap_or_else(
        |e| {
            eprintln!("Failed to build upstream client: {e}");
            std::process::exit(1);
        },
    );
    let state = Arc::new(AppState::new(config, upstream));

    tracing::info!(
        "chartify-rs starting on {}:{} (model '{}')",
        host,
        port,
        state.config.upstream.model
    );

    let listener = match tokio::net::TcpListener::bind(format!("{host}:{port}")).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("Failed to bind to {host}:{port}: {err}");
            std::process::exit(1);
        }
    };

    tracing::info!("chartify-rs is ready to accept connections");
    serve_accept_loop(listener, state).await;
}

async fn serve_accept_loop(listener: tokio::net::TcpListener, state: Arc<AppState>) {
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok((stream, remote_addr)) => (stream, remote_addr),
            Err(err) => {
                eprintln!("Accept error: {err}");
                continue;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!("failed to enable TCP_NODELAY for {remote_addr}: {err}");
        }

        let io = TokioIo::new(stream);
        let request_state = Arc::clone(&state);
        let hyper_service = service_fn(move |request: Request<Incoming>| {
            dispatch_request(Arc::clone(&request_state), request.map(Body::new))
        });

        tokio::spawn(async move {
            if let Err(err) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, hyper_service)
                .await
            {
                tracing::debug!("failed to serve connection from {remote_addr}: {err:#}");
            }
        });
    }
}
