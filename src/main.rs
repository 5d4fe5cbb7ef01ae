use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use room_relay::server::SWEEP_PERIOD;
use room_relay::{routes, Config, Server};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    let server = Arc::new(Server::new());
    let sweeper = server.spawn_room_sweeper(SWEEP_PERIOD);

    let routes = routes::build_filters(Arc::clone(&server));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutting down");
    };

    match warp::serve(routes).try_bind_with_graceful_shutdown(config.addr(), shutdown) {
        Ok((addr, serving)) => {
            info!("Relay listening on {}", addr);
            serving.await;
        }
        Err(e) => {
            error!("Failed to bind to {}: {}", config.addr(), e);
            std::process::exit(1);
        }
    }

    sweeper.abort();
}
