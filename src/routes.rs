use std::convert::Infallible;
use std::sync::Arc;

use serde::Deserialize;
use warp::{Filter, Rejection, Reply};

use crate::messages::UserId;
use crate::server::Server;

/// Set by the upstream identity check before the upgrade reaches us.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub user_id: Option<UserId>,
}

fn with_server(server: Arc<Server>) -> impl Filter<Extract = (Arc<Server>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&server))
}

// GET /ws?userId=... -> websocket session
pub fn ws_route(server: Arc<Server>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::query::<ConnectParams>())
        .and(with_server(server))
        .map(|ws: warp::ws::Ws, params: ConnectParams, server: Arc<Server>| {
            let user_id = params.user_id.filter(|u| !u.is_empty());
            ws.on_upgrade(move |socket| server.handle_connection(socket, user_id))
        })
}

// GET /health -> "ok"
pub fn health_route() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("health").and(warp::path::end()).map(|| "ok")
}

pub fn build_filters(server: Arc<Server>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    ws_route(server)
        .or(health_route())
        .with(warp::log("room_relay::http"))
}
