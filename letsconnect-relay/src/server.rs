use std::convert::Infallible;
use std::sync::Arc;

use warp::Filter;

use crate::config::RelayConfig;
use crate::coordinator::Coordinator;
use crate::handler::control_channel;

/// All HTTP and WebSocket routes served by the relay.
pub fn routes(
    coordinator: Arc<Coordinator>,
    config: Arc<RelayConfig>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let with_coordinator = warp::any().map(move || coordinator.clone());
    let with_config = {
        let config = config.clone();
        warp::any().map(move || config.clone())
    };

    let index = warp::path::end().and(warp::fs::file(config.static_dir.join("index.html")));
    let hello = warp::path::end().map(|| "Let's Connect relay is active");
    let assets = warp::path("static").and(warp::fs::dir(config.static_dir.clone()));
    let healthz = warp::path!("healthz").map(|| "ok");

    let stats = warp::path!("stats")
        .and(with_coordinator.clone())
        .and_then(|coordinator: Arc<Coordinator>| async move {
            Ok::<_, Infallible>(warp::reply::json(&coordinator.stats().await))
        });

    // Control channel: one socket per participant.
    let ws = warp::path!("ws")
        .and(warp::ws())
        .and(with_coordinator)
        .and(with_config)
        .map(
            |ws: warp::ws::Ws, coordinator: Arc<Coordinator>, config: Arc<RelayConfig>| {
                ws.max_message_size(config.max_message_bytes)
                    .max_frame_size(config.max_message_bytes)
                    .on_upgrade(move |socket| control_channel(socket, coordinator, config))
            },
        );

    index
        .or(hello)
        .or(healthz)
        .or(stats)
        .or(ws)
        .or(assets)
        .with(warp::cors().allow_any_origin())
        .with(warp::log("letsconnect_relay"))
}
