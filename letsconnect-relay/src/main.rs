use std::sync::Arc;

use anyhow::Context;

use letsconnect_relay::{routes, Coordinator, RelayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = RelayConfig::from_env().context("loading relay configuration")?;
    let listen = config.listen;
    if !config.static_dir.is_dir() {
        log::warn!(
            "static directory {} not found; serving the API only",
            config.static_dir.display()
        );
    }

    let coordinator = Arc::new(Coordinator::new());
    let routes = routes(coordinator, Arc::new(config));

    log::info!("letsconnect-relay listening on {}", listen);
    warp::serve(routes).run(listen).await;
    Ok(())
}
