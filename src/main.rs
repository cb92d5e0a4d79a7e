mod apcaccess;
mod config;
mod dispatch;
mod frame;
mod hub;
mod metrics;
mod status;

use actix_web::middleware::Compress;
use actix_web::{web, App, HttpServer};
use log::{debug, info};

use crate::config::Config;
use crate::dispatch::AppState;
use crate::hub::HubClient;
use crate::metrics::Metrics;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let config = Config::from_env();
    debug!("Loaded configuration: {:?}", config);

    let hub = HubClient::new(config.hub_url(), config.push_timeout)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    info!(
        "Bridging apcupsd at {}:{} to hub at {}",
        config.apcupsd_host,
        config.apcupsd_port,
        hub.url()
    );

    let port_bind = config.listen_port;
    let state = web::Data::new(AppState {
        config,
        hub,
        metrics: Metrics::default(),
    });

    debug!("Starting HTTP server on 0.0.0.0:{}", port_bind);
    HttpServer::new(move || {
        App::new()
            .wrap(Compress::default())
            .app_data(state.clone())
            .configure(dispatch::configure)
    })
    .bind(("0.0.0.0", port_bind))?
    .run()
    .await
}
