use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use datasource_bridge::config::{self, ServerConfig};
use datasource_bridge::datasource::sql::install_drivers;
use datasource_bridge::resolver::SystemResolver;
use datasource_bridge::router;
use datasource_bridge::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let start_time = Instant::now();
    tracing_subscriber::fmt::init();

    install_drivers();

    let home = config::home_dir();
    let config_dir = home.join("config");
    let settings = ServerConfig::load(&config_dir.join("server.json"));

    let port = settings.server_port;
    let scan_period = settings.config_scan_period;
    let state = Arc::new(AppState::new(settings, Arc::new(SystemResolver)));

    // initial load, then rescan for changes; reload is a no-op when the
    // digests are unchanged
    let datasource_dir = config_dir.join("datasources");
    let query_dir = config_dir.join("queries");
    state.datasources.reload(&config::load_config_dir(&datasource_dir));
    state.queries.reload(&config::load_config_dir(&query_dir));

    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(scan_period.max(100)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                state.datasources.reload(&config::load_config_dir(&datasource_dir));
                state.queries.reload(&config::load_config_dir(&query_dir));
            }
        });
    }

    let app = router::build(Arc::clone(&state));

    info!("Starting web server...");
    let addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to start server: {e}");
            return Err(e.into());
        }
    };

    info!("Server http://localhost:{port} started in {} ms", start_time.elapsed().as_millis());
    axum::serve(listener, app).await?;
    Ok(())
}
