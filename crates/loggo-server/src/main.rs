//! `loggo-server` binary: loads configuration, prepares the database,
//! starts the MQTT broker and serves the HTTP API until SIGINT or SIGTERM.

use loggo_db::{DbPool, DbRuntimeSettings};
use loggo_server::config::{Config, ConfigSource, LoggingConfig};
use loggo_server::publish::EventPublisher;
use loggo_server::{app, config, mqtt, retention, seed_channels, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// First CLI argument, then `LOGGO_CONFIG_PATH`, then `config.toml`.
fn config_path() -> (String, &'static str) {
    let non_blank = |value: &String| !value.trim().is_empty();
    if let Some(path) = std::env::args().nth(1).filter(non_blank) {
        (path, "argument")
    } else if let Some(path) = std::env::var("LOGGO_CONFIG_PATH").ok().filter(non_blank) {
        (path, "LOGGO_CONFIG_PATH")
    } else {
        (DEFAULT_CONFIG_PATH.to_string(), "default")
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|err| {
        eprintln!("invalid log filter {:?} ({err}), using \"info\"", logging.level);
        EnvFilter::new("info")
    });
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Opens the pool, migrates the schema and creates configured channels.
fn open_database(config: &Config) -> DbPool {
    let settings = DbRuntimeSettings {
        busy_timeout_ms: config.database.busy_timeout_ms,
        pool_max_size: config.database.pool_max_size,
    };
    let pool = loggo_db::create_pool(&config.database.path, settings)
        .expect("failed to open database, check database.path");

    let conn = pool.get().expect("no database connection available at startup");
    let migrated = loggo_db::run_migrations(&conn).expect("database migration failed");
    let seeded = seed_channels(&conn, &config.channels).expect("failed to seed channels");
    tracing::info!(
        path = %config.database.path,
        migrated,
        seeded,
        "database ready"
    );
    pool
}

#[tokio::main]
async fn main() {
    let (path, origin) = config_path();
    let (config, source) =
        config::load_config(Some(path.as_str())).expect("could not load configuration");
    init_tracing(&config.logging);
    match source {
        ConfigSource::File => tracing::info!(%path, origin, "configuration loaded"),
        ConfigSource::Defaults => {
            tracing::info!(%path, origin, "config file not found, using defaults")
        }
    }

    let tz = config
        .validate()
        .expect("invalid configuration, check timezone and retention settings");

    let pool = open_database(&config);

    tokio::spawn(retention::start_retention_task(
        pool.clone(),
        config.retention.default_ttl.clone(),
        config.retention.interval_seconds,
        tz,
    ));

    let broker = config.mqtt.enabled.then(|| {
        let listen = config.mqtt.listen_addr(config.server.host);
        mqtt::start_broker(listen, config.mqtt.max_payload_size)
            .unwrap_or_else(|err| panic!("cannot start mqtt broker on {listen}: {err}"))
    });
    if broker.is_none() {
        tracing::info!("mqtt broker disabled");
    }

    let base_url = config.server.public_base_url();
    let (extra, inbox) = match broker {
        Some(link) => {
            let publisher: Arc<dyn EventPublisher> = link.publisher;
            (vec![publisher], Some(link.inbox))
        }
        None => (Vec::new(), None),
    };
    let state = AppState::with_publishers(pool, base_url.clone(), config.publish.capacity, extra);
    if let Some(inbox) = inbox {
        tokio::spawn(mqtt::run_ingest_loop(inbox, state.pipeline.clone()));
    }

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = TcpListener::bind(addr)
        .await
        .unwrap_or_else(|err| panic!("cannot listen on {addr}: {err}"));

    tracing::info!(%addr, %base_url, timezone = %tz, "loggo server listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .expect("http server terminated with an error");

    tracing::info!("loggo server stopped");
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("cannot install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!(signal = "SIGINT", "shutting down"),
            _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(signal = "ctrl-c", "shutting down");
    }
}
