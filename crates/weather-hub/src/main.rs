mod config;
mod controller;
mod error;
mod host;
mod ingest;
mod mapping;
mod profile;
mod rain;
mod state;
mod trend;
mod units;
mod web;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use tokio::sync::{watch, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use config::StationConfig;
use controller::Controller;
use host::{HostLink, InboundTopic};
use profile::ProfileWriter;
use state::Station;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let prefix = env::var("MQTT_PREFIX").unwrap_or_else(|_| "weatherpoly".to_string());
    let profile_dir = env::var("PROFILE_DIR").unwrap_or_else(|_| "profile".to_string());
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

    // ── Station config ──────────────────────────────────────────────
    let cfg = match config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("{e:#}; starting with default settings and no mappings");
            StationConfig::default()
        }
    };

    // ── Shared state ────────────────────────────────────────────────
    let (host, host_rx) = HostLink::channel();
    let shared = Arc::new(RwLock::new(Station::new(host)));
    shared
        .write()
        .await
        .record_system("station started".to_string());

    let controller = Controller::new(Arc::clone(&shared), ProfileWriter::new(&profile_dir));
    controller.reconfigure(&cfg).await;

    // ── Ingestion listener ──────────────────────────────────────────
    // The port is only read at startup; changing it needs a restart.
    let listen_port = shared.read().await.settings().port;
    let (stop_tx, stop_rx) = watch::channel(false);
    let web_state = Arc::clone(&shared);
    let web_task = tokio::spawn(async move {
        if let Err(e) = web::serve(Arc::clone(&web_state), listen_port, stop_rx).await {
            error!(error = ?e, "{e}; vendor pushes will not be received");
            let mut st = web_state.write().await;
            st.host().notice(format!("{e}"));
            st.record_error(e.to_string());
        }
    });

    // ── MQTT host link ──────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new("weather-hub", broker.as_str(), mqtt_port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);
    tokio::spawn(host::forward(client.clone(), prefix.clone(), host_rx));

    // ── Config reload on SIGHUP ─────────────────────────────────────
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = signal(SignalKind::hangup())?;
        let reload_ctl = controller.clone();
        let reload_path = config_path.clone();
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                info!(path = %reload_path, "SIGHUP, reloading config");
                match config::load(&reload_path) {
                    Ok(cfg) => {
                        if !reload_ctl.reconfigure(&cfg).await {
                            info!("config unchanged");
                        }
                    }
                    Err(e) => error!("config reload failed: {e:#}"),
                }
            }
        });
    }

    info!(
        broker = %broker,
        port = mqtt_port,
        prefix = %prefix,
        profile_dir = %profile_dir,
        "connecting to host broker"
    );

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                match host::classify_topic(&p.topic, &prefix) {
                    Some(InboundTopic::Command) => match host::parse_command(&p.payload) {
                        Ok(command) => controller.handle_command(command).await,
                        Err(msg) => {
                            warn!("{msg}");
                            shared.write().await.record_error(msg);
                        }
                    },
                    Some(InboundTopic::Config) => match StationConfig::from_json(&p.payload) {
                        Ok(cfg) => {
                            info!(params = cfg.len(), "config pushed by host");
                            controller.reconfigure(&cfg).await;
                        }
                        Err(e) => {
                            warn!("bad config push: {e:#}");
                            shared
                                .write()
                                .await
                                .record_error(format!("bad config push: {e}"));
                        }
                    },
                    None => debug!(topic = %p.topic, "unhandled topic"),
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("host link connected");
                for suffix in ["cmd", "config"] {
                    let topic = format!("{prefix}/{suffix}");
                    if let Err(e) = client.subscribe(topic.as_str(), QoS::AtLeastOnce).await {
                        error!(%topic, "subscribe failed: {e}");
                    }
                }
                controller.set_host_connected(true).await;
                controller.discover().await;
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("host link disconnected");
                controller.set_host_connected(false).await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                controller.set_host_connected(false).await;
                sleep(Duration::from_secs(2)).await;
            }
        }
    }

    let _ = stop_tx.send(true);
    let _ = web_task.await;
    info!("station stopped");
    Ok(())
}
