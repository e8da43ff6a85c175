//! Link to the host automation controller.
//!
//! The station never talks to the host directly: it queues [`HostEvent`]s on
//! an unbounded channel and a bridge task forwards them over MQTT. Commands
//! and configuration from the host come back in on the main event loop.

use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error};

// ---------------------------------------------------------------------------
// Outbound events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverValue {
    pub driver: String,
    pub value: f64,
    pub uom: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    AddNode {
        address: String,
        name: String,
        nodedef: String,
        drivers: Vec<DriverValue>,
    },
    RemoveNode {
        address: String,
    },
    Report {
        address: String,
        driver: String,
        value: f64,
        uom: u16,
    },
    Notice {
        text: String,
    },
    ClearNotices,
    InstallProfile,
}

impl HostEvent {
    /// Topic suffix the event is published under.
    pub fn topic(&self) -> String {
        match self {
            Self::AddNode { address, .. } => format!("node/{address}/add"),
            Self::RemoveNode { address } => format!("node/{address}/remove"),
            Self::Report {
                address, driver, ..
            } => format!("node/{address}/{driver}"),
            Self::Notice { .. } | Self::ClearNotices => "notice".to_string(),
            Self::InstallProfile => "profile/install".to_string(),
        }
    }
}

/// Cheap, cloneable handle for queuing events toward the host.
#[derive(Debug, Clone)]
pub struct HostLink {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl HostLink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, event: HostEvent) {
        if self.tx.send(event).is_err() {
            debug!("host bridge gone, dropping event");
        }
    }

    pub fn notice(&self, text: impl Into<String>) {
        self.send(HostEvent::Notice { text: text.into() });
    }

    pub fn clear_notices(&self) {
        self.send(HostEvent::ClearNotices);
    }

    pub fn install_profile(&self) {
        self.send(HostEvent::InstallProfile);
    }
}

/// Forward queued events to the broker until the channel closes.
pub async fn forward(
    client: AsyncClient,
    prefix: String,
    mut rx: mpsc::UnboundedReceiver<HostEvent>,
) {
    while let Some(event) = rx.recv().await {
        let topic = format!("{prefix}/{}", event.topic());
        let payload = match serde_json::to_vec(&event) {
            Ok(p) => p,
            Err(e) => {
                error!(%topic, "host event serialization failed: {e}");
                continue;
            }
        };

        if let Err(e) = client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
            error!(%topic, "host publish failed: {e}");
        }
    }
    debug!("host event channel closed");
}

// ---------------------------------------------------------------------------
// Inbound commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    Query,
    Discover,
    UpdateProfile,
    RemoveNoticesAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic {
    Command,
    Config,
}

/// Classify "<prefix>/cmd" and "<prefix>/config".
pub fn classify_topic(topic: &str, prefix: &str) -> Option<InboundTopic> {
    match topic.strip_prefix(prefix)?.strip_prefix('/')? {
        "cmd" => Some(InboundTopic::Command),
        "config" => Some(InboundTopic::Config),
        _ => None,
    }
}

/// Parse a host command payload (case-insensitive, trims whitespace).
pub fn parse_command(payload: &[u8]) -> Result<HostCommand, String> {
    let s = String::from_utf8_lossy(payload).trim().to_uppercase();
    match s.as_str() {
        "QUERY" => Ok(HostCommand::Query),
        "DISCOVER" => Ok(HostCommand::Discover),
        "UPDATE_PROFILE" => Ok(HostCommand::UpdateProfile),
        "REMOVE_NOTICES_ALL" => Ok(HostCommand::RemoveNoticesAll),
        _ => Err(format!("unknown host command '{s}'")),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
