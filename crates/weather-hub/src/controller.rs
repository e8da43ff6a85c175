//! Orchestration of host-driven operations: reconfiguration, profile
//! regeneration, query and discover.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::StationConfig;
use crate::host::HostCommand;
use crate::mapping::ProfileTables;
use crate::profile::ProfileWriter;
use crate::state::SharedState;

#[derive(Clone)]
pub struct Controller {
    shared: SharedState,
    profile: ProfileWriter,
    /// Held from mapping change to profile write, so the file on disk always
    /// matches the last mapping applied.
    publishing: Arc<Mutex<()>>,
}

impl Controller {
    pub fn new(shared: SharedState, profile: ProfileWriter) -> Self {
        Self {
            shared,
            profile,
            publishing: Arc::new(Mutex::new(())),
        }
    }

    /// Apply a configuration. Returns false when nothing changed.
    ///
    /// The mapping and node rebuild happen under the write lock; the profile
    /// is written after the lock is released.
    pub async fn reconfigure(&self, config: &StationConfig) -> bool {
        let _publishing = self.publishing.lock().await;
        let tables = {
            let mut st = self.shared.write().await;
            st.apply_config(config)
        };

        match tables {
            Some(tables) => {
                self.publish_profile(&tables).await;
                true
            }
            None => false,
        }
    }

    /// Regenerate the profile from the current mapping.
    pub async fn update_profile(&self) {
        let _publishing = self.publishing.lock().await;
        let tables = self.shared.read().await.mapping().profile_tables();
        self.publish_profile(&tables).await;
    }

    pub async fn query(&self) {
        self.shared.read().await.query();
    }

    pub async fn discover(&self) {
        self.shared.read().await.discover();
    }

    pub async fn handle_command(&self, command: HostCommand) {
        info!(?command, "host command");
        match command {
            HostCommand::Query => self.query().await,
            HostCommand::Discover => self.discover().await,
            HostCommand::UpdateProfile => self.update_profile().await,
            HostCommand::RemoveNoticesAll => self.shared.read().await.host().clear_notices(),
        }
        self.shared
            .write()
            .await
            .record_system(format!("host command {command:?}"));
    }

    pub async fn set_host_connected(&self, connected: bool) {
        let mut st = self.shared.write().await;
        if st.host_connected != connected {
            st.host_connected = connected;
            st.record_system(format!(
                "host link {}",
                if connected { "connected" } else { "disconnected" }
            ));
        }
    }

    async fn publish_profile(&self, tables: &ProfileTables) {
        match self.profile.write(tables) {
            Ok(_) => self.shared.read().await.host().install_profile(),
            Err(e) => {
                error!(dir = %self.profile.dir().display(), "profile not written: {e}");
                self.shared
                    .write()
                    .await
                    .record_error(format!("profile: {e}"));
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
