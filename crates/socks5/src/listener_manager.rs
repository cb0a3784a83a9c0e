//! Owns the set of active listeners, one per mapping.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tunnox_core::{Mapping, MappingProtocol, Result};

use crate::listener::Listener;
use crate::tunnel_creator::{TunnelCreator, UdpRelayFactory};

pub struct ListenerManager {
    local_client_id: String,
    tunnel_creator: Arc<dyn TunnelCreator>,
    udp_relay_factory: Option<Arc<dyn UdpRelayFactory>>,
    listeners: Mutex<HashMap<String, Listener>>,
}

impl ListenerManager {
    pub fn new(
        local_client_id: impl Into<String>,
        tunnel_creator: Arc<dyn TunnelCreator>,
        udp_relay_factory: Option<Arc<dyn UdpRelayFactory>>,
    ) -> Self {
        Self {
            local_client_id: local_client_id.into(),
            tunnel_creator,
            udp_relay_factory,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// No-op when the mapping isn't SOCKS5, isn't addressed to this
    /// client, or a listener for it already exists.
    pub async fn add(&self, mapping: Mapping) -> Result<()> {
        if !matches!(mapping.protocol, MappingProtocol::Socks5) {
            return Ok(());
        }
        if mapping.listen_client_id != self.local_client_id {
            return Ok(());
        }

        let mut listeners = self.listeners.lock().await;
        if listeners.contains_key(&mapping.mapping_id) {
            return Ok(());
        }

        let listener = Listener::bind(
            mapping.clone(),
            self.tunnel_creator.clone(),
            self.udp_relay_factory.clone(),
        )
        .await?;
        listeners.insert(mapping.mapping_id, listener);
        Ok(())
    }

    pub async fn remove(&self, mapping_id: &str) {
        if let Some(mut listener) = self.listeners.lock().await.remove(mapping_id) {
            listener.close().await;
        }
    }

    pub async fn get_listen_addr(&self, mapping_id: &str) -> Option<std::net::SocketAddrV4> {
        self.listeners
            .lock()
            .await
            .get(mapping_id)
            .map(|l| l.listen_addr())
    }

    pub async fn list(&self) -> Vec<String> {
        self.listeners.lock().await.keys().cloned().collect()
    }
}
