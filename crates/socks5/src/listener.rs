//! Binds one SOCKS5 listener per mapping and dispatches accepted
//! connections to the tunnel creator contract.

use std::net::SocketAddrV4;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tunnox_core::{Disposer, Mapping, Result, Socks5Command, TunnoxError};

use crate::engine::{self, REP_GENERAL_FAILURE, REP_SUCCESS};
use crate::tunnel_creator::{TunnelCreator, UdpRelayFactory};

pub struct Listener {
    mapping: Mapping,
    listen_addr: SocketAddrV4,
    disposer: Disposer,
    accept_handle: Option<JoinHandle<()>>,
}

impl Listener {
    pub async fn bind(
        mapping: Mapping,
        tunnel_creator: Arc<dyn TunnelCreator>,
        udp_relay_factory: Option<Arc<dyn UdpRelayFactory>>,
    ) -> Result<Self> {
        let addr = format!("0.0.0.0:{}", mapping.source_port);
        let tcp_listener = TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                TunnoxError::PortConflict(addr.clone())
            } else {
                TunnoxError::Network(e.to_string())
            }
        })?;

        let listen_addr = match tcp_listener.local_addr().map_err(|e| TunnoxError::Network(e.to_string()))? {
            std::net::SocketAddr::V4(v4) => v4,
            std::net::SocketAddr::V6(_) => {
                return Err(TunnoxError::Network("expected an IPv4 bind address".into()))
            }
        };

        let cancel = CancellationToken::new();
        let accept_handle = tokio::spawn(accept_loop(
            tcp_listener,
            mapping.clone(),
            tunnel_creator,
            udp_relay_factory,
            cancel.clone(),
        ));

        let disposer = Disposer::new();
        let cancel_for_close = cancel.clone();
        disposer.register(move || {
            cancel_for_close.cancel();
            Ok(())
        });

        Ok(Self {
            mapping,
            listen_addr,
            disposer,
            accept_handle: Some(accept_handle),
        })
    }

    pub fn mapping_id(&self) -> &str {
        &self.mapping.mapping_id
    }

    pub fn listen_addr(&self) -> SocketAddrV4 {
        self.listen_addr
    }

    pub async fn close(&mut self) {
        for err in self.disposer.close() {
            tracing::warn!(mapping_id = %self.mapping.mapping_id, error = %err, "listener cleanup failed");
        }
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.await;
        }
    }
}

async fn accept_loop(
    tcp_listener: TcpListener,
    mapping: Mapping,
    tunnel_creator: Arc<dyn TunnelCreator>,
    udp_relay_factory: Option<Arc<dyn UdpRelayFactory>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            accepted = tcp_listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let mapping = mapping.clone();
                        let tunnel_creator = tunnel_creator.clone();
                        let udp_relay_factory = udp_relay_factory.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(stream, mapping, tunnel_creator, udp_relay_factory).await
                            {
                                tracing::debug!(%peer, error = %e, "socks5 connection ended");
                            }
                        });
                    }
                    Err(e) => {
                        if cancel.is_cancelled() {
                            return;
                        }
                        tracing::warn!(error = %e, "socks5 accept error");
                    }
                }
            }
            _ = cancel.cancelled() => return,
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    mapping: Mapping,
    tunnel_creator: Arc<dyn TunnelCreator>,
    udp_relay_factory: Option<Arc<dyn UdpRelayFactory>>,
) -> Result<()> {
    let handshake = engine::perform_handshake(&mut stream).await?;

    match handshake.command {
        Socks5Command::Connect => {
            let on_success: crate::tunnel_creator::OnSuccess = Box::new(|stream| {
                Box::pin(async move { engine::write_reply(stream, REP_SUCCESS, None).await })
            });

            let result = tunnel_creator
                .create_tcp_tunnel(
                    &mut stream,
                    &mapping.mapping_id,
                    &mapping.egress_client_id,
                    &handshake.target_host,
                    handshake.target_port,
                    &mapping.mapping_secret_key,
                    on_success,
                )
                .await;

            if let Err(e) = result {
                let _ = engine::write_reply(&mut stream, REP_GENERAL_FAILURE, None).await;
                return Err(e);
            }
            Ok(())
        }
        Socks5Command::UdpAssociate => {
            let Some(factory) = udp_relay_factory else {
                let _ = engine::write_reply(&mut stream, REP_GENERAL_FAILURE, None).await;
                return Err(TunnoxError::NotConfigured("no udp relay factory configured".into()));
            };

            let on_success: crate::tunnel_creator::OnUdpSuccess = Box::new(|stream, bound| {
                Box::pin(async move {
                    let bound_v4 = match bound {
                        std::net::SocketAddr::V4(v4) => Some(v4),
                        std::net::SocketAddr::V6(_) => None,
                    };
                    engine::write_reply(stream, REP_SUCCESS, bound_v4).await
                })
            });

            factory
                .create_udp_relay(
                    stream,
                    mapping.mapping_id.clone(),
                    mapping.egress_client_id.clone(),
                    mapping.mapping_secret_key.clone(),
                    on_success,
                )
                .await
        }
    }
}
