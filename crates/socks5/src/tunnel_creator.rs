//! The contract the SOCKS5 engine drives to actually reach the egress
//! side: one call per TCP CONNECT, one call per UDP destination.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tunnox_core::Result;

pub type SuccessFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Invoked by the tunnel creator once the egress side has confirmed
/// the upstream connection. Writes the SOCKS5 success reply onto the
/// same stream the creator is about to relay over.
pub type OnSuccess = Box<dyn FnOnce(&mut TcpStream) -> SuccessFuture + Send>;

/// Invoked by the UDP relay factory once its UDP socket is bound.
/// Writes the SOCKS5 success reply (carrying the bound address) onto
/// the control TCP connection the factory is about to keep open.
pub type OnUdpSuccess = Box<dyn FnOnce(&mut TcpStream, SocketAddr) -> SuccessFuture + Send>;

#[async_trait]
pub trait TunnelCreator: Send + Sync {
    async fn create_tcp_tunnel(
        &self,
        stream: &mut TcpStream,
        mapping_id: &str,
        egress_client_id: &str,
        host: &str,
        port: u16,
        secret_key: &str,
        on_success: OnSuccess,
    ) -> Result<()>;

    async fn create_udp_tunnel(
        &self,
        mapping_id: &str,
        egress_client_id: &str,
        host: &str,
        port: u16,
        secret_key: &str,
    ) -> Result<Box<dyn UdpTunnelConn>>;
}

#[async_trait]
pub trait UdpTunnelConn: Send + Sync {
    async fn send_packet(&self, data: &[u8]) -> Result<()>;
    async fn receive_packet(&self) -> Result<Vec<u8>>;
    async fn close(&self) -> Result<()>;
}

/// Constructs the full UDP relay for one SOCKS5 UDP ASSOCIATE session.
/// Takes ownership of the control TCP connection for the relay's
/// lifetime, so it (not the engine) writes the success reply via
/// `on_success` once its UDP socket is bound. On error it owns the
/// connection and is responsible for notifying the peer (e.g. a
/// general-failure reply) before dropping it.
#[async_trait]
pub trait UdpRelayFactory: Send + Sync {
    async fn create_udp_relay(
        &self,
        control_tcp: TcpStream,
        mapping_id: String,
        egress_client_id: String,
        secret_key: String,
        on_success: OnUdpSuccess,
    ) -> Result<()>;
}
