//! Minimal direct-dial `TunnelCreator`: opens the final TCP/UDP
//! connection to the target itself rather than handing off to a
//! server fleet. The wire protocol that would carry a session to a
//! remote egress node is out of scope here; this is the local stand-in
//! that lets the SOCKS5 engine and UDP relay run end to end.

use async_trait::async_trait;
use tokio::io::copy_bidirectional;
use tokio::net::{TcpStream, UdpSocket};
use tunnox_core::{Result, TunnoxError, UDP_MAX_PACKET};
use tunnox_socks5::{OnSuccess, TunnelCreator, UdpTunnelConn};

pub struct DirectTunnelCreator;

#[async_trait]
impl TunnelCreator for DirectTunnelCreator {
    async fn create_tcp_tunnel(
        &self,
        stream: &mut TcpStream,
        mapping_id: &str,
        _egress_client_id: &str,
        host: &str,
        port: u16,
        _secret_key: &str,
        on_success: OnSuccess,
    ) -> Result<()> {
        let addr = format!("{host}:{port}");
        let mut upstream = TcpStream::connect(&addr)
            .await
            .map_err(|e| TunnoxError::Network(format!("connect to {addr}: {e}")))?;

        on_success(stream).await?;

        tracing::debug!(mapping_id, %addr, "tcp tunnel established");
        copy_bidirectional(stream, &mut upstream)
            .await
            .map_err(|e| TunnoxError::Network(e.to_string()))?;
        Ok(())
    }

    async fn create_udp_tunnel(
        &self,
        mapping_id: &str,
        _egress_client_id: &str,
        host: &str,
        port: u16,
        _secret_key: &str,
    ) -> Result<Box<dyn UdpTunnelConn>> {
        let addr = format!("{host}:{port}");
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| TunnoxError::Network(e.to_string()))?;
        socket
            .connect(&addr)
            .await
            .map_err(|e| TunnoxError::Network(format!("udp connect to {addr}: {e}")))?;
        tracing::debug!(mapping_id, %addr, "udp tunnel established");
        Ok(Box::new(DirectUdpTunnelConn { socket }))
    }
}

struct DirectUdpTunnelConn {
    socket: UdpSocket,
}

#[async_trait]
impl UdpTunnelConn for DirectUdpTunnelConn {
    async fn send_packet(&self, data: &[u8]) -> Result<()> {
        self.socket
            .send(data)
            .await
            .map_err(|e| TunnoxError::Network(e.to_string()))?;
        Ok(())
    }

    async fn receive_packet(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; UDP_MAX_PACKET];
        let n = self
            .socket
            .recv(&mut buf)
            .await
            .map_err(|e| TunnoxError::Network(e.to_string()))?;
        buf.truncate(n);
        Ok(buf)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
