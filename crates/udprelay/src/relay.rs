//! The stateful SOCKS5 UDP relay endpoint. One relay owns one ephemeral
//! UDP socket and lives exactly as long as the control TCP connection
//! that requested it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tunnox_core::{
    Disposer, Result, TunnoxError, CONTROL_WATCH_TIMEOUT, MAX_SESSIONS_PER_RELAY, UDP_IDLE,
    UDP_MAX_PACKET, UDP_SWEEP_INTERVAL,
};
use tunnox_socks5::{OnUdpSuccess, TunnelCreator, UdpRelayFactory, UdpTunnelConn};

use crate::codec;
use crate::dns::{self, DnsHandler};
use crate::session::{now_ns, UdpSession};

pub struct UdpRelay {
    mapping_id: String,
    egress_client_id: String,
    secret_key: String,
    udp_socket: Arc<UdpSocket>,
    tunnel_creator: Arc<dyn TunnelCreator>,
    dns_handler: Option<Arc<dyn DnsHandler>>,
    sessions: RwLock<HashMap<String, Arc<UdpSession>>>,
    client_endpoint: RwLock<Option<SocketAddr>>,
    cancel: CancellationToken,
    disposer: Disposer,
}

impl UdpRelay {
    fn new(
        mapping_id: String,
        egress_client_id: String,
        secret_key: String,
        udp_socket: Arc<UdpSocket>,
        tunnel_creator: Arc<dyn TunnelCreator>,
        dns_handler: Option<Arc<dyn DnsHandler>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let disposer = Disposer::new();
        let cancel_for_close = cancel.clone();
        disposer.register(move || {
            cancel_for_close.cancel();
            Ok(())
        });

        Self {
            mapping_id,
            egress_client_id,
            secret_key,
            udp_socket,
            tunnel_creator,
            dns_handler,
            sessions: RwLock::new(HashMap::new()),
            client_endpoint: RwLock::new(None),
            cancel,
            disposer,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    fn spawn(self: Arc<Self>, control_tcp: TcpStream) {
        tokio::spawn(self.clone().control_watcher(control_tcp));
        tokio::spawn(self.clone().packet_reader());
        tokio::spawn(self.idle_sweeper());
    }

    async fn control_watcher(self: Arc<Self>, mut control_tcp: TcpStream) {
        use tokio::io::AsyncReadExt;
        let mut probe = [0u8; 1];
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = tokio::time::timeout(CONTROL_WATCH_TIMEOUT, control_tcp.read(&mut probe)) => {
                    match result {
                        Err(_elapsed) => continue,
                        Ok(Ok(0)) | Ok(Err(_)) => {
                            tracing::debug!(mapping_id = %self.mapping_id, "udp relay control connection closed");
                            self.close().await;
                            return;
                        }
                        Ok(Ok(_)) => continue,
                    }
                }
            }
        }
    }

    async fn packet_reader(self: Arc<Self>) {
        let mut buf = vec![0u8; UDP_MAX_PACKET];
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                received = self.udp_socket.recv_from(&mut buf) => {
                    match received {
                        Ok((n, src)) => self.handle_inbound(&buf[..n], src).await,
                        Err(e) => tracing::warn!(error = %e, "udp relay recv error"),
                    }
                }
            }
        }
    }

    async fn handle_inbound(self: &Arc<Self>, data: &[u8], src: SocketAddr) {
        {
            let mut endpoint = self.client_endpoint.write().await;
            match *endpoint {
                None => *endpoint = Some(src),
                Some(existing) if existing.ip() != src.ip() => {
                    tracing::warn!(%src, expected = %existing.ip(), "udp relay dropping datagram from unexpected source ip");
                    return;
                }
                Some(_) => *endpoint = Some(src),
            }
        }

        let decoded = match codec::decode(data) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(error = %e, "udp relay dropping malformed datagram");
                return;
            }
        };

        if decoded.dst_port == dns::DNS_PORT {
            if let Some(handler) = self.dns_handler.clone() {
                self.handle_dns(handler, decoded.dst_host, decoded.payload, src)
                    .await;
                return;
            }
        }

        let session = match self
            .obtain_or_create_session(decoded.dst_host, decoded.dst_port)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(error = %e, "udp relay session creation failed");
                return;
            }
        };

        if let Err(e) = session.send(decoded.payload).await {
            tracing::debug!(error = %e, dst = %session.dst_key, "udp relay session send failed, evicting");
            self.sessions.write().await.remove(&session.dst_key);
            session.close().await;
        }
    }

    async fn handle_dns(
        &self,
        handler: Arc<dyn DnsHandler>,
        original_dst_host: String,
        payload: &[u8],
        src: SocketAddr,
    ) {
        let response = match handler.resolve(payload).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "udp relay dns shortcut failed");
                return;
            }
        };
        let datagram = codec::encode_response(&original_dst_host, dns::DNS_PORT, &response);
        if let Err(e) = self.udp_socket.send_to(&datagram, src).await {
            tracing::warn!(error = %e, "udp relay dns response send failed");
        }
    }

    async fn obtain_or_create_session(
        self: &Arc<Self>,
        dst_host: String,
        dst_port: u16,
    ) -> Result<Arc<UdpSession>> {
        let dst_key = format!("{dst_host}:{dst_port}");
        {
            let sessions = self.sessions.read().await;
            if let Some(existing) = sessions.get(&dst_key) {
                return Ok(existing.clone());
            }
            if sessions.len() >= MAX_SESSIONS_PER_RELAY {
                return Err(TunnoxError::ResourceExhausted(format!(
                    "udp relay session table full for mapping {}",
                    self.mapping_id
                )));
            }
        }

        let tunnel_conn = self
            .tunnel_creator
            .create_udp_tunnel(
                &self.mapping_id,
                &self.egress_client_id,
                &dst_host,
                dst_port,
                &self.secret_key,
            )
            .await?;
        let tunnel_conn: Arc<dyn UdpTunnelConn> = Arc::from(tunnel_conn);
        let session = Arc::new(UdpSession::new(dst_host, dst_port, tunnel_conn));

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&session.dst_key) {
            return Ok(existing.clone());
        }
        sessions.insert(session.dst_key.clone(), session.clone());
        drop(sessions);

        tokio::spawn(self.clone().receive_loop(session.clone()));
        Ok(session)
    }

    async fn receive_loop(self: Arc<Self>, session: Arc<UdpSession>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    session.close().await;
                    return;
                }
                received = session.tunnel_conn.receive_packet() => {
                    match received {
                        Ok(payload) => {
                            session.touch();
                            let datagram = codec::encode_response(&session.dst_host, session.dst_port, &payload);
                            let endpoint = *self.client_endpoint.read().await;
                            if let Some(endpoint) = endpoint {
                                if let Err(e) = self.udp_socket.send_to(&datagram, endpoint).await {
                                    tracing::warn!(error = %e, "udp relay send to client failed");
                                }
                            }
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, dst = %session.dst_key, "udp relay tunnel receive failed, closing session");
                            self.sessions.write().await.remove(&session.dst_key);
                            session.close().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn idle_sweeper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(UDP_SWEEP_INTERVAL);
        let idle_ns = UDP_IDLE.as_nanos() as u64;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let now = now_ns();
                    let expired: Vec<String> = self
                        .sessions
                        .read()
                        .await
                        .values()
                        .filter(|s| s.is_idle(now, idle_ns))
                        .map(|s| s.dst_key.clone())
                        .collect();

                    if expired.is_empty() {
                        continue;
                    }
                    for key in &expired {
                        let evicted = self.sessions.write().await.remove(key);
                        if let Some(session) = evicted {
                            session.close().await;
                        }
                    }
                }
            }
        }
    }

    async fn close(&self) {
        for err in self.disposer.close() {
            tracing::warn!(mapping_id = %self.mapping_id, error = %err, "udp relay cleanup failed");
        }
        let sessions: Vec<Arc<UdpSession>> = self.sessions.write().await.drain().map(|(_, v)| v).collect();
        for session in sessions {
            session.close().await;
        }
    }
}

/// Builds `UdpRelay`s for the SOCKS5 engine's UDP ASSOCIATE dispatch.
pub struct TunnoxUdpRelayFactory {
    tunnel_creator: Arc<dyn TunnelCreator>,
    dns_handler: Option<Arc<dyn DnsHandler>>,
}

impl TunnoxUdpRelayFactory {
    pub fn new(tunnel_creator: Arc<dyn TunnelCreator>, dns_handler: Option<Arc<dyn DnsHandler>>) -> Self {
        Self {
            tunnel_creator,
            dns_handler,
        }
    }
}

#[async_trait]
impl UdpRelayFactory for TunnoxUdpRelayFactory {
    async fn create_udp_relay(
        &self,
        mut control_tcp: TcpStream,
        mapping_id: String,
        egress_client_id: String,
        secret_key: String,
        on_success: OnUdpSuccess,
    ) -> Result<()> {
        let udp_socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .map_err(|e| TunnoxError::Network(e.to_string()))?;
        let bound = udp_socket
            .local_addr()
            .map_err(|e| TunnoxError::Network(e.to_string()))?;

        on_success(&mut control_tcp, bound).await?;

        let relay = Arc::new(UdpRelay::new(
            mapping_id,
            egress_client_id,
            secret_key,
            Arc::new(udp_socket),
            self.tunnel_creator.clone(),
            self.dns_handler.clone(),
        ));
        relay.spawn(control_tcp);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, UdpSocket as TokioUdpSocket};
    use tunnox_socks5::OnSuccess;

    struct FakeTunnelCreator {
        sent: Arc<tokio::sync::Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl TunnelCreator for FakeTunnelCreator {
        async fn create_tcp_tunnel(
            &self,
            _stream: &mut TcpStream,
            _mapping_id: &str,
            _egress_client_id: &str,
            _host: &str,
            _port: u16,
            _secret_key: &str,
            _on_success: OnSuccess,
        ) -> Result<()> {
            Ok(())
        }

        async fn create_udp_tunnel(
            &self,
            _mapping_id: &str,
            _egress_client_id: &str,
            _host: &str,
            _port: u16,
            _secret_key: &str,
        ) -> Result<Box<dyn UdpTunnelConn>> {
            Ok(Box::new(FakeUdpTunnelConn {
                sent: self.sent.clone(),
            }))
        }
    }

    struct FakeUdpTunnelConn {
        sent: Arc<tokio::sync::Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl UdpTunnelConn for FakeUdpTunnelConn {
        async fn send_packet(&self, data: &[u8]) -> Result<()> {
            self.sent.lock().await.push(data.to_vec());
            Ok(())
        }

        async fn receive_packet(&self) -> Result<Vec<u8>> {
            std::future::pending().await
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    async fn relay_with_fake_creator(sent: Arc<tokio::sync::Mutex<Vec<Vec<u8>>>>) -> Arc<UdpRelay> {
        let creator: Arc<dyn TunnelCreator> = Arc::new(FakeTunnelCreator { sent });
        let udp_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Arc::new(UdpRelay::new(
            "m1".into(),
            "egress-1".into(),
            "secret".into(),
            Arc::new(udp_socket),
            creator,
            None,
        ))
    }

    #[tokio::test]
    async fn inbound_datagram_reaches_the_tunnel_creator() {
        let (_client_tcp, server_tcp) = tcp_pair().await;
        let sent = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let relay = relay_with_fake_creator(sent.clone()).await;
        let bound = relay.udp_socket.local_addr().unwrap();
        relay.clone().spawn(server_tcp);

        let client_udp = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        let datagram = codec::encode_response("127.0.0.1", 9000, b"ping");
        client_udp.send_to(&datagram, bound).await.unwrap();

        for _ in 0..50 {
            if relay.session_count().await == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        assert_eq!(relay.session_count().await, 1);
        assert_eq!(sent.lock().await.as_slice(), &[b"ping".to_vec()]);
    }

    #[tokio::test]
    async fn datagram_from_a_different_source_ip_is_dropped() {
        let sent = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let relay = relay_with_fake_creator(sent).await;

        let first: SocketAddr = "203.0.113.1:4000".parse().unwrap();
        let second: SocketAddr = "198.51.100.2:4000".parse().unwrap();

        relay
            .handle_inbound(&codec::encode_response("127.0.0.1", 9000, b"a"), first)
            .await;
        assert_eq!(*relay.client_endpoint.read().await, Some(first));

        relay
            .handle_inbound(&codec::encode_response("127.0.0.1", 9000, b"b"), second)
            .await;
        assert_eq!(*relay.client_endpoint.read().await, Some(first));
    }

    #[tokio::test]
    async fn session_table_rejects_past_the_cap() {
        let sent = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let relay = relay_with_fake_creator(sent).await;

        for port in 0..MAX_SESSIONS_PER_RELAY as u16 {
            relay
                .obtain_or_create_session(format!("10.0.0.{}", port % 250), 9000 + port)
                .await
                .unwrap();
        }

        let err = relay
            .obtain_or_create_session("10.0.0.250".into(), 9999)
            .await
            .unwrap_err();
        assert!(matches!(err, TunnoxError::ResourceExhausted(_)));
    }
}
