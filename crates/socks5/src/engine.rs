//! RFC 1928 handshake negotiation for CONNECT and UDP ASSOCIATE.

use std::net::{Ipv6Addr, SocketAddrV4};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tunnox_core::{Socks5Command, HandshakeResult, Result, TunnoxError, HANDSHAKE_DEADLINE};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;
const CMD_UDP_ASSOCIATE: u8 = 0x03;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

pub const REP_SUCCESS: u8 = 0x00;
pub const REP_GENERAL_FAILURE: u8 = 0x01;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Runs the full handshake under a 30 s deadline, cleared on success.
pub async fn perform_handshake(stream: &mut TcpStream) -> Result<HandshakeResult> {
    match tokio::time::timeout(HANDSHAKE_DEADLINE, handshake_inner(stream)).await {
        Ok(result) => result,
        Err(_) => Err(TunnoxError::Timeout),
    }
}

async fn handshake_inner(stream: &mut TcpStream) -> Result<HandshakeResult> {
    let mut header = [0u8; 2];
    read_exact(stream, &mut header).await?;
    if header[0] != VERSION {
        return Err(TunnoxError::Protocol(format!(
            "unsupported SOCKS version: {}",
            header[0]
        )));
    }

    let nmethods = header[1] as usize;
    if nmethods == 0 {
        return Err(TunnoxError::Protocol("nmethods is zero".into()));
    }
    let mut methods = vec![0u8; nmethods];
    read_exact(stream, &mut methods).await?;

    if !methods.contains(&METHOD_NO_AUTH) {
        write_all(stream, &[VERSION, METHOD_NONE_ACCEPTABLE]).await?;
        return Err(TunnoxError::Protocol("client offered no acceptable method".into()));
    }
    write_all(stream, &[VERSION, METHOD_NO_AUTH]).await?;

    let mut request_header = [0u8; 4];
    read_exact(stream, &mut request_header).await?;
    if request_header[0] != VERSION {
        return Err(TunnoxError::Protocol("invalid request version".into()));
    }

    let command = match request_header[1] {
        CMD_CONNECT => Socks5Command::Connect,
        CMD_UDP_ASSOCIATE => Socks5Command::UdpAssociate,
        other => {
            write_all(stream, &encode_reply(REP_COMMAND_NOT_SUPPORTED, None)).await?;
            return Err(TunnoxError::Protocol(format!("unsupported command: {other}")));
        }
    };

    let host = match request_header[3] {
        ATYP_IPV4 => {
            let mut addr = [0u8; 4];
            read_exact(stream, &mut addr).await?;
            format!("{}.{}.{}.{}", addr[0], addr[1], addr[2], addr[3])
        }
        ATYP_DOMAIN => {
            let mut len_buf = [0u8; 1];
            read_exact(stream, &mut len_buf).await?;
            let mut domain = vec![0u8; len_buf[0] as usize];
            read_exact(stream, &mut domain).await?;
            String::from_utf8(domain)
                .map_err(|e| TunnoxError::Protocol(format!("invalid domain encoding: {e}")))?
        }
        ATYP_IPV6 => {
            let mut addr = [0u8; 16];
            read_exact(stream, &mut addr).await?;
            Ipv6Addr::from(addr).to_string()
        }
        other => {
            write_all(stream, &encode_reply(REP_ADDRESS_TYPE_NOT_SUPPORTED, None)).await?;
            return Err(TunnoxError::Protocol(format!("unsupported address type: {other}")));
        }
    };

    let mut port_buf = [0u8; 2];
    read_exact(stream, &mut port_buf).await?;
    let port = u16::from_be_bytes(port_buf);

    Ok(HandshakeResult {
        command,
        target_host: host,
        target_port: port,
    })
}

/// `[5, rep, 0, 1, b0, b1, b2, b3, p_hi, p_lo]`. `bound` defaults to
/// `0.0.0.0:0` when `None`.
pub fn encode_reply(rep: u8, bound: Option<SocketAddrV4>) -> [u8; 10] {
    let bound = bound.unwrap_or_else(|| SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, 0));
    let octets = bound.ip().octets();
    let port = bound.port().to_be_bytes();
    [
        VERSION, rep, 0x00, ATYP_IPV4, octets[0], octets[1], octets[2], octets[3], port[0], port[1],
    ]
}

pub async fn write_reply(stream: &mut TcpStream, rep: u8, bound: Option<SocketAddrV4>) -> Result<()> {
    write_all(stream, &encode_reply(rep, bound)).await
}

async fn read_exact(stream: &mut TcpStream, buf: &mut [u8]) -> Result<()> {
    stream
        .read_exact(buf)
        .await
        .map_err(|e| TunnoxError::Network(e.to_string()))?;
    Ok(())
}

async fn write_all(stream: &mut TcpStream, buf: &[u8]) -> Result<()> {
    stream
        .write_all(buf)
        .await
        .map_err(|e| TunnoxError::Network(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn handshake_parses_connect_with_domain_address() {
        let (mut client, mut server) = pair().await;

        let client_task = tokio::spawn(async move {
            client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
            let mut reply = [0u8; 2];
            client.read_exact(&mut reply).await.unwrap();
            assert_eq!(reply, [0x05, 0x00]);

            let mut req = vec![0x05, 0x01, 0x00, 0x03, 11];
            req.extend_from_slice(b"example.com");
            req.extend_from_slice(&443u16.to_be_bytes());
            client.write_all(&req).await.unwrap();

            let mut final_reply = [0u8; 10];
            client.read_exact(&mut final_reply).await.unwrap();
            assert_eq!(final_reply[1], REP_SUCCESS);
        });

        let result = perform_handshake(&mut server).await.unwrap();
        assert!(matches!(result.command, Socks5Command::Connect));
        assert_eq!(result.target_host, "example.com");
        assert_eq!(result.target_port, 443);

        write_reply(&mut server, REP_SUCCESS, None).await.unwrap();
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_parses_udp_associate_with_ipv4() {
        let (mut client, mut server) = pair().await;

        let client_task = tokio::spawn(async move {
            client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
            let mut reply = [0u8; 2];
            client.read_exact(&mut reply).await.unwrap();

            let mut req = vec![0x05, 0x03, 0x00, 0x01];
            req.extend_from_slice(&[0, 0, 0, 0]);
            req.extend_from_slice(&0u16.to_be_bytes());
            client.write_all(&req).await.unwrap();
        });

        let result = perform_handshake(&mut server).await.unwrap();
        assert!(matches!(result.command, Socks5Command::UdpAssociate));
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_command_gets_reply_0x07() {
        let (mut client, mut server) = pair().await;

        let client_task = tokio::spawn(async move {
            client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
            let mut reply = [0u8; 2];
            client.read_exact(&mut reply).await.unwrap();

            // BIND (0x02) is not supported.
            let mut req = vec![0x05, 0x02, 0x00, 0x01];
            req.extend_from_slice(&[0, 0, 0, 0]);
            req.extend_from_slice(&0u16.to_be_bytes());
            client.write_all(&req).await.unwrap();

            let mut final_reply = [0u8; 10];
            client.read_exact(&mut final_reply).await.unwrap();
            final_reply
        });

        let err = perform_handshake(&mut server).await.unwrap_err();
        assert!(matches!(err, TunnoxError::Protocol(_)));

        let reply = client_task.await.unwrap();
        assert_eq!(reply[1], REP_COMMAND_NOT_SUPPORTED);
    }

    #[tokio::test]
    async fn no_auth_not_offered_is_rejected() {
        let (mut client, mut server) = pair().await;

        let client_task = tokio::spawn(async move {
            // Offer only a bogus method (0x02 == username/password).
            client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
            let mut reply = [0u8; 2];
            client.read_exact(&mut reply).await.unwrap();
            reply
        });

        let err = perform_handshake(&mut server).await.unwrap_err();
        assert!(matches!(err, TunnoxError::Protocol(_)));

        let reply = client_task.await.unwrap();
        assert_eq!(reply, [0x05, METHOD_NONE_ACCEPTABLE]);
    }
}
