//! SOCKS5 UDP request/response datagram header.
//!
//! `[RSV(2)=0x0000, FRAG(1), ATYP(1), DST_ADDR, DST_PORT(2 be), DATA]`.
//! Fragmentation is not supported.

use std::net::{Ipv4Addr, Ipv6Addr};

use tunnox_core::{Result, TunnoxError};

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

pub struct DecodedDatagram<'a> {
    pub dst_host: String,
    pub dst_port: u16,
    pub payload: &'a [u8],
}

/// Parses an inbound SOCKS5 UDP request datagram.
pub fn decode(buf: &[u8]) -> Result<DecodedDatagram<'_>> {
    if buf.len() < 4 {
        return Err(TunnoxError::Protocol("udp datagram too short".into()));
    }
    if buf[0] != 0 || buf[1] != 0 {
        return Err(TunnoxError::Protocol("udp datagram RSV must be zero".into()));
    }
    let frag = buf[2];
    if frag != 0 {
        return Err(TunnoxError::Protocol("udp fragmentation is not supported".into()));
    }
    let atyp = buf[3];
    let mut offset = 4usize;

    let dst_host = match atyp {
        ATYP_IPV4 => {
            require_len(buf, offset + 4)?;
            let octets = &buf[offset..offset + 4];
            offset += 4;
            Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]).to_string()
        }
        ATYP_DOMAIN => {
            require_len(buf, offset + 1)?;
            let len = buf[offset] as usize;
            offset += 1;
            require_len(buf, offset + len)?;
            let domain = String::from_utf8(buf[offset..offset + len].to_vec())
                .map_err(|e| TunnoxError::Protocol(format!("invalid domain encoding: {e}")))?;
            offset += len;
            domain
        }
        ATYP_IPV6 => {
            require_len(buf, offset + 16)?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[offset..offset + 16]);
            offset += 16;
            Ipv6Addr::from(octets).to_string()
        }
        other => {
            return Err(TunnoxError::Protocol(format!(
                "unsupported udp address type: {other}"
            )))
        }
    };

    require_len(buf, offset + 2)?;
    let dst_port = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
    offset += 2;

    Ok(DecodedDatagram {
        dst_host,
        dst_port,
        payload: &buf[offset..],
    })
}

/// Builds an outbound response datagram, `dst_host`/`dst_port` acting as
/// the reply's *source* per the SOCKS5 UDP contract.
pub fn encode_response(dst_host: &str, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + payload.len());
    out.push(0);
    out.push(0);
    out.push(0); // FRAG

    if let Ok(ipv4) = dst_host.parse::<Ipv4Addr>() {
        out.push(ATYP_IPV4);
        out.extend_from_slice(&ipv4.octets());
    } else if let Ok(ipv6) = dst_host.parse::<Ipv6Addr>() {
        out.push(ATYP_IPV6);
        out.extend_from_slice(&ipv6.octets());
    } else {
        out.push(ATYP_DOMAIN);
        let bytes = dst_host.as_bytes();
        out.push(bytes.len() as u8);
        out.extend_from_slice(bytes);
    }

    out.extend_from_slice(&dst_port.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn require_len(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        Err(TunnoxError::Protocol("udp datagram truncated".into()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ipv4_destination() {
        let encoded = encode_response("192.168.1.1", 53, b"hello");
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.dst_host, "192.168.1.1");
        assert_eq!(decoded.dst_port, 53);
        assert_eq!(decoded.payload, b"hello");
    }

    #[test]
    fn round_trips_domain_destination() {
        let encoded = encode_response("example.com", 443, b"abc");
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.dst_host, "example.com");
        assert_eq!(decoded.dst_port, 443);
        assert_eq!(decoded.payload, b"abc");
    }

    #[test]
    fn rejects_fragmented_datagrams() {
        let mut encoded = encode_response("1.2.3.4", 1, b"x");
        encoded[2] = 1; // FRAG != 0
        assert!(decode(&encoded).is_err());
    }

    #[test]
    fn rejects_truncated_datagrams() {
        assert!(decode(&[0, 0, 0]).is_err());
    }
}
