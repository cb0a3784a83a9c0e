//! Optional DNS shortcut: port-53 datagrams bypass per-destination
//! tunnel sessions and are forwarded out-of-band over the control
//! plane instead.

use async_trait::async_trait;
use tunnox_core::Result;

pub const DNS_PORT: u16 = 53;

/// Sentinel address clients may target when they want "the resolver",
/// rewritten to a configured real DNS server before the handler call.
pub const VIRTUAL_DNS_IP: &str = "0.0.0.1";

#[async_trait]
pub trait DnsHandler: Send + Sync {
    /// Forwards a raw DNS query and returns the raw response.
    async fn resolve(&self, query: &[u8]) -> Result<Vec<u8>>;

    /// Real DNS server `VIRTUAL_DNS_IP` is rewritten to before lookup.
    fn real_dns_server(&self) -> &str;
}
