//! SOCKS5 ingress: handshake negotiation, per-mapping listeners, and the
//! contract an egress implementation drives to complete a tunnel.

mod engine;
mod listener;
mod listener_manager;
mod tunnel_creator;

pub use engine::{
    encode_reply, perform_handshake, write_reply, REP_ADDRESS_TYPE_NOT_SUPPORTED,
    REP_COMMAND_NOT_SUPPORTED, REP_GENERAL_FAILURE, REP_SUCCESS,
};
pub use listener::Listener;
pub use listener_manager::ListenerManager;
pub use tunnel_creator::{
    OnSuccess, OnUdpSuccess, SuccessFuture, TunnelCreator, UdpRelayFactory, UdpTunnelConn,
};
