//! Gateway: TCP MI framer + UDP MARCO/POLO autodiscovery, sharing a bind
//! host (spec.md §4.2 in the design notes — two listeners, one config).

mod tcp;
mod udp;

use std::net::{TcpListener, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::error::GatewayError;

/// The source tag every TCP ingress item is stamped with, regardless of
/// which device actually connected — preserved verbatim from the
/// original gateway's hardcoded `"emulator"` literal.
pub const INGRESS_SOURCE: &str = "emulator";

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const UDP_READ_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    MeshIndication,
    CommandRequest,
}

/// One item enqueued by the gateway for the ingress router to consume.
#[derive(Debug, Clone)]
pub struct IngressItem {
    pub source: String,
    pub msg_type: MsgType,
    pub length: usize,
    pub body: Vec<u8>,
    pub received_on: i64,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub comm_host: String,
    pub comm_port: u16,
    pub ad_listen_port: u16,
    pub ad_respond_port: u16,
}

/// The running gateway: a bound TCP listener thread plus a bound UDP
/// autodiscovery thread. Construct with [`Gateway::start`]; call
/// [`Gateway::stop`] to tear both down, TCP first then UDP, matching
/// `GatewayManager.stop()`'s ordering.
pub struct Gateway {
    living: Arc<AtomicBool>,
    tcp_handle: Option<JoinHandle<()>>,
    udp_handle: Option<JoinHandle<()>>,
}

impl Gateway {
    pub fn start(config: GatewayConfig, ingress_tx: Sender<IngressItem>) -> Result<Self, GatewayError> {
        let tcp_addr = format!("{}:{}", config.comm_host, config.comm_port);
        let tcp_listener = TcpListener::bind(&tcp_addr).map_err(|source| GatewayError::BindFailure {
            addr: tcp_addr.clone(),
            source,
        })?;
        tcp_listener
            .set_nonblocking(true)
            .map_err(|source| GatewayError::BindFailure { addr: tcp_addr.clone(), source })?;

        let udp_addr = format!("{}:{}", config.comm_host, config.ad_listen_port);
        let udp_socket = UdpSocket::bind(&udp_addr).map_err(|source| GatewayError::BindFailure {
            addr: udp_addr.clone(),
            source,
        })?;
        udp_socket
            .set_read_timeout(Some(UDP_READ_TIMEOUT))
            .map_err(|source| GatewayError::BindFailure { addr: udp_addr.clone(), source })?;

        let living = Arc::new(AtomicBool::new(true));

        let tcp_living = living.clone();
        let tcp_handle = std::thread::Builder::new()
            .name("mesh-gateway-tcp".into())
            .spawn(move || tcp::accept_loop(tcp_listener, ingress_tx, tcp_living, ACCEPT_POLL_INTERVAL))
            .expect("failed to spawn mesh-gateway-tcp thread");

        let udp_living = living.clone();
        let ad_respond_port = config.ad_respond_port;
        let udp_handle = std::thread::Builder::new()
            .name("mesh-gateway-udp".into())
            .spawn(move || udp::recv_loop(udp_socket, ad_respond_port, udp_living))
            .expect("failed to spawn mesh-gateway-udp thread");

        Ok(Self { living, tcp_handle: Some(tcp_handle), udp_handle: Some(udp_handle) })
    }

    /// Joins the TCP accept loop first, then the UDP loop — both poll
    /// `living` at their respective timeout boundaries, so this returns
    /// within roughly one poll interval of being called.
    pub fn stop(&mut self) {
        self.living.store(false, Ordering::SeqCst);
        if let Some(handle) = self.tcp_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.udp_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_alive(&self) -> bool {
        self.tcp_handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
            && self.udp_handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.living.store(false, Ordering::SeqCst);
    }
}
