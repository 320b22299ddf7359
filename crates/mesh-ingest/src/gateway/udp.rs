//! UDP MARCO/POLO autodiscovery responder.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const MARCO: &[u8] = b"MARCO";
const POLO: &[u8] = b"POLO";

/// Responds to `MARCO` with `POLO`, sent to the sender's IP but the
/// *configured* response port, not the sender's ephemeral source port
/// (spec.md §4.2).
pub(super) fn recv_loop(socket: UdpSocket, ad_respond_port: u16, living: Arc<AtomicBool>) {
    let mut buf = [0u8; 512];
    while living.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((n, peer)) => {
                let payload = buf[..n].trim_ascii();
                if payload == MARCO {
                    let reply_addr = SocketAddr::new(peer.ip(), ad_respond_port);
                    if let Err(e) = socket.send_to(POLO, reply_addr) {
                        tracing::warn!(error = %e, %reply_addr, "failed to send POLO reply");
                    }
                }
            }
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
            Err(e) => {
                tracing::warn!(error = %e, "UDP recv failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn marco_triggers_polo_on_the_configured_respond_port() {
        let server_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        server_socket.set_read_timeout(Some(Duration::from_millis(50))).unwrap();

        let respond_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        respond_socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let respond_port = respond_socket.local_addr().unwrap().port();

        let living = Arc::new(AtomicBool::new(true));
        let loop_living = living.clone();
        let server_addr = server_socket.local_addr().unwrap();

        let server = std::thread::spawn(move || recv_loop(server_socket, respond_port, loop_living));

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(b"MARCO\n", server_addr).unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = respond_socket.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], POLO);

        living.store(false, Ordering::SeqCst);
        let _ = server.join();
    }

    #[test]
    fn trims_ascii_whitespace_before_comparing() {
        assert_eq!(b"MARCO\n".trim_ascii(), b"MARCO");
        assert_eq!(b"  MARCO  ".trim_ascii(), b"MARCO");
        assert_eq!(b"MARCOX".trim_ascii(), b"MARCOX");
    }
}
