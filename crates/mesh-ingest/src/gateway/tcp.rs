//! TCP accept loop and per-connection MI framer.

use std::io::{ErrorKind, Read};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;

use super::{IngressItem, MsgType, INGRESS_SOURCE};
use crate::time::utc_epoch_now;

const HEADER_TAG: [u8; 2] = *b"MI";

/// Accepts connections on a nonblocking listener, polling `living` between
/// attempts so shutdown is noticed without a blocking `accept()` call.
pub(super) fn accept_loop(
    listener: TcpListener,
    ingress_tx: Sender<IngressItem>,
    living: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    while living.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let tx = ingress_tx.clone();
                let conn_living = living.clone();
                std::thread::Builder::new()
                    .name(format!("mesh-gateway-conn-{peer}"))
                    .spawn(move || connection_loop(stream, tx, conn_living))
                    .expect("failed to spawn mesh-gateway-conn thread");
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(poll_interval);
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept failed");
                std::thread::sleep(poll_interval);
            }
        }
    }
}

/// Frames one connection: `"MI" | len(1B) | body[len]`, repeated until EOF
/// or a short read. A header mismatch is logged and the loop continues
/// reading rather than dropping the connection (spec.md §4.2).
fn connection_loop(mut stream: TcpStream, ingress_tx: Sender<IngressItem>, living: Arc<AtomicBool>) {
    let _ = stream.set_read_timeout(Some(Duration::from_millis(200)));

    while living.load(Ordering::SeqCst) {
        let mut header = [0u8; 2];
        match read_exact_or_timeout(&mut stream, &mut header) {
            ReadOutcome::Ok => {}
            ReadOutcome::TimedOut => continue,
            ReadOutcome::Eof | ReadOutcome::Err => {
                tracing::info!("peer disconnected");
                return;
            }
        }

        if header != HEADER_TAG {
            tracing::warn!(?header, "unexpected MI header tag, continuing");
            continue;
        }

        let mut len_byte = [0u8; 1];
        match read_exact_or_timeout(&mut stream, &mut len_byte) {
            ReadOutcome::Ok => {}
            ReadOutcome::TimedOut => continue,
            ReadOutcome::Eof | ReadOutcome::Err => {
                tracing::info!("peer disconnected mid-frame");
                return;
            }
        }
        let length = len_byte[0] as usize;

        let mut body = vec![0u8; length];
        match read_exact_or_timeout(&mut stream, &mut body) {
            ReadOutcome::Ok => {}
            ReadOutcome::TimedOut => continue,
            ReadOutcome::Eof | ReadOutcome::Err => {
                tracing::info!("peer disconnected mid-body");
                return;
            }
        }

        let received_on = utc_epoch_now();
        let item = IngressItem {
            source: INGRESS_SOURCE.to_string(),
            msg_type: MsgType::MeshIndication,
            length,
            body,
            received_on,
        };
        if ingress_tx.send(item).is_err() {
            tracing::warn!("ingress queue closed, dropping frame");
            return;
        }
    }
}

enum ReadOutcome {
    Ok,
    TimedOut,
    Eof,
    Err,
}

/// Reads exactly `buf.len()` bytes, treating a read timeout as retryable
/// (so the loop can re-check `living`) and a zero-byte read as EOF.
fn read_exact_or_timeout(stream: &mut TcpStream, buf: &mut [u8]) -> ReadOutcome {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return ReadOutcome::Eof,
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if filled == 0 {
                    return ReadOutcome::TimedOut;
                }
                // A partial read timed out mid-frame; keep trying rather
                // than discarding bytes already consumed.
                continue;
            }
            Err(_) => return ReadOutcome::Err,
        }
    }
    ReadOutcome::Ok
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::TcpStream;

    use super::*;

    fn build_mi_frame(body: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(3 + body.len());
        frame.extend_from_slice(&HEADER_TAG);
        frame.push(body.len() as u8);
        frame.extend_from_slice(body);
        frame
    }

    #[test]
    fn frames_a_single_message_over_a_real_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = crossbeam_channel::bounded(8);
        let living = Arc::new(AtomicBool::new(true));
        let loop_living = living.clone();

        let server = std::thread::spawn(move || accept_loop(listener, tx, loop_living, Duration::from_millis(20)));

        let body = vec![0u8; 11];
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(&build_mi_frame(&body)).unwrap();

        let item = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(item.source, INGRESS_SOURCE);
        assert_eq!(item.length, 11);
        assert_eq!(item.body, body);
        assert!(matches!(item.msg_type, MsgType::MeshIndication));

        living.store(false, Ordering::SeqCst);
        drop(client);
        let _ = server.join();
    }

    #[test]
    fn header_mismatch_is_logged_and_connection_stays_open() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = crossbeam_channel::bounded(8);
        let living = Arc::new(AtomicBool::new(true));
        let loop_living = living.clone();

        let server = std::thread::spawn(move || accept_loop(listener, tx, loop_living, Duration::from_millis(20)));

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"XX").unwrap();
        let body = vec![1u8, 2, 3];
        client.write_all(&build_mi_frame(&body)).unwrap();

        let item = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(item.body, body);

        living.store(false, Ordering::SeqCst);
        drop(client);
        let _ = server.join();
    }
}
