//! Ingress router: consumes the gateway's ingress queue and dispatches
//! each item by `msgType` (spec.md §4.3).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Deserialize;

use crate::gateway::{IngressItem, MsgType};
use crate::normalize::{NormalizedSample, Normalizer};
use crate::wire::{CommandResponse, Message};

const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// The `{func, args}` envelope a `COMMAND_REQUEST` item's body BSON-decodes
/// to.
#[derive(Debug, Deserialize)]
pub struct CommandRequestBody {
    pub func: String,
    #[serde(default)]
    pub args: bson::Document,
}

/// Result of invoking a registered command function — mirrors the
/// original's `{status, msg}` response dict.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: bool,
    pub msg: String,
}

/// The out-of-core command function lookup (device connectors, rollup
/// stats, …). Genuinely external per spec.md §4.3 — the core only looks
/// `func` up and invokes it; the registry and the response transport are
/// supplied by the caller.
pub trait CommandRegistry: Send + Sync {
    fn invoke(&self, func: &str, args: &bson::Document) -> CommandResult;
}

type HandlerFn = Box<dyn Fn(&CommandResponse) -> bool + Send + Sync>;

struct HandlerEntry {
    name: &'static str,
    run: HandlerFn,
}

/// Consumes the gateway's ingress queue, decodes `MESH_INDICATION` frames
/// via the wire codec, and runs each command's response through the
/// static handler table (`dispatchCommandHandlers`).
pub struct IngressRouter {
    handlers: Vec<HandlerEntry>,
    registry: Option<Arc<dyn CommandRegistry>>,
}

impl IngressRouter {
    pub fn new(
        normalizer: Arc<Normalizer>,
        normalized_tx: Sender<NormalizedSample>,
        registry: Option<Arc<dyn CommandRegistry>>,
    ) -> Self {
        let handlers: Vec<HandlerEntry> = vec![HandlerEntry {
            name: "sample_normalizer",
            run: Box::new(move |response: &CommandResponse| {
                if !matches!(response, CommandResponse::Data { .. }) {
                    return false;
                }
                let records = normalizer.handle_data_report(response);
                let mut all_sent = true;
                for record in records {
                    if normalized_tx.send(record).is_err() {
                        all_sent = false;
                    }
                }
                all_sent
            }),
        }];
        Self { handlers, registry }
    }

    pub fn spawn(self, ingress_rx: Receiver<IngressItem>, living: Arc<AtomicBool>) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("mesh-ingress-router".into())
            .spawn(move || self.run(ingress_rx, living))
            .expect("failed to spawn mesh-ingress-router thread")
    }

    fn run(self, ingress_rx: Receiver<IngressItem>, living: Arc<AtomicBool>) {
        while living.load(Ordering::SeqCst) {
            match ingress_rx.recv_timeout(RECV_TIMEOUT) {
                Ok(item) => self.dispatch(item),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn dispatch(&self, item: IngressItem) {
        match item.msg_type {
            MsgType::MeshIndication => self.dispatch_mesh_indication(&item.body),
            MsgType::CommandRequest => self.dispatch_command_request(&item.body),
        }
    }

    fn dispatch_mesh_indication(&self, body: &[u8]) {
        let decode_start = crate::metrics::now_ns();
        let msg = match Message::decode(body) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed MESH_INDICATION frame");
                return;
            }
        };
        crate::metrics::METRICS.record_stage(&crate::metrics::METRICS.decode_ns, crate::metrics::now_ns() - decode_start);
        crate::metrics::METRICS.record_item();

        let header = msg.command_header();
        for cmd in &msg.commands {
            let response = cmd.response(&header);
            self.dispatch_command_handlers(&response);
        }
    }

    /// Runs every registered handler whose predicate accepts `response`,
    /// logging (not propagating) a handler panic, and returns the logical
    /// AND of the handled results (spec.md §4.3).
    fn dispatch_command_handlers(&self, response: &CommandResponse) -> bool {
        let mut all_handled = true;
        for entry in &self.handlers {
            match catch_unwind(AssertUnwindSafe(|| (entry.run)(response))) {
                Ok(handled) => all_handled &= handled,
                Err(_) => {
                    tracing::error!(handler = entry.name, "handler panicked, continuing with remaining handlers");
                    all_handled = false;
                }
            }
        }
        all_handled
    }

    fn dispatch_command_request(&self, body: &[u8]) {
        let parsed: CommandRequestBody = match bson::from_slice(body) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed COMMAND_REQUEST body");
                return;
            }
        };
        let Some(registry) = self.registry.as_ref() else {
            tracing::warn!(func = %parsed.func, "no command registry wired, dropping COMMAND_REQUEST");
            return;
        };
        let result = registry.invoke(&parsed.func, &parsed.args);
        tracing::info!(func = %parsed.func, status = result.status, msg = %result.msg, "command invoked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::sunrise_of;
    use crate::wire::command::{Command, DataIndication, SampleRecord};
    use chrono::Utc;

    fn router_with_test_registry() -> (IngressRouter, Receiver<NormalizedSample>) {
        let normalizer = Arc::new(Normalizer::new(sunrise_of(Utc::now())));
        let (tx, rx) = crossbeam_channel::bounded(16);
        (IngressRouter::new(normalizer, tx, None), rx)
    }

    fn mesh_indication_item() -> IngressItem {
        let msg = crate::wire::Message {
            mesh_ctrl: crate::wire::MeshCtrl::from_u8(0),
            addr: "fa29eb6d8701".into(),
            request_id: 1,
            source_hopcount: 0,
            source_queue_length: 0,
            hopcount: 0,
            queue_length: 0,
            reserved: 0,
            dtype: 2,
            partnum: 1,
            numparts: 1,
            commands: vec![Command::DataIndication(DataIndication::new(
                1,
                2,
                vec![SampleRecord { timestamp: 10, vi: 38.5, vo: 38.4, ii: 7.0, io: 6.9, pi: 269.5, po: 265.0 }],
            ))],
        };
        IngressItem {
            source: "emulator".into(),
            msg_type: MsgType::MeshIndication,
            length: 0,
            body: msg.encode(),
            received_on: 0,
        }
    }

    #[test]
    fn mesh_indication_produces_a_normalized_record() {
        let (router, rx) = router_with_test_registry();
        router.dispatch(mesh_indication_item());
        let record = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(record.macaddr, "fa29eb6d8701");
        assert_eq!(record.vi, 38.5);
    }

    #[test]
    fn malformed_mesh_indication_is_dropped_without_panicking() {
        let (router, rx) = router_with_test_registry();
        let item = IngressItem {
            source: "emulator".into(),
            msg_type: MsgType::MeshIndication,
            length: 0,
            body: vec![0u8; 2],
            received_on: 0,
        };
        router.dispatch(item);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn command_request_without_a_registry_is_logged_and_dropped() {
        let (router, _rx) = router_with_test_registry();
        let body = bson::to_vec(&bson::doc! { "func": "noop", "args": {} }).unwrap();
        let item = IngressItem { source: "emulator".into(), msg_type: MsgType::CommandRequest, length: 0, body, received_on: 0 };
        router.dispatch(item);
    }
}
