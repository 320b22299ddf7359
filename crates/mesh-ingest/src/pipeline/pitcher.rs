//! Egress publisher ("Pitcher"): republishes compressed batches to an
//! external NATS subject, throttled per publish (spec.md §4.7).
//!
//! Runs a `tokio` current-thread runtime inside its own OS thread — the
//! direct counterpart of the original's `asyncio.new_event_loop()` inside
//! a dedicated worker, and the same "async client on a spawned thread"
//! shape the teacher uses for its own async network client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::pipeline::state::HandlerState;

pub const HANDLER_NAME: &str = "pitcher";

const EMPTY_SLEEP: Duration = Duration::from_millis(50);
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PitcherConfig {
    pub server: String,
    pub subject: String,
    pub throttle_delay: Duration,
}

pub struct Pitcher {
    config: PitcherConfig,
    state: HandlerState,
}

impl Pitcher {
    pub fn new(config: PitcherConfig, state: HandlerState) -> Self {
        Self { config, state }
    }

    /// Blocks the calling thread running a current-thread tokio runtime
    /// until `living` goes false or the input queue disconnects.
    pub fn run(self, data_rx: Receiver<Vec<u8>>, living: Arc<AtomicBool>) {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!(error = %e, "failed to build pitcher runtime, egress stage will not run");
                return;
            }
        };
        runtime.block_on(self.main_loop(data_rx, living));
    }

    async fn main_loop(self, data_rx: Receiver<Vec<u8>>, living: Arc<AtomicBool>) {
        let mut client: Option<async_nats::Client> = None;

        while living.load(Ordering::SeqCst) {
            self.state.heartbeat(HANDLER_NAME, crate::time::utc_epoch_now());

            // A blocking recv inside an async function, deliberately
            // mirroring the original's blocking `multiprocessing.Queue.get()`
            // call inside its asyncio main loop.
            let item = match data_rx.recv_timeout(RECV_TIMEOUT) {
                Ok(item) => item,
                Err(RecvTimeoutError::Timeout) => {
                    tokio::time::sleep(EMPTY_SLEEP).await;
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };

            if client.is_none() {
                client = self.connect().await;
            }

            let Some(active) = client.as_ref() else {
                tracing::warn!("no NATS connection, dropping batch");
                tokio::time::sleep(EMPTY_SLEEP).await;
                continue;
            };

            let publish_start = crate::metrics::now_ns();
            let outcome = active.publish(self.config.subject.clone(), item.into()).await;
            crate::metrics::METRICS.record_stage(&crate::metrics::METRICS.egress_ns, crate::metrics::now_ns() - publish_start);

            match outcome {
                Ok(()) => {
                    tokio::time::sleep(self.config.throttle_delay).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "transient publish error, will retry on next item");
                    client = None;
                }
            }
        }

        if let Some(active) = client {
            if let Err(e) = active.drain().await {
                tracing::warn!(error = %e, "error closing NATS connection on shutdown");
            }
        }
    }

    async fn connect(&self) -> Option<async_nats::Client> {
        match async_nats::connect(&self.config.server).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, server = %self.config.server, "failed to connect to NATS, will retry");
                None
            }
        }
    }
}
