//! Pipeline assembly: wires the batch/compress stage to the egress
//! publisher. Stands in for the original's `A(B)` subhandler composition
//! with explicit queue wiring (no operator overloading — spec.md §9).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::normalize::NormalizedSample;
use crate::pipeline::batch::BatchStage;
use crate::pipeline::pitcher::{Pitcher, PitcherConfig};
use crate::pipeline::state::HandlerState;

const JOIN_TIMEOUT: Duration = Duration::from_secs(30);
const QUEUE_CAPACITY: usize = 4096;

pub struct PipelineConfig {
    pub batch_on: i64,
    pub batch_at: f64,
    pub pitcher: PitcherConfig,
}

/// The running batch → egress chain. `data_tx` is the normalizer's output
/// queue — the pipeline's first-stage queue per spec.md §4.4.
pub struct Pipeline {
    pub data_tx: Sender<NormalizedSample>,
    pub state: HandlerState,
    living: Arc<AtomicBool>,
    batch_handle: Option<JoinHandle<()>>,
    pitcher_handle: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub fn start(config: PipelineConfig) -> Self {
        let state = HandlerState::new();
        let living = Arc::new(AtomicBool::new(true));

        let batch_stage = BatchStage::new(state.clone());
        batch_stage.configure(config.batch_on, config.batch_at);

        let (data_tx, data_rx) = crossbeam_channel::bounded::<NormalizedSample>(QUEUE_CAPACITY);
        let (compressed_tx, compressed_rx) = crossbeam_channel::bounded::<Vec<u8>>(QUEUE_CAPACITY);

        let batch_living = living.clone();
        let batch_handle = std::thread::Builder::new()
            .name("mesh-pipeline-batch".into())
            .spawn(move || batch_stage.run(data_rx, compressed_tx, batch_living))
            .expect("failed to spawn mesh-pipeline-batch thread");

        let pitcher = Pitcher::new(config.pitcher, state.clone());
        let pitcher_living = living.clone();
        let pitcher_handle = std::thread::Builder::new()
            .name("mesh-pipeline-pitcher".into())
            .spawn(move || pitcher.run(compressed_rx, pitcher_living))
            .expect("failed to spawn mesh-pipeline-pitcher thread");

        Self {
            data_tx,
            state,
            living,
            batch_handle: Some(batch_handle),
            pitcher_handle: Some(pitcher_handle),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.batch_handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
            && self.pitcher_handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Stops in reverse start order, each with a 30s join window — a
    /// thread still running past the window is logged and detached
    /// rather than forcibly killed (Rust has no safe thread-kill).
    pub fn stop(&mut self) {
        self.living.store(false, Ordering::SeqCst);
        join_with_timeout("pitcher", self.pitcher_handle.take());
        join_with_timeout("batch", self.batch_handle.take());
    }
}

fn join_with_timeout(name: &str, handle: Option<JoinHandle<()>>) {
    let Some(handle) = handle else { return };
    let start = std::time::Instant::now();
    while !handle.is_finished() && start.elapsed() < JOIN_TIMEOUT {
        std::thread::sleep(Duration::from_millis(100));
    }
    if handle.is_finished() {
        let _ = handle.join();
    } else {
        tracing::warn!(stage = name, "stage did not stop within join timeout, detaching");
    }
}
