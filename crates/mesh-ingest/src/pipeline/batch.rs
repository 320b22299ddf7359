//! Batch/compress stage: accumulates normalized records into a
//! size-or-time batch, BSON-encodes the envelope, bzip2-compresses it
//! (spec.md §4.6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bzip2::write::BzEncoder;
use bzip2::Compression;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use std::io::Write;

use crate::normalize::NormalizedSample;
use crate::pipeline::state::{HandlerState, StateValue};
use crate::time::utc_epoch_now_f64;

pub const HANDLER_NAME: &str = "batch";

const DEFAULT_BATCH_ON: i64 = 500;
const DEFAULT_BATCH_AT: f64 = 60.0;
/// Idle ceiling for the input wait when the cache is empty. Once the cache
/// holds a record, the wait is shortened to whatever time remains until
/// `batch_at` so an age-triggered flush fires promptly instead of waiting
/// out this whole timeout.
const INPUT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct BatchEnvelope {
    cache: Vec<NormalizedSample>,
    last_processed: f64,
}

/// Reads `batch_on`/`batch_at` from the shared state map each cycle so a
/// supervisor can retune them live; falls back to the spec's defaults
/// when unset.
pub struct BatchStage {
    state: HandlerState,
}

impl BatchStage {
    pub fn new(state: HandlerState) -> Self {
        Self { state }
    }

    /// Seeds `batch_on`/`batch_at` into the shared state map, matching
    /// `CompressionHandler.configure()`.
    pub fn configure(&self, batch_on: i64, batch_at: f64) {
        self.state.set(HANDLER_NAME, "batch_on", StateValue::Int(batch_on));
        self.state.set(HANDLER_NAME, "batch_at", StateValue::Float(batch_at));
    }

    fn batch_on(&self) -> i64 {
        self.state.get(HANDLER_NAME, "batch_on").and_then(|v| v.as_i64()).unwrap_or(DEFAULT_BATCH_ON)
    }

    fn batch_at(&self) -> f64 {
        self.state.get(HANDLER_NAME, "batch_at").and_then(|v| v.as_f64()).unwrap_or(DEFAULT_BATCH_AT)
    }

    pub fn run(self, data_rx: Receiver<NormalizedSample>, out_tx: Sender<Vec<u8>>, living: Arc<AtomicBool>) {
        let mut cache: Vec<NormalizedSample> = Vec::new();
        let mut last_processed = utc_epoch_now_f64();

        while living.load(Ordering::SeqCst) {
            self.state.heartbeat(HANDLER_NAME, utc_epoch_now_f64() as i64);

            let wait = if cache.is_empty() {
                INPUT_TIMEOUT
            } else {
                let time_to_age_trigger = self.batch_at() - (utc_epoch_now_f64() - last_processed);
                Duration::from_secs_f64(time_to_age_trigger.max(0.0)).min(INPUT_TIMEOUT)
            };

            match data_rx.recv_timeout(wait) {
                Ok(record) => cache.push(record),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let now = utc_epoch_now_f64();
            let size_triggered = cache.len() as i64 >= self.batch_on();
            let age_triggered = !cache.is_empty() && now - last_processed >= self.batch_at();

            if size_triggered || age_triggered {
                emit(&mut cache, &mut last_processed, &out_tx);
            }
        }

        // Flush whatever is left so a graceful shutdown doesn't silently
        // drop an in-progress batch.
        if !cache.is_empty() {
            emit(&mut cache, &mut last_processed, &out_tx);
        }
    }
}

fn emit(cache: &mut Vec<NormalizedSample>, last_processed: &mut f64, out_tx: &Sender<Vec<u8>>) {
    if cache.is_empty() {
        return;
    }
    let start = crate::metrics::now_ns();
    let result = encode_batch(cache, *last_processed);
    crate::metrics::METRICS.record_stage(&crate::metrics::METRICS.batch_ns, crate::metrics::now_ns() - start);
    match result {
        Ok(bytes) => {
            if out_tx.send(bytes).is_err() {
                tracing::warn!("egress queue closed, dropping batch");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to encode batch, dropping"),
    }
    cache.clear();
    *last_processed = utc_epoch_now_f64();
}

fn encode_batch(cache: &[NormalizedSample], last_processed: f64) -> anyhow::Result<Vec<u8>> {
    let envelope = BatchEnvelope { cache: cache.to_vec(), last_processed };
    let encoded = bson::to_vec(&envelope)?;
    let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&encoded)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: &str) -> NormalizedSample {
        NormalizedSample {
            kind: kind.into(),
            macaddr: "fa29eb6d8701".into(),
            freezetime: 0,
            localtime: 0,
            reg_stat: 0,
            op_stat: 0,
            vi: 0.0,
            vo: 0.0,
            ii: 0.0,
            io: 0.0,
            pi: 0.0,
            po: 0.0,
        }
    }

    fn decompress_and_decode(bytes: &[u8]) -> (Vec<NormalizedSample>, f64) {
        use bzip2::read::BzDecoder;
        use std::io::Read;
        let mut decoder = BzDecoder::new(bytes);
        let mut decoded = Vec::new();
        decoder.read_to_end(&mut decoded).unwrap();
        #[derive(serde::Deserialize)]
        struct Envelope {
            cache: Vec<NormalizedSample>,
            last_processed: f64,
        }
        let envelope: Envelope = bson::from_slice(&decoded).unwrap();
        (envelope.cache, envelope.last_processed)
    }

    #[test]
    fn emits_exactly_one_batch_when_size_threshold_is_hit() {
        let state = HandlerState::new();
        let stage = BatchStage::new(state);
        stage.configure(4, 60.0);

        let (data_tx, data_rx) = crossbeam_channel::bounded(16);
        let (out_tx, out_rx) = crossbeam_channel::bounded(16);
        let living = Arc::new(AtomicBool::new(true));
        let loop_living = living.clone();

        let handle = std::thread::spawn(move || stage.run(data_rx, out_tx, loop_living));

        for _ in 0..4 {
            data_tx.send(sample("mon")).unwrap();
        }

        let batch = out_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let (cache, _) = decompress_and_decode(&batch);
        assert_eq!(cache.len(), 4);

        living.store(false, Ordering::SeqCst);
        drop(data_tx);
        let _ = handle.join();
    }

    #[test]
    fn emits_exactly_one_batch_when_age_threshold_is_hit() {
        let state = HandlerState::new();
        let stage = BatchStage::new(state);
        stage.configure(500, 0.5);

        let (data_tx, data_rx) = crossbeam_channel::bounded(16);
        let (out_tx, out_rx) = crossbeam_channel::bounded(16);
        let living = Arc::new(AtomicBool::new(true));
        let loop_living = living.clone();

        let handle = std::thread::spawn(move || stage.run(data_rx, out_tx, loop_living));

        data_tx.send(sample("mon")).unwrap();

        let batch = out_rx.recv_timeout(Duration::from_secs(3)).unwrap();
        let (cache, _) = decompress_and_decode(&batch);
        assert_eq!(cache.len(), 1);

        living.store(false, Ordering::SeqCst);
        drop(data_tx);
        let _ = handle.join();
    }

    #[test]
    fn never_emits_an_empty_batch_on_a_bare_timeout() {
        let state = HandlerState::new();
        let stage = BatchStage::new(state);
        stage.configure(500, 60.0);

        let (data_tx, data_rx) = crossbeam_channel::bounded::<NormalizedSample>(16);
        let (out_tx, out_rx) = crossbeam_channel::bounded(16);
        let living = Arc::new(AtomicBool::new(true));
        let loop_living = living.clone();

        let handle = std::thread::spawn(move || stage.run(data_rx, out_tx, loop_living));
        std::thread::sleep(Duration::from_millis(100));
        living.store(false, Ordering::SeqCst);
        drop(data_tx);
        let _ = handle.join();

        assert!(out_rx.try_recv().is_err());
    }
}
