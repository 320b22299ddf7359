//! Process supervisor (`DAQProcess`, spec.md §4.8): brings the gateway and
//! handler pipeline up in order, wires the ingress router between them, and
//! tears everything down on a graceful or escalated shutdown.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mesh_ingest::{Gateway, GatewayConfig, Normalizer, Pipeline, PipelineConfig, PitcherConfig};

use crate::config::MeshConfig;

/// Runs the daemon in the foreground until a shutdown signal arrives.
///
/// Startup order: gateway, then pipeline, then ingress router (the router
/// is the consumer that ties the gateway's output to the pipeline's
/// input, so it comes up last). Shutdown stops the gateway first so no
/// new frames can arrive, then the router, then drains the pipeline last
/// — matching the original supervisor's teardown order rather than a
/// literal reversal of startup order.
pub fn run(config: MeshConfig) -> Result<()> {
    let sigint_count = Arc::new(AtomicU32::new(0));
    let handler_count = sigint_count.clone();
    ctrlc::set_handler(move || {
        let count = handler_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= 2 {
            tracing::warn!("second interrupt received, forcing exit");
            std::process::exit(1);
        }
        tracing::info!("interrupt received, shutting down gracefully (press Ctrl-C again to force)");
    })
    .context("failed to install signal handler")?;

    let sunrise = mesh_ingest::time::sunrise_of(chrono::Utc::now());
    let normalizer = Arc::new(Normalizer::new(sunrise));

    tracing::info!(sunrise = %sunrise, "sample normalizer anchored to today's sunrise mark");

    let gateway_config = GatewayConfig {
        comm_host: config.gateway.comm_host.clone(),
        comm_port: config.gateway.comm_port,
        ad_listen_port: config.gateway.ad_listen_port,
        ad_respond_port: config.gateway.ad_respond_port,
    };
    let (ingress_tx, ingress_rx) = crossbeam_channel::bounded(config.daq.backpressure_qsize);
    let mut gateway = Gateway::start(gateway_config, ingress_tx).context("failed to start gateway")?;
    tracing::info!(
        comm = format!("{}:{}", config.gateway.comm_host, config.gateway.comm_port),
        ad_listen = config.gateway.ad_listen_port,
        "gateway listening"
    );

    let pipeline_config = PipelineConfig {
        batch_on: config.daq.compression.batch_on,
        batch_at: config.daq.compression.batch_at,
        pitcher: PitcherConfig {
            server: config.nats.external_publish_server.clone(),
            subject: config.nats.external_mesh_topic.clone(),
            throttle_delay: Duration::from_secs_f64(config.daq.throttle_delay),
        },
    };
    let mut pipeline = Pipeline::start(pipeline_config);
    tracing::info!("pipeline started (batch/compress + egress pitcher)");

    let router = mesh_ingest::IngressRouter::new(normalizer, pipeline.data_tx.clone(), None);
    let router_living = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let router_handle = router.spawn(ingress_rx, router_living.clone());

    while sigint_count.load(Ordering::SeqCst) == 0 {
        std::thread::sleep(Duration::from_millis(200));
        if !gateway.is_alive() {
            tracing::error!("gateway threads exited unexpectedly, shutting down");
            break;
        }
    }

    tracing::info!("stopping gateway");
    gateway.stop();

    tracing::info!("stopping ingress router");
    router_living.store(false, Ordering::SeqCst);
    let _ = router_handle.join();

    tracing::info!("stopping pipeline");
    pipeline.stop();

    cleanup_temp_files();

    Ok(())
}

/// Best-effort cleanup of transient temp artifacts left behind by a run
/// (spec.md §4.8). Failures are swallowed — this is tidiness, not a
/// correctness requirement.
fn cleanup_temp_files() {
    for pattern in ["/tmp/pymp-*"] {
        if let Ok(entries) = glob_simple(pattern) {
            for path in entries {
                let _ = std::fs::remove_dir_all(&path).or_else(|_| std::fs::remove_file(&path));
            }
        }
    }
}

/// Minimal glob for the one wildcard shape `cleanup_temp_files` needs —
/// a directory prefix match under `/tmp`. Not a general glob; the crate
/// has no glob dependency and this doesn't warrant adding one.
fn glob_simple(pattern: &str) -> std::io::Result<Vec<std::path::PathBuf>> {
    let (dir, prefix) = match pattern.rsplit_once('/') {
        Some((dir, rest)) => (dir, rest.trim_end_matches('*')),
        None => (".", pattern.trim_end_matches('*')),
    };
    let mut matches = Vec::new();
    for entry in std::fs::read_dir(dir)?.flatten() {
        if entry.file_name().to_string_lossy().starts_with(prefix) {
            matches.push(entry.path());
        }
    }
    Ok(matches)
}
