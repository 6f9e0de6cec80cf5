//! Window/idle sampler. Produces one [CapturedObservation] per tick and
//! publishes the current window context for the keystroke flusher.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    agent::{directory::CachedResolution, uploader::UploadItem},
    model::CapturedObservation,
    probe::{self, ActivityProbe},
    utils::clock::Clock,
};

/// Window context as of the latest tick, consumed by the keystroke
/// buffer when it flushes.
#[derive(Debug, Clone, Default)]
pub struct WindowContext {
    pub window_title: Arc<str>,
    pub domain: Option<Arc<str>>,
    pub application: Option<Arc<str>>,
    pub monitored_user_id: Option<i64>,
}

pub struct WindowIdleSampler {
    next: mpsc::Sender<UploadItem>,
    probe: Box<dyn ActivityProbe>,
    resolution: CachedResolution,
    window_context: watch::Sender<WindowContext>,
    shutdown: CancellationToken,
    tick_interval: Duration,
    clock: Box<dyn Clock>,
    last_window_title: Option<Arc<str>>,
    idle_seconds: u32,
}

impl WindowIdleSampler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        next: mpsc::Sender<UploadItem>,
        probe: Box<dyn ActivityProbe>,
        resolution: CachedResolution,
        window_context: watch::Sender<WindowContext>,
        shutdown: CancellationToken,
        tick_interval: Duration,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            next,
            probe,
            resolution,
            window_context,
            shutdown,
            tick_interval,
            clock,
            last_window_title: None,
            idle_seconds: 0,
        }
    }

    async fn tick(&mut self) -> Result<()> {
        let sample = self.probe.sample()?;

        // Re-resolve only when the logged-in account changed; a failed
        // lookup keeps the previous id and is retried next tick.
        let monitored_user_id = self.resolution.user_id_for(&sample.os_user).await;

        if self.last_window_title.as_ref() == Some(&sample.window_title) {
            self.idle_seconds += self.tick_interval.as_secs() as u32;
        } else {
            self.idle_seconds = 0;
        }
        self.last_window_title = Some(sample.window_title.clone());

        let domain = probe::extract_domain(&sample.window_title);
        let application = probe::application_name(&sample.process_path);

        self.window_context.send_replace(WindowContext {
            window_title: sample.window_title.clone(),
            domain: domain.clone(),
            application: application.clone(),
            monitored_user_id,
        });

        let Some(monitored_user_id) = monitored_user_id else {
            debug!("no monitored user resolved yet, dropping observation");
            return Ok(());
        };

        let observation = CapturedObservation {
            monitored_user_id,
            captured_at: self.clock.now(),
            window_title: sample.window_title,
            idle_seconds: self.idle_seconds,
            domain,
            application,
            duration_seconds: self.tick_interval.as_secs() as u32,
            screenshot: sample.screenshot,
            face_presence_seconds: sample.face_presence_seconds,
        };

        // The sampler only enqueues. A full queue means delivery is far
        // behind; dropping here is what keeps the tick unblockable.
        if let Err(e) = self.next.try_send(UploadItem::Observation(observation)) {
            warn!("upload queue rejected observation: {e}");
        }
        Ok(())
    }

    /// Executes the sampling loop. Ticks are spaced from a fixed
    /// deadline so work time does not drift the schedule.
    pub async fn run(mut self) -> Result<()> {
        let mut deadline = self.clock.instant();
        loop {
            deadline += self.tick_interval;

            if let Err(e) = self.tick().await {
                error!("sampler tick failed: {e:?}");
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                _ = self.clock.sleep_until(deadline) => ()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::sync::{mpsc, watch};
    use tokio_util::sync::CancellationToken;

    use crate::{
        agent::{
            directory::{CachedResolution, MockUserDirectory},
            uploader::UploadItem,
        },
        probe::{MockActivityProbe, ProbeSample},
        utils::{clock::SystemClock, logging::TEST_LOGGING},
    };

    use super::{WindowContext, WindowIdleSampler};

    fn sample(title: &str) -> ProbeSample {
        ProbeSample {
            window_title: title.into(),
            process_path: "/usr/bin/editor".into(),
            os_user: "alice".into(),
            screenshot: None,
            face_presence_seconds: None,
        }
    }

    async fn run_ticks(titles: Vec<&'static str>) -> Vec<UploadItem> {
        *TEST_LOGGING;
        let mut probe = MockActivityProbe::new();
        let mut titles = titles.into_iter().cycle();
        probe
            .expect_sample()
            .returning(move || Ok(sample(titles.next().unwrap())));

        let mut directory = MockUserDirectory::new();
        directory.expect_resolve().returning(|_| Ok(3));

        let (tx, mut rx) = mpsc::channel(16);
        let (ctx_tx, _ctx_rx) = watch::channel(WindowContext::default());
        let shutdown = CancellationToken::new();

        let sampler = WindowIdleSampler::new(
            tx,
            Box::new(probe),
            CachedResolution::new(Arc::new(directory)),
            ctx_tx,
            shutdown.clone(),
            Duration::from_secs(10),
            Box::new(SystemClock),
        );

        let handle = tokio::spawn(sampler.run());
        let mut collected = vec![];
        for _ in 0..4 {
            collected.push(rx.recv().await.unwrap());
        }
        shutdown.cancel();
        handle.await.unwrap().unwrap();
        collected
    }

    fn idle_values(items: &[UploadItem]) -> Vec<u32> {
        items
            .iter()
            .map(|item| match item {
                UploadItem::Observation(obs) => obs.idle_seconds,
                other => panic!("unexpected item {other:?}"),
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn idle_accumulates_while_title_unchanged_and_resets_on_change() {
        let items = run_ticks(vec!["report.odt", "report.odt", "report.odt", "chat"]).await;
        assert_eq!(idle_values(&items), vec![0, 10, 20, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn every_tick_emits_exactly_one_observation() {
        let items = run_ticks(vec!["a", "b", "a", "b"]).await;
        assert_eq!(items.len(), 4);
        assert_eq!(idle_values(&items), vec![0, 0, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn observations_carry_domain_and_application() {
        let items = run_ticks(vec![
            "Inbox - mail.google.com",
            "Inbox - mail.google.com",
            "Inbox - mail.google.com",
            "Inbox - mail.google.com",
        ])
        .await;
        let UploadItem::Observation(obs) = &items[0] else {
            panic!("expected observation");
        };
        assert_eq!(obs.domain.as_deref(), Some("mail.google.com"));
        assert_eq!(obs.application.as_deref(), Some("editor"));
        assert_eq!(obs.monitored_user_id, 3);
        assert_eq!(obs.duration_seconds, 10);
    }
}
