use std::time::Duration;

use llmverse_common::Result;
use llmverse_config::AppConfig;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::traits::DeliverySurface;

/// Pacing and size limits of a delivery surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    /// Largest number of characters one window may hold.
    pub max_chars: usize,
    pub edit_interval: Duration,
    /// Pause before the final flush once the stream has ended.
    pub settle_delay: Duration,
}

impl DeliverySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_chars: config.delivery.max_message_chars,
            edit_interval: Duration::from_millis(config.delivery.edit_interval_ms),
            settle_delay: Duration::from_millis(config.delivery.settle_delay_ms),
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_chars: 2000,
            edit_interval: Duration::from_secs(1),
            settle_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub windows: usize,
    pub edits: usize,
    /// Characters received from the fragment stream.
    pub chars: usize,
}

/// Renders a fragment stream onto a [`DeliverySurface`] as a sequence of
/// windows no longer than the ceiling, editing the open window at most
/// once per interval.
///
/// Windows may start with a header: `header` for the first one and
/// `continuation` for every later one. Headers count towards the ceiling;
/// stripping them and joining the windows gives back the stream.
#[derive(Debug, Clone)]
pub struct ChunkedDeliveryAdapter {
    settings: DeliverySettings,
    header: String,
    continuation: String,
}

impl ChunkedDeliveryAdapter {
    pub fn new(settings: DeliverySettings) -> Self {
        Self {
            settings,
            header: String::new(),
            continuation: String::new(),
        }
    }

    /// Headers that would not leave room for text are ignored.
    pub fn with_headers(mut self, header: impl Into<String>, continuation: impl Into<String>) -> Self {
        let max_chars = self.settings.max_chars;
        let fits = |text: &String| text.chars().count() < max_chars;
        self.header = Some(header.into()).filter(fits).unwrap_or_default();
        self.continuation = Some(continuation.into()).filter(fits).unwrap_or_default();
        self
    }

    /// Consume `fragments` until the producer closes the channel.
    ///
    /// Any create or edit failure ends delivery with that error.
    pub async fn deliver<S: DeliverySurface>(
        &self,
        surface: &mut S,
        mut fragments: mpsc::Receiver<String>,
    ) -> Result<DeliveryReport> {
        let interval = self.settings.edit_interval;
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut session = Session {
            surface,
            max_chars: self.settings.max_chars.max(1),
            continuation: &self.continuation,
            handle: None,
            text: self.header.clone(),
            shown: String::new(),
            report: DeliveryReport::default(),
        };

        loop {
            tokio::select! {
                fragment = fragments.recv() => match fragment {
                    Some(fragment) => session.push(&fragment).await?,
                    None => break,
                },
                _ = ticker.tick() => session.tick().await?,
            }
        }

        if session.has_pending() {
            time::sleep(self.settings.settle_delay).await;
        }
        session.flush().await?;
        debug!(
            windows = session.report.windows,
            edits = session.report.edits,
            chars = session.report.chars,
            "delivery finished"
        );
        Ok(session.report)
    }
}

struct Session<'a, S: DeliverySurface> {
    surface: &'a mut S,
    max_chars: usize,
    continuation: &'a str,
    /// The open window, if one has been created and not sealed.
    handle: Option<S::Handle>,
    /// Full text of the open window, header included.
    text: String,
    /// What the surface currently displays for the open window.
    shown: String,
    report: DeliveryReport,
}

impl<S: DeliverySurface> Session<'_, S> {
    async fn push(&mut self, fragment: &str) -> Result<()> {
        if fragment.is_empty() {
            return Ok(());
        }
        self.text.push_str(fragment);
        self.report.chars += fragment.chars().count();
        self.seal_overflow().await?;
        if self.handle.is_none() {
            self.open().await?;
        }
        Ok(())
    }

    async fn tick(&mut self) -> Result<()> {
        if let Err(e) = self.surface.typing().await {
            warn!("typing indicator failed: {e}");
        }
        self.seal_overflow().await?;
        self.refresh().await
    }

    async fn flush(&mut self) -> Result<()> {
        self.seal_overflow().await?;
        if self.handle.is_none() && self.report.chars > 0 {
            return self.open().await;
        }
        self.refresh().await
    }

    fn has_pending(&self) -> bool {
        match self.handle {
            Some(_) => self.text != self.shown,
            None => self.report.chars > 0,
        }
    }

    /// Seal windows while the text is over the ceiling. Each sealed window
    /// holds exactly `max_chars` characters; the rest moves on.
    async fn seal_overflow(&mut self) -> Result<()> {
        while let Some((split, _)) = self.text.char_indices().nth(self.max_chars) {
            let rest = self.text.split_off(split);
            match self.handle.take() {
                Some(handle) => {
                    if self.text != self.shown {
                        self.surface.edit(&handle, &self.text).await?;
                        self.report.edits += 1;
                    }
                }
                None => {
                    self.surface.create(&self.text).await?;
                    self.report.windows += 1;
                }
            }
            self.text = format!("{}{rest}", self.continuation);
            self.shown.clear();
        }
        Ok(())
    }

    async fn open(&mut self) -> Result<()> {
        let handle = self.surface.create(&self.text).await?;
        self.handle = Some(handle);
        self.shown = self.text.clone();
        self.report.windows += 1;
        Ok(())
    }

    async fn refresh(&mut self) -> Result<()> {
        if let Some(handle) = &self.handle {
            if self.text != self.shown {
                self.surface.edit(handle, &self.text).await?;
                self.shown = self.text.clone();
                self.report.edits += 1;
            }
        }
        Ok(())
    }
}
