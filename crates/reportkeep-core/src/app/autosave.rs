//! AutosaveScheduler - 定期的な draft 保存
//!
//! トリガーは 2 つ（interval タイマーと終了時フック）ですが、入口は
//! `flush_now()` の 1 つだけです。同じ draft key への書き込みが既に
//! 走っていれば、新しい flush は何もせず `FlushOutcome::Skipped` を返します。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::app::drafts::{DraftStore, SaveOutcome};
use crate::domain::{DraftError, Report, draft_key};

const MIN_AUTOSAVE_INTERVAL: Duration = Duration::from_millis(10);

/// Supplies the report to autosave. `None` means there is nothing to save.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self) -> Option<Report>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Saved(SaveOutcome),
    /// A flush for the same draft key was already running.
    Skipped,
    /// The source had nothing to save.
    Empty,
}

struct Autosaver {
    drafts: DraftStore,
    source: Arc<dyn SnapshotSource>,
    in_flight: Mutex<HashSet<String>>,
}

/// key を in_flight から外す
struct InFlightGuard<'a> {
    owner: &'a Autosaver,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.owner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

impl Autosaver {
    fn try_claim(&self, key: String) -> Option<InFlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard { owner: self, key })
    }

    async fn flush_now(&self) -> Result<FlushOutcome, DraftError> {
        let Some(report) = self.source.snapshot().await else {
            return Ok(FlushOutcome::Empty);
        };
        let key = draft_key(&report.tester_name, &report.pack_name);
        let Some(_guard) = self.try_claim(key) else {
            debug!(tester = %report.tester_name, pack = %report.pack_name, "autosave already in flight, skipping");
            return Ok(FlushOutcome::Skipped);
        };
        let outcome = self
            .drafts
            .save(&report, &report.tester_name, &report.pack_name)
            .await?;
        Ok(FlushOutcome::Saved(outcome))
    }
}

/// AutosaveScheduler は 1 本の interval タスクを持つ
///
/// # 使用例
/// ```ignore
/// let autosave = AutosaveScheduler::spawn(drafts, session.clone(), Duration::from_secs(30));
/// // ...
/// autosave.shutdown().await?; // 最後に 1 回 flush する
/// ```
pub struct AutosaveScheduler {
    inner: Arc<Autosaver>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl AutosaveScheduler {
    /// Start the timer. The first tick fires one `period` from now.
    pub fn spawn(drafts: DraftStore, source: Arc<dyn SnapshotSource>, period: Duration) -> Self {
        let inner = Arc::new(Autosaver {
            drafts,
            source,
            in_flight: Mutex::new(HashSet::new()),
        });
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = period.max(MIN_AUTOSAVE_INTERVAL);

        let saver = Arc::clone(&inner);
        let join = tokio::spawn(async move {
            autosave_loop(saver, period, &mut shutdown_rx).await;
        });

        Self {
            inner,
            shutdown_tx,
            join,
        }
    }

    /// Flush immediately. Shared by the timer and the exit hook.
    pub async fn flush_now(&self) -> Result<FlushOutcome, DraftError> {
        self.inner.flush_now().await
    }

    /// Stop the timer, wait for it, then flush one last time.
    pub async fn shutdown(self) -> Result<FlushOutcome, DraftError> {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
        self.inner.flush_now().await
    }
}

async fn autosave_loop(
    saver: Arc<Autosaver>,
    period: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        match saver.flush_now().await {
            Ok(FlushOutcome::Saved(outcome)) => debug!(?outcome, "autosaved draft"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "autosave failed"),
        }
    }
}
