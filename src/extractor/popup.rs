use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::debug;

/// long enough for the ad script to think its window opened, short enough that it never loads
pub const POPUP_GRACE: Duration = Duration::from_millis(750);

#[async_trait]
pub trait TargetCloser: Send + Sync {
    async fn close_target(&self, target_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PopupReport {
    pub closed: Vec<String>,
    pub failed: Vec<String>,
}

/// handed to whatever listens for new targets
#[derive(Clone)]
pub struct PopupNotifier {
    tx: mpsc::UnboundedSender<String>,
}

impl PopupNotifier {
    pub fn target_created(&self, target_id: impl Into<String>) {
        // the killer is gone once the session is closing, nothing left to do then
        let _ = self.tx.send(target_id.into());
    }
}

/// owns the lifecycle of every tab the page opens on its own. each foreign target is closed
/// exactly once, `POPUP_GRACE` after it showed up, and never used for anything else
pub struct PopupKiller {
    notifier: PopupNotifier,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<PopupReport>,
}

impl PopupKiller {
    pub fn spawn(
        main_target: impl Into<String>,
        closer: Arc<dyn TargetCloser>,
        grace: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(main_target.into(), closer, grace, rx, stop_rx));

        Self {
            notifier: PopupNotifier { tx },
            stop: Some(stop_tx),
            task,
        }
    }

    pub fn notifier(&self) -> PopupNotifier {
        self.notifier.clone()
    }

    /// stops taking new targets, waits for the closes already scheduled
    pub async fn shutdown(mut self) -> PopupReport {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                debug!("popup killer task died: {}", e);
                PopupReport::default()
            }
        }
    }
}

async fn run(
    main_target: String,
    closer: Arc<dyn TargetCloser>,
    grace: Duration,
    mut rx: mpsc::UnboundedReceiver<String>,
    mut stop: oneshot::Receiver<()>,
) -> PopupReport {
    let mut seen = HashSet::new();
    let mut pending = JoinSet::new();
    let mut report = PopupReport::default();

    loop {
        tokio::select! {
            _ = &mut stop => break,
            created = rx.recv() => match created {
                Some(target_id) => {
                    if target_id != main_target && seen.insert(target_id.clone()) {
                        debug!("popup {} opened, closing in {:?}", target_id, grace);
                        let closer = closer.clone();
                        pending.spawn(async move {
                            sleep(grace).await;
                            let closed = match closer.close_target(&target_id).await {
                                Ok(()) => true,
                                Err(e) => {
                                    debug!("closing popup {} failed: {}", target_id, e);
                                    false
                                }
                            };
                            (target_id, closed)
                        });
                    }
                }
                None => break,
            },
            Some(done) = pending.join_next(), if !pending.is_empty() => record(&mut report, done),
        }
    }

    while let Some(done) = pending.join_next().await {
        record(&mut report, done);
    }
    report
}

fn record(report: &mut PopupReport, done: Result<(String, bool), JoinError>) {
    match done {
        Ok((target_id, true)) => report.closed.push(target_id),
        Ok((target_id, false)) => report.failed.push(target_id),
        Err(e) => debug!("popup close task died: {}", e),
    }
}
