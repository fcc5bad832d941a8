use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::sleep;

use reelgate::extractor::popup::{PopupKiller, TargetCloser};

const GRACE: Duration = Duration::from_millis(50);

#[derive(Default)]
struct RecordingCloser {
    closed: Mutex<Vec<(String, Instant)>>,
    refuse: Option<String>,
}

#[async_trait]
impl TargetCloser for RecordingCloser {
    async fn close_target(&self, target_id: &str) -> anyhow::Result<()> {
        if self.refuse.as_deref() == Some(target_id) {
            anyhow::bail!("target {} is already gone", target_id);
        }
        self.closed
            .lock()
            .unwrap()
            .push((target_id.to_string(), Instant::now()));
        Ok(())
    }
}

impl RecordingCloser {
    fn ids(&self) -> Vec<String> {
        self.closed
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[tokio::test]
async fn test_main_target_is_never_closed() {
    let closer = Arc::new(RecordingCloser::default());
    let killer = PopupKiller::spawn("main", closer.clone(), GRACE);
    let notifier = killer.notifier();

    notifier.target_created("main");
    notifier.target_created("popup-1");
    sleep(GRACE * 3).await;

    let report = killer.shutdown().await;
    assert_eq!(report.closed, vec!["popup-1".to_string()]);
    assert_eq!(closer.ids(), vec!["popup-1".to_string()]);
}

#[tokio::test]
async fn test_each_popup_is_closed_once() {
    let closer = Arc::new(RecordingCloser::default());
    let killer = PopupKiller::spawn("main", closer.clone(), GRACE);
    let notifier = killer.notifier();

    // target created events can be delivered more than once
    notifier.target_created("popup-1");
    notifier.target_created("popup-1");
    notifier.target_created("popup-2");
    notifier.target_created("popup-1");
    sleep(GRACE * 3).await;

    let report = killer.shutdown().await;
    let mut closed = report.closed.clone();
    closed.sort();
    assert_eq!(closed, vec!["popup-1".to_string(), "popup-2".to_string()]);
    assert_eq!(closer.ids().len(), 2);
}

#[tokio::test]
async fn test_popup_lives_for_the_grace_period() {
    let closer = Arc::new(RecordingCloser::default());
    let killer = PopupKiller::spawn("main", closer.clone(), GRACE);

    let opened = Instant::now();
    killer.notifier().target_created("popup-1");
    sleep(GRACE * 3).await;
    killer.shutdown().await;

    let closed = closer.closed.lock().unwrap();
    assert_eq!(closed.len(), 1);
    assert!(closed[0].1.duration_since(opened) >= GRACE);
}

#[tokio::test]
async fn test_shutdown_waits_for_scheduled_closes() {
    let closer = Arc::new(RecordingCloser::default());
    let killer = PopupKiller::spawn("main", closer.clone(), GRACE);

    killer.notifier().target_created("popup-1");
    // let the killer pick it up, but shut down well before the grace runs out
    sleep(Duration::from_millis(10)).await;

    let report = killer.shutdown().await;
    assert_eq!(report.closed, vec!["popup-1".to_string()]);
    assert_eq!(closer.ids(), vec!["popup-1".to_string()]);
}

#[tokio::test]
async fn test_failed_close_is_reported() {
    let closer = Arc::new(RecordingCloser {
        refuse: Some("popup-2".to_string()),
        ..Default::default()
    });
    let killer = PopupKiller::spawn("main", closer.clone(), GRACE);
    let notifier = killer.notifier();

    notifier.target_created("popup-1");
    notifier.target_created("popup-2");
    sleep(GRACE * 3).await;

    let report = killer.shutdown().await;
    assert_eq!(report.closed, vec!["popup-1".to_string()]);
    assert_eq!(report.failed, vec!["popup-2".to_string()]);
}

#[tokio::test]
async fn test_notifier_outliving_the_killer_is_harmless() {
    let closer = Arc::new(RecordingCloser::default());
    let killer = PopupKiller::spawn("main", closer.clone(), GRACE);
    let notifier = killer.notifier();

    let report = killer.shutdown().await;
    assert_eq!(report, Default::default());

    notifier.target_created("late-popup");
    sleep(GRACE * 2).await;
    assert!(closer.ids().is_empty());
}
