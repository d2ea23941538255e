//! Bus, tracker and in-memory server wired together.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tether_core::app::{
    BackgroundJobAction, Presentation, ProgressMonitor, Tether, TetherBuilder, TetherConfig,
};
use tether_core::domain::{Channel, JobFailure, JobId, JobState};
use tether_core::impls::InMemoryServer;

fn job(n: u8) -> JobId {
    JobId::parse(&format!("00000000-0000-4000-8000-0000000000{n:02}")).unwrap()
}

fn wire(server: &Arc<InMemoryServer>, config: TetherConfig) -> Tether {
    TetherBuilder::new()
        .server(server.clone())
        .config(config)
        .seed(42)
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn progress_then_success() {
    let server = Arc::new(InMemoryServer::with_poll_timeout(Duration::from_secs(30)));
    let tether = wire(&server, TetherConfig::default());
    let id = job(1);

    let handle = tether
        .tracker
        .track(id.clone(), Some(json!({"tag": "reload"})))
        .unwrap();
    let mut monitor = ProgressMonitor::spawn(tether.tracker.attach(&id).unwrap());
    assert_eq!(tether.bus.channels(), vec![Channel::progress(&id)]);
    tether.start();

    server.report_progress(&id, 1, 4, "Reading").await;
    assert!(monitor.changed().await);
    assert_eq!(monitor.snapshot().percent(), Some(25));
    assert_eq!(monitor.snapshot().message(), Some("Reading"));

    server.complete(&id, json!(null)).await;
    assert_eq!(handle.wait().await, Ok(Some(json!({"tag": "reload"}))));

    assert_eq!(tether.tracker.pending_jobs(), 0);
    assert_eq!(tether.tracker.state(&id), None);
    assert!(tether.bus.channels().is_empty());
    assert!(tether.bus.last() >= 2);
    tether.shutdown().await;
    assert!(!tether.bus.is_active());
}

#[tokio::test(start_paused = true)]
async fn failure_carries_the_traceback() {
    let server = Arc::new(InMemoryServer::with_poll_timeout(Duration::from_secs(30)));
    let tether = wire(&server, TetherConfig::default());
    let id = job(2);

    let handle = tether.tracker.track(id.clone(), None).unwrap();
    tether.start();
    server.fail(&id, "Traceback (most recent call last): ...").await;

    match handle.wait().await {
        Err(JobFailure::Failed { traceback, .. }) => {
            assert_eq!(traceback.as_deref(), Some("Traceback (most recent call last): ..."));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    tether.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_goes_through_the_server() {
    let server = Arc::new(InMemoryServer::with_poll_timeout(Duration::from_secs(30)));
    let tether = wire(&server, TetherConfig::default());
    let id = job(3);

    let handle = tether.tracker.track(id.clone(), None).unwrap();
    assert_eq!(tether.tracker.state(&id), Some(JobState::Pending));
    tether.start();
    tether.tracker.cancel(&id).await.unwrap();

    assert_eq!(handle.wait().await, Err(JobFailure::Cancelled));
    assert_eq!(server.cancel_requests().await, vec![id]);
    tether.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn silent_job_times_out() {
    let server = Arc::new(InMemoryServer::with_poll_timeout(Duration::from_secs(30)));
    let mut config = TetherConfig::default();
    config.tracker.job_time_limit_secs = 90;
    let tether = wire(&server, config);
    let id = job(4);

    let started = tokio::time::Instant::now();
    let handle = tether.tracker.track(id.clone(), None).unwrap();
    tether.start();

    assert_eq!(handle.wait().await, Err(JobFailure::TimedOut));
    assert!(started.elapsed() >= Duration::from_secs(90));
    assert!(tether.bus.channels().is_empty());

    // a late success for a forgotten job changes nothing
    server.complete(&id, json!(null)).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(tether.tracker.pending_jobs(), 0);
    tether.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn poll_failures_back_off_and_recover() {
    let server = Arc::new(InMemoryServer::with_poll_timeout(Duration::from_secs(30)));
    let tether = wire(&server, TetherConfig::default());
    let id = job(5);

    let handle = tether.tracker.track(id.clone(), None).unwrap();
    server.fail_next(2).await;
    server.complete(&id, json!({"tag": "reload"})).await;

    let started = tokio::time::Instant::now();
    tether.start();
    assert_eq!(handle.wait().await, Ok(Some(json!({"tag": "reload"}))));

    // two error delays of at least 10s + 1s each
    assert!(started.elapsed() >= Duration::from_secs(22));
    assert!(server.poll_count().await >= 3);
    tether.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn background_job_action_drives_a_progress_bar() {
    let server = Arc::new(InMemoryServer::with_poll_timeout(Duration::from_secs(30)));
    let tether = wire(&server, TetherConfig::default());
    let id = job(6);

    let action = json!({
        "type": "web.celery.background_job",
        "tag": "block_with_progress",
        "params": {"uuid": id.as_str(), "cancellable": true}
    });
    let action = BackgroundJobAction::from_value(&action).unwrap().unwrap();
    let background = tether
        .tracker
        .append_background_job(&action)
        .unwrap()
        .unwrap();
    assert_eq!(background.presentation, Presentation::ProgressBar { cancellable: true });
    let mut monitor = ProgressMonitor::spawn(background.progress.unwrap());
    tether.start();

    for step in 1..=3 {
        server.report_progress(&id, step, 3, "Importing").await;
        assert!(monitor.changed().await);
    }
    assert_eq!(monitor.snapshot().percent(), Some(100));

    server.complete(&id, json!(null)).await;
    assert_eq!(background.handle.wait().await, Ok(None));
    assert!(!monitor.changed().await);
    tether.shutdown().await;
}
