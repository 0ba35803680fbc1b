//! Pipeline lifecycle integration tests.
//!
//! These tests drive the full path: frames pushed into a channel source,
//! evaluated by the PPE rule, gated, queued and enriched by the worker pool,
//! ending in a persisted report.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use helmwatch_core::{
    admission::AdmissionConfig,
    detect::{channel_source, ChannelSourceHandle, Detection, Frame, PpeRule, PpeRuleConfig},
    enrich::{PersistenceService, ReportStatus},
    event::PipelineEvent,
    testing::{
        test_detection, test_frame, MockCaptionService, MockNarrativeService, MockPersistence,
        MockSnapshotStore,
    },
    worker::{EnrichmentServices, WorkerConfig},
    AdmitOutcome, OrchestratorConfig, OrchestratorError, PipelineOrchestrator, PipelineState,
};

/// Test helper wiring an orchestrator to mock collaborators and a channel
/// detection source.
struct TestHarness {
    orchestrator: Arc<PipelineOrchestrator>,
    handle: ChannelSourceHandle,
    persistence: Arc<MockPersistence>,
    captions: Arc<MockCaptionService>,
    narratives: Arc<MockNarrativeService>,
    events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl TestHarness {
    fn new(config: OrchestratorConfig) -> Self {
        let (source, handle) = channel_source(32);
        let persistence = Arc::new(MockPersistence::new());
        let captions = Arc::new(MockCaptionService::new());
        let narratives = Arc::new(MockNarrativeService::new());
        let services = EnrichmentServices {
            snapshots: Arc::new(MockSnapshotStore::new()),
            captions: Arc::clone(&captions) as _,
            narratives: Arc::clone(&narratives) as _,
            persistence: Arc::clone(&persistence) as _,
        };
        let rule = Arc::new(PpeRule::new(PpeRuleConfig::default()));
        let orchestrator =
            PipelineOrchestrator::new(config, Arc::new(source), rule, services);

        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        orchestrator.register_handler(Box::new(move |event: &PipelineEvent| {
            events_clone.lock().unwrap().push(event.clone());
            Ok(())
        }));

        Self {
            orchestrator,
            handle,
            persistence,
            captions,
            narratives,
            events,
        }
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            queue_capacity: 16,
            max_retries: 3,
            admission: AdmissionConfig {
                cooldown_secs: 0,
                rate_limit_max: 1000,
                rate_limit_window_secs: 60,
                multi_device: true,
            },
            workers: WorkerConfig {
                workers: 2,
                batch_size: 4,
                dequeue_timeout_ms: 20,
                service_timeout_ms: 1_000,
            },
            ..Default::default()
        }
    }

    /// A frame whose detections violate the PPE rule.
    fn push_violation(&self, device: &str) -> bool {
        self.handle.push(
            test_frame(device),
            vec![
                test_detection("person", 0.95),
                test_detection("no_helmet", 0.9),
            ],
        )
    }

    /// A frame with a compliant person, no violation.
    fn push_clean(&self, device: &str) -> bool {
        self.handle
            .push(test_frame(device), vec![test_detection("person", 0.95)])
    }

    fn event_kinds(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.kind()).collect()
    }

    async fn wait_for_status(
        &self,
        report_id: &str,
        expected: ReportStatus,
        timeout: Duration,
    ) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if let Ok(Some(report)) = self.persistence.get(report_id).await {
                if report.status == expected {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    async fn wait_for_admitted(&self, count: usize, timeout: Duration) -> Vec<String> {
        let start = std::time::Instant::now();
        loop {
            let ids: Vec<String> = self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    PipelineEvent::ViolationAdmitted { report_id, .. } => {
                        Some(report_id.clone())
                    }
                    _ => None,
                })
                .collect();
            if ids.len() >= count || start.elapsed() >= timeout {
                return ids;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn violation_event(device: &str) -> helmwatch_core::detect::ViolationEvent {
    helmwatch_core::detect::ViolationEvent {
        device_id: device.to_string(),
        timestamp: Utc::now(),
        detections: vec![test_detection("no_helmet", 0.9)],
        person_count: 1,
        violation_count: 1,
        severity: helmwatch_core::detect::Severity::Critical,
        summary: "1 of 1 people missing protective equipment".to_string(),
    }
}

#[tokio::test]
async fn test_detected_violation_flows_to_completed_report() {
    let harness = TestHarness::new(TestHarness::fast_config());
    harness.orchestrator.start().await.unwrap();

    assert!(harness.push_clean("cam1"));
    assert!(harness.push_violation("cam1"));

    let ids = harness.wait_for_admitted(1, Duration::from_secs(2)).await;
    assert_eq!(ids.len(), 1);
    assert!(
        harness
            .wait_for_status(&ids[0], ReportStatus::Completed, Duration::from_secs(2))
            .await
    );

    let report = harness.persistence.get(&ids[0]).await.unwrap().unwrap();
    assert_eq!(report.device_id, "cam1");
    assert!(report.caption.is_some());
    assert!(report.narrative.is_some());
    assert!(report.snapshot.is_some());
    assert_eq!(report.attempts, 1);

    let status = harness.orchestrator.status().await;
    assert_eq!(status.counters.frames_analyzed, 2);
    assert_eq!(status.counters.violations_detected, 1);
    assert_eq!(status.counters.admitted, 1);
    assert!(harness.event_kinds().contains(&"report_ready"));

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_cooldown_suppresses_repeat_violations() {
    let mut config = TestHarness::fast_config();
    config.admission.cooldown_secs = 30;
    let harness = TestHarness::new(config);
    harness.orchestrator.start().await.unwrap();

    assert!(harness.push_violation("cam1"));
    harness.wait_for_admitted(1, Duration::from_secs(2)).await;
    assert!(harness.push_violation("cam1"));
    assert!(harness.push_violation("cam1"));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = harness.orchestrator.status().await;
    assert_eq!(status.counters.violations_detected, 3);
    assert_eq!(status.counters.admitted, 1);
    assert_eq!(status.counters.suppressed_cooldown, 2);
    assert!(status.cooldown_remaining_ms > 0);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_submissions_admit_once_per_cooldown() {
    let mut config = TestHarness::fast_config();
    config.admission.cooldown_secs = 3600;
    let harness = TestHarness::new(config);
    // A slow store widens the gap between the gate decision and the enqueue;
    // the cooldown must hold across it.
    harness.persistence.set_latency(Duration::from_millis(5));
    harness.orchestrator.start().await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..32 {
        let orchestrator = Arc::clone(&harness.orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator.submit(violation_event("cam1")).await.unwrap()
        }));
    }

    let mut admitted = 0;
    let mut suppressed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            AdmitOutcome::Admitted { .. } => admitted += 1,
            AdmitOutcome::Suppressed(_) => suppressed += 1,
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(suppressed, 31);

    harness.persistence.set_latency(Duration::ZERO);
    let status = harness.orchestrator.status().await;
    assert_eq!(status.counters.admitted, 1);
    assert_eq!(status.counters.suppressed_cooldown, 31);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_queue_full_emits_backpressure() {
    let mut config = TestHarness::fast_config();
    config.queue_capacity = 1;
    config.workers.workers = 1;
    let harness = TestHarness::new(config);
    // Keep the single worker busy so the queue actually fills up.
    harness.captions.set_latency(Duration::from_millis(500));
    harness.orchestrator.start().await.unwrap();

    for i in 0..6 {
        assert!(harness.push_violation(&format!("cam{}", i)));
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    let status = harness.orchestrator.status().await;
    assert!(status.counters.rejected >= 1, "status: {:?}", status);
    assert!(harness.event_kinds().contains(&"backpressure"));

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_transient_failures_retry_to_completion() {
    let harness = TestHarness::new(TestHarness::fast_config());
    harness.captions.fail_next(2);
    harness.orchestrator.start().await.unwrap();

    assert!(harness.push_violation("cam1"));
    let ids = harness.wait_for_admitted(1, Duration::from_secs(2)).await;
    assert!(
        harness
            .wait_for_status(&ids[0], ReportStatus::Completed, Duration::from_secs(3))
            .await
    );

    let report = harness.persistence.get(&ids[0]).await.unwrap().unwrap();
    assert_eq!(report.attempts, 3);

    let status = harness.orchestrator.status().await;
    assert_eq!(status.queue.stats.processed, 1);
    assert_eq!(status.queue.stats.retried, 2);
    assert_eq!(status.queue.stats.failed, 0);
    assert!(!harness.event_kinds().contains(&"error"));

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_report() {
    let mut config = TestHarness::fast_config();
    config.max_retries = 2;
    let harness = TestHarness::new(config);
    harness.captions.fail_next(usize::MAX);
    harness.orchestrator.start().await.unwrap();

    assert!(harness.push_violation("cam1"));
    let ids = harness.wait_for_admitted(1, Duration::from_secs(2)).await;
    assert!(
        harness
            .wait_for_status(&ids[0], ReportStatus::Failed, Duration::from_secs(3))
            .await
    );

    let permanent_errors = harness
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, PipelineEvent::Error { permanent: true, .. }))
        .count();
    assert_eq!(permanent_errors, 1);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_pause_suspends_detection_but_drains_queue() {
    let harness = TestHarness::new(TestHarness::fast_config());
    harness.orchestrator.start().await.unwrap();

    assert!(harness.push_violation("cam1"));
    let ids = harness.wait_for_admitted(1, Duration::from_secs(2)).await;

    harness.orchestrator.pause().await.unwrap();
    assert_eq!(harness.orchestrator.state(), PipelineState::Paused);
    let frames_before = harness.orchestrator.status().await.counters.frames_analyzed;

    // Frames pushed while paused buffer in the source channel.
    assert!(harness.push_clean("cam1"));
    assert!(harness.push_clean("cam1"));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        harness.orchestrator.status().await.counters.frames_analyzed,
        frames_before
    );

    // The already-admitted job still completes while paused.
    assert!(
        harness
            .wait_for_status(&ids[0], ReportStatus::Completed, Duration::from_secs(2))
            .await
    );

    harness.orchestrator.resume().await.unwrap();
    assert_eq!(harness.orchestrator.state(), PipelineState::Detecting);
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(2) {
        if harness.orchestrator.status().await.counters.frames_analyzed == frames_before + 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(
        harness.orchestrator.status().await.counters.frames_analyzed,
        frames_before + 2
    );

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_lifecycle_transitions_are_enforced() {
    let harness = TestHarness::new(TestHarness::fast_config());

    // Pause and resume require a running pipeline.
    assert!(matches!(
        harness.orchestrator.pause().await,
        Err(OrchestratorError::InvalidTransition { .. })
    ));
    assert!(matches!(
        harness.orchestrator.resume().await,
        Err(OrchestratorError::InvalidTransition { .. })
    ));

    harness.orchestrator.start().await.unwrap();
    assert!(matches!(
        harness.orchestrator.start().await,
        Err(OrchestratorError::InvalidTransition { .. })
    ));

    harness.orchestrator.stop().await.unwrap();
    assert_eq!(harness.orchestrator.state(), PipelineState::Stopped);
    // Stop is idempotent; restart is not allowed.
    harness.orchestrator.stop().await.unwrap();
    assert!(matches!(
        harness.orchestrator.start().await,
        Err(OrchestratorError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_submit_respects_lifecycle_and_gate() {
    let mut config = TestHarness::fast_config();
    config.admission.cooldown_secs = 30;
    let harness = TestHarness::new(config);

    // Not accepting before start.
    assert!(matches!(
        harness.orchestrator.submit(violation_event("cam1")).await,
        Err(OrchestratorError::NotAccepting { .. })
    ));

    harness.orchestrator.start().await.unwrap();

    let outcome = harness
        .orchestrator
        .submit(violation_event("cam1"))
        .await
        .unwrap();
    let report_id = match outcome {
        AdmitOutcome::Admitted { report_id } => report_id,
        other => panic!("expected admission, got {:?}", other),
    };
    assert!(
        harness
            .wait_for_status(&report_id, ReportStatus::Completed, Duration::from_secs(2))
            .await
    );
    // Submitted events carry no frame, so no snapshot is stored.
    let report = harness.persistence.get(&report_id).await.unwrap().unwrap();
    assert!(report.snapshot.is_none());

    // Second submission on the same device is inside the cooldown.
    assert!(matches!(
        harness.orchestrator.submit(violation_event("cam1")).await,
        Ok(AdmitOutcome::Suppressed(_))
    ));

    harness.orchestrator.stop().await.unwrap();
    assert!(matches!(
        harness.orchestrator.submit(violation_event("cam1")).await,
        Err(OrchestratorError::NotAccepting { .. })
    ));
}

#[tokio::test]
async fn test_priority_order_across_devices() {
    let mut config = TestHarness::fast_config();
    config.workers.workers = 1;
    let harness = TestHarness::new(config);
    // Submitted events carry no frame, so the caption service is skipped;
    // slow the narrative step to keep the worker busy instead.
    harness.narratives.set_latency(Duration::from_millis(400));

    let completion_order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let order_clone = Arc::clone(&completion_order);
    harness
        .orchestrator
        .register_handler(Box::new(move |event: &PipelineEvent| {
            if let PipelineEvent::ReportReady { report_id, .. } = event {
                order_clone.lock().unwrap().push(report_id.clone());
            }
            Ok(())
        }));

    harness.orchestrator.start().await.unwrap();

    let submit = |event| {
        let orchestrator = Arc::clone(&harness.orchestrator);
        async move {
            match orchestrator.submit(event).await.unwrap() {
                AdmitOutcome::Admitted { report_id } => report_id,
                other => panic!("expected admission, got {:?}", other),
            }
        }
    };

    let mut low = violation_event("cam-low");
    low.severity = helmwatch_core::detect::Severity::Low;
    let low_id = submit(low).await;

    // Wait until the single worker has the low job in flight, so everything
    // submitted next sits in the queue together.
    let start = std::time::Instant::now();
    while harness.orchestrator.status().await.workers.in_flight == 0 {
        assert!(start.elapsed() < Duration::from_secs(2), "worker never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut medium = violation_event("cam-medium");
    medium.severity = helmwatch_core::detect::Severity::Medium;
    let medium_id = submit(medium).await;
    let critical_id = submit(violation_event("cam-critical")).await;

    for id in [&low_id, &medium_id, &critical_id] {
        assert!(
            harness
                .wait_for_status(id, ReportStatus::Completed, Duration::from_secs(5))
                .await
        );
    }

    // Low went first because it was alone; of the two queued jobs, critical
    // overtakes medium regardless of submission order.
    let order = completion_order.lock().unwrap().clone();
    assert_eq!(order, vec![low_id, critical_id, medium_id]);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_handler_failures_do_not_disturb_the_pipeline() {
    let harness = TestHarness::new(TestHarness::fast_config());
    let seen = Arc::new(AtomicUsize::new(0));
    harness
        .orchestrator
        .register_handler(Box::new(|_: &PipelineEvent| {
            Err(helmwatch_core::event::HandlerError("observer down".to_string()))
        }));
    let seen_clone = Arc::clone(&seen);
    harness
        .orchestrator
        .register_handler(Box::new(move |_: &PipelineEvent| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

    harness.orchestrator.start().await.unwrap();
    assert!(harness.push_violation("cam1"));
    let ids = harness.wait_for_admitted(1, Duration::from_secs(2)).await;
    assert!(
        harness
            .wait_for_status(&ids[0], ReportStatus::Completed, Duration::from_secs(2))
            .await
    );

    let status = harness.orchestrator.status().await;
    assert!(status.handler_errors >= 1);
    assert!(seen.load(Ordering::SeqCst) >= 1);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_low_confidence_detections_are_ignored() {
    let harness = TestHarness::new(TestHarness::fast_config());
    harness.orchestrator.start().await.unwrap();

    let frame = Frame {
        device_id: "cam1".to_string(),
        captured_at: Utc::now(),
        data: vec![0xff, 0xd8],
        width: 640,
        height: 480,
    };
    let detections: Vec<Detection> = vec![
        test_detection("person", 0.9),
        test_detection("no_helmet", 0.2),
    ];
    assert!(harness.handle.push(frame, detections));
    tokio::time::sleep(Duration::from_millis(150)).await;

    let status = harness.orchestrator.status().await;
    assert_eq!(status.counters.frames_analyzed, 1);
    assert_eq!(status.counters.violations_detected, 0);

    harness.orchestrator.stop().await.unwrap();
}
