//! End-to-end tests: enqueue → admission → claim → handler → log, with real
//! processor threads where timing matters.

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use chrono::Utc;
    use serde_json::{Value, json};

    use livequeue_core::{JobStatus, LogStatus, RetryPolicy};

    use crate::{
        ActiveService, EnqueueOptions, HandlerResult, HandlerSet, InMemoryJobStore, JobOutcome,
        JobStore, PriorityTable, ProcessorConfig, QueueConfig, QueueManager, streak_final_only,
    };

    fn queue(max: usize) -> QueueManager<InMemoryJobStore> {
        QueueManager::new(
            InMemoryJobStore::arc(),
            QueueConfig::default().with_max_queue_size(max),
        )
    }

    fn fast_config() -> ProcessorConfig {
        ProcessorConfig::default()
            .with_idle_timeout(Duration::from_millis(25))
            .with_shutdown_timeout(Duration::from_secs(5))
            .with_retry_policy(RetryPolicy::exponential(Duration::ZERO, Duration::ZERO))
    }

    fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn recorder(
        seen: &Arc<Mutex<Vec<String>>>,
        label: &'static str,
    ) -> impl Fn(&Value) -> HandlerResult + Send + Sync + 'static {
        let seen = Arc::clone(seen);
        move |_| {
            seen.lock().unwrap().push(label.to_string());
            HandlerResult::Success
        }
    }

    #[test]
    fn gift_is_processed_before_chat() {
        let queue = queue(10);
        let seen = Arc::new(Mutex::new(Vec::new()));
        queue.register_handler("gift", recorder(&seen, "gift"));
        queue.register_handler("chat", recorder(&seen, "chat"));

        let gift = queue
            .enqueue("gift", json!({"giftName": "Rose"}), EnqueueOptions::default())
            .unwrap();
        let chat = queue
            .enqueue("chat", json!({"comment": "hi"}), EnqueueOptions::default())
            .unwrap();

        let handle = queue.spawn_processor(fast_config()).unwrap();
        wait_until("both jobs", || {
            queue.queue_status().unwrap().per_status.completed == 2
        });
        handle.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec!["gift", "chat"]);
        let logs = queue.recent_logs(10).unwrap();
        assert_eq!(logs.len(), 2);
        // Newest first.
        assert_eq!(logs[1].job_id, gift);
        assert_eq!(logs[0].job_id, chat);
        assert!(logs.iter().all(|l| l.status == LogStatus::Success));
    }

    #[test]
    fn claims_follow_priority_then_arrival() {
        let table = PriorityTable::new(
            HashMap::from([
                ("low".to_string(), 5),
                ("top".to_string(), 100),
                ("mid".to_string(), 20),
            ]),
            30,
        );
        let queue = QueueManager::with_priority_table(
            InMemoryJobStore::arc(),
            QueueConfig::default(),
            table,
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        queue.register_handler("low", recorder(&seen, "low"));
        queue.register_handler("top", recorder(&seen, "top"));
        queue.register_handler("mid", recorder(&seen, "mid"));

        for event_type in ["low", "top", "mid"] {
            queue.enqueue(event_type, json!({}), EnqueueOptions::default()).unwrap();
        }

        let processor = queue.processor(fast_config());
        while processor.run_once().unwrap().is_some() {}
        assert_eq!(*seen.lock().unwrap(), vec!["top", "mid", "low"]);
    }

    #[test]
    fn failing_job_is_retired_after_max_attempts() {
        let queue = queue(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        queue.register_handler("follow", move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            HandlerResult::Failure("webhook returned 503".into())
        });
        let id = queue
            .enqueue("follow", json!({}), EnqueueOptions::default().with_max_attempts(3))
            .unwrap();

        let processor = queue.processor(fast_config());
        let mut statuses = vec![queue.job(id).unwrap().unwrap().status];
        while let Some((_, outcome)) = processor.run_once().unwrap() {
            statuses.push(JobStatus::Processing);
            statuses.push(queue.job(id).unwrap().unwrap().status);
            if matches!(outcome, JobOutcome::Failed(_)) {
                break;
            }
        }

        use JobStatus::*;
        assert_eq!(
            statuses,
            vec![Pending, Processing, Pending, Processing, Pending, Processing, Failed]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(processor.run_once().unwrap(), None);

        let logs = queue.recent_logs(10).unwrap();
        assert_eq!(logs.len(), 3);
        assert!(logs[0].terminal);
        assert!(!logs[1].terminal && !logs[2].terminal);
    }

    #[test]
    fn skipped_streak_events_complete_without_retry() {
        let queue = queue(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        queue.swap_active_consumer(ActiveService::new(
            "minecraft",
            HandlerSet::new()
                .with_handler("gift", move |_| {
                    counted.fetch_add(1, Ordering::SeqCst);
                    HandlerResult::Success
                })
                .with_admission(streak_final_only()),
        ));

        let partial = queue
            .enqueue("gift", json!({"giftType": 1, "repeatEnd": false, "repeatCount": 3}), EnqueueOptions::default())
            .unwrap();
        let last = queue
            .enqueue("gift", json!({"giftType": 1, "repeatEnd": true, "repeatCount": 5}), EnqueueOptions::default())
            .unwrap();

        let processor = queue.processor(fast_config());
        while processor.run_once().unwrap().is_some() {}

        let partial = queue.job(partial).unwrap().unwrap();
        assert_eq!(partial.status, JobStatus::Completed);
        assert_eq!(partial.attempts, 1);
        assert!(partial.skip_reason.is_some());
        assert_eq!(queue.job(last).unwrap().unwrap().skip_reason, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let statuses: Vec<LogStatus> = queue
            .recent_logs(10)
            .unwrap()
            .into_iter()
            .map(|l| l.status)
            .collect();
        assert!(statuses.contains(&LogStatus::Skipped));
        assert!(statuses.contains(&LogStatus::Success));
    }

    #[test]
    fn gifts_get_in_when_the_queue_is_full() {
        let queue = queue(20);
        for i in 0..20 {
            queue.enqueue("like", json!({"i": i}), EnqueueOptions::default()).unwrap();
        }
        assert!(queue.enqueue("like", json!({}), EnqueueOptions::default()).unwrap_err().is_queue_full());

        queue
            .enqueue("gift", json!({"giftName": "Universe", "diamondCount": 34999}), EnqueueOptions::default())
            .unwrap();

        let status = queue.queue_status().unwrap();
        // 10% of 20 evicted, one gift added.
        assert_eq!(status.per_event_type.get("like"), Some(&18));
        assert_eq!(status.per_event_type.get("gift"), Some(&1));
        assert_eq!(status.current_size, 19);
    }

    #[test]
    fn concurrent_processors_handle_each_job_once() {
        let queue = queue(1000);
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let duplicates = Arc::new(AtomicUsize::new(0));
        {
            let seen = Arc::clone(&seen);
            let duplicates = Arc::clone(&duplicates);
            queue.register_handler("chat", move |payload| {
                let n = payload["n"].as_u64().unwrap_or_default();
                if !seen.lock().unwrap().insert(n) {
                    duplicates.fetch_add(1, Ordering::SeqCst);
                }
                HandlerResult::Success
            });
        }

        let handles: Vec<_> = (0..4)
            .map(|_| queue.spawn_processor(fast_config()).unwrap())
            .collect();
        for n in 0..200 {
            queue.enqueue("chat", json!({"n": n}), EnqueueOptions::default()).unwrap();
        }

        wait_until("200 completions", || {
            queue.queue_status().unwrap().per_status.completed == 200
        });
        wait_until("processor stats", || {
            handles.iter().map(|h| h.stats().jobs_processed).sum::<u64>() == 200
        });
        for handle in handles {
            assert!(handle.shutdown().drained);
        }

        assert_eq!(seen.lock().unwrap().len(), 200);
        assert_eq!(duplicates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn swap_only_affects_later_claims() {
        let queue = queue(10);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let entered_tx = Mutex::new(entered_tx);

        let old_seen = Arc::clone(&seen);
        queue.swap_active_consumer(ActiveService::new(
            "tts",
            HandlerSet::new().with_handler("chat", move |_| {
                let _ = entered_tx.lock().unwrap().send(());
                let _ = release_rx.lock().unwrap().recv();
                old_seen.lock().unwrap().push("tts".to_string());
                HandlerResult::Success
            }),
        ));

        queue.enqueue("chat", json!({"n": 1}), EnqueueOptions::default()).unwrap();
        let handle = queue.spawn_processor(fast_config()).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();

        // Swap while the first job is inside the old handler.
        queue.swap_active_consumer(ActiveService::new(
            "minecraft",
            HandlerSet::new().with_handler("chat", recorder(&seen, "minecraft")),
        ));
        queue.enqueue("chat", json!({"n": 2}), EnqueueOptions::default()).unwrap();
        release_tx.send(()).unwrap();

        wait_until("both jobs", || {
            queue.queue_status().unwrap().per_status.completed == 2
        });
        handle.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec!["tts", "minecraft"]);
    }

    #[test]
    fn stuck_jobs_are_recovered_and_reprocessed() {
        let queue = queue(10);
        let seen = Arc::new(Mutex::new(Vec::new()));
        queue.register_handler("share", recorder(&seen, "share"));
        let id = queue.enqueue("share", json!({}), EnqueueOptions::default()).unwrap();

        // A processor that crashed after claiming.
        queue.store().claim_next("crashed", Utc::now()).unwrap().unwrap();
        assert_eq!(queue.reset_stuck_jobs(0).unwrap(), 1);
        assert_eq!(queue.reset_stuck_jobs(0).unwrap(), 0);

        let processor = queue.processor(fast_config());
        let (claimed, outcome) = processor.run_once().unwrap().unwrap();
        assert_eq!(claimed, id);
        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(queue.job(id).unwrap().unwrap().attempts, 2);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn missing_handler_fails_fast_and_hurts_health() {
        let queue = queue(10);
        let id = queue.enqueue("viewerCount", json!({"viewers": 12}), EnqueueOptions::default()).unwrap();

        let processor = queue.processor(fast_config());
        processor.run_once().unwrap().unwrap();

        let job = queue.job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.last_error.unwrap().contains("No handler"));

        let health = queue.health_status().unwrap();
        assert_eq!(health.success_rate, 0.0);
        assert_eq!(health.status, crate::HealthLevel::Critical);

        queue.retry_failed(id).unwrap();
        queue.register_handler("*", |_| HandlerResult::Success);
        let (_, outcome) = processor.run_once().unwrap().unwrap();
        assert_eq!(outcome, JobOutcome::Completed);
    }

    #[test]
    fn idle_processor_wakes_promptly_on_enqueue() {
        let queue = queue(10);
        let seen = Arc::new(Mutex::new(Vec::new()));
        queue.register_handler("chat", recorder(&seen, "chat"));

        // Long idle timeout: only the wake signal can make this fast.
        let handle = queue
            .spawn_processor(fast_config().with_idle_timeout(Duration::from_secs(30)))
            .unwrap();
        wait_until("processor idle", || {
            handle.state() == crate::ProcessorState::Idle
        });
        // Let it park in the wait itself.
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        queue.enqueue("chat", json!({}), EnqueueOptions::default()).unwrap();
        wait_until("chat handled", || !seen.lock().unwrap().is_empty());
        assert!(started.elapsed() < Duration::from_secs(10));

        let report = handle.shutdown();
        assert!(report.drained);
    }
}
