use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task;
use tracing::{error, info, warn};

use livequeue_engine::{EnqueueOptions, HealthLevel, InMemoryJobStore, JobStore, QueueManager};
use livequeue_infra::PostgresJobStore;
use livequeue_worker::{WorkerSettings, handlers};

type Manager = QueueManager<dyn JobStore>;

#[tokio::main]
async fn main() -> Result<()> {
    livequeue_observability::init_from_env();

    let settings = WorkerSettings::from_env()?;
    let store = open_store(&settings).await?;
    let manager: Arc<Manager> = Arc::new(QueueManager::new(store, settings.queue.clone()));
    manager.swap_active_consumer(handlers::demo_service());

    let mut processors = Vec::with_capacity(settings.processors);
    for _ in 0..settings.processors {
        let handle = manager
            .spawn_processor(settings.processor.clone())
            .context("failed to spawn processor thread")?;
        processors.push(handle);
    }
    info!(
        processors = processors.len(),
        persistent = settings.database_url.is_some(),
        max_queue_size = settings.queue.max_queue_size,
        "worker started"
    );

    if settings.demo_events > 0 {
        let manager = Arc::clone(&manager);
        let n = settings.demo_events;
        task::spawn_blocking(move || enqueue_demo_events(&manager, n))
            .await
            .context("demo enqueue task panicked")?;
    }

    let sweeper = tokio::spawn(sweep_loop(
        Arc::clone(&manager),
        settings.sweep_interval,
        settings.stuck_timeout_minutes,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested; draining processors");
    sweeper.abort();

    // Drain all processors in parallel; each waits up to its shutdown timeout.
    let drains: Vec<_> = processors
        .into_iter()
        .map(|processor| {
            task::spawn_blocking(move || {
                let name = processor.name().to_string();
                (name, processor.shutdown())
            })
        })
        .collect();
    for drain in drains {
        let (name, report) = drain.await.context("processor shutdown task panicked")?;
        if !report.drained {
            warn!(processor = %name, "in-flight job did not finish before the shutdown timeout");
        }
        info!(processor = %name, reset_jobs = report.reset_jobs, "processor stopped");
    }

    info!("worker stopped");
    Ok(())
}

async fn open_store(settings: &WorkerSettings) -> Result<Arc<dyn JobStore>> {
    match &settings.database_url {
        Some(url) => {
            let store = PostgresJobStore::connect(url)
                .await
                .context("failed to connect to postgres")?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; jobs are kept in memory only");
            Ok(Arc::new(InMemoryJobStore::new()))
        }
    }
}

fn enqueue_demo_events(manager: &Manager, n: usize) {
    let mut accepted = 0;
    for (event_type, payload) in handlers::demo_events(n) {
        match manager.enqueue(event_type, payload, EnqueueOptions::default()) {
            Ok(_) => accepted += 1,
            Err(e) => warn!(event_type, error = %e, "demo event not enqueued"),
        }
    }
    info!(requested = n, accepted, "demo events enqueued");
}

/// Periodically hand stuck jobs back to the queue and report health.
async fn sweep_loop(manager: Arc<Manager>, every: Duration, stuck_timeout_minutes: u32) {
    let mut ticker = tokio::time::interval(every);
    // The first tick fires immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let manager = Arc::clone(&manager);
        let swept = task::spawn_blocking(move || {
            let reset = manager.reset_stuck_jobs(stuck_timeout_minutes)?;
            let health = manager.health_status()?;
            Ok::<_, livequeue_engine::QueueError>((reset, health))
        })
        .await;

        match swept {
            Ok(Ok((reset, health))) => {
                if reset > 0 {
                    info!(reset, "stuck jobs returned to the queue");
                }
                if health.status == HealthLevel::Healthy {
                    info!(
                        utilization = health.utilization_percent,
                        success_rate = health.success_rate,
                        "queue healthy"
                    );
                } else {
                    warn!(
                        status = %health.status,
                        issues = ?health.issues,
                        utilization = health.utilization_percent,
                        success_rate = health.success_rate,
                        "queue degraded"
                    );
                }
            }
            Ok(Err(e)) => error!(error = %e, "maintenance sweep failed"),
            Err(e) => error!(error = %e, "maintenance sweep task panicked"),
        }
    }
}
