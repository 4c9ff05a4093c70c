use anyhow::Result;
use replica_coordination::log::session::SessionLog;
use replica_coordination::log::types::{ClientCapabilities, ClientRecord, LogEvent};
use replica_coordination::scheduler::scheduler::AgentScheduler;
use replica_coordination::scheduler::types::{worker, TaskId, TaskNotification};
use replica_coordination::summary::manager::{
    SummarizerFactory, SummarizerHandle, SummaryConfig, SummaryManager, SummaryNotification,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{oneshot, watch};

/// Demo summarizer: ticks until its stop signal fires.
struct DemoSummarizerFactory;

impl SummarizerFactory for DemoSummarizerFactory {
    fn create(&self) -> Pin<Box<dyn Future<Output = Result<SummarizerHandle>> + Send>> {
        Box::pin(async {
            let (stop_tx, mut stop_rx) = watch::channel(false);
            let (done_tx, done_rx) = oneshot::channel();

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(200));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => tracing::info!("Summarizer heartbeat"),
                        _ = stop_rx.changed() => break,
                    }
                }
                let _ = done_tx.send(Ok(()));
            });

            Ok(SummarizerHandle {
                stop: stop_tx,
                done: done_rx,
            })
        })
    }
}

struct Replica {
    record: ClientRecord,
    scheduler: AgentScheduler,
    events: UnboundedReceiver<LogEvent>,
    task_notes: UnboundedReceiver<TaskNotification>,
    summary: Arc<SummaryManager>,
    summary_notes: UnboundedReceiver<SummaryNotification>,
}

fn spawn_replica(log: &Arc<SessionLog>) -> Replica {
    let (record, events) = log.join(ClientCapabilities::interactive());

    let (mut scheduler, task_notes) = AgentScheduler::new(log.clone(), &record);
    scheduler.set_connected();

    let config = SummaryConfig {
        grace_delay: Duration::from_millis(200),
        initial_ops_threshold: 0,
        throttle_base_delay: Duration::ZERO,
        ..SummaryConfig::default()
    };
    let (summary, summary_notes) = SummaryManager::new(
        record.capabilities,
        config,
        Arc::new(DemoSummarizerFactory),
    );

    Replica {
        record,
        scheduler,
        events,
        task_notes,
        summary,
        summary_notes,
    }
}

/// Pumps every replica's pending log events, in order, until nobody makes
/// progress. Each replica consumes the identical total order.
async fn settle(replicas: &mut [Replica]) {
    loop {
        let mut progressed = false;
        for replica in replicas.iter_mut() {
            while let Ok(event) = replica.events.try_recv() {
                replica.scheduler.handle_event(&event);
                replica.summary.handle_event(&event).await;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
}

async fn report(replicas: &mut [Replica]) {
    for replica in replicas.iter_mut() {
        while let Ok(note) = replica.task_notes.try_recv() {
            tracing::info!("[{}] task notification: {:?}", replica.record.id, note);
        }
        while let Ok(note) = replica.summary_notes.try_recv() {
            tracing::info!("[{}] summary notification: {:?}", replica.record.id, note);
        }

        tracing::info!(
            "[{}] seq={} running={:?} elected={:?} lifecycle={:?}",
            replica.record.id,
            replica.record.join_sequence,
            replica.scheduler.picked_tasks(),
            replica.summary.elected_role_holder().await,
            replica.summary.state().await,
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut replica_count: usize = 3;
    let mut task_count: usize = 4;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--replicas" => {
                replica_count = args[i + 1].parse()?;
                i += 2;
            }
            "--tasks" => {
                task_count = args[i + 1].parse()?;
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    tracing::info!(
        "Starting session with {} replicas and {} tasks",
        replica_count,
        task_count
    );

    let log = Arc::new(SessionLog::new());
    let mut replicas: Vec<Replica> = (0..replica_count).map(|_| spawn_replica(&log)).collect();

    let tasks: Vec<TaskId> = (0..task_count)
        .map(|n| TaskId(format!("task-{}", n)))
        .collect();

    // Every replica announces every task and volunteers for all of them; the
    // log's order decides who actually gets what.
    for replica in replicas.iter_mut() {
        replica.scheduler.register(&tasks)?;
        for task in &tasks {
            let name = task.clone();
            replica.scheduler.pick(
                task,
                worker(move || {
                    let name = name.clone();
                    async move {
                        tracing::info!("Working on '{}'", name);
                        Ok(())
                    }
                }),
            )?;
        }
    }

    settle(&mut replicas).await;
    // Let grace delays pass and the elected replica spawn its summarizer.
    tokio::time::sleep(Duration::from_millis(600)).await;
    tracing::info!("--- converged ---");
    report(&mut replicas).await;

    // Crash the first replica out of the quorum: its claims are orphaned and
    // the election moves, so the survivors self-heal both.
    let crashed = replicas.remove(0);
    crashed.summary.dispose().await;
    log.leave(&crashed.record.id);
    tracing::info!("--- {} crashed ---", crashed.record.id);

    settle(&mut replicas).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    tracing::info!("--- re-converged ---");
    report(&mut replicas).await;

    for replica in replicas.iter() {
        replica.summary.dispose().await;
    }

    Ok(())
}
