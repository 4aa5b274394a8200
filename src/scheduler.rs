//! Cooperative task scheduler
//!
//! Tasks run one at a time in registration order. A task is due when its
//! interval has elapsed since its last run. Alert-producing runs are
//! followed by the task's cool-down; a failed or panicking run is logged,
//! followed by a fixed backoff, and the rest of that tick is skipped.

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Result of one successful task run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOutcome {
    pub alerts_posted: usize,
}

impl TaskOutcome {
    pub fn posted(alerts_posted: usize) -> Self {
        Self { alerts_posted }
    }
}

/// A unit of periodic work
#[async_trait]
pub trait ScheduledTask: Send {
    fn name(&self) -> &str;

    async fn run(&mut self) -> anyhow::Result<TaskOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    CoolDown,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Running => "running",
            SchedulerState::CoolDown => "cool_down",
        };
        f.write_str(s)
    }
}

/// Per-task counters
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStats {
    pub name: String,
    pub interval: Duration,
    pub runs: u64,
    pub failures: u64,
    pub alerts_posted: u64,
}

struct Entry {
    task: Box<dyn ScheduledTask>,
    interval: Duration,
    cool_down: Duration,
    last_run: Option<Instant>,
    stats: TaskStats,
}

pub struct Scheduler {
    entries: Vec<Entry>,
    tick: Duration,
    failure_backoff: Duration,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(tick: Duration, failure_backoff: Duration) -> Self {
        Self {
            entries: Vec::new(),
            tick,
            failure_backoff,
            state: SchedulerState::Idle,
        }
    }

    /// Register a task; tasks are evaluated in registration order
    pub fn add_task(
        &mut self,
        task: Box<dyn ScheduledTask>,
        interval: Duration,
        cool_down: Duration,
    ) -> &mut Self {
        let stats = TaskStats {
            name: task.name().to_string(),
            interval,
            runs: 0,
            failures: 0,
            alerts_posted: 0,
        };
        self.entries.push(Entry {
            task,
            interval,
            cool_down,
            last_run: None,
            stats,
        });
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> Vec<TaskStats> {
        self.entries.iter().map(|e| e.stats.clone()).collect()
    }

    /// Run forever
    pub async fn run(&mut self) {
        self.start();
        loop {
            self.tick().await;
            tokio::time::sleep(self.tick).await;
        }
    }

    /// Run until the clock passes `deadline`
    pub async fn run_until(&mut self, deadline: Instant) {
        self.start();
        while Instant::now() <= deadline {
            self.tick().await;
            tokio::time::sleep(self.tick).await;
        }
    }

    /// Intervals count from scheduler start, so no task runs immediately
    fn start(&mut self) {
        let now = Instant::now();
        for entry in &mut self.entries {
            entry.last_run.get_or_insert(now);
        }
        info!(
            "Scheduler started with {} tasks (tick {}s)",
            self.entries.len(),
            self.tick.as_secs()
        );
    }

    /// Evaluate every task once against a single `now`
    pub async fn tick(&mut self) {
        let now = Instant::now();

        for entry in self.entries.iter_mut() {
            let last_run = *entry.last_run.get_or_insert(now);
            if now.duration_since(last_run) < entry.interval {
                continue;
            }

            self.state = SchedulerState::Running;
            debug!(task = %entry.stats.name, "Running task");
            let result = AssertUnwindSafe(entry.task.run()).catch_unwind().await;
            entry.last_run = Some(now);

            let failure = match result {
                Ok(Ok(outcome)) => {
                    entry.stats.runs += 1;
                    entry.stats.alerts_posted += outcome.alerts_posted as u64;
                    if outcome.alerts_posted > 0 && !entry.cool_down.is_zero() {
                        self.state = SchedulerState::CoolDown;
                        info!(
                            task = %entry.stats.name,
                            alerts = outcome.alerts_posted,
                            "Cooling down for {}s",
                            entry.cool_down.as_secs()
                        );
                        tokio::time::sleep(entry.cool_down).await;
                    }
                    self.state = SchedulerState::Idle;
                    None
                }
                Ok(Err(e)) => Some(format!("{:#}", e)),
                Err(panic) => Some(format!("panicked: {}", panic_message(&panic))),
            };

            if let Some(reason) = failure {
                entry.stats.failures += 1;
                error!(
                    task = %entry.stats.name,
                    "Task failed: {}; backing off {}s",
                    reason,
                    self.failure_backoff.as_secs()
                );
                tokio::time::sleep(self.failure_backoff).await;
                self.state = SchedulerState::Idle;
                return;
            }
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<(String, Duration)>>>;

    enum Behavior {
        Ok(usize),
        Fail,
        Panic,
    }

    /// Records its run instants; `behaviors` are consumed one per run,
    /// the last one repeating
    struct RecordingTask {
        name: String,
        start: Instant,
        log: Log,
        busy: Arc<AtomicBool>,
        behaviors: Vec<Behavior>,
        work: Duration,
    }

    impl RecordingTask {
        fn new(name: &str, start: Instant, log: &Log, busy: &Arc<AtomicBool>) -> Self {
            Self {
                name: name.to_string(),
                start,
                log: log.clone(),
                busy: busy.clone(),
                behaviors: vec![Behavior::Ok(0)],
                work: Duration::ZERO,
            }
        }

        fn behaving(mut self, behaviors: Vec<Behavior>) -> Self {
            self.behaviors = behaviors;
            self
        }

        fn working(mut self, work: Duration) -> Self {
            self.work = work;
            self
        }
    }

    #[async_trait]
    impl ScheduledTask for RecordingTask {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(&mut self) -> anyhow::Result<TaskOutcome> {
            assert!(!self.busy.swap(true, Ordering::SeqCst), "tasks overlapped");
            self.log
                .lock()
                .unwrap()
                .push((self.name.clone(), self.start.elapsed()));
            tokio::time::sleep(self.work).await;
            self.busy.store(false, Ordering::SeqCst);

            let behavior = if self.behaviors.len() > 1 {
                self.behaviors.remove(0)
            } else {
                match self.behaviors.first() {
                    Some(Behavior::Ok(n)) => Behavior::Ok(*n),
                    Some(Behavior::Fail) => Behavior::Fail,
                    Some(Behavior::Panic) | None => Behavior::Panic,
                }
            };
            match behavior {
                Behavior::Ok(n) => Ok(TaskOutcome::posted(n)),
                Behavior::Fail => anyhow::bail!("provider unreachable"),
                Behavior::Panic => panic!("task blew up"),
            }
        }
    }

    fn runs_of(log: &Log, name: &str) -> Vec<u64> {
        log.lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, at)| at.as_secs())
            .collect()
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fairness() {
        let start = Instant::now();
        let log = Log::default();
        let busy = Arc::new(AtomicBool::new(false));

        let mut scheduler = Scheduler::new(secs(15), secs(30));
        scheduler
            .add_task(Box::new(RecordingTask::new("a", start, &log, &busy)), secs(900), secs(0))
            .add_task(Box::new(RecordingTask::new("b", start, &log, &busy)), secs(900), secs(0))
            .add_task(Box::new(RecordingTask::new("c", start, &log, &busy)), secs(300), secs(0));

        scheduler.run_until(start + secs(900)).await;

        assert_eq!(runs_of(&log, "c"), vec![300, 600, 900]);
        assert_eq!(runs_of(&log, "a"), vec![900]);
        assert_eq!(runs_of(&log, "b"), vec![900]);

        let order: Vec<String> = log.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(order, vec!["c", "c", "a", "b", "c"]);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_task_delays_others() {
        let start = Instant::now();
        let log = Log::default();
        let busy = Arc::new(AtomicBool::new(false));

        let mut scheduler = Scheduler::new(secs(15), secs(30));
        scheduler
            .add_task(
                Box::new(RecordingTask::new("slow", start, &log, &busy).working(secs(100))),
                secs(300),
                secs(0),
            )
            .add_task(Box::new(RecordingTask::new("fast", start, &log, &busy)), secs(300), secs(0));

        scheduler.run_until(start + secs(450)).await;

        assert_eq!(runs_of(&log, "slow"), vec![300]);
        assert_eq!(runs_of(&log, "fast"), vec![400]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cool_down_only_after_alerts() {
        let start = Instant::now();
        let log = Log::default();
        let busy = Arc::new(AtomicBool::new(false));

        let mut scheduler = Scheduler::new(secs(15), secs(30));
        scheduler
            .add_task(
                Box::new(
                    RecordingTask::new("price", start, &log, &busy)
                        .behaving(vec![Behavior::Ok(1), Behavior::Ok(0)]),
                ),
                secs(300),
                secs(120),
            )
            .add_task(Box::new(RecordingTask::new("scan", start, &log, &busy)), secs(300), secs(0));

        scheduler.run_until(start + secs(600)).await;

        // First price run posted, so scan waits out the cool-down
        assert_eq!(runs_of(&log, "price"), vec![300, 600]);
        // Second price run posted nothing, so scan follows immediately
        assert_eq!(runs_of(&log, "scan"), vec![420, 600]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_backs_off_and_skips_rest_of_tick() {
        let start = Instant::now();
        let log = Log::default();
        let busy = Arc::new(AtomicBool::new(false));

        let mut scheduler = Scheduler::new(secs(15), secs(30));
        scheduler
            .add_task(
                Box::new(
                    RecordingTask::new("flaky", start, &log, &busy)
                        .behaving(vec![Behavior::Fail, Behavior::Ok(0)]),
                ),
                secs(300),
                secs(0),
            )
            .add_task(Box::new(RecordingTask::new("next", start, &log, &busy)), secs(300), secs(0));

        scheduler.run_until(start + secs(600)).await;

        // Failed run still counts as a run for scheduling
        assert_eq!(runs_of(&log, "flaky"), vec![300, 600]);
        // Skipped at 300, picked up on the first tick after the backoff
        assert_eq!(runs_of(&log, "next"), vec![345]);

        let stats = scheduler.stats();
        assert_eq!(stats[0].failures, 1);
        assert_eq!(stats[0].runs, 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_contained() {
        let start = Instant::now();
        let log = Log::default();
        let busy = Arc::new(AtomicBool::new(false));

        let mut scheduler = Scheduler::new(secs(15), secs(30));
        scheduler.add_task(
            Box::new(RecordingTask::new("boom", start, &log, &busy).behaving(vec![Behavior::Panic])),
            secs(300),
            secs(0),
        );

        scheduler.run_until(start + secs(600)).await;

        assert_eq!(runs_of(&log, "boom"), vec![300, 600]);
        assert_eq!(scheduler.stats()[0].failures, 2);
    }
}
