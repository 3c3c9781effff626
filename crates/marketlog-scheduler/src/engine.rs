use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use dashmap::DashMap;
use futures_util::FutureExt;
use marketlog_core::TaskError;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    error::{Result, SchedulerError},
    schedule::next_fire,
    types::{Cadence, JobSnapshot, JobSpec, JobStatus, TaskContext},
};

/// Default dispatch resolution. Cadences are minutes to days, so one second is plenty.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub tick: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self { tick: DEFAULT_TICK }
    }
}

/// Scheduler-owned mutable state of one job.
#[derive(Debug)]
struct ExecutionState {
    cadence: Cadence,
    enabled: bool,
    running: bool,
    last_fired: Option<DateTime<Local>>,
    next_fire: Option<DateTime<Local>>,
    consecutive_failures: u32,
    total_runs: u64,
    total_failures: u64,
    dropped_ticks: u64,
    last_error: Option<String>,
}

impl ExecutionState {
    fn to_snapshot(&self, name: &str) -> JobSnapshot {
        let status = if !self.enabled {
            JobStatus::Disabled
        } else if self.running {
            JobStatus::Running
        } else {
            JobStatus::Idle
        };
        JobSnapshot {
            name: name.to_string(),
            cadence: self.cadence.clone(),
            status,
            last_fired: self.last_fired,
            next_fire: self.next_fire,
            consecutive_failures: self.consecutive_failures,
            total_runs: self.total_runs,
            total_failures: self.total_failures,
            dropped_ticks: self.dropped_ticks,
            last_error: self.last_error.clone(),
        }
    }
}

type States = Arc<DashMap<String, ExecutionState>>;

/// Cloneable handle for observing and stopping a scheduler while it runs.
#[derive(Clone)]
pub struct SchedulerHandle {
    states: States,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SchedulerHandle {
    /// Stop dispatching new runs. [`Scheduler::run`] returns once every
    /// in-flight run has finished.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// State of every registered job, ordered by name.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<_> = self
            .states
            .iter()
            .map(|e| e.value().to_snapshot(e.key()))
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    pub fn job(&self, name: &str) -> Option<JobSnapshot> {
        self.states.get(name).map(|s| s.to_snapshot(name))
    }
}

/// Drives every registered job at its cadence.
pub struct Scheduler {
    jobs: HashMap<String, JobSpec>,
    states: States,
    clock: Arc<dyn Clock>,
    tick: Duration,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Scheduler {
    pub fn new(options: SchedulerOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    pub fn with_clock(options: SchedulerOptions, clock: Arc<dyn Clock>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            jobs: HashMap::new(),
            states: Arc::new(DashMap::new()),
            clock,
            tick: options.tick,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Register a job. Names must be unique and cadences valid.
    ///
    /// The first fire is "now" when `run_on_start` is set, otherwise one
    /// cadence from now. Disabled jobs are tracked but never fire.
    pub fn register(&mut self, job: JobSpec) -> Result<()> {
        job.cadence.validate()?;
        if self.jobs.contains_key(&job.name) {
            return Err(SchedulerError::DuplicateJob { name: job.name });
        }

        let now = self.clock.now();
        let first = match (job.enabled, job.run_on_start) {
            (false, _) => None,
            (true, true) => Some(now),
            (true, false) => next_fire(&job.cadence, &now),
        };

        info!(
            job = %job.name,
            cadence = %job.cadence,
            enabled = job.enabled,
            first_fire = ?first,
            "job registered"
        );

        self.states.insert(
            job.name.clone(),
            ExecutionState {
                cadence: job.cadence.clone(),
                enabled: job.enabled,
                running: false,
                last_fired: None,
                next_fire: first,
                consecutive_failures: 0,
                total_runs: 0,
                total_failures: 0,
                dropped_ticks: 0,
                last_error: None,
            },
        );
        self.jobs.insert(job.name.clone(), job);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            states: Arc::clone(&self.states),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Main event loop. Ticks until [`SchedulerHandle::shutdown`] is called,
    /// then waits for in-flight runs to finish.
    pub async fn run(self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut inflight: JoinSet<()> = JoinSet::new();

        // Sorted next-fire index; the name breaks ties between equal instants.
        let mut due_index: BTreeSet<(DateTime<Local>, String)> = self
            .states
            .iter()
            .filter_map(|e| e.value().next_fire.map(|t| (t, e.key().clone())))
            .collect();

        info!(jobs = self.jobs.len(), tick_ms = self.tick.as_millis() as u64, "scheduler started");

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        if !*shutdown.borrow_and_update() {
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.dispatch_due(&mut due_index, &mut inflight, &shutdown);
                    }
                    Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                        if let Err(e) = joined {
                            error!("job task aborted: {e}");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }

        info!(in_flight = inflight.len(), "scheduler shutting down; draining in-flight jobs");
        while let Some(joined) = inflight.join_next().await {
            if let Err(e) = joined {
                error!("job task aborted: {e}");
            }
        }
        info!("scheduler stopped");
    }

    /// Dispatch every job whose next fire time has arrived. Never awaits.
    fn dispatch_due(
        &self,
        due_index: &mut BTreeSet<(DateTime<Local>, String)>,
        inflight: &mut JoinSet<()>,
        shutdown: &watch::Receiver<bool>,
    ) {
        let now = self.clock.now();

        while due_index.first().is_some_and(|(at, _)| *at <= now) {
            let Some((_, name)) = due_index.pop_first() else {
                break;
            };
            let Some(job) = self.jobs.get(&name) else {
                continue;
            };

            // The schedule is fixed at dispatch time: slow or failing runs never shift it.
            let next = next_fire(&job.cadence, &now);
            let launch = {
                let Some(mut state) = self.states.get_mut(&name) else {
                    continue;
                };
                state.next_fire = next;
                if state.running {
                    state.dropped_ticks += 1;
                    false
                } else {
                    state.running = true;
                    state.last_fired = Some(now);
                    state.total_runs += 1;
                    true
                }
            };
            match next {
                Some(next) => {
                    due_index.insert((next, name.clone()));
                }
                None => warn!(
                    job = %name,
                    cadence = %job.cadence,
                    "no representable next fire; job retired"
                ),
            }

            if !launch {
                debug!(job = %name, next_fire = ?next, "previous run still in flight; tick dropped");
                continue;
            }

            debug!(job = %name, next_fire = ?next, "dispatching job");
            let task = Arc::clone(&job.task);
            let states = Arc::clone(&self.states);
            let ctx = TaskContext::new(&name, now, shutdown.clone());
            inflight.spawn(async move {
                let started = Instant::now();
                let outcome = AssertUnwindSafe(task.execute(&ctx))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic.as_ref()))));
                complete(&states, &ctx, outcome, started.elapsed());
            });
        }
    }
}

/// Completion path of a run: back to Idle and record the outcome.
fn complete(
    states: &DashMap<String, ExecutionState>,
    ctx: &TaskContext,
    outcome: std::result::Result<usize, TaskError>,
    elapsed: Duration,
) {
    let Some(mut state) = states.get_mut(&ctx.job) else {
        return;
    };
    state.running = false;
    let duration_ms = elapsed.as_millis() as u64;

    match outcome {
        Ok(items) => {
            state.consecutive_failures = 0;
            state.last_error = None;
            info!(job = %ctx.job, run = %ctx.run_id, items, duration_ms, "job completed");
        }
        Err(e) => {
            state.consecutive_failures += 1;
            state.total_failures += 1;
            warn!(
                job = %ctx.job,
                run = %ctx.run_id,
                code = e.code(),
                consecutive_failures = state.consecutive_failures,
                duration_ms,
                "job failed: {e}"
            );
            state.last_error = Some(e.to_string());
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
