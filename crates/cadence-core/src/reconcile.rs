use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::GenerationConfig;
use crate::error::{CoreError, ReconciliationError};
use crate::generator::InstanceGenerator;
use crate::models::{GeneratedInstance, RecurringTask, Task, TaskRecurringLink};

/// The storage operations reconciliation needs, and nothing more.
#[async_trait]
pub trait GenerationStore: Send + Sync {
    async fn load_active_recurring_tasks(&self) -> Result<Vec<RecurringTask>, CoreError>;
    async fn load_links(&self, recurring_task_id: Uuid) -> Result<Vec<TaskRecurringLink>, CoreError>;
    async fn load_task(&self, task_id: Uuid) -> Result<Option<Task>, CoreError>;
    /// Persists the task and its link as one unit.
    async fn save_generated(&self, instance: &GeneratedInstance) -> Result<(), CoreError>;
}

/// Outcome of one reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationSummary {
    /// New instances persisted
    pub generated_count: usize,
    /// Active recurring tasks looked at
    pub processed_count: usize,
    pub error_count: usize,
    pub errors: Vec<ReconciliationError>,
}

impl ReconciliationSummary {
    pub fn is_clean(&self) -> bool {
        self.error_count == 0
    }

    fn record_error(&mut self, recurring_task_id: Option<Uuid>, err: &CoreError) {
        self.error_count += 1;
        self.errors.push(ReconciliationError {
            recurring_task_id,
            message: describe(err),
        });
    }
}

fn describe(err: &CoreError) -> String {
    match std::error::Error::source(err) {
        Some(source) => format!("{}: {}", err, source),
        None => err.to_string(),
    }
}

/// Due dates already taken by linked instances of one recurring task.
///
/// Timestamps are bucketed by the tolerance width, so a lookup only inspects
/// the candidate's bucket and its two neighbours.
#[derive(Debug)]
struct CoveredSlots {
    tolerance_ms: i64,
    buckets: HashMap<i64, Vec<i64>>,
}

impl CoveredSlots {
    fn new(tolerance: Duration) -> Self {
        Self {
            tolerance_ms: tolerance.num_milliseconds().max(1),
            buckets: HashMap::new(),
        }
    }

    fn insert(&mut self, at: DateTime<Utc>) {
        let ms = at.timestamp_millis();
        self.buckets.entry(ms.div_euclid(self.tolerance_ms)).or_default().push(ms);
    }

    fn covers(&self, at: DateTime<Utc>) -> bool {
        let ms = at.timestamp_millis();
        let bucket = ms.div_euclid(self.tolerance_ms);
        (bucket - 1..=bucket + 1)
            .filter_map(|b| self.buckets.get(&b))
            .flatten()
            .any(|covered| (covered - ms).abs() < self.tolerance_ms)
    }
}

/// Extends every active recurring task up to the advance horizon.
///
/// Failures are isolated per recurring task and reported in the summary; a run
/// never aborts part-way because one definition is broken.
#[derive(Debug, Clone, Default)]
pub struct BatchReconciler {
    generator: InstanceGenerator,
}

impl BatchReconciler {
    pub fn new(config: GenerationConfig) -> Self {
        Self {
            generator: InstanceGenerator::new(config),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(GenerationConfig::default())
    }

    pub fn config(&self) -> &GenerationConfig {
        self.generator.config()
    }

    /// Reconciles all active recurring tasks found in `store`.
    pub async fn reconcile_all<S>(&self, store: &S, now: DateTime<Utc>) -> ReconciliationSummary
    where
        S: GenerationStore + ?Sized,
    {
        match store.load_active_recurring_tasks().await {
            Ok(active) => self.reconcile(store, &active, now).await,
            Err(err) => {
                warn!(error = %err, "failed to load active recurring tasks");
                let mut summary = ReconciliationSummary::default();
                summary.record_error(None, &err);
                summary
            }
        }
    }

    /// Reconciles the given recurring tasks, which the caller has already
    /// filtered to the active ones.
    ///
    /// # Behavior
    ///
    /// Recurring tasks are processed one after another. For each, new instances
    /// are written one at a time, each checked against the slots already covered.
    pub async fn reconcile<S>(
        &self,
        store: &S,
        recurring_tasks: &[RecurringTask],
        now: DateTime<Utc>,
    ) -> ReconciliationSummary
    where
        S: GenerationStore + ?Sized,
    {
        let mut summary = ReconciliationSummary {
            processed_count: recurring_tasks.len(),
            ..Default::default()
        };

        for recurring_task in recurring_tasks {
            match self.reconcile_one(store, recurring_task, now).await {
                Ok(generated) => summary.generated_count += generated,
                Err(err) => {
                    warn!(recurring_task_id = %recurring_task.id, error = %err, "reconciliation failed");
                    summary.record_error(Some(recurring_task.id), &err);
                }
            }
        }

        info!(
            processed = summary.processed_count,
            generated = summary.generated_count,
            errors = summary.error_count,
            "reconciliation finished"
        );
        summary
    }

    #[instrument(level = "debug", skip_all, fields(recurring_task_id = %recurring_task.id))]
    async fn reconcile_one<S>(
        &self,
        store: &S,
        recurring_task: &RecurringTask,
        now: DateTime<Utc>,
    ) -> Result<usize, CoreError>
    where
        S: GenerationStore + ?Sized,
    {
        let links = store.load_links(recurring_task.id).await?;

        let mut covered = CoveredSlots::new(self.config().duplicate_tolerance());
        let mut latest_open_due: Option<DateTime<Utc>> = None;
        for link in &links {
            let Some(task) = store.load_task(link.task_id).await? else {
                continue;
            };
            let Some(due) = task.due_at else {
                continue;
            };
            covered.insert(due);
            if task.status.is_open() && latest_open_due.map_or(true, |latest| due > latest) {
                latest_open_due = Some(due);
            }
        }

        // The latest open instance occupies the resume point itself, whatever the
        // tolerance, so the walk starts one step past it.
        let mut cursor = match latest_open_due {
            Some(latest) => {
                let resume = latest
                    .checked_add_signed(Duration::milliseconds(1))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                let next = self.generator.step(resume, recurring_task);
                if next <= resume {
                    debug!("step does not advance past the latest open instance");
                    return Ok(0);
                }
                next
            }
            None => recurring_task.start_date,
        };
        let end = self.generator.effective_end(recurring_task, now);
        if cursor > end {
            debug!("already generated up to the end");
            return Ok(0);
        }

        let mut generated = 0;
        while cursor <= end {
            if covered.covers(cursor) {
                debug!(%cursor, "slot already covered");
            } else {
                let instance = InstanceGenerator::instance_for(recurring_task, cursor, now);
                store.save_generated(&instance).await?;
                covered.insert(cursor);
                generated += 1;
            }
            let next = self.generator.step(cursor, recurring_task);
            if next <= cursor {
                break;
            }
            cursor = next;
        }

        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Interval, RecurringTaskStatus, TaskStatus};
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn recurring(start: DateTime<Utc>, end: Option<DateTime<Utc>>, intervals: Vec<Interval>) -> RecurringTask {
        RecurringTask {
            title: "Standup".to_string(),
            start_date: start,
            end_date: end,
            intervals,
            status: RecurringTaskStatus::Active,
            ..Default::default()
        }
    }

    /// In-memory store with switchable failures.
    #[derive(Default)]
    struct FakeStore {
        recurring: Mutex<Vec<RecurringTask>>,
        tasks: Mutex<HashMap<Uuid, Task>>,
        links: Mutex<Vec<TaskRecurringLink>>,
        fail_active: bool,
        fail_links_for: HashSet<Uuid>,
        fail_save_for: HashSet<Uuid>,
    }

    impl FakeStore {
        fn with(recurring: Vec<RecurringTask>) -> Self {
            Self {
                recurring: Mutex::new(recurring),
                ..Default::default()
            }
        }

        fn seed(&self, instance: GeneratedInstance) {
            self.tasks.lock().unwrap().insert(instance.task.id, instance.task);
            self.links.lock().unwrap().push(instance.link);
        }

        fn due_dates(&self, recurring_task_id: Uuid) -> Vec<DateTime<Utc>> {
            let links = self.links.lock().unwrap();
            let mut dates: Vec<_> = links
                .iter()
                .filter(|l| l.recurring_task_id == recurring_task_id)
                .map(|l| l.original_generated_date)
                .collect();
            dates.sort();
            dates
        }

        fn set_status(&self, task_id: Uuid, status: TaskStatus) {
            if let Some(task) = self.tasks.lock().unwrap().get_mut(&task_id) {
                task.status = status;
            }
        }
    }

    #[async_trait]
    impl GenerationStore for FakeStore {
        async fn load_active_recurring_tasks(&self) -> Result<Vec<RecurringTask>, CoreError> {
            if self.fail_active {
                return Err(CoreError::InvalidInput("store offline".to_string()));
            }
            Ok(self.recurring.lock().unwrap().iter().filter(|r| r.is_active()).cloned().collect())
        }

        async fn load_links(&self, recurring_task_id: Uuid) -> Result<Vec<TaskRecurringLink>, CoreError> {
            if self.fail_links_for.contains(&recurring_task_id) {
                return Err(CoreError::NotFound(format!("links for {}", recurring_task_id)));
            }
            Ok(self
                .links
                .lock()
                .unwrap()
                .iter()
                .filter(|l| l.recurring_task_id == recurring_task_id)
                .cloned()
                .collect())
        }

        async fn load_task(&self, task_id: Uuid) -> Result<Option<Task>, CoreError> {
            Ok(self.tasks.lock().unwrap().get(&task_id).cloned())
        }

        async fn save_generated(&self, instance: &GeneratedInstance) -> Result<(), CoreError> {
            if self.fail_save_for.contains(&instance.link.recurring_task_id) {
                return Err(CoreError::InvalidInput("disk full".to_string()));
            }
            self.seed(instance.clone());
            Ok(())
        }
    }

    mod covered_slots_tests {
        use super::*;

        #[test]
        fn test_tolerance_window() {
            let mut slots = CoveredSlots::new(Duration::seconds(1));
            slots.insert(now());

            assert!(slots.covers(now()));
            assert!(slots.covers(now() + Duration::milliseconds(999)));
            assert!(slots.covers(now() - Duration::milliseconds(999)));
            assert!(!slots.covers(now() + Duration::milliseconds(1000)));
            assert!(!slots.covers(now() - Duration::seconds(5)));
        }

        #[test]
        fn test_zero_tolerance_matches_exact_instant() {
            let mut slots = CoveredSlots::new(Duration::zero());
            slots.insert(now());
            assert!(slots.covers(now()));
            assert!(!slots.covers(now() + Duration::milliseconds(1)));
        }
    }

    mod reconcile_tests {
        use super::*;
        use rstest::rstest;

        #[tokio::test]
        async fn test_fresh_task_generated_to_end_date() {
            let rt = recurring(now(), Some(now() + Duration::days(3)), vec![Interval::days(1)]);
            let store = FakeStore::with(vec![rt.clone()]);

            let summary = BatchReconciler::with_defaults().reconcile_all(&store, now()).await;

            assert_eq!(summary.processed_count, 1);
            assert_eq!(summary.generated_count, 4);
            assert!(summary.is_clean());
            assert_eq!(
                store.due_dates(rt.id),
                (0..4).map(|d| now() + Duration::days(d)).collect::<Vec<_>>()
            );
        }

        #[tokio::test]
        async fn test_second_run_is_idempotent() {
            let rt = recurring(now(), None, vec![Interval::weeks(1)]);
            let store = FakeStore::with(vec![rt.clone()]);
            let reconciler = BatchReconciler::with_defaults();

            let first = reconciler.reconcile_all(&store, now()).await;
            let second = reconciler.reconcile_all(&store, now()).await;

            assert!(first.generated_count > 50);
            assert_eq!(second.generated_count, 0);
            assert_eq!(second.processed_count, 1);
        }

        #[rstest]
        #[case(0)]
        #[case(1)]
        #[case(2)]
        #[tokio::test]
        async fn test_narrow_tolerance_stays_idempotent(#[case] tolerance_ms: u32) {
            let rt = recurring(now(), None, vec![Interval::weeks(1)]);
            let store = FakeStore::with(vec![rt.clone()]);
            let reconciler = BatchReconciler::new(GenerationConfig {
                duplicate_tolerance_ms: tolerance_ms,
                ..Default::default()
            });

            let first = reconciler.reconcile_all(&store, now()).await;
            let second = reconciler.reconcile_all(&store, now()).await;
            let third = reconciler.reconcile_all(&store, now()).await;

            assert!(first.generated_count > 50);
            assert_eq!(second.generated_count, 0);
            assert_eq!(third.generated_count, 0);
            let dates = store.due_dates(rt.id);
            assert_eq!(dates.len(), first.generated_count);
            assert!(dates.windows(2).all(|pair| pair[1] - pair[0] >= Duration::weeks(1)));
        }

        #[tokio::test]
        async fn test_continues_after_latest_open_instance() {
            let rt = recurring(now(), Some(now() + Duration::days(5)), vec![Interval::days(1)]);
            let store = FakeStore::with(vec![rt.clone()]);
            store.seed(InstanceGenerator::instance_for(&rt, now(), now()));
            store.seed(InstanceGenerator::instance_for(&rt, now() + Duration::days(1), now()));

            let summary = BatchReconciler::with_defaults().reconcile_all(&store, now()).await;

            // Continues from day 1 + 1ms: days 2, 3 and 4 (+1ms) fit before the end date.
            assert_eq!(summary.generated_count, 3);
            let dates = store.due_dates(rt.id);
            assert_eq!(dates.len(), 5);
            assert_eq!(dates[2], now() + Duration::days(2) + Duration::milliseconds(1));
        }

        #[tokio::test]
        async fn test_closed_instances_do_not_block_but_still_cover() {
            let rt = recurring(now(), Some(now() + Duration::days(2)), vec![Interval::days(1)]);
            let store = FakeStore::with(vec![rt.clone()]);
            let done = InstanceGenerator::instance_for(&rt, now(), now());
            let done_id = done.task.id;
            store.seed(done);
            store.set_status(done_id, TaskStatus::Done);

            let summary = BatchReconciler::with_defaults().reconcile_all(&store, now()).await;

            // No open instance: walk restarts at the start date, whose slot is taken.
            assert_eq!(summary.generated_count, 2);
            assert_eq!(
                store.due_dates(rt.id),
                vec![now(), now() + Duration::days(1), now() + Duration::days(2)]
            );
        }

        #[tokio::test]
        async fn test_skips_when_already_at_end() {
            let end = now() + Duration::days(1);
            let rt = recurring(now(), Some(end), vec![Interval::days(1)]);
            let store = FakeStore::with(vec![rt.clone()]);
            store.seed(InstanceGenerator::instance_for(&rt, end, now()));

            let summary = BatchReconciler::with_defaults().reconcile_all(&store, now()).await;
            assert_eq!(summary.generated_count, 0);
            assert!(summary.is_clean());
        }

        #[tokio::test]
        async fn test_stopped_tasks_are_not_loaded() {
            let mut rt = recurring(now(), None, vec![Interval::days(1)]);
            rt.status = RecurringTaskStatus::Stopped;
            let store = FakeStore::with(vec![rt]);

            let summary = BatchReconciler::with_defaults().reconcile_all(&store, now()).await;
            assert_eq!(summary, ReconciliationSummary::default());
        }

        #[tokio::test]
        async fn test_broken_intervals_do_not_stall_the_batch() {
            let empty = recurring(now(), None, vec![]);
            let negative = recurring(now(), None, vec![Interval::days(-2)]);
            let healthy = recurring(now(), Some(now() + Duration::days(1)), vec![Interval::days(1)]);
            let store = FakeStore::with(vec![empty.clone(), negative.clone(), healthy.clone()]);

            let summary = BatchReconciler::with_defaults().reconcile_all(&store, now()).await;

            assert!(summary.is_clean());
            assert_eq!(summary.processed_count, 3);
            // Both fall back to one step per advance horizon.
            let fallback = vec![now(), now() + Duration::days(365)];
            assert_eq!(store.due_dates(empty.id), fallback);
            assert_eq!(store.due_dates(negative.id), fallback);
            assert_eq!(store.due_dates(healthy.id).len(), 2);
        }
    }

    mod failure_tests {
        use super::*;

        #[tokio::test]
        async fn test_per_task_failure_is_isolated() {
            let failing = recurring(now(), Some(now() + Duration::days(1)), vec![Interval::days(1)]);
            let healthy = recurring(now(), Some(now() + Duration::days(1)), vec![Interval::days(1)]);
            let mut store = FakeStore::with(vec![failing.clone(), healthy.clone()]);
            store.fail_links_for.insert(failing.id);

            let summary = BatchReconciler::with_defaults().reconcile_all(&store, now()).await;

            assert_eq!(summary.processed_count, 2);
            assert_eq!(summary.generated_count, 2);
            assert_eq!(summary.error_count, 1);
            assert_eq!(summary.errors[0].recurring_task_id, Some(failing.id));
            assert!(summary.errors[0].to_string().starts_with("Error processing recurring task"));
        }

        #[tokio::test]
        async fn test_save_failure_is_reported() {
            let rt = recurring(now(), Some(now() + Duration::days(2)), vec![Interval::days(1)]);
            let mut store = FakeStore::with(vec![rt.clone()]);
            store.fail_save_for.insert(rt.id);

            let summary = BatchReconciler::with_defaults().reconcile_all(&store, now()).await;

            assert_eq!(summary.generated_count, 0);
            assert_eq!(summary.error_count, 1);
            assert!(summary.errors[0].message.contains("disk full"));
        }

        #[tokio::test]
        async fn test_load_failure_is_batch_level() {
            let store = FakeStore {
                fail_active: true,
                ..Default::default()
            };

            let summary = BatchReconciler::with_defaults().reconcile_all(&store, now()).await;

            assert_eq!(summary.processed_count, 0);
            assert_eq!(summary.error_count, 1);
            assert_eq!(summary.errors[0].recurring_task_id, None);
            assert!(summary.errors[0].to_string().starts_with("Batch generation failed"));
        }
    }
}
