use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::GenerationConfig;
use crate::error::CoreError;
use crate::models::{GeneratedInstance, RecurrenceTemplate, RecurringTask, Task, TaskRecurringLink, TaskStatus};
use crate::recurrence::{advance_from, RecurrenceCalculator};

/// Produces task instances from templates and recurring tasks.
///
/// Covers both generation styles:
/// - one successor for a completed template-driven task ([`Self::next_instance`])
/// - a bounded series for a recurring task ([`Self::generate`])
///
/// Nothing here touches storage; callers persist what is returned.
#[derive(Debug, Clone)]
pub struct InstanceGenerator {
    config: GenerationConfig,
}

impl InstanceGenerator {
    pub fn new(config: GenerationConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(GenerationConfig::default())
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// True when completing `task` should produce a successor.
    #[inline]
    pub fn can_generate_next_instance(task: &Task) -> bool {
        task.recurrence_template_id.is_some()
    }

    /// Builds the successor of `source` according to `template`.
    ///
    /// # Arguments
    ///
    /// * `source` - The task being completed (or any task using the template)
    /// * `template` - The template `source` refers to
    /// * `now` - Generation time, also the base date when `source` has no due date
    ///
    /// # Returns
    ///
    /// A new task with a fresh id, the advanced due date and copied content.
    /// A closed source yields a `Todo` successor; an open source keeps its status.
    pub fn next_instance(
        &self,
        source: &Task,
        template: &RecurrenceTemplate,
        now: DateTime<Utc>,
    ) -> Result<Task, CoreError> {
        let base = source.due_at.unwrap_or(now);
        let next_due = RecurrenceCalculator::next_occurrence(template, base)?;

        let status = if source.status.is_closed() { TaskStatus::Todo } else { source.status };

        Ok(Task {
            id: Uuid::now_v7(),
            title: source.title.clone(),
            description: source.description.clone(),
            status,
            priority: source.priority,
            due_at: Some(next_due),
            tags: source.tags.clone(),
            recurrence_template_id: source.recurrence_template_id,
            created_at: now,
            updated_at: now,
        })
    }

    /// `now + advance horizon`, saturating at the latest representable date.
    pub fn horizon(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.config.advance_horizon())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// The last date generation may reach for `recurring_task`.
    pub fn effective_end(&self, recurring_task: &RecurringTask, now: DateTime<Utc>) -> DateTime<Utc> {
        let horizon = self.horizon(now);
        match recurring_task.end_date {
            Some(end) if end < horizon => end,
            _ => horizon,
        }
    }

    /// One step of the series, see [`advance_from`].
    pub fn step(&self, from: DateTime<Utc>, recurring_task: &RecurringTask) -> DateTime<Utc> {
        advance_from(from, &recurring_task.intervals, self.max_advance())
    }

    /// Every due date [`Self::generate`] would emit.
    ///
    /// # Behavior
    ///
    /// A start date in the past is stepped forward until it reaches `now`, keeping
    /// the series' phase. Each following date is stepped from one millisecond after
    /// the previous one, so successive occurrences drift by a millisecond apiece.
    pub fn calculate_occurrences(&self, recurring_task: &RecurringTask, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let end = self.effective_end(recurring_task, now);
        let mut cursor = recurring_task.start_date;
        while cursor < now {
            cursor = self.step(cursor, recurring_task);
        }

        let mut occurrences = Vec::new();
        while cursor <= end {
            occurrences.push(cursor);
            match cursor.checked_add_signed(Duration::milliseconds(1)) {
                Some(from) => cursor = self.step(from, recurring_task),
                None => break,
            }
        }
        occurrences
    }

    /// Generates all instances of `recurring_task` from its effective start to
    /// `min(end_date, now + horizon)`.
    pub fn generate(&self, recurring_task: &RecurringTask, now: DateTime<Utc>) -> Vec<GeneratedInstance> {
        self.calculate_occurrences(recurring_task, now)
            .into_iter()
            .map(|due| Self::instance_for(recurring_task, due, now))
            .collect()
    }

    /// A fresh `Todo` instance of `recurring_task` due at `due`, with its link.
    pub fn instance_for(recurring_task: &RecurringTask, due: DateTime<Utc>, now: DateTime<Utc>) -> GeneratedInstance {
        let task = Task {
            id: Uuid::now_v7(),
            title: recurring_task.title.clone(),
            description: recurring_task.description.clone(),
            status: TaskStatus::Todo,
            priority: recurring_task.priority,
            due_at: Some(due),
            tags: recurring_task.tags.clone(),
            recurrence_template_id: None,
            created_at: now,
            updated_at: now,
        };
        let link = TaskRecurringLink::new(recurring_task.id, task.id, due, now);
        GeneratedInstance { task, link }
    }

    fn max_advance(&self) -> Duration {
        self.config.advance_horizon().max(Duration::days(1))
    }
}

impl Default for InstanceGenerator {
    fn default() -> Self {
        Self::with_defaults()
    }
}
