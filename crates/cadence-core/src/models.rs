use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    /// Done and cancelled instances are used up: they never block regeneration
    /// and a generated successor starts over as `Todo`.
    pub fn is_closed(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }

    pub fn is_open(self) -> bool {
        !self.is_closed()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "todo"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid task status: {0}")]
pub struct ParseTaskStatusError(String);

impl FromStr for TaskStatus {
    type Err = ParseTaskStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" | "in-progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(ParseTaskStatusError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid task priority: {0}")]
pub struct ParseTaskPriorityError(String);

impl FromStr for TaskPriority {
    type Err = ParseTaskPriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            "urgent" => Ok(TaskPriority::Urgent),
            _ => Err(ParseTaskPriorityError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RecurringTaskStatus {
    Active,
    Stopped,
}

impl std::fmt::Display for RecurringTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecurringTaskStatus::Active => write!(f, "active"),
            RecurringTaskStatus::Stopped => write!(f, "stopped"),
        }
    }
}

// ============================================================================
// Intervals and Recurrence Templates
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Days,
    Weeks,
    Months,
    Years,
}

impl std::fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntervalUnit::Days => write!(f, "days"),
            IntervalUnit::Weeks => write!(f, "weeks"),
            IntervalUnit::Months => write!(f, "months"),
            IntervalUnit::Years => write!(f, "years"),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid interval unit: {0}")]
pub struct ParseIntervalUnitError(String);

impl FromStr for IntervalUnit {
    type Err = ParseIntervalUnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" | "days" => Ok(IntervalUnit::Days),
            "week" | "weeks" => Ok(IntervalUnit::Weeks),
            "month" | "months" => Ok(IntervalUnit::Months),
            "year" | "years" => Ok(IntervalUnit::Years),
            _ => Err(ParseIntervalUnitError(s.to_string())),
        }
    }
}

/// One step of a recurrence rule, e.g. "3 days" or "1 month".
///
/// The value is signed so that invalid rules can be represented and rejected
/// with [`CoreError::InvalidInterval`] instead of being silently ignored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Interval {
    pub value: i32,
    pub unit: IntervalUnit,
}

impl Interval {
    pub fn new(value: i32, unit: IntervalUnit) -> Self {
        Self { value, unit }
    }

    pub fn days(value: i32) -> Self {
        Self::new(value, IntervalUnit::Days)
    }

    pub fn weeks(value: i32) -> Self {
        Self::new(value, IntervalUnit::Weeks)
    }

    pub fn months(value: i32) -> Self {
        Self::new(value, IntervalUnit::Months)
    }

    pub fn years(value: i32) -> Self {
        Self::new(value, IntervalUnit::Years)
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.value > 0
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Which weekday of the month a weekday-based template resolves to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MonthOccurrence {
    /// 1st..5th matching weekday. A 5th that does not exist clamps to the last one.
    Nth(u8),
    Last,
}

impl MonthOccurrence {
    /// Storage form: 1..5 for `Nth`, -1 for `Last`.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            -1 => Some(MonthOccurrence::Last),
            1..=5 => Some(MonthOccurrence::Nth(raw as u8)),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            MonthOccurrence::Nth(n) => n as i32,
            MonthOccurrence::Last => -1,
        }
    }
}

/// Converts the stored weekday index (Sunday = 0) into a [`Weekday`].
pub fn weekday_from_sunday_index(index: i32) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

/// How a template turns interval arithmetic into a concrete date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrenceMode {
    /// Apply the intervals in order. Month steps land on `day_of_month` when set
    /// (clamped to the month's last day), otherwise on the base date's day.
    Sequential { day_of_month: Option<u8> },
    /// The intervals only pick the target month; the day is the nth (or last)
    /// `weekday` of that month.
    WeekdayOccurrence {
        weekday: Weekday,
        occurrence: MonthOccurrence,
    },
}

impl Default for RecurrenceMode {
    fn default() -> Self {
        RecurrenceMode::Sequential { day_of_month: None }
    }
}

/// A reusable, named recurrence rule referenced by individual tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceTemplate {
    pub id: Uuid,
    pub name: String,
    /// Applied in order; intervals compose additively.
    pub intervals: Vec<Interval>,
    pub mode: RecurrenceMode,
}

impl RecurrenceTemplate {
    /// A plain sequential template.
    pub fn sequential(name: impl Into<String>, intervals: Vec<Interval>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            intervals,
            mode: RecurrenceMode::default(),
        }
    }

    /// A template pinned to a fixed day of the month.
    pub fn on_day_of_month(name: impl Into<String>, intervals: Vec<Interval>, day_of_month: u8) -> Self {
        Self {
            mode: RecurrenceMode::Sequential { day_of_month: Some(day_of_month) },
            ..Self::sequential(name, intervals)
        }
    }

    /// A template resolving to e.g. "first Monday" or "last Friday" of the target month.
    pub fn weekday_occurrence(
        name: impl Into<String>,
        intervals: Vec<Interval>,
        weekday: Weekday,
        occurrence: MonthOccurrence,
    ) -> Self {
        Self {
            mode: RecurrenceMode::WeekdayOccurrence { weekday, occurrence },
            ..Self::sequential(name, intervals)
        }
    }

    pub fn day_of_month(&self) -> Option<u8> {
        match self.mode {
            RecurrenceMode::Sequential { day_of_month } => day_of_month,
            RecurrenceMode::WeekdayOccurrence { .. } => None,
        }
    }

    /// Checks the structural invariants of the template.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidInput("Recurrence template name is required".to_string()));
        }
        if self.intervals.is_empty() {
            return Err(CoreError::InvalidInput(
                "Recurrence template intervals cannot be empty".to_string(),
            ));
        }
        if let Some(bad) = self.intervals.iter().find(|i| !i.is_positive()) {
            return Err(CoreError::InvalidInterval { value: bad.value });
        }
        match self.mode {
            RecurrenceMode::Sequential { day_of_month: Some(day) } if !(1..=31).contains(&day) => {
                Err(CoreError::InvalidInput(format!("Day of month out of range: {}", day)))
            }
            RecurrenceMode::WeekdayOccurrence { occurrence: MonthOccurrence::Nth(n), .. }
                if !(1..=5).contains(&n) =>
            {
                Err(CoreError::InvalidInput(format!("Occurrence in month out of range: {}", n)))
            }
            _ => Ok(()),
        }
    }
}

/// Data required to create a new recurrence template
#[derive(Debug, Clone)]
pub struct NewTemplateData {
    pub name: String,
    pub intervals: Vec<Interval>,
    pub mode: RecurrenceMode,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTemplateData {
    pub name: Option<String>,
    pub intervals: Option<Vec<Interval>>,
    pub mode: Option<RecurrenceMode>,
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    /// Set on tasks that regenerate one-at-a-time when completed.
    pub recurrence_template_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Task {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            title: String::new(),
            description: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            due_at: None,
            tags: Vec::new(),
            recurrence_template_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewTaskData {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub recurrence_template_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTaskData {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_at: Option<Option<DateTime<Utc>>>,
    pub tags: Option<Vec<String>>,
    pub recurrence_template_id: Option<Option<Uuid>>,
}

#[derive(Debug)]
pub enum CompletionResult {
    Single(Task),
    Recurring { completed: Task, next: Task },
}

// ============================================================================
// Recurring Tasks and Links
// ============================================================================

/// A generator definition that owns a start/end window and produces many
/// linked task instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringTask {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    /// Independent of any template. Bulk generation only steps by the first entry.
    pub intervals: Vec<Interval>,
    pub tags: Vec<String>,
    pub category_ids: Vec<Uuid>,
    pub status: RecurringTaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringTask {
    pub fn is_active(&self) -> bool {
        self.status == RecurringTaskStatus::Active
    }

    pub fn is_indefinite(&self) -> bool {
        self.end_date.is_none()
    }
}

impl Default for RecurringTask {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            title: String::new(),
            description: None,
            priority: TaskPriority::Medium,
            start_date: now,
            end_date: None,
            intervals: Vec::new(),
            tags: Vec::new(),
            category_ids: Vec::new(),
            status: RecurringTaskStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Data required to create a new recurring task
#[derive(Debug, Clone)]
pub struct NewRecurringTaskData {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub intervals: Vec<Interval>,
    pub tags: Vec<String>,
    pub category_ids: Vec<Uuid>,
}

/// Data for modifying an existing recurring task
#[derive(Debug, Clone, Default)]
pub struct UpdateRecurringTaskData {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<TaskPriority>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<Option<DateTime<Utc>>>,
    /// Changing intervals regenerates every open linked instance
    pub intervals: Option<Vec<Interval>>,
    pub tags: Option<Vec<String>>,
    pub category_ids: Option<Vec<Uuid>>,
    pub status: Option<RecurringTaskStatus>,
}

impl UpdateRecurringTaskData {
    /// True when the change affects fields copied onto generated instances.
    pub fn touches_instance_content(&self) -> bool {
        self.title.is_some() || self.description.is_some() || self.priority.is_some() || self.tags.is_some()
    }
}

/// Junction record tying a generated task instance back to its recurring task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskRecurringLink {
    pub id: Uuid,
    pub recurring_task_id: Uuid,
    pub task_id: Uuid,
    /// The due date the instance was generated for
    pub original_generated_date: DateTime<Utc>,
    pub last_regenerated_date: DateTime<Utc>,
}

impl TaskRecurringLink {
    pub fn new(recurring_task_id: Uuid, task_id: Uuid, original_generated_date: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            recurring_task_id,
            task_id,
            original_generated_date,
            last_regenerated_date: now,
        }
    }

    pub fn mark_regenerated(&mut self, now: DateTime<Utc>) {
        self.last_regenerated_date = now;
    }
}

/// A generated task together with the link that records where it came from.
///
/// Persisted as a single unit so that a task never exists without its link.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedInstance {
    pub task: Task,
    pub link: TaskRecurringLink,
}

impl GeneratedInstance {
    pub fn due_at(&self) -> DateTime<Utc> {
        self.link.original_generated_date
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_openness() {
        assert!(TaskStatus::Todo.is_open());
        assert!(TaskStatus::InProgress.is_open());
        assert!(TaskStatus::Done.is_closed());
        assert!(TaskStatus::Cancelled.is_closed());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("in-progress".parse::<TaskStatus>(), Ok(TaskStatus::InProgress));
        assert_eq!("DONE".parse::<TaskStatus>(), Ok(TaskStatus::Done));
        assert!("finished".parse::<TaskStatus>().is_err());
        assert_eq!(TaskStatus::InProgress.to_string(), "in_progress");
    }

    #[test]
    fn test_priority_parsing_and_order() {
        assert_eq!("urgent".parse::<TaskPriority>(), Ok(TaskPriority::Urgent));
        assert!("critical".parse::<TaskPriority>().is_err());
        assert!(TaskPriority::Low < TaskPriority::Urgent);
        assert_eq!(TaskPriority::default(), TaskPriority::Medium);
    }

    #[test]
    fn test_interval_json_shape() {
        let json = serde_json::to_string(&Interval::days(3)).unwrap();
        assert_eq!(json, r#"{"value":3,"unit":"days"}"#);

        let parsed: Interval = serde_json::from_str(r#"{"value":2,"unit":"weeks"}"#).unwrap();
        assert_eq!(parsed, Interval::weeks(2));

        let unknown = serde_json::from_str::<Interval>(r#"{"value":2,"unit":"fortnights"}"#);
        assert!(unknown.is_err());
    }

    #[test]
    fn test_interval_unit_parsing() {
        assert_eq!("month".parse::<IntervalUnit>(), Ok(IntervalUnit::Months));
        assert_eq!("Years".parse::<IntervalUnit>(), Ok(IntervalUnit::Years));
        assert!("hours".parse::<IntervalUnit>().is_err());
    }

    #[test]
    fn test_month_occurrence_raw_values() {
        assert_eq!(MonthOccurrence::from_raw(-1), Some(MonthOccurrence::Last));
        assert_eq!(MonthOccurrence::from_raw(3), Some(MonthOccurrence::Nth(3)));
        assert_eq!(MonthOccurrence::from_raw(0), None);
        assert_eq!(MonthOccurrence::from_raw(6), None);
        assert_eq!(MonthOccurrence::Last.as_raw(), -1);
        assert_eq!(weekday_from_sunday_index(0), Some(Weekday::Sun));
        assert_eq!(weekday_from_sunday_index(7), None);
    }

    mod template_validation_tests {
        use super::*;

        #[test]
        fn test_valid_templates() {
            RecurrenceTemplate::sequential("Daily", vec![Interval::days(1)]).validate().unwrap();
            RecurrenceTemplate::on_day_of_month("15th", vec![Interval::months(1)], 15)
                .validate()
                .unwrap();
        }

        #[test]
        fn test_blank_name() {
            let err = RecurrenceTemplate::sequential("  ", vec![Interval::days(1)]).validate().unwrap_err();
            assert!(matches!(err, CoreError::InvalidInput(_)));
        }

        #[test]
        fn test_empty_intervals() {
            let err = RecurrenceTemplate::sequential("Empty", vec![]).validate().unwrap_err();
            assert!(matches!(err, CoreError::InvalidInput(_)));
        }

        #[test]
        fn test_non_positive_interval() {
            let err = RecurrenceTemplate::sequential("Zero", vec![Interval::weeks(0)]).validate().unwrap_err();
            assert!(matches!(err, CoreError::InvalidInterval { value: 0 }));
        }

        #[test]
        fn test_out_of_range_rules() {
            let day = RecurrenceTemplate::on_day_of_month("32nd", vec![Interval::months(1)], 32);
            assert!(matches!(day.validate(), Err(CoreError::InvalidInput(_))));

            let sixth = RecurrenceTemplate::weekday_occurrence(
                "Sixth Monday",
                vec![Interval::months(1)],
                Weekday::Mon,
                MonthOccurrence::Nth(6),
            );
            assert!(matches!(sixth.validate(), Err(CoreError::InvalidInput(_))));
        }
    }

    #[test]
    fn test_update_touches_instance_content() {
        assert!(!UpdateRecurringTaskData::default().touches_instance_content());
        let update = UpdateRecurringTaskData {
            tags: Some(vec![]),
            ..Default::default()
        };
        assert!(update.touches_instance_content());
        let status_only = UpdateRecurringTaskData {
            status: Some(RecurringTaskStatus::Stopped),
            ..Default::default()
        };
        assert!(!status_only.touches_instance_content());
    }
}
