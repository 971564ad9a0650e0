use crate::config::Config;
use crate::db::{establish_connection, DbPool};
use crate::error::CoreError;
use crate::generator::InstanceGenerator;
use crate::models::{
    CompletionResult, GeneratedInstance, NewRecurringTaskData, NewTaskData, NewTemplateData, RecurrenceTemplate,
    RecurringTask, RecurringTaskStatus, Task, TaskRecurringLink, UpdateRecurringTaskData, UpdateTaskData,
    UpdateTemplateData,
};
use crate::query::TaskFilter;
use crate::reconcile::{BatchReconciler, GenerationStore, ReconciliationSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod generation;
pub mod links;
pub mod recurring;
pub mod tasks;
pub mod templates;

// Traits are defined in this module and implemented in respective domain modules

/// Domain-specific trait for task operations
#[async_trait]
pub trait TaskRepository {
    async fn add_task(&self, data: NewTaskData) -> Result<Task, CoreError>;
    async fn find_task_by_id(&self, id: Uuid) -> Result<Option<Task>, CoreError>;
    /// Tasks matching every filter, earliest due first
    async fn find_tasks(&self, filters: &[TaskFilter]) -> Result<Vec<Task>, CoreError>;
    /// Fails with `TaskLocked` if the task is done.
    async fn update_task(&self, id: Uuid, data: UpdateTaskData) -> Result<Option<Task>, CoreError>;
    /// Fails with `TaskLocked` if the task is done. Also removes the task's links.
    async fn delete_task(&self, id: Uuid) -> Result<bool, CoreError>;
    /// Marks the task done and, if it uses a template, creates its successor.
    async fn complete_task(&self, id: Uuid) -> Result<Option<CompletionResult>, CoreError>;
    /// Creates and stores the successor of `task`, if it uses a known template.
    async fn generate_next_task(&self, task: &Task) -> Result<Option<Task>, CoreError>;
    /// Moves a `Todo` task to `InProgress`. Any other status is rejected with `InvalidInput`.
    async fn start_task(&self, id: Uuid) -> Result<Option<Task>, CoreError>;
    async fn cancel_task(&self, id: Uuid) -> Result<Option<Task>, CoreError>;
    /// Adds a trimmed tag; blank and duplicate tags leave the task unchanged.
    async fn add_tag(&self, id: Uuid, tag: &str) -> Result<Option<Task>, CoreError>;
    async fn remove_tag(&self, id: Uuid, tag: &str) -> Result<Option<Task>, CoreError>;
}

/// Domain-specific trait for recurrence template operations
#[async_trait]
pub trait RecurrenceTemplateRepository {
    /// Seeds the default templates into an empty table. Returns how many were added.
    async fn initialize_templates(&self) -> Result<usize, CoreError>;
    async fn add_template(&self, data: NewTemplateData) -> Result<RecurrenceTemplate, CoreError>;
    async fn find_template_by_id(&self, id: Uuid) -> Result<Option<RecurrenceTemplate>, CoreError>;
    async fn find_template_by_name(&self, name: &str) -> Result<Option<RecurrenceTemplate>, CoreError>;
    async fn find_templates(&self) -> Result<Vec<RecurrenceTemplate>, CoreError>;
    async fn update_template(&self, id: Uuid, data: UpdateTemplateData) -> Result<Option<RecurrenceTemplate>, CoreError>;
    /// Fails with `TemplateInUse` while any task references the template.
    async fn delete_template(&self, id: Uuid) -> Result<bool, CoreError>;
}

/// Domain-specific trait for recurring task operations
#[async_trait]
pub trait RecurringTaskRepository {
    async fn create_recurring_task(&self, data: NewRecurringTaskData) -> Result<RecurringTask, CoreError>;
    async fn find_recurring_task_by_id(&self, id: Uuid) -> Result<Option<RecurringTask>, CoreError>;
    async fn find_recurring_tasks(&self) -> Result<Vec<RecurringTask>, CoreError>;
    async fn find_recurring_tasks_by_status(&self, status: RecurringTaskStatus) -> Result<Vec<RecurringTask>, CoreError>;
    async fn find_active_recurring_tasks(&self) -> Result<Vec<RecurringTask>, CoreError>;
    async fn update_recurring_task(
        &self,
        id: Uuid,
        data: UpdateRecurringTaskData,
    ) -> Result<Option<RecurringTask>, CoreError>;
    async fn stop_recurring_task(&self, id: Uuid) -> Result<Option<RecurringTask>, CoreError>;
    /// Only a stopped recurring task can be reactivated.
    async fn reactivate_recurring_task(&self, id: Uuid) -> Result<Option<RecurringTask>, CoreError>;
    async fn delete_recurring_task(&self, id: Uuid) -> Result<bool, CoreError>;
    async fn find_linked_tasks(&self, recurring_task_id: Uuid) -> Result<Vec<Task>, CoreError>;
}

/// Domain-specific trait for link operations
#[async_trait]
pub trait TaskRecurringLinkRepository {
    async fn find_links_by_recurring_task(&self, recurring_task_id: Uuid) -> Result<Vec<TaskRecurringLink>, CoreError>;
    async fn find_links_by_task(&self, task_id: Uuid) -> Result<Vec<TaskRecurringLink>, CoreError>;
    async fn delete_links_by_recurring_task(&self, recurring_task_id: Uuid) -> Result<u64, CoreError>;
    async fn delete_links_by_task(&self, task_id: Uuid) -> Result<u64, CoreError>;
    /// Stores the task and its link in one transaction.
    async fn save_generated_instance(&self, instance: &GeneratedInstance) -> Result<(), CoreError>;
    async fn is_recurring_instance(&self, task_id: Uuid) -> Result<bool, CoreError>;
}

/// Main repository trait that composes all domain traits
#[async_trait]
pub trait Repository:
    TaskRepository + RecurrenceTemplateRepository + RecurringTaskRepository + TaskRecurringLinkRepository + GenerationStore
{
}

/// SQLite implementation of the repository pattern
pub struct SqliteRepository {
    pool: DbPool,
    generator: InstanceGenerator,
}

impl SqliteRepository {
    pub fn new(pool: DbPool, generator: InstanceGenerator) -> Self {
        Self { pool, generator }
    }

    /// Opens (and migrates) the configured database.
    pub async fn connect(config: &Config) -> Result<Self, CoreError> {
        let pool = establish_connection(&config.database_path).await?;
        Ok(Self::new(pool, InstanceGenerator::new(config.generation.clone())))
    }

    /// Runs a batch reconciliation over this repository with its own generation settings.
    pub async fn reconcile_all(&self, now: DateTime<Utc>) -> ReconciliationSummary {
        BatchReconciler::new(self.generator.config().clone())
            .reconcile_all(self, now)
            .await
    }

    pub(crate) fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub(crate) fn generator(&self) -> &InstanceGenerator {
        &self.generator
    }
}

impl Repository for SqliteRepository {}
