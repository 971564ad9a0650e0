use crate::error::CoreError;
use crate::models::{GeneratedInstance, RecurringTask, Task, TaskRecurringLink};
use crate::reconcile::GenerationStore;
use crate::repository::{RecurringTaskRepository, SqliteRepository, TaskRecurringLinkRepository, TaskRepository};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
impl GenerationStore for SqliteRepository {
    async fn load_active_recurring_tasks(&self) -> Result<Vec<RecurringTask>, CoreError> {
        self.find_active_recurring_tasks().await
    }

    async fn load_links(&self, recurring_task_id: Uuid) -> Result<Vec<TaskRecurringLink>, CoreError> {
        self.find_links_by_recurring_task(recurring_task_id).await
    }

    async fn load_task(&self, task_id: Uuid) -> Result<Option<Task>, CoreError> {
        self.find_task_by_id(task_id).await
    }

    async fn save_generated(&self, instance: &GeneratedInstance) -> Result<(), CoreError> {
        self.save_generated_instance(instance).await
    }
}
