use crate::error::CoreError;
use crate::models::{GeneratedInstance, TaskRecurringLink};
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

#[async_trait]
impl super::TaskRecurringLinkRepository for SqliteRepository {
    async fn find_links_by_recurring_task(&self, recurring_task_id: Uuid) -> Result<Vec<TaskRecurringLink>, CoreError> {
        let links = sqlx::query_as(
            "SELECT * FROM task_recurring_links WHERE recurring_task_id = ? ORDER BY original_generated_date",
        )
        .bind(recurring_task_id)
        .fetch_all(self.pool())
        .await?;
        Ok(links)
    }

    async fn find_links_by_task(&self, task_id: Uuid) -> Result<Vec<TaskRecurringLink>, CoreError> {
        let links = sqlx::query_as("SELECT * FROM task_recurring_links WHERE task_id = ?")
            .bind(task_id)
            .fetch_all(self.pool())
            .await?;
        Ok(links)
    }

    async fn delete_links_by_recurring_task(&self, recurring_task_id: Uuid) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM task_recurring_links WHERE recurring_task_id = ?")
            .bind(recurring_task_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_links_by_task(&self, task_id: Uuid) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM task_recurring_links WHERE task_id = ?")
            .bind(task_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    async fn save_generated_instance(&self, instance: &GeneratedInstance) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await?;
        Self::insert_instance(&mut tx, instance).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn is_recurring_instance(&self, task_id: Uuid) -> Result<bool, CoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM task_recurring_links WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(self.pool())
            .await?;
        Ok(count > 0)
    }
}

impl SqliteRepository {
    /// Writes a generated task followed by its link inside `tx`.
    pub(crate) async fn insert_instance(
        tx: &mut Transaction<'_, Sqlite>,
        instance: &GeneratedInstance,
    ) -> Result<(), CoreError> {
        Self::insert_task(tx, &instance.task).await?;

        let link = &instance.link;
        sqlx::query(
            r#"INSERT INTO task_recurring_links
            (id, recurring_task_id, task_id, original_generated_date, last_regenerated_date)
            VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(link.id)
        .bind(link.recurring_task_id)
        .bind(link.task_id)
        .bind(link.original_generated_date)
        .bind(link.last_regenerated_date)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
