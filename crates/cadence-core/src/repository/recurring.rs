use crate::error::CoreError;
use crate::models::{
    Interval, NewRecurringTaskData, RecurringTask, RecurringTaskStatus, Task, TaskPriority, TaskStatus,
    UpdateRecurringTaskData,
};
use crate::repository::tasks::TaskRow;
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, Sqlite, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, FromRow)]
pub(crate) struct RecurringTaskRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    priority: TaskPriority,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    intervals: Json<Vec<Interval>>,
    tags: Json<Vec<String>>,
    category_ids: Json<Vec<Uuid>>,
    status: RecurringTaskStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RecurringTaskRow> for RecurringTask {
    fn from(row: RecurringTaskRow) -> Self {
        RecurringTask {
            id: row.id,
            title: row.title,
            description: row.description,
            priority: row.priority,
            start_date: row.start_date,
            end_date: row.end_date,
            intervals: row.intervals.0,
            tags: row.tags.0,
            category_ids: row.category_ids.0,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl super::RecurringTaskRepository for SqliteRepository {
    /// Stores a new recurring task and generates its instances up to the horizon.
    ///
    /// # Arguments
    ///
    /// * `data` - Title, window and intervals of the new recurring task
    ///
    /// # Returns
    ///
    /// The stored recurring task. Generated instances can be read back with
    /// `find_linked_tasks`.
    async fn create_recurring_task(&self, data: NewRecurringTaskData) -> Result<RecurringTask, CoreError> {
        let title = data.title.trim();
        if title.is_empty() {
            return Err(CoreError::InvalidInput("Recurring task title is required".to_string()));
        }
        if data.intervals.is_empty() {
            return Err(CoreError::InvalidInput("At least one interval is required".to_string()));
        }

        let now = Utc::now();
        let recurring_task = RecurringTask {
            id: Uuid::now_v7(),
            title: title.to_string(),
            description: data.description.map(|d| d.trim().to_string()),
            priority: data.priority.unwrap_or_default(),
            start_date: data.start_date,
            end_date: data.end_date,
            intervals: data.intervals,
            tags: data.tags,
            category_ids: data.category_ids,
            status: RecurringTaskStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool().begin().await?;
        Self::insert_recurring_task(&mut tx, &recurring_task).await?;
        let generated = self.backfill(&mut tx, &recurring_task, recurring_task.start_date, now).await?;
        tx.commit().await?;

        info!(recurring_task_id = %recurring_task.id, generated, "created recurring task");
        Ok(recurring_task)
    }

    async fn find_recurring_task_by_id(&self, id: Uuid) -> Result<Option<RecurringTask>, CoreError> {
        let row: Option<RecurringTaskRow> = sqlx::query_as("SELECT * FROM recurring_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(RecurringTask::from))
    }

    async fn find_recurring_tasks(&self) -> Result<Vec<RecurringTask>, CoreError> {
        let rows: Vec<RecurringTaskRow> = sqlx::query_as("SELECT * FROM recurring_tasks ORDER BY created_at")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(RecurringTask::from).collect())
    }

    async fn find_recurring_tasks_by_status(&self, status: RecurringTaskStatus) -> Result<Vec<RecurringTask>, CoreError> {
        let rows: Vec<RecurringTaskRow> =
            sqlx::query_as("SELECT * FROM recurring_tasks WHERE status = ? ORDER BY created_at")
                .bind(status)
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().map(RecurringTask::from).collect())
    }

    async fn find_active_recurring_tasks(&self) -> Result<Vec<RecurringTask>, CoreError> {
        self.find_recurring_tasks_by_status(RecurringTaskStatus::Active).await
    }

    /// Applies `data` to a recurring task and keeps its open instances in step.
    ///
    /// # Behavior
    ///
    /// - Changed intervals: every linked instance that is not done is deleted and
    ///   the series is regenerated starting now.
    /// - Otherwise, changed title, description, priority, tags or categories are
    ///   copied onto every linked instance that is not done.
    async fn update_recurring_task(
        &self,
        id: Uuid,
        data: UpdateRecurringTaskData,
    ) -> Result<Option<RecurringTask>, CoreError> {
        if data.intervals.as_ref().is_some_and(Vec::is_empty) {
            return Err(CoreError::InvalidInput("At least one interval is required".to_string()));
        }

        let mut tx = self.pool().begin().await?;

        let Some(mut recurring_task) = Self::fetch_recurring_task(&mut tx, id).await? else {
            return Ok(None);
        };

        let intervals_changed = data
            .intervals
            .as_ref()
            .is_some_and(|intervals| *intervals != recurring_task.intervals);
        let content_changed = data.touches_instance_content() || data.category_ids.is_some();

        if let Some(title) = data.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(CoreError::InvalidInput("Recurring task title cannot be empty".to_string()));
            }
            recurring_task.title = title.to_string();
        }
        if let Some(description) = data.description {
            recurring_task.description = description.map(|d| d.trim().to_string());
        }
        if let Some(priority) = data.priority {
            recurring_task.priority = priority;
        }
        if let Some(start_date) = data.start_date {
            recurring_task.start_date = start_date;
        }
        if let Some(end_date) = data.end_date {
            recurring_task.end_date = end_date;
        }
        if let Some(intervals) = data.intervals {
            recurring_task.intervals = intervals;
        }
        if let Some(tags) = data.tags {
            recurring_task.tags = tags;
        }
        if let Some(category_ids) = data.category_ids {
            recurring_task.category_ids = category_ids;
        }
        if let Some(status) = data.status {
            recurring_task.status = status;
        }

        let now = Utc::now();
        recurring_task.updated_at = now;
        Self::write_recurring_task(&mut tx, &recurring_task).await?;

        if intervals_changed {
            let removed = Self::remove_unfinished_instances(&mut tx, id).await?;
            let generated = self.backfill(&mut tx, &recurring_task, now, now).await?;
            info!(recurring_task_id = %id, removed, generated, "intervals changed, regenerated instances");
        } else if content_changed {
            let updated = Self::propagate_content(&mut tx, &recurring_task, now).await?;
            debug!(recurring_task_id = %id, updated, "propagated changes to linked instances");
        }

        tx.commit().await?;
        Ok(Some(recurring_task))
    }

    async fn stop_recurring_task(&self, id: Uuid) -> Result<Option<RecurringTask>, CoreError> {
        self.update_recurring_task(
            id,
            UpdateRecurringTaskData {
                status: Some(RecurringTaskStatus::Stopped),
                ..Default::default()
            },
        )
        .await
    }

    async fn reactivate_recurring_task(&self, id: Uuid) -> Result<Option<RecurringTask>, CoreError> {
        let mut tx = self.pool().begin().await?;

        let Some(mut recurring_task) = Self::fetch_recurring_task(&mut tx, id).await? else {
            return Ok(None);
        };
        if recurring_task.status != RecurringTaskStatus::Stopped {
            return Ok(None);
        }

        let now = Utc::now();
        recurring_task.status = RecurringTaskStatus::Active;
        recurring_task.updated_at = now;
        Self::write_recurring_task(&mut tx, &recurring_task).await?;
        let generated = self.backfill(&mut tx, &recurring_task, now, now).await?;
        tx.commit().await?;

        info!(recurring_task_id = %id, generated, "reactivated recurring task");
        Ok(Some(recurring_task))
    }

    /// Deletes a recurring task together with all of its instances and links.
    async fn delete_recurring_task(&self, id: Uuid) -> Result<bool, CoreError> {
        let mut tx = self.pool().begin().await?;

        if Self::fetch_recurring_task(&mut tx, id).await?.is_none() {
            return Ok(false);
        }

        let task_ids: Vec<(Uuid,)> = sqlx::query_as("SELECT task_id FROM task_recurring_links WHERE recurring_task_id = ?")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM task_recurring_links WHERE recurring_task_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for (task_id,) in &task_ids {
            sqlx::query("DELETE FROM tasks WHERE id = ?")
                .bind(task_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM recurring_tasks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(recurring_task_id = %id, instances = task_ids.len(), "deleted recurring task");
        Ok(true)
    }

    async fn find_linked_tasks(&self, recurring_task_id: Uuid) -> Result<Vec<Task>, CoreError> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"SELECT t.* FROM tasks t
            INNER JOIN task_recurring_links l ON l.task_id = t.id
            WHERE l.recurring_task_id = ?
            ORDER BY t.due_at"#,
        )
        .bind(recurring_task_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Task::from).collect())
    }
}

impl SqliteRepository {
    /// Generates and stores instances of `recurring_task` as if it started at `start`.
    async fn backfill(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        recurring_task: &RecurringTask,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        let from_start = RecurringTask {
            start_date: start,
            ..recurring_task.clone()
        };
        let instances = self.generator().generate(&from_start, now);
        for instance in &instances {
            Self::insert_instance(tx, instance).await?;
        }
        Ok(instances.len())
    }

    async fn linked_tasks_in(tx: &mut Transaction<'_, Sqlite>, recurring_task_id: Uuid) -> Result<Vec<Task>, CoreError> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"SELECT t.* FROM tasks t
            INNER JOIN task_recurring_links l ON l.task_id = t.id
            WHERE l.recurring_task_id = ?"#,
        )
        .bind(recurring_task_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows.into_iter().map(Task::from).collect())
    }

    /// Deletes linked instances that are not done, with their links.
    async fn remove_unfinished_instances(
        tx: &mut Transaction<'_, Sqlite>,
        recurring_task_id: Uuid,
    ) -> Result<usize, CoreError> {
        let mut removed = 0;
        for task in Self::linked_tasks_in(tx, recurring_task_id).await? {
            if task.status == TaskStatus::Done {
                continue;
            }
            sqlx::query("DELETE FROM task_recurring_links WHERE task_id = ?")
                .bind(task.id)
                .execute(&mut **tx)
                .await?;
            sqlx::query("DELETE FROM tasks WHERE id = ?")
                .bind(task.id)
                .execute(&mut **tx)
                .await?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn propagate_content(
        tx: &mut Transaction<'_, Sqlite>,
        recurring_task: &RecurringTask,
        now: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        let mut updated = 0;
        for mut task in Self::linked_tasks_in(tx, recurring_task.id).await? {
            if task.status == TaskStatus::Done {
                continue;
            }
            task.title = recurring_task.title.clone();
            task.description = recurring_task.description.clone();
            task.priority = recurring_task.priority;
            task.tags = recurring_task.tags.clone();
            task.updated_at = now;
            Self::write_task(tx, &task).await?;
            updated += 1;
        }
        Ok(updated)
    }

    async fn fetch_recurring_task(
        tx: &mut Transaction<'_, Sqlite>,
        id: Uuid,
    ) -> Result<Option<RecurringTask>, CoreError> {
        let row: Option<RecurringTaskRow> = sqlx::query_as("SELECT * FROM recurring_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(RecurringTask::from))
    }

    async fn insert_recurring_task(tx: &mut Transaction<'_, Sqlite>, recurring_task: &RecurringTask) -> Result<(), CoreError> {
        sqlx::query(
            r#"INSERT INTO recurring_tasks
            (id, title, description, priority, start_date, end_date, intervals, tags, category_ids, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(recurring_task.id)
        .bind(&recurring_task.title)
        .bind(&recurring_task.description)
        .bind(recurring_task.priority)
        .bind(recurring_task.start_date)
        .bind(recurring_task.end_date)
        .bind(Json(&recurring_task.intervals))
        .bind(Json(&recurring_task.tags))
        .bind(Json(&recurring_task.category_ids))
        .bind(recurring_task.status)
        .bind(recurring_task.created_at)
        .bind(recurring_task.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn write_recurring_task(tx: &mut Transaction<'_, Sqlite>, recurring_task: &RecurringTask) -> Result<(), CoreError> {
        sqlx::query(
            r#"UPDATE recurring_tasks
            SET title = ?, description = ?, priority = ?, start_date = ?, end_date = ?, intervals = ?,
                tags = ?, category_ids = ?, status = ?, updated_at = ?
            WHERE id = ?"#,
        )
        .bind(&recurring_task.title)
        .bind(&recurring_task.description)
        .bind(recurring_task.priority)
        .bind(recurring_task.start_date)
        .bind(recurring_task.end_date)
        .bind(Json(&recurring_task.intervals))
        .bind(Json(&recurring_task.tags))
        .bind(Json(&recurring_task.category_ids))
        .bind(recurring_task.status)
        .bind(recurring_task.updated_at)
        .bind(recurring_task.id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
