use crate::error::CoreError;
use crate::models::{
    CompletionResult, NewTaskData, RecurrenceTemplate, Task, TaskPriority, TaskStatus, UpdateTaskData,
};
use crate::query::TaskFilter;
use crate::repository::templates::TemplateRow;
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, QueryBuilder, Sqlite, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, FromRow)]
pub(crate) struct TaskRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    status: TaskStatus,
    priority: TaskPriority,
    due_at: Option<DateTime<Utc>>,
    tags: Json<Vec<String>>,
    recurrence_template_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        Task {
            id: row.id,
            title: row.title,
            description: row.description,
            status: row.status,
            priority: row.priority,
            due_at: row.due_at,
            tags: row.tags.0,
            recurrence_template_id: row.recurrence_template_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl super::TaskRepository for SqliteRepository {
    async fn add_task(&self, data: NewTaskData) -> Result<Task, CoreError> {
        let title = data.title.trim();
        if title.is_empty() {
            return Err(CoreError::InvalidInput("Task title is required".to_string()));
        }

        let now = Utc::now();
        let task = Task {
            id: Uuid::now_v7(),
            title: title.to_string(),
            description: data.description.map(|d| d.trim().to_string()),
            status: data.status.unwrap_or(TaskStatus::Todo),
            priority: data.priority.unwrap_or_default(),
            due_at: data.due_at,
            tags: data.tags,
            recurrence_template_id: data.recurrence_template_id,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool().begin().await?;
        Self::insert_task(&mut tx, &task).await?;
        tx.commit().await?;
        Ok(task)
    }

    async fn find_task_by_id(&self, id: Uuid) -> Result<Option<Task>, CoreError> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(Task::from))
    }

    async fn find_tasks(&self, filters: &[TaskFilter]) -> Result<Vec<Task>, CoreError> {
        let mut query_builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM tasks");

        for (i, filter) in filters.iter().enumerate() {
            query_builder.push(if i == 0 { " WHERE " } else { " AND " });
            match filter {
                TaskFilter::Status(status) => {
                    query_builder.push("status = ").push_bind(*status);
                }
                TaskFilter::Priority(priority) => {
                    query_builder.push("priority = ").push_bind(*priority);
                }
                TaskFilter::Template(template_id) => {
                    query_builder.push("recurrence_template_id = ").push_bind(*template_id);
                }
                TaskFilter::HasTemplate => {
                    query_builder.push("recurrence_template_id IS NOT NULL");
                }
            }
        }
        query_builder.push(" ORDER BY due_at IS NULL, due_at, created_at");

        let rows: Vec<TaskRow> = query_builder.build_query_as().fetch_all(self.pool()).await?;
        Ok(rows.into_iter().map(Task::from).collect())
    }

    async fn update_task(&self, id: Uuid, data: UpdateTaskData) -> Result<Option<Task>, CoreError> {
        let mut tx = self.pool().begin().await?;

        let Some(mut task) = Self::fetch_task(&mut tx, id).await? else {
            return Ok(None);
        };
        if task.status == TaskStatus::Done {
            return Err(CoreError::TaskLocked(id));
        }

        if let Some(title) = data.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(CoreError::InvalidInput("Task title cannot be empty".to_string()));
            }
            task.title = title.to_string();
        }
        if let Some(description) = data.description {
            task.description = description.map(|d| d.trim().to_string());
        }
        if let Some(status) = data.status {
            task.status = status;
        }
        if let Some(priority) = data.priority {
            task.priority = priority;
        }
        if let Some(due_at) = data.due_at {
            task.due_at = due_at;
        }
        if let Some(tags) = data.tags {
            task.tags = tags;
        }
        if let Some(template_id) = data.recurrence_template_id {
            task.recurrence_template_id = template_id;
        }
        task.updated_at = Utc::now();

        Self::write_task(&mut tx, &task).await?;
        tx.commit().await?;
        Ok(Some(task))
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool, CoreError> {
        let mut tx = self.pool().begin().await?;

        let Some(task) = Self::fetch_task(&mut tx, id).await? else {
            return Ok(false);
        };
        if task.status == TaskStatus::Done {
            return Err(CoreError::TaskLocked(id));
        }

        sqlx::query("DELETE FROM task_recurring_links WHERE task_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn complete_task(&self, id: Uuid) -> Result<Option<CompletionResult>, CoreError> {
        let mut tx = self.pool().begin().await?;

        let Some(mut task) = Self::fetch_task(&mut tx, id).await? else {
            return Ok(None);
        };
        if task.status == TaskStatus::Done {
            return Err(CoreError::TaskLocked(id));
        }

        let now = Utc::now();
        task.status = TaskStatus::Done;
        task.updated_at = now;
        Self::write_task(&mut tx, &task).await?;

        let template = match task.recurrence_template_id {
            Some(template_id) => Self::fetch_template(&mut tx, template_id).await?,
            None => None,
        };

        let result = match template {
            Some(template) => {
                let next = self.generator().next_instance(&task, &template, now)?;
                Self::insert_task(&mut tx, &next).await?;
                info!(completed = %task.id, next = %next.id, template = %template.name, "generated next instance");
                CompletionResult::Recurring { completed: task, next }
            }
            None => CompletionResult::Single(task),
        };

        tx.commit().await?;
        Ok(Some(result))
    }

    async fn generate_next_task(&self, task: &Task) -> Result<Option<Task>, CoreError> {
        let Some(template_id) = task.recurrence_template_id else {
            return Ok(None);
        };

        let mut tx = self.pool().begin().await?;
        let Some(template) = Self::fetch_template(&mut tx, template_id).await? else {
            debug!(task = %task.id, %template_id, "template no longer exists");
            return Ok(None);
        };

        let next = self.generator().next_instance(task, &template, Utc::now())?;
        Self::insert_task(&mut tx, &next).await?;
        tx.commit().await?;
        Ok(Some(next))
    }

    async fn start_task(&self, id: Uuid) -> Result<Option<Task>, CoreError> {
        self.modify_task(id, |task| {
            if task.status != TaskStatus::Todo {
                return Err(CoreError::InvalidInput(format!(
                    "Only todo tasks can be started, task is {}",
                    task.status
                )));
            }
            task.status = TaskStatus::InProgress;
            Ok(true)
        })
        .await
    }

    async fn cancel_task(&self, id: Uuid) -> Result<Option<Task>, CoreError> {
        self.modify_task(id, |task| {
            if task.status == TaskStatus::Cancelled {
                return Ok(false);
            }
            task.status = TaskStatus::Cancelled;
            Ok(true)
        })
        .await
    }

    async fn add_tag(&self, id: Uuid, tag: &str) -> Result<Option<Task>, CoreError> {
        let tag = tag.trim().to_string();
        self.modify_task(id, move |task| {
            if tag.is_empty() || task.tags.contains(&tag) {
                return Ok(false);
            }
            task.tags.push(tag);
            Ok(true)
        })
        .await
    }

    async fn remove_tag(&self, id: Uuid, tag: &str) -> Result<Option<Task>, CoreError> {
        let tag = tag.trim().to_string();
        self.modify_task(id, move |task| {
            let before = task.tags.len();
            task.tags.retain(|t| *t != tag);
            Ok(task.tags.len() != before)
        })
        .await
    }
}

impl SqliteRepository {
    /// Applies `apply` to an unlocked task and writes it back if it reports a change.
    async fn modify_task<F>(&self, id: Uuid, apply: F) -> Result<Option<Task>, CoreError>
    where
        F: FnOnce(&mut Task) -> Result<bool, CoreError> + Send,
    {
        let mut tx = self.pool().begin().await?;

        let Some(mut task) = Self::fetch_task(&mut tx, id).await? else {
            return Ok(None);
        };
        if task.status == TaskStatus::Done {
            return Err(CoreError::TaskLocked(id));
        }

        if apply(&mut task)? {
            task.updated_at = Utc::now();
            Self::write_task(&mut tx, &task).await?;
            tx.commit().await?;
        }
        Ok(Some(task))
    }
}

// Transaction helpers shared with the other domain modules
impl SqliteRepository {
    pub(crate) async fn fetch_task(tx: &mut Transaction<'_, Sqlite>, id: Uuid) -> Result<Option<Task>, CoreError> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(Task::from))
    }

    pub(crate) async fn insert_task(tx: &mut Transaction<'_, Sqlite>, task: &Task) -> Result<(), CoreError> {
        sqlx::query(
            r#"INSERT INTO tasks
            (id, title, description, status, priority, due_at, tags, recurrence_template_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status)
        .bind(task.priority)
        .bind(task.due_at)
        .bind(Json(&task.tags))
        .bind(task.recurrence_template_id)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub(crate) async fn write_task(tx: &mut Transaction<'_, Sqlite>, task: &Task) -> Result<(), CoreError> {
        sqlx::query(
            r#"UPDATE tasks
            SET title = ?, description = ?, status = ?, priority = ?, due_at = ?, tags = ?,
                recurrence_template_id = ?, updated_at = ?
            WHERE id = ?"#,
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status)
        .bind(task.priority)
        .bind(task.due_at)
        .bind(Json(&task.tags))
        .bind(task.recurrence_template_id)
        .bind(task.updated_at)
        .bind(task.id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn fetch_template(
        tx: &mut Transaction<'_, Sqlite>,
        id: Uuid,
    ) -> Result<Option<RecurrenceTemplate>, CoreError> {
        let row: Option<TemplateRow> = sqlx::query_as("SELECT * FROM recurrence_templates WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(RecurrenceTemplate::from))
    }
}
