use crate::error::CoreError;
use crate::models::{
    weekday_from_sunday_index, Interval, MonthOccurrence, NewTemplateData, RecurrenceMode, RecurrenceTemplate,
    UpdateTemplateData,
};
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::Weekday;
use sqlx::types::Json;
use sqlx::{FromRow, Sqlite, Transaction};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, FromRow)]
pub(crate) struct TemplateRow {
    id: Uuid,
    name: String,
    intervals: Json<Vec<Interval>>,
    day_of_month: Option<i32>,
    weekday: Option<i32>,
    occurrence_in_month: Option<i32>,
}

impl From<TemplateRow> for RecurrenceTemplate {
    fn from(row: TemplateRow) -> Self {
        let weekday_rule = row
            .weekday
            .and_then(weekday_from_sunday_index)
            .zip(row.occurrence_in_month.and_then(MonthOccurrence::from_raw));

        let mode = match weekday_rule {
            Some((weekday, occurrence)) => RecurrenceMode::WeekdayOccurrence { weekday, occurrence },
            None => RecurrenceMode::Sequential {
                day_of_month: row.day_of_month.and_then(|d| u8::try_from(d).ok()),
            },
        };

        RecurrenceTemplate {
            id: row.id,
            name: row.name,
            intervals: row.intervals.0,
            mode,
        }
    }
}

/// Storage columns `(day_of_month, weekday, occurrence_in_month)` for a mode.
fn mode_columns(mode: &RecurrenceMode) -> (Option<i32>, Option<i32>, Option<i32>) {
    match mode {
        RecurrenceMode::Sequential { day_of_month } => (day_of_month.map(i32::from), None, None),
        RecurrenceMode::WeekdayOccurrence { weekday, occurrence } => (
            None,
            Some(weekday.num_days_from_sunday() as i32),
            Some(occurrence.as_raw()),
        ),
    }
}

/// Templates seeded into an empty database.
pub fn default_templates() -> Vec<RecurrenceTemplate> {
    vec![
        RecurrenceTemplate::sequential("Daily", vec![Interval::days(1)]),
        RecurrenceTemplate::sequential("Weekly", vec![Interval::weeks(1)]),
        RecurrenceTemplate::sequential("Bi-weekly", vec![Interval::weeks(2)]),
        RecurrenceTemplate::sequential("Monthly", vec![Interval::months(1)]),
        RecurrenceTemplate::sequential("Quarterly", vec![Interval::months(3)]),
        RecurrenceTemplate::sequential("Yearly", vec![Interval::years(1)]),
        RecurrenceTemplate::weekday_occurrence(
            "First Monday of month",
            vec![Interval::months(1)],
            Weekday::Mon,
            MonthOccurrence::Nth(1),
        ),
        RecurrenceTemplate::weekday_occurrence(
            "Last Friday of month",
            vec![Interval::months(1)],
            Weekday::Fri,
            MonthOccurrence::Last,
        ),
    ]
}

#[async_trait]
impl super::RecurrenceTemplateRepository for SqliteRepository {
    async fn initialize_templates(&self) -> Result<usize, CoreError> {
        let mut tx = self.pool().begin().await?;

        let (existing,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM recurrence_templates")
            .fetch_one(&mut *tx)
            .await?;
        if existing > 0 {
            return Ok(0);
        }

        let defaults = default_templates();
        for template in &defaults {
            Self::insert_template(&mut tx, template).await?;
        }
        tx.commit().await?;

        info!(count = defaults.len(), "seeded default recurrence templates");
        Ok(defaults.len())
    }

    async fn add_template(&self, data: NewTemplateData) -> Result<RecurrenceTemplate, CoreError> {
        let template = RecurrenceTemplate {
            id: Uuid::now_v7(),
            name: data.name.trim().to_string(),
            intervals: data.intervals,
            mode: data.mode,
        };
        template.validate()?;

        let mut tx = self.pool().begin().await?;
        if Self::name_taken(&mut tx, &template.name, None).await? {
            return Err(CoreError::InvalidInput(format!(
                "Recurrence template '{}' already exists",
                template.name
            )));
        }
        Self::insert_template(&mut tx, &template).await?;
        tx.commit().await?;
        Ok(template)
    }

    async fn find_template_by_id(&self, id: Uuid) -> Result<Option<RecurrenceTemplate>, CoreError> {
        let row: Option<TemplateRow> = sqlx::query_as("SELECT * FROM recurrence_templates WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(RecurrenceTemplate::from))
    }

    async fn find_template_by_name(&self, name: &str) -> Result<Option<RecurrenceTemplate>, CoreError> {
        let row: Option<TemplateRow> = sqlx::query_as("SELECT * FROM recurrence_templates WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(RecurrenceTemplate::from))
    }

    async fn find_templates(&self) -> Result<Vec<RecurrenceTemplate>, CoreError> {
        let rows: Vec<TemplateRow> = sqlx::query_as("SELECT * FROM recurrence_templates ORDER BY name")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(RecurrenceTemplate::from).collect())
    }

    async fn update_template(&self, id: Uuid, data: UpdateTemplateData) -> Result<Option<RecurrenceTemplate>, CoreError> {
        let mut tx = self.pool().begin().await?;

        let row: Option<TemplateRow> = sqlx::query_as("SELECT * FROM recurrence_templates WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(mut template) = row.map(RecurrenceTemplate::from) else {
            return Ok(None);
        };

        if let Some(name) = data.name {
            template.name = name.trim().to_string();
        }
        if let Some(intervals) = data.intervals {
            template.intervals = intervals;
        }
        if let Some(mode) = data.mode {
            template.mode = mode;
        }
        template.validate()?;

        if Self::name_taken(&mut tx, &template.name, Some(id)).await? {
            return Err(CoreError::InvalidInput(format!(
                "Recurrence template '{}' already exists",
                template.name
            )));
        }

        let (day_of_month, weekday, occurrence) = mode_columns(&template.mode);
        sqlx::query(
            r#"UPDATE recurrence_templates
            SET name = ?, intervals = ?, day_of_month = ?, weekday = ?, occurrence_in_month = ?
            WHERE id = ?"#,
        )
        .bind(&template.name)
        .bind(Json(&template.intervals))
        .bind(day_of_month)
        .bind(weekday)
        .bind(occurrence)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(template))
    }

    async fn delete_template(&self, id: Uuid) -> Result<bool, CoreError> {
        let mut tx = self.pool().begin().await?;

        let (in_use,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE recurrence_template_id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if in_use > 0 {
            return Err(CoreError::TemplateInUse(id));
        }

        let result = sqlx::query("DELETE FROM recurrence_templates WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }
}

impl SqliteRepository {
    async fn insert_template(tx: &mut Transaction<'_, Sqlite>, template: &RecurrenceTemplate) -> Result<(), CoreError> {
        let (day_of_month, weekday, occurrence) = mode_columns(&template.mode);
        sqlx::query(
            r#"INSERT INTO recurrence_templates (id, name, intervals, day_of_month, weekday, occurrence_in_month)
            VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(template.id)
        .bind(&template.name)
        .bind(Json(&template.intervals))
        .bind(day_of_month)
        .bind(weekday)
        .bind(occurrence)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn name_taken(tx: &mut Transaction<'_, Sqlite>, name: &str, except: Option<Uuid>) -> Result<bool, CoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM recurrence_templates WHERE name = ? AND (? IS NULL OR id != ?)")
                .bind(name)
                .bind(except)
                .bind(except)
                .fetch_one(&mut **tx)
                .await?;
        Ok(count > 0)
    }
}
