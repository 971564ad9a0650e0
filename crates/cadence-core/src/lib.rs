//! # Cadence Core Library
//!
//! A recurring-obligation engine: calendar-aware recurrence calculation, bounded
//! generation of task instances, and batch reconciliation that keeps every
//! recurring task generated up to a forward horizon.
//!
//! ## Features
//!
//! - **Recurrence Templates**: Chained intervals (days, weeks, months, years) with
//!   month-end clamping, fixed day-of-month and "nth weekday of month" rules
//! - **Single-Instance Regeneration**: Completing a template-driven task creates its
//!   successor
//! - **Bounded Series Generation**: Recurring tasks produce every occurrence up to
//!   their end date or the advance horizon, never looping indefinitely
//! - **Batch Reconciliation**: Extends all active recurring tasks without duplicating
//!   covered dates, isolating failures per recurring task
//! - **SQLite Persistence**: Migrations and repositories built on sqlx
//!
//! ## Core Modules
//!
//! - [`recurrence`]: Date arithmetic and the bulk-generation step function
//! - [`generator`]: Single-instance and bounded-series generation
//! - [`reconcile`]: Batch reconciliation over a [`reconcile::GenerationStore`]
//! - [`repository`]: Data access layer with Repository pattern
//! - [`models`]: Core data structures and transfer objects
//! - [`config`]: Layered configuration (defaults, `cadence.toml`, environment)
//! - [`db`]: Database connection and migration management
//! - [`error`]: Error types
//! - [`query`]: Task filters
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use cadence_core::{
//!     config::Config,
//!     models::{Interval, NewRecurringTaskData},
//!     repository::{RecurrenceTemplateRepository, RecurringTaskRepository, SqliteRepository},
//! };
//! use chrono::Utc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let repo = SqliteRepository::connect(&config).await?;
//!     repo.initialize_templates().await?;
//!
//!     let standup = repo
//!         .create_recurring_task(NewRecurringTaskData {
//!             title: "Weekly review".to_string(),
//!             description: None,
//!             priority: None,
//!             start_date: Utc::now(),
//!             end_date: None,
//!             intervals: vec![Interval::weeks(1)],
//!             tags: vec!["planning".to_string()],
//!             category_ids: Vec::new(),
//!         })
//!         .await?;
//!     println!("Created {} with {} instances", standup.title, repo.find_linked_tasks(standup.id).await?.len());
//!
//!     // Typically run on a schedule
//!     let summary = repo.reconcile_all(Utc::now()).await;
//!     println!("Generated {} new instances", summary.generated_count);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod generator;
pub mod models;
pub mod query;
pub mod reconcile;
pub mod recurrence;
pub mod repository;
