use uuid::Uuid;

use crate::models::{TaskPriority, TaskStatus};

/// A single predicate for [`crate::repository::TaskRepository::find_tasks`].
///
/// Multiple filters are combined with AND.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskFilter {
    Status(TaskStatus),
    Priority(TaskPriority),
    Template(Uuid),
    /// Only tasks that regenerate from a template.
    HasTemplate,
}
