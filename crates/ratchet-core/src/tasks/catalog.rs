use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{MigrationError, MigrationResult};
use crate::tasks::{MigrationTask, TaskSource};

/// Queries every source over every search path and concatenates the results.
///
/// Order is not significant before `sort_by_level`. Any source failure fails
/// the whole collection call.
pub fn collect(
    sources: &[Arc<dyn TaskSource>],
    search_paths: &[String],
) -> MigrationResult<Vec<Arc<dyn MigrationTask>>> {
    let mut tasks = Vec::new();
    for source in sources {
        for path in search_paths {
            tasks.extend(source.discover(path)?);
        }
    }
    Ok(tasks)
}

/// Rejects a merged task set with a missing or duplicated level.
///
/// A duplicate-level error names both conflicting tasks. Validation always
/// precedes execution; no store is touched when it fails.
pub fn validate(tasks: &[Arc<dyn MigrationTask>]) -> MigrationResult<()> {
    let mut seen: HashMap<i64, &str> = HashMap::new();
    for task in tasks {
        let Some(level) = task.level() else {
            return Err(MigrationError::validation(format!(
                "task '{}' has no patch level assigned",
                task.name()
            ))
            .for_task(task.name()));
        };
        if let Some(existing) = seen.insert(level, task.name()) {
            return Err(MigrationError::validation(format!(
                "tasks '{existing}' and '{}' both declare patch level {level}",
                task.name()
            ))
            .for_task(task.name()));
        }
    }
    Ok(())
}

/// Ascending by level. Ties are impossible after `validate`.
pub fn sort_by_level(tasks: &mut [Arc<dyn MigrationTask>]) {
    tasks.sort_by_key(|task| task.level().unwrap_or(i64::MIN));
}

/// The next free level: `max + 1`, or `1` for an empty set.
pub fn next_level(tasks: &[Arc<dyn MigrationTask>]) -> i64 {
    tasks
        .iter()
        .filter_map(|task| task.level())
        .max()
        .map(|max| max + 1)
        .unwrap_or(1)
}
