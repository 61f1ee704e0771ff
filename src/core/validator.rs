//! Task schema validation.
//!
//! Turns untyped JSON that claims to be a task list into a [`TaskList`].
//! Validation is all-or-nothing: one bad element rejects the whole batch,
//! so a half-valid model response never reaches the store.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{parse_due_date, Priority, Task, TaskList, TaskStatus, UNSPECIFIED};

/// Timestamps may run at most this far ahead of the extraction time
const MAX_CLOCK_SKEW_HOURS: i64 = 24;

/// Longest accepted user id, in bytes
const MAX_USER_ID_BYTES: usize = 128;

/// Reasons a candidate task list (or user id) is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("expected a JSON object with a \"tasks\" array")]
    NotATaskList,

    #[error("task {index}: element is not a JSON object")]
    NotAnObject { index: usize },

    #[error("task {index}: missing required field \"{field}\"")]
    MissingField { index: usize, field: &'static str },

    #[error("task {index}: invalid \"{field}\": {reason}")]
    InvalidField {
        index: usize,
        field: &'static str,
        reason: String,
    },

    #[error("too many tasks in one batch: {actual} > {limit}")]
    TooManyTasks { actual: usize, limit: usize },

    #[error("invalid user id: {0}")]
    InvalidUserId(String),
}

/// Validate a candidate task list.
///
/// `extracted_at` becomes the timestamp of any task that does not carry
/// one, and anchors the plausibility check for tasks that do.
pub fn validate(
    candidate: &Value,
    extracted_at: DateTime<Utc>,
) -> Result<TaskList, ValidationError> {
    validate_batch(candidate, extracted_at, usize::MAX)
}

/// Validate a candidate task list holding at most `max_tasks` elements
pub fn validate_batch(
    candidate: &Value,
    extracted_at: DateTime<Utc>,
    max_tasks: usize,
) -> Result<TaskList, ValidationError> {
    let items = candidate
        .as_object()
        .and_then(|obj| obj.get("tasks"))
        .and_then(Value::as_array)
        .ok_or(ValidationError::NotATaskList)?;

    if items.len() > max_tasks {
        return Err(ValidationError::TooManyTasks {
            actual: items.len(),
            limit: max_tasks,
        });
    }

    items
        .iter()
        .enumerate()
        .map(|(index, item)| validate_task(index, item, extracted_at))
        .collect::<Result<Vec<_>, _>>()
        .map(TaskList::new)
}

fn validate_task(
    index: usize,
    item: &Value,
    extracted_at: DateTime<Utc>,
) -> Result<Task, ValidationError> {
    let obj = item
        .as_object()
        .ok_or(ValidationError::NotAnObject { index })?;

    let description = required_str(obj, index, "description")?.trim();
    if description.is_empty() {
        return Err(ValidationError::InvalidField {
            index,
            field: "description",
            reason: "must not be empty".to_string(),
        });
    }

    let status_label = required_str(obj, index, "status")?;
    let status = TaskStatus::parse(status_label).ok_or_else(|| ValidationError::InvalidField {
        index,
        field: "status",
        reason: format!("unknown status '{}'", status_label),
    })?;

    let priority = match optional_str(obj, index, "priority")? {
        None => Priority::Unspecified,
        Some(label) => Priority::parse(label).ok_or_else(|| ValidationError::InvalidField {
            index,
            field: "priority",
            reason: format!("unknown priority '{}'", label),
        })?,
    };

    let category = optional_str(obj, index, "category")?
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(UNSPECIFIED);

    let due_date = match optional_str(obj, index, "due_date")? {
        None => None,
        Some(text) => Some(parse_due_date(text).ok_or_else(|| ValidationError::InvalidField {
            index,
            field: "due_date",
            reason: format!("'{}' is not a date/time", text),
        })?),
    };

    let timestamp = match optional_str(obj, index, "timestamp")? {
        None => extracted_at,
        Some(text) => plausible_timestamp(text, extracted_at).map_err(|reason| {
            ValidationError::InvalidField {
                index,
                field: "timestamp",
                reason,
            }
        })?,
    };

    let mut task = Task::new(description, timestamp)
        .with_priority(priority)
        .with_category(category)
        .with_status(status);
    task.due_date = due_date;

    Ok(task)
}

fn required_str<'a>(
    obj: &'a Map<String, Value>,
    index: usize,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField { index, field }),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ValidationError::InvalidField {
            index,
            field,
            reason: "expected a string".to_string(),
        }),
    }
}

/// Null, missing and blank strings all count as absent
fn optional_str<'a>(
    obj: &'a Map<String, Value>,
    index: usize,
    field: &'static str,
) -> Result<Option<&'a str>, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ValidationError::InvalidField {
            index,
            field,
            reason: "expected a string or null".to_string(),
        }),
    }
}

/// Parse a creation timestamp and check it falls in a believable window
fn plausible_timestamp(text: &str, extracted_at: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    let text = text.trim();
    let parsed = DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            [
                "%Y-%m-%d %H:%M:%S%.f",
                "%Y-%m-%d %H:%M",
                "%Y-%m-%dT%H:%M:%S%.f",
                "%Y-%m-%dT%H:%M",
            ]
            .iter()
            .find_map(|layout| NaiveDateTime::parse_from_str(text, layout).ok())
            .map(|naive| Utc.from_utc_datetime(&naive))
            .ok_or(())
        })
        .map_err(|_| format!("'{}' is not a date/time", text))?;

    let earliest = Utc
        .with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| "invalid lower bound".to_string())?;
    let latest = extracted_at + Duration::hours(MAX_CLOCK_SKEW_HOURS);

    if parsed < earliest || parsed > latest {
        return Err(format!("'{}' is outside the plausible range", text));
    }

    Ok(parsed)
}

/// Check that a user id is usable as a collection name.
///
/// Ids map to directory names in the durable store, so path separators,
/// `..`, and control characters are refused.
pub fn validate_user_id(user_id: &str) -> Result<(), ValidationError> {
    let reject = |reason: &str| Err(ValidationError::InvalidUserId(reason.to_string()));

    if user_id.trim().is_empty() {
        return reject("must not be empty");
    }
    if user_id.len() > MAX_USER_ID_BYTES {
        return reject("too long");
    }
    if user_id == "." || user_id.contains("..") {
        return reject("must not contain '..'");
    }
    if user_id.contains(['/', '\\']) {
        return reject("must not contain path separators");
    }
    if user_id.chars().any(char::is_control) {
        return reject("must not contain control characters");
    }

    Ok(())
}
