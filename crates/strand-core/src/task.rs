use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque task identifier. Generated by the caller before submission,
/// immutable and never reused once assigned, even after a soft delete.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn fresh() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wallet-style identity address. Comparison is case-insensitive
/// throughout; the original display casing is preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Address {}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    pub content: String,

    #[serde(rename = "is_private")]
    pub private: bool,

    #[serde(rename = "user")]
    pub owner: Address,

    #[serde(default)]
    pub completed: bool,

    #[serde(default, rename = "createdAt", with = "flexible_seconds")]
    pub created_at: i64,

    #[serde(default, rename = "completedAt", with = "flexible_seconds")]
    pub completed_at: i64,
}

impl Task {
    pub fn new(id: TaskId, content: String, private: bool, owner: Address, now: i64) -> Self {
        Self {
            id,
            content,
            private,
            owner,
            completed: false,
            created_at: now,
            completed_at: 0,
        }
    }

    /// A soft-deleted record keeps its slot but has its content cleared.
    pub fn is_deleted(&self) -> bool {
        self.content.is_empty()
    }
}

/// Drops soft-deleted records from a raw store listing. Timestamp
/// coercion already happened during deserialization, so the survivors
/// are ready for the view pipeline.
pub fn normalize_records(records: Vec<Task>) -> Vec<Task> {
    records.into_iter().filter(|task| !task.is_deleted()).collect()
}

/// Timestamps arrive from the wire as plain integers, numeric strings,
/// or not at all. Anything unparseable collapses to 0 (unset).
pub mod flexible_seconds {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Int(i64),
        Float(f64),
        Text(String),
    }

    pub fn serialize<S>(value: &i64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(*value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = Option::<Wire>::deserialize(deserializer)?;
        Ok(match wire {
            Some(Wire::Int(value)) => value,
            Some(Wire::Float(value)) if value.is_finite() => value as i64,
            Some(Wire::Text(text)) => text.trim().parse().unwrap_or(0),
            _ => 0,
        })
    }
}
