//! Typed records for the request event, dispatch payloads, and stream
//! entries. Stream payloads are string-valued on the wire; the codecs here
//! normalize whatever shape arrives into these records.

use serde::Deserialize;
use serde::Serialize;

use crate::constants;

/// Input to a `run` invocation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    pub request_id: String,
    pub xml_key: String,
    #[serde(default)]
    pub response_key: Option<String>,
    #[serde(default)]
    pub metadata_key: Option<String>,
}

impl RequestEvent {
    pub fn response_key(&self) -> String {
        self.response_key
            .clone()
            .unwrap_or_else(|| constants::response_key(&self.request_id))
    }
}

/// A dispatched task, tracked from dispatch until its group settles.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub request_id: String,
    pub group_index: usize,
    pub group_name: String,
    pub task_id: String,
    pub xml_key: String,
    pub result_key: String,
}

impl TaskDescriptor {
    /// The dispatch payload for this task at the given attempt.
    pub fn dispatch(&self, attempt: u32) -> TaskDispatch {
        TaskDispatch {
            request_id: self.request_id.clone(),
            group_idx: self.group_index,
            group_name: self.group_name.clone(),
            task_id: self.task_id.clone(),
            payload_key: self.xml_key.clone(),
            result_key: self.result_key.clone(),
            attempt,
        }
    }
}

/// Payload handed to the task invoker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDispatch {
    pub request_id: String,
    pub group_idx: usize,
    pub group_name: String,
    pub task_id: String,
    pub payload_key: String,
    pub result_key: String,
    pub attempt: u32,
}

impl TaskDispatch {
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("requestId".into(), self.request_id.clone()),
            ("groupIdx".into(), self.group_idx.to_string()),
            ("groupName".into(), self.group_name.clone()),
            ("taskId".into(), self.task_id.clone()),
            ("payloadKey".into(), self.payload_key.clone()),
            ("resultKey".into(), self.result_key.clone()),
            ("attempt".into(), self.attempt.to_string()),
        ]
    }

    pub fn from_fields(fields: &[(String, String)]) -> Option<Self> {
        let get = |name: &str| {
            fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value.clone())
        };
        let group_idx = get("groupIdx")?.parse().ok()?;
        Some(Self {
            request_id: get("requestId")?,
            group_idx,
            group_name: get("groupName").unwrap_or_else(|| format!("group-{group_idx}")),
            task_id: get("taskId")?,
            payload_key: get("payloadKey")?,
            result_key: get("resultKey")?,
            attempt: get("attempt")
                .and_then(|value| value.parse().ok())
                .unwrap_or(1),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    Completed,
    Failed,
    Other(String),
}

impl UpdateStatus {
    pub fn as_str(&self) -> &str {
        match self {
            UpdateStatus::Completed => "completed",
            UpdateStatus::Failed => "failed",
            UpdateStatus::Other(other) => other,
        }
    }
}

impl From<&str> for UpdateStatus {
    fn from(value: &str) -> Self {
        match value {
            "completed" => UpdateStatus::Completed,
            "failed" => UpdateStatus::Failed,
            other => UpdateStatus::Other(other.to_string()),
        }
    }
}

impl Serialize for UpdateStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A per-task event published by a worker onto the updates stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub request_id: String,
    /// `-1` when the entry carried no usable group index, which no live
    /// group ever matches.
    pub group_idx: i64,
    pub group_name: Option<String>,
    pub task_id: String,
    pub valuation_name: Option<String>,
    pub result_key: Option<String>,
    pub status: UpdateStatus,
    pub attempt: u32,
    pub result: Option<String>,
}

impl TaskUpdate {
    /// Lenient decode of a raw stream entry. Unknown shapes never abort the
    /// collector; they decode into a record that fails the relevant filter.
    pub fn from_fields(fields: &[(String, String)]) -> Self {
        let get = |name: &str| {
            fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value.clone())
        };
        let attempt = get("attempt")
            .or_else(|| get("attempts"))
            .and_then(|value| value.parse().ok())
            .unwrap_or(1);
        Self {
            request_id: get("requestId").unwrap_or_default(),
            group_idx: get("groupIdx")
                .and_then(|value| value.parse().ok())
                .unwrap_or(-1),
            group_name: get("groupName"),
            task_id: get("taskId").unwrap_or_default(),
            valuation_name: get("valuationName"),
            result_key: get("resultKey"),
            status: UpdateStatus::from(get("status").unwrap_or_default().as_str()),
            attempt,
            result: get("result"),
        }
    }

    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("requestId".into(), self.request_id.clone()),
            ("groupIdx".into(), self.group_idx.to_string()),
        ];
        if let Some(group_name) = &self.group_name {
            fields.push(("groupName".into(), group_name.clone()));
        }
        fields.push(("taskId".into(), self.task_id.clone()));
        if let Some(valuation_name) = &self.valuation_name {
            fields.push(("valuationName".into(), valuation_name.clone()));
        }
        if let Some(result_key) = &self.result_key {
            fields.push(("resultKey".into(), result_key.clone()));
        }
        fields.push(("status".into(), self.status.as_str().to_string()));
        fields.push(("attempt".into(), self.attempt.to_string()));
        if let Some(result) = &self.result {
            fields.push(("result".into(), result.clone()));
        }
        fields
    }
}

/// Per-request state transitions published to the lifecycle stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStatus {
    Started,
    GroupStarted,
    GroupCompleted,
    Completed,
    Failed,
}

impl LifecycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStatus::Started => "started",
            LifecycleStatus::GroupStarted => "group_started",
            LifecycleStatus::GroupCompleted => "group_completed",
            LifecycleStatus::Completed => "completed",
            LifecycleStatus::Failed => "failed",
        }
    }
}
