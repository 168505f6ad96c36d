use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One turn of the journaling chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Sender::Assistant, text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Assistant,
    System,
}

impl Sender {
    /// Role string for the chat-completions wire format.
    pub fn as_role(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
            Sender::System => "system",
        }
    }
}

/// A suggested (or user-added) action item attached to the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTask {
    pub id: Uuid,
    pub title: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub usefulness: TaskUsefulness,
}

impl ActionTask {
    pub fn new(title: impl Into<String>, details: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            details,
            created_at: Utc::now(),
            status: TaskStatus::NotSet,
            usefulness: TaskUsefulness::NotSet,
        }
    }

    /// Text the keyword tables match against.
    pub fn matchable_text(&self) -> String {
        let mut text = self.title.to_lowercase();
        if let Some(details) = &self.details {
            text.push(' ');
            text.push_str(&details.to_lowercase());
        }
        text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Done,
    Skipped,
    #[default]
    NotSet,
}

impl TaskStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Done => "done",
            TaskStatus::Skipped => "skipped",
            TaskStatus::NotSet => "not_set",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => TaskStatus::Pending,
            "done" => TaskStatus::Done,
            "skipped" => TaskStatus::Skipped,
            _ => TaskStatus::NotSet,
        }
    }

    /// Tasks in these states stay in the stored pending list.
    pub fn is_open(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::NotSet)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskUsefulness {
    #[default]
    NotSet,
    Low,
    Medium,
    High,
}

impl TaskUsefulness {
    pub fn as_db_str(self) -> &'static str {
        match self {
            TaskUsefulness::NotSet => "not_set",
            TaskUsefulness::Low => "low",
            TaskUsefulness::Medium => "medium",
            TaskUsefulness::High => "high",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => TaskUsefulness::Low,
            "medium" => TaskUsefulness::Medium,
            "high" => TaskUsefulness::High,
            _ => TaskUsefulness::NotSet,
        }
    }

    /// Preference-weight signal a rating maps to.
    pub fn as_signal(self) -> f64 {
        match self {
            TaskUsefulness::High => 1.0,
            TaskUsefulness::Medium => 0.6,
            TaskUsefulness::Low => 0.2,
            TaskUsefulness::NotSet => 0.5,
        }
    }
}
