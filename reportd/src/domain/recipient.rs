//! Delivery targets of a report.

use serde::{Deserialize, Serialize};

/// An email target whose subject and body are templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailRecipient {
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    pub subject_template: String,
    #[serde(default)]
    pub body_template: Option<String>,
}

/// Where a report is delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recipient {
    TelegramChat {
        chat_id: i64,
        #[serde(default)]
        thread_id: Option<i32>,
    },
    FileServer {
        remote_path: String,
    },
    Email(EmailRecipient),
}

impl Recipient {
    pub fn telegram(chat_id: i64, thread_id: Option<i32>) -> Self {
        Self::TelegramChat { chat_id, thread_id }
    }

    pub fn file_server(remote_path: impl Into<String>) -> Self {
        Self::FileServer {
            remote_path: remote_path.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::TelegramChat { .. } => "telegram",
            Self::FileServer { .. } => "file_server",
            Self::Email(_) => "email",
        }
    }
}
