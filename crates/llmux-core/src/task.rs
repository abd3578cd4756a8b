//! Abstract task types used for routing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of work a completion is for. Routers map each task type to a
/// prioritized list of candidate models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    General,
    Creative,
    CodeGeneration,
    CodeExplanation,
    ContentModeration,
    TextClassification,
    Summarization,
    Extraction,
}

impl TaskType {
    /// Every task type, in declaration order.
    pub const ALL: [TaskType; 8] = [
        TaskType::General,
        TaskType::Creative,
        TaskType::CodeGeneration,
        TaskType::CodeExplanation,
        TaskType::ContentModeration,
        TaskType::TextClassification,
        TaskType::Summarization,
        TaskType::Extraction,
    ];

    /// snake_case name of the task type.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::General => "general",
            TaskType::Creative => "creative",
            TaskType::CodeGeneration => "code_generation",
            TaskType::CodeExplanation => "code_explanation",
            TaskType::ContentModeration => "content_moderation",
            TaskType::TextClassification => "text_classification",
            TaskType::Summarization => "summarization",
            TaskType::Extraction => "extraction",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| {
                let names: Vec<&str> = TaskType::ALL.iter().map(|t| t.as_str()).collect();
                format!("unknown task type '{}'. Valid values: {}", s, names.join(", "))
            })
    }
}
