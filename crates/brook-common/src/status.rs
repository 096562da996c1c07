use serde::{Deserialize, Serialize};

/// Lifecycle of one generation request. Terminal states are sinks: nothing
/// is emitted or persisted for a request after it reaches one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Streaming,
    Complete,
    Errored,
    Aborted,
}

impl GenerationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Errored | Self::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Streaming => "streaming",
            Self::Complete => "complete",
            Self::Errored => "errored",
            Self::Aborted => "aborted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "streaming" => Some(Self::Streaming),
            "complete" => Some(Self::Complete),
            "errored" => Some(Self::Errored),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            GenerationStatus::Pending,
            GenerationStatus::Streaming,
            GenerationStatus::Complete,
            GenerationStatus::Errored,
            GenerationStatus::Aborted,
        ] {
            assert_eq!(GenerationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(GenerationStatus::parse("bogus"), None);
    }

    #[test]
    fn only_end_states_are_terminal() {
        assert!(!GenerationStatus::Pending.is_terminal());
        assert!(!GenerationStatus::Streaming.is_terminal());
        assert!(GenerationStatus::Complete.is_terminal());
        assert!(GenerationStatus::Errored.is_terminal());
        assert!(GenerationStatus::Aborted.is_terminal());
    }
}
