//! Conversation turns and citations

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ImageAttachment;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A web source the model grounded its answer on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub uri: String,
    pub title: String,
}

impl Citation {
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: title.into(),
        }
    }

    /// Short label for display: the title, else the URI's host, else the URI.
    pub fn display_label(&self) -> String {
        if !self.title.trim().is_empty() {
            return self.title.clone();
        }
        url::Url::parse(&self.uri)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| self.uri.clone())
    }
}

/// One entry of the conversation log. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub text: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageAttachment>,

    /// The turn is an apology standing in for a failed answer
    #[serde(default)]
    pub is_error: bool,

    /// Persona that produced an assistant turn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Persona's fixed role label, if it has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_label: Option<String>,

    /// Present only when at least one source was reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
}

impl ConversationTurn {
    fn base(role: Role, text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role,
            text,
            image: None,
            is_error: false,
            author: None,
            role_label: None,
            citations: None,
        }
    }

    pub fn user(text: impl Into<String>, image: Option<ImageAttachment>) -> Self {
        Self {
            image,
            ..Self::base(Role::User, text.into())
        }
    }

    /// A completed answer. An empty citation list is stored as `None`.
    pub fn assistant(
        text: impl Into<String>,
        author: impl Into<String>,
        role_label: Option<String>,
        citations: Vec<Citation>,
    ) -> Self {
        Self {
            author: Some(author.into()),
            role_label,
            citations: if citations.is_empty() { None } else { Some(citations) },
            ..Self::base(Role::Assistant, text.into())
        }
    }

    /// Fixed apology recorded in place of a failed answer.
    pub fn error(apology: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            is_error: true,
            author: Some(author.into()),
            ..Self::base(Role::Assistant, apology.into())
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    pub fn citations(&self) -> &[Citation] {
        self.citations.as_deref().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assistant_turn_without_citations() {
        let turn = ConversationTurn::assistant("Hola", "synod", None, vec![]);
        assert!(turn.citations.is_none());
        assert!(turn.citations().is_empty());
        assert_eq!(turn.author.as_deref(), Some("synod"));
        assert!(!turn.is_error);
    }

    #[test]
    fn test_assistant_turn_keeps_citation_order() {
        let cites = vec![
            Citation::new("https://a.example/1", "A"),
            Citation::new("https://b.example/2", "B"),
            Citation::new("https://a.example/1", "A"),
        ];
        let turn = ConversationTurn::assistant("x", "math", None, cites.clone());
        assert_eq!(turn.citations(), cites.as_slice());
    }

    #[test]
    fn test_error_turn() {
        let turn = ConversationTurn::error("Lo siento", "galen");
        assert!(turn.is_error);
        assert!(turn.is_assistant());
        assert_eq!(turn.text, "Lo siento");
    }

    #[test]
    fn test_turn_ids_are_unique() {
        let a = ConversationTurn::user("a", None);
        let b = ConversationTurn::user("a", None);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_citation_display_label() {
        assert_eq!(Citation::new("https://x.org/p", "Title").display_label(), "Title");
        assert_eq!(
            Citation::new("https://news.example.com/a?b=c", "").display_label(),
            "news.example.com"
        );
        assert_eq!(Citation::new("not a url", " ").display_label(), "not a url");
    }

    #[test]
    fn test_role_serde() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(Role::User.to_string(), "user");
    }
}
