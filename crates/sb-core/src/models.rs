//! # Domain Models
//!
//! These structs represent the core entities of Story-Board.
//! We use UUID v7 for time-ordered, globally unique identification, stored
//! under `_id` in every document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Top of the content graph. Owns zero or more Comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author_username: String,
    /// Usernames that liked the story
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub dislikes: Vec<String>,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub dislike_count: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Set once the author edits the story after publishing
    #[serde(default)]
    pub updated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Author-supplied fields for a new Story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStory {
    pub title: String,
    pub content: String,
    pub author_username: String,
    pub tags: Vec<String>,
}

/// Replacement values applied by an ownership-scoped Story update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryUpdate {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
}

impl Story {
    pub fn new(draft: NewStory) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            title: draft.title,
            content: draft.content,
            author_username: draft.author_username,
            likes: Vec::new(),
            dislikes: Vec::new(),
            like_count: 0,
            dislike_count: 0,
            tags: draft.tags,
            updated: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A comment on a Story. Owns zero or more Replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "_id")]
    pub id: Uuid,
    /// The Story this comment belongs to
    pub resource_id: Uuid,
    pub author_username: String,
    pub content: String,
    #[serde(default)]
    pub edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewComment {
    pub resource_id: Uuid,
    pub author_username: String,
    pub content: String,
}

impl Comment {
    pub fn new(draft: NewComment) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            resource_id: draft.resource_id,
            author_username: draft.author_username,
            content: draft.content,
            edited: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A reply to a Comment. Leaf content node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    #[serde(rename = "_id")]
    pub id: Uuid,
    /// The Comment this reply answers
    pub resource_id: Uuid,
    pub author_username: String,
    pub content: String,
    #[serde(default)]
    pub edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReply {
    pub resource_id: Uuid,
    pub author_username: String,
    pub content: String,
}

impl Reply {
    pub fn new(draft: NewReply) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            resource_id: draft.resource_id,
            author_username: draft.author_username,
            content: draft.content,
            edited: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A moderation flag raised against a Story, Comment or Reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub flagged_resource: Uuid,
    pub reporter_username: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFlag {
    pub flagged_resource: Uuid,
    pub reporter_username: String,
    pub reason: String,
}

impl Flag {
    pub fn new(draft: NewFlag) -> Self {
        Self {
            id: Uuid::now_v7(),
            flagged_resource: draft.flagged_resource,
            reporter_username: draft.reporter_username,
            reason: draft.reason,
            created_at: Utc::now(),
        }
    }
}

/// Staff account. Unrelated to the content graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Admin {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// Salted hash produced by the auth collaborator; never a plain password
    #[serde(rename = "password")]
    pub password_hash: String,
    #[serde(default)]
    pub last_login_ip: Option<String>,
    #[serde(default)]
    pub last_login_ips: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAdmin {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

impl Admin {
    pub fn new(draft: NewAdmin) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            username: draft.username,
            email: draft.email,
            password_hash: draft.password_hash,
            last_login_ip: None,
            last_login_ips: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Domain event handed to the external message bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub action: String,
    pub target: String,
    pub resource_id: Uuid,
    pub actor_username: String,
    pub message: String,
}

impl Event {
    pub const COMMENT_ON_STORY: &'static str = "comment on story";

    /// The event emitted once a comment has been stored.
    pub fn comment_created(comment: &Comment) -> Self {
        Self {
            action: Self::COMMENT_ON_STORY.to_string(),
            target: comment.resource_id.to_string(),
            resource_id: comment.resource_id,
            actor_username: comment.author_username.clone(),
            message: format!(
                "{} commented on a story with the ID:{}",
                comment.author_username, comment.resource_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_story_document_uses_camel_case_and_underscore_id() {
        let story = Story::new(NewStory {
            title: "Hello".into(),
            content: "World".into(),
            author_username: "alice".into(),
            tags: vec!["intro".into()],
        });
        let value = serde_json::to_value(&story).unwrap();
        assert_eq!(value["_id"], serde_json::json!(story.id.to_string()));
        assert_eq!(value["authorUsername"], "alice");
        assert_eq!(value["likeCount"], 0);
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_admin_password_field_name() {
        let admin = Admin::new(NewAdmin {
            username: "root".into(),
            email: "root@example.com".into(),
            password_hash: "$argon2id$stub".into(),
        });
        let value = serde_json::to_value(&admin).unwrap();
        assert_eq!(value["password"], "$argon2id$stub");
        assert_eq!(value["lastLoginIps"], serde_json::json!([]));
    }

    #[test]
    fn test_comment_event_message() {
        let comment = Comment::new(NewComment {
            resource_id: Uuid::now_v7(),
            author_username: "carol".into(),
            content: "nice".into(),
        });
        let event = Event::comment_created(&comment);
        assert_eq!(event.action, "comment on story");
        assert_eq!(event.target, comment.resource_id.to_string());
        assert_eq!(
            event.message,
            format!("carol commented on a story with the ID:{}", comment.resource_id)
        );
    }
}
