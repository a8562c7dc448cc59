//! story-board/crates/sb-core/src/lib.rs
//!
//! The domain model and port definitions for Story-Board.

pub mod document;
pub mod error;
pub mod graph;
pub mod models;
pub mod traits;

// Re-exporting for easier access in other crates
pub use document::*;
pub use error::*;
pub use graph::*;
pub use models::*;
pub use traits::*;

#[cfg(test)]
mod tests {
    use super::models::*;

    #[test]
    fn test_comment_ids_sort_by_creation() {
        let first = Comment::new(NewComment {
            resource_id: uuid::Uuid::now_v7(),
            author_username: "alice".into(),
            content: "first".into(),
        });
        let second = Comment::new(NewComment {
            resource_id: first.resource_id,
            author_username: "bob".into(),
            content: "second".into(),
        });
        assert!(first.id < second.id);
        assert!(!second.edited);
    }
}
