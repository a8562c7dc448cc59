//! # Mutation Repositories
//!
//! Create / read / update operations for every collection, sharing the
//! engine's pool. Deletes go through the cascade executor.

mod admin;
mod comment;
mod flag;
mod reply;
mod story;

pub use admin::{AdminRepository, MAX_LOGIN_IPS};
pub use comment::CommentRepository;
pub use flag::FlagRepository;
pub use reply::ReplyRepository;
pub use story::{StoryOrder, StoryRepository, STORIES_PER_PAGE};

use std::fmt::Display;

use sb_core::{from_document, AppError, Connection, Document, ResourceKind, Result};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::graph::exists_on;

fn decode_one<T: DeserializeOwned>(doc: Option<Document>) -> Result<Option<T>> {
    doc.map(from_document).transpose()
}

fn decode_all<T: DeserializeOwned>(docs: Vec<Document>) -> Result<Vec<T>> {
    docs.into_iter().map(from_document).collect()
}

/// Zero matches on an ownership-scoped write.
fn ensure_matched(matched: u64, kind: impl Display, id: impl Display) -> Result<()> {
    if matched == 0 {
        return Err(AppError::not_found_or_forbidden(kind, id));
    }
    Ok(())
}

/// Checks the parent on the handle the child will be written through.
async fn require_parent<T: Connection>(conn: &T, kind: ResourceKind, id: Uuid) -> Result<()> {
    if !exists_on(conn, kind, id).await? {
        return Err(AppError::Validation(format!("{kind} {id} does not exist")));
    }
    Ok(())
}
