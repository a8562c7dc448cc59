use std::sync::Arc;

use chrono::Utc;
use sb_core::{
    to_document, Collection, Comment, Connection, Connector, Event, EventPublisher, Filter, FindOptions, NewComment,
    ResourceKind, Result, SortOrder, AUTHOR_FIELD, ID_FIELD, RESOURCE_FIELD,
};
use serde_json::json;
use tracing::Instrument;
use uuid::Uuid;

use super::{decode_all, ensure_matched, require_parent};
use crate::cascade::{CascadeExecutor, CascadeReport};
use crate::pool::Pool;

pub struct CommentRepository<C: Connector> {
    pool: Pool<C>,
    cascade: CascadeExecutor<C>,
    publisher: Arc<dyn EventPublisher>,
}

impl<C: Connector> Clone for CommentRepository<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            cascade: self.cascade.clone(),
            publisher: Arc::clone(&self.publisher),
        }
    }
}

impl<C: Connector> CommentRepository<C> {
    pub fn new(pool: Pool<C>, cascade: CascadeExecutor<C>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            pool,
            cascade,
            publisher,
        }
    }

    /// Stores a comment on an existing story and announces it.
    /// The announcement never fails the call.
    #[tracing::instrument(skip_all, fields(story = %draft.resource_id, author = %draft.author_username))]
    pub async fn create(&self, draft: NewComment) -> Result<Comment> {
        let conn = self.pool.acquire().await?;
        require_parent(&*conn, ResourceKind::Story, draft.resource_id).await?;

        let comment = Comment::new(draft);
        conn.insert_one(Collection::Comments, to_document(&comment)?).await?;
        conn.release();

        self.announce(Event::comment_created(&comment));
        Ok(comment)
    }

    fn announce(&self, event: Event) {
        let publisher = Arc::clone(&self.publisher);
        tokio::spawn(
            async move {
                if let Err(err) = publisher.publish(event).await {
                    tracing::warn!(error = %err, "failed to publish comment event");
                }
            }
            .in_current_span(),
        );
    }

    #[tracing::instrument(skip(self, content))]
    pub async fn update(&self, id: Uuid, author: &str, content: &str) -> Result<()> {
        let set = to_document(&json!({
            "content": content,
            "edited": true,
            "updatedAt": Utc::now(),
        }))?;
        let filter = Filter::by_id(id).eq(AUTHOR_FIELD, author);

        let conn = self.pool.acquire().await?;
        let matched = conn.update_one(Collection::Comments, &filter, set).await?;
        ensure_matched(matched, ResourceKind::Comment, id)
    }

    /// Comments on a story, oldest first.
    pub async fn list_for_story(&self, story_id: Uuid) -> Result<Vec<Comment>> {
        let filter = Filter::new().eq(RESOURCE_FIELD, story_id.to_string());
        let options = FindOptions::sorted(ID_FIELD, SortOrder::Ascending);
        let conn = self.pool.acquire().await?;
        decode_all(conn.find(Collection::Comments, &filter, &options).await?)
    }

    /// Removes the author's comment with its replies and flags.
    pub async fn delete(&self, id: Uuid, author: &str) -> Result<CascadeReport> {
        self.cascade
            .cascade_delete(ResourceKind::Comment, id, Some(author))
            .await
    }
}
