use chrono::Utc;
use sb_core::{
    to_document, Collection, Connection, Connector, Filter, FindOptions, NewReply, Reply, ResourceKind, Result,
    SortOrder, AUTHOR_FIELD, ID_FIELD, RESOURCE_FIELD,
};
use serde_json::json;
use uuid::Uuid;

use super::{decode_all, ensure_matched, require_parent};
use crate::cascade::{CascadeExecutor, CascadeReport};
use crate::pool::Pool;

pub struct ReplyRepository<C: Connector> {
    pool: Pool<C>,
    cascade: CascadeExecutor<C>,
}

impl<C: Connector> Clone for ReplyRepository<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            cascade: self.cascade.clone(),
        }
    }
}

impl<C: Connector> ReplyRepository<C> {
    pub fn new(pool: Pool<C>, cascade: CascadeExecutor<C>) -> Self {
        Self { pool, cascade }
    }

    #[tracing::instrument(skip_all, fields(comment = %draft.resource_id, author = %draft.author_username))]
    pub async fn create(&self, draft: NewReply) -> Result<Reply> {
        let conn = self.pool.acquire().await?;
        require_parent(&*conn, ResourceKind::Comment, draft.resource_id).await?;

        let reply = Reply::new(draft);
        conn.insert_one(Collection::Replies, to_document(&reply)?).await?;
        tracing::debug!(id = %reply.id, "reply created");
        Ok(reply)
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
        let matched = conn.update_one(Collection::Replies, &filter, set).await?;
        ensure_matched(matched, ResourceKind::Reply, id)
    }

    pub async fn list_for_comment(&self, comment_id: Uuid) -> Result<Vec<Reply>> {
        let filter = Filter::new().eq(RESOURCE_FIELD, comment_id.to_string());
        let options = FindOptions::sorted(ID_FIELD, SortOrder::Ascending);
        let conn = self.pool.acquire().await?;
        decode_all(conn.find(Collection::Replies, &filter, &options).await?)
    }

    pub async fn delete(&self, id: Uuid, author: &str) -> Result<CascadeReport> {
        self.cascade
            .cascade_delete(ResourceKind::Reply, id, Some(author))
            .await
    }
}
