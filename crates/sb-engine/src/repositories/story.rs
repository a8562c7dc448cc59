use chrono::Utc;
use sb_core::{
    to_document, AppError, Collection, Connection, Connector, Filter, FindOptions, NewStory, ResourceKind, Result,
    SortOrder, Story, StoryUpdate, AUTHOR_FIELD, ID_FIELD,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::{decode_all, decode_one, ensure_matched};
use crate::cascade::{CascadeExecutor, CascadeReport};
use crate::pool::Pool;

pub const STORIES_PER_PAGE: u64 = 10;

/// Listing order for story pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryOrder {
    #[default]
    Newest,
    Oldest,
}

impl StoryOrder {
    /// v7 ids sort by creation time, so ordering by `_id` is ordering by age.
    fn find_options(self) -> FindOptions {
        let direction = match self {
            StoryOrder::Newest => SortOrder::Descending,
            StoryOrder::Oldest => SortOrder::Ascending,
        };
        FindOptions::sorted(ID_FIELD, direction)
    }
}

pub struct StoryRepository<C: Connector> {
    pool: Pool<C>,
    cascade: CascadeExecutor<C>,
}

impl<C: Connector> Clone for StoryRepository<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            cascade: self.cascade.clone(),
        }
    }
}

impl<C: Connector> StoryRepository<C> {
    pub fn new(pool: Pool<C>, cascade: CascadeExecutor<C>) -> Self {
        Self { pool, cascade }
    }

    #[tracing::instrument(skip_all, fields(author = %draft.author_username))]
    pub async fn create(&self, draft: NewStory) -> Result<Story> {
        let story = Story::new(draft);
        let conn = self.pool.acquire().await?;
        conn.insert_one(Collection::Stories, to_document(&story)?).await?;
        tracing::debug!(id = %story.id, "story created");
        Ok(story)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Story>> {
        let conn = self.pool.acquire().await?;
        decode_one(conn.find_one(Collection::Stories, &Filter::by_id(id)).await?)
    }

    /// One page of stories. Pages start at 1 and hold [`STORIES_PER_PAGE`] entries.
    pub async fn find_page(&self, page: u64, order: StoryOrder) -> Result<Vec<Story>> {
        let skip = page
            .checked_sub(1)
            .and_then(|index| index.checked_mul(STORIES_PER_PAGE))
            .ok_or_else(|| AppError::Validation(format!("invalid page number {page}")))?;
        let options = order.find_options().page(skip, STORIES_PER_PAGE);

        let conn = self.pool.acquire().await?;
        decode_all(conn.find(Collection::Stories, &Filter::new(), &options).await?)
    }

    #[tracing::instrument(skip(self, changes))]
    pub async fn update(&self, id: Uuid, author: &str, changes: StoryUpdate) -> Result<()> {
        let set = to_document(&json!({
            "title": changes.title,
            "content": changes.content,
            "tags": changes.tags,
            "updated": true,
            "updatedAt": Utc::now(),
        }))?;
        let filter = Filter::by_id(id).eq(AUTHOR_FIELD, author);

        let conn = self.pool.acquire().await?;
        let matched = conn.update_one(Collection::Stories, &filter, set).await?;
        ensure_matched(matched, ResourceKind::Story, id)
    }

    /// Cascades over the story's comments and flags. `None` skips the
    /// ownership check (moderation).
    pub async fn delete(&self, id: Uuid, author: Option<&str>) -> Result<CascadeReport> {
        self.cascade.cascade_delete(ResourceKind::Story, id, author).await
    }
}
