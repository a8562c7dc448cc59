//! Existence predicates over the content graph.
//!
//! The `*_on` helpers run on a connection the caller already holds, so a
//! repository can check a parent and write the child on one handle.

use sb_core::{Connection, Connector, Filter, ResourceKind, Result};
use uuid::Uuid;

use crate::pool::Pool;

/// Read-only view of which content nodes exist.
pub struct ResourceGraph<C: Connector> {
    pool: Pool<C>,
}

impl<C: Connector> Clone for ResourceGraph<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<C: Connector> ResourceGraph<C> {
    pub fn new(pool: Pool<C>) -> Self {
        Self { pool }
    }

    pub async fn exists(&self, kind: ResourceKind, id: Uuid) -> Result<bool> {
        let conn = self.pool.acquire().await?;
        exists_on(&*conn, kind, id).await
    }

    pub async fn story_exists(&self, id: Uuid) -> Result<bool> {
        self.exists(ResourceKind::Story, id).await
    }

    pub async fn comment_exists(&self, id: Uuid) -> Result<bool> {
        self.exists(ResourceKind::Comment, id).await
    }

    pub async fn reply_exists(&self, id: Uuid) -> Result<bool> {
        self.exists(ResourceKind::Reply, id).await
    }

    /// First kind under which `id` exists, if any.
    pub async fn locate(&self, id: Uuid) -> Result<Option<ResourceKind>> {
        let conn = self.pool.acquire().await?;
        locate_on(&*conn, id).await
    }
}

/// Existence check on an already-acquired connection.
pub(crate) async fn exists_on<T: Connection>(conn: &T, kind: ResourceKind, id: Uuid) -> Result<bool> {
    Ok(conn.count(kind.collection(), &Filter::by_id(id)).await? > 0)
}

pub(crate) async fn locate_on<T: Connection>(conn: &T, id: Uuid) -> Result<Option<ResourceKind>> {
    for kind in ResourceKind::ALL {
        if exists_on(conn, kind, id).await? {
            return Ok(Some(kind));
        }
    }
    Ok(None)
}
