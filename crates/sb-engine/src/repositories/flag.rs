use sb_core::{
    to_document, AppError, Collection, Connection, Connector, Filter, FindOptions, Flag, NewFlag, Result, SortOrder,
    FLAGGED_FIELD, ID_FIELD,
};
use uuid::Uuid;

use super::decode_all;
use crate::graph::locate_on;
use crate::pool::Pool;

/// Moderation flags. Removed only as part of a cascade.
pub struct FlagRepository<C: Connector> {
    pool: Pool<C>,
}

impl<C: Connector> Clone for FlagRepository<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<C: Connector> FlagRepository<C> {
    pub fn new(pool: Pool<C>) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip_all, fields(resource = %draft.flagged_resource, reporter = %draft.reporter_username))]
    pub async fn create(&self, draft: NewFlag) -> Result<Flag> {
        let conn = self.pool.acquire().await?;
        let Some(kind) = locate_on(&*conn, draft.flagged_resource).await? else {
            return Err(AppError::Validation(format!(
                "flagged resource {} does not exist",
                draft.flagged_resource
            )));
        };

        let flag = Flag::new(draft);
        conn.insert_one(Collection::Flags, to_document(&flag)?).await?;
        tracing::debug!(id = %flag.id, %kind, "flag raised");
        Ok(flag)
    }

    pub async fn list_for_resource(&self, resource_id: Uuid) -> Result<Vec<Flag>> {
        let filter = Filter::new().eq(FLAGGED_FIELD, resource_id.to_string());
        let options = FindOptions::sorted(ID_FIELD, SortOrder::Ascending);
        let conn = self.pool.acquire().await?;
        decode_all(conn.find(Collection::Flags, &filter, &options).await?)
    }
}
