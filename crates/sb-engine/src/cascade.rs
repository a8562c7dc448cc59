//! # Cascade Executor
//!
//! Deletes a resource together with its dependents as one atomic unit.
//!
//! One transaction (snapshot reads, majority writes) is opened per cascade.
//! The primary delete and one delete per dependent collection run as
//! concurrent tasks that all write through clones of that transaction's
//! session. Every task is joined before the commit decision; the first
//! failure aborts the rest and the transaction, so callers only ever see
//! "everything committed" or a single error.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use sb_core::{
    document_id, AppError, CascadeDepth, Collection, Connection, Connector, Filter, FindOptions, ResourceKind,
    Result, Session, TransactionOptions, AUTHOR_FIELD,
};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::pool::Pool;

type SessionOf<C> = <<C as Connector>::Connection as Connection>::Session;

/// What a committed cascade removed, per collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeReport {
    pub kind: ResourceKind,
    pub id: Uuid,
    pub deleted: BTreeMap<Collection, u64>,
}

impl CascadeReport {
    pub fn deleted_from(&self, collection: Collection) -> u64 {
        self.deleted.get(&collection).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.deleted.values().sum()
    }
}

#[derive(Debug, Clone)]
struct DeleteStep {
    collection: Collection,
    filter: Filter,
    /// The root delete: removes one document and must match.
    primary: bool,
}

pub struct CascadeExecutor<C: Connector> {
    pool: Pool<C>,
    depth: CascadeDepth,
    deadline: Option<Duration>,
    options: TransactionOptions,
}

impl<C: Connector> Clone for CascadeExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            depth: self.depth,
            deadline: self.deadline,
            options: self.options,
        }
    }
}

impl<C: Connector> CascadeExecutor<C> {
    pub fn new(pool: Pool<C>) -> Self {
        Self {
            pool,
            depth: CascadeDepth::default(),
            deadline: None,
            options: TransactionOptions::SNAPSHOT_MAJORITY,
        }
    }

    pub fn with_depth(mut self, depth: CascadeDepth) -> Self {
        self.depth = depth;
        self
    }

    /// Bounds the whole cascade (planning, fan-out and join).
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn depth(&self) -> CascadeDepth {
        self.depth
    }

    /// Deletes `id` and its dependents. With `required_author` set, the root
    /// is only deleted when it belongs to that author; otherwise nothing is.
    #[tracing::instrument(
        name = "cascade_delete",
        skip(self, required_author),
        fields(kind = %kind, id = %id, depth = ?self.depth)
    )]
    pub async fn cascade_delete(
        &self,
        kind: ResourceKind,
        id: Uuid,
        required_author: Option<&str>,
    ) -> Result<CascadeReport> {
        let deadline = self.deadline.map(|limit| Instant::now() + limit);
        let mut conn = self.pool.acquire().await?;
        let session = conn.start_transaction(self.options).await?;

        match self.execute(&session, kind, id, required_author, deadline).await {
            Ok(deleted) => {
                if let Err(err) = session.commit().await {
                    conn.mark_broken();
                    tracing::warn!(error = %err, "cascade commit failed");
                    return Err(match err {
                        AppError::TransactionAborted(_) => err,
                        other => AppError::TransactionAborted(format!("commit failed: {other}")),
                    });
                }
                let report = CascadeReport { kind, id, deleted };
                tracing::info!(total = report.total(), "cascade committed");
                Ok(report)
            }
            Err(err) => {
                if let Err(abort_err) = session.abort().await {
                    conn.mark_broken();
                    tracing::warn!(error = %abort_err, "abort after failed cascade also failed");
                }
                tracing::warn!(error = %err, "cascade aborted");
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        session: &SessionOf<C>,
        kind: ResourceKind,
        id: Uuid,
        required_author: Option<&str>,
        deadline: Option<Instant>,
    ) -> Result<BTreeMap<Collection, u64>> {
        let steps = within(deadline, self.plan(session, kind, id, required_author)).await?;

        let mut tasks = JoinSet::new();
        for step in steps {
            let span = tracing::debug_span!("fan_out", collection = %step.collection, primary = step.primary);
            tasks.spawn(run_step(session.clone(), kind, id, step).instrument(span));
        }
        join_fan_out(tasks, deadline).await
    }

    /// Primary delete plus one step per dependent collection, derived from
    /// the graph table. Shallow mode covers the root's direct children and
    /// the flags on them; transitive mode walks down to the leaves. Child ids
    /// are discovered through the session, so they come from the same
    /// snapshot the deletes act on.
    async fn plan(
        &self,
        session: &SessionOf<C>,
        kind: ResourceKind,
        id: Uuid,
        required_author: Option<&str>,
    ) -> Result<Vec<DeleteStep>> {
        let mut primary = Filter::by_id(id);
        if let Some(author) = required_author {
            primary = primary.eq(AUTHOR_FIELD, author);
        }
        let mut steps = vec![DeleteStep {
            collection: kind.collection(),
            filter: primary,
            primary: true,
        }];

        let shallow = self.depth == CascadeDepth::Shallow;
        let mut references: BTreeMap<(Collection, &'static str), Vec<String>> = BTreeMap::new();
        let mut frontier = vec![(kind, vec![id.to_string()], true)];
        while let Some((parent, parent_ids, direct)) = frontier.pop() {
            for link in parent.children() {
                if shallow && !direct && link.collection != Collection::Flags {
                    continue;
                }
                references
                    .entry((link.collection, link.field))
                    .or_default()
                    .extend(parent_ids.iter().cloned());

                let Some(child) = link.kind.filter(|_| direct || !shallow) else {
                    continue;
                };
                let filter = Filter::new().any_of(link.field, parent_ids.iter().cloned());
                let found = session
                    .find(link.collection, &filter, &FindOptions::default())
                    .await
                    .map_err(|err| aborted(link.collection, err))?;
                let child_ids = found
                    .iter()
                    .map(|doc| document_id(doc).map(str::to_string))
                    .collect::<Result<Vec<_>>>()?;
                if !child_ids.is_empty() {
                    frontier.push((child, child_ids, false));
                }
            }
        }

        steps.extend(references.into_iter().map(|((collection, field), ids)| DeleteStep {
            collection,
            filter: Filter::new().any_of(field, ids),
            primary: false,
        }));
        Ok(steps)
    }
}

async fn run_step<S: Session>(session: S, kind: ResourceKind, id: Uuid, step: DeleteStep) -> Result<(Collection, u64)> {
    let result = if step.primary {
        session.delete_one(step.collection, &step.filter).await
    } else {
        session.delete_many(step.collection, &step.filter).await
    };
    let deleted = result.map_err(|err| aborted(step.collection, err))?;
    if step.primary && deleted == 0 {
        return Err(AppError::not_found_or_forbidden(kind, id));
    }
    tracing::debug!(deleted, "fan-out step done");
    Ok((step.collection, deleted))
}

/// Joins every task. The first failure wins; the remaining tasks are
/// cancelled and still drained, so none outlives the call.
async fn join_fan_out(
    mut tasks: JoinSet<Result<(Collection, u64)>>,
    mut deadline: Option<Instant>,
) -> Result<BTreeMap<Collection, u64>> {
    let mut deleted = BTreeMap::new();
    let mut failure: Option<AppError> = None;

    loop {
        let joined = match deadline {
            Some(at) => match tokio::time::timeout_at(at, tasks.join_next()).await {
                Ok(joined) => joined,
                Err(_) => {
                    deadline = None;
                    failure.get_or_insert_with(deadline_elapsed);
                    tasks.abort_all();
                    continue;
                }
            },
            None => tasks.join_next().await,
        };
        let Some(joined) = joined else { break };

        let err = match joined {
            Ok(Ok((collection, count))) => {
                *deleted.entry(collection).or_insert(0) += count;
                continue;
            }
            Ok(Err(err)) => err,
            Err(join_err) if join_err.is_cancelled() => continue,
            Err(join_err) => AppError::TransactionAborted(format!("fan-out task failed: {join_err}")),
        };
        if failure.is_none() {
            tasks.abort_all();
            failure = Some(err);
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(deleted),
    }
}

async fn within<T>(deadline: Option<Instant>, work: impl Future<Output = Result<T>>) -> Result<T> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, work)
            .await
            .unwrap_or_else(|_| Err(deadline_elapsed())),
        None => work.await,
    }
}

fn deadline_elapsed() -> AppError {
    AppError::TransactionAborted("cascade deadline elapsed".into())
}

fn aborted(collection: Collection, err: AppError) -> AppError {
    match err {
        AppError::TransactionAborted(_) | AppError::NotFoundOrForbidden(..) => err,
        other => AppError::TransactionAborted(format!("{collection}: {other}")),
    }
}
