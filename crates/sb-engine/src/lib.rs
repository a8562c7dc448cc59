//! # sb-engine
//!
//! Storage-facing engine: connection pooling, graph predicates, the cascade
//! executor and the repositories built on them.

pub mod cascade;
pub mod events;
pub mod graph;
pub mod pool;
pub mod repositories;

use std::sync::Arc;
use std::time::Duration;

use sb_core::{CascadeDepth, Connector, EventPublisher};

pub use cascade::{CascadeExecutor, CascadeReport};
pub use events::{ChannelEventPublisher, TracingEventPublisher};
pub use graph::ResourceGraph;
pub use pool::{Pool, PoolConfig, PoolStats, PooledConnection};
pub use repositories::*;

/// Everything the service layer needs, wired over one pool.
pub struct ContentStore<C: Connector> {
    pool: Pool<C>,
    graph: ResourceGraph<C>,
    cascade: CascadeExecutor<C>,
    stories: StoryRepository<C>,
    comments: CommentRepository<C>,
    replies: ReplyRepository<C>,
    flags: FlagRepository<C>,
    admins: AdminRepository<C>,
}

impl<C: Connector> ContentStore<C> {
    pub fn new(
        pool: Pool<C>,
        publisher: Arc<dyn EventPublisher>,
        depth: CascadeDepth,
        deadline: Option<Duration>,
    ) -> Self {
        let graph = ResourceGraph::new(pool.clone());
        let cascade = CascadeExecutor::new(pool.clone())
            .with_depth(depth)
            .with_deadline(deadline);

        Self {
            stories: StoryRepository::new(pool.clone(), cascade.clone()),
            comments: CommentRepository::new(pool.clone(), cascade.clone(), publisher),
            replies: ReplyRepository::new(pool.clone(), cascade.clone()),
            flags: FlagRepository::new(pool.clone()),
            admins: AdminRepository::new(pool.clone()),
            pool,
            graph,
            cascade,
        }
    }

    pub fn pool(&self) -> &Pool<C> {
        &self.pool
    }

    pub fn graph(&self) -> &ResourceGraph<C> {
        &self.graph
    }

    pub fn cascade(&self) -> &CascadeExecutor<C> {
        &self.cascade
    }

    pub fn stories(&self) -> &StoryRepository<C> {
        &self.stories
    }

    pub fn comments(&self) -> &CommentRepository<C> {
        &self.comments
    }

    pub fn replies(&self) -> &ReplyRepository<C> {
        &self.replies
    }

    pub fn flags(&self) -> &FlagRepository<C> {
        &self.flags
    }

    pub fn admins(&self) -> &AdminRepository<C> {
        &self.admins
    }
}
