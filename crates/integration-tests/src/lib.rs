//! Fixtures shared by the end-to-end suites: a content store over a
//! throwaway SQLite file, and the canonical story/comment/reply/flag graph.

use std::sync::Arc;

use sb_core::{CascadeDepth, Comment, EventPublisher, Flag, NewComment, NewFlag, NewReply, NewStory, Reply, Story};
use sb_db_sqlite::SqliteConnector;
use sb_engine::{ContentStore, Pool, PoolConfig, TracingEventPublisher};
use tempfile::TempDir;

pub type SqliteStore = ContentStore<SqliteConnector>;

/// Keeps the database directory alive for as long as the store is used.
pub struct TestDb {
    pub dir: TempDir,
    pub store: SqliteStore,
}

impl TestDb {
    pub async fn new(depth: CascadeDepth) -> Self {
        Self::with_publisher(depth, Arc::new(TracingEventPublisher)).await
    }

    pub async fn with_publisher(depth: CascadeDepth, publisher: Arc<dyn EventPublisher>) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = open_store(&dir, depth, publisher).await;
        Self { dir, store }
    }

    /// A second, independent store over the same database file.
    pub async fn reopen(&self, depth: CascadeDepth) -> SqliteStore {
        open_store(&self.dir, depth, Arc::new(TracingEventPublisher)).await
    }
}

async fn open_store(dir: &TempDir, depth: CascadeDepth, publisher: Arc<dyn EventPublisher>) -> SqliteStore {
    let connector = SqliteConnector::open(dir.path().join("story-board.db"));
    let pool = Pool::connect(connector, PoolConfig::default())
        .await
        .expect("sqlite pool");
    ContentStore::new(pool, publisher, depth, None)
}

/// S1 by alice; C1 by carol on S1; R1 by alice on C1; F1 flags C1.
pub struct Scenario {
    pub story: Story,
    pub comment: Comment,
    pub reply: Reply,
    pub flag: Flag,
}

pub async fn seed_scenario(store: &SqliteStore) -> Scenario {
    let story = store
        .stories()
        .create(NewStory {
            title: "S1".into(),
            content: "a story".into(),
            author_username: "alice".into(),
            tags: vec![],
        })
        .await
        .expect("story");
    let comment = store
        .comments()
        .create(NewComment {
            resource_id: story.id,
            author_username: "carol".into(),
            content: "C1".into(),
        })
        .await
        .expect("comment");
    let reply = store
        .replies()
        .create(NewReply {
            resource_id: comment.id,
            author_username: "alice".into(),
            content: "R1".into(),
        })
        .await
        .expect("reply");
    let flag = store
        .flags()
        .create(NewFlag {
            flagged_resource: comment.id,
            reporter_username: "dave".into(),
            reason: "F1".into(),
        })
        .await
        .expect("flag");

    Scenario {
        story,
        comment,
        reply,
        flag,
    }
}
