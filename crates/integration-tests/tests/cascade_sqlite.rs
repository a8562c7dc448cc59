use integration_tests::{seed_scenario, Scenario, SqliteStore, TestDb};
use sb_core::{
    AppError, CascadeDepth, Collection, Connection, Filter, FindOptions, ReadConcern, ResourceKind, Session,
    TransactionOptions, WriteConcern,
};

async fn alive(store: &SqliteStore, kind: ResourceKind, id: uuid::Uuid) -> bool {
    store.graph().exists(kind, id).await.unwrap()
}

async fn flag_alive(store: &SqliteStore, s: &Scenario) -> bool {
    !store.flags().list_for_resource(s.comment.id).await.unwrap().is_empty()
}

#[tokio::test]
async fn test_shallow_story_delete_on_sqlite() {
    let db = TestDb::new(CascadeDepth::Shallow).await;
    let s = seed_scenario(&db.store).await;

    let report = db.store.stories().delete(s.story.id, Some("alice")).await.unwrap();

    assert_eq!(report.deleted_from(Collection::Stories), 1);
    assert_eq!(report.deleted_from(Collection::Comments), 1);
    assert_eq!(report.deleted_from(Collection::Flags), 1);
    assert!(!alive(&db.store, ResourceKind::Story, s.story.id).await);
    assert!(!alive(&db.store, ResourceKind::Comment, s.comment.id).await);
    assert!(!flag_alive(&db.store, &s).await);
    // the reply on C1 is a grandchild and stays behind
    assert!(alive(&db.store, ResourceKind::Reply, s.reply.id).await);
}

#[tokio::test]
async fn test_transitive_story_delete_on_sqlite() {
    let db = TestDb::new(CascadeDepth::Transitive).await;
    let s = seed_scenario(&db.store).await;

    let report = db.store.stories().delete(s.story.id, Some("alice")).await.unwrap();

    assert_eq!(report.total(), 4);
    assert!(!alive(&db.store, ResourceKind::Reply, s.reply.id).await);
    assert!(!flag_alive(&db.store, &s).await);
    assert_eq!(db.store.pool().stats().in_use, 0);
}

#[tokio::test]
async fn test_foreign_reply_delete_is_refused_on_sqlite() {
    let db = TestDb::new(CascadeDepth::Shallow).await;
    let s = seed_scenario(&db.store).await;

    let err = db.store.replies().delete(s.reply.id, "bob").await.unwrap_err();

    assert!(matches!(err, AppError::NotFoundOrForbidden(..)));
    assert!(alive(&db.store, ResourceKind::Reply, s.reply.id).await);
    // the aborted transaction left the connection usable
    db.store.replies().delete(s.reply.id, "alice").await.unwrap();
    assert!(!alive(&db.store, ResourceKind::Reply, s.reply.id).await);
}

#[tokio::test]
async fn test_story_delete_by_other_author_keeps_comments() {
    let db = TestDb::new(CascadeDepth::Transitive).await;
    let s = seed_scenario(&db.store).await;

    let err = db.store.stories().delete(s.story.id, Some("carol")).await.unwrap_err();

    assert!(matches!(err, AppError::NotFoundOrForbidden(..)));
    assert!(alive(&db.store, ResourceKind::Story, s.story.id).await);
    assert!(alive(&db.store, ResourceKind::Comment, s.comment.id).await);
    assert!(alive(&db.store, ResourceKind::Reply, s.reply.id).await);
    assert!(flag_alive(&db.store, &s).await);
}

#[tokio::test]
async fn test_commit_is_visible_to_another_process_view() {
    let db = TestDb::new(CascadeDepth::Shallow).await;
    let s = seed_scenario(&db.store).await;
    let other = db.reopen(CascadeDepth::Shallow).await;

    assert!(alive(&other, ResourceKind::Comment, s.comment.id).await);
    db.store.comments().delete(s.comment.id, "carol").await.unwrap();
    assert!(!alive(&other, ResourceKind::Comment, s.comment.id).await);
    assert!(!alive(&other, ResourceKind::Reply, s.reply.id).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reader_sees_all_or_nothing() {
    let db = TestDb::new(CascadeDepth::Transitive).await;
    let s = seed_scenario(&db.store).await;
    let reader = db.reopen(CascadeDepth::Transitive).await;

    let cascade = db.store.cascade().clone();
    let story_id = s.story.id;
    let deleting = tokio::spawn(async move { cascade.cascade_delete(ResourceKind::Story, story_id, None).await });

    let read_only = TransactionOptions {
        read_concern: ReadConcern::Local,
        write_concern: WriteConcern::Acknowledged,
    };
    let mut observations = Vec::new();
    loop {
        let conn = reader.pool().acquire().await.unwrap();
        let session = conn.start_transaction(read_only).await.unwrap();
        let mut seen = Vec::new();
        for collection in [Collection::Stories, Collection::Comments, Collection::Replies, Collection::Flags] {
            let docs = session
                .find(collection, &Filter::new(), &FindOptions::default())
                .await
                .unwrap();
            seen.push(docs.len());
        }
        session.abort().await.unwrap();
        observations.push(seen);
        if deleting.is_finished() {
            break;
        }
        tokio::task::yield_now().await;
    }

    deleting.await.unwrap().unwrap();
    for seen in observations {
        assert!(seen == [1, 1, 1, 1] || seen == [0, 0, 0, 0], "partial state observed: {seen:?}");
    }
}
