use std::sync::Arc;
use std::time::Duration;

use sb_core::{
    AppError, CascadeDepth, Collection, Event, EventPublisher, MockEventPublisher, NewAdmin, NewComment, NewFlag,
    NewReply, NewStory, Story, StoryUpdate,
};
use sb_db_memory::{MemoryConnector, MemoryStore};
use sb_engine::{
    ChannelEventPublisher, ContentStore, Pool, PoolConfig, StoryOrder, TracingEventPublisher, MAX_LOGIN_IPS,
    STORIES_PER_PAGE,
};
use tokio::sync::mpsc;
use uuid::Uuid;

fn content_with(publisher: Arc<dyn EventPublisher>) -> (MemoryStore, ContentStore<MemoryConnector>) {
    let store = MemoryStore::new();
    let pool = Pool::new(store.connector(), PoolConfig::default()).unwrap();
    let content = ContentStore::new(pool, publisher, CascadeDepth::Shallow, None);
    (store, content)
}

fn content() -> (MemoryStore, ContentStore<MemoryConnector>) {
    content_with(Arc::new(TracingEventPublisher))
}

async fn story(content: &ContentStore<MemoryConnector>, title: &str) -> Story {
    content
        .stories()
        .create(NewStory {
            title: title.into(),
            content: format!("{title} body"),
            author_username: "alice".into(),
            tags: vec![],
        })
        .await
        .unwrap()
}

fn comment_on(story_id: Uuid, author: &str) -> NewComment {
    NewComment {
        resource_id: story_id,
        author_username: author.into(),
        content: "first!".into(),
    }
}

#[tokio::test]
async fn test_story_round_trip_and_update() {
    let (_store, content) = content();
    let created = story(&content, "Hello").await;

    let found = content.stories().find_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(found, created);

    content
        .stories()
        .update(
            created.id,
            "alice",
            StoryUpdate {
                title: "Hello again".into(),
                content: "rewritten".into(),
                tags: vec!["edit".into()],
            },
        )
        .await
        .unwrap();
    let updated = content.stories().find_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(updated.title, "Hello again");
    assert_eq!(updated.tags, vec!["edit".to_string()]);
    assert!(updated.updated);
    assert!(updated.updated_at >= created.updated_at);
    assert_eq!(updated.created_at, created.created_at);
}

#[tokio::test]
async fn test_update_by_non_author_is_rejected() {
    let (_store, content) = content();
    let created = story(&content, "Mine").await;
    let comment = content.comments().create(comment_on(created.id, "carol")).await.unwrap();

    let err = content
        .stories()
        .update(
            created.id,
            "bob",
            StoryUpdate {
                title: "Yours".into(),
                content: String::new(),
                tags: vec![],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFoundOrForbidden(..)));

    let err = content.comments().update(comment.id, "bob", "hijacked").await.unwrap_err();
    assert!(matches!(err, AppError::NotFoundOrForbidden(..)));

    let comments = content.comments().list_for_story(created.id).await.unwrap();
    assert_eq!(comments[0].content, "first!");
    assert!(!comments[0].edited);
    assert_eq!(content.stories().find_by_id(created.id).await.unwrap().unwrap().title, "Mine");
}

#[tokio::test]
async fn test_update_never_upserts() {
    let (store, content) = content();
    let err = content.comments().update(Uuid::now_v7(), "carol", "ghost").await.unwrap_err();
    assert!(matches!(err, AppError::NotFoundOrForbidden(..)));
    assert_eq!(store.len(Collection::Comments), 0);
}

#[tokio::test]
async fn test_comment_and_reply_edits_mark_edited() {
    let (_store, content) = content();
    let s = story(&content, "Thread").await;
    let comment = content.comments().create(comment_on(s.id, "carol")).await.unwrap();
    let reply = content
        .replies()
        .create(NewReply {
            resource_id: comment.id,
            author_username: "dave".into(),
            content: "agreed".into(),
        })
        .await
        .unwrap();

    content.comments().update(comment.id, "carol", "second!").await.unwrap();
    content.replies().update(reply.id, "dave", "disagreed").await.unwrap();

    let comments = content.comments().list_for_story(s.id).await.unwrap();
    assert_eq!(comments[0].content, "second!");
    assert!(comments[0].edited);
    let replies = content.replies().list_for_comment(comment.id).await.unwrap();
    assert_eq!(replies[0].content, "disagreed");
    assert!(replies[0].edited);

    let graph = content.graph();
    assert!(graph.story_exists(s.id).await.unwrap());
    assert!(graph.comment_exists(comment.id).await.unwrap());
    assert!(graph.reply_exists(reply.id).await.unwrap());
    assert!(!graph.reply_exists(comment.id).await.unwrap());
}

#[tokio::test]
async fn test_children_require_existing_parent() {
    let (store, content) = content();

    let err = content.comments().create(comment_on(Uuid::now_v7(), "carol")).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = content
        .replies()
        .create(NewReply {
            resource_id: Uuid::now_v7(),
            author_username: "dave".into(),
            content: "hello?".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = content
        .flags()
        .create(NewFlag {
            flagged_resource: Uuid::now_v7(),
            reporter_username: "erin".into(),
            reason: "spam".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    assert!(store.is_empty());
}

#[tokio::test]
async fn test_comment_creation_publishes_event() {
    let (publisher, mut events) = ChannelEventPublisher::channel(8);
    let (_store, content) = content_with(Arc::new(publisher));
    let s = story(&content, "Eventful").await;

    let comment = content.comments().create(comment_on(s.id, "carol")).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, Event::comment_created(&comment));
    assert_eq!(event.action, Event::COMMENT_ON_STORY);
    assert_eq!(event.resource_id, s.id);
}

#[tokio::test]
async fn test_publish_failure_does_not_fail_creation() {
    let (attempted, mut attempts) = mpsc::unbounded_channel();
    let mut publisher = MockEventPublisher::new();
    publisher.expect_publish().returning(move |event| {
        let _ = attempted.send(event);
        Err(anyhow::anyhow!("bus unreachable"))
    });
    let (store, content) = content_with(Arc::new(publisher));
    let s = story(&content, "Quiet").await;

    let comment = content.comments().create(comment_on(s.id, "carol")).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), attempts.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.actor_username, "carol");
    assert!(store.contains(Collection::Comments, &comment.id.to_string()));
}

#[tokio::test]
async fn test_find_page_orders_and_bounds() {
    let (_store, content) = content();
    let mut created = Vec::new();
    for n in 0..12 {
        created.push(story(&content, &format!("story {n}")).await);
    }

    let newest = content.stories().find_page(1, StoryOrder::Newest).await.unwrap();
    assert_eq!(newest.len() as u64, STORIES_PER_PAGE);
    assert_eq!(newest[0].id, created[11].id);

    let rest = content.stories().find_page(2, StoryOrder::Newest).await.unwrap();
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[1].id, created[0].id);

    let oldest = content.stories().find_page(1, StoryOrder::Oldest).await.unwrap();
    assert_eq!(oldest[0].id, created[0].id);

    assert!(content.stories().find_page(3, StoryOrder::Newest).await.unwrap().is_empty());

    let err = content.stories().find_page(0, StoryOrder::Newest).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_flags_on_any_content_node() {
    let (_store, content) = content();
    let s = story(&content, "Flagged").await;
    let comment = content.comments().create(comment_on(s.id, "carol")).await.unwrap();

    for target in [s.id, comment.id] {
        content
            .flags()
            .create(NewFlag {
                flagged_resource: target,
                reporter_username: "erin".into(),
                reason: "off topic".into(),
            })
            .await
            .unwrap();
    }

    let flags = content.flags().list_for_resource(comment.id).await.unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].reporter_username, "erin");
    assert_eq!(content.graph().locate(comment.id).await.unwrap(), Some(sb_core::ResourceKind::Comment));
}

#[tokio::test]
async fn test_admin_accounts_and_login_history() {
    let (_store, content) = content();
    let draft = NewAdmin {
        username: "root".into(),
        email: "root@example.com".into(),
        password_hash: "$argon2id$v=19$stub".into(),
    };
    content.admins().create(draft.clone()).await.unwrap();

    let err = content.admins().create(draft).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    for n in 0..12 {
        content.admins().record_login("root", &format!("10.0.0.{n}")).await.unwrap();
    }
    let admin = content.admins().record_login("root", "10.0.0.5").await.unwrap();

    assert_eq!(admin.last_login_ip.as_deref(), Some("10.0.0.5"));
    assert_eq!(admin.last_login_ips.len(), MAX_LOGIN_IPS);
    assert_eq!(admin.last_login_ips.first().map(String::as_str), Some("10.0.0.2"));
    assert_eq!(admin.last_login_ips.last().map(String::as_str), Some("10.0.0.5"));
    assert_eq!(admin.last_login_ips.iter().filter(|ip| *ip == "10.0.0.5").count(), 1);

    let stored = content.admins().find_by_username("root").await.unwrap().unwrap();
    assert_eq!(stored.last_login_ips, admin.last_login_ips);
    assert_eq!(stored.password_hash, "$argon2id$v=19$stub");

    let err = content.admins().record_login("ghost", "10.0.0.1").await.unwrap_err();
    assert!(matches!(err, AppError::NotFoundOrForbidden(..)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_logins_keep_every_address() {
    let (store, content) = content();
    content
        .admins()
        .create(NewAdmin {
            username: "root".into(),
            email: "root@example.com".into(),
            password_hash: "hash".into(),
        })
        .await
        .unwrap();
    store.set_latency(Duration::from_millis(2));

    let admins = content.admins();
    let (a, b, c, d) = tokio::join!(
        admins.record_login("root", "192.0.2.1"),
        admins.record_login("root", "192.0.2.2"),
        admins.record_login("root", "192.0.2.3"),
        admins.record_login("root", "192.0.2.4"),
    );
    for result in [a, b, c, d] {
        result.unwrap();
    }

    let mut history = admins.find_by_username("root").await.unwrap().unwrap().last_login_ips;
    history.sort();
    assert_eq!(history, vec!["192.0.2.1", "192.0.2.2", "192.0.2.3", "192.0.2.4"]);
}

#[tokio::test]
async fn test_each_create_uses_one_connection() {
    let (_store, content) = content();
    let acquisitions = || {
        let stats = content.pool().stats();
        stats.created + stats.reused
    };

    let before = acquisitions();
    let s = story(&content, "Counted").await;
    assert_eq!(acquisitions(), before + 1);

    let before = acquisitions();
    let comment = content.comments().create(comment_on(s.id, "carol")).await.unwrap();
    assert_eq!(acquisitions(), before + 1);

    let before = acquisitions();
    content
        .replies()
        .create(NewReply {
            resource_id: comment.id,
            author_username: "dave".into(),
            content: "counted too".into(),
        })
        .await
        .unwrap();
    assert_eq!(acquisitions(), before + 1);

    let before = acquisitions();
    content
        .flags()
        .create(NewFlag {
            flagged_resource: comment.id,
            reporter_username: "erin".into(),
            reason: "spam".into(),
        })
        .await
        .unwrap();
    assert_eq!(acquisitions(), before + 1);
}
