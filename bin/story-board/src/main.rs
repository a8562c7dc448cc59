//! # Story-Board Binary
//!
//! Operator CLI over the content engine: seed demo content, inspect a story
//! and everything hanging below it, and run cascading deletes.

mod telemetry;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sb_config::Settings;
use sb_core::{NewComment, NewFlag, NewReply, NewStory, ResourceKind};
use sb_db_sqlite::SqliteConnector;
use sb_engine::{CascadeReport, ContentStore, Pool, PoolConfig, StoryOrder, TracingEventPublisher};
use secrecy::ExposeSecret;
use serde_json::json;
use uuid::Uuid;

type Store = ContentStore<SqliteConnector>;

#[derive(Parser, Debug)]
#[command(name = "story-board", version, about = "Story-Board content store CLI")]
struct Cli {
    /// Database URL, overriding config file and environment
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// How far deletes cascade, overriding config
    #[arg(long, value_enum, global = true)]
    depth: Option<Depth>,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Depth {
    Shallow,
    Transitive,
}

impl Depth {
    fn as_str(self) -> &'static str {
        match self {
            Depth::Shallow => "shallow",
            Depth::Transitive => "transitive",
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create demo stories with comments, replies and flags
    Seed {
        #[arg(long, default_value_t = 3)]
        stories: usize,
        /// Comments per story
        #[arg(long, default_value_t = 2)]
        comments: usize,
        #[arg(long, default_value = "alice")]
        author: String,
    },
    /// Print one page of stories as JSON
    List {
        #[arg(long, default_value_t = 1)]
        page: u64,
        #[arg(long)]
        oldest: bool,
    },
    /// Print a story with its comments, replies and flags as JSON
    Show { id: Uuid },
    /// Cascade-delete a story, comment or reply
    Delete {
        kind: ResourceKind,
        id: Uuid,
        /// Only delete when owned by this user. Required unless deleting a story.
        #[arg(long = "as")]
        author: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut overrides = Vec::new();
    if let Some(url) = &cli.database_url {
        overrides.push(("database.url", url.clone()));
    }
    if let Some(depth) = cli.depth {
        overrides.push(("cascade.depth", depth.as_str().to_string()));
    }
    let settings = Settings::load_with_overrides(overrides).context("failed to load settings")?;
    telemetry::init(&settings.log)?;

    let connector = SqliteConnector::from_url(settings.database.url.expose_secret())?;
    let pool_config = PoolConfig {
        connect_timeout: settings.database.connect_timeout(),
        idle_timeout: settings.database.idle_timeout(),
        max_idle: settings.database.max_idle,
        max_size: settings.database.max_connections,
    };
    let pool = Pool::connect(connector, pool_config)
        .await
        .context("storage backend unreachable")?;
    let store = ContentStore::new(
        pool,
        Arc::new(TracingEventPublisher),
        settings.cascade.depth,
        settings.cascade.deadline(),
    );

    match cli.command {
        Command::Seed {
            stories,
            comments,
            author,
        } => seed(&store, stories, comments, &author).await,
        Command::List { page, oldest } => {
            let order = if oldest { StoryOrder::Oldest } else { StoryOrder::Newest };
            let stories = store.stories().find_page(page, order).await?;
            println!("{}", serde_json::to_string_pretty(&stories)?);
            Ok(())
        }
        Command::Show { id } => show(&store, id).await,
        Command::Delete { kind, id, author } => {
            let report = delete(&store, kind, id, author.as_deref()).await?;
            for (collection, count) in &report.deleted {
                println!("{collection}\t{count}");
            }
            tracing::info!(total = report.total(), "delete finished");
            Ok(())
        }
    }
}

async fn seed(store: &Store, stories: usize, comments: usize, author: &str) -> Result<()> {
    for n in 1..=stories {
        let story = store
            .stories()
            .create(NewStory {
                title: format!("Story {n}"),
                content: format!("Seeded story number {n}."),
                author_username: author.to_string(),
                tags: vec!["seed".to_string()],
            })
            .await?;

        for m in 1..=comments {
            let comment = store
                .comments()
                .create(NewComment {
                    resource_id: story.id,
                    author_username: format!("reader{m}"),
                    content: format!("Comment {m} on story {n}"),
                })
                .await?;
            store
                .replies()
                .create(NewReply {
                    resource_id: comment.id,
                    author_username: author.to_string(),
                    content: format!("Thanks, reader{m}!"),
                })
                .await?;
            if m == 1 {
                store
                    .flags()
                    .create(NewFlag {
                        flagged_resource: comment.id,
                        reporter_username: "moderator".to_string(),
                        reason: "seeded flag".to_string(),
                    })
                    .await?;
            }
        }
        println!("{}", story.id);
    }
    Ok(())
}

async fn show(store: &Store, id: Uuid) -> Result<()> {
    let Some(story) = store.stories().find_by_id(id).await? else {
        bail!("story {id} not found");
    };

    let mut threads = Vec::new();
    for comment in store.comments().list_for_story(id).await? {
        let replies = store.replies().list_for_comment(comment.id).await?;
        let flags = store.flags().list_for_resource(comment.id).await?;
        threads.push(json!({ "comment": comment, "replies": replies, "flags": flags }));
    }
    let flags = store.flags().list_for_resource(id).await?;

    let view = json!({ "story": story, "flags": flags, "comments": threads });
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn delete(store: &Store, kind: ResourceKind, id: Uuid, author: Option<&str>) -> Result<CascadeReport> {
    let report = match (kind, author) {
        (ResourceKind::Story, author) => store.stories().delete(id, author).await?,
        (ResourceKind::Comment, Some(author)) => store.comments().delete(id, author).await?,
        (ResourceKind::Reply, Some(author)) => store.replies().delete(id, author).await?,
        (kind, None) => bail!("deleting a {kind} requires --as <author>"),
    };
    Ok(report)
}
