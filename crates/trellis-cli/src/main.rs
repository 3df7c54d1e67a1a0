//! trellis - in-memory demo of the task ordering core
//!
//! Creates a few tasks (one of them twice with the same idempotency key),
//! then races two moves into the same gap and prints the settled order.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use ulid::Ulid;

use trellis_core::app::{CreateTaskInput, MoveTaskInput, ServiceBuilder, ServiceConfig};
use trellis_core::domain::{Actor, BoardId, ListId, ProjectId, ProjectRole, TaskList, UserId};
use trellis_core::impls::{BroadcastEventSink, InMemoryTaskStore, StaticAccessPolicy};

#[derive(Debug, Parser)]
#[command(name = "trellis", about = "Kanban task ordering demo")]
struct Cli {
    /// Service config (TOML). Defaults apply when omitted.
    #[arg(long, env = "TRELLIS_CONFIG")]
    config: Option<PathBuf>,

    /// WIP limit of the "Doing" list.
    #[arg(long, default_value_t = 3)]
    wip_limit: u32,
}

fn init_tracing() {
    // Opt-in via RUST_LOG; an invalid filter falls back to silence.
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|raw| EnvFilter::try_new(raw.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new("off"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // (A) 設定
    let config = match &cli.config {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ServiceConfig::default(),
    };

    // (B) ワイヤリング（in-memory ストア + broadcast 配信）
    let project_id = ProjectId::from_ulid(Ulid::new());
    let board_id = BoardId::from_ulid(Ulid::new());
    let user_id = UserId::from_ulid(Ulid::new());

    let store = InMemoryTaskStore::new();
    let events = Arc::new(BroadcastEventSink::new(64));
    let mut feed = events.subscribe();
    let access = Arc::new(StaticAccessPolicy::new());
    access.add_member(project_id, user_id);

    let service = ServiceBuilder::new()
        .store(Arc::new(store.clone()))
        .events(events)
        .access(access)
        .config(config)
        .build()?;

    let actor = Actor {
        user_id,
        project_id,
        board_id,
        board_archived: false,
        role: ProjectRole::Member,
    };

    // (C) リストを用意
    let list = |name: &str, wip_limit| TaskList {
        id: ListId::from_ulid(Ulid::new()),
        project_id,
        board_id,
        name: name.to_string(),
        archived: false,
        wip_limit,
    };
    let todo = list("Todo", None);
    let doing = list("Doing", Some(cli.wip_limit));
    store.put_list(todo.clone()).await;
    store.put_list(doing.clone()).await;

    // (D) タスク作成（同じ冪等キーで 2 回）
    let mut todo_tasks = Vec::new();
    for title in ["Draft roadmap", "Fix login", "Review PR"] {
        let created = service
            .create_task(
                &actor,
                todo.id,
                CreateTaskInput {
                    title: title.to_string(),
                    idempotency_key: Some(format!("create-{}", title.to_lowercase().replace(' ', "-"))),
                    ..CreateTaskInput::default()
                },
            )
            .await?;
        println!("created {} at {}", created.task.id, created.task.position);
        todo_tasks.push(created.task);
    }
    let again = service
        .create_task(
            &actor,
            todo.id,
            CreateTaskInput {
                title: "Draft roadmap".to_string(),
                idempotency_key: Some("create-draft-roadmap".to_string()),
                ..CreateTaskInput::default()
            },
        )
        .await?;
    println!("retry of the first create: replayed={} id={}", again.replayed, again.task.id);

    // (E) 2 つの move を同じ位置に同時に入れる
    let anchor = service
        .move_task(
            &actor,
            todo_tasks[0].id,
            MoveTaskInput {
                expected_version: todo_tasks[0].version,
                to_list_id: doing.id,
                before_task_id: None,
                after_task_id: None,
                wip_override_reason: None,
            },
        )
        .await?;
    let racer = |i: usize| MoveTaskInput {
        expected_version: todo_tasks[i].version,
        to_list_id: doing.id,
        before_task_id: Some(anchor.task.id),
        after_task_id: None,
        wip_override_reason: None,
    };
    let (a, b) = tokio::join!(
        service.move_task(&actor, todo_tasks[1].id, racer(1)),
        service.move_task(&actor, todo_tasks[2].id, racer(2)),
    );
    let (a, b) = (a?, b?);
    println!("raced moves: {} at {}, {} at {}", a.task.id, a.task.position, b.task.id, b.task.position);

    // (F) 最終順序と配信されたイベント
    for task in service.list_tasks(&actor, doing.id).await? {
        println!("{}  {}  v{}  {}", task.position, task.id, task.version, task.title);
    }
    while let Ok(event) = feed.try_recv() {
        println!("event: {}", serde_json::to_string(&event)?);
    }
    Ok(())
}
