//! Integration tests for StoryDaemon
//!
//! These tests drive the full startup path against a database file:
//! bootstrap, request processor, process exit (clean or not), restart.

use std::path::Path;
use std::time::Duration;

use storydaemon::config::Config;
use storydaemon::persistence::{Bootstrap, PersistenceHandle, RequestProcessor, bootstrap};
use storystore::{
    CoderState, SessionStatus, Spec, StatusUpdate, Store, StoreError, Story, StoryDependency, StoryFilter,
    StoryStatus,
};
use tempfile::TempDir;
use tokio::task::JoinHandle;

fn start(db: &Path) -> (Bootstrap, Config) {
    let config = Config::default();
    let store = Store::open(db).expect("Failed to open store");
    let boot = bootstrap(store, &config).expect("Bootstrap failed");
    (boot, config)
}

fn serve(boot: Bootstrap, config: &Config) -> (PersistenceHandle, JoinHandle<Store>) {
    RequestProcessor::spawn(
        boot.store,
        boot.session.session_id,
        boot.queue,
        config.requests.channel_capacity,
        config.requests.query_timeout(),
    )
}

fn ids(stories: &[Story]) -> Vec<&str> {
    stories.iter().map(|s| s.id.as_str()).collect()
}

async fn plan_chain(handle: &PersistenceHandle) {
    handle.upsert_spec(Spec::new("S1", "# Spec")).await.unwrap();
    handle
        .batch_upsert_stories_with_dependencies(
            vec![
                Story::with_id("A", "S1", "first").with_priority(1),
                Story::with_id("B", "S1", "second").with_priority(9),
                Story::with_id("C", "S1", "third"),
            ],
            vec![StoryDependency::new("B", "A"), StoryDependency::new("C", "B")],
        )
        .await
        .unwrap();
}

// =============================================================================
// Crash and restart
// =============================================================================

#[tokio::test]
async fn test_crash_then_restart_resumes_session() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db = temp_dir.path().join("stories.db");

    let (boot, config) = start(&db);
    assert!(!boot.stats.resumed);
    let session_id = boot.session.session_id.clone();
    let (handle, join) = serve(boot, &config);

    plan_chain(&handle).await;
    handle
        .update_story_status(StatusUpdate::new("A", StoryStatus::Done))
        .await
        .unwrap();
    handle
        .update_story_status(StatusUpdate::new("B", StoryStatus::Coding).assigned_to("coder-001"))
        .await
        .unwrap();
    handle
        .checkpoint_coder(CoderState::new("coder-001", "CODING").with_story("B"))
        .await
        .unwrap();
    assert_eq!(handle.get_story("B").await.unwrap().status, StoryStatus::Coding);

    // No end_session: the row stays `active`, as after a kill
    drop(handle);
    drop(join.await.unwrap());

    let (boot, config) = start(&db);
    assert!(boot.stats.resumed);
    assert_eq!(boot.stats.stale_sessions, 1);
    assert_eq!(boot.stats.reset_stories, 1);
    assert_eq!(boot.stats.incomplete_stories, 2);
    assert_eq!(boot.stats.done_stories, 1);
    assert_eq!(boot.session.session_id, session_id);
    assert_eq!(boot.agents.coders.len(), 1);

    let ready: Vec<&str> = boot.queue.ready().into_iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ready, vec!["B"]);

    let (handle, join) = serve(boot, &config);
    let b = handle.get_story("B").await.unwrap();
    assert_eq!(b.status, StoryStatus::New);
    assert!(b.assigned_agent.is_none());
    assert_eq!(ids(&handle.query_pending_stories().await.unwrap()), vec!["B"]);
    assert_eq!(ids(&handle.ready_stories().await.unwrap()), vec!["B"]);

    // The recovered queue keeps following writes
    handle
        .update_story_status(StatusUpdate::new("B", StoryStatus::Done))
        .await
        .unwrap();
    assert_eq!(ids(&handle.ready_stories().await.unwrap()), vec!["C"]);

    handle.end_session(SessionStatus::Shutdown).await.unwrap();
    let store = join.await.unwrap();
    assert_eq!(store.get_session(&session_id).unwrap().status, SessionStatus::Shutdown);
}

#[tokio::test]
async fn test_graceful_shutdown_is_resumed_without_reset() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db = temp_dir.path().join("stories.db");

    let (boot, config) = start(&db);
    let session_id = boot.session.session_id.clone();
    let (handle, join) = serve(boot, &config);
    plan_chain(&handle).await;
    assert_eq!(handle.finish().await.unwrap(), SessionStatus::Shutdown);
    drop(join.await.unwrap());

    let (boot, _) = start(&db);
    assert!(boot.stats.resumed);
    assert_eq!(boot.stats.stale_sessions, 0);
    assert_eq!(boot.stats.reset_stories, 0);
    assert_eq!(boot.session.session_id, session_id);
    assert_eq!(boot.queue.len(), 3);
}

#[tokio::test]
async fn test_completed_session_starts_fresh_and_isolates_stories() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db = temp_dir.path().join("stories.db");

    let (boot, config) = start(&db);
    let first = boot.session.session_id.clone();
    let (handle, join) = serve(boot, &config);
    plan_chain(&handle).await;
    for id in ["A", "B", "C"] {
        handle
            .update_story_status(StatusUpdate::new(id, StoryStatus::Done))
            .await
            .unwrap();
    }
    assert_eq!(handle.finish().await.unwrap(), SessionStatus::Completed);
    drop(join.await.unwrap());

    let (boot, config) = start(&db);
    assert!(!boot.stats.resumed);
    assert_ne!(boot.session.session_id, first);
    assert!(boot.queue.is_empty());

    let (handle, join) = serve(boot, &config);
    assert!(handle.query_stories(StoryFilter::new()).await.unwrap().is_empty());
    assert!(handle.get_story("A").await.unwrap_err().is_not_found());

    // Same ids, new session: no collision with the finished one
    plan_chain(&handle).await;
    assert_eq!(ids(&handle.query_pending_stories().await.unwrap()), vec!["A"]);

    handle.shutdown().await.unwrap();
    let store = join.await.unwrap();
    assert_eq!(store.get_story(&first, "A").unwrap().status, StoryStatus::Done);
}

#[tokio::test]
async fn test_second_daemon_cannot_open_live_database() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db = temp_dir.path().join("stories.db");

    let (boot, config) = start(&db);
    let (handle, join) = serve(boot, &config);
    plan_chain(&handle).await;
    handle
        .update_story_status(StatusUpdate::new("A", StoryStatus::Coding).assigned_to("coder-001"))
        .await
        .unwrap();

    // Opening must fail before recovery could reset the live story
    let err = Store::open(&db).unwrap_err();
    assert!(matches!(err, StoreError::Busy(_)), "unexpected error: {err:?}");
    assert_eq!(handle.get_story("A").await.unwrap().status, StoryStatus::Coding);

    let reader = Store::open_read_only(&db, &config.storage.store_options()).unwrap();
    assert_eq!(reader.list_sessions().unwrap().len(), 1);

    handle.end_session(SessionStatus::Shutdown).await.unwrap();
    drop(join.await.unwrap());

    let (boot, _) = start(&db);
    assert!(boot.stats.resumed);
    assert_eq!(boot.stats.reset_stories, 1);
}

// =============================================================================
// Request processor
// =============================================================================

#[tokio::test]
async fn test_concurrent_producers_are_serialized() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db = temp_dir.path().join("stories.db");

    let (boot, config) = start(&db);
    let (handle, join) = serve(boot, &config);
    handle.upsert_spec(Spec::new("S1", "# Spec")).await.unwrap();

    let mut tasks = Vec::new();
    for agent in 0..8 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            for n in 0..10 {
                let id = format!("story-{}-{}", agent, n);
                handle.upsert_story(Story::with_id(&id, "S1", &id)).await.unwrap();
                handle
                    .update_story_status(StatusUpdate::new(&id, StoryStatus::Planning))
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let planning = handle
        .query_stories(StoryFilter::new().with_status(StoryStatus::Planning))
        .await
        .unwrap();
    assert_eq!(planning.len(), 80);

    handle.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), join)
        .await
        .expect("Processor should stop")
        .unwrap();
}

#[tokio::test]
async fn test_cycle_is_stored_but_never_ready() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db = temp_dir.path().join("stories.db");

    let (boot, config) = start(&db);
    let (handle, join) = serve(boot, &config);
    handle.upsert_spec(Spec::new("S1", "# Spec")).await.unwrap();
    handle
        .batch_upsert_stories_with_dependencies(
            vec![Story::with_id("X", "S1", "x"), Story::with_id("Y", "S1", "y")],
            vec![StoryDependency::new("X", "Y"), StoryDependency::new("Y", "X")],
        )
        .await
        .unwrap();
    assert!(handle.query_pending_stories().await.unwrap().is_empty());
    drop(handle);
    drop(join.await.unwrap());

    let (boot, _) = start(&db);
    assert!(boot.stats.resumed);
    assert!(boot.queue.find_cycle().is_some());
    assert!(boot.queue.ready().is_empty());
}
