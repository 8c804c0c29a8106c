//! Integration tests for on-disk skill edits reaching the script cache.

use std::sync::Arc;
use std::time::Duration;

use botkeeper::game::ConnectionHandle;
use botkeeper::scripts::cache::{CachePolicy, ScriptCache};
use botkeeper::scripts::program::TomlScriptLoader;
use botkeeper::scripts::store::{FsScriptStore, ScriptStore};
use botkeeper::scripts::watcher::ScriptWatcher;
use botkeeper::scripts::ScriptKind;

use crate::support::FakeConnection;

fn program(primitive: &str) -> String {
    format!("name = \"gather\"\n[[steps]]\nprimitive = \"{primitive}\"\n")
}

#[tokio::test]
async fn edited_skill_file_is_evicted_and_reloaded() {
    let dir = tempfile::tempdir().expect("temp dir");
    let root = dir
        .path()
        .canonicalize()
        .expect("canonical temp dir")
        .join("library");
    let store = Arc::new(FsScriptStore::new(&root).expect("open library"));
    store.prepare_agent("a1").await.expect("agent dir");
    store
        .write("a1", "gather", ScriptKind::Skill, &program("mine_block"))
        .await
        .expect("write skill");
    let path = store
        .script_path("a1", "gather", ScriptKind::Skill)
        .expect("skill path");

    let cache = Arc::new(ScriptCache::new(
        Arc::clone(&store) as Arc<dyn ScriptStore>,
        Arc::new(TomlScriptLoader),
        CachePolicy::default(),
    ));
    let watcher = ScriptWatcher::start(&root, Arc::clone(&cache)).expect("start watcher");
    assert_eq!(watcher.root(), root.as_path());

    let fake = FakeConnection::standalone("conn-watch");
    let connection: ConnectionHandle = Arc::clone(&fake) as ConnectionHandle;

    let outcome = cache
        .invoke("a1", "gather", Arc::clone(&connection))
        .await
        .expect("first invoke");
    assert!(outcome.success);
    assert!(cache.contains("a1", "gather"));

    std::fs::write(&path, program("chop_tree")).expect("rewrite skill");

    tokio::time::timeout(Duration::from_secs(10), async {
        while cache.contains("a1", "gather") {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("watcher evicts the edited skill");

    let outcome = cache
        .invoke("a1", "gather", connection)
        .await
        .expect("second invoke");
    assert!(outcome.success);
    assert_eq!(
        fake.calls(),
        vec!["primitive:mine_block", "primitive:chop_tree"]
    );
    assert_eq!(cache.stats().loads, 2);
}
