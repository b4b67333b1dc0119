//! Integration tests for livexec
//!
//! `/bin/sh` stands in for the interpreter and coreutils `timeout` is the
//! guard, so these run on any Linux host without extra setup.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use livexec::{Config, ServerMessage, SessionChannel};

mod cleanup;
mod config_loading;
mod interactive;
mod one_shot;
mod timeouts;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Upper bound on any single session in these tests
const SESSION_DEADLINE: Duration = Duration::from_secs(15);

/// Helper to get fixture program content
pub(crate) fn fixture_program(name: &str) -> Vec<u8> {
    let path = format!("{FIXTURES_PATH}/programs/{name}");
    fs::read(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// Shell-backed config writing scratch files to a directory of its own
pub(crate) fn test_config() -> Config {
    static NEXT: AtomicUsize = AtomicUsize::new(0);

    let path = format!("{FIXTURES_PATH}/configs/sh.toml");
    let mut config = Config::from_file(&path).expect("Failed to load test config");

    let dir = std::env::temp_dir().join(format!(
        "livexec-it-{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&dir).expect("Failed to create scratch dir");
    config.scratch_dir = Some(dir);
    config
}

/// Files currently in a config's scratch directory
pub(crate) fn scratch_files(config: &Config) -> Vec<PathBuf> {
    fs::read_dir(config.scratch_dir())
        .expect("Failed to list scratch dir")
        .map(|entry| entry.expect("Failed to read dir entry").path())
        .collect()
}

/// Receive every message until the session closes the channel
pub(crate) async fn collect(channel: &mut SessionChannel) -> Vec<ServerMessage> {
    tokio::time::timeout(SESSION_DEADLINE, async {
        let mut messages = Vec::new();
        while let Some(message) = channel.recv().await {
            messages.push(message);
        }
        messages
    })
    .await
    .expect("session did not close its channel in time")
}

/// Wait until `check` holds, polling every 20ms
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(SESSION_DEADLINE, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition did not hold in time")
}
