use super::*;
use crate::error::{Error, ProcessError, TaskError};
use crate::extraction::ArchiveTool;
use crate::test_helpers::{FakeArchiveTool, create_test_manager, manager_over};
use crate::types::{InstallConfig, TaskParams, TaskSource, TaskState};
use std::path::Path;
use std::time::Duration;

mod store;

fn params(root: &Path) -> TaskParams {
    TaskParams {
        name: "Example".to_string(),
        image_url: "https://img.example/cover.png".to_string(),
        save_dir: root.join("downloads"),
        md5: String::new(),
        install_dir: root.join("install"),
        install: InstallConfig::Archive {
            password: Some("secret".to_string()),
        },
    }
}

fn pan(path: &str) -> TaskSource {
    TaskSource::Pan {
        pan_path: path.to_string(),
    }
}

fn fake_tool() -> Arc<dyn ArchiveTool> {
    Arc::new(FakeArchiveTool::new())
}

/// A manager whose BaiduPCS-Go binary does not exist
fn offline_manager() -> (TaskManager, tempfile::TempDir) {
    create_test_manager(Path::new("/nonexistent/BaiduPCS-Go"), fake_tool())
}

fn assert_invalid_state(err: Error, expected_state: TaskState) {
    match err {
        Error::Task(TaskError::InvalidState { current_state, .. }) => {
            assert_eq!(current_state, expected_state)
        }
        other => panic!("expected InvalidState, got {other:?}"),
    }
}

/// Poll until the record reaches `state`
async fn wait_for_state(manager: &TaskManager, id: TaskId, state: TaskState) -> TaskRecord {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(record) = manager.get_task(id).await
                && record.state == state
            {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("task {id} never reached {state}"))
}

/// Read the persisted store as raw JSON
fn read_store(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}
