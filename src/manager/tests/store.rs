use super::*;

fn record(id: u64, state: TaskState) -> TaskRecord {
    let mut record = TaskRecord::new(
        TaskId(id),
        params(Path::new("/data")),
        pan(&format!("/games/{id}.zip")),
        1_700_000_000_000,
    );
    record.state = state;
    record
}

#[tokio::test]
async fn missing_store_loads_empty() {
    let temp_dir = tempfile::tempdir().unwrap();

    let store = TaskStore::load(&temp_dir.path().join("tasks.json")).await;

    assert_eq!(store, TaskStore::default());
}

#[tokio::test]
async fn corrupt_store_loads_empty() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("tasks.json");
    std::fs::write(&path, "{\"latestId\": 3, \"tasks\": [").unwrap();

    let store = TaskStore::load(&path).await;

    assert_eq!(store.latest_id, 0);
    assert!(store.tasks.is_empty());
}

#[tokio::test]
async fn save_then_load_keeps_records_and_counter() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("state").join("tasks.json");
    let store = TaskStore {
        latest_id: 7,
        tasks: vec![
            record(5, TaskState::Completed),
            record(7, TaskState::Error),
        ],
    };

    store.save(&path).await.unwrap();
    let loaded = TaskStore::load(&path).await;

    assert_eq!(loaded, store);
    assert!(
        !temp_dir.path().join("state").join("tasks.json.tmp").exists(),
        "temp file must be renamed away"
    );
}

#[tokio::test]
async fn stale_downloading_record_loads_as_paused() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("tasks.json");
    TaskStore {
        latest_id: 2,
        tasks: vec![
            record(1, TaskState::Downloading),
            record(2, TaskState::Waiting),
        ],
    }
    .save(&path)
    .await
    .unwrap();

    let store = TaskStore::load(&path).await;

    assert_eq!(store.get(TaskId(1)).unwrap().state, TaskState::Paused);
    assert_eq!(store.get(TaskId(2)).unwrap().state, TaskState::Waiting);
}

#[tokio::test]
async fn manager_exposes_stale_downloading_task_as_paused() {
    let temp_dir = tempfile::tempdir().unwrap();
    TaskStore {
        latest_id: 1,
        tasks: vec![record(1, TaskState::Downloading)],
    }
    .save(&temp_dir.path().join("tasks.json"))
    .await
    .unwrap();

    let manager = manager_over(
        temp_dir.path(),
        Path::new("/nonexistent/BaiduPCS-Go"),
        fake_tool(),
    );

    let record = manager.get_task(TaskId(1)).await.unwrap();
    assert_eq!(record.state, TaskState::Paused);

    // the counter survives the reload
    let id = manager
        .add_task(params(temp_dir.path()), pan("/games/next.zip"))
        .await
        .unwrap();
    assert_eq!(id, TaskId(2));
}

#[tokio::test]
async fn store_file_uses_camel_case_keys() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("tasks.json");
    TaskStore {
        latest_id: 1,
        tasks: vec![record(1, TaskState::Paused)],
    }
    .save(&path)
    .await
    .unwrap();

    let json = read_store(&path);
    let task = &json["tasks"][0];
    for key in [
        "id",
        "name",
        "imageUrl",
        "saveDir",
        "md5",
        "localPath",
        "createdAt",
        "updatedAt",
        "completedAt",
        "source",
        "installDir",
        "install",
        "state",
        "progress",
    ] {
        assert!(task.get(key).is_some(), "missing key {key}");
    }
    assert_eq!(task["progress"]["timeLeft"], 0);
    assert!(
        std::fs::read_to_string(&path).unwrap().contains("\n  "),
        "store is pretty-printed"
    );
}

#[test]
fn next_id_increments_counter() {
    let mut store = TaskStore {
        latest_id: 4,
        tasks: Vec::new(),
    };

    assert_eq!(store.next_id(), TaskId(5));
    assert_eq!(store.next_id(), TaskId(6));
    assert_eq!(store.latest_id, 6);
}
