use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use cronbox_core::{SchedulerConfig, SchedulerError};
use cronbox_dispatcher::TaskScheduler;
use cronbox_domain::{Notifier, Task, TaskPatch, TaskStatus, TaskStore};
use cronbox_infrastructure::{JsonTaskStore, MemoryTaskStore};
use cronbox_worker::{executors::MockExecutor, ExecutorRegistry, TaskRunner};

/// 记录收到的通知，供断言使用
struct RecordingNotifier {
    received: Mutex<Vec<(Uuid, String)>>,
}

impl RecordingNotifier {
    fn new() -> Self {
        Self {
            received: Mutex::new(Vec::new()),
        }
    }

    async fn subjects_for(&self, task_id: Uuid) -> Vec<String> {
        self.received
            .lock()
            .await
            .iter()
            .filter(|(id, _)| *id == task_id)
            .map(|(_, subject)| subject.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, task: &Task, subject: &str, _body: &str) {
        self.received.lock().await.push((task.id, subject.to_string()));
    }
}

struct Harness {
    scheduler: TaskScheduler,
    notifier: Arc<RecordingNotifier>,
    store: Arc<dyn TaskStore>,
}

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        max_concurrent_tasks: 5,
        default_timeout_seconds: 30,
        default_max_retries: 3,
        default_retry_interval_seconds: 60,
        admission_backoff_seconds: 1,
    }
}

fn build_harness(store: Arc<dyn TaskStore>, config: SchedulerConfig) -> Harness {
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(MockExecutor::new()));
    let runner = Arc::new(TaskRunner::new(Arc::new(registry)));
    let notifier = Arc::new(RecordingNotifier::new());

    let scheduler = TaskScheduler::new(runner, store.clone(), notifier.clone(), config);
    Harness {
        scheduler,
        notifier,
        store,
    }
}

fn memory_harness(config: SchedulerConfig) -> Harness {
    build_harness(Arc::new(MemoryTaskStore::new()), config)
}

fn mock_task(name: &str) -> Task {
    Task::new(name, "mock", json!({"succeed": true, "output": "ok"}))
}

/// 到时间点`at`的一次性调度表达式
fn one_shot_in(ms: i64) -> String {
    let at = Utc::now() + chrono::Duration::milliseconds(ms);
    format!("date:{}", at.to_rfc3339())
}

#[tokio::test]
async fn test_add_task_applies_defaults() {
    let harness = memory_harness(test_config());
    let id = harness.scheduler.add_task(mock_task("默认值")).await.unwrap();

    let task = harness.scheduler.get_task(id).await.unwrap();
    assert_eq!(task.timeout_seconds, 30);
    assert_eq!(task.max_retries, 3);
    assert_eq!(task.retry_interval_seconds, 60);
    assert_eq!(task.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_unknown_task_operations() {
    let harness = memory_harness(test_config());
    let id = Uuid::new_v4();

    assert!(!harness.scheduler.update_task(id, TaskPatch::default()).await.unwrap());
    assert!(!harness.scheduler.remove_task(id).await.unwrap());
    assert!(!harness.scheduler.pause_task(id).await.unwrap());
    assert!(!harness.scheduler.cancel_task(id).await);

    let err = harness.scheduler.run_task_now(id).await.unwrap_err();
    assert!(matches!(err, SchedulerError::TaskNotFound { .. }));
}

#[tokio::test]
async fn test_invalid_schedule_accepted_but_unscheduled() {
    let harness = memory_harness(test_config());
    let task = mock_task("坏表达式").with_schedule("cron:not a cron");
    let id = harness.scheduler.add_task(task).await.unwrap();

    let task = harness.scheduler.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.next_run.is_none());

    // 仍可手动执行
    let result = harness.scheduler.run_task_now(id).await.unwrap().unwrap();
    assert_eq!(result.status, TaskStatus::Success);
}

#[tokio::test]
async fn test_manual_only_task_never_auto_fires() {
    let harness = memory_harness(test_config());
    let id = harness.scheduler.add_task(mock_task("手动")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    let task = harness.scheduler.get_task(id).await.unwrap();
    assert!(task.history.is_empty());
    assert!(task.last_run.is_none());
    assert!(task.next_run.is_none());
}

#[tokio::test]
async fn test_run_task_now_records_history() {
    let harness = memory_harness(test_config());
    let id = harness.scheduler.add_task(mock_task("手动执行")).await.unwrap();

    let result = harness.scheduler.run_task_now(id).await.unwrap().unwrap();
    assert_eq!(result.status, TaskStatus::Success);
    assert_eq!(result.output, "ok");

    let task = harness.scheduler.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.history.len(), 1);
    assert!(task.last_run.is_some());
}

#[tokio::test]
async fn test_run_task_now_rejects_unmet_dependency() {
    let harness = memory_harness(test_config());
    let dep_id = harness.scheduler.add_task(mock_task("上游")).await.unwrap();

    let task = mock_task("下游").with_dependencies(vec![dep_id]);
    let id = harness.scheduler.add_task(task).await.unwrap();

    // 上游从未成功，下游拒绝执行且不留痕迹
    let outcome = harness.scheduler.run_task_now(id).await.unwrap();
    assert!(outcome.is_none());
    let task = harness.scheduler.get_task(id).await.unwrap();
    assert!(task.history.is_empty());
    assert!(task.last_run.is_none());

    // 上游成功后放行
    harness.scheduler.run_task_now(dep_id).await.unwrap();
    let outcome = harness.scheduler.run_task_now(id).await.unwrap();
    assert!(outcome.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_one_shot_fires_exactly_once() {
    let harness = memory_harness(test_config());
    let task = mock_task("一次性").with_schedule(one_shot_in(300));
    let id = harness.scheduler.add_task(task).await.unwrap();

    let task = harness.scheduler.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Scheduled);
    assert!(task.next_run.is_some());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let task = harness.scheduler.get_task(id).await.unwrap();
    assert_eq!(task.history.len(), 1);
    assert_eq!(task.status, TaskStatus::Success);
    assert!(task.next_run.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_interval_task_fires_repeatedly() {
    let harness = memory_harness(test_config());
    let task = mock_task("间隔").with_schedule("interval:1s");
    let id = harness.scheduler.add_task(task).await.unwrap();

    tokio::time::sleep(Duration::from_millis(2600)).await;
    let task = harness.scheduler.get_task(id).await.unwrap();
    assert!(
        task.history.len() >= 2,
        "应至少触发2次，实际 {}",
        task.history.len()
    );
    assert!(task.next_run.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pause_and_resume() {
    let harness = memory_harness(test_config());
    let task = mock_task("暂停恢复").with_schedule("interval:1s");
    let id = harness.scheduler.add_task(task).await.unwrap();

    assert!(harness.scheduler.pause_task(id).await.unwrap());
    let paused = harness.scheduler.get_task(id).await.unwrap();
    assert_eq!(paused.status, TaskStatus::Paused);
    assert!(!paused.enabled);
    let runs_at_pause = paused.history.len();

    // 暂停期间不触发
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(
        harness.scheduler.get_task(id).await.unwrap().history.len(),
        runs_at_pause
    );

    assert!(harness.scheduler.resume_task(id).await.unwrap());
    tokio::time::sleep(Duration::from_millis(1600)).await;
    let resumed = harness.scheduler.get_task(id).await.unwrap();
    assert!(resumed.history.len() > runs_at_pause);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_update_schedule_rearms_trigger() {
    let harness = memory_harness(test_config());
    let task = mock_task("改表达式").with_schedule("interval:1h");
    let id = harness.scheduler.add_task(task).await.unwrap();

    let patch = TaskPatch {
        schedule: Some(Some("interval:1s".to_string())),
        ..TaskPatch::default()
    };
    assert!(harness.scheduler.update_task(id, patch).await.unwrap());

    tokio::time::sleep(Duration::from_millis(1600)).await;
    let task = harness.scheduler.get_task(id).await.unwrap();
    assert!(!task.history.is_empty(), "新表达式应已生效");

    // 清除表达式后停止触发
    let patch = TaskPatch {
        schedule: Some(None),
        ..TaskPatch::default()
    };
    assert!(harness.scheduler.update_task(id, patch).await.unwrap());
    let runs = harness.scheduler.get_task(id).await.unwrap().history.len();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(
        harness.scheduler.get_task(id).await.unwrap().history.len(),
        runs
    );
}

#[tokio::test]
async fn test_clearing_schedule_resets_scheduling_state() {
    let harness = memory_harness(test_config());
    let task = mock_task("清除表达式").with_schedule("interval:1h");
    let id = harness.scheduler.add_task(task).await.unwrap();

    // 等触发循环写入next_run
    tokio::time::sleep(Duration::from_millis(200)).await;
    let scheduled = harness.scheduler.get_task(id).await.unwrap();
    assert_eq!(scheduled.status, TaskStatus::Scheduled);
    assert!(scheduled.next_run.is_some());

    let patch = TaskPatch {
        schedule: Some(None),
        ..TaskPatch::default()
    };
    assert!(harness.scheduler.update_task(id, patch).await.unwrap());

    let task = harness.scheduler.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.next_run.is_none(), "取消调度后不应暴露过期的触发时间");
}

#[tokio::test]
async fn test_disabling_task_resets_scheduling_state() {
    let harness = memory_harness(test_config());
    let task = mock_task("禁用").with_schedule("interval:1h");
    let id = harness.scheduler.add_task(task).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let patch = TaskPatch {
        enabled: Some(false),
        ..TaskPatch::default()
    };
    assert!(harness.scheduler.update_task(id, patch).await.unwrap());

    let task = harness.scheduler.get_task(id).await.unwrap();
    assert!(!task.enabled);
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.next_run.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remove_task_stops_trigger() {
    let harness = memory_harness(test_config());
    let task = mock_task("删除").with_schedule("interval:1s");
    let id = harness.scheduler.add_task(task).await.unwrap();

    assert!(harness.scheduler.remove_task(id).await.unwrap());
    assert!(harness.scheduler.get_task(id).await.is_none());

    // 删除后不再有触发痕迹
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(harness.scheduler.get_task(id).await.is_none());
    let (loaded, _) = harness.store.load_all().await.unwrap();
    assert!(!loaded.contains_key(&id), "存储中的记录应同步删除");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scheduled_fire_skips_unmet_dependency() {
    let harness = memory_harness(test_config());
    let dep_id = harness.scheduler.add_task(mock_task("上游")).await.unwrap();

    let task = mock_task("下游")
        .with_dependencies(vec![dep_id])
        .with_schedule(one_shot_in(300));
    let id = harness.scheduler.add_task(task).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let task = harness.scheduler.get_task(id).await.unwrap();
    assert!(task.history.is_empty(), "依赖未满足时不应执行");
    assert!(task.last_run.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retry_until_exhaustion_then_notify() {
    let harness = memory_harness(test_config());
    let task = Task::new("总是失败", "mock", json!({"succeed": false}))
        .with_retry_policy(2, 1)
        .with_schedule(one_shot_in(200));
    let id = harness.scheduler.add_task(task).await.unwrap();

    // 初次执行 + 2次重试，每次间隔1秒
    tokio::time::sleep(Duration::from_millis(4500)).await;

    let task = harness.scheduler.get_task(id).await.unwrap();
    assert_eq!(task.history.len(), 3, "应执行1次初始+2次重试");
    assert_eq!(task.retries, 2);
    assert_eq!(task.status, TaskStatus::Failed);

    let subjects = harness.notifier.subjects_for(id).await;
    assert_eq!(subjects, vec!["任务执行失败"], "重试用尽时只通知一次");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_success_resets_retry_counter_and_notifies() {
    let harness = memory_harness(test_config());
    let task = mock_task("成功通知").with_schedule(one_shot_in(200));
    let id = harness.scheduler.add_task(task).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let task = harness.scheduler.get_task(id).await.unwrap();
    assert_eq!(task.retries, 0);
    assert_eq!(
        harness.notifier.subjects_for(id).await,
        vec!["任务执行成功"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timeout_goes_through_retry_then_notifies() {
    let harness = memory_harness(test_config());
    let mut task = Task::new("超时", "mock", json!({"sleep_ms": 5000}))
        .with_retry_policy(1, 1)
        .with_schedule(one_shot_in(200));
    task.timeout_seconds = 1;
    let id = harness.scheduler.add_task(task).await.unwrap();

    // 初次执行超时(1s) + 重试间隔(1s) + 重试超时(1s)
    tokio::time::sleep(Duration::from_millis(5000)).await;

    let task = harness.scheduler.get_task(id).await.unwrap();
    assert_eq!(task.history.len(), 2);
    assert!(task.history.iter().all(|r| r.status == TaskStatus::Timeout));
    assert_eq!(
        harness.notifier.subjects_for(id).await,
        vec!["任务执行超时"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrency_admission_bounds_running_set() {
    let config = SchedulerConfig {
        max_concurrent_tasks: 2,
        admission_backoff_seconds: 1,
        ..test_config()
    };
    let harness = memory_harness(config);

    let mut ids = Vec::new();
    for i in 0..5 {
        let task = Task::new(
            format!("并发-{i}"),
            "mock",
            json!({"sleep_ms": 1500, "succeed": true}),
        )
        .with_schedule(one_shot_in(200));
        ids.push(harness.scheduler.add_task(task).await.unwrap());
    }

    // 执行期间采样运行集合，任何时刻都不应超过上限
    let mut max_seen = 0;
    for _ in 0..80 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let count = harness.scheduler.running_tasks().await.len();
        max_seen = max_seen.max(count);
    }
    assert!(max_seen <= 2, "并发峰值 {max_seen} 超过上限");

    // 所有任务最终都被执行
    for id in ids {
        let task = harness.scheduler.get_task(id).await.unwrap();
        assert_eq!(task.history.len(), 1, "任务 {} 未执行", task.name);
        assert_eq!(task.status, TaskStatus::Success);
    }
}

#[tokio::test]
async fn test_start_normalizes_stale_running_status() {
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());

    // 模拟上次崩溃时留下的Running状态
    let mut task = mock_task("崩溃残留");
    task.status = TaskStatus::Running;
    store.save_all(&[task.clone()]).await.unwrap();

    let harness = build_harness(store, test_config());
    let stats = harness.scheduler.start().await.unwrap();
    assert_eq!(stats.loaded, 1);
    assert_eq!(stats.failed, 0);

    let recovered = harness.scheduler.get_task(task.id).await.unwrap();
    assert_eq!(recovered.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_write_through_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn TaskStore> =
        Arc::new(JsonTaskStore::new(dir.path(), vec!["mock".to_string()]));
    let harness = build_harness(store.clone(), test_config());

    let id = harness.scheduler.add_task(mock_task("持久化")).await.unwrap();
    // 不经shutdown，直接从磁盘读取
    let (loaded, stats) = store.load_all().await.unwrap();
    assert_eq!(stats.loaded, 1);
    assert!(loaded.contains_key(&id));

    harness.scheduler.run_task_now(id).await.unwrap();
    let (loaded, _) = store.load_all().await.unwrap();
    assert_eq!(loaded[&id].history.len(), 1, "执行结果应即时写盘");

    harness.scheduler.remove_task(id).await.unwrap();
    let (loaded, _) = store.load_all().await.unwrap();
    assert!(loaded.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_resumes_schedules() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store: Arc<dyn TaskStore> =
            Arc::new(JsonTaskStore::new(dir.path(), vec!["mock".to_string()]));
        let harness = build_harness(store, test_config());
        let task = mock_task("重启恢复").with_schedule("interval:1s");
        harness.scheduler.add_task(task).await.unwrap();
        harness.scheduler.shutdown().await;
    }

    // 新进程：从磁盘恢复并继续触发
    let store: Arc<dyn TaskStore> =
        Arc::new(JsonTaskStore::new(dir.path(), vec!["mock".to_string()]));
    let harness = build_harness(store, test_config());
    let stats = harness.scheduler.start().await.unwrap();
    assert_eq!(stats.loaded, 1);

    tokio::time::sleep(Duration::from_millis(1600)).await;
    let tasks = harness.scheduler.tasks().await;
    assert_eq!(tasks.len(), 1);
    assert!(!tasks[0].history.is_empty(), "恢复后应继续自动触发");
    harness.scheduler.shutdown().await;
}
