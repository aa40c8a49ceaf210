use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cronbox_core::{SchedulerConfig, SchedulerError, SchedulerResult};
use cronbox_domain::{
    ExecutionResult, LoadStats, Notifier, Task, TaskPatch, TaskStatus, TaskStore,
};
use cronbox_worker::TaskRunner;

use crate::trigger::Trigger;

/// 任务调度器
///
/// 管理任务的注册、触发、并发准入、依赖检查和失败重试。
/// 所有变更都即时写回存储，进程崩溃后可从存储恢复。
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    tasks: RwLock<HashMap<Uuid, Task>>,
    /// 每个已安排触发器的后台循环句柄
    jobs: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    runner: Arc<TaskRunner>,
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
}

impl TaskScheduler {
    pub fn new(
        runner: Arc<TaskRunner>,
        store: Arc<dyn TaskStore>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                tasks: RwLock::new(HashMap::new()),
                jobs: Mutex::new(HashMap::new()),
                runner,
                store,
                notifier,
                config,
            }),
        }
    }

    /// 启动调度器
    ///
    /// 从存储加载任务，把上次崩溃时滞留在Running状态的任务归位为
    /// Pending，然后为启用且带调度表达式的任务安排触发器。
    pub async fn start(&self) -> SchedulerResult<LoadStats> {
        let (mut loaded, stats) = self.inner.store.load_all().await?;

        for task in loaded.values_mut() {
            if task.status == TaskStatus::Running {
                warn!("任务 {} [{}] 上次未正常结束，状态归位", task.name, task.id);
                task.status = TaskStatus::Pending;
                task.updated_at = Utc::now();
            }
        }

        let ids: Vec<Uuid> = loaded.keys().copied().collect();
        {
            let mut tasks = self.inner.tasks.write().await;
            *tasks = loaded;
        }

        for id in ids {
            self.inner.clone().install_trigger(id).await;
        }

        self.inner.persist().await;
        info!(
            "调度器已启动: 加载 {} 个任务, {} 条损坏记录被跳过",
            stats.loaded, stats.failed
        );
        Ok(stats)
    }

    /// 停止调度器，卸载全部触发器并做最后一次持久化
    pub async fn shutdown(&self) {
        let mut jobs = self.inner.jobs.lock().await;
        for (id, handle) in jobs.drain() {
            handle.abort();
            debug!("卸载触发器: {id}");
        }
        drop(jobs);

        self.inner.persist().await;
        info!("调度器已停止");
    }

    /// 注册新任务并返回其ID
    ///
    /// 超时、重试等字段为0时填入调度器默认值。调度表达式无法解析时
    /// 任务仍被接受，仅记录警告且不自动触发。
    pub async fn add_task(&self, mut task: Task) -> SchedulerResult<Uuid> {
        if task.timeout_seconds == 0 {
            task.timeout_seconds = self.inner.config.default_timeout_seconds;
        }
        if task.max_retries == 0 {
            task.max_retries = self.inner.config.default_max_retries;
        }
        if task.retry_interval_seconds == 0 {
            task.retry_interval_seconds = self.inner.config.default_retry_interval_seconds;
        }

        let id = task.id;
        info!("添加任务: {} [{}], 类型: {}", task.name, id, task.kind);
        {
            let mut tasks = self.inner.tasks.write().await;
            tasks.insert(id, task);
        }

        self.inner.clone().install_trigger(id).await;
        self.inner.persist().await;
        Ok(id)
    }

    /// 更新任务字段，任务不存在时返回false
    ///
    /// 修改了调度表达式或启用状态时重新安排触发器。
    pub async fn update_task(&self, id: Uuid, patch: TaskPatch) -> SchedulerResult<bool> {
        let rearm = patch.touches_trigger();
        {
            let mut tasks = self.inner.tasks.write().await;
            let Some(task) = tasks.get_mut(&id) else {
                return Ok(false);
            };

            if let Some(name) = patch.name {
                task.name = name;
            }
            if let Some(description) = patch.description {
                task.description = description;
            }
            if let Some(parameters) = patch.parameters {
                task.parameters = parameters;
            }
            if let Some(priority) = patch.priority {
                task.priority = priority;
            }
            if let Some(schedule) = patch.schedule {
                task.schedule = schedule;
            }
            if let Some(timeout) = patch.timeout_seconds {
                task.timeout_seconds = timeout;
            }
            if let Some(max_retries) = patch.max_retries {
                task.max_retries = max_retries;
            }
            if let Some(interval) = patch.retry_interval_seconds {
                task.retry_interval_seconds = interval;
            }
            if let Some(dependencies) = patch.dependencies {
                task.dependencies = dependencies;
            }
            if let Some(enabled) = patch.enabled {
                task.enabled = enabled;
            }
            task.updated_at = Utc::now();
        }

        if rearm {
            self.inner.remove_trigger(id).await;
            // 触发循环被中止时不会执行自己的收尾，这里显式清掉
            // 调度痕迹；若仍符合条件，install_trigger会重新写入
            {
                let mut tasks = self.inner.tasks.write().await;
                if let Some(task) = tasks.get_mut(&id) {
                    task.next_run = None;
                    if task.status == TaskStatus::Scheduled {
                        task.status = TaskStatus::Pending;
                    }
                }
            }
            self.inner.clone().install_trigger(id).await;
        }

        self.inner.persist().await;
        info!("更新任务: {id}");
        Ok(true)
    }

    /// 删除任务，任务不存在时返回false
    pub async fn remove_task(&self, id: Uuid) -> SchedulerResult<bool> {
        self.inner.remove_trigger(id).await;
        self.inner.runner.cancel(id).await;

        let removed = {
            let mut tasks = self.inner.tasks.write().await;
            tasks.remove(&id)
        };

        match removed {
            Some(task) => {
                info!("删除任务: {} [{id}]", task.name);
                self.inner.persist().await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 暂停任务，卸载其触发器
    pub async fn pause_task(&self, id: Uuid) -> SchedulerResult<bool> {
        {
            let mut tasks = self.inner.tasks.write().await;
            let Some(task) = tasks.get_mut(&id) else {
                return Ok(false);
            };
            task.enabled = false;
            task.status = TaskStatus::Paused;
            task.next_run = None;
            task.updated_at = Utc::now();
        }

        self.inner.remove_trigger(id).await;
        self.inner.persist().await;
        info!("暂停任务: {id}");
        Ok(true)
    }

    /// 恢复已暂停的任务，重新安排触发器
    pub async fn resume_task(&self, id: Uuid) -> SchedulerResult<bool> {
        {
            let mut tasks = self.inner.tasks.write().await;
            let Some(task) = tasks.get_mut(&id) else {
                return Ok(false);
            };
            task.enabled = true;
            task.status = TaskStatus::Pending;
            task.updated_at = Utc::now();
        }

        self.inner.clone().install_trigger(id).await;
        self.inner.persist().await;
        info!("恢复任务: {id}");
        Ok(true)
    }

    /// 立即执行一次任务
    ///
    /// 手动触发不经过并发准入和重试编排，但依赖未满足时拒绝执行
    /// 并返回None。执行结果同样写入历史并持久化。
    pub async fn run_task_now(&self, id: Uuid) -> SchedulerResult<Option<ExecutionResult>> {
        let snapshot = {
            let mut tasks = self.inner.tasks.write().await;
            let Some(task) = tasks.get(&id) else {
                return Err(SchedulerError::TaskNotFound { id: id.to_string() });
            };

            if !dependencies_met(task, &tasks_view(&tasks)) {
                warn!("任务 {} [{id}] 依赖未满足，拒绝手动执行", task.name);
                return Ok(None);
            }

            let task = tasks.get_mut(&id).unwrap();
            task.status = TaskStatus::Running;
            task.last_run = Some(Utc::now());
            task.updated_at = Utc::now();
            task.clone()
        };

        info!("手动执行任务: {} [{id}]", snapshot.name);
        let result = self.inner.runner.execute(&snapshot).await;

        {
            let mut tasks = self.inner.tasks.write().await;
            if let Some(task) = tasks.get_mut(&id) {
                task.record_execution(&result);
            }
        }

        self.inner.persist().await;
        Ok(Some(result))
    }

    /// 取消正在执行的任务
    pub async fn cancel_task(&self, id: Uuid) -> bool {
        self.inner.runner.cancel(id).await
    }

    pub async fn get_task(&self, id: Uuid) -> Option<Task> {
        self.inner.tasks.read().await.get(&id).cloned()
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.inner.tasks.read().await.values().cloned().collect()
    }

    pub async fn tasks_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.inner
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect()
    }

    pub async fn running_tasks(&self) -> Vec<Uuid> {
        self.inner.runner.running_tasks().await
    }
}

impl SchedulerInner {
    /// 为任务安排触发器
    ///
    /// 任务未启用或没有调度表达式时不做任何事；表达式无法解析时
    /// 记录警告，任务保持可手动执行。
    async fn install_trigger(self: Arc<Self>, id: Uuid) {
        let trigger = {
            let mut tasks = self.tasks.write().await;
            let Some(task) = tasks.get_mut(&id) else {
                return;
            };
            if !task.enabled {
                return;
            }
            let Some(expr) = task.schedule.clone() else {
                return;
            };

            match Trigger::parse(&expr) {
                Ok(trigger) => {
                    info!(
                        "任务 {} [{id}] 已安排触发器: {}",
                        task.name,
                        trigger.describe()
                    );
                    task.status = TaskStatus::Scheduled;
                    trigger
                }
                Err(e) => {
                    warn!("任务 {} [{id}] 调度表达式无效，不自动触发: {e}", task.name);
                    return;
                }
            }
        };

        let inner = self.clone();
        let handle = tokio::spawn(async move {
            inner.trigger_loop(id, trigger).await;
        });

        let mut jobs = self.jobs.lock().await;
        if let Some(old) = jobs.insert(id, handle) {
            old.abort();
        }
    }

    /// 卸载任务的触发器
    async fn remove_trigger(&self, id: Uuid) {
        let mut jobs = self.jobs.lock().await;
        if let Some(handle) = jobs.remove(&id) {
            handle.abort();
        }
    }

    /// 触发器循环：计算下次触发时间、睡眠、触发，周而复始。
    /// 一次性触发完成或不再有下次触发时间时退出。
    async fn trigger_loop(self: Arc<Self>, id: Uuid, trigger: Trigger) {
        loop {
            let now = Utc::now();
            let Some(next) = trigger.next_fire(now) else {
                break;
            };

            {
                let mut tasks = self.tasks.write().await;
                let Some(task) = tasks.get_mut(&id) else {
                    return;
                };
                task.next_run = Some(next);
            }

            let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!("任务 {id} 下次触发: {next} ({delay:?} 后)");
            tokio::time::sleep(delay).await;

            self.run_scheduled(id).await;

            if trigger.is_one_shot() {
                break;
            }
        }

        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(&id) {
            task.next_run = None;
        }
    }

    /// 一次定时触发的入口，把调度层错误转化为任务失败和通知
    async fn run_scheduled(self: &Arc<Self>, id: Uuid) {
        if let Err(e) = self.clone().fire(id).await {
            error!("任务 {id} 调度异常: {e}");
            let snapshot = {
                let mut tasks = self.tasks.write().await;
                match tasks.get_mut(&id) {
                    Some(task) => {
                        task.status = TaskStatus::Failed;
                        task.updated_at = Utc::now();
                        Some(task.clone())
                    }
                    None => None,
                }
            };
            if let Some(task) = snapshot {
                self.notifier
                    .notify(&task, "任务调度异常", &format!("调度失败: {e}"))
                    .await;
            }
            self.persist().await;
        }
    }

    /// 执行一次定时触发
    ///
    /// 依次经过启用检查、依赖检查和并发准入。达到并发上限时不立即
    /// 执行，改为延迟后重新触发，不占用执行槽位。
    async fn fire(self: Arc<Self>, id: Uuid) -> SchedulerResult<()> {
        let snapshot = {
            let mut tasks = self.tasks.write().await;
            let Some(task) = tasks.get(&id) else {
                warn!("触发的任务已不存在: {id}");
                return Ok(());
            };

            if !task.enabled {
                debug!("任务 {id} 已禁用，跳过本次触发");
                return Ok(());
            }

            if !dependencies_met(task, &tasks_view(&tasks)) {
                warn!("任务 {} [{id}] 依赖未满足，跳过本次触发", task.name);
                return Ok(());
            }

            // 以注册表中的Running状态计数，状态在锁内同步翻转，
            // 不受执行任务真正启动时机的影响
            let running = tasks
                .values()
                .filter(|t| t.status == TaskStatus::Running)
                .count();
            if running >= self.config.max_concurrent_tasks {
                warn!(
                    "达到最大并发数 {}，任务 {id} 延迟 {} 秒后重试",
                    self.config.max_concurrent_tasks, self.config.admission_backoff_seconds
                );
                self.schedule_refire(id, self.config.admission_backoff_seconds);
                return Ok(());
            }

            let task = tasks.get_mut(&id).unwrap();
            task.status = TaskStatus::Running;
            task.last_run = Some(Utc::now());
            task.updated_at = Utc::now();
            task.clone()
        };

        self.persist().await;

        let inner = self.clone();
        tokio::spawn(async move {
            inner.execute_and_handle(snapshot).await;
        });
        Ok(())
    }

    /// 延迟后重新触发，用于并发准入退避和失败重试
    fn schedule_refire(self: &Arc<Self>, id: Uuid, delay_seconds: u64) {
        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay_seconds)).await;
            inner.run_scheduled(id).await;
        });
    }

    /// 执行任务并按结果编排重试和通知
    async fn execute_and_handle(self: Arc<Self>, snapshot: Task) {
        let id = snapshot.id;
        let result = self.runner.execute(&snapshot).await;

        let notification = {
            let mut tasks = self.tasks.write().await;
            let Some(task) = tasks.get_mut(&id) else {
                // 执行期间任务被删除，丢弃结果
                return;
            };
            task.record_execution(&result);

            match result.status {
                TaskStatus::Failed | TaskStatus::Timeout => {
                    if task.retries < task.max_retries {
                        task.retries += 1;
                        info!(
                            "任务 {} [{id}] 第 {}/{} 次重试，{} 秒后执行",
                            task.name, task.retries, task.max_retries, task.retry_interval_seconds
                        );
                        self.schedule_refire(id, task.retry_interval_seconds);
                        None
                    } else {
                        let subject = if result.status == TaskStatus::Timeout {
                            "任务执行超时"
                        } else {
                            "任务执行失败"
                        };
                        warn!("任务 {} [{id}] 重试次数已用尽", task.name);
                        Some((task.clone(), subject, format!("错误: {}", result.error)))
                    }
                }
                TaskStatus::Success => {
                    task.retries = 0;
                    Some((
                        task.clone(),
                        "任务执行成功",
                        format!("输出: {}", result.output),
                    ))
                }
                // 取消是操作者行为，既不重试也不通知
                _ => None,
            }
        };

        if let Some((task, subject, body)) = notification {
            self.notifier.notify(&task, subject, &body).await;
        }

        self.persist().await;
    }

    /// 把当前任务集合写回存储，失败只记录日志
    async fn persist(&self) {
        let snapshot: Vec<Task> = {
            let tasks = self.tasks.read().await;
            tasks.values().cloned().collect()
        };

        if let Err(e) = self.store.save_all(&snapshot).await {
            error!("持久化任务失败: {e}");
        }
    }
}

/// 依赖是否全部满足：每个依赖的任务都必须存在且最近一次执行成功
fn dependencies_met(task: &Task, all: &HashMap<Uuid, TaskStatus>) -> bool {
    task.dependencies
        .iter()
        .all(|dep| all.get(dep) == Some(&TaskStatus::Success))
}

fn tasks_view(tasks: &HashMap<Uuid, Task>) -> HashMap<Uuid, TaskStatus> {
    tasks.iter().map(|(id, task)| (*id, task.status)).collect()
}
