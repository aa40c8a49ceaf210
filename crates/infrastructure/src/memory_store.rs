use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use cronbox_core::SchedulerResult;
use cronbox_domain::{LoadStats, Task, TaskStore};

/// 内存任务存储，用于测试和无持久化场景
///
/// 保存序列化后的JSON而不是Task本身，使序列化路径与文件存储
/// 保持一致。
pub struct MemoryTaskStore {
    records: RwLock<HashMap<Uuid, String>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn save_all(&self, tasks: &[Task]) -> SchedulerResult<()> {
        let mut fresh = HashMap::with_capacity(tasks.len());
        for task in tasks {
            fresh.insert(task.id, serde_json::to_string(task)?);
        }
        *self.records.write().await = fresh;
        Ok(())
    }

    async fn load_all(&self) -> SchedulerResult<(HashMap<Uuid, Task>, LoadStats)> {
        let records = self.records.read().await;
        let mut tasks = HashMap::with_capacity(records.len());
        let mut stats = LoadStats::default();

        for payload in records.values() {
            let task: Task = serde_json::from_str(payload)?;
            tasks.insert(task.id, task);
            stats.loaded += 1;
        }
        Ok((tasks, stats))
    }
}
