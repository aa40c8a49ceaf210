use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use cronbox_core::{SchedulerError, SchedulerResult};
use cronbox_domain::{LoadStats, Task, TaskStore};

/// 加载时必须存在的字段，缺失即视为损坏记录
const REQUIRED_FIELDS: [&str; 5] = ["id", "name", "kind", "created_at", "updated_at"];

/// 基于JSON文件的任务存储
///
/// 每个任务一个`{id}.json`文件。写入先落到`.tmp`再重命名，保证
/// 崩溃后不会留下半写的记录；遗留的`.tmp`文件在加载时清理。
pub struct JsonTaskStore {
    dir: PathBuf,
    /// 已注册的任务类型名，非空时用于拒绝未知类型的记录
    known_kinds: Vec<String>,
}

impl JsonTaskStore {
    pub fn new(dir: impl Into<PathBuf>, known_kinds: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            known_kinds,
        }
    }

    fn task_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// 原子写入单个任务文件
    async fn write_task(&self, task: &Task) -> SchedulerResult<()> {
        let payload = serde_json::to_vec_pretty(task)?;
        let target = self.task_path(task.id);
        let temp = target.with_extension("json.tmp");

        tokio::fs::write(&temp, &payload).await?;
        tokio::fs::rename(&temp, &target).await?;
        Ok(())
    }

    /// 校验单条记录并反序列化
    fn parse_record(&self, file: &str, payload: &[u8]) -> SchedulerResult<Task> {
        let value: serde_json::Value = serde_json::from_slice(payload).map_err(|e| {
            SchedulerError::CorruptRecord {
                file: file.to_string(),
                message: format!("JSON解析失败: {e}"),
            }
        })?;

        for field in REQUIRED_FIELDS {
            if value.get(field).is_none() {
                return Err(SchedulerError::CorruptRecord {
                    file: file.to_string(),
                    message: format!("缺少必需字段: {field}"),
                });
            }
        }

        if !self.known_kinds.is_empty() {
            if let Some(kind) = value.get("kind").and_then(|v| v.as_str()) {
                if !self.known_kinds.iter().any(|k| k == kind) {
                    return Err(SchedulerError::CorruptRecord {
                        file: file.to_string(),
                        message: format!("未注册的任务类型: {kind}"),
                    });
                }
            }
        }

        serde_json::from_value(value).map_err(|e| SchedulerError::CorruptRecord {
            file: file.to_string(),
            message: format!("反序列化失败: {e}"),
        })
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn save_all(&self, tasks: &[Task]) -> SchedulerResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        // 保留集取自传入的任务集合；写失败的任务仍在集合中，
        // 其磁盘上的旧记录不能被当作陈旧记录删除
        let keep: Vec<String> = tasks
            .iter()
            .map(|task| format!("{}.json", task.id))
            .collect();

        for task in tasks {
            // 单个任务写失败不中断整体保存
            if let Err(e) = self.write_task(task).await {
                warn!("保存任务 {} [{}] 失败: {e}", task.name, task.id);
            }
        }

        // 删除已不在集合中的陈旧记录
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".json") && !keep.contains(&name) {
                debug!("删除陈旧的任务文件: {name}");
                if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                    warn!("删除任务文件 {name} 失败: {e}");
                }
            }
        }
        Ok(())
    }

    async fn load_all(&self) -> SchedulerResult<(HashMap<Uuid, Task>, LoadStats)> {
        let mut tasks = HashMap::new();
        let mut stats = LoadStats::default();

        if !self.dir.exists() {
            return Ok((tasks, stats));
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();

            // 上次写入中断留下的临时文件
            if name.ends_with(".tmp") {
                debug!("清理临时文件: {name}");
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("清理临时文件 {name} 失败: {e}");
                }
                continue;
            }
            if !name.ends_with(".json") {
                continue;
            }

            let payload = match tokio::fs::read(&path).await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("读取任务文件 {name} 失败: {e}");
                    stats.failed += 1;
                    continue;
                }
            };

            match self.parse_record(&name, &payload) {
                Ok(task) => {
                    tasks.insert(task.id, task);
                    stats.loaded += 1;
                }
                Err(e) => {
                    warn!("跳过损坏的任务记录: {e}");
                    stats.failed += 1;
                }
            }
        }

        Ok((tasks, stats))
    }
}
