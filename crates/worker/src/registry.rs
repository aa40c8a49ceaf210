use std::collections::HashMap;
use std::sync::Arc;

use cronbox_domain::KindExecutor;

use crate::executors::{DbExecutor, FileExecutor, ProgramExecutor, SystemExecutor, UrlExecutor};

/// 任务类型执行器注册表
///
/// 启动时按类型名注册执行器，之后只读。未注册的类型名在加载
/// 持久化记录时视为损坏记录。
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn KindExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// 注册全部内置任务类型
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(UrlExecutor::new()));
        registry.register(Arc::new(FileExecutor::new()));
        registry.register(Arc::new(ProgramExecutor::new()));
        registry.register(Arc::new(SystemExecutor::new()));
        registry.register(Arc::new(DbExecutor::new()));
        registry
    }

    pub fn register(&mut self, executor: Arc<dyn KindExecutor>) {
        self.executors
            .insert(executor.kind().to_string(), executor);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn KindExecutor>> {
        self.executors.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.executors.contains_key(kind)
    }

    /// 已注册的类型名列表
    pub fn kinds(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
