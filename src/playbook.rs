use crate::error::ConvergeError;
use crate::guard::Guard;
use crate::modules::ModuleSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 一条期望状态声明：模块 + 参数 + 可选守卫
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    #[serde(flatten)]
    pub module: ModuleSpec,
    /// 守卫条件，不满足时产生 skipped 结果且不接触远端
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Guard>,
    /// 任务级特权覆盖；None 继承 play 的设置
    #[serde(default, rename = "become", skip_serializing_if = "Option::is_none")]
    pub escalate: Option<bool>,
}

impl Task {
    pub fn new(name: &str, module: ModuleSpec) -> Self {
        Self {
            name: name.to_string(),
            module,
            when: None,
            escalate: None,
        }
    }

    pub fn when(mut self, guard: Guard) -> Self {
        self.when = Some(guard);
        self
    }

    pub fn escalate(mut self, escalate: bool) -> Self {
        self.escalate = Some(escalate);
        self
    }

    /// 本任务最终是否提权
    pub fn effective_escalate(&self, play: &Play) -> bool {
        self.escalate.unwrap_or(play.escalate)
    }
}

/// 面向一个目标组的有序任务清单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Play {
    pub name: String,
    /// 目标选择模式：组名、主机名或 "all"
    pub hosts: String,
    #[serde(default, rename = "become")]
    pub escalate: bool,
    pub tasks: Vec<Task>,
}

impl Play {
    pub fn new(name: &str, hosts: &str) -> Self {
        Self {
            name: name.to_string(),
            hosts: hosts.to_string(),
            escalate: false,
            tasks: Vec::new(),
        }
    }

    pub fn with_escalate(mut self) -> Self {
        self.escalate = true;
        self
    }

    pub fn add_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }
}

/// 一个playbook文件就是按序执行的play列表
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Playbook {
    pub plays: Vec<Play>,
}

impl Playbook {
    pub fn new(plays: Vec<Play>) -> Self {
        Self { plays }
    }

    /// 从YAML文件加载playbook
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConvergeError> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ConvergeError::PlanError(format!("Failed to read playbook file: {}", e))
        })?;

        serde_yaml::from_str(&content)
            .map_err(|e| ConvergeError::PlanError(format!("Failed to parse playbook YAML: {}", e)))
    }

    pub fn save_to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConvergeError> {
        let yaml_content = serde_yaml::to_string(self).map_err(|e| {
            ConvergeError::PlanError(format!("Failed to serialize playbook: {}", e))
        })?;

        std::fs::write(path, yaml_content).map_err(|e| {
            ConvergeError::FileOperationError(format!("Failed to write playbook file: {}", e))
        })
    }
}
