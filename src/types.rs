use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 运行开始时收集的主机事实（os_family 等），运行期间只读
pub type Facts = HashMap<String, String>;

/// 清单解析完成后的主机，单次运行内不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub user: String,
    pub private_key_path: Option<String>,
    pub passphrase: Option<String>,
    pub password: Option<String>,
    /// 解析后的组谱系（含嵌套父组），排序保证输出确定
    pub groups: Vec<String>,
    pub vars: HashMap<String, String>,
}

impl Default for Host {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: String::new(),
            port: 22,
            user: String::new(),
            private_key_path: None,
            passphrase: None,
            password: None,
            groups: Vec::new(),
            vars: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 单次 (主机, 任务) 的三态结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 守卫条件不满足，未接触远端
    Skipped,
    /// 同一主机上前面的任务失败，本任务未执行
    SkippedDueToFailure,
    /// 探测命中，远端已处于期望状态
    Unchanged,
    /// 已施加变更并经复测确认
    Changed,
    Failed,
}

impl TaskStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Skipped => write!(f, "skipped"),
            TaskStatus::SkippedDueToFailure => write!(f, "skipped (after failure)"),
            TaskStatus::Unchanged => write!(f, "unchanged"),
            TaskStatus::Changed => write!(f, "changed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// 探测到的当前状态与期望状态的差异描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diff {
    pub before: String,
    pub after: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Diff {
    pub fn new(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task: String,
    pub module: String,
    pub status: TaskStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Diff>,
    pub timestamp: DateTime<Utc>,
}

impl TaskOutcome {
    pub fn new(
        task: impl Into<String>,
        module: impl Into<String>,
        status: TaskStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task: task.into(),
            module: module.into(),
            status,
            message: message.into(),
            diff: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_diff(mut self, diff: Option<Diff>) -> Self {
        self.diff = diff;
        self
    }
}
