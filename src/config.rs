use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 一次运行的执行参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// 同时处理的主机数上限
    #[serde(default = "default_forks")]
    pub forks: usize,

    /// check 模式：只探测，永不施加变更
    #[serde(default)]
    pub check: bool,

    /// 单次模块调用的超时（秒），超时按 failed 处理
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_forks() -> usize {
    10
}

fn default_task_timeout() -> u64 {
    300
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            forks: default_forks(),
            check: false,
            task_timeout_secs: default_task_timeout(),
            retry: RetryPolicy::default(),
        }
    }
}

impl RunOptions {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// 瞬时通道错误的重试策略（指数退避）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大重试次数，0 表示不重试
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// 退避上限，防止指数增长失控
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// 抖动系数 (0.0 - 1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.25
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// 第 attempt 次重试前应等待的时长（attempt 从 0 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay_ms as f64);
        let jittered = if self.jitter > 0.0 {
            let spread = capped * self.jitter;
            capped - spread + rand::random::<f64>() * spread * 2.0
        } else {
            capped
        };
        Duration::from_millis(jittered.max(0.0).min(self.max_delay_ms as f64) as u64)
    }
}
