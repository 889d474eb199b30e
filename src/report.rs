use crate::error::ConvergeError;
use crate::types::{TaskOutcome, TaskStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

/// 单台主机的运行结果：按任务声明顺序的结果序列，
/// 或一条不可达记录（事实收集阶段就联系不上）
#[derive(Debug, Clone, Serialize)]
pub struct HostReport {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unreachable: Option<String>,
    pub outcomes: Vec<TaskOutcome>,
}

impl HostReport {
    pub fn completed(host: String, outcomes: Vec<TaskOutcome>) -> Self {
        Self {
            host,
            unreachable: None,
            outcomes,
        }
    }

    pub fn unreachable(host: String, message: String) -> Self {
        Self {
            host,
            unreachable: Some(message),
            outcomes: Vec::new(),
        }
    }

    pub fn has_failure(&self) -> bool {
        self.unreachable.is_some() || self.outcomes.iter().any(|o| o.status.is_failure())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayReport {
    pub play: String,
    pub hosts: Vec<HostReport>,
}

/// 每台主机跨play累计的状态计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HostRecap {
    pub unchanged: usize,
    pub changed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub unreachable: usize,
}

impl HostRecap {
    fn count(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Unchanged => self.unchanged += 1,
            TaskStatus::Changed => self.changed += 1,
            // 失败后的连带跳过计入 skipped
            TaskStatus::Skipped | TaskStatus::SkippedDueToFailure => self.skipped += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub check_mode: bool,
    pub plays: Vec<PlayReport>,
}

impl RunReport {
    pub fn new(check_mode: bool) -> Self {
        Self {
            check_mode,
            plays: Vec::new(),
        }
    }

    /// 主机名 -> 计数，BTreeMap 保证输出顺序确定
    pub fn recap(&self) -> BTreeMap<String, HostRecap> {
        let mut recap: BTreeMap<String, HostRecap> = BTreeMap::new();
        for play in &self.plays {
            for host in &play.hosts {
                let entry = recap.entry(host.host.clone()).or_default();
                if host.unreachable.is_some() {
                    entry.unreachable += 1;
                }
                for outcome in &host.outcomes {
                    entry.count(outcome.status);
                }
            }
        }
        recap
    }

    /// 任一主机有失败结果或不可达即整体失败
    pub fn succeeded(&self) -> bool {
        self.plays
            .iter()
            .all(|play| play.hosts.iter().all(|host| !host.has_failure()))
    }

    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            0
        } else {
            2
        }
    }

    pub fn to_json(&self) -> Result<String, ConvergeError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ConvergeError::IoError(format!("Failed to serialize report: {}", e)))
    }

    /// 文本报告。同一结果集永远渲染出同一份文本：
    /// 主机按名字排序，任务按声明顺序分组。
    pub fn render(&self) -> String {
        let mut out = String::new();

        for play in &self.plays {
            let banner = format!("PLAY [{}] ", play.play);
            writeln!(out, "\n{}{}", banner, stars(&banner)).unwrap();

            let mut hosts: Vec<&HostReport> = play.hosts.iter().collect();
            hosts.sort_by(|a, b| a.host.cmp(&b.host));

            for host in &hosts {
                if let Some(ref reason) = host.unreachable {
                    writeln!(out, "unreachable: [{}] {}", host.host, reason).unwrap();
                }
            }

            // 按任务声明顺序分组输出；所有可达主机的结果序列结构相同
            let task_count = hosts
                .iter()
                .map(|h| h.outcomes.len())
                .max()
                .unwrap_or(0);
            for index in 0..task_count {
                let task_name = hosts
                    .iter()
                    .find_map(|h| h.outcomes.get(index))
                    .map(|o| o.task.as_str())
                    .unwrap_or("?");
                let banner = format!("\nTASK [{}] ", task_name);
                writeln!(out, "{}{}", banner, stars(&banner)).unwrap();

                for host in &hosts {
                    if let Some(outcome) = host.outcomes.get(index) {
                        let label = match outcome.status {
                            TaskStatus::Unchanged => "ok",
                            TaskStatus::Changed => "changed",
                            TaskStatus::Skipped | TaskStatus::SkippedDueToFailure => "skipped",
                            TaskStatus::Failed => "failed",
                        };
                        writeln!(
                            out,
                            "{}: [{}] {}",
                            label, host.host, outcome.message
                        )
                        .unwrap();
                        if let Some(ref diff) = outcome.diff {
                            writeln!(out, "    --- before: {}", diff.before).unwrap();
                            writeln!(out, "    +++ after:  {}", diff.after).unwrap();
                        }
                    }
                }
            }
        }

        let banner = "\nPLAY RECAP ";
        writeln!(out, "{}{}", banner, stars(banner)).unwrap();
        for (host, recap) in self.recap() {
            writeln!(
                out,
                "{:<24} unchanged={} changed={} skipped={} failed={} unreachable={}",
                host, recap.unchanged, recap.changed, recap.skipped, recap.failed, recap.unreachable
            )
            .unwrap();
        }

        if self.check_mode {
            writeln!(out, "\n(check mode: no changes were applied)").unwrap();
        }

        out
    }
}

fn stars(prefix: &str) -> String {
    let width = 78usize.saturating_sub(prefix.trim_start_matches('\n').len());
    "*".repeat(width.max(4))
}
