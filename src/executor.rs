use crate::config::{RetryPolicy, RunOptions};
use crate::error::ConvergeError;
use crate::facts;
use crate::inventory::{matches_limit, ResolvedInventory};
use crate::modules::{ModuleHost, ModuleSpec, Probe};
use crate::playbook::{Play, Playbook, Task};
use crate::report::{HostReport, PlayReport, RunReport};
use crate::transport::{Connector, SshConnector, Transport};
use crate::types::{Facts, Host, TaskOutcome, TaskStatus};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task;
use tracing::{info, warn};

/// Playbook 执行引擎。
/// 主机之间并发（信号量限流），单台主机内严格按声明顺序串行。
pub struct PlayRunner {
    inventory: ResolvedInventory,
    options: RunOptions,
    connector: Arc<dyn Connector>,
    limit: Option<String>,
}

impl PlayRunner {
    pub fn new(inventory: ResolvedInventory, options: RunOptions) -> Self {
        Self {
            inventory,
            options,
            connector: Arc::new(SshConnector),
            limit: None,
        }
    }

    /// 替换通道工厂（本地执行、测试桩）
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_limit(mut self, limit: Option<String>) -> Self {
        self.limit = limit;
        self
    }

    /// 按序执行全部play。清单错误和计划错误在任何模块执行之前返回；
    /// 主机级失败不会中断别的主机，最终聚合进报告。
    pub async fn run(&self, playbook: &Playbook) -> Result<RunReport, ConvergeError> {
        let mut report = RunReport::new(self.options.check);
        for play in &playbook.plays {
            let play_report = self.run_play(play).await?;
            report.plays.push(play_report);
        }
        Ok(report)
    }

    async fn run_play(&self, play: &Play) -> Result<PlayReport, ConvergeError> {
        let mut hosts = self.inventory.select(&play.hosts);
        if let Some(ref limit) = self.limit {
            let mut filtered = Vec::new();
            for host in hosts {
                if matches_limit(&host.name, limit)? {
                    filtered.push(host);
                }
            }
            hosts = filtered;
        }

        if hosts.is_empty() {
            warn!("Play '{}' matched no hosts (pattern '{}')", play.name, play.hosts);
            return Ok(PlayReport {
                play: play.name.clone(),
                hosts: Vec::new(),
            });
        }

        info!("PLAY [{}] targeting {} host(s)", play.name, hosts.len());

        // 阶段一：并发收集事实，不可达的主机记下原因后排除
        let mut reachable: Vec<(Host, Facts)> = Vec::new();
        let mut reports: Vec<HostReport> = Vec::new();
        for (host, result) in self.gather_facts(&hosts).await {
            match result {
                Ok(facts) => reachable.push((host, facts)),
                Err(e) => {
                    warn!("Host '{}' unreachable: {}", host.name, e);
                    reports.push(HostReport::unreachable(host.name, e.to_string()));
                }
            }
        }

        // 阶段二：守卫引用的事实键预检。计划错误对整个play致命，
        // 在任何模块执行之前中止
        validate_guards(play, &reachable)?;

        // 阶段三：每台主机一个worker
        let semaphore = Arc::new(Semaphore::new(self.options.forks));
        let mut handles = Vec::new();
        for (host, facts) in reachable {
            let semaphore = semaphore.clone();
            let connector = self.connector.clone();
            let options = self.options.clone();
            let play = play.clone();

            handles.push(task::spawn(async move {
                let _permit = semaphore.acquire().await.expect("Semaphore closed");
                run_host(connector, options, play, host, facts).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(host_report) => reports.push(host_report),
                Err(e) => warn!("Host worker panicked: {}", e),
            }
        }

        // 聚合顺序与调度顺序无关
        reports.sort_by(|a, b| a.host.cmp(&b.host));

        Ok(PlayReport {
            play: play.name.clone(),
            hosts: reports,
        })
    }

    async fn gather_facts(&self, hosts: &[Host]) -> Vec<(Host, Result<Facts, ConvergeError>)> {
        let semaphore = Arc::new(Semaphore::new(self.options.forks));
        let mut handles = Vec::new();
        for host in hosts {
            let host = host.clone();
            let connector = self.connector.clone();
            let policy = self.options.retry.clone();
            let semaphore = semaphore.clone();

            handles.push(task::spawn(async move {
                let _permit = semaphore.acquire().await.expect("Semaphore closed");
                let result = gather_once(connector.as_ref(), &host, &policy).await;
                (host, result)
            }));
        }

        let mut out = Vec::new();
        for handle in handles {
            if let Ok(pair) = handle.await {
                out.push(pair);
            }
        }
        out
    }
}

/// 连接并收集事实，瞬时通道错误按退避策略整体重试
async fn gather_once(
    connector: &dyn Connector,
    host: &Host,
    policy: &RetryPolicy,
) -> Result<Facts, ConvergeError> {
    let mut attempt = 0;
    loop {
        let result = async {
            let mut chan = connector.connect(host).await?;
            facts::gather(chan.as_mut(), host).await
        }
        .await;

        match result {
            Ok(facts) => return Ok(facts),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                warn!(
                    "Transient error gathering facts from '{}' (attempt {}): {}",
                    host.name,
                    attempt + 1,
                    e
                );
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn connect_with_retry(
    connector: &dyn Connector,
    host: &Host,
    policy: &RetryPolicy,
) -> Result<Box<dyn Transport>, ConvergeError> {
    let mut attempt = 0;
    loop {
        match connector.connect(host).await {
            Ok(chan) => return Ok(chan),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                warn!(
                    "Transient error connecting to '{}' (attempt {}): {}",
                    host.name,
                    attempt + 1,
                    e
                );
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// 探测是只读的，通道级瞬时错误可以安全重试；
/// 模块报告的失败原样返回，不重试
async fn probe_with_retry(
    host: &mut ModuleHost<'_>,
    module: &ModuleSpec,
    policy: &RetryPolicy,
) -> Result<Probe, ConvergeError> {
    let mut attempt = 0;
    loop {
        match module.probe(host).await {
            Ok(probe) => return Ok(probe),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                warn!("Transient error during probe (attempt {}): {}", attempt + 1, e);
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// 单台主机的完整任务序列：顺序执行，首个失败后续全部标记跳过
async fn run_host(
    connector: Arc<dyn Connector>,
    options: RunOptions,
    play: Play,
    host: Host,
    facts: Facts,
) -> HostReport {
    let mut chan = match connect_with_retry(connector.as_ref(), &host, &options.retry).await {
        Ok(chan) => chan,
        Err(e) => return HostReport::unreachable(host.name, e.to_string()),
    };

    let mut outcomes = Vec::new();
    let mut failed = false;

    for task_def in &play.tasks {
        if failed {
            outcomes.push(TaskOutcome::new(
                &task_def.name,
                task_def.module.name(),
                TaskStatus::SkippedDueToFailure,
                "an earlier task on this host failed",
            ));
            continue;
        }

        if let Some(ref guard) = task_def.when {
            match guard.eval(&facts) {
                Ok(true) => {}
                Ok(false) => {
                    info!("[{}] task '{}' skipped: guard not met", host.name, task_def.name);
                    outcomes.push(TaskOutcome::new(
                        &task_def.name,
                        task_def.module.name(),
                        TaskStatus::Skipped,
                        "guard condition not met",
                    ));
                    continue;
                }
                // 预检之后不应出现，出现即按失败收尾
                Err(e) => {
                    outcomes.push(TaskOutcome::new(
                        &task_def.name,
                        task_def.module.name(),
                        TaskStatus::Failed,
                        e.to_string(),
                    ));
                    failed = true;
                    continue;
                }
            }
        }

        let outcome = run_module(chan.as_mut(), task_def, &play, &options).await;
        info!(
            "[{}] task '{}' -> {}",
            host.name, task_def.name, outcome.status
        );
        if outcome.status.is_failure() {
            failed = true;
        }
        outcomes.push(outcome);
    }

    HostReport::completed(host.name, outcomes)
}

/// 幂等协议：probe -> (命中则unchanged) -> apply -> 复测。
/// check 模式止步于probe，报告“将会变更”。
async fn run_module(
    chan: &mut dyn Transport,
    task_def: &Task,
    play: &Play,
    options: &RunOptions,
) -> TaskOutcome {
    let module = &task_def.module;
    let escalate = task_def.effective_escalate(play);
    let mut host_session = ModuleHost::new(chan, escalate);

    let work = async {
        let probe = probe_with_retry(&mut host_session, module, &options.retry).await?;
        if probe.matches {
            return Ok::<(TaskStatus, String, Option<crate::types::Diff>), ConvergeError>((
                TaskStatus::Unchanged,
                "already in desired state".to_string(),
                None,
            ));
        }

        if options.check {
            return Ok((
                TaskStatus::Changed,
                "would apply change (check mode)".to_string(),
                probe.diff,
            ));
        }

        module.apply(&mut host_session).await?;

        // 复测确认期望状态确实达成
        let verify = module.probe(&mut host_session).await?;
        if verify.matches {
            Ok((TaskStatus::Changed, "state changed".to_string(), probe.diff))
        } else {
            Ok((
                TaskStatus::Failed,
                "desired state unreachable after apply".to_string(),
                verify.diff,
            ))
        }
    };

    match tokio::time::timeout(options.task_timeout(), work).await {
        Ok(Ok((status, message, diff))) => {
            TaskOutcome::new(&task_def.name, module.name(), status, message).with_diff(diff)
        }
        Ok(Err(e)) => TaskOutcome::new(&task_def.name, module.name(), TaskStatus::Failed, e.to_string()),
        Err(_) => TaskOutcome::new(
            &task_def.name,
            module.name(),
            TaskStatus::Failed,
            format!(
                "module invocation timed out after {}s",
                options.task_timeout_secs
            ),
        ),
    }
}

/// 守卫预检：任何可达主机缺少被引用的事实键，整个play按计划错误中止
fn validate_guards(play: &Play, hosts: &[(Host, Facts)]) -> Result<(), ConvergeError> {
    let mut keys = BTreeSet::new();
    for task_def in &play.tasks {
        if let Some(ref guard) = task_def.when {
            guard.fact_keys(&mut keys);
        }
    }

    for key in &keys {
        for (host, facts) in hosts {
            if !facts.contains_key(key) {
                return Err(ConvergeError::PlanError(format!(
                    "guard in play '{}' references undefined fact '{}' (host '{}')",
                    play.name, key, host.name
                )));
            }
        }
    }
    Ok(())
}
