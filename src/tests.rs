use crate::config::{RetryPolicy, RunOptions};
use crate::error::ConvergeError;
use crate::executor::PlayRunner;
use crate::guard::Guard;
use crate::inventory::{HostEntry, Inventory, ResolvedInventory};
use crate::modules::apt::AptParams;
use crate::modules::copy::CopyParams;
use crate::modules::service::{ServiceParams, ServiceState};
use crate::modules::{ModuleSpec, PackageState};
use crate::playbook::{Play, Playbook, Task};
use crate::report::RunReport;
use crate::transport::LocalConnector;
use crate::types::TaskStatus;
use std::collections::HashMap;
use std::sync::Arc;

use self::support::{FakeConnector, HostState};

/// 可编程的假主机与通道，供引擎测试脚本化远端行为
pub(crate) mod support {
    use crate::error::ConvergeError;
    use crate::transport::{Connector, Transport};
    use crate::types::{CommandResult, Host};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    /// 被收敛的假主机：维护包和服务状态，解释模块下发的命令
    #[derive(Debug, Default)]
    pub struct HostState {
        /// /etc/os-release 的 ID 字段
        pub os_id: String,
        pub packages: HashSet<String>,
        pub active_units: HashSet<String>,
        pub enabled_units: HashSet<String>,
        pub files: HashMap<String, Vec<u8>>,
        /// 到达本主机的全部命令，按序
        pub commands: Vec<String>,
        pub connects: usize,
        /// 接下来 N 次连接以瞬时错误拒绝
        pub fail_connects_remaining: usize,
        /// 让 apt-get install 以确定性错误失败
        pub fail_package_installs: bool,
        /// install 返回成功但状态不落地（期望状态不可达的场景）
        pub install_is_noop: bool,
    }

    impl HostState {
        pub fn debian() -> Self {
            Self {
                os_id: "debian".to_string(),
                ..Default::default()
            }
        }

        pub fn command_count(&self, needle: &str) -> usize {
            self.commands.iter().filter(|c| c.contains(needle)).count()
        }

        pub fn command_index(&self, needle: &str) -> Option<usize> {
            self.commands.iter().position(|c| c.contains(needle))
        }
    }

    fn ok(stdout: &str) -> CommandResult {
        CommandResult {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn fail(exit_code: i32, stderr: &str) -> CommandResult {
        CommandResult {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    /// 命令里最后一个被单引号包住的词：模块参数都经过 shell_quote
    fn last_quoted(cmd: &str) -> Option<String> {
        cmd.split('\'')
            .enumerate()
            .filter(|(i, _)| i % 2 == 1)
            .map(|(_, s)| s.to_string())
            .filter(|s| !s.starts_with("${"))
            .last()
    }

    fn interpret(state: &mut HostState, cmd: &str) -> CommandResult {
        if cmd.contains("uname -n") {
            return ok("fake-host");
        }
        if cmd.contains("uname -s") {
            return ok("Linux");
        }
        if cmd.contains("uname -r") {
            return ok("6.1.0");
        }
        if cmd.contains("uname -m") {
            return ok("x86_64");
        }
        if cmd.contains("/etc/os-release") {
            return ok(&format!("ID={}\n", state.os_id));
        }
        if cmd.contains("echo pong") {
            return ok("pong");
        }
        if cmd.contains("command -v apt-get") {
            return ok("/usr/bin/apt-get");
        }
        if cmd.contains("dpkg-query") {
            let package = last_quoted(cmd).unwrap_or_default();
            return if state.packages.contains(&package) {
                ok("install ok installed")
            } else {
                fail(1, "no packages found")
            };
        }
        if cmd.contains("apt-get update") {
            return ok("");
        }
        if cmd.contains("apt-get install") {
            if state.fail_package_installs {
                return fail(100, "E: Unable to locate package");
            }
            if !state.install_is_noop {
                let package = last_quoted(cmd).unwrap_or_default();
                state.packages.insert(package);
            }
            return ok("");
        }
        if cmd.contains("apt-get remove") {
            let package = last_quoted(cmd).unwrap_or_default();
            state.packages.remove(&package);
            return ok("");
        }
        if cmd.contains("systemctl is-active") {
            let unit = last_quoted(cmd).unwrap_or_default();
            return if state.active_units.contains(&unit) {
                ok("active")
            } else {
                CommandResult {
                    exit_code: 3,
                    stdout: "inactive".to_string(),
                    stderr: String::new(),
                }
            };
        }
        if cmd.contains("systemctl is-enabled") {
            let unit = last_quoted(cmd).unwrap_or_default();
            return if state.enabled_units.contains(&unit) {
                ok("enabled")
            } else {
                CommandResult {
                    exit_code: 1,
                    stdout: "disabled".to_string(),
                    stderr: String::new(),
                }
            };
        }
        if cmd.contains("systemctl start") {
            let unit = last_quoted(cmd).unwrap_or_default();
            state.active_units.insert(unit);
            return ok("");
        }
        if cmd.contains("systemctl stop") {
            let unit = last_quoted(cmd).unwrap_or_default();
            state.active_units.remove(&unit);
            return ok("");
        }
        if cmd.contains("systemctl enable") {
            let unit = last_quoted(cmd).unwrap_or_default();
            state.enabled_units.insert(unit);
            return ok("");
        }
        if cmd.contains("systemctl disable") {
            let unit = last_quoted(cmd).unwrap_or_default();
            state.enabled_units.remove(&unit);
            return ok("");
        }
        ok("")
    }

    pub struct FakeTransport {
        state: Arc<Mutex<HostState>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn execute(&mut self, command: &str) -> Result<CommandResult, ConvergeError> {
            let mut state = self.state.lock().unwrap();
            state.commands.push(command.to_string());
            Ok(interpret(&mut state, command))
        }

        async fn upload(
            &mut self,
            content: &[u8],
            remote_path: &str,
            _mode: i32,
        ) -> Result<u64, ConvergeError> {
            let mut state = self.state.lock().unwrap();
            state.files.insert(remote_path.to_string(), content.to_vec());
            Ok(content.len() as u64)
        }
    }

    #[derive(Default)]
    pub struct FakeConnector {
        states: HashMap<String, Arc<Mutex<HostState>>>,
    }

    impl FakeConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_host(&mut self, name: &str, state: HostState) -> Arc<Mutex<HostState>> {
            let state = Arc::new(Mutex::new(state));
            self.states.insert(name.to_string(), state.clone());
            state
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, host: &Host) -> Result<Box<dyn Transport>, ConvergeError> {
            let state = self.states.get(&host.name).ok_or_else(|| {
                ConvergeError::TransportError(format!("unknown host '{}'", host.name))
            })?;
            {
                let mut state = state.lock().unwrap();
                state.connects += 1;
                if state.fail_connects_remaining > 0 {
                    state.fail_connects_remaining -= 1;
                    return Err(ConvergeError::TransportError(
                        "connection refused".to_string(),
                    ));
                }
            }
            Ok(Box::new(FakeTransport {
                state: state.clone(),
            }))
        }
    }
}

fn inventory(names: &[&str]) -> ResolvedInventory {
    let mut inv = Inventory::new();
    for (i, name) in names.iter().enumerate() {
        inv.add_host(HostEntry {
            name: name.to_string(),
            address: format!("10.0.0.{}", i + 1),
            port: 22,
            user: "deploy".to_string(),
            private_key_path: None,
            passphrase: None,
            password: None,
            vars: HashMap::new(),
        });
        inv.add_host_to_group(name, "webservers");
    }
    inv.resolve().unwrap()
}

/// 退避间隔压到毫秒级，测试不必等真实退避
fn fast_options() -> RunOptions {
    RunOptions {
        forks: 4,
        check: false,
        task_timeout_secs: 30,
        retry: RetryPolicy {
            max_retries: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 1.0,
            jitter: 0.0,
        },
    }
}

fn nginx_playbook() -> Playbook {
    Playbook::new(vec![Play::new("provision", "webservers")
        .add_task(Task::new(
            "install-nginx",
            ModuleSpec::Apt(AptParams {
                package: "nginx".to_string(),
                state: PackageState::Present,
                update_cache: false,
            }),
        ))
        .add_task(Task::new(
            "start-service",
            ModuleSpec::Service(ServiceParams {
                unit: "nginx".to_string(),
                state: ServiceState::Started,
                enabled: None,
            }),
        ))])
}

fn statuses(report: &RunReport, host: &str) -> Vec<TaskStatus> {
    report.plays[0]
        .hosts
        .iter()
        .find(|h| h.host == host)
        .unwrap()
        .outcomes
        .iter()
        .map(|o| o.status)
        .collect()
}

#[tokio::test]
async fn test_fresh_hosts_converge_then_report_unchanged() {
    let mut connector = FakeConnector::new();
    let s1 = connector.add_host("server-1", HostState::debian());
    let s2 = connector.add_host("server-2", HostState::debian());
    let connector = Arc::new(connector);

    let inv = inventory(&["server-1", "server-2"]);
    let playbook = nginx_playbook();

    // 第一轮：全新主机，两个任务都应施加变更
    let runner =
        PlayRunner::new(inv.clone(), fast_options()).with_connector(connector.clone());
    let report = runner.run(&playbook).await.unwrap();

    for host in ["server-1", "server-2"] {
        assert_eq!(
            statuses(&report, host),
            vec![TaskStatus::Changed, TaskStatus::Changed]
        );
    }
    assert!(report.succeeded());
    assert!(s1.lock().unwrap().packages.contains("nginx"));
    assert!(s1.lock().unwrap().active_units.contains("nginx"));

    // 结果顺序等于声明顺序
    let names: Vec<String> = report.plays[0].hosts[0]
        .outcomes
        .iter()
        .map(|o| o.task.clone())
        .collect();
    assert_eq!(names, vec!["install-nginx", "start-service"]);

    // 幂等协议: probe -> apply -> 复测，并且 install 只执行一次
    {
        let state = s1.lock().unwrap();
        assert_eq!(state.command_count("apt-get install"), 1);
        let first_probe = state.command_index("dpkg-query").unwrap();
        let install = state.command_index("apt-get install").unwrap();
        assert!(first_probe < install);
        assert!(state.command_count("dpkg-query") >= 2);
    }

    // 第二轮：远端已满足期望，必须全部 unchanged 且不再施加变更
    let runner = PlayRunner::new(inv, fast_options()).with_connector(connector.clone());
    let report = runner.run(&playbook).await.unwrap();
    for host in ["server-1", "server-2"] {
        assert_eq!(
            statuses(&report, host),
            vec![TaskStatus::Unchanged, TaskStatus::Unchanged]
        );
    }
    assert_eq!(s1.lock().unwrap().command_count("apt-get install"), 1);
    assert_eq!(s2.lock().unwrap().command_count("systemctl start"), 1);
}

#[tokio::test]
async fn test_false_guard_skips_without_touching_remote() {
    let mut connector = FakeConnector::new();
    let state = connector.add_host("server-1", HostState::debian());
    let connector = Arc::new(connector);

    let playbook = Playbook::new(vec![Play::new("guarded", "webservers").add_task(
        Task::new(
            "install-nginx",
            ModuleSpec::Apt(AptParams {
                package: "nginx".to_string(),
                state: PackageState::Present,
                update_cache: false,
            }),
        )
        .when(Guard::eq("os_family", "RedHat")),
    )]);

    let runner =
        PlayRunner::new(inventory(&["server-1"]), fast_options()).with_connector(connector);
    let report = runner.run(&playbook).await.unwrap();

    assert_eq!(statuses(&report, "server-1"), vec![TaskStatus::Skipped]);
    assert!(report.succeeded());

    // 守卫为假的任务完全不接触远端
    let state = state.lock().unwrap();
    assert_eq!(state.command_count("dpkg-query"), 0);
    assert_eq!(state.command_count("apt-get"), 0);
}

#[tokio::test]
async fn test_fail_fast_is_isolated_per_host() {
    let mut connector = FakeConnector::new();
    let broken = HostState {
        fail_package_installs: true,
        ..HostState::debian()
    };
    let sa = connector.add_host("server-a", broken);
    let sb = connector.add_host("server-b", HostState::debian());
    let connector = Arc::new(connector);

    let runner = PlayRunner::new(inventory(&["server-a", "server-b"]), fast_options())
        .with_connector(connector);
    let report = runner.run(&nginx_playbook()).await.unwrap();

    // A 的第一个任务失败，其余任务不再执行
    assert_eq!(
        statuses(&report, "server-a"),
        vec![TaskStatus::Failed, TaskStatus::SkippedDueToFailure]
    );
    assert_eq!(sa.lock().unwrap().command_count("systemctl"), 0);

    // 确定性失败不重试
    assert_eq!(sa.lock().unwrap().command_count("apt-get install"), 1);

    // B 不受影响，完整跑完
    assert_eq!(
        statuses(&report, "server-b"),
        vec![TaskStatus::Changed, TaskStatus::Changed]
    );
    assert!(sb.lock().unwrap().active_units.contains("nginx"));

    assert!(!report.succeeded());
    assert_eq!(report.exit_code(), 2);
}

#[tokio::test]
async fn test_check_mode_reports_without_mutating() {
    let mut connector = FakeConnector::new();
    let state = connector.add_host("server-1", HostState::debian());
    let connector = Arc::new(connector);

    let mut options = fast_options();
    options.check = true;

    let inv = inventory(&["server-1"]);
    let runner = PlayRunner::new(inv.clone(), options.clone()).with_connector(connector.clone());
    let report = runner.run(&nginx_playbook()).await.unwrap();

    // 报告“将会变更”，但不施加任何东西
    assert_eq!(
        statuses(&report, "server-1"),
        vec![TaskStatus::Changed, TaskStatus::Changed]
    );
    {
        let state = state.lock().unwrap();
        assert_eq!(state.command_count("apt-get install"), 0);
        assert_eq!(state.command_count("systemctl start"), 0);
        assert!(state.packages.is_empty());
    }

    // check 模式可以反复安全运行
    let runner = PlayRunner::new(inv, options).with_connector(connector);
    let report = runner.run(&nginx_playbook()).await.unwrap();
    assert_eq!(
        statuses(&report, "server-1"),
        vec![TaskStatus::Changed, TaskStatus::Changed]
    );
    assert!(state.lock().unwrap().packages.is_empty());
}

#[tokio::test]
async fn test_transient_connect_errors_are_retried() {
    let mut connector = FakeConnector::new();
    let flaky = HostState {
        fail_connects_remaining: 2,
        ..HostState::debian()
    };
    let state = connector.add_host("server-1", flaky);
    let connector = Arc::new(connector);

    let runner =
        PlayRunner::new(inventory(&["server-1"]), fast_options()).with_connector(connector);
    let report = runner.run(&nginx_playbook()).await.unwrap();

    assert!(report.succeeded());
    // 两次被拒后重试成功
    assert!(state.lock().unwrap().connects >= 3);
}

#[tokio::test]
async fn test_exhausted_retries_mark_host_unreachable_only() {
    let mut connector = FakeConnector::new();
    let dead = HostState {
        fail_connects_remaining: 100,
        ..HostState::debian()
    };
    connector.add_host("server-a", dead);
    let sb = connector.add_host("server-b", HostState::debian());
    let connector = Arc::new(connector);

    let runner = PlayRunner::new(inventory(&["server-a", "server-b"]), fast_options())
        .with_connector(connector);
    let report = runner.run(&nginx_playbook()).await.unwrap();

    let host_a = report.plays[0]
        .hosts
        .iter()
        .find(|h| h.host == "server-a")
        .unwrap();
    assert!(host_a.unreachable.is_some());
    assert!(host_a.outcomes.is_empty());

    assert_eq!(
        statuses(&report, "server-b"),
        vec![TaskStatus::Changed, TaskStatus::Changed]
    );
    assert!(sb.lock().unwrap().packages.contains("nginx"));

    assert_eq!(report.exit_code(), 2);
}

#[tokio::test]
async fn test_guard_on_undefined_fact_aborts_play_before_execution() {
    let mut connector = FakeConnector::new();
    let state = connector.add_host("server-1", HostState::debian());
    let connector = Arc::new(connector);

    let playbook = Playbook::new(vec![Play::new("bad-plan", "webservers").add_task(
        Task::new(
            "install-nginx",
            ModuleSpec::Apt(AptParams {
                package: "nginx".to_string(),
                state: PackageState::Present,
                update_cache: false,
            }),
        )
        .when(Guard::eq("no_such_fact", "yes")),
    )]);

    let runner =
        PlayRunner::new(inventory(&["server-1"]), fast_options()).with_connector(connector);
    let err = runner.run(&playbook).await.unwrap_err();

    assert!(matches!(err, ConvergeError::PlanError(_)));
    assert!(err.to_string().contains("no_such_fact"));

    // 计划错误在任何模块执行之前中止
    let state = state.lock().unwrap();
    assert_eq!(state.command_count("dpkg-query"), 0);
    assert_eq!(state.command_count("apt-get"), 0);
}

#[tokio::test]
async fn test_unreachable_desired_state_is_failed_after_reprobe() {
    let mut connector = FakeConnector::new();
    let stubborn = HostState {
        install_is_noop: true,
        ..HostState::debian()
    };
    connector.add_host("server-1", stubborn);
    let connector = Arc::new(connector);

    let runner =
        PlayRunner::new(inventory(&["server-1"]), fast_options()).with_connector(connector);
    let report = runner.run(&nginx_playbook()).await.unwrap();

    assert_eq!(
        statuses(&report, "server-1"),
        vec![TaskStatus::Failed, TaskStatus::SkippedDueToFailure]
    );
    let failure = &report.plays[0].hosts[0].outcomes[0];
    assert!(failure.message.contains("desired state unreachable"));
}

#[tokio::test]
async fn test_copy_module_end_to_end_over_local_transport() {
    let dir = std::env::temp_dir().join(format!(
        "rs_converge_test_{}",
        crate::utils::generate_temp_suffix()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let src = dir.join("index.html");
    let dest = dir.join("www").join("index.html");
    std::fs::write(&src, b"<h1>converged</h1>\n").unwrap();

    let playbook = Playbook::new(vec![Play::new("deploy", "all").add_task(Task::new(
        "deploy-page",
        ModuleSpec::Copy(CopyParams {
            src: src.to_string_lossy().to_string(),
            dest: dest.to_string_lossy().to_string(),
            mode: "644".to_string(),
            owner: None,
            group: None,
            hash_algorithm: "sha256".to_string(),
        }),
    ))]);

    let inv = inventory(&["localhost"]);
    let connector = Arc::new(LocalConnector);

    let runner = PlayRunner::new(inv.clone(), fast_options()).with_connector(connector.clone());
    let report = runner.run(&playbook).await.unwrap();
    assert_eq!(statuses(&report, "localhost"), vec![TaskStatus::Changed]);
    assert_eq!(
        std::fs::read(&dest).unwrap(),
        b"<h1>converged</h1>\n".to_vec()
    );

    // 内容已一致，重跑必须是 unchanged
    let runner = PlayRunner::new(inv, fast_options()).with_connector(connector);
    let report = runner.run(&playbook).await.unwrap();
    assert_eq!(statuses(&report, "localhost"), vec![TaskStatus::Unchanged]);

    std::fs::remove_dir_all(&dir).ok();
}
