pub mod apt;
pub mod copy;
pub mod package;
pub mod ping;
pub mod service;

use crate::error::ConvergeError;
use crate::transport::Transport;
use crate::types::{CommandResult, Diff};
use crate::utils::shell_quote;
use serde::{Deserialize, Serialize};

/// 探测结论：远端是否已处于期望状态，以及差异描述
#[derive(Debug, Clone)]
pub struct Probe {
    pub matches: bool,
    pub diff: Option<Diff>,
}

impl Probe {
    pub fn matched() -> Self {
        Self {
            matches: true,
            diff: None,
        }
    }

    pub fn mismatch(diff: Diff) -> Self {
        Self {
            matches: false,
            diff: Some(diff),
        }
    }
}

/// 包管理语境下的期望状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    #[default]
    Present,
    Absent,
}

/// 模块眼中的执行目标：一条通道加上特权升级标记。
/// 命令统一经 run() 下发，需要时包一层 sudo -n。
pub struct ModuleHost<'a> {
    chan: &'a mut dyn Transport,
    escalate: bool,
}

impl<'a> ModuleHost<'a> {
    pub fn new(chan: &'a mut dyn Transport, escalate: bool) -> Self {
        Self { chan, escalate }
    }

    pub async fn run(&mut self, command: &str) -> Result<CommandResult, ConvergeError> {
        if self.escalate {
            let wrapped = format!("sudo -n sh -c {}", shell_quote(command));
            self.chan.execute(&wrapped).await
        } else {
            self.chan.execute(command).await
        }
    }

    /// 上传不经过 sudo；需要特权落位的文件先传到中转路径再 mv
    pub async fn put(
        &mut self,
        content: &[u8],
        remote_path: &str,
        mode: i32,
    ) -> Result<u64, ConvergeError> {
        self.chan.upload(content, remote_path, mode).await
    }
}

/// 模块规格：按标签分发到各模块的 probe/apply 实现。
/// 封闭枚举而非开放注册表，新增模块就是新增一个变体。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "module", rename_all = "snake_case")]
pub enum ModuleSpec {
    Package(package::PackageParams),
    Apt(apt::AptParams),
    Service(service::ServiceParams),
    Copy(copy::CopyParams),
    Ping,
}

impl ModuleSpec {
    pub fn name(&self) -> &'static str {
        match self {
            ModuleSpec::Package(_) => "package",
            ModuleSpec::Apt(_) => "apt",
            ModuleSpec::Service(_) => "service",
            ModuleSpec::Copy(_) => "copy",
            ModuleSpec::Ping => "ping",
        }
    }

    /// 只读探测：远端当前状态是否已满足期望。不得改变远端状态。
    pub async fn probe(&self, host: &mut ModuleHost<'_>) -> Result<Probe, ConvergeError> {
        match self {
            ModuleSpec::Package(params) => package::probe(host, params).await,
            ModuleSpec::Apt(params) => apt::probe(host, params).await,
            ModuleSpec::Service(params) => service::probe(host, params).await,
            ModuleSpec::Copy(params) => copy::probe(host, params).await,
            ModuleSpec::Ping => ping::probe(host).await,
        }
    }

    /// 把远端推向期望状态。调用方负责 probe 前置与复测分类。
    pub async fn apply(&self, host: &mut ModuleHost<'_>) -> Result<(), ConvergeError> {
        match self {
            ModuleSpec::Package(params) => package::apply(host, params).await,
            ModuleSpec::Apt(params) => apt::apply(host, params).await,
            ModuleSpec::Service(params) => service::apply(host, params).await,
            ModuleSpec::Copy(params) => copy::apply(host, params).await,
            ModuleSpec::Ping => ping::apply(host).await,
        }
    }
}
