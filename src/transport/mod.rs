pub mod local;
pub mod ssh;

use crate::error::ConvergeError;
use crate::types::{CommandResult, Host};
use async_trait::async_trait;

pub use local::LocalConnector;
pub use ssh::{SshConnector, SshTransport};

/// 远程执行通道。核心只依赖 execute 和 upload 两个语义，
/// SSH 之外的实现（本地进程、测试桩）都走同一接口。
#[async_trait]
pub trait Transport: Send {
    /// 执行一条命令，返回 (stdout, stderr, exit code)
    async fn execute(&mut self, command: &str) -> Result<CommandResult, ConvergeError>;

    /// 把字节内容写到远端路径，返回传输字节数
    async fn upload(
        &mut self,
        content: &[u8],
        remote_path: &str,
        mode: i32,
    ) -> Result<u64, ConvergeError>;
}

/// 按 (地址, 凭据) 建立通道的工厂
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &Host) -> Result<Box<dyn Transport>, ConvergeError>;
}
