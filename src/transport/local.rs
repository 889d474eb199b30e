use crate::error::ConvergeError;
use crate::transport::{Connector, Transport};
use crate::types::{CommandResult, Host};
use async_trait::async_trait;
use std::process::Command;
use tracing::debug;

/// 在控制机本地执行命令的通道，用于开发自测和单机收敛
pub struct LocalTransport;

#[async_trait]
impl Transport for LocalTransport {
    async fn execute(&mut self, command: &str) -> Result<CommandResult, ConvergeError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| {
                ConvergeError::TransportError(format!("Failed to spawn local command: {}", e))
            })?;

        let result = CommandResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        debug!("[local] command exited with code {}: {}", result.exit_code, command);

        Ok(result)
    }

    async fn upload(
        &mut self,
        content: &[u8],
        remote_path: &str,
        mode: i32,
    ) -> Result<u64, ConvergeError> {
        std::fs::write(remote_path, content).map_err(|e| {
            ConvergeError::FileOperationError(format!("Failed to write {}: {}", remote_path, e))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(remote_path, std::fs::Permissions::from_mode(mode as u32))
                .map_err(|e| {
                    ConvergeError::FileOperationError(format!(
                        "Failed to set mode on {}: {}",
                        remote_path, e
                    ))
                })?;
        }

        Ok(content.len() as u64)
    }
}

/// 忽略主机地址，总是返回本地通道
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalConnector;

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, _host: &Host) -> Result<Box<dyn Transport>, ConvergeError> {
        Ok(Box::new(LocalTransport))
    }
}
