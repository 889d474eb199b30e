use crate::error::ConvergeError;
use crate::transport::{Connector, Transport};
use crate::types::{CommandResult, Host};
use async_trait::async_trait;
use ssh2::Session;
use std::io::prelude::*;
use std::net::TcpStream;
use std::path::Path;
use tracing::{debug, info};

/// 基于 ssh2 的远程执行通道，一台主机一个会话
pub struct SshTransport {
    session: Session,
    host_name: String,
}

impl SshTransport {
    pub fn connect(host: &Host) -> Result<Self, ConvergeError> {
        let tcp = TcpStream::connect(format!("{}:{}", host.address, host.port)).map_err(|e| {
            ConvergeError::TransportError(format!(
                "Failed to connect to {}:{}: {}",
                host.address, host.port, e
            ))
        })?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        // 认证：优先私钥，其次密码
        if let Some(ref private_key_path) = host.private_key_path {
            let passphrase = host.passphrase.as_deref();
            session
                .userauth_pubkey_file(&host.user, None, Path::new(private_key_path), passphrase)
                .map_err(|e| {
                    ConvergeError::AuthenticationError(format!(
                        "Public key auth failed for {}@{}: {}",
                        host.user, host.address, e
                    ))
                })?;
        } else if let Some(ref password) = host.password {
            session.userauth_password(&host.user, password).map_err(|e| {
                ConvergeError::AuthenticationError(format!(
                    "Password auth failed for {}@{}: {}",
                    host.user, host.address, e
                ))
            })?;
        } else {
            return Err(ConvergeError::AuthenticationError(format!(
                "No authentication method provided for host '{}'",
                host.name
            )));
        }

        if !session.authenticated() {
            return Err(ConvergeError::AuthenticationError(format!(
                "Authentication failed for {}@{}",
                host.user, host.address
            )));
        }

        info!("Successfully connected to {}", host.address);

        Ok(Self {
            session,
            host_name: host.name.clone(),
        })
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn execute(&mut self, command: &str) -> Result<CommandResult, ConvergeError> {
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        channel.read_to_string(&mut stdout)?;
        channel.stderr().read_to_string(&mut stderr)?;

        channel.wait_close()?;
        let exit_code = channel.exit_status()?;

        debug!(
            "[{}] command exited with code {}: {}",
            self.host_name, exit_code, command
        );

        Ok(CommandResult {
            exit_code,
            stdout,
            stderr,
        })
    }

    async fn upload(
        &mut self,
        content: &[u8],
        remote_path: &str,
        mode: i32,
    ) -> Result<u64, ConvergeError> {
        let mut remote_file =
            self.session
                .scp_send(Path::new(remote_path), mode, content.len() as u64, None)?;

        remote_file.write_all(content).map_err(|e| {
            ConvergeError::FileOperationError(format!(
                "Failed to transfer to {}: {}",
                remote_path, e
            ))
        })?;

        remote_file.send_eof()?;
        remote_file.wait_eof()?;
        remote_file.close()?;
        remote_file.wait_close()?;

        debug!(
            "[{}] uploaded {} bytes to {}",
            self.host_name,
            content.len(),
            remote_path
        );

        Ok(content.len() as u64)
    }
}

/// 默认的 SSH 连接工厂
#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, host: &Host) -> Result<Box<dyn Transport>, ConvergeError> {
        let transport = SshTransport::connect(host)?;
        Ok(Box::new(transport))
    }
}
