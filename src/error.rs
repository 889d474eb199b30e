use thiserror::Error;
use serde::Serialize;

#[derive(Error, Debug, Serialize)]
pub enum ConvergeError {
    #[error("Inventory error: {0}")]
    InventoryError(String),

    #[error("Plan error: {0}")]
    PlanError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Module error: {0}")]
    ModuleError(String),

    #[error("File operation failed: {0}")]
    FileOperationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("SSH error: {0}")]
    Ssh2Error(String),
}

impl ConvergeError {
    /// 瞬时的通道级故障（连接被拒、握手超时等）可以安全重试；
    /// 模块报告的失败是确定性的，不重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConvergeError::TransportError(_) | ConvergeError::Ssh2Error(_)
        )
    }
}

impl From<std::io::Error> for ConvergeError {
    fn from(error: std::io::Error) -> Self {
        ConvergeError::IoError(error.to_string())
    }
}

impl From<ssh2::Error> for ConvergeError {
    fn from(error: ssh2::Error) -> Self {
        ConvergeError::Ssh2Error(error.to_string())
    }
}
