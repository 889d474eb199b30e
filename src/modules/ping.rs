use super::{ModuleHost, Probe};
use crate::error::ConvergeError;

/// 连通性探测：echo 往返成功即视为已满足，永不改变远端状态
pub async fn probe(host: &mut ModuleHost<'_>) -> Result<Probe, ConvergeError> {
    let result = host.run("echo pong").await?;
    if result.success() && result.stdout.trim() == "pong" {
        Ok(Probe::matched())
    } else {
        Err(ConvergeError::ModuleError(format!(
            "ping round-trip failed (exit {}): {}",
            result.exit_code,
            result.stderr.trim()
        )))
    }
}

pub async fn apply(_host: &mut ModuleHost<'_>) -> Result<(), ConvergeError> {
    // probe 要么命中要么报错，执行器不会走到这里
    Err(ConvergeError::ModuleError(
        "ping module has no apply step".to_string(),
    ))
}
