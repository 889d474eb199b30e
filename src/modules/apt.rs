use super::{ModuleHost, PackageState, Probe};
use crate::error::ConvergeError;
use crate::types::Diff;
use crate::utils::shell_quote;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AptParams {
    /// 包名
    pub package: String,
    #[serde(default)]
    pub state: PackageState,
    /// 安装前先 apt-get update
    #[serde(default)]
    pub update_cache: bool,
}

/// dpkg 数据库里的安装状态，探测只读
pub(crate) async fn installed(
    host: &mut ModuleHost<'_>,
    package: &str,
) -> Result<bool, ConvergeError> {
    let cmd = format!(
        "dpkg-query -W -f='${{Status}}' {} 2>/dev/null",
        shell_quote(package)
    );
    let result = host.run(&cmd).await?;
    if result.exit_code == 127 {
        return Err(ConvergeError::ModuleError(
            "dpkg-query not available on target host".to_string(),
        ));
    }
    // 未安装的包 dpkg-query 返回非零
    Ok(result.exit_code == 0 && result.stdout.contains("install ok installed"))
}

pub async fn probe(host: &mut ModuleHost<'_>, params: &AptParams) -> Result<Probe, ConvergeError> {
    let installed = installed(host, &params.package).await?;
    debug!("apt probe: package={} installed={}", params.package, installed);

    match (params.state, installed) {
        (PackageState::Present, true) | (PackageState::Absent, false) => Ok(Probe::matched()),
        (PackageState::Present, false) => Ok(Probe::mismatch(Diff::new(
            "absent",
            format!("present ({})", params.package),
        ))),
        (PackageState::Absent, true) => Ok(Probe::mismatch(Diff::new(
            format!("present ({})", params.package),
            "absent",
        ))),
    }
}

pub async fn apply(host: &mut ModuleHost<'_>, params: &AptParams) -> Result<(), ConvergeError> {
    if params.update_cache {
        let result = host
            .run("DEBIAN_FRONTEND=noninteractive apt-get update -q -y")
            .await?;
        if !result.success() {
            return Err(ConvergeError::ModuleError(format!(
                "apt-get update failed: {}",
                result.stderr.trim()
            )));
        }
    }

    let action = match params.state {
        PackageState::Present => "install",
        PackageState::Absent => "remove",
    };
    let cmd = format!(
        "DEBIAN_FRONTEND=noninteractive apt-get {} -q -y {}",
        action,
        shell_quote(&params.package)
    );
    let result = host.run(&cmd).await?;
    if !result.success() {
        return Err(ConvergeError::ModuleError(format!(
            "apt-get {} {} failed: {}",
            action,
            params.package,
            result.stderr.trim()
        )));
    }
    Ok(())
}
