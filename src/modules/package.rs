use super::{apt, ModuleHost, PackageState, Probe};
use crate::error::ConvergeError;
use crate::types::Diff;
use crate::utils::shell_quote;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 通用包模块：探测目标主机的包管理器并委派。
/// 需要发行版特有选项（如 update_cache）时直接用 apt 模块。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageParams {
    pub package: String,
    #[serde(default)]
    pub state: PackageState,
}

enum PkgManager {
    Apt,
    Dnf,
}

async fn detect(host: &mut ModuleHost<'_>) -> Result<PkgManager, ConvergeError> {
    if host.run("command -v apt-get").await?.success() {
        return Ok(PkgManager::Apt);
    }
    if host.run("command -v dnf").await?.success() {
        return Ok(PkgManager::Dnf);
    }
    Err(ConvergeError::ModuleError(
        "no supported package manager found (apt-get, dnf)".to_string(),
    ))
}

async fn rpm_installed(host: &mut ModuleHost<'_>, package: &str) -> Result<bool, ConvergeError> {
    let result = host
        .run(&format!("rpm -q {} >/dev/null 2>&1", shell_quote(package)))
        .await?;
    Ok(result.success())
}

pub async fn probe(
    host: &mut ModuleHost<'_>,
    params: &PackageParams,
) -> Result<Probe, ConvergeError> {
    let installed = match detect(host).await? {
        PkgManager::Apt => apt::installed(host, &params.package).await?,
        PkgManager::Dnf => rpm_installed(host, &params.package).await?,
    };
    debug!(
        "package probe: package={} installed={}",
        params.package, installed
    );

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

pub async fn apply(host: &mut ModuleHost<'_>, params: &PackageParams) -> Result<(), ConvergeError> {
    match detect(host).await? {
        PkgManager::Apt => {
            let delegated = apt::AptParams {
                package: params.package.clone(),
                state: params.state,
                update_cache: false,
            };
            apt::apply(host, &delegated).await
        }
        PkgManager::Dnf => {
            let action = match params.state {
                PackageState::Present => "install",
                PackageState::Absent => "remove",
            };
            let cmd = format!("dnf {} -y -q {}", action, shell_quote(&params.package));
            let result = host.run(&cmd).await?;
            if !result.success() {
                return Err(ConvergeError::ModuleError(format!(
                    "dnf {} {} failed: {}",
                    action,
                    params.package,
                    result.stderr.trim()
                )));
            }
            Ok(())
        }
    }
}
