use super::{ModuleHost, Probe};
use crate::error::ConvergeError;
use crate::types::Diff;
use crate::utils::shell_quote;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    #[default]
    Started,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceParams {
    /// systemd 单元名
    pub unit: String,
    #[serde(default)]
    pub state: ServiceState,
    /// 是否开机自启；None 表示不管
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

struct ServiceStatus {
    active: bool,
    enabled: bool,
}

async fn status(host: &mut ModuleHost<'_>, unit: &str) -> Result<ServiceStatus, ConvergeError> {
    let active = host
        .run(&format!("systemctl is-active {}", shell_quote(unit)))
        .await?;
    if active.exit_code == 127 {
        return Err(ConvergeError::ModuleError(
            "systemctl not available on target host".to_string(),
        ));
    }
    let enabled = host
        .run(&format!("systemctl is-enabled {}", shell_quote(unit)))
        .await?;

    Ok(ServiceStatus {
        active: active.stdout.trim() == "active",
        enabled: enabled.stdout.trim() == "enabled",
    })
}

fn describe(active: bool, enabled: Option<bool>) -> String {
    let mut parts = vec![if active { "started" } else { "stopped" }.to_string()];
    if let Some(enabled) = enabled {
        parts.push(if enabled { "enabled" } else { "disabled" }.to_string());
    }
    parts.join(", ")
}

pub async fn probe(
    host: &mut ModuleHost<'_>,
    params: &ServiceParams,
) -> Result<Probe, ConvergeError> {
    let current = status(host, &params.unit).await?;
    debug!(
        "service probe: unit={} active={} enabled={}",
        params.unit, current.active, current.enabled
    );

    let want_active = params.state == ServiceState::Started;
    let state_ok = current.active == want_active;
    let enabled_ok = match params.enabled {
        Some(want) => current.enabled == want,
        None => true,
    };

    if state_ok && enabled_ok {
        return Ok(Probe::matched());
    }

    let shown_enabled = params.enabled.map(|_| current.enabled);
    Ok(Probe::mismatch(
        Diff::new(
            describe(current.active, shown_enabled),
            describe(want_active, params.enabled),
        )
        .with_details(format!("unit {}", params.unit)),
    ))
}

pub async fn apply(host: &mut ModuleHost<'_>, params: &ServiceParams) -> Result<(), ConvergeError> {
    let current = status(host, &params.unit).await?;
    let want_active = params.state == ServiceState::Started;

    if current.active != want_active {
        let verb = if want_active { "start" } else { "stop" };
        let result = host
            .run(&format!("systemctl {} {}", verb, shell_quote(&params.unit)))
            .await?;
        if !result.success() {
            return Err(ConvergeError::ModuleError(format!(
                "systemctl {} {} failed: {}",
                verb,
                params.unit,
                result.stderr.trim()
            )));
        }
    }

    if let Some(want_enabled) = params.enabled {
        if current.enabled != want_enabled {
            let verb = if want_enabled { "enable" } else { "disable" };
            let result = host
                .run(&format!("systemctl {} {}", verb, shell_quote(&params.unit)))
                .await?;
            if !result.success() {
                return Err(ConvergeError::ModuleError(format!(
                    "systemctl {} {} failed: {}",
                    verb,
                    params.unit,
                    result.stderr.trim()
                )));
            }
        }
    }

    Ok(())
}
