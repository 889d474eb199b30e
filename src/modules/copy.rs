use super::{ModuleHost, Probe};
use crate::error::ConvergeError;
use crate::types::Diff;
use crate::utils::{remote_staging_path, shell_quote};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyParams {
    /// 控制机上的源文件
    pub src: String,
    /// 远端目标路径
    pub dest: String,
    /// 文件权限，例如 "644", "755"
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// 幂等性比较用的hash算法: sha256 或 md5
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,
}

fn default_mode() -> String {
    "644".to_string()
}

fn default_hash_algorithm() -> String {
    "sha256".to_string()
}

fn local_hash(params: &CopyParams, content: &[u8]) -> Result<String, ConvergeError> {
    match params.hash_algorithm.as_str() {
        "sha256" => {
            let mut hasher = Sha256::new();
            hasher.update(content);
            Ok(format!("{:x}", hasher.finalize()))
        }
        "md5" => {
            let mut hasher = Md5::new();
            hasher.update(content);
            Ok(format!("{:x}", hasher.finalize()))
        }
        other => Err(ConvergeError::ModuleError(format!(
            "unsupported hash algorithm '{}' (expected sha256 or md5)",
            other
        ))),
    }
}

fn read_source(params: &CopyParams) -> Result<Vec<u8>, ConvergeError> {
    std::fs::read(&params.src).map_err(|e| {
        ConvergeError::FileOperationError(format!(
            "Failed to read local source {}: {}",
            params.src, e
        ))
    })
}

/// 远端文件的内容hash；文件不存在返回 None
async fn remote_hash(
    host: &mut ModuleHost<'_>,
    params: &CopyParams,
) -> Result<Option<String>, ConvergeError> {
    let tool = match params.hash_algorithm.as_str() {
        "sha256" => "sha256sum",
        "md5" => "md5sum",
        other => {
            return Err(ConvergeError::ModuleError(format!(
                "unsupported hash algorithm '{}' (expected sha256 or md5)",
                other
            )))
        }
    };
    let result = host
        .run(&format!("{} {} 2>/dev/null", tool, shell_quote(&params.dest)))
        .await?;
    if !result.success() {
        return Ok(None);
    }
    Ok(result
        .stdout
        .split_whitespace()
        .next()
        .map(|s| s.to_string()))
}

pub async fn probe(host: &mut ModuleHost<'_>, params: &CopyParams) -> Result<Probe, ConvergeError> {
    let content = read_source(params)?;
    let wanted = local_hash(params, &content)?;
    let current = remote_hash(host, params).await?;
    debug!(
        "copy probe: dest={} wanted={} current={:?}",
        params.dest, wanted, current
    );

    match current {
        Some(ref hash) if *hash == wanted => Ok(Probe::matched()),
        Some(hash) => Ok(Probe::mismatch(
            Diff::new(hash, wanted).with_details(format!("{} -> {}", params.src, params.dest)),
        )),
        None => Ok(Probe::mismatch(
            Diff::new("absent", wanted).with_details(format!("{} -> {}", params.src, params.dest)),
        )),
    }
}

pub async fn apply(host: &mut ModuleHost<'_>, params: &CopyParams) -> Result<(), ConvergeError> {
    let content = read_source(params)?;

    // 先传到 /tmp 中转路径，再由可带特权的 mv 落位，避免半写状态
    let staging = remote_staging_path();
    host.put(&content, &staging, 0o600).await?;

    let land = async {
        if let Some(parent) = Path::new(&params.dest).parent() {
            let parent = parent.to_string_lossy();
            if !parent.is_empty() && parent != "/" {
                let result = host
                    .run(&format!("mkdir -p {}", shell_quote(&parent)))
                    .await?;
                if !result.success() {
                    return Err(ConvergeError::ModuleError(format!(
                        "failed to create directory {}: {}",
                        parent,
                        result.stderr.trim()
                    )));
                }
            }
        }

        let result = host
            .run(&format!(
                "mv {} {}",
                shell_quote(&staging),
                shell_quote(&params.dest)
            ))
            .await?;
        if !result.success() {
            return Err(ConvergeError::ModuleError(format!(
                "failed to move file into place at {}: {}",
                params.dest,
                result.stderr.trim()
            )));
        }

        let result = host
            .run(&format!(
                "chmod {} {}",
                shell_quote(&params.mode),
                shell_quote(&params.dest)
            ))
            .await?;
        if !result.success() {
            return Err(ConvergeError::ModuleError(format!(
                "failed to set mode {} on {}: {}",
                params.mode,
                params.dest,
                result.stderr.trim()
            )));
        }

        if params.owner.is_some() || params.group.is_some() {
            let owner_spec = match (&params.owner, &params.group) {
                (Some(owner), Some(group)) => format!("{}:{}", owner, group),
                (Some(owner), None) => owner.clone(),
                (None, Some(group)) => format!(":{}", group),
                (None, None) => unreachable!(),
            };
            let result = host
                .run(&format!(
                    "chown {} {}",
                    shell_quote(&owner_spec),
                    shell_quote(&params.dest)
                ))
                .await?;
            if !result.success() {
                return Err(ConvergeError::ModuleError(format!(
                    "failed to set owner {} on {}: {}",
                    owner_spec,
                    params.dest,
                    result.stderr.trim()
                )));
            }
        }

        Ok(())
    }
    .await;

    if land.is_err() {
        // 中转文件尽力清理，失败不掩盖原始错误
        let _ = host.run(&format!("rm -f {}", shell_quote(&staging))).await;
    }

    land
}
