use crate::error::ConvergeError;
use crate::transport::Transport;
use crate::types::{Facts, Host};
use std::collections::HashMap;
use tracing::info;

/// 在运行开始时收集主机事实。清单里的主机变量先入表，
/// 探测到的同名事实覆盖变量值；之后整张表只读。
pub async fn gather(chan: &mut dyn Transport, host: &Host) -> Result<Facts, ConvergeError> {
    let mut facts: Facts = HashMap::new();
    for (key, value) in &host.vars {
        facts.insert(key.clone(), value.clone());
    }

    let hostname = chan.execute("uname -n").await?.stdout.trim().to_string();
    let os = chan.execute("uname -s").await?.stdout.trim().to_string();
    let kernel = chan.execute("uname -r").await?.stdout.trim().to_string();
    let architecture = chan.execute("uname -m").await?.stdout.trim().to_string();

    facts.insert("hostname".to_string(), hostname.clone());
    facts.insert("os".to_string(), os.clone());
    facts.insert("kernel".to_string(), kernel);
    facts.insert("architecture".to_string(), architecture);

    // 发行版信息：os-release 缺失时退回 uname 的结果
    let release = chan.execute("cat /etc/os-release 2>/dev/null").await?;
    if release.exit_code == 0 {
        let parsed = parse_os_release(&release.stdout);
        if let Some(id) = parsed.get("ID") {
            facts.insert("distribution".to_string(), id.clone());
        }
        facts.insert(
            "os_family".to_string(),
            os_family(parsed.get("ID"), parsed.get("ID_LIKE")).unwrap_or(os),
        );
    } else {
        facts.insert("os_family".to_string(), os);
    }

    info!("Facts gathered for {}", host.name);

    Ok(facts)
}

/// 解析 /etc/os-release 的 KEY=value 行，去掉引号
fn parse_os_release(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').to_string();
            out.insert(key.trim().to_string(), value);
        }
    }
    out
}

fn os_family(id: Option<&String>, id_like: Option<&String>) -> Option<String> {
    let mut tokens: Vec<String> = Vec::new();
    if let Some(id) = id {
        tokens.push(id.to_lowercase());
    }
    if let Some(like) = id_like {
        tokens.extend(like.to_lowercase().split_whitespace().map(String::from));
    }

    for token in &tokens {
        match token.as_str() {
            "debian" | "ubuntu" => return Some("Debian".to_string()),
            "rhel" | "fedora" | "centos" => return Some("RedHat".to_string()),
            "suse" | "opensuse" => return Some("Suse".to_string()),
            "alpine" => return Some("Alpine".to_string()),
            "arch" => return Some("Archlinux".to_string()),
            _ => {}
        }
    }
    None
}
