use crate::error::ConvergeError;
use crate::types::Host;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

/// 清单文件中的主机条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    pub name: String,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

fn default_port() -> u16 {
    22
}

/// 组可以直接列主机，也可以嵌套子组（树形，不允许环）
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GroupDef {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub children: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Inventory {
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
    #[serde(default)]
    pub groups: HashMap<String, GroupDef>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从YAML文件加载清单
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConvergeError> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ConvergeError::InventoryError(format!("Failed to read inventory file: {}", e))
        })?;

        serde_yaml::from_str(&content)
            .map_err(|e| ConvergeError::InventoryError(format!("Failed to parse YAML: {}", e)))
    }

    /// 从JSON文件加载清单
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConvergeError> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ConvergeError::InventoryError(format!("Failed to read inventory file: {}", e))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| ConvergeError::InventoryError(format!("Failed to parse JSON: {}", e)))
    }

    pub fn add_host(&mut self, entry: HostEntry) {
        self.hosts.push(entry);
    }

    pub fn add_host_to_group(&mut self, host_name: &str, group_name: &str) {
        self.groups
            .entry(group_name.to_string())
            .or_default()
            .hosts
            .push(host_name.to_string());
    }

    pub fn add_child_group(&mut self, parent: &str, child: &str) {
        self.groups
            .entry(parent.to_string())
            .or_default()
            .children
            .push(child.to_string());
    }

    /// 解析为扁平主机集：按标识符去重、校验组引用与环、标注组谱系。
    /// 纯解析，无副作用。
    pub fn resolve(&self) -> Result<ResolvedInventory, ConvergeError> {
        let mut by_name: HashMap<String, HostEntry> = HashMap::new();
        for entry in &self.hosts {
            if entry.name.is_empty() {
                return Err(ConvergeError::InventoryError(
                    "host entry with empty name".to_string(),
                ));
            }
            if entry.address.is_empty() {
                return Err(ConvergeError::InventoryError(format!(
                    "host '{}' is missing required field 'address'",
                    entry.name
                )));
            }
            if entry.user.is_empty() {
                return Err(ConvergeError::InventoryError(format!(
                    "host '{}' is missing required field 'user'",
                    entry.name
                )));
            }
            match by_name.get(&entry.name) {
                None => {
                    by_name.insert(entry.name.clone(), entry.clone());
                }
                Some(existing) => {
                    // 同名同地址视为重复声明，静默去重；地址冲突则无法仲裁
                    if existing.address != entry.address || existing.port != entry.port {
                        return Err(ConvergeError::InventoryError(format!(
                            "duplicate host '{}' with conflicting addresses ({}:{} vs {}:{})",
                            entry.name, existing.address, existing.port, entry.address, entry.port
                        )));
                    }
                }
            }
        }

        for (group_name, def) in &self.groups {
            for host in &def.hosts {
                if !by_name.contains_key(host) {
                    return Err(ConvergeError::InventoryError(format!(
                        "group '{}' references undefined host '{}'",
                        group_name, host
                    )));
                }
            }
            for child in &def.children {
                if !self.groups.contains_key(child) {
                    return Err(ConvergeError::InventoryError(format!(
                        "group '{}' references undefined child group '{}'",
                        group_name, child
                    )));
                }
            }
        }

        self.check_group_cycles()?;

        // 每台主机的组谱系：直接成员关系加上所有能通过children到达它的祖先组
        let mut membership: HashMap<String, BTreeSet<String>> = HashMap::new();
        for group_name in self.groups.keys() {
            for host in self.hosts_of_group(group_name) {
                membership.entry(host).or_default().insert(group_name.clone());
            }
        }

        let mut hosts: Vec<Host> = by_name
            .into_values()
            .map(|entry| {
                let groups = membership
                    .get(&entry.name)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default();
                Host {
                    name: entry.name,
                    address: entry.address,
                    port: entry.port,
                    user: entry.user,
                    private_key_path: entry.private_key_path,
                    passphrase: entry.passphrase,
                    password: entry.password,
                    groups,
                    vars: entry.vars,
                }
            })
            .collect();
        hosts.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(ResolvedInventory { hosts })
    }

    /// 组内全部主机（递归展开子组），调用前提是引用已校验
    fn hosts_of_group(&self, group: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![group.to_string()];
        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(def) = self.groups.get(&name) {
                out.extend(def.hosts.iter().cloned());
                stack.extend(def.children.iter().cloned());
            }
        }
        out
    }

    fn check_group_cycles(&self) -> Result<(), ConvergeError> {
        // 0 = 未访问, 1 = 在当前DFS路径上, 2 = 已完成
        let mut state: HashMap<&str, u8> = HashMap::new();

        fn visit<'a>(
            name: &'a str,
            groups: &'a HashMap<String, GroupDef>,
            state: &mut HashMap<&'a str, u8>,
        ) -> Result<(), ConvergeError> {
            match state.get(name) {
                Some(1) => {
                    return Err(ConvergeError::InventoryError(format!(
                        "cyclic group nesting detected at group '{}'",
                        name
                    )))
                }
                Some(2) => return Ok(()),
                _ => {}
            }
            state.insert(name, 1);
            if let Some(def) = groups.get(name) {
                for child in &def.children {
                    visit(child, groups, state)?;
                }
            }
            state.insert(name, 2);
            Ok(())
        }

        for name in self.groups.keys() {
            visit(name, &self.groups, &mut state)?;
        }
        Ok(())
    }
}

/// 解析后的只读主机集
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedInventory {
    pub hosts: Vec<Host>,
}

impl ResolvedInventory {
    /// 按play的目标模式选主机："all"/"*" 命中全部，否则先按组名再按主机名匹配
    pub fn select(&self, pattern: &str) -> Vec<Host> {
        if pattern == "all" || pattern == "*" {
            return self.hosts.clone();
        }
        let by_group: Vec<Host> = self
            .hosts
            .iter()
            .filter(|h| h.groups.iter().any(|g| g == pattern))
            .cloned()
            .collect();
        if !by_group.is_empty() {
            return by_group;
        }
        self.hosts
            .iter()
            .filter(|h| h.name == pattern)
            .cloned()
            .collect()
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }
}

/// `--limit` 通配模式（`*` 任意段），整体锚定匹配主机名
pub fn matches_limit(name: &str, pattern: &str) -> Result<bool, ConvergeError> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    let re = Regex::new(&format!("^{}$", escaped))
        .map_err(|e| ConvergeError::InventoryError(format!("invalid limit pattern: {}", e)))?;
    Ok(re.is_match(name))
}
