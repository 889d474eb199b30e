use crate::error::ConvergeError;
use crate::types::Facts;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 任务守卫条件：针对主机事实求值的封闭表达式树。
/// 只提供等值、集合成员和布尔组合，避免引入完整表达式语言。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    /// 事实与给定值精确相等
    Eq { fact: String, value: String },
    /// 事实落在候选值集合内
    In { fact: String, any_of: Vec<String> },
    All(Vec<Guard>),
    Any(Vec<Guard>),
    Not(Box<Guard>),
}

impl Guard {
    pub fn eq(fact: impl Into<String>, value: impl Into<String>) -> Self {
        Guard::Eq {
            fact: fact.into(),
            value: value.into(),
        }
    }

    /// 对主机事实求值；引用未定义的事实键按计划错误处理
    pub fn eval(&self, facts: &Facts) -> Result<bool, ConvergeError> {
        match self {
            Guard::Eq { fact, value } => {
                let actual = lookup(facts, fact)?;
                Ok(actual == value)
            }
            Guard::In { fact, any_of } => {
                let actual = lookup(facts, fact)?;
                Ok(any_of.iter().any(|v| v == actual))
            }
            Guard::All(inner) => {
                for guard in inner {
                    if !guard.eval(facts)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Guard::Any(inner) => {
                for guard in inner {
                    if guard.eval(facts)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Guard::Not(inner) => Ok(!inner.eval(facts)?),
        }
    }

    /// 收集表达式引用的全部事实键，供执行前校验
    pub fn fact_keys(&self, out: &mut BTreeSet<String>) {
        match self {
            Guard::Eq { fact, .. } | Guard::In { fact, .. } => {
                out.insert(fact.clone());
            }
            Guard::All(inner) | Guard::Any(inner) => {
                for guard in inner {
                    guard.fact_keys(out);
                }
            }
            Guard::Not(inner) => inner.fact_keys(out),
        }
    }
}

fn lookup<'a>(facts: &'a Facts, key: &str) -> Result<&'a String, ConvergeError> {
    facts
        .get(key)
        .ok_or_else(|| ConvergeError::PlanError(format!("guard references undefined fact '{}'", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn facts() -> Facts {
        let mut facts = HashMap::new();
        facts.insert("os_family".to_string(), "Debian".to_string());
        facts.insert("architecture".to_string(), "x86_64".to_string());
        facts
    }

    #[test]
    fn test_eq_is_exact_match() {
        let facts = facts();
        assert!(Guard::eq("os_family", "Debian").eval(&facts).unwrap());
        assert!(!Guard::eq("os_family", "RedHat").eval(&facts).unwrap());
        // 不做大小写折叠
        assert!(!Guard::eq("os_family", "debian").eval(&facts).unwrap());
    }

    #[test]
    fn test_membership() {
        let guard = Guard::In {
            fact: "os_family".to_string(),
            any_of: vec!["Debian".to_string(), "RedHat".to_string()],
        };
        assert!(guard.eval(&facts()).unwrap());
    }

    #[test]
    fn test_boolean_combinators() {
        let facts = facts();
        let both = Guard::All(vec![
            Guard::eq("os_family", "Debian"),
            Guard::eq("architecture", "x86_64"),
        ]);
        assert!(both.eval(&facts).unwrap());

        let either = Guard::Any(vec![
            Guard::eq("os_family", "RedHat"),
            Guard::eq("architecture", "x86_64"),
        ]);
        assert!(either.eval(&facts).unwrap());

        let negated = Guard::Not(Box::new(Guard::eq("os_family", "Debian")));
        assert!(!negated.eval(&facts).unwrap());
    }

    #[test]
    fn test_undefined_fact_is_a_plan_error() {
        let err = Guard::eq("kernel", "5.4").eval(&facts()).unwrap_err();
        assert!(matches!(err, ConvergeError::PlanError(_)));
        assert!(err.to_string().contains("undefined fact 'kernel'"));
    }

    #[test]
    fn test_fact_keys_are_collected_recursively() {
        let guard = Guard::All(vec![
            Guard::eq("os_family", "Debian"),
            Guard::Not(Box::new(Guard::eq("architecture", "aarch64"))),
        ]);
        let mut keys = BTreeSet::new();
        guard.fact_keys(&mut keys);
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec!["architecture".to_string(), "os_family".to_string()]
        );
    }

    #[test]
    fn test_yaml_representation() {
        let yaml = "eq:\n  fact: os_family\n  value: Debian\n";
        let guard: Guard = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(guard, Guard::eq("os_family", "Debian"));

        let yaml = r#"
all:
  - eq: { fact: os_family, value: Debian }
  - in: { fact: architecture, any_of: [x86_64, aarch64] }
"#;
        let guard: Guard = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(guard, Guard::All(ref inner) if inner.len() == 2));
    }
}
