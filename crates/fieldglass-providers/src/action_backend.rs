use async_trait::async_trait;
use fieldglass_types::{ActionKind, ErrorRecord};
use serde_json::Value;

/// The outcome of executing an action through the input-action collaborator.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub success: bool,
    pub payload: Option<Value>,
}

/// The input-action collaborator: `execute(ActionRecord) -> {success, payload}`.
/// `ActionFailure` and `PolicyViolation` are the only error kinds this
/// contract may raise.
#[async_trait]
pub trait ActionBackend: Send + Sync {
    async fn execute(&self, action: &ActionKind) -> Result<ActionOutcome, ErrorRecord>;
}

/// Resolves `LaunchApp{name}` against a permitted set, supplied by the
/// caller. Absence from the allowlist is a `PolicyViolation`, not an
/// `ActionFailure` — the engine never attempts the launch.
pub trait AppAllowlist: Send + Sync {
    fn resolve(&self, name: &str) -> Option<String>;
}

/// A fixed, caller-supplied set of permitted application names.
pub struct StaticAllowlist {
    entries: std::collections::HashMap<String, String>,
}

impl StaticAllowlist {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn names(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let entries = names
            .into_iter()
            .map(|n| {
                let n = n.into();
                (n.clone(), n)
            })
            .collect();
        Self { entries }
    }
}

impl AppAllowlist for StaticAllowlist {
    fn resolve(&self, name: &str) -> Option<String> {
        self.entries.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_allowlist_resolves_known_name() {
        let allowlist = StaticAllowlist::names(["notes", "browser"]);
        assert_eq!(allowlist.resolve("notes"), Some("notes".to_string()));
        assert_eq!(allowlist.resolve("unknown"), None);
    }
}
