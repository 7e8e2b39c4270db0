//! Simulated fleet description.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

const DEFAULT_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Deserialize)]
pub struct Fleet {
    /// Deadline after which unresponsive minions are reported as timed out.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Drop every connection this long after it opens.
    #[serde(default)]
    pub close_after_ms: Option<u64>,
    #[serde(default)]
    pub minions: Vec<MinionSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinionSpec {
    pub id: String,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default = "default_responsive")]
    pub responsive: bool,
    /// Canned command output. Defaults to an echo of the command.
    #[serde(default)]
    pub output: Option<String>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_responsive() -> bool {
    true
}

impl MinionSpec {
    pub fn new(id: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            id: id.into(),
            latency_ms,
            responsive: true,
            output: None,
        }
    }

    pub fn unresponsive(id: impl Into<String>) -> Self {
        Self {
            responsive: false,
            ..Self::new(id, 0)
        }
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn output_for(&self, command: &str) -> String {
        self.output
            .clone()
            .unwrap_or_else(|| format!("{}: {command}\n", self.id))
    }
}

impl Fleet {
    pub fn new(timeout_ms: u64, minions: Vec<MinionSpec>) -> Self {
        Self {
            timeout_ms,
            close_after_ms: None,
            minions,
        }
    }

    /// Small fleet used when no fleet file is given.
    pub fn demo() -> Self {
        Self::new(
            3_000,
            vec![
                MinionSpec::new("web1.example.com", 150),
                MinionSpec::new("web2.example.com", 400),
                MinionSpec::new("db1.example.com", 250),
                MinionSpec::unresponsive("legacy.example.com"),
            ],
        )
    }

    pub fn with_close_after(mut self, ms: u64) -> Self {
        self.close_after_ms = Some(ms);
        self
    }

    pub fn close_after(&self) -> Option<Duration> {
        self.close_after_ms.map(Duration::from_millis)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading fleet file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing fleet file {}", path.display()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Minions whose id matches the glob `target`, in fleet order.
    pub fn matching(&self, target: &str) -> Vec<&MinionSpec> {
        self.minions
            .iter()
            .filter(|m| glob_match(target.trim(), &m.id))
            .collect()
    }
}

/// Shell-style glob with `*` and `?`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}
