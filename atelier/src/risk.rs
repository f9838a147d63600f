//! Risk classification for tool calls and plans. Pure, side-effect-free.
//!
//! Unknown tools and unknown commands classify HIGH: the sets below are
//! closed, and anything outside them fails safe.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auto-approve rule: LOW risk and estimated cost strictly under $0.10.
pub const AUTO_APPROVE_COST_THRESHOLD: f64 = 0.10;

const PLAN_HIGH_COST: f64 = 1.00;
const PLAN_HIGH_DURATION: f64 = 300.0;
const PLAN_MEDIUM_COST: f64 = 0.10;
const PLAN_MEDIUM_DURATION: f64 = 30.0;
const PLAN_MEDIUM_TASK_COUNT: usize = 3;

/// Read/search/info commands.
static COMMANDS_LOW: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "grep", "find", "locate", "ls", "cat", "head", "tail", "wc", "file", "echo", "date",
        "pwd", "whoami", "uname", "sed", "awk", "sort", "uniq", "cut", "diff", "patch", "test",
    ])
});

/// Version control, package managers, interpreters.
static COMMANDS_MEDIUM: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "git", "npm", "pip", "yarn", "pnpm", "node", "python", "ruby", "php",
    ])
});

/// Compilers and archivers.
static COMMANDS_HIGH: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "gcc", "g++", "cc", "make", "clang", "zip", "unzip", "tar", "gzip", "gunzip",
    ])
});

/// Text and code extensions: writable after approval (MEDIUM).
static EXTENSIONS_SAFE: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "txt", "md", "json", "yaml", "yml", "toml", "py", "js", "ts", "jsx", "tsx", "vue",
        "css", "html", "xml", "sql", "sh", "c", "cpp", "h", "hpp", "cc", "cxx", "java", "go",
        "rs", "rb", "php", "log", "csv", "tsv", "ini",
    ])
});

/// Native/executable extensions: HIGH.
static EXTENSIONS_DANGEROUS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "exe", "bin", "so", "dll", "dylib", "sys", "drv", "conf", "config", "app", "deb",
        "rpm", "msi",
    ])
});

/// Normalizes a command to its bare name: strips a leading path and a
/// trailing version suffix, so `/usr/bin/python3.11` becomes `python` and
/// `gcc-12` becomes `gcc`.
fn base_command(command: &str) -> String {
    let first_word = command.trim().split_whitespace().next().unwrap_or("");
    let name = first_word.rsplit('/').next().unwrap_or(first_word);
    let name = name.to_lowercase();
    name.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.' || c == '-')
        .to_string()
}

fn extension(path: &str) -> Option<String> {
    let file = path.rsplit('/').next()?;
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() {
        return None; // dotfile, not an extension
    }
    Some(ext.to_lowercase())
}

fn assess_write_file(params: &Value) -> RiskLevel {
    let path = params.get("path").and_then(Value::as_str).unwrap_or("");
    match extension(path) {
        Some(ext) if EXTENSIONS_DANGEROUS.contains(ext.as_str()) => RiskLevel::High,
        Some(ext) if EXTENSIONS_SAFE.contains(ext.as_str()) => RiskLevel::Medium,
        _ => RiskLevel::Medium,
    }
}

fn assess_command(params: &Value) -> RiskLevel {
    let command = params.get("command").and_then(Value::as_str).unwrap_or("");
    let base = base_command(command);
    if COMMANDS_LOW.contains(base.as_str()) {
        RiskLevel::Low
    } else if COMMANDS_MEDIUM.contains(base.as_str()) {
        RiskLevel::Medium
    } else if COMMANDS_HIGH.contains(base.as_str()) {
        RiskLevel::High
    } else {
        tracing::warn!(command = %base, "unknown command, classifying HIGH");
        RiskLevel::High
    }
}

/// Classifies one tool invocation.
pub fn assess_tool(tool_name: &str, params: &Value) -> RiskLevel {
    match tool_name {
        "read_file" | "list_directory" => RiskLevel::Low,
        "write_file" => assess_write_file(params),
        "execute_command" => assess_command(params),
        other => {
            tracing::warn!(tool = %other, "unknown tool, classifying HIGH");
            RiskLevel::High
        }
    }
}

/// Classifies a plan from its aggregate estimates and per-task risks.
pub fn assess_plan(
    total_cost: f64,
    total_duration: f64,
    task_count: usize,
    task_risks: &[RiskLevel],
) -> RiskLevel {
    let any_high = task_risks.contains(&RiskLevel::High);
    if total_cost > PLAN_HIGH_COST || total_duration > PLAN_HIGH_DURATION || any_high {
        return RiskLevel::High;
    }
    let any_medium = task_risks.contains(&RiskLevel::Medium);
    if total_cost > PLAN_MEDIUM_COST
        || total_duration > PLAN_MEDIUM_DURATION
        || task_count >= PLAN_MEDIUM_TASK_COUNT
        || any_medium
    {
        return RiskLevel::Medium;
    }
    RiskLevel::Low
}

/// Auto-approve holds only for LOW risk with cost strictly under $0.10.
pub fn auto_approve(risk: RiskLevel, estimated_cost: f64) -> bool {
    risk == RiskLevel::Low && estimated_cost < AUTO_APPROVE_COST_THRESHOLD
}

/// Seconds a pending approval of this risk stays live. LOW never waits.
pub fn approval_timeout_seconds(risk: RiskLevel) -> u64 {
    match risk {
        RiskLevel::Low => 0,
        RiskLevel::Medium => 300,
        RiskLevel::High => 600,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_name_is_normalized() {
        assert_eq!(base_command("/usr/bin/python3.11"), "python");
        assert_eq!(base_command("python3"), "python");
        assert_eq!(base_command("gcc-12"), "gcc");
        assert_eq!(base_command("git status"), "git");
        assert_eq!(base_command("g++"), "g++");
    }

    #[test]
    fn read_operations_are_low() {
        assert_eq!(assess_tool("read_file", &json!({})), RiskLevel::Low);
        assert_eq!(assess_tool("list_directory", &json!({})), RiskLevel::Low);
    }

    #[test]
    fn write_file_risk_follows_extension() {
        assert_eq!(
            assess_tool("write_file", &json!({"path": "/tmp/a.py"})),
            RiskLevel::Medium
        );
        assert_eq!(
            assess_tool("write_file", &json!({"path": "/tmp/a.exe"})),
            RiskLevel::High
        );
        assert_eq!(
            assess_tool("write_file", &json!({"path": "/tmp/noext"})),
            RiskLevel::Medium
        );
    }

    #[test]
    fn command_risk_follows_sets() {
        assert_eq!(
            assess_tool("execute_command", &json!({"command": "grep foo"})),
            RiskLevel::Low
        );
        assert_eq!(
            assess_tool("execute_command", &json!({"command": "git push"})),
            RiskLevel::Medium
        );
        assert_eq!(
            assess_tool("execute_command", &json!({"command": "gcc main.c"})),
            RiskLevel::High
        );
        // Versioned compiler names classify as the bare command, not unknown.
        assert_eq!(
            assess_tool("execute_command", &json!({"command": "gcc-12 main.c"})),
            RiskLevel::High
        );
        assert_eq!(
            assess_tool("execute_command", &json!({"command": "rm -rf /"})),
            RiskLevel::High
        );
    }

    #[test]
    fn unknown_tool_fails_safe() {
        assert_eq!(assess_tool("launch_rocket", &json!({})), RiskLevel::High);
    }

    #[test]
    fn plan_thresholds() {
        assert_eq!(assess_plan(1.01, 0.0, 1, &[]), RiskLevel::High);
        assert_eq!(assess_plan(0.0, 301.0, 1, &[]), RiskLevel::High);
        assert_eq!(
            assess_plan(0.0, 0.0, 1, &[RiskLevel::High]),
            RiskLevel::High
        );
        assert_eq!(assess_plan(0.11, 0.0, 1, &[]), RiskLevel::Medium);
        assert_eq!(assess_plan(0.0, 31.0, 1, &[]), RiskLevel::Medium);
        assert_eq!(assess_plan(0.0, 0.0, 3, &[]), RiskLevel::Medium);
        assert_eq!(assess_plan(0.05, 5.0, 2, &[]), RiskLevel::Low);
    }

    #[test]
    fn auto_approve_boundary_is_strict() {
        assert!(auto_approve(RiskLevel::Low, 0.099));
        assert!(!auto_approve(RiskLevel::Low, 0.10));
        assert!(!auto_approve(RiskLevel::Medium, 0.0));
    }

    #[test]
    fn timeouts_per_level() {
        assert_eq!(approval_timeout_seconds(RiskLevel::Low), 0);
        assert_eq!(approval_timeout_seconds(RiskLevel::Medium), 300);
        assert_eq!(approval_timeout_seconds(RiskLevel::High), 600);
    }
}
