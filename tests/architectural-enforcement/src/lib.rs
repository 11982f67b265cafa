//! Architectural Enforcement Integration Tests
//!
//! This package contains tests that enforce architectural principles of the
//! strategy core:
//! - No blocking sleeps in async code
//! - No stdout/stderr printing (use `tracing`)
//! - No mutable statics (state lives in components)
//! - No `unwrap()`/`expect()` outside tests
//!
//! Only production code is scanned: doc comments, line comments and
//! everything from the first `#[cfg(test)]` onwards are skipped.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// A rule violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub file: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Rule that was broken
    pub rule: &'static str,
    /// Offending source line
    pub text: String,
}

/// Forbidden pattern with the rule name reported for it
pub const RULES: &[(&str, &str)] = &[
    ("thread::sleep", "blocking sleep"),
    ("println!", "stdout printing"),
    ("eprintln!", "stderr printing"),
    ("static mut", "mutable static"),
    (".unwrap()", "unwrap in production code"),
    (".expect(", "expect in production code"),
];

/// Files that are compiled only for tests
const TEST_ONLY_FILES: &[&str] = &["test_utils.rs"];

/// Source root of the strategy core crate
#[must_use]
pub fn strategy_core_src() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../strategy/core/src")
}

/// Production lines of `source`, with their 1-based line numbers
pub fn production_lines(source: &str) -> impl Iterator<Item = (usize, &str)> {
    source
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .filter(|(_, line)| !line.trim_start().starts_with("//"))
        .map(|(i, line)| (i + 1, line))
}

/// Scan every production `.rs` file under `root`
#[must_use]
pub fn scan(root: &Path) -> Vec<Violation> {
    let mut violations = Vec::new();

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
    {
        let path = entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if TEST_ONLY_FILES.contains(&name) {
            continue;
        }
        let Ok(source) = fs::read_to_string(path) else {
            continue;
        };

        for (line, text) in production_lines(&source) {
            for (pattern, rule) in RULES {
                if text.contains(pattern) {
                    violations.push(Violation {
                        file: path.to_path_buf(),
                        line,
                        rule: *rule,
                        text: text.trim().to_string(),
                    });
                }
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(violations: &[Violation]) -> String {
        violations
            .iter()
            .map(|v| format!("{}:{} [{}] {}", v.file.display(), v.line, v.rule, v.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_strategy_core_has_no_violations() {
        let root = strategy_core_src();
        assert!(root.is_dir(), "missing source root {}", root.display());

        let violations = scan(&root);
        assert!(violations.is_empty(), "\n{}", report(&violations));
    }

    #[test]
    fn test_production_lines_skip_comments_and_tests() {
        let source = "//! println!(\"doc\")\nfn a() {}\n// x.unwrap()\n#[cfg(test)]\nmod tests { fn b() { x.unwrap(); } }\n";
        let lines: Vec<_> = production_lines(source).collect();
        assert_eq!(lines, vec![(2, "fn a() {}")]);
    }

    #[test]
    fn test_scan_reports_violations() {
        let dir = std::env::temp_dir().join(format!("arch-scan-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("bad.rs"), "fn f() {\n    std::thread::sleep(d);\n}\n").unwrap();
        fs::write(dir.join("test_utils.rs"), "fn g() { println!(\"ok\"); }\n").unwrap();

        let violations = scan(&dir);
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 2);
        assert_eq!(violations[0].rule, "blocking sleep");
    }
}
