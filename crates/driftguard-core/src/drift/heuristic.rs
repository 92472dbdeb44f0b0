//! Deterministic drift check used when the model path is unavailable.
//!
//! Extracts environment-variable names the change reads and fails when one
//! of them is not mentioned as a whole word in the reference document.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::drift::verdict::{DriftStatus, DriftVerdict, VerdictSource, FALLBACK_TAG};

// Python, shell, Node, Rust, Ruby and Go spellings of an env lookup.
const ENV_PATTERNS: &[&str] = &[
    r#"os\.environ\.get\(\s*['"]([A-Za-z_][A-Za-z0-9_]*)['"]"#,
    r#"os\.environ\[\s*['"]([A-Za-z_][A-Za-z0-9_]*)['"]\s*\]"#,
    r#"os\.getenv\(\s*['"]([A-Za-z_][A-Za-z0-9_]*)['"]"#,
    r#"process\.env\.([A-Za-z_][A-Za-z0-9_]*)"#,
    r#"process\.env\[\s*['"]([A-Za-z_][A-Za-z0-9_]*)['"]\s*\]"#,
    r#"env::var(?:_os)?\(\s*"([A-Za-z_][A-Za-z0-9_]*)""#,
    r#"ENV(?:\.fetch\(|\[)\s*['"]([A-Za-z_][A-Za-z0-9_]*)['"]"#,
    r#"os\.(?:Getenv|LookupEnv)\(\s*"([A-Za-z_][A-Za-z0-9_]*)""#,
];

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        ENV_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Lines the change introduces. For a unified diff these are the `+` lines
/// (file headers excluded); any other text is scanned whole.
fn added_text(diff: &str) -> String {
    let looks_unified = diff.lines().any(|l| l.starts_with("@@"));
    if !looks_unified {
        return diff.to_string();
    }
    diff.lines()
        .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
        .map(|l| &l[1..])
        .collect::<Vec<_>>()
        .join("\n")
}

/// Environment variable names referenced by the change, sorted.
pub fn extract_env_vars(diff: &str) -> BTreeSet<String> {
    let text = added_text(diff);
    patterns()
        .iter()
        .flat_map(|re| re.captures_iter(&text))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Whether `name` appears in `reference` as a whole word, so `PORT` is not
/// found inside `SUPPORTED` or `APP_PORT`.
pub fn documents(reference: &str, name: &str) -> bool {
    match Regex::new(&format!(r"\b{}\b", regex::escape(name))) {
        Ok(re) => re.is_match(reference),
        Err(_) => reference.contains(name),
    }
}

/// Heuristic verdict. The reason always starts with [`FALLBACK_TAG`].
pub fn heuristic_verdict(diff: &str, reference: &str, cause: &str) -> DriftVerdict {
    let missing: Vec<String> = extract_env_vars(diff)
        .into_iter()
        .filter(|name| !documents(reference, name))
        .collect();

    if missing.is_empty() {
        DriftVerdict {
            status: DriftStatus::Pass,
            reason: format!(
                "{} no undocumented environment variables found ({})",
                FALLBACK_TAG, cause
            ),
            suggested_edit: String::new(),
            source: VerdictSource::Fallback,
        }
    } else {
        let list = missing.join(", ");
        DriftVerdict {
            status: DriftStatus::Fail,
            reason: format!(
                "{} environment variables used but not documented: {} ({})",
                FALLBACK_TAG, list, cause
            ),
            suggested_edit: missing
                .iter()
                .map(|name| format!("- `{}`: describe this setting", name))
                .collect::<Vec<_>>()
                .join("\n"),
            source: VerdictSource::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_pattern_compiles() {
        assert_eq!(patterns().len(), ENV_PATTERNS.len());
    }

    #[test]
    fn test_extracts_across_languages() {
        let text = r#"
db = os.environ.get('DATABASE_URL')
s = os.getenv("SECRET_SAUCE", "x")
const p = process.env.PORT;
let t = std::env::var("API_TOKEN")?;
r = ENV["REDIS_URL"]
"#;
        let vars = extract_env_vars(text);
        let expected: BTreeSet<String> = ["API_TOKEN", "DATABASE_URL", "PORT", "REDIS_URL", "SECRET_SAUCE"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(vars, expected);
    }

    #[test]
    fn test_unified_diff_only_counts_added_lines() {
        let diff = "\nFile: app.py\n@@ -1,2 +1,2 @@\n-old = os.getenv(\"OLD_VAR\")\n+new = os.getenv(\"NEW_VAR\")\n context = 1\n";
        let vars = extract_env_vars(diff);
        assert!(vars.contains("NEW_VAR"));
        assert!(!vars.contains("OLD_VAR"));
    }

    #[test]
    fn test_fail_when_not_documented() {
        let v = heuristic_verdict(
            "x = os.environ.get('DATABASE_URL')",
            "# App\nSet PORT.",
            "model unavailable",
        );
        assert_eq!(v.status, DriftStatus::Fail);
        assert!(v.reason.starts_with(FALLBACK_TAG));
        assert!(v.reason.contains("DATABASE_URL"));
        assert_eq!(v.source, VerdictSource::Fallback);
    }

    #[test]
    fn test_pass_when_documented_verbatim() {
        let v = heuristic_verdict(
            "x = os.environ.get('DATABASE_URL')",
            "Configure `DATABASE_URL` before starting.",
            "model unavailable",
        );
        assert_eq!(v.status, DriftStatus::Pass);
        assert!(v.reason.starts_with(FALLBACK_TAG));
    }

    #[test]
    fn test_substring_of_longer_word_is_not_documentation() {
        let v = heuristic_verdict(
            "const p = process.env.PORT;",
            "All SUPPORTED platforms read APP_PORT.",
            "model unavailable",
        );
        assert_eq!(v.status, DriftStatus::Fail);
        assert!(v.reason.contains("PORT"));

        let v = heuristic_verdict(
            "const p = process.env.PORT;",
            "Listens on PORT (default 8080).",
            "model unavailable",
        );
        assert_eq!(v.status, DriftStatus::Pass);
    }

    #[test]
    fn test_documents_matches_whole_words() {
        assert!(documents("Set `DATABASE_URL`.", "DATABASE_URL"));
        assert!(!documents("Set DATABASE_URL_RO.", "DATABASE_URL"));
        assert!(!documents("SUPPORTED", "PORT"));
    }
}
