//! Security specialty: injection, transport and secret-handling checks.

use super::{is_comment_line, HeuristicSettings, SpecialtyAnalyzer};
use crate::models::{Finding, Severity, Specialty};
use regex::Regex;
use std::sync::OnceLock;

const SYSTEM_PROMPT: &str = "You are a security auditor reviewing source code. \
Look for injection flaws (SQL, command, code), cross-site scripting, insecure \
deserialization, hard-coded credentials, weak cryptography, broken authentication \
and unsafe handling of untrusted input. Only report issues you can point to in the code.";

static SQL_STATEMENT: OnceLock<Regex> = OnceLock::new();
static SQL_DYNAMIC: OnceLock<Regex> = OnceLock::new();
static TLS_DISABLED: OnceLock<Regex> = OnceLock::new();
static WEAK_RANDOM: OnceLock<Regex> = OnceLock::new();
static SECRET_NAME: OnceLock<Regex> = OnceLock::new();
static CORS_WILDCARD: OnceLock<Regex> = OnceLock::new();

fn sql_statement() -> &'static Regex {
    SQL_STATEMENT.get_or_init(|| {
        Regex::new(r"(?i)\b(select\s.+\sfrom|insert\s+into|update\s+\w+\s+set|delete\s+from)\b")
            .expect("valid regex")
    })
}

fn sql_dynamic() -> &'static Regex {
    SQL_DYNAMIC.get_or_init(|| {
        Regex::new(r#"["'`]\s*\+|\+\s*["'`]|\$\{|\bf["']|\.format\(|["']\s*%\s*[\w(]"#)
            .expect("valid regex")
    })
}

fn tls_disabled() -> &'static Regex {
    TLS_DISABLED.get_or_init(|| {
        Regex::new(
            r"rejectUnauthorized\s*:\s*false|NODE_TLS_REJECT_UNAUTHORIZED|verify\s*=\s*False|InsecureSkipVerify\s*:\s*true|danger_accept_invalid_certs\(\s*true\s*\)",
        )
        .expect("valid regex")
    })
}

fn weak_random() -> &'static Regex {
    WEAK_RANDOM.get_or_init(|| {
        Regex::new(r"Math\.random\(\)|\brandom\.(random|randint|choice)\(").expect("valid regex")
    })
}

fn secret_name() -> &'static Regex {
    SECRET_NAME.get_or_init(|| {
        Regex::new(r"(?i)(token|secret|password|passwd|nonce|salt|session|api_?key)")
            .expect("valid regex")
    })
}

fn cors_wildcard() -> &'static Regex {
    CORS_WILDCARD.get_or_init(|| {
        Regex::new(r#"(?i)(Access-Control-Allow-Origin["']?\s*[,:=]\s*["']\*["']|origin\s*:\s*["']\*["'])"#)
            .expect("valid regex")
    })
}

/// Security agent behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityAnalyzer;

impl SpecialtyAnalyzer for SecurityAnalyzer {
    fn specialty(&self) -> Specialty {
        Specialty::Security
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn heuristics(&self, code: &str, language: &str, _settings: &HeuristicSettings) -> Vec<Finding> {
        let category = Specialty::Security.as_str();
        let mut findings = Vec::new();

        for (idx, line) in code.lines().enumerate() {
            if is_comment_line(line, language) {
                continue;
            }
            let line_no = idx + 1;

            if sql_statement().is_match(line) && sql_dynamic().is_match(line) {
                findings.push(
                    Finding::new(
                        Severity::High,
                        category,
                        "SQL query built from string concatenation or interpolation",
                    )
                    .at_line(line_no)
                    .with_snippet(line.trim())
                    .with_suggestion("Use parameterized queries or prepared statements"),
                );
            }

            if tls_disabled().is_match(line) {
                findings.push(
                    Finding::new(
                        Severity::High,
                        category,
                        "TLS certificate verification is disabled",
                    )
                    .at_line(line_no)
                    .with_snippet(line.trim())
                    .with_suggestion("Keep certificate verification enabled and trust the proper CA instead"),
                );
            }

            if weak_random().is_match(line) && secret_name().is_match(line) {
                findings.push(
                    Finding::new(
                        Severity::Medium,
                        category,
                        "Non-cryptographic random number generator used for a secret value",
                    )
                    .at_line(line_no)
                    .with_snippet(line.trim())
                    .with_suggestion("Use crypto.randomBytes, crypto.getRandomValues or the secrets module"),
                );
            }

            if cors_wildcard().is_match(line) {
                findings.push(
                    Finding::new(
                        Severity::Medium,
                        category,
                        "CORS policy allows any origin",
                    )
                    .at_line(line_no)
                    .with_snippet(line.trim())
                    .with_suggestion("Restrict allowed origins to a known list"),
                );
            }
        }

        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(code: &str, language: &str) -> Vec<Finding> {
        SecurityAnalyzer.heuristics(code, language, &HeuristicSettings::default())
    }

    #[test]
    fn test_sql_concatenation() {
        let findings = run(
            "const q = \"SELECT * FROM users WHERE id = \" + req.params.id;",
            "javascript",
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].line_start, Some(1));

        let findings = run("cursor.execute(f\"DELETE FROM t WHERE id={x}\")", "python");
        assert_eq!(findings.len(), 1);

        let findings = run("const q = `UPDATE users SET name = ${name}`;", "typescript");
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn test_parameterized_sql_is_clean() {
        assert!(run("db.query('SELECT * FROM users WHERE id = ?', [id]);", "javascript").is_empty());
    }

    #[test]
    fn test_tls_disabled() {
        let findings = run(
            "https.request({ host, rejectUnauthorized: false });\nrequests.get(url, verify=False)",
            "javascript",
        );
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[1].line_start, Some(2));
    }

    #[test]
    fn test_weak_random_for_secrets_only() {
        assert_eq!(run("const token = Math.random().toString(36);", "javascript").len(), 1);
        assert!(run("const jitter = Math.random() * 10;", "javascript").is_empty());
    }

    #[test]
    fn test_cors_wildcard() {
        let findings = run("res.setHeader('Access-Control-Allow-Origin', '*');", "javascript");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn test_comments_and_clean_code() {
        assert!(run("// rejectUnauthorized: false", "javascript").is_empty());
        assert!(run("console.log(\"hi\")", "javascript").is_empty());
    }
}
