//! Doctor command - verify configuration and storage.

use crate::cli::output::format_size;
use crate::cli::Output;
use crate::config::{BlobStoreProvider, RecordStoreProvider, Settings};
use console::style;
use std::path::Path;

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

/// Run all diagnostic checks.
pub fn run_doctor(settings: &Settings) -> anyhow::Result<()> {
    Output::header("Samle Doctor");
    println!();
    println!("Checking configuration and storage...\n");

    let mut checks = Vec::new();

    println!("{}", style("Analysis Provider").bold());
    let api_check = check_api_key(settings);
    api_check.print();
    checks.push(api_check);

    println!();

    println!("{}", style("Storage").bold());
    let storage_checks = check_storage(settings);
    for check in &storage_checks {
        check.print();
    }
    checks.extend(storage_checks);

    println!();

    println!("{}", style("Configuration").bold());
    let config_checks = vec![check_config_file(), check_settings(settings)];
    for check in &config_checks {
        check.print();
    }
    checks.extend(config_checks);

    println!();

    let errors = checks.iter().filter(|c| c.status == CheckStatus::Error).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Please fix them before starting the server.",
            errors
        ));
        std::process::exit(1);
    } else if warnings > 0 {
        Output::warning(&format!("All checks passed with {} warning(s).", warnings));
    } else {
        Output::success("All checks passed! Samle is ready to serve.");
    }

    Ok(())
}

/// Check that the configured provider key is present.
fn check_api_key(settings: &Settings) -> CheckResult {
    let var = &settings.analysis.api_key_env;
    let label = format!("{} ({})", var, settings.analysis.provider);
    match settings.analysis.api_key() {
        Some(key) if key.len() > 12 => {
            let masked = format!("{}...{}", &key[..4], &key[key.len() - 4..]);
            CheckResult::ok(&label, &format!("configured ({})", masked))
        }
        Some(_) => CheckResult::warning(
            &label,
            "set but looks too short",
            "Check that the full API key was exported",
        ),
        None => CheckResult::error(&label, "not set", &format!("Set with: export {}='...'", var)),
    }
}

/// Check the blob root, temp dir and record database.
fn check_storage(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    match settings.blob_store.provider {
        BlobStoreProvider::Fs => results.push(check_dir("Blob root", &settings.blob_root())),
        BlobStoreProvider::Memory => results.push(CheckResult::warning(
            "Blob store",
            "in memory",
            "Uploads are lost on restart; set blob_store.provider = \"fs\" to persist",
        )),
    }

    results.push(check_dir("Temp directory", &settings.temp_dir()));

    match settings.record_store.provider {
        RecordStoreProvider::Sqlite => {
            let db_path = settings.sqlite_path();
            if db_path.exists() {
                let size = std::fs::metadata(&db_path)
                    .map(|m| format_size(m.len()))
                    .unwrap_or_else(|_| "unknown size".to_string());
                results.push(CheckResult::ok(
                    "Record database",
                    &format!("{} ({})", db_path.display(), size),
                ));
            } else {
                results.push(CheckResult::warning(
                    "Record database",
                    &format!("{} (not created yet)", db_path.display()),
                    "Database will be created when the server starts",
                ));
            }
        }
        RecordStoreProvider::Memory => results.push(CheckResult::warning(
            "Record store",
            "in memory",
            "Records are lost on restart; set record_store.provider = \"sqlite\" to persist",
        )),
    }

    results
}

fn check_dir(name: &str, dir: &Path) -> CheckResult {
    if dir.is_dir() {
        CheckResult::ok(name, &dir.display().to_string())
    } else if dir.exists() {
        CheckResult::error(
            name,
            &format!("{} is not a directory", dir.display()),
            "Point the setting at a directory",
        )
    } else {
        CheckResult::warning(
            name,
            &format!("{} (will be created)", dir.display()),
            "Directory will be created on first use",
        )
    }
}

/// Check if config file exists.
fn check_config_file() -> CheckResult {
    let config_path = Settings::default_config_path();
    if config_path.exists() {
        CheckResult::ok("Config file", &config_path.display().to_string())
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: samle config edit",
        )
    }
}

fn check_settings(settings: &Settings) -> CheckResult {
    match settings.validate() {
        Ok(()) => CheckResult::ok(
            "Polling",
            &format!(
                "{}ms doubling to {}ms, timeout {}s",
                settings.polling.initial_interval_ms,
                settings.polling.max_interval_ms,
                settings.polling.timeout_seconds
            ),
        ),
        Err(e) => CheckResult::error("Settings", &e.to_string(), "Fix with: samle config edit"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result_ok() {
        let result = CheckResult::ok("test", "passed");
        assert_eq!(result.status, CheckStatus::Ok);
        assert!(result.hint.is_none());
    }

    #[test]
    fn test_check_result_error() {
        let result = CheckResult::error("test", "failed", "fix it");
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.hint, Some("fix it".to_string()));
    }

    #[test]
    fn test_check_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(check_dir("d", dir.path()).status, CheckStatus::Ok);
        assert_eq!(check_dir("d", &dir.path().join("missing")).status, CheckStatus::Warning);
    }
}
