use std::error::Error;
use std::path::PathBuf;

/// Data directory precedence: CLI flag, then `BROOK_DATA_DIR`, then
/// `./data` next to the process.
pub(crate) fn resolve_data_dir(cli_value: &str) -> String {
    pick_data_dir(cli_value, std::env::var("BROOK_DATA_DIR").ok().as_deref())
}

fn pick_data_dir(cli_value: &str, env_value: Option<&str>) -> String {
    let cli_value = cli_value.trim();
    if !cli_value.is_empty() {
        return cli_value.to_string();
    }
    if let Some(env_value) = env_value {
        let env_value = env_value.trim();
        if !env_value.is_empty() {
            return env_value.to_string();
        }
    }
    "./data".to_string()
}

/// Picks the database DSN and makes sure a sqlite target is reachable.
///
/// An explicit DSN is taken as-is; otherwise a file-backed sqlite database
/// under the data directory is used, with `mode=rwc` so sqlite creates the
/// file itself. Only parent directories need to exist beforehand.
pub(crate) fn resolve_dsn(
    input: &str,
    data_dir: &str,
) -> Result<String, Box<dyn Error + Send + Sync>> {
    let input = input.trim();
    let dsn = if input.is_empty() {
        let dir = data_dir.trim_end_matches('/');
        format!("sqlite://{dir}/db/brook.db?mode=rwc")
    } else {
        input.to_string()
    };
    ensure_sqlite_parent_dir(&dsn)?;
    Ok(dsn)
}

fn ensure_sqlite_parent_dir(dsn: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    let Some(db_path) = sqlite_file_path(dsn) else {
        return Ok(());
    };
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Extracts the file path from a sqlite DSN. Non-sqlite and in-memory DSNs
/// have no path to prepare.
fn sqlite_file_path(dsn: &str) -> Option<PathBuf> {
    let rest = dsn.strip_prefix("sqlite:")?;
    let path_part = rest.split(['?', '#']).next()?.trim();
    let path_part = path_part.strip_prefix("//").unwrap_or(path_part);
    if path_part.is_empty() || path_part.eq_ignore_ascii_case(":memory:") {
        return None;
    }
    Some(PathBuf::from(path_part))
}
