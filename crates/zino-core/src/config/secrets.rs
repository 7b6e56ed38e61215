//! Reader for the legacy API secrets file.
//!
//! One `user<SP>password` per line; `#` comments and blank lines are
//! ignored. Passwords are stored in cleartext, so a world-readable file
//! earns a warning at load time.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::Result;

/// Reads the users database, mapping user names to their secrets.
pub fn read_users(path: &Path) -> Result<HashMap<String, String>> {
    warn_if_world_readable(path);
    let content = fs::read_to_string(path)?;
    Ok(parse_users(&content))
}

fn parse_users(content: &str) -> HashMap<String, String> {
    let mut users = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((user, secret)) = line.split_once(' ') {
            users.insert(user.to_string(), secret.to_string());
        }
    }
    users
}

#[cfg(unix)]
fn warn_if_world_readable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = fs::metadata(path) {
        if metadata.permissions().mode() & 0o004 != 0 {
            warn!(
                file = %path.display(),
                "secrets file is world-readable; restrict it to the zino user"
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_world_readable(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parses_users_and_skips_comments() {
        let users = parse_users("# staff\nuser1 password123\n\nford towel42\n");
        assert_eq!(users.len(), 2);
        assert_eq!(users["user1"], "password123");
        assert_eq!(users["ford"], "towel42");
    }

    #[test]
    fn test_secret_may_contain_spaces() {
        let users = parse_users("zaphod two heads one secret\n");
        assert_eq!(users["zaphod"], "two heads one secret");
    }

    #[test]
    fn test_read_users_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "user1 password123").unwrap();
        let users = read_users(file.path()).unwrap();
        assert_eq!(users["user1"], "password123");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(read_users(Path::new("/nonexistent/secrets")).is_err());
    }
}
