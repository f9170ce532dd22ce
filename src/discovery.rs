//! Where account names come from besides the command line.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::Account;
use crate::error::SnapError;
use crate::merge::find_in_path;

static PROFILE_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:story|www)\.snapchat\.com/(?:[suad]+/|@)([-\w.]{3,15})").unwrap()
});

/// One account per line. Blank lines, comments and invalid names are skipped.
pub fn read_batch_file(path: &Path) -> Result<Vec<Account>, SnapError> {
    let content = fs::read_to_string(path)
        .map_err(|err| SnapError::Filesystem(format!("{}: {err}", path.display())))?;
    let mut accounts = Vec::new();
    for line in content.lines() {
        let name = line.trim();
        if name.is_empty() || name.starts_with('#') {
            continue;
        }
        match name.parse::<Account>() {
            Ok(account) if !accounts.contains(&account) => accounts.push(account),
            Ok(_) => {}
            Err(_) => tracing::warn!("ignoring invalid username in batch file: {name}"),
        }
    }
    tracing::info!("added {} usernames from {}", accounts.len(), path.display());
    Ok(accounts)
}

/// Every subdirectory of the archive root whose name is a valid account.
pub fn scan_root_folder(root: &Path) -> Result<Vec<Account>, SnapError> {
    let entries = fs::read_dir(root)
        .map_err(|err| SnapError::Filesystem(format!("{}: {err}", root.display())))?;
    let mut accounts = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|err| SnapError::Filesystem(err.to_string()))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(account) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<Account>().ok())
        {
            accounts.insert(account);
        }
    }
    tracing::info!("added {} usernames from {}", accounts.len(), root.display());
    Ok(accounts.into_iter().collect())
}

/// Account names found in profile links within free text, sorted and unique.
pub fn search_usernames(text: &str) -> Vec<Account> {
    PROFILE_LINK_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|name| name.as_str().parse::<Account>().ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub trait ClipboardSource {
    fn read_text(&self) -> Option<String>;
}

/// Reads the clipboard through whichever paste utility is installed.
#[derive(Debug, Clone)]
pub struct SystemClipboard {
    program: PathBuf,
    args: &'static [&'static str],
}

const PASTE_TOOLS: &[(&str, &[&str])] = &[
    ("pbpaste", &[]),
    ("wl-paste", &["--no-newline"]),
    ("xclip", &["-selection", "clipboard", "-o"]),
    ("xsel", &["--clipboard", "--output"]),
    ("powershell", &["-NoProfile", "-Command", "Get-Clipboard"]),
];

impl SystemClipboard {
    pub fn detect() -> Option<Self> {
        PASTE_TOOLS.iter().find_map(|&(name, args)| {
            find_in_path(name).map(|program| Self { program, args })
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl ClipboardSource for SystemClipboard {
    fn read_text(&self) -> Option<String> {
        let output = Command::new(&self.program).args(self.args).output().ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(accounts: &[Account]) -> Vec<&str> {
        accounts.iter().map(Account::as_str).collect()
    }

    #[test]
    fn finds_links_in_text() {
        let text = "look https://story.snapchat.com/s/zed.k and \
                    https://www.snapchat.com/add/abc_1?share=1 again https://www.snapchat.com/@abc_1 \
                    https://www.snapchat.com/add/x";
        assert_eq!(names(&search_usernames(text)), vec!["abc_1", "zed.k"]);
    }

    #[test]
    fn ignores_other_hosts() {
        assert!(search_usernames("https://example.com/add/abc").is_empty());
        assert!(search_usernames("").is_empty());
    }

    #[test]
    fn batch_file_dedups_and_skips_invalid() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("users.txt");
        fs::write(&path, "abc\n\n  xyz  \n# comment\nabc\nno good\n").unwrap();
        let accounts = read_batch_file(&path).unwrap();
        assert_eq!(names(&accounts), vec!["abc", "xyz"]);
    }

    #[test]
    fn missing_batch_file_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        assert!(read_batch_file(&temp.path().join("absent.txt")).is_err());
    }

    #[test]
    fn root_scan_uses_valid_directories() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir(temp.path().join("zed")).unwrap();
        fs::create_dir(temp.path().join("abc")).unwrap();
        fs::create_dir(temp.path().join("no")).unwrap();
        fs::write(temp.path().join("file.txt"), "x").unwrap();
        let accounts = scan_root_folder(temp.path()).unwrap();
        assert_eq!(names(&accounts), vec!["abc", "zed"]);
    }
}
