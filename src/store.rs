use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::{Account, FeedCategory, MediaKind, Profile};
use crate::error::SnapError;
use crate::timezone;

pub const PART_TEMP_PREFIX: &str = ".snapgrab-part";
pub const JSON_TEMP_PREFIX: &str = ".snapgrab-json";

/// On-disk layout of the archive, rooted at the configured root folder.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn from_current_dir() -> Result<Self, SnapError> {
        let cwd = std::env::current_dir().map_err(|err| SnapError::Filesystem(err.to_string()))?;
        let root = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|_| SnapError::Filesystem("non-utf8 working directory".to_string()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn account_dir(&self, account: &Account) -> Utf8PathBuf {
        self.root.join(account.as_str())
    }

    pub fn account_dump_path(&self, account: &Account, suffix: &str) -> Utf8PathBuf {
        self.account_dir(account)
            .join(format!("{}{suffix}.json", account.as_str()))
    }

    pub fn preview_avatar_path(&self, account: &Account, profile: &Profile) -> Utf8PathBuf {
        self.account_dir(account)
            .join(format!("{}.jpg", sanitize(profile.file_label())))
    }

    pub fn hero_avatar_path(&self, account: &Account, profile: &Profile) -> Utf8PathBuf {
        self.account_dir(account)
            .join(format!("{} (Hero).jpg", sanitize(profile.file_label())))
    }

    pub fn category_dir(&self, account: &Account, category: FeedCategory) -> Utf8PathBuf {
        self.account_dir(account).join(category.folder_name())
    }

    pub fn story_path(
        &self,
        account: &Account,
        local_ts: i64,
        part: usize,
        kind: MediaKind,
    ) -> Utf8PathBuf {
        // Images keep the bare name unless they share a second with another part.
        let name = match (kind, part) {
            (MediaKind::Image, 1) => format!(
                "{}_{}.{}",
                timezone::file_stamp(local_ts),
                account.as_str(),
                kind.extension()
            ),
            _ => format!(
                "{}_{}_part-{part}.{}",
                timezone::file_stamp(local_ts),
                account.as_str(),
                kind.extension()
            ),
        };
        self.category_dir(account, FeedCategory::Stories)
            .join(timezone::date_folder(local_ts))
            .join(name)
    }

    /// Merged video for a run whose parts are numbered `first..first + len`.
    /// Only the first run of a second gets the bare name.
    pub fn merged_story_path(
        &self,
        account: &Account,
        run_key: i64,
        first: usize,
        len: usize,
    ) -> Utf8PathBuf {
        let suffix = if first > 1 {
            format!("_parts-{first}-{}", first + len.max(1) - 1)
        } else {
            String::new()
        };
        self.category_dir(account, FeedCategory::Stories)
            .join(timezone::date_folder(run_key))
            .join(format!(
                "{}_{}{suffix}.mp4",
                timezone::file_stamp(run_key),
                account.as_str()
            ))
    }

    pub fn curated_path(
        &self,
        account: &Account,
        group_title: &str,
        local_ts: i64,
        index: usize,
        kind: MediaKind,
    ) -> Utf8PathBuf {
        self.category_dir(account, FeedCategory::Curated)
            .join(sanitize(group_title))
            .join(format!(
                "{}_{}_curated_snap-{index}.{}",
                timezone::file_stamp(local_ts),
                account.as_str(),
                kind.extension()
            ))
    }

    pub fn spotlight_path(
        &self,
        account: &Account,
        local_ts: i64,
        part: usize,
        kind: MediaKind,
    ) -> Utf8PathBuf {
        let suffix = if part > 1 {
            format!("_part-{part}")
        } else {
            String::new()
        };
        self.category_dir(account, FeedCategory::Spotlight)
            .join(timezone::date_folder(local_ts))
            .join(format!(
                "{}_{}_spotlight{suffix}.{}",
                timezone::file_stamp(local_ts),
                account.as_str(),
                kind.extension()
            ))
    }

    /// Removes temp files left behind by an interrupted run under the account folder.
    pub fn sweep_partial_downloads(&self, account: &Account) -> usize {
        sweep_dir(self.account_dir(account).as_std_path())
    }

    /// Pretty-printed JSON written through a temp file and renamed into place.
    pub fn write_json<T: Serialize + ?Sized>(path: &Utf8Path, value: &T) -> Result<(), SnapError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| SnapError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), SnapError> {
        let parent = path
            .parent()
            .ok_or_else(|| SnapError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| SnapError::Filesystem(err.to_string()))?;
        if let Ok(existing) = fs::read(path.as_std_path()) {
            if existing == content {
                return Ok(());
            }
        }
        let mut temp = tempfile::Builder::new()
            .prefix(JSON_TEMP_PREFIX)
            .tempfile_in(parent.as_std_path())
            .map_err(|err| SnapError::Filesystem(err.to_string()))?;
        std::io::Write::write_all(temp.as_file_mut(), content)
            .map_err(|err| SnapError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| SnapError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn sweep_dir(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            removed += sweep_dir(&path);
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with(PART_TEMP_PREFIX) || name.starts_with(JSON_TEMP_PREFIX)) {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("removed leftover {}", path.display());
                removed += 1;
            }
            Err(err) => tracing::warn!("could not remove {}: {err}", path.display()),
        }
    }
    removed
}

/// Strips path separators and characters most filesystems reject.
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn store() -> Store {
        Store::new(Utf8PathBuf::from("/archive"))
    }

    #[test]
    fn layout_paths() {
        let store = store();
        let account: Account = "abc".parse().unwrap();
        // 2024-03-10 07:08:09
        let ts = 1_710_054_489;

        let story = store.story_path(&account, ts, 2, MediaKind::Video);
        assert_eq!(
            story,
            "/archive/abc/Public Stories/2024-03-10/2024-03-10_07-08-09_abc_part-2.mp4"
        );
        let image = store.story_path(&account, ts, 1, MediaKind::Image);
        assert!(image.ends_with("2024-03-10_07-08-09_abc.jpg"));
        let merged = store.merged_story_path(&account, ts, 1, 3);
        assert!(merged.ends_with("Public Stories/2024-03-10/2024-03-10_07-08-09_abc.mp4"));
        let returning = store.merged_story_path(&account, ts, 4, 2);
        assert!(returning.ends_with("2024-03-10_07-08-09_abc_parts-4-5.mp4"));

        let curated = store.curated_path(&account, "Road/Trip", ts, 3, MediaKind::Image);
        assert!(curated.ends_with("Curated Highlights/Road_Trip/2024-03-10_07-08-09_abc_curated_snap-3.jpg"));

        let spotlight = store.spotlight_path(&account, ts, 1, MediaKind::Video);
        assert!(spotlight.ends_with("Spotlight Highlights/2024-03-10/2024-03-10_07-08-09_abc_spotlight.mp4"));
        let second = store.spotlight_path(&account, ts, 2, MediaKind::Video);
        assert!(second.ends_with("2024-03-10_07-08-09_abc_spotlight_part-2.mp4"));

        assert_eq!(
            store.account_dump_path(&account, "_user"),
            "/archive/abc/abc_user.json"
        );
    }

    #[test]
    fn json_dump_is_rewritten_only_on_change() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let path = root.join("abc").join("abc.json");

        Store::write_json(&path, &json!({ "a": 1 })).unwrap();
        let first = fs::read_to_string(path.as_std_path()).unwrap();
        Store::write_json(&path, &json!({ "a": 1 })).unwrap();
        assert_eq!(fs::read_to_string(path.as_std_path()).unwrap(), first);

        Store::write_json(&path, &json!({ "a": 2 })).unwrap();
        assert!(fs::read_to_string(path.as_std_path()).unwrap().contains('2'));
    }

    #[test]
    fn sweep_removes_only_leftover_temp_files() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = Store::new(root.clone());
        let account: Account = "abc".parse().unwrap();
        let day = root.join("abc/Public Stories/2024-03-10");
        fs::create_dir_all(day.as_std_path()).unwrap();
        fs::write(day.join(".snapgrab-partX1y2").as_std_path(), b"half").unwrap();
        fs::write(root.join("abc/.snapgrab-jsonQ").as_std_path(), b"{").unwrap();
        fs::write(day.join("2024-03-10_07-08-09_abc.jpg").as_std_path(), b"keep").unwrap();
        fs::write(root.join("abc/abc.json").as_std_path(), b"{}").unwrap();

        assert_eq!(store.sweep_partial_downloads(&account), 2);
        assert!(!day.join(".snapgrab-partX1y2").exists());
        assert!(day.join("2024-03-10_07-08-09_abc.jpg").exists());
        assert!(root.join("abc/abc.json").exists());

        let missing: Account = "nobody".parse().unwrap();
        assert_eq!(store.sweep_partial_downloads(&missing), 0);
    }

    #[test]
    fn sanitize_names() {
        assert_eq!(sanitize("Summer: 2024"), "Summer_ 2024");
        assert_eq!(sanitize(".."), "_");
        assert_eq!(sanitize("Plain"), "Plain");
    }
}
