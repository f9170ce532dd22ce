use std::fs;

use assert_matches::assert_matches;

use snapgrab::config::ConfigLoader;
use snapgrab::error::SnapError;

#[test]
fn reads_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("snapgrab.json");
    fs::write(
        &path,
        r#"{
            "usernames": ["abc", "xyz.1"],
            "root_folder": "/srv/archive",
            "max_workers": 0,
            "sleep_interval": 3,
            "reference_timezone": "Europe/Berlin"
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    let names: Vec<&str> = resolved.usernames.iter().map(|a| a.as_str()).collect();
    assert_eq!(names, vec!["abc", "xyz.1"]);
    assert_eq!(resolved.root_folder.unwrap().to_str(), Some("/srv/archive"));
    assert_eq!(resolved.max_workers, 1);
    assert_eq!(resolved.sleep_interval, 3);
    assert_eq!(resolved.update_interval, 600);
    assert_eq!(resolved.reference_timezone, "Europe/Berlin");
}

#[test]
fn missing_explicit_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, SnapError::ConfigRead(_));
}

#[test]
fn malformed_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("snapgrab.json");
    fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, SnapError::ConfigParse(_));
}
