use std::fs;

use serde_json::{json, Value};
use tempfile::TempDir;
use yogi_runtime::{
    Branch, CommandLineOptions, Configuration, ConfigurationFlags, Context, ErrorCode,
};

fn write(dir: &TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

fn args(list: &[&str]) -> Vec<String> {
    std::iter::once("yogi-branch")
        .chain(list.iter().copied())
        .map(String::from)
        .collect()
}

const ALL_OPTIONAL_FILES: CommandLineOptions = CommandLineOptions::from_bits_truncate(
    CommandLineOptions::ALL.bits() & !CommandLineOptions::FILES_REQUIRED.bits(),
);

#[test]
fn update_from_json_file() {
    let dir = TempDir::new().unwrap();
    let file = write(&dir, "a.json", r#"{"person": {"age": 10}}"#);
    let mut cfg = Configuration::default();
    cfg.update_from_json(&json!({"person": {"name": "Joe"}})).unwrap();
    cfg.update_from_file(&file).unwrap();
    assert_eq!(cfg.section("/person").unwrap(), json!({"name": "Joe", "age": 10}));
}

#[test]
fn update_from_toml_file() {
    let dir = TempDir::new().unwrap();
    let file = write(
        &dir,
        "branch.toml",
        "[branch]\nname = \"toml branch\"\ntimeout = 1.5\n",
    );
    let mut cfg = Configuration::default();
    cfg.update_from_file(&file).unwrap();
    assert_eq!(
        cfg.section("/branch").unwrap(),
        json!({"name": "toml branch", "timeout": 1.5})
    );
}

#[test]
fn corrupt_and_missing_files_leave_configuration_unchanged() {
    let dir = TempDir::new().unwrap();
    let corrupt = write(&dir, "a.json", r#"{"person": {"age": 10}"#);
    let mut cfg = Configuration::default();
    cfg.update_from_json(&json!({"person": {"name": "Joe"}})).unwrap();

    let err = cfg.update_from_file(&corrupt).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ParsingFileFailed);
    assert!(err.details().unwrap().contains("a.json"));

    let err = cfg
        .update_from_file(dir.path().join("missing.json"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ParsingFileFailed);

    assert_eq!(cfg.value(false).unwrap(), json!({"person": {"name": "Joe"}}));
}

#[test]
fn command_line_files_and_switches() {
    let dir = TempDir::new().unwrap();
    let first = write(&dir, "a.json", r#"{"person": {"name": "Joe", "age": 1}}"#);
    let second = write(&dir, "b.json", r#"{"person": {"age": 10}, "branch": {"name": "file"}}"#);
    let mut cfg = Configuration::default();
    cfg.update_from_command_line(
        args(&["--name", "My Branch", first.as_str(), second.as_str(), "-o", "person.age=42"]),
        ALL_OPTIONAL_FILES,
    )
    .unwrap();

    let json = cfg.value(false).unwrap();
    assert_eq!(json["person"], json!({"name": "Joe", "age": 42}));
    assert_eq!(json["branch"]["name"], "My Branch");
}

#[test]
fn corrupt_file_on_command_line() {
    let dir = TempDir::new().unwrap();
    let corrupt = write(&dir, "a.json", r#"{"person": {"age": 10}"#);
    let mut cfg = Configuration::default();
    let err = cfg
        .update_from_command_line(args(&["--name", "My Branch", corrupt.as_str()]), ALL_OPTIONAL_FILES)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ParsingFileFailed);
    assert_eq!(cfg.value(false).unwrap(), json!({}));
}

#[test]
fn write_to_file_and_read_back() {
    let dir = TempDir::new().unwrap();
    let mut cfg = Configuration::default();
    cfg.update_from_json(&json!({
        "variables": {"NAME": "Joe"},
        "person": {"name": "${NAME}"},
    }))
    .unwrap();

    let raw = dir.path().join("raw.json");
    cfg.write_to_file(&raw, false, Some(2)).unwrap();
    let text = fs::read_to_string(&raw).unwrap();
    assert!(text.ends_with("}\n"));
    let written: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(written["person"]["name"], "${NAME}");

    let resolved = dir.path().join("resolved.json");
    cfg.write_to_file(&resolved, true, None).unwrap();
    let written: Value = serde_json::from_str(&fs::read_to_string(&resolved).unwrap()).unwrap();
    assert_eq!(written["person"]["name"], "Joe");

    let mut reloaded = Configuration::default();
    reloaded.update_from_file(&raw).unwrap();
    assert_eq!(reloaded.value(false).unwrap(), cfg.value(false).unwrap());
}

#[test]
fn write_to_unwritable_location() {
    let dir = TempDir::new().unwrap();
    let cfg = Configuration::default();
    let err = cfg
        .write_to_file(dir.path().join("no/such/dir/out.json"), false, None)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OpenFileFailed);

    let cfg = Configuration::new(ConfigurationFlags::DISABLE_VARIABLES);
    let err = cfg
        .write_to_file(dir.path().join("out.json"), true, None)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoVariableSupport);
}

#[test]
fn branch_from_configuration_section() {
    let mut cfg = Configuration::default();
    cfg.update_from_command_line(
        args(&[
            "--name=configured",
            "--adv-addr=127.0.0.1",
            "--adv-port=0",
            "-v",
            "NET=cfg-test",
            "-o",
            "branch.network_name=${NET}",
        ]),
        ALL_OPTIONAL_FILES,
    )
    .unwrap();

    let ctx = Context::new().unwrap();
    let branch = Branch::from_config(&ctx, &cfg, "/branch").unwrap();
    let info = branch.info();
    assert_eq!(info.identity.name, "configured");
    assert_eq!(info.identity.network_name, "cfg-test");
    assert_eq!(info.identity.path, "/configured");
}
