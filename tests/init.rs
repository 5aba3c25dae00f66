use std::process::Command;

#[test]
fn init_creates_valid_toml() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_repovet"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "repovet init failed: {}", String::from_utf8_lossy(&output.stderr));

    let config_path = dir.path().join(".repovet.toml");
    assert!(config_path.exists(), ".repovet.toml should exist");

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("[models]"));
    assert!(content.contains("[audit]"));

    // Verify it's valid TOML that repovet-core can parse
    let _config: repovet_core::RepovetConfig = toml::from_str(&content).unwrap();
    let config = repovet_core::RepovetConfig::from_toml(&content).unwrap();
    assert_eq!(config.audit.max_core_files, 3);
    assert_eq!(config.models.synthesizer, "deepseek-v3");
    assert_eq!(config.llm.resolve("qwen-plus").model, "qwen-plus-2025-12-01");
}

#[test]
fn init_refuses_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".repovet.toml"), "# existing").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_repovet"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let content = std::fs::read_to_string(dir.path().join(".repovet.toml")).unwrap();
    assert_eq!(content, "# existing");
}
