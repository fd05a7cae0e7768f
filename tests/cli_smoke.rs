use std::process::Command;

use tempfile::tempdir;

#[test]
fn check_config_prints_effective_settings() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    std::fs::write(
        &config_path,
        r#"{"validation_passes": 5, "selection_policy": "highest_ratio"}"#,
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_veracity"))
        .arg("check-config")
        .arg("--config")
        .arg(&config_path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let effective: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(effective["validation_passes"], 5);
    assert_eq!(effective["candidate_count"], 3);
    assert_eq!(effective["selection_policy"], "highest_ratio");
    assert_eq!(effective["generation_policy"]["mode"], "require_all");
    assert_eq!(effective["embedding_model"], "text-embedding-3-small");
    assert_eq!(effective["retry"]["base_delay_ms"], 500);
}

#[test]
fn check_config_rejects_invalid_values() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    std::fs::write(&config_path, r#"{"candidate_count": 7}"#).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_veracity"))
        .arg("check-config")
        .arg("--config")
        .arg(&config_path)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("candidate_count"));
}

#[test]
fn score_rejects_short_source_before_calling_providers() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("doc.txt");
    let out = dir.path().join("report.json");
    std::fs::write(&input, "Too short.").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_veracity"))
        .arg("score")
        .arg("--input")
        .arg(&input)
        .arg("--out")
        .arg(&out)
        .env_remove("OPENROUTER_API_KEY")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("TooShort"));
    assert!(!out.exists());
}
