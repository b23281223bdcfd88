//! Runs the whole tool from files on disk, the way the binary does.

use std::path::Path;

use courier::{app, settings::Settings};
use courier_common::Signal;
use courier_testing::MockSmtpServer;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::broadcast;

const LIST: &str = r#"[
    {"email": "ada@example.com", "name": "Ada", "company": "Engines"},
    {"email": "grace@example.com", "name": "Grace", "company": "Navy"},
    {"email": "edsger@example.com", "name": "Edsger"}
]"#;

fn shutdown() -> broadcast::Sender<Signal> {
    broadcast::channel(4).0
}

/// Write the inputs into `dir` and point fresh settings at them.
fn settings_in(dir: &Path, text_template: &str) -> Settings {
    std::fs::write(dir.join("issue.txt"), text_template).unwrap();
    std::fs::write(dir.join("issue.html"), "<p>Hi {{ name }}</p>").unwrap();
    std::fs::write(dir.join("params.json"), r#"{"Issue": 7}"#).unwrap();
    std::fs::write(dir.join("list.json"), LIST).unwrap();

    let mut settings = Settings::default();
    let campaign = &mut settings.campaign;
    campaign.subject = "Issue 7".to_string();
    campaign.from_email = "news@example.com".to_string();
    campaign.from_name = "The Listing".to_string();
    campaign.txt_template = Some(dir.join("issue.txt"));
    campaign.html_template = Some(dir.join("issue.html"));
    campaign.params = dir.join("params.json");
    campaign.list = dir.join("list.json");
    campaign.rate = 1000.0;
    campaign.failures = Some(dir.join("failures.json"));
    settings.smtp.dial.interval_ms = 10;
    settings
}

fn read_failures(dir: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(dir.join("failures.json")).unwrap()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dry_run_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let mut settings = settings_in(dir.path(), "Issue {{ Params.Issue }} for {{ name }}");
    settings.campaign.dry_run = true;
    settings.campaign.out.clone_from(&out);

    let report = app::run(&settings, &shutdown()).await.unwrap();
    assert_eq!(report.delivered, 3);

    let mut files: Vec<_> = std::fs::read_dir(&out)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(
        files,
        ["ada@example.com", "edsger@example.com", "grace@example.com"]
    );
    assert_eq!(read_failures(dir.path()), json!({"failed": [], "abandoned": []}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rejected_recipient_lands_in_failure_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockSmtpServer::builder()
        .with_rejected_recipient("grace@example.com")
        .build()
        .await
        .unwrap();

    let mut settings = settings_in(dir.path(), "Hi {{ name }}");
    settings.smtp.url = Some(server.url());
    settings.campaign.workers = 1;

    let report = app::run(&settings, &shutdown()).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(server.messages().await.len(), 2);

    let failures = read_failures(dir.path());
    let failed = failures["failed"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["email"], "grace@example.com");
    assert_eq!(failed[0]["name"], "Grace");
    assert_eq!(failed[0]["position"], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_render_abort_fails_after_writing_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let mut settings = settings_in(dir.path(), "{{ name }} works at {{ company }}");
    settings.campaign.dry_run = true;
    settings.campaign.out.clone_from(&out);
    settings.campaign.strict = true;

    let err = app::run(&settings, &shutdown()).await.unwrap_err();
    assert!(format!("{err:#}").contains("edsger@example.com"), "{err:#}");

    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 2);
    assert_eq!(read_failures(dir.path()), json!({"failed": [], "abandoned": []}));
}

#[tokio::test]
async fn test_unreachable_server_fails_without_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_in(dir.path(), "Hi {{ name }}");
    settings.smtp.url = Some("smtp://127.0.0.1:1".to_string());
    settings.smtp.dial.attempts = 1;

    assert!(app::run(&settings, &shutdown()).await.is_err());
    assert!(!dir.path().join("failures.json").exists());
}
