//! Fixtures shared by the campaign integration tests
#![allow(dead_code)] // Not every test uses every fixture

use std::path::Path;

use courier_dispatch::{CampaignConfig, DialPolicy, RecipientRecord, Sender};
use serde_json::json;

pub const TEXT_TEMPLATE: &str = "Hello {{ name }}, welcome to issue {{ Params.Issue }}.";
pub const HTML_TEMPLATE: &str = "<p>Hello {{ Recepient.name }}, welcome to issue {{ Params.Issue }}.</p>";

pub fn recipients(count: usize) -> Vec<RecipientRecord> {
    (0..count)
        .map(|i| RecipientRecord::new(format!("reader{i}@example.com"), format!("Reader {i}")))
        .collect()
}

/// A dry-run configuration writing into `output_dir`.
pub fn dry_run_config(output_dir: &Path) -> CampaignConfig {
    let mut config = smtp_config();
    config.dry_run = true;
    config.output_dir = output_dir.to_path_buf();
    config
}

pub fn smtp_config() -> CampaignConfig {
    let mut config = CampaignConfig::new(
        Sender {
            email: "news@example.com".to_string(),
            name: "The Listing".to_string(),
        },
        "Issue 7",
        TEXT_TEMPLATE,
        HTML_TEMPLATE,
    );
    config.params = json!({"Issue": 7}).as_object().cloned().unwrap_or_default();
    config.rate = 1000.0;
    config.dial = DialPolicy {
        attempts: 2,
        interval_ms: 10,
    };
    config
}
