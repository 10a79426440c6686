//! Drives a real Chromium through [`PageSession`]. Skipped unless `CARTSCOUT_REAL_CHROME=1`.
//!
//! ```bash
//! CARTSCOUT_REAL_CHROME=1 CHROME_PATH=/usr/bin/chromium cargo test -p cdp-adapter --test real_chrome
//! ```

use std::env;
use std::time::Duration;

use cdp_adapter::{CdpConfig, NavigationWait, PageDriver, PageSession, SelectorState};
use serial_test::serial;

const FIXTURE: &str = "data:text/html,<html><body><h1 id='title'>Fresh Milk</h1>\
<input id='q'/><button id='go' onclick=\"document.title='clicked'\">Go</button></body></html>";

fn enabled() -> bool {
    env::var("CARTSCOUT_REAL_CHROME")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn config() -> (CdpConfig, tempfile::TempDir) {
    let profile = tempfile::tempdir().expect("temporary profile");
    let cfg = CdpConfig {
        headless: true,
        user_data_dir: Some(profile.path().to_path_buf()),
        ..CdpConfig::default()
    };
    (cfg, profile)
}

#[tokio::test]
#[serial]
async fn navigates_and_reads_the_page() {
    if !enabled() {
        eprintln!("skipping real browser test (CARTSCOUT_REAL_CHROME not set)");
        return;
    }
    let (cfg, _profile) = config();
    let page = PageSession::launch(cfg).await.expect("launch chromium");

    page.navigate(FIXTURE, NavigationWait::Load, Duration::from_secs(15))
        .await
        .expect("navigate");

    assert!(page.exists("#title").await.unwrap());
    assert!(!page.exists("#missing").await.unwrap());
    assert_eq!(
        page.text_content("#title").await.unwrap().as_deref(),
        Some("Fresh Milk")
    );
    let sum = page.evaluate("1 + 2").await.unwrap();
    assert_eq!(sum.as_i64(), Some(3));

    page.close().await.expect("close");
}

#[tokio::test]
#[serial]
async fn clicks_types_and_waits() {
    if !enabled() {
        eprintln!("skipping real browser test (CARTSCOUT_REAL_CHROME not set)");
        return;
    }
    let (cfg, _profile) = config();
    let page = PageSession::launch(cfg).await.expect("launch chromium");
    page.navigate(FIXTURE, NavigationWait::DomContentLoaded, Duration::from_secs(15))
        .await
        .expect("navigate");

    assert!(page
        .wait_for_selector("#go", SelectorState::Visible, Duration::from_secs(5))
        .await
        .unwrap());
    page.type_text("#q", "bread", Duration::from_millis(5))
        .await
        .expect("type");
    let typed = page
        .evaluate("document.querySelector('#q').value")
        .await
        .unwrap();
    assert_eq!(typed.as_str(), Some("bread"));

    page.click("#go", Duration::from_secs(5)).await.expect("click");
    let title = page.evaluate("document.title").await.unwrap();
    assert_eq!(title.as_str(), Some("clicked"));

    page.close().await.expect("close");
}
