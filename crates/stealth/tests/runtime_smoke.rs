use async_trait::async_trait;
use cdp_adapter::{ids::PageId, AdapterError, AdapterErrorKind};
use parking_lot::Mutex;
use stealth::{config::ProfileBundle, EvasionControl, EvasionRuntime, ProfileSink, StealthError};

struct RecordingSink {
    page: PageId,
    calls: Mutex<Vec<String>>,
    fail_scripts: bool,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            page: PageId::new(),
            calls: Mutex::new(Vec::new()),
            fail_scripts: false,
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ProfileSink for RecordingSink {
    fn page_id(&self) -> PageId {
        self.page
    }

    async fn set_user_agent(
        &self,
        user_agent: &str,
        accept_language: Option<&str>,
        _platform: Option<&str>,
    ) -> Result<(), AdapterError> {
        self.calls.lock().push(format!(
            "ua:{}|{}",
            user_agent,
            accept_language.unwrap_or_default()
        ));
        Ok(())
    }

    async fn set_timezone(&self, timezone: &str) -> Result<(), AdapterError> {
        self.calls.lock().push(format!("tz:{timezone}"));
        Ok(())
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), AdapterError> {
        self.calls.lock().push(format!("viewport:{width}x{height}"));
        Ok(())
    }

    async fn add_init_script(&self, _source: &str) -> Result<(), AdapterError> {
        if self.fail_scripts {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo).with_hint("socket gone"));
        }
        self.calls.lock().push("script".into());
        Ok(())
    }
}

#[tokio::test]
async fn applies_builtin_profile_once_per_page() {
    let runtime = EvasionRuntime::new();
    let sink = RecordingSink::new();

    let first = runtime
        .apply_profile(&sink, "https://blinkit.com")
        .await
        .expect("apply");
    let calls = sink.calls();
    assert!(calls[0].starts_with("ua:Mozilla/5.0"));
    assert!(calls[0].ends_with("|en-US,en;q=0.9"));
    assert!(calls.contains(&"viewport:1396x632".to_string()));
    assert_eq!(calls.iter().filter(|c| *c == "script").count(), 7);

    let second = runtime
        .apply_profile(&sink, "https://blinkit.com")
        .await
        .expect("apply again");
    assert_eq!(first, second);
    assert_eq!(sink.calls().len(), calls.len());

    let applied = runtime.applied_profile_for(sink.page).expect("applied");
    assert_eq!(applied.profile_name, "desktop_chrome");

    runtime.release(sink.page);
    assert!(runtime.applied_profile_for(sink.page).is_none());
}

#[tokio::test]
async fn empty_runtime_denies_application() {
    let runtime = EvasionRuntime::empty();
    let sink = RecordingSink::new();
    let err = runtime
        .apply_profile(&sink, "https://www.swiggy.com")
        .await
        .expect_err("no profiles");
    assert!(matches!(err, StealthError::PolicyDenied(_)));
}

#[tokio::test]
async fn sink_failures_surface_as_cdp_errors() {
    let runtime = EvasionRuntime::empty();
    runtime.load_bundle(ProfileBundle::builtin());
    let mut sink = RecordingSink::new();
    sink.fail_scripts = true;
    let err = runtime
        .apply_profile(&sink, "https://www.zeptonow.com/")
        .await
        .expect_err("script failure");
    assert!(matches!(err, StealthError::CdpIo(ref hint) if hint == "socket gone"));
    assert!(runtime.applied_profile_for(sink.page).is_none());
}
