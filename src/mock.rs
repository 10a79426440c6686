//! Scriptable stand-ins for the browser layer, used by unit and integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{
    ids::PageId, AdapterError, AdapterErrorKind, NavigationWait, PageDriver, ResponseEvent,
    SelectorState,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use cartscout_core_types::{ProductRecord, Target};

use crate::errors::{ScoutError, ScoutResult};
use crate::pool::ContextLauncher;
use crate::targets::{self, TargetAdapter, TargetDescriptor};

#[derive(Default)]
struct PageScript {
    url: String,
    present: HashSet<String>,
    texts: HashMap<String, String>,
    scripts: Vec<(String, Value)>,
    payloads: Vec<(ResponseEvent, String)>,
    redirect: Option<String>,
    fail_navigation: bool,
    calls: Vec<String>,
}

/// A fake page: selectors, texts and script results are declared up front.
pub struct MockPage {
    id: PageId,
    script: Mutex<PageScript>,
    responses: broadcast::Sender<ResponseEvent>,
    closed: AtomicBool,
    connected: AtomicBool,
}

impl Default for MockPage {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPage {
    pub fn new() -> Self {
        let (responses, _) = broadcast::channel(32);
        Self {
            id: PageId::new(),
            script: Mutex::new(PageScript {
                url: "about:blank".into(),
                ..PageScript::default()
            }),
            responses,
            closed: AtomicBool::new(false),
            connected: AtomicBool::new(true),
        }
    }

    pub fn with_selector(self, selector: &str) -> Self {
        self.script.lock().present.insert(selector.to_string());
        self
    }

    pub fn with_text(self, selector: &str, text: &str) -> Self {
        self.script
            .lock()
            .texts
            .insert(selector.to_string(), text.to_string());
        self
    }

    /// Any evaluated expression containing `fragment` yields `value`.
    pub fn with_script(self, fragment: &str, value: Value) -> Self {
        self.script
            .lock()
            .scripts
            .push((fragment.to_string(), value));
        self
    }

    /// Rendered cards returned to the DOM extraction script.
    pub fn with_cards(self, cards: Value) -> Self {
        self.with_script("layout.idAttrs", cards)
    }

    /// A data-fetch response emitted on every navigation.
    pub fn with_payload(self, url: &str, body: &Value) -> Self {
        {
            let mut script = self.script.lock();
            let request_id = format!("req-{}", script.payloads.len() + 1);
            script.payloads.push((
                ResponseEvent {
                    request_id,
                    url: url.to_string(),
                    resource_type: "XHR".into(),
                    status: 200,
                    mime_type: "application/json".into(),
                },
                body.to_string(),
            ));
        }
        self
    }

    /// Every navigation lands on `url` instead of the requested one.
    pub fn redirecting_to(self, url: &str) -> Self {
        self.script.lock().redirect = Some(url.to_string());
        self
    }

    pub fn failing_navigation(self) -> Self {
        self.script.lock().fail_navigation = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.script.lock().calls.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Behaves like a browser process that died underneath the page.
    pub fn crash(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn record(&self, call: String) {
        self.script.lock().calls.push(call);
    }

    fn has(&self, selector: &str) -> bool {
        let script = self.script.lock();
        script.present.contains(selector) || script.texts.contains_key(selector)
    }
}

#[async_trait]
impl PageDriver for MockPage {
    fn id(&self) -> PageId {
        self.id
    }

    async fn navigate(
        &self,
        url: &str,
        _wait: NavigationWait,
        _timeout: Duration,
    ) -> Result<(), AdapterError> {
        self.record(format!("navigate {url}"));
        let events = {
            let mut script = self.script.lock();
            if script.fail_navigation {
                return Err(AdapterError::new(AdapterErrorKind::NavTimeout).with_hint(url));
            }
            script.url = script.redirect.clone().unwrap_or_else(|| url.to_string());
            script
                .payloads
                .iter()
                .map(|(event, _)| event.clone())
                .collect::<Vec<_>>()
        };
        for event in events {
            let _ = self.responses.send(event);
        }
        Ok(())
    }

    async fn reload(&self, _wait: NavigationWait, _timeout: Duration) -> Result<(), AdapterError> {
        self.record("reload".into());
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AdapterError> {
        Ok(self.script.lock().url.clone())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, AdapterError> {
        let script = self.script.lock();
        Ok(script
            .scripts
            .iter()
            .find(|(fragment, _)| expression.contains(fragment.as_str()))
            .map(|(_, value)| value.clone())
            .unwrap_or(Value::Null))
    }

    async fn exists(&self, selector: &str) -> Result<bool, AdapterError> {
        Ok(self.has(selector))
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: SelectorState,
        _timeout: Duration,
    ) -> Result<bool, AdapterError> {
        let present = self.has(selector);
        Ok(match state {
            SelectorState::Attached | SelectorState::Visible => present,
            SelectorState::Hidden => !present,
        })
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> Result<(), AdapterError> {
        if !self.has(selector) {
            return Err(AdapterError::new(AdapterErrorKind::TargetNotFound).with_hint(selector));
        }
        self.record(format!("click {selector}"));
        Ok(())
    }

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        _per_char_delay: Duration,
    ) -> Result<(), AdapterError> {
        self.record(format!("type {selector} {text}"));
        Ok(())
    }

    async fn text_content(&self, selector: &str) -> Result<Option<String>, AdapterError> {
        Ok(self.script.lock().texts.get(selector).cloned())
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), AdapterError> {
        self.record(format!("viewport {width}x{height}"));
        Ok(())
    }

    async fn set_user_agent(
        &self,
        user_agent: &str,
        _accept_language: Option<&str>,
        _platform: Option<&str>,
    ) -> Result<(), AdapterError> {
        self.record(format!("user-agent {user_agent}"));
        Ok(())
    }

    async fn set_timezone(&self, timezone: &str) -> Result<(), AdapterError> {
        self.record(format!("timezone {timezone}"));
        Ok(())
    }

    async fn add_init_script(&self, _source: &str) -> Result<(), AdapterError> {
        self.record("init-script".into());
        Ok(())
    }

    fn subscribe_responses(&self) -> broadcast::Receiver<ResponseEvent> {
        self.responses.subscribe()
    }

    async fn response_body(&self, request_id: &str) -> Result<String, AdapterError> {
        self.script
            .lock()
            .payloads
            .iter()
            .find(|(event, _)| event.request_id == request_id)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| AdapterError::new(AdapterErrorKind::CdpIo).with_hint("no body"))
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        !self.is_closed() && self.connected.load(Ordering::SeqCst)
    }
}

type PageFactory = Box<dyn Fn(Target) -> MockPage + Send + Sync>;

/// Hands out [`MockPage`]s and remembers every one it launched.
pub struct MockLauncher {
    factory: PageFactory,
    failing: HashSet<Target>,
    delays: HashMap<Target, Duration>,
    launches: AtomicUsize,
    pages: Mutex<Vec<(Target, Arc<MockPage>)>>,
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::with_factory(|_| MockPage::new())
    }

    pub fn with_factory(factory: impl Fn(Target) -> MockPage + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            failing: HashSet::new(),
            delays: HashMap::new(),
            launches: AtomicUsize::new(0),
            pages: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_for(mut self, target: Target) -> Self {
        self.failing.insert(target);
        self
    }

    /// Launches for `target` take `delay` before they settle.
    pub fn slow_for(mut self, target: Target, delay: Duration) -> Self {
        self.delays.insert(target, delay);
        self
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn pages(&self) -> Vec<Arc<MockPage>> {
        self.pages.lock().iter().map(|(_, page)| page.clone()).collect()
    }

    pub fn page_for(&self, target: Target) -> Option<Arc<MockPage>> {
        self.pages
            .lock()
            .iter()
            .rev()
            .find(|(launched, _)| *launched == target)
            .map(|(_, page)| page.clone())
    }
}

#[async_trait]
impl ContextLauncher for MockLauncher {
    async fn launch(&self, target: Target) -> ScoutResult<Arc<dyn PageDriver>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&target) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&target) {
            return Err(ScoutError::Launch {
                target,
                source: AdapterError::new(AdapterErrorKind::LaunchFailed)
                    .with_hint("chrome not found"),
            });
        }
        let page = Arc::new((self.factory)(target));
        self.pages.lock().push((target, page.clone()));
        Ok(page)
    }
}

/// Adapter with the stock descriptor and search flow but a canned locality answer.
pub struct MockTarget {
    descriptor: &'static TargetDescriptor,
    location_title: Option<String>,
}

impl MockTarget {
    pub fn new(target: Target, location_title: Option<&str>) -> Self {
        Self {
            descriptor: targets::descriptor_for(target),
            location_title: location_title.map(str::to_string),
        }
    }
}

#[async_trait]
impl TargetAdapter for MockTarget {
    fn descriptor(&self) -> &'static TargetDescriptor {
        self.descriptor
    }

    fn extract_structured(&self, payload: &Value) -> Vec<ProductRecord> {
        targets::product_snippets(payload)
            .into_iter()
            .filter_map(|(index, data)| targets::flat_snippet_record(self.descriptor, index, data))
            .collect()
    }

    async fn attempt_location(&self, _page: &dyn PageDriver, _location: &str) -> Option<String> {
        self.location_title.clone()
    }
}
