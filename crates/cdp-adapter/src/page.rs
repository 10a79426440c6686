//! Single-page driver on top of a [`CdpTransport`].
//!
//! A [`PageSession`] attaches to one page target with a flattened CDP session, keeps a background
//! task that routes that session's events into the network tap and the response bus, and offers the
//! small set of primitives the storefront adapters need: lifecycle-aware navigation, selector
//! polling, trusted mouse clicks, text entry, script evaluation, emulation overrides and access to
//! captured response bodies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use network_tap_light::{NetworkTapLight, TapEvent};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::commands::{Anchor, LifecycleEvent, NavigationWait, ResponseEvent, SelectorState};
use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::ids::PageId;
use crate::metrics;
use crate::registry::RequestRegistry;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Operations a storefront adapter may perform on a browser page.
#[async_trait]
pub trait PageDriver: Send + Sync {
    fn id(&self) -> PageId;

    /// Navigates and waits for the requested lifecycle milestone of the new document.
    async fn navigate(
        &self,
        url: &str,
        wait: NavigationWait,
        timeout: Duration,
    ) -> Result<(), AdapterError>;

    async fn reload(&self, wait: NavigationWait, timeout: Duration) -> Result<(), AdapterError>;

    async fn current_url(&self) -> Result<String, AdapterError>;

    /// Evaluates an expression (promises are awaited) and returns its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<Value, AdapterError>;

    async fn exists(&self, selector: &str) -> Result<bool, AdapterError>;

    /// Polls until the selector reaches `state`; `Ok(false)` when the timeout elapses first.
    async fn wait_for_selector(
        &self,
        selector: &str,
        state: SelectorState,
        timeout: Duration,
    ) -> Result<bool, AdapterError>;

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), AdapterError>;

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        per_char_delay: Duration,
    ) -> Result<(), AdapterError>;

    async fn text_content(&self, selector: &str) -> Result<Option<String>, AdapterError>;

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), AdapterError>;

    async fn set_user_agent(
        &self,
        user_agent: &str,
        accept_language: Option<&str>,
        platform: Option<&str>,
    ) -> Result<(), AdapterError>;

    async fn set_timezone(&self, timezone: &str) -> Result<(), AdapterError>;

    /// Registers a script that runs before any page script on every new document.
    async fn add_init_script(&self, source: &str) -> Result<(), AdapterError>;

    fn subscribe_responses(&self) -> broadcast::Receiver<ResponseEvent>;

    async fn response_body(&self, request_id: &str) -> Result<String, AdapterError>;

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), AdapterError>;

    /// Closes the page and releases the browser behind it. Safe to call more than once.
    async fn close(&self) -> Result<(), AdapterError>;

    /// False after `close` or once the browser connection has dropped.
    fn is_alive(&self) -> bool;
}

/// A page target attached over a flattened session.
pub struct PageSession {
    id: PageId,
    transport: Arc<dyn CdpTransport>,
    session_id: String,
    target_id: String,
    main_frame: String,
    tap: Arc<NetworkTapLight>,
    registry: Arc<RequestRegistry>,
    responses: broadcast::Sender<ResponseEvent>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    cancel: CancellationToken,
    event_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl PageSession {
    /// Launches a dedicated browser process and attaches to its first page.
    pub async fn launch(cfg: CdpConfig) -> Result<Self, AdapterError> {
        let transport: Arc<dyn CdpTransport> = Arc::new(ChromiumTransport::new(cfg));
        match Self::attach(transport.clone()).await {
            Ok(page) => Ok(page),
            Err(err) => {
                let _ = transport.shutdown().await;
                Err(err)
            }
        }
    }

    pub async fn attach(transport: Arc<dyn CdpTransport>) -> Result<Self, AdapterError> {
        transport.start().await?;

        let target_id = Self::resolve_page_target(transport.as_ref()).await?;
        let attached = transport
            .send_command(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::CdpIo)
                    .with_hint("attachToTarget returned no sessionId")
                    .with_data(attached.clone())
            })?;

        let tap = NetworkTapLight::default();
        let (responses, _) = broadcast::channel(256);
        let (lifecycle, _) = broadcast::channel(128);

        let mut page = Self {
            id: PageId::new(),
            transport,
            session_id,
            main_frame: target_id.clone(),
            target_id,
            tap: Arc::new(tap),
            registry: Arc::new(RequestRegistry::new()),
            responses,
            lifecycle,
            cancel: CancellationToken::new(),
            event_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        };
        page.tap.enable(page.id);

        // route events before any domain starts emitting
        let task = page.spawn_event_loop();
        if let Ok(mut slot) = page.event_task.lock() {
            *slot = Some(task);
        }

        page.send_page_command("Page.enable", json!({})).await?;
        page.send_page_command(
            "Network.enable",
            json!({ "maxTotalBufferSize": 64 * 1024 * 1024, "maxResourceBufferSize": 16 * 1024 * 1024 }),
        )
        .await?;
        page.send_page_command("Runtime.enable", json!({})).await?;
        page.send_page_command("Page.setLifecycleEventsEnabled", json!({ "enabled": true }))
            .await?;

        let tree = page.send_page_command("Page.getFrameTree", json!({})).await?;
        if let Some(frame) = tree
            .get("frameTree")
            .and_then(|tree| tree.get("frame"))
            .and_then(|frame| frame.get("id"))
            .and_then(Value::as_str)
        {
            page.main_frame = frame.to_string();
        }

        metrics::page_opened();
        info!(
            target: "cdp-page",
            page = ?page.id,
            target_id = %page.target_id,
            "page session attached"
        );
        Ok(page)
    }

    async fn resolve_page_target(transport: &dyn CdpTransport) -> Result<String, AdapterError> {
        let targets = transport
            .send_command(CommandTarget::Browser, "Target.getTargets", json!({}))
            .await?;
        let existing = targets
            .get("targetInfos")
            .and_then(Value::as_array)
            .and_then(|infos| {
                infos.iter().find(|info| {
                    info.get("type").and_then(Value::as_str) == Some("page")
                })
            })
            .and_then(|info| info.get("targetId"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(target_id) = existing {
            return Ok(target_id);
        }

        let created = transport
            .send_command(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": "about:blank" }),
            )
            .await?;
        created
            .get("targetId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::TargetNotFound)
                    .with_hint("browser exposed no page target")
            })
    }

    fn spawn_event_loop(&self) -> JoinHandle<()> {
        let router = EventRouter {
            page: self.id,
            session_id: self.session_id.clone(),
            tap: self.tap.clone(),
            registry: self.registry.clone(),
            responses: self.responses.clone(),
            lifecycle: self.lifecycle.clone(),
        };
        let transport = self.transport.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = transport.next_event() => match event {
                        Some(event) => router.route(event).await,
                        None => {
                            debug!(target: "cdp-page", page = ?router.page, "event stream ended");
                            break;
                        }
                    },
                }
            }
        })
    }

    async fn send_page_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo).with_hint("page closed"));
        }
        let start = Instant::now();
        metrics::record_command(method);
        match self
            .transport
            .send_command(CommandTarget::Session(self.session_id.clone()), method, params)
            .await
        {
            Ok(value) => {
                metrics::record_command_success(method, start.elapsed());
                Ok(value)
            }
            Err(err) => {
                metrics::record_command_failure(method);
                Err(err)
            }
        }
    }

    async fn wait_for_lifecycle(
        &self,
        rx: &mut broadcast::Receiver<LifecycleEvent>,
        loader_id: Option<String>,
        name: &str,
    ) -> Result<(), AdapterError> {
        // Without a loader id (reload), the first "init" on the main frame names the new document.
        let loader_id = match loader_id {
            Some(id) => id,
            None => loop {
                let event = Self::next_lifecycle(rx).await?;
                if event.frame_id == self.main_frame && event.name == "init" {
                    break event.loader_id;
                }
            },
        };
        loop {
            let event = Self::next_lifecycle(rx).await?;
            if event.frame_id == self.main_frame
                && event.loader_id == loader_id
                && event.name == name
            {
                return Ok(());
            }
        }
    }

    async fn next_lifecycle(
        rx: &mut broadcast::Receiver<LifecycleEvent>,
    ) -> Result<LifecycleEvent, AdapterError> {
        loop {
            match rx.recv().await {
                Ok(event) => return Ok(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "cdp-page", skipped, "lifecycle receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                        .with_hint("lifecycle stream closed"));
                }
            }
        }
    }

    async fn evaluate_raw(&self, expression: &str) -> Result<Value, AdapterError> {
        let response = self
            .send_page_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(details) = response.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|ex| ex.get("description"))
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("uncaught exception");
            return Err(AdapterError::new(AdapterErrorKind::Script).with_hint(text.to_string()));
        }
        Ok(response
            .get("result")
            .and_then(|res| res.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn resolve_anchor(&self, selector_literal: &str) -> Result<Option<Anchor>, AdapterError> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({selector}); if (!el) return null; \
             el.scrollIntoView({{ block: 'center', inline: 'center' }}); \
             const r = el.getBoundingClientRect(); \
             if (r.width <= 0 || r.height <= 0) return null; \
             return {{ x: r.left + r.width / 2, y: r.top + r.height / 2 }}; }})()",
            selector = selector_literal
        );
        let value = self.evaluate_raw(&expression).await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(serde_json::from_value(value).ok())
    }

    async fn dispatch_mouse(&self, kind: &str, anchor: &Anchor) -> Result<(), AdapterError> {
        self.send_page_command(
            "Input.dispatchMouseEvent",
            json!({
                "type": kind,
                "x": anchor.x,
                "y": anchor.y,
                "button": "left",
                "buttons": 1,
                "clickCount": 1,
                "pointerType": "mouse",
            }),
        )
        .await?;
        Ok(())
    }

    fn abort_event_task(&self) {
        if let Ok(mut slot) = self.event_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

fn selector_literal(selector: &str) -> Result<String, AdapterError> {
    serde_json::to_string(selector)
        .map_err(|err| AdapterError::new(AdapterErrorKind::Internal).with_hint(err.to_string()))
}

fn selector_state_expression(selector_literal: &str, state: SelectorState) -> String {
    let visible = format!(
        "(() => {{ const el = document.querySelector({selector}); if (!el) return false; \
         const s = window.getComputedStyle(el); const r = el.getBoundingClientRect(); \
         return s.display !== 'none' && s.visibility !== 'hidden' && r.width > 0 && r.height > 0; }})()",
        selector = selector_literal
    );
    match state {
        SelectorState::Attached => format!("!!document.querySelector({selector_literal})"),
        SelectorState::Visible => visible,
        SelectorState::Hidden => format!("!{visible}"),
    }
}

fn nav_timeout(url: &str, timeout: Duration) -> AdapterError {
    AdapterError::new(AdapterErrorKind::NavTimeout)
        .with_hint(format!(
            "navigation to {url} exceeded {} ms",
            timeout.as_millis()
        ))
        .retriable(true)
}

#[async_trait]
impl PageDriver for PageSession {
    fn id(&self) -> PageId {
        self.id
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.transport.is_connected()
    }

    async fn navigate(
        &self,
        url: &str,
        wait: NavigationWait,
        timeout: Duration,
    ) -> Result<(), AdapterError> {
        let mut rx = self.lifecycle.subscribe();
        self.registry.clear();
        let flow = async {
            let response = self
                .send_page_command("Page.navigate", json!({ "url": url }))
                .await?;
            if let Some(error) = response
                .get("errorText")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
            {
                return Err(AdapterError::new(AdapterErrorKind::NavFailed)
                    .with_hint(format!("{error} while loading {url}"))
                    .retriable(true));
            }
            match response.get("loaderId").and_then(Value::as_str) {
                Some(loader) => {
                    self.wait_for_lifecycle(&mut rx, Some(loader.to_string()), wait.lifecycle_name())
                        .await
                }
                // same-document navigation
                None => Ok(()),
            }
        };
        let result = tokio::time::timeout(timeout, flow)
            .await
            .map_err(|_| nav_timeout(url, timeout))?;
        debug!(target: "cdp-page", page = ?self.id, %url, ?wait, ok = result.is_ok(), "navigate");
        result
    }

    async fn reload(&self, wait: NavigationWait, timeout: Duration) -> Result<(), AdapterError> {
        let mut rx = self.lifecycle.subscribe();
        self.registry.clear();
        let flow = async {
            self.send_page_command("Page.reload", json!({})).await?;
            self.wait_for_lifecycle(&mut rx, None, wait.lifecycle_name())
                .await
        };
        tokio::time::timeout(timeout, flow)
            .await
            .map_err(|_| nav_timeout("current page", timeout))?
    }

    async fn current_url(&self) -> Result<String, AdapterError> {
        let value = self.evaluate_raw("window.location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, AdapterError> {
        self.evaluate_raw(expression).await
    }

    async fn exists(&self, selector: &str) -> Result<bool, AdapterError> {
        let literal = selector_literal(selector)?;
        let expression = selector_state_expression(&literal, SelectorState::Attached);
        Ok(self.evaluate_raw(&expression).await?.as_bool().unwrap_or(false))
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: SelectorState,
        timeout: Duration,
    ) -> Result<bool, AdapterError> {
        let literal = selector_literal(selector)?;
        let expression = selector_state_expression(&literal, state);
        let deadline = Instant::now() + timeout;
        loop {
            match self.evaluate_raw(&expression).await {
                Ok(value) if value.as_bool() == Some(true) => return Ok(true),
                Ok(_) => {}
                // a document swap mid-poll destroys the execution context
                Err(err) if matches!(err.kind, AdapterErrorKind::Script) => {
                    trace!(target: "cdp-page", %selector, ?err, "selector poll failed");
                }
                Err(err) => return Err(err),
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), AdapterError> {
        let literal = selector_literal(selector)?;
        let deadline = Instant::now() + timeout;
        let anchor = loop {
            match self.resolve_anchor(&literal).await {
                Ok(Some(anchor)) => break anchor,
                Ok(None) => {}
                Err(err) if matches!(err.kind, AdapterErrorKind::Script) => {}
                Err(err) => return Err(err),
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                    .with_hint(format!("click target not found for selector '{selector}'")));
            }
            sleep(POLL_INTERVAL).await;
        };

        self.dispatch_mouse("mouseMoved", &anchor).await?;
        self.dispatch_mouse("mousePressed", &anchor).await?;
        self.dispatch_mouse("mouseReleased", &anchor).await?;
        Ok(())
    }

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        per_char_delay: Duration,
    ) -> Result<(), AdapterError> {
        let literal = selector_literal(selector)?;
        let focus_expression = format!(
            "(() => {{ const el = document.querySelector({literal}); if (!el) return 'not-found'; \
             if (typeof el.focus === 'function') el.focus(); return 'focused'; }})()"
        );
        let status = self.evaluate_raw(&focus_expression).await?;
        if status.as_str() != Some("focused") {
            return Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("selector '{selector}' not found for typing")));
        }

        if per_char_delay.is_zero() {
            self.send_page_command("Input.insertText", json!({ "text": text }))
                .await?;
            return Ok(());
        }
        for ch in text.chars() {
            self.send_page_command("Input.insertText", json!({ "text": ch.to_string() }))
                .await?;
            sleep(per_char_delay).await;
        }
        Ok(())
    }

    async fn text_content(&self, selector: &str) -> Result<Option<String>, AdapterError> {
        let literal = selector_literal(selector)?;
        let expression = format!(
            "(() => {{ const el = document.querySelector({literal}); return el ? el.textContent : null; }})()"
        );
        let value = self.evaluate_raw(&expression).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), AdapterError> {
        self.send_page_command(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1,
                "mobile": false,
            }),
        )
        .await?;
        Ok(())
    }

    async fn set_user_agent(
        &self,
        user_agent: &str,
        accept_language: Option<&str>,
        platform: Option<&str>,
    ) -> Result<(), AdapterError> {
        let mut params = serde_json::Map::new();
        params.insert("userAgent".into(), Value::String(user_agent.to_string()));
        if let Some(lang) = accept_language {
            params.insert("acceptLanguage".into(), Value::String(lang.to_string()));
        }
        if let Some(platform) = platform {
            params.insert("platform".into(), Value::String(platform.to_string()));
        }
        self.send_page_command("Emulation.setUserAgentOverride", Value::Object(params))
            .await?;
        Ok(())
    }

    async fn set_timezone(&self, timezone: &str) -> Result<(), AdapterError> {
        self.send_page_command(
            "Emulation.setTimezoneOverride",
            json!({ "timezoneId": timezone }),
        )
        .await?;
        Ok(())
    }

    async fn add_init_script(&self, source: &str) -> Result<(), AdapterError> {
        self.send_page_command(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": source }),
        )
        .await?;
        Ok(())
    }

    fn subscribe_responses(&self) -> broadcast::Receiver<ResponseEvent> {
        self.responses.subscribe()
    }

    async fn response_body(&self, request_id: &str) -> Result<String, AdapterError> {
        let response = self
            .send_page_command("Network.getResponseBody", json!({ "requestId": request_id }))
            .await?;
        let body = response
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let encoded = response
            .get("base64Encoded")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !encoded {
            return Ok(body.to_string());
        }
        let bytes = STANDARD.decode(body).map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("response body is not valid base64: {err}"))
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), AdapterError> {
        let deadline = Instant::now() + timeout;
        loop {
            let idle = self.tap.is_idle(self.id).map_err(|err| {
                AdapterError::new(AdapterErrorKind::Internal).with_hint(err.to_string())
            })?;
            if idle {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                    .with_hint("network idle wait timed out")
                    .retriable(true));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn close(&self) -> Result<(), AdapterError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        if let Err(err) = self
            .transport
            .send_command(CommandTarget::Browser, "Browser.close", json!({}))
            .await
        {
            // the process may already be gone
            debug!(target: "cdp-page", page = ?self.id, ?err, "Browser.close failed");
        }
        let shutdown = self.transport.shutdown().await;
        self.abort_event_task();
        let _ = self.tap.disable(self.id);
        self.registry.clear();
        metrics::page_closed();
        info!(target: "cdp-page", page = ?self.id, "page session closed");
        shutdown
    }
}

impl Drop for PageSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.abort_event_task();
    }
}

/// Routes one session's transport events into the tap, request registry and broadcast buses.
struct EventRouter {
    page: PageId,
    session_id: String,
    tap: Arc<NetworkTapLight>,
    registry: Arc<RequestRegistry>,
    responses: broadcast::Sender<ResponseEvent>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
}

impl EventRouter {
    async fn route(&self, event: TransportEvent) {
        if event.session_id.as_deref() != Some(self.session_id.as_str()) {
            return;
        }
        metrics::record_event();
        let params = &event.params;
        let request_id = params
            .get("requestId")
            .and_then(Value::as_str)
            .unwrap_or_default();

        match event.method.as_str() {
            "Page.lifecycleEvent" => {
                let lifecycle = LifecycleEvent {
                    frame_id: str_field(params, "frameId"),
                    loader_id: str_field(params, "loaderId"),
                    name: str_field(params, "name"),
                };
                let _ = self.lifecycle.send(lifecycle);
            }
            "Network.requestWillBeSent" => {
                let url = params
                    .get("request")
                    .and_then(|req| req.get("url"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let kind = params.get("type").and_then(Value::as_str);
                self.registry.on_request(request_id, url, kind);
                self.ingest(TapEvent::RequestWillBeSent);
            }
            "Network.responseReceived" => {
                let response = params.get("response").cloned().unwrap_or(Value::Null);
                let status = response.get("status").and_then(Value::as_f64).unwrap_or(0.0) as i64;
                let url = response.get("url").and_then(Value::as_str).unwrap_or_default();
                let mime = response
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let kind = params.get("type").and_then(Value::as_str);
                self.registry.on_response(request_id, url, kind, status, mime);
                self.ingest(TapEvent::ResponseReceived { status });
            }
            "Network.loadingFinished" => {
                if let Some(response) = self.registry.on_finished(request_id) {
                    trace!(target: "cdp-page", url = %response.url, status = response.status, "response finished");
                    let _ = self.responses.send(response);
                }
                self.ingest(TapEvent::LoadingFinished);
            }
            "Network.loadingFailed" => {
                self.registry.on_failed(request_id);
                self.ingest(TapEvent::LoadingFailed);
            }
            _ => {}
        }
    }

    fn ingest(&self, event: TapEvent) {
        if let Err(err) = self.tap.ingest(self.page, event) {
            trace!(target: "cdp-page", ?err, "tap ingest skipped");
        }
    }
}

fn str_field(params: &Value, key: &str) -> String {
    params
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
