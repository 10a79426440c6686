//! Process-owning CDP transport.
//!
//! Every [`ChromiumTransport`] owns one Chromium process (or one external DevTools endpoint). A single
//! pump task multiplexes outgoing commands and incoming responses/events over the websocket. When the
//! connection drops the transport reports it; it never relaunches, since the page sessions that lived
//! on the old process are gone with it.

use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::util::extract_ws_url;

const BASE_FLAGS: &[&str] = &[
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-breakpad",
    "--disable-component-update",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-hang-monitor",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-sync",
    "--no-first-run",
    "--no-default-browser-check",
    "--password-store=basic",
    "--remote-allow-origins=*",
    "--use-mock-keychain",
];
const HEADLESS_FLAGS: &[&str] = &["--headless=new", "--hide-scrollbars", "--mute-audio"];
const HEARTBEAT_REPLY_CAP: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
    /// Tears down the connection and any browser process owned by the transport.
    async fn shutdown(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    /// False once the connection has been shut down or the browser has gone away.
    fn is_connected(&self) -> bool {
        true
    }
}

fn io_error(hint: impl Into<String>) -> AdapterError {
    AdapterError::new(AdapterErrorKind::CdpIo).with_hint(hint)
}

pub struct ChromiumTransport {
    cfg: CdpConfig,
    runtime: Mutex<Option<Arc<Runtime>>>,
    closed: AtomicBool,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        Self {
            cfg,
            runtime: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.cfg.default_deadline_ms)
    }

    async fn runtime(&self) -> Result<Arc<Runtime>, AdapterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io_error("transport closed"));
        }
        match self.runtime.lock().await.as_ref() {
            Some(runtime) if runtime.is_alive() => Ok(runtime.clone()),
            Some(_) => Err(io_error("browser connection lost").retriable(false)),
            None => Err(io_error("transport not started")),
        }
    }

    #[cfg(test)]
    fn with_runtime(cfg: CdpConfig, runtime: Arc<Runtime>) -> Self {
        Self {
            cfg,
            runtime: Mutex::new(Some(runtime)),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io_error("transport closed"));
        }
        let mut slot = self.runtime.lock().await;
        if slot.as_ref().is_some_and(|runtime| runtime.is_alive()) {
            return Ok(());
        }

        let runtime = Arc::new(Runtime::start(&self.cfg).await?);
        runtime
            .call(
                CommandTarget::Browser,
                "Target.setDiscoverTargets",
                json!({ "discover": true }),
                self.deadline(),
            )
            .await?;
        *slot = Some(runtime);
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.runtime().await {
            Ok(runtime) => runtime.next_event().await,
            Err(err) => {
                debug!(target: "cdp-transport", %err, "no event source");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.runtime()
            .await?
            .call(target, method, params, self.deadline())
            .await
    }

    fn is_connected(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        // a held lock means start or a call is in flight
        match self.runtime.try_lock() {
            Ok(slot) => slot.as_ref().is_some_and(|runtime| runtime.is_alive()),
            Err(_) => true,
        }
    }

    async fn shutdown(&self) -> Result<(), AdapterError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(runtime) = self.runtime.lock().await.take() {
            runtime.terminate().await;
        }
        Ok(())
    }
}

type Responder = oneshot::Sender<Result<Value, AdapterError>>;

struct Outgoing {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: Responder,
}

/// Queues one command on the pump and waits up to `deadline` for its reply.
async fn request(
    commands: &mpsc::Sender<Outgoing>,
    target: CommandTarget,
    method: &str,
    params: Value,
    deadline: Duration,
) -> Result<Value, AdapterError> {
    let (responder, reply) = oneshot::channel();
    commands
        .send(Outgoing {
            target,
            method: method.to_string(),
            params,
            responder,
        })
        .await
        .map_err(|_| io_error("command pump stopped"))?;

    match tokio::time::timeout(deadline, reply).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(io_error("command dropped before a reply arrived")),
        Err(_) => Err(AdapterError::new(AdapterErrorKind::NavTimeout)
            .with_hint(format!("{method} timed out"))),
    }
}

/// A running browser connection: the pump, the optional heartbeat and what must be cleaned up.
struct Runtime {
    commands: mpsc::Sender<Outgoing>,
    events: Mutex<mpsc::Receiver<TransportEvent>>,
    pump: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
    child: Mutex<Option<Child>>,
    scratch_profile: Option<PathBuf>,
    alive: Arc<AtomicBool>,
}

impl Runtime {
    async fn start(cfg: &CdpConfig) -> Result<Self, AdapterError> {
        let launched = match &cfg.websocket_url {
            Some(url) => Launched::external(url.clone()),
            None => Launched::spawn(cfg).await?,
        };

        let conn = match Connection::<CdpEventMessage>::connect(&launched.ws_url).await {
            Ok(conn) => conn,
            Err(err) => {
                launched.discard().await;
                return Err(io_error(err.to_string()));
            }
        };
        info!(target: "cdp-transport", url = %launched.ws_url, "chromium connection established");

        let (commands, command_rx) = mpsc::channel(128);
        let (events_tx, events) = mpsc::channel(512);
        let alive = Arc::new(AtomicBool::new(true));

        let pump = {
            let alive = alive.clone();
            let pump = Pump {
                conn,
                pending: HashMap::new(),
                events: events_tx,
            };
            tokio::spawn(async move {
                if let Err(err) = pump.run(command_rx).await {
                    error!(target: "cdp-transport", %err, "command pump stopped");
                }
                alive.store(false, Ordering::SeqCst);
            })
        };
        let heartbeat = spawn_heartbeat(
            commands.clone(),
            alive.clone(),
            Duration::from_millis(cfg.heartbeat_interval_ms),
        );

        Ok(Self {
            commands,
            events: Mutex::new(events),
            pump,
            heartbeat,
            child: Mutex::new(launched.child),
            scratch_profile: launched.scratch_profile,
            alive,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn call(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        request(&self.commands, target, method, params, deadline).await
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.events.lock().await.recv().await
    }

    async fn terminate(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.pump.abort();
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.abort();
        }
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(err) = child.kill().await {
                warn!(target: "cdp-transport", ?err, "failed to kill chromium");
            }
        }
        if let Some(dir) = &self.scratch_profile {
            if let Err(err) = fs::remove_dir_all(dir) {
                debug!(target: "cdp-transport", ?err, dir = %dir.display(), "profile dir left behind");
            }
        }
        info!(target: "cdp-transport", "chromium runtime terminated");
    }

    #[cfg(test)]
    fn stub() -> (Arc<Self>, mpsc::Receiver<Outgoing>) {
        let (commands, command_rx) = mpsc::channel(8);
        let (_events_tx, events) = mpsc::channel(8);
        let runtime = Self {
            commands,
            events: Mutex::new(events),
            pump: tokio::spawn(futures::future::pending::<()>()),
            heartbeat: None,
            child: Mutex::new(None),
            scratch_profile: None,
            alive: Arc::new(AtomicBool::new(true)),
        };
        (Arc::new(runtime), command_rx)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.pump.abort();
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.abort();
        }
        let Ok(mut slot) = self.child.try_lock() else {
            return;
        };
        let Some(mut child) = slot.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = child.kill().await;
                });
            }
            Err(_) => debug!(target: "cdp-transport", "no runtime to reap chromium"),
        }
    }
}

/// Pings the browser periodically; a missed reply marks the connection dead.
fn spawn_heartbeat(
    commands: mpsc::Sender<Outgoing>,
    alive: Arc<AtomicBool>,
    every: Duration,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !alive.load(Ordering::SeqCst) {
                break;
            }
            let probe = request(
                &commands,
                CommandTarget::Browser,
                "Browser.getVersion",
                json!({}),
                HEARTBEAT_REPLY_CAP.min(every),
            )
            .await;
            if let Err(err) = probe {
                warn!(target: "cdp-transport", %err, "heartbeat failed; marking connection dead");
                alive.store(false, Ordering::SeqCst);
                break;
            }
        }
    }))
}

/// A browser ready to be connected to.
struct Launched {
    child: Option<Child>,
    ws_url: String,
    scratch_profile: Option<PathBuf>,
}

impl Launched {
    fn external(ws_url: String) -> Self {
        Self {
            child: None,
            ws_url,
            scratch_profile: None,
        }
    }

    async fn spawn(cfg: &CdpConfig) -> Result<Self, AdapterError> {
        let (profile, scratch) = profile_dir(cfg)?;
        let scratch_profile = scratch.then(|| profile.clone());
        let mut child = browser_config(cfg, profile)?.launch().map_err(|err| {
            AdapterError::new(AdapterErrorKind::LaunchFailed)
                .with_hint(format!("failed to launch chromium: {err}"))
        })?;

        match extract_ws_url(&mut child, Duration::from_millis(cfg.launch_timeout_ms)).await {
            Ok(ws_url) => Ok(Self {
                child: Some(child),
                ws_url,
                scratch_profile,
            }),
            Err(err) => {
                let _ = child.kill().await;
                if let Some(dir) = &scratch_profile {
                    let _ = fs::remove_dir_all(dir);
                }
                Err(err)
            }
        }
    }

    async fn discard(self) {
        if let Some(mut child) = self.child {
            let _ = child.kill().await;
        }
        if let Some(dir) = &self.scratch_profile {
            let _ = fs::remove_dir_all(dir);
        }
    }
}

/// The configured user-data dir, or a fresh scratch dir (flagged `true`) removed on teardown.
fn profile_dir(cfg: &CdpConfig) -> Result<(PathBuf, bool), AdapterError> {
    let (dir, scratch) = match &cfg.user_data_dir {
        Some(dir) if dir.is_absolute() => (dir.clone(), false),
        Some(dir) => {
            let cwd = std::env::current_dir().map_err(|err| {
                AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint(format!("cannot resolve relative user-data-dir: {err}"))
            })?;
            (cwd.join(dir), false)
        }
        None => (
            std::env::temp_dir().join(format!("cartscout-profile-{}", Uuid::new_v4().simple())),
            true,
        ),
    };
    fs::create_dir_all(&dir).map_err(|err| {
        AdapterError::new(AdapterErrorKind::LaunchFailed)
            .with_hint(format!("cannot create user-data-dir {}: {err}", dir.display()))
    })?;
    Ok((dir, scratch))
}

fn launch_flags(cfg: &CdpConfig) -> Vec<String> {
    let mut flags: Vec<String> = BASE_FLAGS.iter().map(|flag| flag.to_string()).collect();
    if cfg.no_sandbox {
        flags.push("--disable-setuid-sandbox".into());
    }
    if cfg.headless {
        flags.extend(HEADLESS_FLAGS.iter().map(|flag| flag.to_string()));
    }
    for extra in &cfg.extra_args {
        if !flags.contains(extra) {
            flags.push(extra.clone());
        }
    }
    flags
}

fn browser_config(cfg: &CdpConfig, profile: PathBuf) -> Result<BrowserConfig, AdapterError> {
    let explicit = !cfg.executable.as_os_str().is_empty();
    if explicit && !cfg.executable.exists() {
        return Err(AdapterError::new(AdapterErrorKind::LaunchFailed)
            .with_hint(format!("chrome executable not found at {}", cfg.executable.display()))
            .with_data(json!({
                "expected": cfg.executable,
                "hint": "Set CHROME_PATH to the full path of chrome/chromium."
            })));
    }

    let (width, height) = cfg.window_size;
    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
        .launch_timeout(Duration::from_millis(cfg.launch_timeout_ms))
        .window_size(width, height)
        .user_data_dir(profile)
        .args(launch_flags(cfg));
    if !cfg.headless {
        builder = builder.with_head();
    }
    if cfg.no_sandbox {
        builder = builder.no_sandbox();
    }
    if explicit {
        builder = builder.chrome_executable(cfg.executable.clone());
    }

    builder.build().map_err(|err| {
        AdapterError::new(AdapterErrorKind::LaunchFailed)
            .with_hint(format!("browser config error: {err}"))
    })
}

/// Owns the websocket; routes replies to their callers and events to the event queue.
struct Pump {
    conn: Connection<CdpEventMessage>,
    pending: HashMap<CallId, Responder>,
    events: mpsc::Sender<TransportEvent>,
}

impl Pump {
    async fn run(mut self, mut commands: mpsc::Receiver<Outgoing>) -> Result<(), AdapterError> {
        loop {
            tokio::select! {
                Some(outgoing) = commands.recv() => self.submit(outgoing),
                message = self.conn.next() => match message {
                    Some(Ok(Message::Response(response))) => self.resolve(response),
                    Some(Ok(Message::Event(event))) => self.forward(event).await,
                    Some(Err(err)) => {
                        let err = map_cdp_error(err);
                        self.fail_pending(&err);
                        return Err(err);
                    }
                    None => {
                        self.fail_pending(&io_error("cdp connection closed"));
                        return Ok(());
                    }
                },
            }
        }
    }

    fn submit(&mut self, outgoing: Outgoing) {
        let session = match outgoing.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(id) => Some(CdpSessionId::from(id)),
        };
        let method: MethodId = outgoing.method.into();
        match self.conn.submit_command(method, session, outgoing.params) {
            Ok(call) => {
                self.pending.insert(call, outgoing.responder);
            }
            Err(err) => {
                let _ = outgoing.responder.send(Err(io_error(err.to_string())));
            }
        }
    }

    fn resolve(&mut self, response: Response) {
        if let Some(responder) = self.pending.remove(&response.id) {
            let _ = responder.send(response_payload(response));
        }
    }

    async fn forward(&mut self, event: CdpEventMessage) {
        let raw: CdpJsonEventMessage = match event.try_into() {
            Ok(raw) => raw,
            Err(err) => {
                debug!(target: "cdp-transport", ?err, "undecodable cdp event");
                return;
            }
        };
        let event = TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        };
        if self.events.send(event).await.is_err() {
            debug!(target: "cdp-transport", "event queue closed");
        }
    }

    fn fail_pending(&mut self, err: &AdapterError) {
        for (_, responder) in self.pending.drain() {
            let _ = responder.send(Err(err.clone()));
        }
    }
}

fn response_payload(response: Response) -> Result<Value, AdapterError> {
    match (response.result, response.error) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("cdp error {}: {}", error.code, error.message))),
        (None, None) => {
            Err(AdapterError::new(AdapterErrorKind::Internal).with_hint("empty cdp response"))
        }
    }
}

fn map_cdp_error(err: CdpError) -> AdapterError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => AdapterError::new(AdapterErrorKind::NavTimeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::JavascriptException(_) => {
            AdapterError::new(AdapterErrorKind::Script).with_hint(hint)
        }
        CdpError::Serde(_) | CdpError::FrameNotFound(_) => {
            AdapterError::new(AdapterErrorKind::Internal).with_hint(hint)
        }
        _ => io_error(hint).retriable(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commands_before_start_are_rejected() {
        let transport = ChromiumTransport::new(CdpConfig::default());
        let err = transport
            .send_command(CommandTarget::Browser, "Browser.getVersion", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::CdpIo);
        assert_eq!(err.hint.as_deref(), Some("transport not started"));
        assert!(transport.next_event().await.is_none());
    }

    #[tokio::test]
    async fn replies_are_routed_back_to_the_caller() {
        let (runtime, mut commands) = Runtime::stub();
        tokio::spawn(async move {
            while let Some(outgoing) = commands.recv().await {
                let _ = outgoing
                    .responder
                    .send(Ok(json!({ "echo": outgoing.method })));
            }
        });
        let transport = ChromiumTransport::with_runtime(CdpConfig::default(), runtime);

        let reply = transport
            .send_command(
                CommandTarget::Session("s-1".into()),
                "Runtime.evaluate",
                json!({}),
            )
            .await
            .unwrap();
        assert_eq!(reply["echo"], "Runtime.evaluate");
    }

    #[tokio::test]
    async fn unanswered_commands_time_out() {
        let (runtime, _commands) = Runtime::stub();
        let err = runtime
            .call(
                CommandTarget::Browser,
                "Page.navigate",
                json!({}),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::NavTimeout);
    }

    #[tokio::test]
    async fn lost_connection_is_not_retried() {
        let (runtime, _commands) = Runtime::stub();
        runtime.alive.store(false, Ordering::SeqCst);
        let transport = ChromiumTransport::with_runtime(CdpConfig::default(), runtime);

        let err = transport
            .send_command(CommandTarget::Browser, "Browser.getVersion", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.hint.as_deref(), Some("browser connection lost"));
    }

    #[tokio::test]
    async fn connection_state_follows_the_browser() {
        let (runtime, _commands) = Runtime::stub();
        let transport = ChromiumTransport::with_runtime(CdpConfig::default(), runtime.clone());
        assert!(transport.is_connected());

        runtime.alive.store(false, Ordering::SeqCst);
        assert!(!transport.is_connected());
        assert!(!ChromiumTransport::new(CdpConfig::default()).is_connected());
    }

    #[tokio::test]
    async fn shutdown_is_final_and_idempotent() {
        let (runtime, _commands) = Runtime::stub();
        let transport = ChromiumTransport::with_runtime(CdpConfig::default(), runtime.clone());

        transport.shutdown().await.unwrap();
        assert!(!runtime.is_alive());
        assert!(transport.start().await.is_err());
        let err = transport
            .send_command(CommandTarget::Browser, "Browser.getVersion", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.hint.as_deref(), Some("transport closed"));
        transport.shutdown().await.unwrap();
    }

    #[test]
    fn protocol_errors_carry_code_and_message() {
        let response: Response = serde_json::from_value(json!({
            "id": 7,
            "error": { "code": -32000, "message": "No node with given id found" }
        }))
        .unwrap();
        let err = response_payload(response).unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::CdpIo);
        assert!(err.hint.unwrap().contains("No node with given id found"));
    }

    #[test]
    fn extra_flags_are_not_duplicated() {
        let cfg = CdpConfig {
            headless: true,
            no_sandbox: true,
            extra_args: vec!["--mute-audio".into(), "--no-zygote".into()],
            ..CdpConfig::default()
        };
        let flags = launch_flags(&cfg);
        assert_eq!(flags.iter().filter(|f| *f == "--mute-audio").count(), 1);
        assert!(flags.contains(&"--no-zygote".to_string()));
        assert!(flags.contains(&"--disable-setuid-sandbox".to_string()));
    }
}
