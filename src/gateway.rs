//! Command dispatch for one real-time connection.
//!
//! A [`Connection`] handles one inbound message at a time and pushes replies into an mpsc channel
//! drained by the socket writer, so a connection never runs two commands against its browsers at once.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cartscout_core_types::{CartOutcome, SearchStatus, Target};

use crate::errors::ScoutError;
use crate::orchestrator::{Orchestrator, ProgressSink};
use crate::protocol::{self, Command, Outbound, Step, StepStatus};
use crate::registry::SessionId;

const NOT_INITIALIZED: &str = "Browsers not initialized. Please initialize first.";
const NO_LOCATION: &str = "Location not set on any service. Please set location first.";

#[derive(Clone)]
pub struct Gateway {
    orchestrator: Arc<Orchestrator>,
}

impl Gateway {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Opens a session whose replies go to `out`.
    pub fn connect(&self, out: mpsc::UnboundedSender<Outbound>) -> Connection {
        let session = SessionId::next();
        self.orchestrator.registry().create(session);
        info!(target: "gateway", %session, "client connected");
        Connection {
            session,
            orchestrator: self.orchestrator.clone(),
            out,
        }
    }
}

/// Forwards search progress to the client as it happens.
struct ChannelProgress {
    out: mpsc::UnboundedSender<Outbound>,
}

impl ProgressSink for ChannelProgress {
    fn search_started(&self, term: &str) {
        let _ = self.out.send(Outbound::status(
            Step::Search,
            StepStatus::Loading,
            format!("Searching for \"{term}\" across all services..."),
        ));
    }

    fn target_progress(
        &self,
        target: Target,
        status: SearchStatus,
        message: &str,
        has_products: bool,
    ) {
        let _ = self
            .out
            .send(Outbound::service(target, status, message, has_products));
    }
}

pub struct Connection {
    session: SessionId,
    orchestrator: Arc<Orchestrator>,
    out: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    pub fn session(&self) -> SessionId {
        self.session
    }

    fn send(&self, message: Outbound) {
        if self.out.send(message).is_err() {
            debug!(target: "gateway", session = %self.session, "reply dropped; writer gone");
        }
    }

    pub async fn handle_text(&self, raw: &str) {
        let command = match protocol::parse_command(raw) {
            Ok(command) => command,
            Err(err) => {
                warn!(target: "gateway", session = %self.session, %err, "rejected message");
                self.send(Outbound::error(err.action(), err.to_string()));
                return;
            }
        };
        debug!(target: "gateway", session = %self.session, ?command, "dispatching");

        match command {
            Command::Initialize => self.initialize().await,
            Command::SetLocation { location, services } => {
                self.set_location(&location, services.as_deref()).await
            }
            Command::RetrySetLocation { location, services } => {
                self.set_location(&location, Some(&services)).await
            }
            Command::Search { term } => self.search(&term).await,
            Command::AddToCart {
                product_id,
                service,
            } => self.add_to_cart(&product_id, service).await,
            Command::Close => self.close().await,
        }
    }

    async fn initialize(&self) {
        self.send(Outbound::status(
            Step::Initialize,
            StepStatus::Loading,
            "Initializing browsers...",
        ));
        match self.orchestrator.initialize(self.session).await {
            Ok(()) => self.send(Outbound::completed(
                Step::Initialize,
                "All browsers initialized successfully.",
            )),
            Err(err) => {
                error!(target: "gateway", session = %self.session, %err, "initialization failed");
                self.send(Outbound::failed(
                    Step::Initialize,
                    format!("Failed to initialize browsers: {err}"),
                ));
            }
        }
    }

    async fn set_location(&self, location: &str, subset: Option<&[Target]>) {
        if !self.orchestrator.registry().is_initialized(self.session) {
            self.send(Outbound::failed(Step::SetLocation, NOT_INITIALIZED));
            return;
        }

        let scope = match subset {
            Some(targets) => targets
                .iter()
                .map(Target::as_str)
                .collect::<Vec<_>>()
                .join(", "),
            None => "all services".to_string(),
        };
        self.send(Outbound::status(
            Step::SetLocation,
            StepStatus::Loading,
            format!("Setting location to {location} on {scope}..."),
        ));

        match self
            .orchestrator
            .set_location(self.session, location, subset)
            .await
        {
            Ok(results) if results.iter().any(|r| r.success) => self.send(
                Outbound::completed(Step::SetLocation, "Location set on one or more services")
                    .with_location_results(results),
            ),
            Ok(results) => self.send(
                Outbound::failed(Step::SetLocation, "Failed to set location on any service.")
                    .with_location_results(results),
            ),
            Err(err) => self.send(Outbound::failed(Step::SetLocation, failure_message(&err))),
        }
    }

    async fn search(&self, term: &str) {
        if !self.orchestrator.registry().is_initialized(self.session) {
            self.send(Outbound::failed(Step::Search, NOT_INITIALIZED));
            return;
        }
        if term.trim().is_empty() {
            self.send(
                Outbound::status(Step::Search, StepStatus::Skipped, "No search term provided.")
                    .with_success(false),
            );
            self.send(Outbound::results(
                "info",
                BTreeMap::new(),
                "Please provide a search term.",
            ));
            return;
        }

        let sink = Arc::new(ChannelProgress {
            out: self.out.clone(),
        });
        match self.orchestrator.search(self.session, term, sink).await {
            Ok(outcome) => {
                let total = outcome.total();
                self.send(Outbound::results(
                    "success",
                    outcome.into_products(),
                    format!("Found {total} products across all services."),
                ));
                self.send(Outbound::completed(
                    Step::Search,
                    format!("Search completed for \"{term}\"."),
                ));
            }
            Err(err) => self.send(Outbound::failed(Step::Search, failure_message(&err))),
        }
    }

    async fn add_to_cart(&self, product_id: &str, service: Target) {
        if !self.orchestrator.registry().is_initialized(self.session) {
            self.send(Outbound::error("addToCart", NOT_INITIALIZED));
            return;
        }
        let outcome = match self
            .orchestrator
            .add_to_cart(self.session, service, product_id)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => CartOutcome::Failed(err.to_string()),
        };
        let (success, message) = match outcome {
            CartOutcome::Added => (true, format!("Product added to cart on {service}.")),
            CartOutcome::OutOfStock => (false, format!("Product is out of stock on {service}.")),
            CartOutcome::NotFound => (false, format!("Product not found on {service}.")),
            CartOutcome::Failed(reason) => (
                false,
                format!("Failed to add product to cart on {service}: {reason}"),
            ),
        };
        info!(target: "gateway", session = %self.session, %service, product_id, success, "add to cart");
        self.send(Outbound::cart(success, product_id, service, message));
    }

    async fn close(&self) {
        if self.orchestrator.registry().destroy(self.session).await {
            self.send(Outbound::closed("All browsers closed successfully."));
        } else {
            self.send(Outbound::error("close", "No active browsers to close."));
        }
        // the connection stays usable; a later initialize starts over
        self.orchestrator.registry().create(self.session);
    }

    /// Handles queued messages in arrival order until the queue closes or `hangup` fires, then tears
    /// the session down. A hangup abandons the command in flight.
    pub async fn run(self, mut inbound: mpsc::UnboundedReceiver<String>, hangup: CancellationToken) {
        loop {
            let text = tokio::select! {
                _ = hangup.cancelled() => break,
                next = inbound.recv() => match next {
                    Some(text) => text,
                    None => break,
                },
            };
            tokio::select! {
                _ = hangup.cancelled() => {
                    info!(target: "gateway", session = %self.session, "client left mid-command");
                    break;
                }
                _ = self.handle_text(&text) => {}
            }
        }
        self.disconnect().await;
    }

    /// Tears the session down when the socket goes away.
    pub async fn disconnect(self) {
        let released = self.orchestrator.registry().destroy(self.session).await;
        info!(target: "gateway", session = %self.session, released, "client disconnected");
    }
}

fn failure_message(err: &ScoutError) -> String {
    match err {
        ScoutError::NotInitialized(_) => NOT_INITIALIZED.to_string(),
        ScoutError::NoLocation => NO_LOCATION.to_string(),
        other => other.to_string(),
    }
}
