use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cartscout::mock::{MockLauncher, MockPage, MockTarget};
use cartscout::orchestrator::{Orchestrator, SearchTimings};
use cartscout::pool::ContextPool;
use cartscout::protocol::Outbound;
use cartscout::registry::SessionRegistry;
use cartscout::targets::{TargetAdapter, TargetSet};
use cartscout::{Connection, Gateway, Target};

struct Harness {
    gateway: Gateway,
    launcher: Arc<MockLauncher>,
}

impl Harness {
    fn new(launcher: MockLauncher, titles: [Option<&str>; 3]) -> Self {
        let launcher = Arc::new(launcher);
        let pool = Arc::new(ContextPool::new(launcher.clone()));
        let registry = Arc::new(SessionRegistry::new(pool));
        let targets = TargetSet::from_adapters(Target::ALL.into_iter().zip(titles).map(
            |(target, title)| Arc::new(MockTarget::new(target, title)) as Arc<dyn TargetAdapter>,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            registry,
            targets,
            SearchTimings::default(),
        ));
        Self {
            gateway: Gateway::new(orchestrator),
            launcher,
        }
    }

    fn connect(&self) -> (Connection, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.gateway.connect(tx), rx)
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Value> {
    let mut replies = Vec::new();
    while let Ok(reply) = rx.try_recv() {
        replies.push(serde_json::from_str(&reply.to_json()).unwrap());
    }
    replies
}

fn with_action<'a>(replies: &'a [Value], action: &str) -> Vec<&'a Value> {
    replies.iter().filter(|r| r["action"] == action).collect()
}

#[tokio::test(start_paused = true)]
async fn initialize_reports_completion() {
    let harness = Harness::new(MockLauncher::new(), [None; 3]);
    let (connection, mut rx) = harness.connect();

    connection.handle_text(r#"{"action":"initialize"}"#).await;

    let replies = drain(&mut rx);
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["status"], "loading");
    assert_eq!(replies[1]["step"], "initialize");
    assert_eq!(replies[1]["status"], "completed");
    assert_eq!(replies[1]["success"], true);
    assert_eq!(harness.launcher.launch_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn set_location_reports_one_entry_per_target() {
    let harness = Harness::new(
        MockLauncher::new(),
        [Some("Koramangala, Bengaluru"), Some("Koramangala"), None],
    );
    let (connection, mut rx) = harness.connect();
    connection.handle_text(r#"{"action":"initialize"}"#).await;
    drain(&mut rx);

    connection
        .handle_text(r#"{"action":"setLocation","location":"Koramangala"}"#)
        .await;

    let replies = drain(&mut rx);
    let last = replies.last().unwrap();
    assert_eq!(last["step"], "setLocation");
    assert_eq!(last["status"], "completed");
    assert_eq!(last["success"], true);
    let results = last["locationResults"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    let services: Vec<&str> = results
        .iter()
        .map(|r| r["service"].as_str().unwrap())
        .collect();
    assert_eq!(services, vec!["blinkit", "zepto", "instamart"]);
    assert_eq!(results[2]["success"], false);
}

#[tokio::test(start_paused = true)]
async fn search_without_confirmed_location_fails_fast() {
    let harness = Harness::new(MockLauncher::new(), [None; 3]);
    let (connection, mut rx) = harness.connect();
    connection.handle_text(r#"{"action":"initialize"}"#).await;
    connection
        .handle_text(r#"{"action":"setLocation","location":"Nowhere"}"#)
        .await;
    drain(&mut rx);

    connection
        .handle_text(r#"{"action":"search","searchTerm":"milk"}"#)
        .await;

    let replies = drain(&mut rx);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["step"], "search");
    assert_eq!(replies[0]["status"], "error");
    assert_eq!(
        replies[0]["message"],
        "Location not set on any service. Please set location first."
    );
    assert!(with_action(&replies, "serviceSearchUpdate").is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_payload_falls_back_to_rendered_cards() {
    let launcher = MockLauncher::with_factory(|target| match target {
        Target::Blinkit => MockPage::new().with_payload(
            "https://blinkit.com/v1/layout/search",
            &json!({"response": {"snippets": [
                {"data": {"identity": {"id": "p1"}, "name": "Amul Milk", "final_price": 30}}
            ]}}),
        ),
        _ => MockPage::new().with_cards(json!([
            { "id": "c1", "name": "Nandini Milk", "price": "28" },
            { "id": "c2", "name": "Heritage Milk", "price": "31" }
        ])),
    });
    let harness = Harness::new(launcher, [Some("HSR Layout"); 3]);
    let (connection, mut rx) = harness.connect();
    connection.handle_text(r#"{"action":"initialize"}"#).await;
    connection
        .handle_text(r#"{"action":"setLocation","location":"HSR Layout"}"#)
        .await;
    drain(&mut rx);

    connection
        .handle_text(r#"{"action":"search","searchTerm":"milk"}"#)
        .await;

    let replies = drain(&mut rx);
    for target in ["zepto", "instamart"] {
        let last = with_action(&replies, "serviceSearchUpdate")
            .into_iter()
            .filter(|r| r["service"] == target)
            .last()
            .unwrap();
        assert_eq!(last["status"], "success", "{target}");
        assert_eq!(last["hasProducts"], true);
    }

    let results = with_action(&replies, "searchResults");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["productCount"]["blinkit"], 1);
    assert_eq!(results[0]["productCount"]["zepto"], 2);
    assert_eq!(results[0]["productCount"]["instamart"], 2);
    assert_eq!(results[0]["products"]["zepto"][0]["price"], "₹28");
    assert_eq!(results[0]["message"], "Found 5 products across all services.");

    let last = replies.last().unwrap();
    assert_eq!(last["step"], "search");
    assert_eq!(last["status"], "completed");
}

#[tokio::test(start_paused = true)]
async fn close_without_browsers_is_an_error() {
    let harness = Harness::new(MockLauncher::new(), [None; 3]);
    let (connection, mut rx) = harness.connect();

    connection.handle_text(r#"{"action":"close"}"#).await;

    let replies = drain(&mut rx);
    assert_eq!(replies, vec![json!({
        "status": "error",
        "action": "close",
        "message": "No active browsers to close."
    })]);
}

#[tokio::test(start_paused = true)]
async fn close_releases_every_context() {
    let harness = Harness::new(MockLauncher::new(), [None; 3]);
    let (connection, mut rx) = harness.connect();
    connection.handle_text(r#"{"action":"initialize"}"#).await;
    drain(&mut rx);

    connection.handle_text(r#"{"action":"close"}"#).await;

    let replies = drain(&mut rx);
    assert_eq!(replies[0]["status"], "success");
    assert_eq!(replies[0]["action"], "close");
    assert!(harness.gateway.orchestrator().registry().pool().is_empty());
    assert!(harness.launcher.pages().iter().all(|page| page.is_closed()));

    // the connection can start over
    connection
        .handle_text(r#"{"action":"search","searchTerm":"milk"}"#)
        .await;
    let replies = drain(&mut rx);
    assert_eq!(
        replies[0]["message"],
        "Browsers not initialized. Please initialize first."
    );
}

#[tokio::test(start_paused = true)]
async fn malformed_and_unknown_messages_get_error_envelopes() {
    let harness = Harness::new(MockLauncher::new(), [None; 3]);
    let (connection, mut rx) = harness.connect();

    connection.handle_text("not json").await;
    connection.handle_text(r#"{"action":"checkout"}"#).await;

    let replies = drain(&mut rx);
    assert_eq!(replies.len(), 2);
    assert!(replies.iter().all(|r| r["status"] == "error"));
    assert_eq!(harness.launcher.launch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_tears_down_the_session() {
    let harness = Harness::new(MockLauncher::new(), [None; 3]);
    let (connection, _rx) = harness.connect();
    connection.handle_text(r#"{"action":"initialize"}"#).await;
    let registry = harness.gateway.orchestrator().registry().clone();
    assert_eq!(registry.pool().len(), 3);

    connection.disconnect().await;

    assert!(registry.pool().is_empty());
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn add_to_cart_reports_the_storefront_outcome() {
    let launcher = MockLauncher::with_factory(|target| match target {
        Target::Zepto => MockPage::new().with_script("return 'ready'", json!("out_of_stock")),
        _ => MockPage::new().with_script("return 'ready'", json!("missing")),
    });
    let harness = Harness::new(launcher, [None; 3]);
    let (connection, mut rx) = harness.connect();

    connection
        .handle_text(r#"{"action":"addToCart","productId":"z-1","service":"zepto"}"#)
        .await;
    let replies = drain(&mut rx);
    assert_eq!(replies[0]["action"], "addToCart");
    assert_eq!(
        replies[0]["message"],
        "Browsers not initialized. Please initialize first."
    );

    connection.handle_text(r#"{"action":"initialize"}"#).await;
    drain(&mut rx);
    connection
        .handle_text(r#"{"action":"addToCart","productId":"z-1","service":"zepto"}"#)
        .await;
    connection
        .handle_text(r#"{"action":"addToCart","productId":"b-7","service":"blinkit"}"#)
        .await;

    let replies = drain(&mut rx);
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["status"], "error");
    assert_eq!(replies[0]["productId"], "z-1");
    assert_eq!(replies[0]["service"], "zepto");
    assert_eq!(replies[0]["message"], "Product is out of stock on zepto.");
    assert_eq!(replies[1]["message"], "Product not found on blinkit.");
}

#[tokio::test(start_paused = true)]
async fn hangup_abandons_the_search_in_flight() {
    let harness = Harness::new(MockLauncher::new(), [Some("HSR Layout"); 3]);
    let (connection, mut rx) = harness.connect();
    let registry = harness.gateway.orchestrator().registry().clone();
    let (inbound, queue) = mpsc::unbounded_channel();
    let hangup = CancellationToken::new();
    for message in [
        r#"{"action":"initialize"}"#,
        r#"{"action":"setLocation","location":"HSR Layout"}"#,
        r#"{"action":"search","searchTerm":"milk"}"#,
    ] {
        inbound.send(message.to_string()).unwrap();
    }
    let running = tokio::spawn(connection.run(queue, hangup.clone()));

    // no payload and no cards, so the search waits out its payload deadline
    let mut seen = Vec::new();
    while let Some(reply) = rx.recv().await {
        let reply: Value = serde_json::from_str(&reply.to_json()).unwrap();
        let started = reply["step"] == "search" && reply["status"] == "loading";
        seen.push(reply);
        if started {
            break;
        }
    }
    hangup.cancel();
    running.await.unwrap();

    assert!(registry.is_empty());
    assert!(registry.pool().is_empty());
    assert!(harness.launcher.pages().iter().all(|page| page.is_closed()));
    seen.extend(drain(&mut rx));
    assert!(with_action(&seen, "searchResults").is_empty());
}
