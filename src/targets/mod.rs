//! Storefront adapters.
//!
//! Each storefront is one [`TargetAdapter`] backed by a static [`TargetDescriptor`]. The shared
//! flows (search navigation, content detection, DOM fallback, cart clicks, location retries) live
//! in the trait's provided methods; the adapters supply payload mapping and the location steps.

pub mod blinkit;
pub mod cart;
pub mod dom;
pub mod instamart;
pub mod zepto;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{AdapterError, NavigationWait, PageDriver};
use serde_json::{Map, Value};
use stealth::EvasionControl;
use tracing::{debug, info, warn};

use cartscout_core_types::{CartOutcome, ProductRecord, Target};

use crate::pricing;

pub use blinkit::BlinkitAdapter;
pub use cart::CartSpec;
pub use dom::{CardSpec, ContentProbe, NoResultsMarker};
pub use instamart::InstamartAdapter;
pub use zepto::ZeptoAdapter;

pub const NAV_TIMEOUT: Duration = Duration::from_secs(50);
pub const NAV_SETTLE: Duration = Duration::from_secs(2);
pub const LOCATION_ATTEMPTS: usize = 2;
pub const LOCATION_STEP_TIMEOUT: Duration = Duration::from_secs(30);
pub const LOCATION_RELOAD_TIMEOUT: Duration = Duration::from_secs(60);
pub const LOCATION_SETTLE: Duration = Duration::from_secs(3);

/// Search responses served for an empty query carry this marker in their URL.
const EMPTY_SEARCH_MARKER: &str = "empty_search";

/// Static description of one storefront.
#[derive(Debug)]
pub struct TargetDescriptor {
    pub target: Target,
    pub home_url: &'static str,
    /// The URL-escaped term is appended to this prefix.
    pub search_url: &'static str,
    pub content: ContentProbe,
    pub cards: CardSpec,
    pub cart: CartSpec,
    pub default_delivery: &'static str,
}

/// The static descriptor for a target.
pub fn descriptor_for(target: Target) -> &'static TargetDescriptor {
    match target {
        Target::Blinkit => &blinkit::DESCRIPTOR,
        Target::Zepto => &zepto::DESCRIPTOR,
        Target::Instamart => &instamart::DESCRIPTOR,
    }
}

/// Escapes a search term for the query string.
pub fn encode_term(term: &str) -> String {
    url::form_urlencoded::byte_serialize(term.trim().as_bytes()).collect()
}

/// Product search responses: JSON with a `response.snippets` list whose entries carry `data.identity`.
pub fn is_product_payload(url: &str, body: &Value) -> bool {
    if url.contains(EMPTY_SEARCH_MARKER) {
        return false;
    }
    body.pointer("/response/snippets")
        .and_then(Value::as_array)
        .map(|snippets| {
            snippets
                .iter()
                .any(|snippet| snippet.pointer("/data/identity").is_some())
        })
        .unwrap_or(false)
}

/// Snippet entries that look like products, with their position in the list.
pub(crate) fn product_snippets(payload: &Value) -> Vec<(usize, &Map<String, Value>)> {
    let Some(snippets) = payload
        .pointer("/response/snippets")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    snippets
        .iter()
        .enumerate()
        .filter_map(|(index, snippet)| {
            let header = snippet.get("widget_type").and_then(Value::as_str)
                == Some("image_text_vr_type_header");
            let data = snippet.get("data").and_then(Value::as_object)?;
            let identity = data.get("identity").filter(|v| !v.is_null())?;
            let container = identity.get("id").and_then(Value::as_str) == Some("product_container");
            let named = data.get("name").map(|v| !v.is_null()).unwrap_or(false);
            if header || container || !named {
                debug!(target: "targets", index, "skipping non-product snippet");
                return None;
            }
            Some((index, data))
        })
        .collect()
}

/// Identity ids come back as strings or numbers.
pub(crate) fn identity_id(data: &Map<String, Value>) -> Option<String> {
    match data.get("identity")?.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reads a scalar field as text.
pub(crate) fn text_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Maps a flat snippet (`final_price`, `price`, `weight`, ...) used by zepto and instamart.
pub(crate) fn flat_snippet_record(
    descriptor: &TargetDescriptor,
    index: usize,
    data: &Map<String, Value>,
) -> Option<ProductRecord> {
    let target = descriptor.target;
    let name = text_field(data.get("name"))?;
    let price = data
        .get("final_price")
        .and_then(pricing::price_from_value)
        .unwrap_or_else(|| "Price Not Available".to_string());
    let original_price = data.get("price").and_then(pricing::price_from_value);
    let discount = text_field(data.get("discount_text"))
        .or_else(|| pricing::discount_label(&price, original_price.as_deref()));

    Some(ProductRecord {
        id: identity_id(data).unwrap_or_else(|| target.generated_id(index)),
        name,
        savings: pricing::savings(&price, original_price.as_deref()),
        price,
        original_price,
        quantity: text_field(data.get("weight"))
            .or_else(|| text_field(data.get("quantity")))
            .unwrap_or_else(|| "N/A".to_string()),
        delivery_time: text_field(data.get("delivery_time"))
            .unwrap_or_else(|| descriptor.default_delivery.to_string()),
        discount,
        image_url: text_field(data.get("image_url"))
            .or_else(|| text_field(data.get("img_url")))
            .unwrap_or_default(),
        available: !data
            .get("out_of_stock")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        source: target,
    })
}

#[async_trait]
pub trait TargetAdapter: Send + Sync {
    fn descriptor(&self) -> &'static TargetDescriptor;

    fn target(&self) -> Target {
        self.descriptor().target
    }

    fn search_url(&self, term: &str) -> String {
        format!("{}{}", self.descriptor().search_url, encode_term(term))
    }

    /// Loads the search page and waits for the network to settle. Never fails past this boundary.
    async fn navigate_to_search(&self, page: &dyn PageDriver, term: &str) -> bool {
        open_search_page(page, self.target(), &self.search_url(term)).await
    }

    /// `true` when products or an explicit empty-result marker are on the page.
    async fn ensure_content_loaded(&self, page: &dyn PageDriver) -> bool {
        dom::detect_content(page, self.target(), &self.descriptor().content).await
    }

    fn matches_payload(&self, url: &str, body: &Value) -> bool {
        is_product_payload(url, body)
    }

    /// Maps a captured search payload. Malformed entries are skipped.
    fn extract_structured(&self, payload: &Value) -> Vec<ProductRecord>;

    async fn extract_from_dom(
        &self,
        page: &dyn PageDriver,
    ) -> Result<Vec<ProductRecord>, AdapterError> {
        let descriptor = self.descriptor();
        dom::extract_cards(
            page,
            descriptor.target,
            &descriptor.cards,
            descriptor.default_delivery,
        )
        .await
    }

    /// Structured extraction first, the rendered page when that yields nothing.
    async fn extract_product_information(
        &self,
        page: &dyn PageDriver,
        payload: Option<&Value>,
    ) -> Vec<ProductRecord> {
        let target = self.target();
        if let Some(payload) = payload {
            let products = self.extract_structured(payload);
            if !products.is_empty() {
                return products;
            }
            debug!(target: "targets", %target, "payload had no products; reading the page");
        }
        match self.extract_from_dom(page).await {
            Ok(products) => products,
            Err(err) => {
                warn!(target: "targets", %target, %err, "dom extraction failed");
                Vec::new()
            }
        }
    }

    /// One pass of the locality flow; returns the confirmed title.
    async fn attempt_location(&self, page: &dyn PageDriver, location: &str) -> Option<String>;

    /// Runs the locality flow, reloading between attempts.
    async fn set_location(&self, page: &dyn PageDriver, location: &str) -> Option<String> {
        let target = self.target();
        for attempt in 1..=LOCATION_ATTEMPTS {
            if let Some(title) = self.attempt_location(page, location).await {
                info!(target: "targets", %target, %title, attempt, "location confirmed");
                return Some(title);
            }
            if attempt < LOCATION_ATTEMPTS {
                warn!(target: "targets", %target, attempt, "location not confirmed; reloading");
                if let Err(err) = page
                    .reload(NavigationWait::DomContentLoaded, LOCATION_RELOAD_TIMEOUT)
                    .await
                {
                    warn!(target: "targets", %target, %err, "reload before retry failed");
                }
                tokio::time::sleep(LOCATION_SETTLE).await;
            }
        }
        warn!(target: "targets", %target, location, "location could not be confirmed");
        None
    }

    async fn add_to_cart(&self, page: &dyn PageDriver, product_id: &str) -> CartOutcome {
        cart::add_to_cart(page, self.target(), &self.descriptor().cart, product_id).await
    }
}

pub(crate) async fn open_search_page(page: &dyn PageDriver, target: Target, url: &str) -> bool {
    info!(target: "targets", %target, %url, "navigating to search");
    if let Err(err) = page
        .navigate(url, NavigationWait::NetworkIdle, NAV_TIMEOUT)
        .await
    {
        warn!(target: "targets", %target, %err, "search navigation failed");
        return false;
    }
    if let Ok(current) = page.current_url().await {
        debug!(target: "targets", %target, %current, "landed");
    }
    tokio::time::sleep(NAV_SETTLE).await;
    true
}

/// Opens the storefront home page unless the page is already on it.
pub(crate) async fn ensure_on_site(
    page: &dyn PageDriver,
    target: Target,
    host_marker: &str,
    home_url: &str,
) -> bool {
    let current = page.current_url().await.unwrap_or_default();
    if current.contains(host_marker) {
        return true;
    }
    match page
        .navigate(home_url, NavigationWait::DomContentLoaded, LOCATION_RELOAD_TIMEOUT)
        .await
    {
        Ok(()) => true,
        Err(err) => {
            warn!(target: "targets", %target, %err, "home navigation failed");
            false
        }
    }
}

/// The three storefront adapters keyed by target.
#[derive(Clone)]
pub struct TargetSet {
    adapters: HashMap<Target, Arc<dyn TargetAdapter>>,
}

impl TargetSet {
    /// Builds the stock adapters, typing at the pace the evasion policy advises per site.
    pub fn standard(evasion: &dyn EvasionControl) -> Self {
        let typing =
            |target: Target| evasion.tempo_advice(descriptor_for(target).home_url, "type").delay();
        Self::from_adapters([
            Arc::new(BlinkitAdapter::new(typing(Target::Blinkit))) as Arc<dyn TargetAdapter>,
            Arc::new(ZeptoAdapter::new(typing(Target::Zepto))),
            Arc::new(InstamartAdapter::new(typing(Target::Instamart))),
        ])
    }

    pub fn from_adapters(adapters: impl IntoIterator<Item = Arc<dyn TargetAdapter>>) -> Self {
        Self {
            adapters: adapters
                .into_iter()
                .map(|adapter| (adapter.target(), adapter))
                .collect(),
        }
    }

    pub fn get(&self, target: Target) -> Option<Arc<dyn TargetAdapter>> {
        self.adapters.get(&target).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPage;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn payload_predicate_requires_identity_entries() {
        let good = json!({"response": {"snippets": [{"data": {"identity": {"id": "1"}}}]}});
        let no_identity = json!({"response": {"snippets": [{"data": {"name": "x"}}]}});
        let not_list = json!({"response": {"snippets": {}}});
        assert!(is_product_payload("https://x/v1/search", &good));
        assert!(!is_product_payload("https://x/v1/empty_search", &good));
        assert!(!is_product_payload("https://x/v1/search", &no_identity));
        assert!(!is_product_payload("https://x/v1/search", &not_list));
        assert!(!is_product_payload("https://x/v1/search", &json!(null)));
    }

    #[test]
    fn snippet_filter_drops_headers_and_containers() {
        let payload = json!({"response": {"snippets": [
            {"widget_type": "image_text_vr_type_header", "data": {"identity": {"id": "h"}, "name": "hdr"}},
            {"data": {"identity": {"id": "product_container"}, "name": "c"}},
            {"data": {"identity": {"id": "p1"}}},
            {"data": null},
            {"data": {"identity": {"id": 77}, "name": "Milk"}},
        ]}});
        let kept = product_snippets(&payload);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].0, 4);
        assert_eq!(identity_id(kept[0].1).as_deref(), Some("77"));
    }

    /// Confirms the locality only after `failures` unsuccessful passes.
    struct FlakyLocation {
        failures: usize,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl TargetAdapter for FlakyLocation {
        fn descriptor(&self) -> &'static TargetDescriptor {
            &blinkit::DESCRIPTOR
        }

        fn extract_structured(&self, _payload: &Value) -> Vec<ProductRecord> {
            Vec::new()
        }

        async fn attempt_location(&self, _page: &dyn PageDriver, location: &str) -> Option<String> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            (attempt > self.failures).then(|| location.to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn location_is_retried_once_after_a_reload() {
        let page = MockPage::new();
        let adapter = FlakyLocation {
            failures: 1,
            attempts: AtomicUsize::new(0),
        };
        let title = adapter.set_location(&page, "Indiranagar").await;
        assert_eq!(title.as_deref(), Some("Indiranagar"));
        assert_eq!(adapter.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(page.calls(), vec!["reload".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn location_gives_up_after_the_last_attempt() {
        let page = MockPage::new();
        let adapter = FlakyLocation {
            failures: usize::MAX,
            attempts: AtomicUsize::new(0),
        };
        assert_eq!(adapter.set_location(&page, "Indiranagar").await, None);
        assert_eq!(adapter.attempts.load(Ordering::SeqCst), LOCATION_ATTEMPTS);
        // no reload after the final miss
        assert_eq!(page.calls().len(), LOCATION_ATTEMPTS - 1);
    }

    #[test]
    fn terms_are_query_escaped() {
        assert_eq!(encode_term(" toned milk "), "toned+milk");
        assert_eq!(encode_term("dal & rice"), "dal+%26+rice");
    }
}
