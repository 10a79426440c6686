use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{PageDriver, SelectorState};
use serde_json::Value;
use tracing::{debug, warn};

use cartscout_core_types::{ProductRecord, Target};

use super::dom::{self, CardSpec, ContentProbe, NoResultsMarker};
use super::{
    ensure_on_site, flat_snippet_record, product_snippets, CartSpec, TargetAdapter, TargetDescriptor,
    LOCATION_STEP_TIMEOUT,
};

const ADDRESS_BUTTON: &str = r".max-w-\[170px\] > span";
const ADDRESS_INPUT: &str = r#"[placeholder="Search a new address"]"#;
const ADDRESS_INPUT_ENABLED: &str = r#"[placeholder="Search a new address"]:not([disabled])"#;
const FIRST_SUGGESTION: &str = ".flex:nth-child(1) > .ml-4 > div > .font-heading";
const CONFIRM_BUTTON: &str = ".bg-skin-primary > .flex";
const STEP_PAUSE: Duration = Duration::from_secs(3);
const CONFIRM_PAUSE: Duration = Duration::from_secs(5);

const ADDRESS_DISPLAY: &[&str] = &[
    r".max-w-\[170px\] > span",
    r#"[data-testid="location-btn"]"#,
    r#"[class*="location-display"]"#,
    r#"[class*="address-display"]"#,
    ".selected-location",
    ".delivery-location",
    r#"[aria-label*="location"]"#,
    r#"[aria-label*="address"]"#,
];

pub static DESCRIPTOR: TargetDescriptor = TargetDescriptor {
    target: Target::Zepto,
    home_url: "https://www.zeptonow.com/",
    search_url: "https://www.zeptonow.com/srp?q=",
    content: ContentProbe {
        loader: r#".loading-container, .loading, .spinner, [class*="loading"], [class*="skeleton"]"#,
        markers: &[r#".product-card, .product-item, [data-testid="product-card"]"#],
        marker_timeout: Duration::from_secs(8),
        marker_state: SelectorState::Attached,
        no_results: NoResultsMarker::Selector(r#"[class*="no-result"], [class*="empty-state"]"#),
        settle: Duration::ZERO,
    },
    cards: CardSpec {
        card: r#"[data-testid="product-card"], .product-card, .product-item"#,
        id_attrs: &["data-product-id", "data-id", "id"],
        name: &[
            r#"[data-testid="product-card-name"]"#,
            "h5",
            r#"[class*="name"]"#,
        ],
        price: &[
            r#"[data-testid="product-card-price"]"#,
            r#"[class*="price"]:not([class*="strike"])"#,
        ],
        mrp: &["del", "s", r#"[class*="strike"]"#],
        discount: &[r#"[data-testid="product-card-discount"]"#, r#"[class*="discount"]"#],
        quantity: &[
            r#"[data-testid="product-card-quantity"]"#,
            r#"[class*="quantity"]"#,
        ],
        delivery: &[],
        image: &["img"],
        sold_out: &[".sold-out", r#"[class*="out-of-stock"]"#],
        quantity_cut: None,
    },
    cart: CartSpec {
        id_attrs: &["data-product-id", "data-id", "id"],
        out_of_stock: r#"[class*="OutOfStock"], [class*="out-of-stock"], .sold-out"#,
        buttons: &["button.add-btn", ".add-to-cart", r#"[class*="AddButton"]"#],
    },
    default_delivery: "10 mins",
};

/// zeptonow.com: flat payload fields and a modal address picker.
pub struct ZeptoAdapter {
    typing_delay: Duration,
}

impl ZeptoAdapter {
    pub fn new(typing_delay: Duration) -> Self {
        Self { typing_delay }
    }

    async fn confirmed_title(page: &dyn PageDriver) -> Option<String> {
        tokio::time::sleep(STEP_PAUSE).await;
        if let Some(title) =
            dom::first_meaningful_text(page, ADDRESS_DISPLAY, &["select", "enter"]).await
        {
            return Some(title);
        }
        let on_home = page
            .evaluate(
                "window.location.pathname === '/' || document.querySelector('.product-grid, [class*=\"product-list\"], [class*=\"category-list\"]') !== null",
            )
            .await
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        on_home.then(|| "Location Set".to_string())
    }

    async fn pick_address(&self, page: &dyn PageDriver, location: &str) -> bool {
        if !dom::wait_and_click(page, ADDRESS_BUTTON, LOCATION_STEP_TIMEOUT).await {
            return false;
        }
        tokio::time::sleep(STEP_PAUSE).await;
        if !dom::wait_and_click(page, ADDRESS_INPUT, LOCATION_STEP_TIMEOUT).await {
            return false;
        }
        let enabled = page
            .wait_for_selector(
                ADDRESS_INPUT_ENABLED,
                SelectorState::Attached,
                LOCATION_STEP_TIMEOUT,
            )
            .await
            .unwrap_or(false);
        if !enabled {
            return false;
        }
        if let Err(err) = page
            .type_text(ADDRESS_INPUT, location, self.typing_delay)
            .await
        {
            debug!(target: "targets", target = %Target::Zepto, %err, "typing address failed");
            return false;
        }
        tokio::time::sleep(STEP_PAUSE).await;
        if !dom::wait_and_click(page, FIRST_SUGGESTION, LOCATION_STEP_TIMEOUT).await {
            return false;
        }
        tokio::time::sleep(STEP_PAUSE).await;
        if !dom::wait_and_click(page, CONFIRM_BUTTON, LOCATION_STEP_TIMEOUT).await {
            return false;
        }
        tokio::time::sleep(CONFIRM_PAUSE).await;
        true
    }
}

#[async_trait]
impl TargetAdapter for ZeptoAdapter {
    fn descriptor(&self) -> &'static TargetDescriptor {
        &DESCRIPTOR
    }

    fn extract_structured(&self, payload: &Value) -> Vec<ProductRecord> {
        product_snippets(payload)
            .into_iter()
            .filter_map(|(index, data)| flat_snippet_record(&DESCRIPTOR, index, data))
            .collect()
    }

    async fn attempt_location(&self, page: &dyn PageDriver, location: &str) -> Option<String> {
        if !ensure_on_site(page, Target::Zepto, "zeptonow.com", DESCRIPTOR.home_url).await {
            return None;
        }
        // A failed step still falls through to verification; the header may already be set.
        if !self.pick_address(page, location).await {
            warn!(target: "targets", target = %Target::Zepto, "address picker flow incomplete");
        }
        Self::confirmed_title(page).await
    }
}
