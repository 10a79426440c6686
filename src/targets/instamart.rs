use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{AdapterError, NavigationWait, PageDriver, SelectorState};
use serde_json::Value;
use tracing::{debug, info, warn};

use cartscout_core_types::{ProductRecord, Target};

use super::dom::{self, CardSpec, ContentProbe, NoResultsMarker};
use super::{
    ensure_on_site, flat_snippet_record, open_search_page, product_snippets, CartSpec,
    TargetAdapter, TargetDescriptor, LOCATION_STEP_TIMEOUT, NAV_SETTLE, NAV_TIMEOUT,
};

const VIEWPORT: (u32, u32) = (1536, 695);
const INSTAMART_TAB: &str = r#"button[data-testid="instamart-tab"], a[href*="instamart"]"#;
const ADDRESS_NAME: &str = r#"[data-testid="address-name"]"#;
const SEARCH_LOCATION: &str = r#"[data-testid="search-location"]"#;
const LOCATION_INPUT: &str = r#"[placeholder="Search for area, street name…"]"#;
const FIRST_SUGGESTION: &str = "._11n32:nth-child(1)";
const CONFIRM_BUTTON: &str = "._2xPHa";
const OPTIONAL_STEP_TIMEOUT: Duration = Duration::from_secs(5);
const SUGGESTION_PAUSE: Duration = Duration::from_secs(2);
const CONFIRM_PAUSE: Duration = Duration::from_secs(3);
/// Rendered cards do not carry an ETA; the storefront promises this window.
const CARD_DELIVERY: &str = "10 mins";

const ADDRESS_DISPLAY: &[&str] = &[
    r#"[data-testid="address-name"]"#,
    "._3FN4I",
    "._3eFQ-",
    ".location-address",
    ".address-text",
];

const SUGGESTION_FALLBACK: &str = r#"(() => {
  const first = document.querySelector('._11n32');
  if (!first) return false;
  first.click();
  return true;
})()"#;

pub static DESCRIPTOR: TargetDescriptor = TargetDescriptor {
    target: Target::Instamart,
    home_url: "https://www.swiggy.com/instamart",
    search_url: "https://www.swiggy.com/instamart/search?custom_back=true&query=",
    content: ContentProbe {
        loader: r#".loading, .shimmer, .skeleton, [class*="loading"], [class*="Loader"]"#,
        markers: &[r#"[data-testid="default_container_ux4"], .XjYJe._2_few, ._179Mx"#],
        marker_timeout: Duration::from_secs(10),
        marker_state: SelectorState::Visible,
        no_results: NoResultsMarker::BodyText(&[
            "No results found",
            "No matching products",
            "Try another search",
        ]),
        settle: Duration::from_millis(1500),
    },
    cards: CardSpec {
        card: r#"[data-testid="default_container_ux4"]"#,
        id_attrs: &["data-testid", "data-product-id", "data-id", "id"],
        name: &[".novMV", ".sc-aXZVg.kyEzVU"],
        price: &[r#"[data-testid="item-offer-price"]"#],
        mrp: &[r#"[data-testid="item-mrp-price"]"#],
        discount: &[r#"[data-testid="item-offer-label-discount-text"]"#],
        quantity: &["._3eIPt", ".sc-aXZVg.entQHA"],
        delivery: &[],
        image: &["img.sc-dcJsrY", "._1NxA5", ".tPMI1"],
        sold_out: &[r#"[data-testid="sold-out"]"#],
        quantity_cut: Some("chevronDownIcon"),
    },
    cart: CartSpec {
        id_attrs: &["data-testid", "data-product-id", "data-id", "id"],
        out_of_stock: r#"[class*="outOfStock"], [class*="out-of-stock"], .sold-out, [data-testid="sold-out"]"#,
        buttons: &[
            ".add-btn",
            ".add-to-cart-button",
            r#"button[aria-label*="add"]"#,
            "button:has(.plus-icon)",
        ],
    },
    default_delivery: "15-30 mins",
};

/// Swiggy Instamart: lives under swiggy.com, so search may land outside the instamart section.
pub struct InstamartAdapter {
    typing_delay: Duration,
}

impl InstamartAdapter {
    pub fn new(typing_delay: Duration) -> Self {
        Self { typing_delay }
    }

    async fn click_required(page: &dyn PageDriver, selector: &str) -> bool {
        let clicked = dom::wait_and_click(page, selector, LOCATION_STEP_TIMEOUT).await;
        if !clicked {
            debug!(target: "targets", target = %Target::Instamart, selector, "location step missing");
        }
        clicked
    }

    async fn pick_first_suggestion(page: &dyn PageDriver) -> bool {
        if dom::wait_and_click(page, FIRST_SUGGESTION, LOCATION_STEP_TIMEOUT).await {
            return true;
        }
        matches!(page.evaluate(SUGGESTION_FALLBACK).await, Ok(Value::Bool(true)))
    }

    async fn confirmed_title(page: &dyn PageDriver) -> Option<String> {
        if let Some(title) =
            dom::first_meaningful_text(page, ADDRESS_DISPLAY, &["other", "select", "enter"]).await
        {
            return Some(title);
        }
        let listing = page
            .exists(r#".product-grid, [class*="product-list"], [class*="items-container"]"#)
            .await
            .unwrap_or(false);
        listing.then(|| "Location Set".to_string())
    }
}

#[async_trait]
impl TargetAdapter for InstamartAdapter {
    fn descriptor(&self) -> &'static TargetDescriptor {
        &DESCRIPTOR
    }

    /// Search can bounce to the food section; hop back through the instamart tab when it does.
    async fn navigate_to_search(&self, page: &dyn PageDriver, term: &str) -> bool {
        let url = self.search_url(term);
        if !open_search_page(page, Target::Instamart, &url).await {
            return false;
        }

        let current = page.current_url().await.unwrap_or_default();
        if current.contains("instamart/search") {
            return true;
        }
        if page.exists(INSTAMART_TAB).await.unwrap_or(false) {
            info!(target: "targets", target = %Target::Instamart, %current, "switching to instamart tab");
            if let Err(err) = page.click(INSTAMART_TAB, LOCATION_STEP_TIMEOUT).await {
                debug!(target: "targets", target = %Target::Instamart, %err, "tab click failed");
            }
            tokio::time::sleep(NAV_SETTLE).await;
        }

        let current = page.current_url().await.unwrap_or_default();
        if current.contains("instamart") {
            return true;
        }
        warn!(target: "targets", target = %Target::Instamart, %current, "left instamart; navigating again");
        match page
            .navigate(&url, NavigationWait::NetworkIdle, NAV_TIMEOUT)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(target: "targets", target = %Target::Instamart, %err, "second search navigation failed");
                false
            }
        }
    }

    fn extract_structured(&self, payload: &Value) -> Vec<ProductRecord> {
        product_snippets(payload)
            .into_iter()
            .filter_map(|(index, data)| flat_snippet_record(&DESCRIPTOR, index, data))
            .collect()
    }

    async fn extract_from_dom(
        &self,
        page: &dyn PageDriver,
    ) -> Result<Vec<ProductRecord>, AdapterError> {
        dom::extract_cards(page, Target::Instamart, &DESCRIPTOR.cards, CARD_DELIVERY).await
    }

    async fn attempt_location(&self, page: &dyn PageDriver, location: &str) -> Option<String> {
        if !ensure_on_site(page, Target::Instamart, "swiggy.com/instamart", DESCRIPTOR.home_url)
            .await
        {
            return None;
        }
        if let Err(err) = page.set_viewport(VIEWPORT.0, VIEWPORT.1).await {
            debug!(target: "targets", target = %Target::Instamart, %err, "viewport not applied");
        }

        // The address header is only present for returning sessions.
        let _ = dom::wait_and_click(page, ADDRESS_NAME, OPTIONAL_STEP_TIMEOUT).await;
        if !Self::click_required(page, SEARCH_LOCATION).await {
            return None;
        }
        let _ = page.wait_for_network_idle(OPTIONAL_STEP_TIMEOUT).await;

        if !Self::click_required(page, LOCATION_INPUT).await {
            return None;
        }
        page.type_text(LOCATION_INPUT, location, self.typing_delay)
            .await
            .ok()?;
        tokio::time::sleep(SUGGESTION_PAUSE).await;

        if !Self::pick_first_suggestion(page).await {
            debug!(target: "targets", target = %Target::Instamart, "no address suggestion to pick");
            return None;
        }
        if !Self::click_required(page, CONFIRM_BUTTON).await {
            return None;
        }
        tokio::time::sleep(CONFIRM_PAUSE).await;
        Self::confirmed_title(page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPage;
    use serde_json::json;

    #[test]
    fn flat_payload_defaults_to_wide_delivery_window() {
        let payload = json!({"response": {"snippets": [
            {"data": {
                "identity": {"id": "im-9"},
                "name": "Akshayakalpa Milk",
                "final_price": 44.5,
                "price": 50,
                "quantity": "500 ml",
                "img_url": "https://cdn/ak.png"
            }}
        ]}});
        let products = InstamartAdapter::new(Duration::ZERO).extract_structured(&payload);
        assert_eq!(products.len(), 1);
        let milk = &products[0];
        assert_eq!(milk.price, "₹44.50");
        assert_eq!(milk.savings.as_deref(), Some("₹5.50"));
        assert_eq!(milk.discount.as_deref(), Some("11% OFF"));
        assert_eq!(milk.quantity, "500 ml");
        assert_eq!(milk.delivery_time, "15-30 mins");
        assert_eq!(milk.image_url, "https://cdn/ak.png");
        assert_eq!(milk.source, Target::Instamart);
        assert!(milk.available);
    }

    #[test]
    fn search_url_keeps_back_flag() {
        let adapter = InstamartAdapter::new(Duration::ZERO);
        assert_eq!(
            adapter.search_url("paneer"),
            "https://www.swiggy.com/instamart/search?custom_back=true&query=paneer"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bounced_search_goes_through_the_tab_then_navigates_again() {
        let adapter = InstamartAdapter::new(Duration::ZERO);
        let url = adapter.search_url("atta");
        let page = MockPage::new()
            .redirecting_to("https://www.swiggy.com/restaurants")
            .with_selector(INSTAMART_TAB);

        assert!(adapter.navigate_to_search(&page, "atta").await);
        assert_eq!(
            page.calls(),
            vec![
                format!("navigate {url}"),
                format!("click {INSTAMART_TAB}"),
                format!("navigate {url}"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn direct_landing_needs_no_correction() {
        let adapter = InstamartAdapter::new(Duration::ZERO);
        let page = MockPage::new();
        assert!(adapter.navigate_to_search(&page, "atta").await);
        assert_eq!(page.calls().len(), 1);
    }
}
