use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{PageDriver, SelectorState};
use serde_json::{Map, Value};
use tracing::debug;

use cartscout_core_types::{ProductRecord, Target};

use super::dom::{self, CardSpec, ContentProbe, NoResultsMarker};
use super::{
    ensure_on_site, identity_id, product_snippets, CartSpec, TargetAdapter, TargetDescriptor,
    LOCATION_STEP_TIMEOUT,
};
use crate::pricing;

const LOCALITY_INPUT: &str = r#"[name="select-locality"]"#;
const LOCALITY_INPUT_ENABLED: &str = r#"[name="select-locality"]:not([disabled])"#;
const FIRST_SUGGESTION: &str = ".LocationSearchList__LocationListContainer-sc-93rfr7-0:nth-child(1)";
const ETA_CONTAINER: &str = r#"[class^="LocationBar__EtaContainer-"]"#;
const ETA_SUBTITLE: &str =
    r#"[class^="LocationBar__EtaContainer-"] [class^="LocationBar__Subtitle-"]"#;
const SUGGESTION_PAUSE: Duration = Duration::from_secs(2);
const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

pub static DESCRIPTOR: TargetDescriptor = TargetDescriptor {
    target: Target::Blinkit,
    home_url: "https://blinkit.com/",
    search_url: "https://blinkit.com/s/?q=",
    content: ContentProbe {
        loader: r#".LoadingIcon, .spinner, [class*="loading"], [class*="Loading"]"#,
        markers: &[
            r#"div[role="button"][id]"#,
            r#"div[id][data-pf="reset"]"#,
            ".ProductCard__Wrapper",
            r#"[data-testid*="product"]"#,
            "div.tw-flex-col[id]",
            r#"div[class*="product"]"#,
        ],
        marker_timeout: Duration::from_secs(3),
        marker_state: SelectorState::Attached,
        no_results: NoResultsMarker::Selector(
            r#".EmptySearchResults, [class*="empty"], [class*="no-results"]"#,
        ),
        settle: Duration::ZERO,
    },
    cards: CardSpec {
        card: r#"div[role="button"][id], div[id][data-pf="reset"]"#,
        id_attrs: &["id"],
        name: &[
            "div.tw-text-300.tw-font-semibold",
            r#"[class*="Product__UpdatedTitle"]"#,
            r#"[class*="line-clamp"]"#,
        ],
        price: &[
            "div.tw-text-200.tw-font-semibold",
            r#"[class*="Product__UpdatedPriceAndAtcContainer"] div div"#,
        ],
        mrp: &["div.tw-line-through", r#"[class*="line-through"]"#],
        discount: &[r#"[class*="offer"]"#, "div.tw-text-050.tw-font-bold"],
        quantity: &[
            "div.tw-text-200.tw-font-medium",
            r#"[class*="variant"]"#,
        ],
        delivery: &[r#"[class*="eta"]"#, "div.tw-text-050.tw-font-bold.tw-uppercase"],
        image: &["img"],
        sold_out: &[r#"[class*="OutOfStock"]"#, r#"[class*="out-of-stock"]"#],
        quantity_cut: None,
    },
    cart: CartSpec {
        id_attrs: &["id"],
        out_of_stock: r#"[class*="OutOfStock"], [class*="out-of-stock"]"#,
        buttons: &[
            ".tw-rounded-md > div",
            ".tw-rounded-md",
            r#"div[role="button"]"#,
            ".tw-text-base-green",
        ],
    },
    default_delivery: "N/A",
};

/// blinkit.com: text-object payload fields and a locality search box in the header.
pub struct BlinkitAdapter {
    typing_delay: Duration,
}

impl BlinkitAdapter {
    pub fn new(typing_delay: Duration) -> Self {
        Self { typing_delay }
    }

    fn map_snippet(index: usize, data: &Map<String, Value>) -> Option<ProductRecord> {
        let text_of = |path: &[&str]| {
            let (first, rest) = path.split_first()?;
            rest.iter()
                .try_fold(data.get(*first)?, |node, key| node.get(*key))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let name = text_of(&["name", "text"])?;
        let price = text_of(&["normal_price", "text"])
            .or_else(|| data.get("price").and_then(pricing::price_from_value))
            .unwrap_or_else(|| "Price Not Available".to_string());
        let original_price = text_of(&["mrp", "text"]);
        let savings = pricing::savings(&price, original_price.as_deref());
        let available = match (data.get("is_sold_out"), data.get("inventory")) {
            (Some(sold_out), _) => !sold_out.as_bool().unwrap_or(false),
            (None, Some(inventory)) => inventory.as_f64().map(|n| n > 0.0).unwrap_or(true),
            (None, None) => true,
        };

        Some(ProductRecord {
            id: identity_id(data).unwrap_or_else(|| Target::Blinkit.generated_id(index)),
            name,
            price,
            original_price,
            savings,
            quantity: text_of(&["variant", "text"]).unwrap_or_else(|| "N/A".to_string()),
            delivery_time: text_of(&["eta_tag", "title", "text"]).unwrap_or_else(|| "N/A".to_string()),
            discount: text_of(&["offer_tag", "title", "text"]).map(|t| t.replace('\n', " ")),
            image_url: data
                .get("image")
                .and_then(|img| img.get("url"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            available,
            source: Target::Blinkit,
        })
    }

    async fn confirmed_title(page: &dyn PageDriver) -> Option<String> {
        let visible = page
            .wait_for_selector(ETA_CONTAINER, SelectorState::Visible, VERIFY_TIMEOUT)
            .await
            .unwrap_or(false);
        if !visible {
            debug!(target: "targets", target = %Target::Blinkit, "eta container not shown");
            return None;
        }
        page.text_content(ETA_SUBTITLE)
            .await
            .ok()
            .flatten()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

#[async_trait]
impl TargetAdapter for BlinkitAdapter {
    fn descriptor(&self) -> &'static TargetDescriptor {
        &DESCRIPTOR
    }

    fn extract_structured(&self, payload: &Value) -> Vec<ProductRecord> {
        let products: Vec<ProductRecord> = product_snippets(payload)
            .into_iter()
            .filter_map(|(index, data)| {
                let record = Self::map_snippet(index, data);
                if record.is_none() {
                    debug!(target: "targets", target = %Target::Blinkit, index, "snippet skipped");
                }
                record
            })
            .collect();
        debug!(target: "targets", target = %Target::Blinkit, count = products.len(), "payload mapped");
        products
    }

    async fn attempt_location(&self, page: &dyn PageDriver, location: &str) -> Option<String> {
        if !ensure_on_site(page, Target::Blinkit, "blinkit.com", DESCRIPTOR.home_url).await {
            return None;
        }
        if !dom::wait_and_click(page, LOCALITY_INPUT, LOCATION_STEP_TIMEOUT).await {
            return None;
        }
        let ready = page
            .wait_for_selector(
                LOCALITY_INPUT_ENABLED,
                SelectorState::Attached,
                LOCATION_STEP_TIMEOUT,
            )
            .await
            .unwrap_or(false);
        if !ready {
            return None;
        }
        page.type_text(LOCALITY_INPUT, location, self.typing_delay)
            .await
            .ok()?;
        tokio::time::sleep(SUGGESTION_PAUSE).await;
        if !dom::wait_and_click(page, FIRST_SUGGESTION, LOCATION_STEP_TIMEOUT).await {
            return None;
        }
        tokio::time::sleep(SUGGESTION_PAUSE).await;
        Self::confirmed_title(page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_text_object_fields() {
        let payload = json!({"response": {"snippets": [
            {"widget_type": "image_text_vr_type_header", "data": {"name": {"text": "Results"}}},
            {"data": {
                "identity": {"id": "392785"},
                "name": {"text": "Amul Taaza Toned Milk"},
                "normal_price": {"text": "₹27"},
                "mrp": {"text": "₹29"},
                "variant": {"text": "500 ml"},
                "image": {"url": "https://cdn/amul.png"},
                "eta_tag": {"title": {"text": "8 mins"}},
                "offer_tag": {"title": {"text": "6%\nOFF"}},
                "inventory": 4
            }},
            {"data": {
                "identity": {"id": "55"},
                "name": {"text": "Mother Dairy Cow Milk"},
                "price": 56,
                "is_sold_out": true
            }},
            {"data": {
                "identity": {"id": "71"},
                "name": {"text": "Paneer"},
                "price": 89.5
            }}
        ]}});

        let products = BlinkitAdapter::new(Duration::ZERO).extract_structured(&payload);
        assert_eq!(products.len(), 3);
        assert_eq!(products[2].price, "₹89.50");

        let amul = &products[0];
        assert_eq!(amul.id, "392785");
        assert_eq!(amul.price, "₹27");
        assert_eq!(amul.original_price.as_deref(), Some("₹29"));
        assert_eq!(amul.savings.as_deref(), Some("₹2"));
        assert_eq!(amul.quantity, "500 ml");
        assert_eq!(amul.delivery_time, "8 mins");
        assert_eq!(amul.discount.as_deref(), Some("6% OFF"));
        assert!(amul.available);

        let cow = &products[1];
        assert_eq!(cow.price, "₹56");
        assert_eq!(cow.original_price, None);
        assert_eq!(cow.savings, None);
        assert_eq!(cow.quantity, "N/A");
        assert_eq!(cow.delivery_time, "N/A");
        assert!(!cow.available);
    }

    #[test]
    fn entries_without_text_name_are_skipped() {
        let payload = json!({"response": {"snippets": [
            {"data": {"identity": {"id": "1"}, "name": "plain string"}},
            {"data": {"identity": {"id": "2"}, "name": {"text": "  "}}}
        ]}});
        let adapter = BlinkitAdapter::new(Duration::ZERO);
        assert!(adapter.extract_structured(&payload).is_empty());
        assert!(adapter.extract_structured(&json!({})).is_empty());
    }

    #[test]
    fn search_url_escapes_term() {
        let adapter = BlinkitAdapter::new(Duration::ZERO);
        assert_eq!(
            adapter.search_url("brown bread"),
            "https://blinkit.com/s/?q=brown+bread"
        );
    }
}
