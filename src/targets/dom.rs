//! In-page probes shared by the storefront adapters.
//!
//! Everything here runs through `PageDriver::evaluate` or the selector helpers, so a storefront only
//! has to describe its markup ([`CardSpec`], [`ContentProbe`]) instead of writing scripts.

use std::time::Duration;

use cdp_adapter::{AdapterError, PageDriver, SelectorState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use cartscout_core_types::{ProductRecord, Target};

use crate::pricing;

pub const LOADER_TIMEOUT: Duration = Duration::from_secs(10);
pub const LOADER_SETTLE: Duration = Duration::from_secs(1);
pub const HEURISTIC_SETTLE: Duration = Duration::from_secs(5);

/// Per-field selectors for scraping rendered product cards.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSpec {
    pub card: &'static str,
    pub id_attrs: &'static [&'static str],
    pub name: &'static [&'static str],
    pub price: &'static [&'static str],
    pub mrp: &'static [&'static str],
    pub discount: &'static [&'static str],
    pub quantity: &'static [&'static str],
    pub delivery: &'static [&'static str],
    pub image: &'static [&'static str],
    pub sold_out: &'static [&'static str],
    /// Trailing icon text some storefronts render inside the quantity node.
    #[serde(skip)]
    pub quantity_cut: Option<&'static str>,
}

/// How an empty search result announces itself.
#[derive(Clone, Copy, Debug)]
pub enum NoResultsMarker {
    Selector(&'static str),
    BodyText(&'static [&'static str]),
}

/// Content-ready detection for one storefront.
#[derive(Clone, Debug)]
pub struct ContentProbe {
    pub loader: &'static str,
    pub markers: &'static [&'static str],
    pub marker_timeout: Duration,
    pub marker_state: SelectorState,
    pub no_results: NoResultsMarker,
    /// Extra pause once a marker shows up, for late-rendering fields.
    pub settle: Duration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCard {
    id: Option<String>,
    name: Option<String>,
    price: Option<String>,
    mrp: Option<String>,
    discount: Option<String>,
    quantity: Option<String>,
    delivery: Option<String>,
    image: Option<String>,
    #[serde(default)]
    sold_out: bool,
}

/// Quotes a value as a JavaScript string literal.
pub fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Escapes a value for use inside a double-quoted CSS attribute selector.
pub fn css_attr_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn card_script(layout: &CardSpec) -> String {
    let layout_json = serde_json::to_string(layout).unwrap_or_else(|_| "{}".to_string());
    format!(
        r#"(() => {{
  const layout = {layout_json};
  const pick = (root, sels) => {{
    for (const sel of sels) {{
      const el = root.querySelector(sel);
      if (el) return el;
    }}
    return null;
  }};
  const text = (root, sels) => {{
    const el = pick(root, sels);
    const value = el && el.textContent ? el.textContent.trim() : '';
    return value.length ? value : null;
  }};
  return Array.from(document.querySelectorAll(layout.card)).map((card) => {{
    let id = null;
    for (const attr of layout.idAttrs) {{
      const value = card.getAttribute(attr);
      if (value) {{ id = value; break; }}
    }}
    const img = pick(card, layout.image);
    return {{
      id,
      name: text(card, layout.name),
      price: text(card, layout.price),
      mrp: text(card, layout.mrp),
      discount: text(card, layout.discount),
      quantity: text(card, layout.quantity),
      delivery: text(card, layout.delivery),
      image: img ? (img.getAttribute('src') || img.getAttribute('data-src')) : null,
      soldOut: layout.soldOut.length > 0 && pick(card, layout.soldOut) !== null,
    }};
  }});
}})()"#
    )
}

/// Scrapes every rendered card. A card that cannot be read is skipped, not fatal.
pub async fn extract_cards(
    page: &dyn PageDriver,
    target: Target,
    layout: &CardSpec,
    default_delivery: &str,
) -> Result<Vec<ProductRecord>, AdapterError> {
    let value = page.evaluate(&card_script(layout)).await?;
    let Value::Array(cards) = value else {
        return Ok(Vec::new());
    };

    let mut products = Vec::with_capacity(cards.len());
    for (index, raw) in cards.into_iter().enumerate() {
        let card: RawCard = match serde_json::from_value(raw) {
            Ok(card) => card,
            Err(err) => {
                debug!(target: "targets", %target, index, %err, "skipping unreadable card");
                continue;
            }
        };
        match card_to_record(target, index, card, layout, default_delivery) {
            Some(record) => products.push(record),
            None => debug!(target: "targets", %target, index, "skipping card without a name"),
        }
    }
    debug!(target: "targets", %target, count = products.len(), "dom extraction finished");
    Ok(products)
}

fn card_to_record(
    target: Target,
    index: usize,
    card: RawCard,
    layout: &CardSpec,
    default_delivery: &str,
) -> Option<ProductRecord> {
    let name = card.name.filter(|n| !n.is_empty())?;
    let price = card
        .price
        .as_deref()
        .and_then(pricing::with_currency)
        .unwrap_or_else(|| "Price Not Available".to_string());
    let original_price = card.mrp.as_deref().and_then(pricing::with_currency);
    let savings = pricing::savings(&price, original_price.as_deref());
    let quantity = card
        .quantity
        .map(|q| match layout.quantity_cut {
            Some(marker) => q.split(marker).next().unwrap_or_default().trim().to_string(),
            None => q,
        })
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| "N/A".to_string());

    Some(ProductRecord {
        id: card
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| target.generated_id(index)),
        name,
        price,
        original_price,
        savings,
        quantity,
        delivery_time: card.delivery.unwrap_or_else(|| default_delivery.to_string()),
        discount: card.discount,
        image_url: card.image.unwrap_or_default(),
        available: !card.sold_out,
        source: target,
    })
}

/// Waits for a visible loader to disappear. Times out quietly.
pub async fn wait_for_loader(page: &dyn PageDriver, loader: &str) {
    if !page.exists(loader).await.unwrap_or(false) {
        return;
    }
    match page
        .wait_for_selector(loader, SelectorState::Hidden, LOADER_TIMEOUT)
        .await
    {
        Ok(true) => {}
        Ok(false) => debug!(target: "targets", loader, "loader still present after timeout"),
        Err(err) => debug!(target: "targets", loader, %err, "loader wait failed"),
    }
    tokio::time::sleep(LOADER_SETTLE).await;
}

/// First marker that reaches `state` within its own timeout.
pub async fn wait_for_any<'a>(
    page: &dyn PageDriver,
    selectors: &[&'a str],
    state: SelectorState,
    timeout: Duration,
) -> Option<&'a str> {
    for selector in selectors {
        match page.wait_for_selector(selector, state, timeout).await {
            Ok(true) => return Some(selector),
            Ok(false) => debug!(target: "targets", selector, "content marker not found"),
            Err(err) => debug!(target: "targets", selector, %err, "content marker probe failed"),
        }
    }
    None
}

pub async fn body_mentions(page: &dyn PageDriver, phrases: &[&str]) -> bool {
    let list = serde_json::to_string(phrases).unwrap_or_else(|_| "[]".to_string());
    let script = format!(
        "(() => {{ const text = document.body ? document.body.innerText : ''; return {list}.some((p) => text.includes(p)); }})()"
    );
    matches!(page.evaluate(&script).await, Ok(Value::Bool(true)))
}

pub async fn no_results_shown(page: &dyn PageDriver, marker: NoResultsMarker) -> bool {
    match marker {
        NoResultsMarker::Selector(selector) => page.exists(selector).await.unwrap_or(false),
        NoResultsMarker::BodyText(phrases) => body_mentions(page, phrases).await,
    }
}

/// Last-resort check: a handful of images or any priced text on the page.
pub async fn looks_populated(page: &dyn PageDriver) -> bool {
    const SCRIPT: &str = r#"(() => {
  const hasImages = document.querySelectorAll('img').length > 3;
  const hasPrices = Array.from(document.querySelectorAll('body *')).some(
    (el) => el.childElementCount === 0 && el.textContent && el.textContent.includes('₹'));
  return hasImages || hasPrices;
})()"#;
    matches!(page.evaluate(SCRIPT).await, Ok(Value::Bool(true)))
}

/// Full content-ready detection: loader, markers, then the empty-result and heuristic checks.
pub async fn detect_content(page: &dyn PageDriver, target: Target, probe: &ContentProbe) -> bool {
    wait_for_loader(page, probe.loader).await;

    if let Some(marker) =
        wait_for_any(page, probe.markers, probe.marker_state, probe.marker_timeout).await
    {
        debug!(target: "targets", %target, marker, "content present");
        if !probe.settle.is_zero() {
            tokio::time::sleep(probe.settle).await;
        }
        return true;
    }

    if no_results_shown(page, probe.no_results).await {
        debug!(target: "targets", %target, "no-results marker shown");
        return true;
    }

    tokio::time::sleep(HEURISTIC_SETTLE).await;
    let populated = looks_populated(page).await;
    debug!(target: "targets", %target, populated, "content heuristic evaluated");
    populated
}

/// Reads the first selector whose text looks like a real address.
pub async fn first_meaningful_text(
    page: &dyn PageDriver,
    selectors: &[&str],
    rejected_words: &[&str],
) -> Option<String> {
    for selector in selectors {
        let Ok(Some(text)) = page.text_content(selector).await else {
            continue;
        };
        let text = text.trim();
        let lower = text.to_lowercase();
        if text.chars().count() > 2 && !rejected_words.iter().any(|w| lower.contains(w)) {
            return Some(text.to_string());
        }
    }
    None
}

/// Waits for a selector and clicks it; `false` when either step fails.
pub async fn wait_and_click(page: &dyn PageDriver, selector: &str, timeout: Duration) -> bool {
    match page
        .wait_for_selector(selector, SelectorState::Visible, timeout)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            debug!(target: "targets", selector, "element did not appear");
            return false;
        }
        Err(err) => {
            debug!(target: "targets", selector, %err, "wait failed");
            return false;
        }
    }
    match page.click(selector, timeout).await {
        Ok(()) => true,
        Err(err) => {
            debug!(target: "targets", selector, %err, "click failed");
            false
        }
    }
}
