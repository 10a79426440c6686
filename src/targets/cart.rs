//! Best-effort add-to-cart against a rendered search page.

use std::time::Duration;

use cdp_adapter::PageDriver;
use serde_json::Value;
use tracing::{debug, info, warn};

use cartscout_core_types::{CartOutcome, Target};

use super::dom::{css_attr_value, js_string};

const CLICK_TIMEOUT: Duration = Duration::from_secs(2);
const CONFIRM_PAUSE: Duration = Duration::from_secs(1);

/// Where a storefront keeps product ids and add buttons.
#[derive(Clone, Debug)]
pub struct CartSpec {
    /// Attributes that may carry the product id on the card element.
    pub id_attrs: &'static [&'static str],
    pub out_of_stock: &'static str,
    /// Button selectors, relative to the card.
    pub buttons: &'static [&'static str],
}

impl CartSpec {
    fn card_selector(&self, product_id: &str) -> String {
        let id = css_attr_value(product_id);
        self.id_attrs
            .iter()
            .map(|attr| format!("[{attr}=\"{id}\"]"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn scoped(&self, product_id: &str, button: &str) -> String {
        let id = css_attr_value(product_id);
        self.id_attrs
            .iter()
            .map(|attr| format!("[{attr}=\"{id}\"] {button}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn probe_script(&self, product_id: &str) -> String {
        format!(
            r#"(() => {{
  const card = document.querySelector({card});
  if (!card) return 'missing';
  if (card.querySelector({oos})) return 'out_of_stock';
  return 'ready';
}})()"#,
            card = js_string(&self.card_selector(product_id)),
            oos = js_string(self.out_of_stock),
        )
    }

    fn text_click_script(&self, product_id: &str) -> String {
        format!(
            r#"(() => {{
  const card = document.querySelector({card});
  if (!card) return false;
  const candidates = Array.from(card.querySelectorAll('button, [role="button"], [tabindex="0"]'));
  const add = candidates.find((el) => (el.textContent || '').toLowerCase().includes('add'));
  if (!add) return false;
  add.click();
  return true;
}})()"#,
            card = js_string(&self.card_selector(product_id)),
        )
    }
}

pub async fn add_to_cart(
    page: &dyn PageDriver,
    target: Target,
    layout: &CartSpec,
    product_id: &str,
) -> CartOutcome {
    match page.evaluate(&layout.probe_script(product_id)).await {
        Ok(Value::String(state)) => match state.as_str() {
            "missing" => return CartOutcome::NotFound,
            "out_of_stock" => return CartOutcome::OutOfStock,
            _ => {}
        },
        Ok(other) => {
            debug!(target: "targets", %target, ?other, "unexpected cart probe result");
        }
        Err(err) => return CartOutcome::Failed(err.to_string()),
    }

    for button in layout.buttons {
        let selector = layout.scoped(product_id, button);
        if !page.exists(&selector).await.unwrap_or(false) {
            continue;
        }
        match page.click(&selector, CLICK_TIMEOUT).await {
            Ok(()) => {
                tokio::time::sleep(CONFIRM_PAUSE).await;
                info!(target: "targets", %target, product_id, button, "add button clicked");
                return CartOutcome::Added;
            }
            Err(err) => {
                debug!(target: "targets", %target, button, %err, "add button click failed");
            }
        }
    }

    match page.evaluate(&layout.text_click_script(product_id)).await {
        Ok(Value::Bool(true)) => {
            info!(target: "targets", %target, product_id, "add button clicked by text match");
            CartOutcome::Added
        }
        Ok(_) => CartOutcome::Failed("add button not found".to_string()),
        Err(err) => {
            warn!(target: "targets", %target, product_id, %err, "text-match click failed");
            CartOutcome::Failed(err.to_string())
        }
    }
}
