//! Shared primitives used across the CartScout crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("unknown service: {0}")]
    UnknownTarget(String),
}

/// One external grocery site.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Blinkit,
    Zepto,
    Instamart,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::Blinkit, Target::Zepto, Target::Instamart];

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Blinkit => "blinkit",
            Target::Zepto => "zepto",
            Target::Instamart => "instamart",
        }
    }

    /// Synthesizes an identifier for a product the source did not name.
    pub fn generated_id(&self, index: usize) -> String {
        let token = Uuid::new_v4().simple().to_string();
        format!("{}_{}_{}", self.as_str(), index, &token[..8])
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "blinkit" => Ok(Target::Blinkit),
            "zepto" => Ok(Target::Zepto),
            "instamart" => Ok(Target::Instamart),
            other => Err(CoreError::UnknownTarget(other.to_string())),
        }
    }
}

/// Normalized product data produced by every extraction strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub id: String,
    pub name: String,
    pub price: String,
    pub original_price: Option<String>,
    pub savings: Option<String>,
    pub quantity: String,
    pub delivery_time: String,
    pub discount: Option<String>,
    pub image_url: String,
    pub available: bool,
    pub source: Target,
}

/// Per-target search progress, emitted in declaration order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Skipped,
    Loading,
    Navigating,
    LoadingContent,
    Extracting,
    Success,
    Empty,
    Error,
}

impl SearchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SearchStatus::Skipped | SearchStatus::Success | SearchStatus::Empty | SearchStatus::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStatus::Skipped => "skipped",
            SearchStatus::Loading => "loading",
            SearchStatus::Navigating => "navigating",
            SearchStatus::LoadingContent => "loading_content",
            SearchStatus::Extracting => "extracting",
            SearchStatus::Success => "success",
            SearchStatus::Empty => "empty",
            SearchStatus::Error => "error",
        }
    }
}

/// Outcome of setting the delivery locality on one target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationResult {
    pub service: Target,
    pub success: bool,
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LocationResult {
    pub fn confirmed(service: Target, title: impl Into<String>) -> Self {
        Self {
            service,
            success: true,
            title: Some(title.into()),
            error: None,
        }
    }

    pub fn failed(service: Target, error: impl Into<String>) -> Self {
        Self {
            service,
            success: false,
            title: None,
            error: Some(error.into()),
        }
    }
}

/// Result of a best-effort add-to-cart interaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CartOutcome {
    Added,
    OutOfStock,
    NotFound,
    Failed(String),
}

impl CartOutcome {
    pub fn is_added(&self) -> bool {
        matches!(self, CartOutcome::Added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_round_trips_through_str() {
        for target in Target::ALL {
            assert_eq!(target.as_str().parse::<Target>().unwrap(), target);
        }
        assert_eq!(" Zepto ".parse::<Target>().unwrap(), Target::Zepto);
        assert!("bigbasket".parse::<Target>().is_err());
    }

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let a = Target::Instamart.generated_id(3);
        let b = Target::Instamart.generated_id(3);
        assert!(a.starts_with("instamart_3_"));
        assert_ne!(a, b);
    }

    #[test]
    fn product_record_uses_camel_case_fields() {
        let record = ProductRecord {
            id: "p1".into(),
            name: "Milk".into(),
            price: "₹30".into(),
            original_price: Some("₹32".into()),
            savings: Some("₹2".into()),
            quantity: "500 ml".into(),
            delivery_time: "10 mins".into(),
            discount: None,
            image_url: String::new(),
            available: true,
            source: Target::Blinkit,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["originalPrice"], "₹32");
        assert_eq!(value["deliveryTime"], "10 mins");
        assert_eq!(value["source"], "blinkit");
    }

    #[test]
    fn status_serializes_snake_case() {
        let value = serde_json::to_value(SearchStatus::LoadingContent).unwrap();
        assert_eq!(value, "loading_content");
        assert!(SearchStatus::Skipped.is_terminal());
        assert!(!SearchStatus::Extracting.is_terminal());
    }
}
