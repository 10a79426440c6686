//! JSON messages exchanged over the real-time channel.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use cartscout_core_types::{LocationResult, ProductRecord, SearchStatus, Target};

/// Inbound commands after field validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Initialize,
    SetLocation {
        location: String,
        services: Option<Vec<Target>>,
    },
    RetrySetLocation {
        location: String,
        services: Vec<Target>,
    },
    /// A missing term is treated as empty.
    Search { term: String },
    AddToCart { product_id: String, service: Target },
    Close,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid message format: {0}")]
    Malformed(String),
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Missing required field: {field}")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },
    #[error("Invalid field: {field}")]
    InvalidField {
        action: &'static str,
        field: &'static str,
    },
}

impl CommandError {
    /// The `action` the error envelope is tagged with.
    pub fn action(&self) -> &str {
        match self {
            CommandError::Malformed(_) => "processMessage",
            CommandError::UnknownAction(_) => "unknownAction",
            CommandError::MissingField { action, .. } | CommandError::InvalidField { action, .. } => {
                *action
            }
        }
    }
}

fn required_text(
    fields: &Map<String, Value>,
    action: &'static str,
    field: &'static str,
) -> Result<String, CommandError> {
    match fields.get(field) {
        None | Some(Value::Null) => Err(CommandError::MissingField { action, field }),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(CommandError::MissingField { action, field })
        }
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(_) => Err(CommandError::InvalidField { action, field }),
    }
}

fn target_list(
    value: &Value,
    action: &'static str,
    field: &'static str,
) -> Result<Vec<Target>, CommandError> {
    let invalid = || CommandError::InvalidField { action, field };
    let mut targets = Vec::new();
    for item in value.as_array().ok_or_else(invalid)? {
        let target: Target = item
            .as_str()
            .ok_or_else(invalid)?
            .parse()
            .map_err(|_| invalid())?;
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    Ok(targets)
}

pub fn parse_command(raw: &str) -> Result<Command, CommandError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|err| CommandError::Malformed(err.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(CommandError::Malformed("expected a JSON object".into()));
    };
    let action = fields
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::Malformed("missing action".into()))?;

    match action {
        "initialize" => Ok(Command::Initialize),
        "setLocation" => {
            let location = required_text(&fields, "setLocation", "location")?;
            let services = match fields.get("services") {
                None | Some(Value::Null) => None,
                Some(value) => {
                    let list = target_list(value, "setLocation", "services")?;
                    (!list.is_empty()).then_some(list)
                }
            };
            Ok(Command::SetLocation { location, services })
        }
        "retrySetLocation" => {
            let location = required_text(&fields, "retrySetLocation", "retryLocation")?;
            let services = match fields.get("retryServices") {
                None | Some(Value::Null) => {
                    return Err(CommandError::MissingField {
                        action: "retrySetLocation",
                        field: "retryServices",
                    })
                }
                Some(value) => target_list(value, "retrySetLocation", "retryServices")?,
            };
            if services.is_empty() {
                return Err(CommandError::MissingField {
                    action: "retrySetLocation",
                    field: "retryServices",
                });
            }
            Ok(Command::RetrySetLocation { location, services })
        }
        "search" => {
            let term = match fields.get("searchTerm") {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.trim().to_string(),
                Some(_) => {
                    return Err(CommandError::InvalidField {
                        action: "search",
                        field: "searchTerm",
                    })
                }
            };
            Ok(Command::Search { term })
        }
        "addToCart" => {
            let product_id = required_text(&fields, "addToCart", "productId")?;
            let service = required_text(&fields, "addToCart", "service")?
                .parse()
                .map_err(|_| CommandError::InvalidField {
                    action: "addToCart",
                    field: "service",
                })?;
            Ok(Command::AddToCart {
                product_id,
                service,
            })
        }
        "close" => Ok(Command::Close),
        other => Err(CommandError::UnknownAction(other.to_string())),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    Initialize,
    SetLocation,
    Search,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Loading,
    Completed,
    Error,
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub action: &'static str,
    pub step: Step,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_results: Option<Vec<LocationResult>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSearchUpdate {
    pub action: &'static str,
    pub service: Target,
    pub status: SearchStatus,
    pub message: String,
    pub has_products: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProductCount {
    pub blinkit: usize,
    pub zepto: usize,
    pub instamart: usize,
    pub total: usize,
}

impl ProductCount {
    pub fn of(products: &BTreeMap<Target, Vec<ProductRecord>>) -> Self {
        let count = |target: Target| products.get(&target).map(Vec::len).unwrap_or(0);
        let (blinkit, zepto, instamart) = (
            count(Target::Blinkit),
            count(Target::Zepto),
            count(Target::Instamart),
        );
        Self {
            blinkit,
            zepto,
            instamart,
            total: blinkit + zepto + instamart,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub status: &'static str,
    pub action: &'static str,
    pub products: BTreeMap<Target, Vec<ProductRecord>>,
    pub product_count: ProductCount,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartReply {
    pub status: &'static str,
    pub action: &'static str,
    pub product_id: String,
    pub service: Target,
    pub message: String,
}

/// `{status, action, message}` replies: close acknowledgements and every error envelope.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Envelope {
    pub status: &'static str,
    pub action: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<Target>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Status(StatusUpdate),
    Service(ServiceSearchUpdate),
    Results(SearchResults),
    Cart(CartReply),
    Envelope(Envelope),
}

impl Outbound {
    pub fn status(step: Step, status: StepStatus, message: impl Into<String>) -> Self {
        Outbound::Status(StatusUpdate {
            action: "statusUpdate",
            step,
            status,
            success: None,
            message: message.into(),
            location_results: None,
        })
    }

    pub fn completed(step: Step, message: impl Into<String>) -> Self {
        Self::status(step, StepStatus::Completed, message).with_success(true)
    }

    pub fn failed(step: Step, message: impl Into<String>) -> Self {
        Self::status(step, StepStatus::Error, message).with_success(false)
    }

    pub fn with_success(mut self, success: bool) -> Self {
        if let Outbound::Status(update) = &mut self {
            update.success = Some(success);
        }
        self
    }

    pub fn with_location_results(mut self, results: Vec<LocationResult>) -> Self {
        if let Outbound::Status(update) = &mut self {
            update.location_results = Some(results);
        }
        self
    }

    pub fn service(
        service: Target,
        status: SearchStatus,
        message: impl Into<String>,
        has_products: bool,
    ) -> Self {
        Outbound::Service(ServiceSearchUpdate {
            action: "serviceSearchUpdate",
            service,
            status,
            message: message.into(),
            has_products,
        })
    }

    pub fn results(
        status: &'static str,
        products: BTreeMap<Target, Vec<ProductRecord>>,
        message: impl Into<String>,
    ) -> Self {
        let mut products = products;
        for target in Target::ALL {
            products.entry(target).or_default();
        }
        Outbound::Results(SearchResults {
            status,
            action: "searchResults",
            product_count: ProductCount::of(&products),
            products,
            message: message.into(),
        })
    }

    pub fn cart(
        success: bool,
        product_id: impl Into<String>,
        service: Target,
        message: impl Into<String>,
    ) -> Self {
        Outbound::Cart(CartReply {
            status: if success { "success" } else { "error" },
            action: "addToCart",
            product_id: product_id.into(),
            service,
            message: message.into(),
        })
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Outbound::Envelope(Envelope {
            status: "success",
            action: "close".into(),
            message: message.into(),
            service: None,
        })
    }

    pub fn error(action: impl Into<String>, message: impl Into<String>) -> Self {
        Outbound::Envelope(Envelope {
            status: "error",
            action: action.into(),
            message: message.into(),
            service: None,
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"status":"error","action":"processMessage","message":"Failed to encode reply"}"#
                .to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_commands_with_their_fields() {
        assert_eq!(
            parse_command(r#"{"action":"initialize"}"#),
            Ok(Command::Initialize)
        );
        assert_eq!(
            parse_command(r#"{"action":"setLocation","location":" Koramangala ","services":["zepto","Zepto"]}"#),
            Ok(Command::SetLocation {
                location: "Koramangala".into(),
                services: Some(vec![Target::Zepto]),
            })
        );
        assert_eq!(
            parse_command(r#"{"action":"search"}"#),
            Ok(Command::Search { term: String::new() })
        );
        assert_eq!(
            parse_command(r#"{"action":"addToCart","productId":"p9","service":"instamart"}"#),
            Ok(Command::AddToCart {
                product_id: "p9".into(),
                service: Target::Instamart,
            })
        );
    }

    #[test]
    fn validation_errors_name_the_field() {
        let err = parse_command(r#"{"action":"setLocation","location":"  "}"#).unwrap_err();
        assert_eq!(err.to_string(), "Missing required field: location");
        assert_eq!(err.action(), "setLocation");

        let err = parse_command(r#"{"action":"retrySetLocation","retryLocation":"HSR","retryServices":["bigbasket"]}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid field: retryServices");

        let err = parse_command(r#"{"action":"retrySetLocation","retryLocation":"HSR","retryServices":[]}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required field: retryServices");

        let err = parse_command(r#"{"action":"addToCart","service":"zepto"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Missing required field: productId");
    }

    #[test]
    fn unknown_and_malformed_messages() {
        let err = parse_command(r#"{"action":"dance"}"#).unwrap_err();
        assert_eq!(err.action(), "unknownAction");
        assert_eq!(err.to_string(), "Unknown action: dance");

        assert_eq!(parse_command("not json").unwrap_err().action(), "processMessage");
        assert_eq!(parse_command(r#"{"searchTerm":"x"}"#).unwrap_err().action(), "processMessage");
    }

    #[test]
    fn outbound_shapes_match_the_wire() {
        let update = Outbound::completed(Step::SetLocation, "Location set on one or more services")
            .with_location_results(vec![LocationResult::confirmed(Target::Blinkit, "HSR")]);
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({
                "action": "statusUpdate",
                "step": "setLocation",
                "status": "completed",
                "success": true,
                "message": "Location set on one or more services",
                "locationResults": [{"service": "blinkit", "success": true, "title": "HSR"}]
            })
        );

        let results = Outbound::results("info", BTreeMap::new(), "Please provide a search term.");
        let value = serde_json::to_value(&results).unwrap();
        assert_eq!(value["products"], json!({"blinkit": [], "zepto": [], "instamart": []}));
        assert_eq!(
            value["productCount"],
            json!({"blinkit": 0, "zepto": 0, "instamart": 0, "total": 0})
        );

        let progress = Outbound::service(Target::Zepto, SearchStatus::LoadingContent, "wait", false);
        assert_eq!(
            serde_json::to_value(&progress).unwrap(),
            json!({
                "action": "serviceSearchUpdate",
                "service": "zepto",
                "status": "loading_content",
                "message": "wait",
                "hasProducts": false
            })
        );

        let err = Outbound::error("close", "No active browsers to close.");
        assert_eq!(
            err.to_json(),
            r#"{"status":"error","action":"close","message":"No active browsers to close."}"#
        );
    }
}
