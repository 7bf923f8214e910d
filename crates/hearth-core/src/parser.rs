//! Automation description parser.
//!
//! Converts a deserialized automation description into normalized
//! `ParsedAction` trees. Parsing is tolerant by default: a malformed node is
//! skipped with a warning and the remaining nodes still parse. Only the YAML
//! entry point fails as a whole, and only for input that is not a mapping at
//! the root.

use serde_json::{json, Value};
use tracing::warn;

use crate::error::ParseError;
use crate::types::{Choice, ParsedAction};

/// Parse the `actions` list of an automation description.
///
/// Returns an empty list when the key is absent or empty. Elements that
/// fail to extract are skipped with a warning.
pub fn parse_automation(automation: &Value) -> Vec<ParsedAction> {
    let actions = match automation.get("actions").and_then(Value::as_array) {
        Some(actions) if !actions.is_empty() => actions,
        _ => {
            warn!("automation description has no actions to parse");
            return Vec::new();
        }
    };

    let mut parsed = Vec::with_capacity(actions.len());
    for (index, node) in actions.iter().enumerate() {
        match parse_node(node) {
            Ok(Some(action)) => parsed.push(action),
            // parse_node already logged the unrecognized shape
            Ok(None) => {}
            Err(error) => warn!(index, %error, "skipping malformed action node"),
        }
    }
    parsed
}

/// Parse an automation from its YAML source.
///
/// Deserialization errors and a non-mapping root are reported as
/// `ParseError`; per-node tolerance is the same as `parse_automation`.
pub fn parse_automation_yaml(source: &str) -> Result<Vec<ParsedAction>, ParseError> {
    let root: Value = serde_yaml::from_str(source)?;
    if !root.is_object() {
        return Err(ParseError::NotAMapping);
    }
    Ok(parse_automation(&root))
}

/// Extract one action node.
///
/// Dispatches on key presence in priority order: `delay`, `action`,
/// `sequence`, `parallel`, `repeat`, `choose`; first match wins.
/// `Ok(None)` means the node shape is unrecognized (the caller filters it).
pub fn parse_node(node: &Value) -> Result<Option<ParsedAction>, ParseError> {
    if let Some(delay) = node.get("delay") {
        let delay_seconds = parse_delay_value(delay)?;
        return Ok(Some(ParsedAction::Delay { delay_seconds }));
    }

    if let Some(action) = node.get("action").and_then(Value::as_str) {
        return parse_service_call(node, action).map(Some);
    }

    if let Some(children) = node.get("sequence").and_then(Value::as_array) {
        return Ok(Some(ParsedAction::Sequence {
            actions: parse_children(children),
        }));
    }

    if let Some(children) = node.get("parallel").and_then(Value::as_array) {
        return Ok(Some(ParsedAction::Parallel {
            actions: parse_children(children),
        }));
    }

    if let Some(repeat) = node.get("repeat") {
        let count = repeat.get("count").and_then(Value::as_u64).unwrap_or(1) as u32;
        let actions = repeat
            .get("sequence")
            .and_then(Value::as_array)
            .map(|children| parse_children(children))
            .unwrap_or_default();
        return Ok(Some(ParsedAction::Repeat { count, actions }));
    }

    if let Some(choices) = node.get("choose").and_then(Value::as_array) {
        return Ok(Some(ParsedAction::Choose {
            choices: choices.iter().map(parse_choice).collect(),
        }));
    }

    warn!(node = %node, "unrecognized action node");
    Ok(None)
}

fn parse_service_call(node: &Value, action: &str) -> Result<ParsedAction, ParseError> {
    let Some((domain, service)) = action.split_once('.') else {
        return Err(ParseError::MalformedService(action.to_string()));
    };

    let target = match node.get("target") {
        Some(Value::Object(fields)) => Some(Value::Object(fields.clone())),
        // Legacy shorthand: a bare entity_id at the top level.
        _ => node
            .get("entity_id")
            .map(|entity_id| json!({ "entity_id": entity_id })),
    };

    Ok(ParsedAction::ServiceCall {
        action: action.to_string(),
        domain: domain.to_string(),
        service: service.to_string(),
        target,
        data: node.get("data").cloned(),
    })
}

/// Recursive child extraction: children that fail to parse are dropped
/// without aborting the parent.
fn parse_children(children: &[Value]) -> Vec<ParsedAction> {
    children
        .iter()
        .filter_map(|child| match parse_node(child) {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(%error, "dropping malformed child action");
                None
            }
        })
        .collect()
}

fn parse_choice(entry: &Value) -> Choice {
    let conditions = entry
        .get("conditions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let sequence = entry
        .get("sequence")
        .and_then(Value::as_array)
        .map(|children| parse_children(children))
        .unwrap_or_default();
    Choice {
        conditions,
        sequence,
    }
}

/// Normalize a delay specification to seconds.
///
/// Accepts a bare number, an `{hours, minutes, seconds}` mapping (missing
/// keys default to 0, unknown keys are ignored), or a clock string:
/// `"H:M:S"`, `"M:S"`, or raw seconds.
pub fn parse_delay_value(value: &Value) -> Result<f64, ParseError> {
    match value {
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| ParseError::InvalidDelay(value.to_string())),
        Value::Object(map) => {
            let mut total = 0.0;
            for (key, factor) in [("seconds", 1.0), ("minutes", 60.0), ("hours", 3600.0)] {
                if let Some(component) = map.get(key) {
                    let number = component
                        .as_f64()
                        .ok_or_else(|| ParseError::InvalidDelay(value.to_string()))?;
                    total += number * factor;
                }
            }
            Ok(total)
        }
        Value::String(text) => parse_delay_string(text),
        _ => Err(ParseError::InvalidDelay(value.to_string())),
    }
}

fn parse_delay_string(text: &str) -> Result<f64, ParseError> {
    let component = |part: &str| {
        part.trim()
            .parse::<f64>()
            .map_err(|_| ParseError::InvalidDelay(text.to_string()))
    };

    let parts: Vec<&str> = text.split(':').collect();
    match parts.as_slice() {
        [hours, minutes, seconds] => {
            Ok(component(hours)? * 3600.0 + component(minutes)? * 60.0 + component(seconds)?)
        }
        [minutes, seconds] => Ok(component(minutes)? * 60.0 + component(seconds)?),
        [seconds] => component(seconds),
        _ => Err(ParseError::InvalidDelay(text.to_string())),
    }
}
