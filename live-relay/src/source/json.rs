//! JSON file source.
//!
//! The file holds a top-level array of users:
//!
//! ```json
//! [
//!   {
//!     "uid": 1, "platform": "bilibili", "enabled": true,
//!     "targets": [
//!       {
//!         "platform": "qq", "type": 1, "num": 123456,
//!         "messages": [
//!           { "event": "live_on", "handler": "builtin.text", "params": { "template": "{uname} is live" } }
//!         ]
//!       }
//!     ]
//!   }
//! ]
//! ```
//!
//! `enabled` defaults to `true` at every level, `handler` and `params` are optional.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::{Binding, Destination, DestinationKind, Subscriber};
use crate::{Error, Result};

use super::SubscriberSource;

const USER_REQUIRED_FIELDS: [&str; 2] = ["uid", "platform"];
const TARGET_REQUIRED_FIELDS: [&str; 3] = ["platform", "type", "num"];
const MESSAGE_REQUIRED_FIELDS: [&str; 1] = ["event"];

/// Reads subscribers from a JSON file.
#[derive(Debug, Clone)]
pub struct JsonSource {
    path: PathBuf,
}

impl JsonSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SubscriberSource for JsonSource {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn load(&self) -> Result<Vec<Subscriber>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::config(format!(
                    "Data source file does not exist: {}",
                    self.path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        parse_subscribers(&content)
    }
}

/// Parse the JSON configuration format.
pub fn parse_subscribers(json: &str) -> Result<Vec<Subscriber>> {
    let root: Value = serde_json::from_str(json)?;
    let users = root
        .as_array()
        .ok_or_else(|| Error::config("Data source JSON must be an array of users"))?;

    users.iter().map(parse_user).collect()
}

fn parse_user(value: &Value) -> Result<Subscriber> {
    let object = as_object(value, "user")?;
    require(object, &USER_REQUIRED_FIELDS)?;

    let mut subscriber = Subscriber::new(get_str(object, "platform")?, get_i64(object, "uid")?);
    subscriber.enabled = get_enabled(object)?;

    if let Some(targets) = object.get("targets").filter(|v| !v.is_null()) {
        let targets = targets
            .as_array()
            .ok_or_else(|| Error::config("Field targets must be an array"))?;
        subscriber.destinations = targets.iter().map(parse_target).collect::<Result<_>>()?;
    }

    Ok(subscriber)
}

fn parse_target(value: &Value) -> Result<Destination> {
    let object = as_object(value, "target")?;
    require(object, &TARGET_REQUIRED_FIELDS)?;

    let mut destination = Destination::new(
        get_str(object, "platform")?,
        DestinationKind::from_code(get_i64(object, "type")?),
        get_i64(object, "num")?,
    );
    destination.enabled = get_enabled(object)?;

    if let Some(messages) = object.get("messages").filter(|v| !v.is_null()) {
        let messages = messages
            .as_array()
            .ok_or_else(|| Error::config("Field messages must be an array"))?;
        destination.bindings = messages.iter().map(parse_message).collect::<Result<_>>()?;
    }

    Ok(destination)
}

fn parse_message(value: &Value) -> Result<Binding> {
    let object = as_object(value, "message")?;
    require(object, &MESSAGE_REQUIRED_FIELDS)?;

    let handler = match object.get("handler") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => return Err(Error::config("Field handler must be a string")),
    };
    let params = match object.get("params") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(params @ Value::Object(_)) => params.clone(),
        Some(_) => return Err(Error::config("Field params must be an object")),
    };

    let mut binding = Binding::new(get_str(object, "event")?, handler, params);
    binding.enabled = get_enabled(object)?;
    Ok(binding)
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| Error::config(format!("Each {what} must be a JSON object")))
}

fn require(object: &Map<String, Value>, fields: &[&str]) -> Result<()> {
    match fields.iter().find(|f| !object.contains_key(**f)) {
        Some(missing) => Err(Error::config(format!(
            "Malformed data source JSON, missing field {missing}"
        ))),
        None => Ok(()),
    }
}

fn get_str(object: &Map<String, Value>, field: &str) -> Result<String> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::config(format!("Field {field} must be a string")))
}

fn get_i64(object: &Map<String, Value>, field: &str) -> Result<i64> {
    object
        .get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::config(format!("Field {field} must be an integer")))
}

fn get_enabled(object: &Map<String, Value>) -> Result<bool> {
    match object.get("enabled") {
        None | Some(Value::Null) => Ok(true),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(Error::config("Field enabled must be a boolean")),
    }
}
