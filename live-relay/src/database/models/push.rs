//! Push configuration database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{Binding, Destination, DestinationKind};

/// A watched user on a live platform.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PushUserDbModel {
    pub id: i64,
    pub uid: i64,
    /// Display name, normally filled by completion rather than stored.
    pub uname: Option<String>,
    pub room_id: Option<i64>,
    pub platform: String,
    pub enabled: bool,
}

/// A push target belonging to a [`PushUserDbModel`].
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PushTargetDbModel {
    pub id: i64,
    pub user_id: i64,
    pub platform: String,
    /// 0 = friend, 1 = group, anything else is unknown.
    #[sqlx(rename = "type")]
    pub target_type: i64,
    pub num: i64,
    pub enabled: bool,
}

impl PushTargetDbModel {
    pub fn to_destination(&self) -> Destination {
        Destination {
            enabled: self.enabled,
            ..Destination::new(
                self.platform.clone(),
                DestinationKind::from_code(self.target_type),
                self.num,
            )
        }
    }
}

/// An event binding belonging to a [`PushTargetDbModel`].
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PushMessageDbModel {
    pub id: i64,
    pub target_id: i64,
    pub event: String,
    pub handler: Option<String>,
    /// JSON object with handler parameters.
    pub params: String,
    pub enabled: bool,
}

impl PushMessageDbModel {
    pub fn to_binding(&self) -> crate::Result<Binding> {
        let params = if self.params.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.params)?
        };
        Ok(Binding {
            enabled: self.enabled,
            ..Binding::new(self.event.clone(), self.handler.as_deref(), params)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_blank_params() {
        let model = PushMessageDbModel {
            id: 1,
            target_id: 1,
            event: "live_on".into(),
            handler: None,
            params: "".into(),
            enabled: false,
        };
        let binding = model.to_binding().unwrap();
        assert!(binding.params.is_object());
        assert!(!binding.enabled);
    }

    #[test]
    fn test_target_type_codes() {
        let model = PushTargetDbModel {
            id: 1,
            user_id: 1,
            platform: "qq".into(),
            target_type: 3,
            num: 10,
            enabled: true,
        };
        assert_eq!(model.to_destination().kind, DestinationKind::Unknown);
    }
}
