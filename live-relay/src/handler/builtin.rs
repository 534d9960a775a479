//! Handlers shipped with the binary.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{EventHandler, HandlerContext};
use crate::Result;
use crate::domain::{LiveEvent, OutboundMessage};

/// Sends a text rendered from the binding's `template` parameter.
///
/// Supported placeholders: `{uname}`, `{uid}`, `{room_id}`, `{platform}`,
/// `{event}`, `{sender}` and `{content}`. Message placeholders such as
/// `{next}` or `{at=..}` pass through untouched.
#[derive(Debug, Default)]
pub struct TextHandler;

impl TextHandler {
    pub const ID: &'static str = "builtin.text";

    const DEFAULT_TEMPLATE: &'static str = "{uname} {event} {content}";

    pub fn render(template: &str, event: &LiveEvent, ctx: &HandlerContext<'_>) -> String {
        let subscriber = ctx.subscriber;
        let uname = event
            .source
            .uname
            .clone()
            .unwrap_or_else(|| subscriber.display_name());
        let room_id = event
            .source
            .room_id
            .or(subscriber.room_id)
            .map(|id| id.to_string())
            .unwrap_or_default();

        template
            .replace("{uname}", &uname)
            .replace("{uid}", &subscriber.uid.to_string())
            .replace("{room_id}", &room_id)
            .replace("{platform}", &event.platform)
            .replace("{event}", event.event_type())
            .replace("{sender}", event.sender().map(|s| s.uname.as_str()).unwrap_or(""))
            .replace("{content}", &event.content().unwrap_or_default())
            .trim()
            .to_string()
    }
}

#[async_trait]
impl EventHandler for TextHandler {
    fn id(&self) -> &str {
        Self::ID
    }

    fn default_params(&self) -> Value {
        json!({ "template": Self::DEFAULT_TEMPLATE })
    }

    async fn handle(
        &self,
        event: &LiveEvent,
        ctx: &HandlerContext<'_>,
    ) -> Result<Vec<OutboundMessage>> {
        let template = ctx.param_str("template").unwrap_or(Self::DEFAULT_TEMPLATE);
        let text = Self::render(template, event, ctx);
        Ok(OutboundMessage::for_destination(ctx.destination, &text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Binding, Destination, DestinationKind, LiveEventPayload, StreamerInfo, Subscriber, UserInfo,
    };

    fn fixture(params: Value) -> (Subscriber, LiveEvent) {
        let mut subscriber = Subscriber::new("bilibili", 42).with_destination(
            Destination::new("qq", DestinationKind::Group, 100).with_binding(Binding::new(
                "danmu",
                Some(TextHandler::ID),
                params,
            )),
        );
        subscriber.uname = Some("streamer".into());
        subscriber.room_id = Some(7);

        let event = LiveEvent::new(
            "bilibili",
            StreamerInfo::new(42),
            LiveEventPayload::Danmu {
                sender: UserInfo {
                    uid: 1,
                    uname: "fan".into(),
                    face: None,
                },
                content: "hello".into(),
                content_text: "hello".into(),
            },
        );
        (subscriber, event)
    }

    #[tokio::test]
    async fn test_template_rendering() {
        let (subscriber, event) = fixture(json!({
            "template": "{uname}#{room_id} [{event}] {sender}: {content}{next}uid {uid}"
        }));
        let destination = &subscriber.destinations[0];
        let ctx = HandlerContext {
            subscriber: &subscriber,
            destination,
            binding: &destination.bindings[0],
        };

        let messages = TextHandler.handle(&event, &ctx).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "streamer#7 [danmu] fan: hello");
        assert_eq!(messages[1].content, "uid 42");
        assert_eq!(messages[0].target, 100);
        assert_eq!(messages[0].kind, DestinationKind::Group);
    }

    #[tokio::test]
    async fn test_default_template() {
        let (subscriber, event) = fixture(json!({}));
        let destination = &subscriber.destinations[0];
        let ctx = HandlerContext {
            subscriber: &subscriber,
            destination,
            binding: &destination.bindings[0],
        };

        let messages = TextHandler.handle(&event, &ctx).await.unwrap();
        assert_eq!(messages[0].content, "streamer danmu hello");
        assert_eq!(
            TextHandler.default_params()["template"],
            TextHandler::DEFAULT_TEMPLATE
        );
    }
}
