//! Messaging-transport adapter rules shared by every channel.

use crate::core::orchestrator::{ChatReply, MessageOutcome};
use crate::core::traits::Orchestrator;
use log::{debug, info};

pub const MEDIA_MARKER: &str = " [IMAGEM ENVIADA]";

/// One event delivered by a messaging channel.
#[derive(Debug, Clone, Default)]
pub struct InboundEvent {
    pub from: String,
    pub body: String,
    pub has_media: bool,
    /// Written by a human operator from the business account, not by the client.
    pub from_operator: bool,
}

impl InboundEvent {
    pub fn client(from: impl Into<String>, body: impl Into<String>) -> InboundEvent {
        InboundEvent {
            from: from.into(),
            body: body.into(),
            ..InboundEvent::default()
        }
    }

    /// Client identifier without channel suffixes such as `@c.us`.
    pub fn phone(&self) -> &str {
        let from = self.from.trim();
        from.split_once('@').map_or(from, |(phone, _)| phone)
    }

    /// Text handed to the orchestrator; `None` for events with nothing to say.
    pub fn text(&self) -> Option<String> {
        let mut text = self.body.clone();
        if self.has_media {
            text.push_str(MEDIA_MARKER);
        }

        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Applies the channel rules and returns the reply to deliver, if any.
pub async fn handle_inbound(
    orchestrator: &dyn Orchestrator,
    event: InboundEvent,
) -> anyhow::Result<Option<ChatReply>> {
    let phone = event.phone().to_owned();

    if event.from_operator {
        orchestrator.handle_operator_message(&phone).await?;
        return Ok(None);
    }

    let Some(text) = event.text() else {
        debug!("empty event from {phone} ignored");
        return Ok(None);
    };

    match orchestrator.process_message(&phone, &text).await {
        MessageOutcome::Reply(reply) => {
            if reply.appointment_created {
                info!("appointment {:?} created through chat for {phone}", reply.appointment_id);
            }
            Ok(Some(reply))
        }
        MessageOutcome::Paused { .. } => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_marker_is_appended() {
        let event = InboundEvent {
            from: "5583999990000@c.us".to_owned(),
            body: "olha esse sofá".to_owned(),
            has_media: true,
            from_operator: false,
        };
        assert_eq!(event.phone(), "5583999990000");
        assert_eq!(event.text().as_deref(), Some("olha esse sofá [IMAGEM ENVIADA]"));
    }

    #[test]
    fn test_media_without_caption_still_counts() {
        let event = InboundEvent {
            has_media: true,
            ..InboundEvent::client("123", "")
        };
        assert_eq!(event.text().as_deref(), Some(" [IMAGEM ENVIADA]"));
    }

    #[test]
    fn test_blank_event_is_ignored() {
        assert!(InboundEvent::client("123", "   ").text().is_none());
    }
}
