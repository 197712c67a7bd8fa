//! Outbound notification envelope. Every frame the hub pushes to a client (other than the
//! `connected:<uid>` acknowledgement) is one of these, serialized as a JSON object discriminated
//! by its `type` field.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Event {
    MessageCreate { chat_id: String, message_id: String },
    MessageUpdate { chat_id: String, message_id: String },
    MessageDelete { chat_id: String, message_id: String },

    ChatCreate { chat_id: String },
    ChatUpdate { chat_id: String },
    ChatDelete { chat_id: String },

    UserUpdate { user_id: String },
    UserAvatarUpdate { user_id: String },

    /// Presence change of some user. Carries no identity: clients refetch what they need.
    UserStatusChange,
}

impl Event {
    pub fn message_create(chat_id: impl ToString, message_id: impl ToString) -> Self {
        Event::MessageCreate {
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
        }
    }

    pub fn message_update(chat_id: impl ToString, message_id: impl ToString) -> Self {
        Event::MessageUpdate {
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
        }
    }

    pub fn message_delete(chat_id: impl ToString, message_id: impl ToString) -> Self {
        Event::MessageDelete {
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
        }
    }

    /// Wire name of the event, as it appears in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::MessageCreate { .. } => "message_create",
            Event::MessageUpdate { .. } => "message_update",
            Event::MessageDelete { .. } => "message_delete",
            Event::ChatCreate { .. } => "chat_create",
            Event::ChatUpdate { .. } => "chat_update",
            Event::ChatDelete { .. } => "chat_delete",
            Event::UserUpdate { .. } => "user_update",
            Event::UserAvatarUpdate { .. } => "user_avatar_update",
            Event::UserStatusChange => "user_status_change",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_events_carry_chat_and_message_ids() {
        let value = serde_json::to_value(Event::message_create("c1", "m1")).unwrap();
        assert_eq!(
            value,
            json!({"type": "message_create", "chatId": "c1", "messageId": "m1"})
        );
    }

    #[test]
    fn chat_and_user_events_use_camel_case_fields() {
        let chat = serde_json::to_value(Event::ChatDelete { chat_id: "c9".into() }).unwrap();
        assert_eq!(chat, json!({"type": "chat_delete", "chatId": "c9"}));

        let user = Event::UserAvatarUpdate {
            user_id: "u2".into(),
        };
        let user = serde_json::to_value(user).unwrap();
        assert_eq!(user, json!({"type": "user_avatar_update", "userId": "u2"}));
    }

    #[test]
    fn presence_event_is_kind_only() {
        let value = serde_json::to_value(Event::UserStatusChange).unwrap();
        assert_eq!(value, json!({"type": "user_status_change"}));
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let events = [
            Event::message_update("c", "m"),
            Event::message_delete("c", "m"),
            Event::ChatCreate { chat_id: "c".into() },
            Event::ChatUpdate { chat_id: "c".into() },
            Event::UserUpdate { user_id: "u".into() },
            Event::UserAvatarUpdate { user_id: "u".into() },
            Event::UserStatusChange,
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.kind());
        }
    }
}
