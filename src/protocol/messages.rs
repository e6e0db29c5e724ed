//! Session protocol messages, `{type, payload}` framed.
//!
//! The tagged enums give the dispatch table compile-time exhaustiveness; an
//! unknown or malformed frame fails deserialization and is logged, never
//! crashes the session.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::common::ListenerId;
use crate::protocol::models::{ChatMessage, DjStyle, PublicState, RadioSong};
use crate::session::settings::{RadioSettings, SettingsPatch};

/// Client → server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum IncomingMessage {
    Join {
        #[serde(default)]
        name: Option<String>,
    },
    SkipVote,
    OwnerSkip,
    ClaimOwner {
        secret: String,
    },
    UpdateSettings {
        settings: SettingsPatch,
    },
    GetState,
    ChatMessage {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    RequeueSong {
        song_id: String,
    },
    DjStyleVote {
        style: DjStyle,
    },
}

/// Server → client frames: direct replies and broadcast state deltas.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum OutgoingMessage {
    #[serde(rename_all = "camelCase")]
    Joined { listener_id: ListenerId },
    SkipVoteResult {
        voted: bool,
        skipped: bool,
    },
    OwnerSkipResult {
        success: bool,
    },
    #[serde(rename_all = "camelCase")]
    ClaimOwnerResult {
        success: bool,
        is_owner: bool,
    },
    UpdateSettingsResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RequeueResult {
        success: bool,
        song_id: String,
    },
    DjStyleVoteResult {
        voted: bool,
        style: DjStyle,
    },
    State(PublicState),
    #[serde(rename_all = "camelCase")]
    SongChange {
        song: Option<RadioSong>,
        start_time: u64,
    },
    QueueUpdate {
        queue: Vec<RadioSong>,
    },
    HistoryUpdate {
        history: Vec<RadioSong>,
    },
    ListenersUpdate {
        listeners: Vec<super::models::PublicListener>,
        count: usize,
    },
    SkipVotesUpdate {
        votes: usize,
        required: usize,
    },
    DjStyleVotesUpdate {
        votes: HashMap<DjStyle, usize>,
        required: usize,
    },
    #[serde(rename_all = "camelCase")]
    OwnerChange {
        owner_id: Option<ListenerId>,
    },
    SettingsUpdate {
        settings: RadioSettings,
    },
    SkipPending {
        pending: bool,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    AutoGenerating {
        is_generating: bool,
    },
    ChatMessage(ChatMessage),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join_frame() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"type":"join","payload":{"name":"alice"}}"#).unwrap();
        match msg {
            IncomingMessage::Join { name } => assert_eq!(name.as_deref(), Some("alice")),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_parse_payloadless_frame() {
        let msg: IncomingMessage = serde_json::from_str(r#"{"type":"skip-vote"}"#).unwrap();
        assert!(matches!(msg, IncomingMessage::SkipVote));
    }

    #[test]
    fn test_parse_requeue_camel_case_field() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"type":"requeue-song","payload":{"songId":"abc"}}"#).unwrap();
        match msg {
            IncomingMessage::RequeueSong { song_id } => assert_eq!(song_id, "abc"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_frame_is_rejected() {
        let res = serde_json::from_str::<IncomingMessage>(r#"{"type":"self-destruct"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_outgoing_frame_shape() {
        let msg = OutgoingMessage::SkipVotesUpdate {
            votes: 2,
            required: 3,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "skip-votes-update");
        assert_eq!(json["payload"]["votes"], 2);
        assert_eq!(json["payload"]["required"], 3);
    }

    #[test]
    fn test_dj_style_votes_serialize_with_string_keys() {
        let mut votes = HashMap::new();
        votes.insert(DjStyle::Explore, 1usize);
        let msg = OutgoingMessage::DjStyleVotesUpdate { votes, required: 2 };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["payload"]["votes"]["explore"], 1);
    }
}
