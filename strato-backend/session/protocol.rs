use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Message kinds on the socket. `connect`/`disconnect` manage client
/// lifecycles, `run_command`/`command_*` the command lifecycle, the stream
/// types carry stdio chunks, and `err_response` reports frame-level
/// failures without closing the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Connect,
    ConnectAcknowledged,
    Disconnect,
    DisconnectAcknowledged,
    RunCommand,
    CommandRunning,
    CommandFinished,
    CommandInterrupt,
    SetEnv,
    InputStream,
    StdinEof,
    OutputStream,
    ErrorStream,
    ErrResponse,
}

/// The framed envelope exchanged over the transport, serialized as a
/// MessagePack map. Every field except `message_type` is optional and
/// omitted when empty; unknown fields from the peer are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ref_id: String,
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output_stream: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub input_stream: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_stream: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_result: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_env: Option<HashMap<String, String>>,

    /// System errors (bad frame, unknown client), never builtin stderr.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl WireMessage {
    /// An empty frame of the given type with a fresh `message_id`.
    pub fn new(message_type: MessageType) -> Self {
        WireMessage {
            message_id: generate_message_id(),
            ref_id: String::new(),
            message_type,
            client_id: String::new(),
            command: String::new(),
            output_stream: String::new(),
            input_stream: String::new(),
            error_stream: String::new(),
            command_result: None,
            set_env: None,
            error: String::new(),
        }
    }

    pub fn reply(message_type: MessageType, ref_id: &str, client_id: &str) -> Self {
        WireMessage {
            ref_id: ref_id.to_string(),
            client_id: client_id.to_string(),
            ..WireMessage::new(message_type)
        }
    }
}

/// Random 20-hex frame id.
pub fn generate_message_id() -> String {
    let mut bytes = [0u8; 10];
    // zeroed ids in the astronomically unlikely error case beat a panic here
    let _ = getrandom::fill(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid messagepack: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("cannot encode frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Encode a frame as a MessagePack map (field names on the wire).
pub fn encode(msg: &WireMessage) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(msg)?)
}

pub fn decode(bytes: &[u8]) -> Result<WireMessage, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_20_hex_chars() {
        let id = generate_message_id();
        assert_eq!(id.len(), 20);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_message_id());
    }

    #[test]
    fn roundtrip_preserves_all_fields() {
        let mut msg = WireMessage::new(MessageType::RunCommand);
        msg.client_id = "c1".into();
        msg.command = "echo hello | tee /home/alice/x".into();
        msg.set_env = Some(HashMap::from([("PWD".to_string(), "/home/alice".to_string())]));

        let bytes = encode(&msg).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn empty_fields_are_omitted_from_the_map() {
        let msg = WireMessage::new(MessageType::Connect);
        let bytes = encode(&msg).unwrap();
        // map-encoded: field names appear as msgpack strings
        let raw = String::from_utf8_lossy(&bytes);
        assert!(raw.contains("message_type"));
        assert!(!raw.contains("output_stream"));
        assert!(!raw.contains("command_result"));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        #[derive(Serialize)]
        struct Extended {
            message_type: &'static str,
            message_id: &'static str,
            some_future_field: u32,
        }
        let bytes = rmp_serde::to_vec_named(&Extended {
            message_type: "connect",
            message_id: "abc",
            some_future_field: 7,
        })
        .unwrap();

        let msg = decode(&bytes).unwrap();
        assert_eq!(msg.message_type, MessageType::Connect);
        assert_eq!(msg.message_id, "abc");
    }

    #[test]
    fn message_type_is_required() {
        #[derive(Serialize)]
        struct NoType {
            message_id: &'static str,
        }
        let bytes = rmp_serde::to_vec_named(&NoType { message_id: "abc" }).unwrap();
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn wire_names_use_snake_case() {
        let msg = WireMessage::new(MessageType::DisconnectAcknowledged);
        let bytes = encode(&msg).unwrap();
        let raw = String::from_utf8_lossy(&bytes);
        assert!(raw.contains("disconnect_acknowledged"));

        let msg = WireMessage::new(MessageType::StdinEof);
        let bytes = encode(&msg).unwrap();
        let raw = String::from_utf8_lossy(&bytes);
        assert!(raw.contains("stdin_eof"));
    }

    #[test]
    fn exit_codes_survive_roundtrip() {
        let mut msg = WireMessage::new(MessageType::CommandFinished);
        msg.command_result = Some(130);
        let back = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(back.command_result, Some(130));
    }
}
