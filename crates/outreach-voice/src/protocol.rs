//! Wire types for both sockets of a call.
//!
//! - Realtime AI socket: JSON events tagged by `type`.
//! - Telephony media stream: JSON events tagged by `event`.
//!
//! Inbound events we do not act on deserialize to an `Other` variant rather
//! than failing; only a known event with a broken shape is a protocol error.

use crate::error::{VoiceError, VoiceResult};
use serde::Deserialize;
use serde_json::{json, Value};

/// Events received from the realtime AI socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {},

    #[serde(rename = "session.updated")]
    SessionUpdated {},

    #[serde(rename = "response.created")]
    ResponseCreated {},

    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    #[serde(rename = "response.text.delta")]
    TextDelta { delta: String },

    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { delta: String },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ResponseBody,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {},

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {},

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscript {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ApiError,
    },

    #[serde(other)]
    Other,
}

impl ServerEvent {
    pub fn parse(text: &str) -> VoiceResult<Self> {
        serde_json::from_str(text).map_err(|e| VoiceError::Protocol(format!("ai event: {}", e)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseBody {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

impl ResponseBody {
    /// First function call named `name`, if the response carries one.
    pub fn function_call(&self, name: &str) -> Option<&FunctionCall> {
        self.output.iter().find_map(|item| match item {
            OutputItem::FunctionCall(call) if call.name == name => Some(call),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum OutputItem {
    #[serde(rename = "function_call")]
    FunctionCall(FunctionCall),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub call_id: String,
    /// JSON-encoded arguments, exactly as the model produced them.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiError {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Everything `session.update` needs besides the fixed audio format.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub voice: String,
    pub instructions: String,
    pub tools: Vec<Value>,
}

pub fn session_update(profile: &SessionProfile) -> Value {
    json!({
        "type": "session.update",
        "session": {
            "input_audio_format": "g711_ulaw",
            "output_audio_format": "g711_ulaw",
            "voice": profile.voice,
            "instructions": profile.instructions,
            "modalities": ["audio", "text"],
            "tools": profile.tools,
            "tool_choice": "auto",
        }
    })
}

/// Ask the model to speak, optionally with per-response instructions.
pub fn response_create(instructions: Option<&str>) -> Value {
    let mut response = json!({ "modalities": ["audio", "text"] });
    if let Some(text) = instructions {
        response["instructions"] = Value::String(text.to_string());
    }
    json!({ "type": "response.create", "response": response })
}

/// Result of a function call, fed back into the conversation.
pub fn function_call_output(call_id: &str, success: bool, message: &str) -> Value {
    let output = json!({ "success": success, "message": message }).to_string();
    json!({
        "type": "conversation.item.create",
        "item": {
            "type": "function_call_output",
            "call_id": call_id,
            "output": output,
        }
    })
}

/// Caller audio for the model. `payload` is base64 G.711 µ-law, untouched.
pub fn input_audio_append(payload: &str) -> Value {
    json!({ "type": "input_audio_buffer.append", "audio": payload })
}

/// Events received on the telephony media stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum MediaEvent {
    Connected {},
    Start { start: StreamStart },
    Media { media: MediaPayload },
    Mark {},
    Stop {},
    #[serde(other)]
    Other,
}

impl MediaEvent {
    pub fn parse(text: &str) -> VoiceResult<Self> {
        serde_json::from_str(text).map_err(|e| VoiceError::Protocol(format!("media event: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub stream_sid: String,
    #[serde(default)]
    pub call_sid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
}

/// Assistant audio for the caller.
pub fn media_frame(stream_sid: &str, payload: &str) -> Value {
    json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": { "payload": payload },
    })
}
