//! Wire protocol: client event builders and server event parsing.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::observer::UsageSnapshot;

/// VAD tuning sent with every session configuration.
pub const VAD_THRESHOLD: f64 = 0.4;
pub const VAD_PREFIX_PADDING_MS: u32 = 200;
pub const VAD_SILENCE_DURATION_MS: u32 = 300;

/// Build the `session.update` sent right after connect.
///
/// In text-only mode (the silent security gate) the modalities omit
/// audio entirely, so the model cannot produce speech at all.
pub fn session_update(
    instructions: &str,
    tools: &[Value],
    voice: &str,
    text_only: bool,
) -> Value {
    let modalities: Vec<&str> = if text_only {
        vec!["text"]
    } else {
        vec!["text", "audio"]
    };
    json!({
        "type": "session.update",
        "session": {
            "modalities": modalities,
            "instructions": instructions,
            "voice": voice,
            "input_audio_format": "pcm16",
            "output_audio_format": "pcm16",
            "input_audio_transcription": { "model": "whisper-1" },
            "turn_detection": {
                "type": "server_vad",
                "threshold": VAD_THRESHOLD,
                "prefix_padding_ms": VAD_PREFIX_PADDING_MS,
                "silence_duration_ms": VAD_SILENCE_DURATION_MS,
                "create_response": true
            },
            "tools": tools,
            "tool_choice": "auto"
        }
    })
}

/// Build a partial `session.update` for an in-call agent switch.
pub fn session_patch(
    instructions: Option<&str>,
    tools: Option<&[Value]>,
    text_only: Option<bool>,
) -> Value {
    let mut session = serde_json::Map::new();
    if let Some(instructions) = instructions {
        session.insert("instructions".into(), json!(instructions));
    }
    if let Some(tools) = tools {
        session.insert("tools".into(), json!(tools));
    }
    if let Some(text_only) = text_only {
        let modalities: Vec<&str> = if text_only {
            vec!["text"]
        } else {
            vec!["text", "audio"]
        };
        session.insert("modalities".into(), json!(modalities));
    }
    json!({ "type": "session.update", "session": session })
}

/// Build an `input_audio_buffer.append` for one audio chunk.
pub fn audio_append(base64_audio: &str) -> Value {
    json!({ "type": "input_audio_buffer.append", "audio": base64_audio })
}

/// Build a bare `response.create`.
pub fn response_create() -> Value {
    json!({ "type": "response.create" })
}

/// Build a `conversation.item.create` carrying a function-call output.
pub fn function_output(call_id: &str, output: &str) -> Value {
    json!({
        "type": "conversation.item.create",
        "item": {
            "type": "function_call_output",
            "call_id": call_id,
            "output": output
        }
    })
}

/// Server events the session consumes. Anything else parses to
/// `Unknown` and is ignored (with a debug log), keeping the session
/// alive across provider additions.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "response.created")]
    ResponseCreated,

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ResponseData,
    },

    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.delta")]
    AssistantTranscriptDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.done")]
    AssistantTranscriptDone {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        call_id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        arguments: String,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Value,
    },

    #[serde(other)]
    Unknown,
}

/// The `response` object inside `response.done`.
#[derive(Debug, Default, Deserialize)]
pub struct ResponseData {
    #[serde(default)]
    pub usage: Option<ResponseUsage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseUsage {
    #[serde(default)]
    pub input_token_details: TokenDetails,
    #[serde(default)]
    pub output_token_details: TokenDetails,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenDetails {
    #[serde(default)]
    pub text_tokens: u64,
    #[serde(default)]
    pub audio_tokens: u64,
}

impl ResponseUsage {
    /// Fold this response's usage into a cumulative snapshot.
    pub fn add_to(&self, usage: &mut UsageSnapshot) {
        usage.input_text_tokens += self.input_token_details.text_tokens;
        usage.input_audio_tokens += self.input_token_details.audio_tokens;
        usage.output_text_tokens += self.output_token_details.text_tokens;
        usage.output_audio_tokens += self.output_token_details.audio_tokens;
    }
}
