//! Typed observer interface for session events.
//!
//! One observer is supplied at session construction and receives every
//! event the session produces. Observer work runs on spawned tasks, so
//! a panicking observer cannot take the receive loop down with it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::ModelKey;

/// Conversation state of the AI, driven by server events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiState {
    Idle,
    Listening,
    UserSpeaking,
    Thinking,
    Speaking,
}

impl AiState {
    pub fn as_str(self) -> &'static str {
        match self {
            AiState::Idle => "idle",
            AiState::Listening => "listening",
            AiState::UserSpeaking => "user_speaking",
            AiState::Thinking => "thinking",
            AiState::Speaking => "speaking",
        }
    }
}

/// Who produced a transcript segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRole {
    Caller,
    Assistant,
}

impl TranscriptRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TranscriptRole::Caller => "caller",
            TranscriptRole::Assistant => "assistant",
        }
    }
}

/// Cumulative token counters, one per billing category.
///
/// Counters only grow within a call; a live model switch restores the
/// pre-switch snapshot so totals keep accumulating across models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub input_text_tokens: u64,
    pub input_audio_tokens: u64,
    pub output_text_tokens: u64,
    pub output_audio_tokens: u64,
}

impl UsageSnapshot {
    /// Per-category saturating difference (`self - earlier`).
    pub fn delta_since(&self, earlier: &UsageSnapshot) -> UsageSnapshot {
        UsageSnapshot {
            input_text_tokens: self.input_text_tokens.saturating_sub(earlier.input_text_tokens),
            input_audio_tokens: self
                .input_audio_tokens
                .saturating_sub(earlier.input_audio_tokens),
            output_text_tokens: self
                .output_text_tokens
                .saturating_sub(earlier.output_text_tokens),
            output_audio_tokens: self
                .output_audio_tokens
                .saturating_sub(earlier.output_audio_tokens),
        }
    }
}

/// All events a realtime session can produce, as one trait.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    /// A chunk of AI audio (PCM16 @ 24 kHz), already unmuted-filtered.
    async fn on_audio(&self, _pcm24: Vec<u8>) {}

    /// Transcript text from either side. `is_final` marks segment ends.
    async fn on_transcript(&self, _role: TranscriptRole, _text: String, _is_final: bool) {}

    /// The caller started speaking while the AI was responding.
    async fn on_interruption(&self) {}

    /// The AI conversation state changed.
    async fn on_ai_state(&self, _state: AiState) {}

    /// Cumulative usage after a completed response.
    async fn on_usage(&self, _usage: UsageSnapshot) {}

    /// A live model switch completed.
    async fn on_model_changed(&self, _model: ModelKey) {}

    /// The model called a tool; the return string is delivered back as
    /// the function output (or consumed when it is a control sentinel).
    async fn on_function_call(
        &self,
        call_id: String,
        name: String,
        args: serde_json::Value,
    ) -> String;

    /// The socket closed without a replacement being in progress.
    async fn on_session_closed(&self, _reason: String) {}
}
