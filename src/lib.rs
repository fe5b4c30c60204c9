//! Wakeloop - hotword-driven voice dialog front end
//!
//! This library provides the streaming pipeline between a microphone and a
//! dialog backend:
//! - A dual-window audio buffer fed by a capture device
//! - Hotword spotting through a pluggable trigger engine
//! - End-of-utterance detection by energy or voice activity
//! - A session state machine that exchanges utterances with a dialog
//!   backend and plays the replies, across multiple turns
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   extend    ┌──────────────────────────────────────┐
//! │ AudioSource  ├────────────▶│ AudioBuffer  (snapshot │ capture)    │
//! │ mic / replay │             └──────────────┬───────────────────────┘
//! └──────────────┘                            │ drain
//!                       ┌─────────────────────▼──────────────────────┐
//!                       │               DialogSession                 │
//!                       │  TriggerDetector  │  BreakDetector          │
//!                       └──────┬────────────────────────────┬─────────┘
//!                              │ ask / respond_to           │ play
//!                       ┌──────▼────────┐            ┌──────▼──────┐
//!                       │ DialogHandler │            │  AudioSink  │
//!                       └───────────────┘            └─────────────┘
//! ```

pub mod audio;
pub mod breaks;
pub mod config;
pub mod conversation;
pub mod dialog;
pub mod error;
mod lock;
pub mod session;
pub mod trigger;

pub use audio::{AudioBuffer, AudioFormat, AudioSink, AudioSource};
pub use breaks::BreakDetector;
pub use config::{Config, Settings};
pub use conversation::ConversationEnd;
pub use dialog::{DialogContext, DialogHandler, Response, ResponseAudio};
pub use error::{Error, Result};
pub use session::{
    CaptureOutcome, DialogSession, SessionHandle, SessionParts, SessionState, SessionStats,
    Trigger, Utterance, UtteranceEnd,
};
pub use trigger::{EngineOutput, KeywordIndex, TriggerDetector, TriggerEngine};
