//! # Audio Module
//!
//! Per-guild playback for Guild Player.
//!
//! ## Architecture
//!
//! ### [`pipeline`] - Media Pipeline
//! - Runs the fetch tool (yt-dlp) and the transcoder (ffmpeg) as child processes
//! - Produces one Ogg/Opus byte stream per track
//! - Owns processes and temp files until [`pipeline::PipelineHandle::stop`]
//!
//! ### [`sink`] - Playback Sink
//! - Feeds encoded streams into a Songbird voice call
//! - Reports end/error of each stream tagged with its playback token
//!
//! ### [`session`] - Guild Session
//! - FIFO queue, current track and the Idle/Loading/Playing state
//!
//! ### [`controller`] - Playback Controller
//! - One task per guild that serializes commands, load results and sink events
//! - Guarantees at most one live pipeline per guild
//!
//! ### [`registry`] - Session Registry
//! - Guild to session map; sessions are created on first use
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Channels**: Stereo
//! - **Encoding**: Opus at 128kbps in an Ogg container

pub mod controller;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod sink;

pub use controller::{ControllerOptions, SessionHandle};
pub use pipeline::{PipelineSettings, PipelineStrategy, ProcessPipeline};
pub use registry::SessionRegistry;
pub use session::{EnqueueOutcome, Notifier, PlaybackNotice, PlaybackState, QueueSnapshot};
pub use sink::SongbirdSink;
