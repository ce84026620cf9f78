//! asciichat-playback
//!
//! Presents a received session on a [`Renderer`] over a fixed wall-clock
//! duration while an [`AudioOutput`] plays the session's audio alongside.

pub mod audio;
pub mod clock;
pub mod renderer;
pub mod terminal;

pub use audio::{spawn_playback, AudioError, AudioHandle, AudioOutput, PacedAudioOutput};
#[cfg(feature = "device-audio")]
pub use audio::CpalAudioOutput;
pub use clock::{PlaybackClock, PlaybackError, PlaybackReport, DEFAULT_TARGET};
pub use renderer::{NullRenderer, Renderer, RendererError};
pub use terminal::TerminalRenderer;

use std::sync::Arc;

/// Whether [`default_audio_output`] reaches a speaker.
pub const AUDIBLE: bool = cfg!(feature = "device-audio");

/// The audio output this build plays through.
pub fn default_audio_output() -> Arc<dyn AudioOutput> {
    #[cfg(feature = "device-audio")]
    {
        Arc::new(CpalAudioOutput)
    }
    #[cfg(not(feature = "device-audio"))]
    {
        tracing::warn!("Built without `device-audio`: call audio will be silent");
        Arc::new(PacedAudioOutput)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "device-audio"))]
    #[test]
    fn silent_build_still_paces_audio() {
        assert!(!AUDIBLE);
        let started = std::time::Instant::now();
        default_audio_output().play(&[0; 400], 8_000).unwrap();
        assert!(started.elapsed() >= std::time::Duration::from_millis(50));
    }
}
