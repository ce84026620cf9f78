//! Local record/replay store.
//!
//! ```text
//! <data dir>/asciichat/
//! ├── last_session.acs   session container (frames + audio)
//! └── last_audio.wav     16-bit mono PCM copy of the audio
//! ```
//!
//! On load, the WAV (if present) supplies the audio, so a replaced recording
//! plays over the stored frames.

use std::path::{Path, PathBuf};

use asciichat_core::{CodecError, Session, SessionError};
use asciichat_transport::codec;
use thiserror::Error;
use tracing::{debug, info};

pub const SESSION_FILE: &str = "last_session.acs";
pub const AUDIO_FILE: &str = "last_audio.wav";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No data directory on this platform")]
    NoDataDir,

    #[error("Nothing recorded yet at {0}")]
    Empty(PathBuf),

    #[error("Stored session unreadable: {0}")]
    Codec(#[from] CodecError),

    #[error("Stored session invalid: {0}")]
    Session(#[from] SessionError),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<platform data dir>/asciichat`.
    pub fn default_dir() -> Result<PathBuf, StoreError> {
        Ok(dirs::data_dir().ok_or(StoreError::NoDataDir)?.join("asciichat"))
    }

    pub fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    pub fn audio_path(&self) -> PathBuf {
        self.dir.join(AUDIO_FILE)
    }

    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.session_path(), codec::encode(session)?)?;
        write_wav(&self.audio_path(), session.audio(), session.audio_sample_rate())?;
        info!("Stored {} frames in {}", session.frame_count(), self.dir.display());
        Ok(())
    }

    pub fn load(&self) -> Result<Session, StoreError> {
        let path = self.session_path();
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::Empty(path)),
            Err(e) => return Err(e.into()),
        };
        let session = codec::decode(&bytes)?;

        let wav = self.audio_path();
        if !wav.exists() {
            return Ok(session);
        }
        let (samples, rate) = read_wav(&wav)?;
        debug!("Using {} samples @ {} Hz from {}", samples.len(), rate, wav.display());
        let (frames, fps, _, _) = session.into_parts();
        Ok(Session::new(frames, fps, samples, rate)?)
    }
}

pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<(), StoreError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Reads a mono 16-bit WAV. Multi-channel files keep only the first channel.
pub fn read_wav(path: &Path) -> Result<(Vec<i16>, u32), StoreError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let samples = reader
        .samples::<i16>()
        .step_by(channels)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((samples, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use asciichat_core::{Cell, FrameGrid};

    use super::*;

    fn session() -> Session {
        let frame = FrameGrid::new(2, 2, vec![Cell::new('%', 10, 20, 30); 4]).unwrap();
        Session::new(vec![frame; 5], 30.0, vec![0, 1000, -1000, i16::MAX, i16::MIN], 22_050).unwrap()
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("asciichat"));
        store.save(&session()).unwrap();

        assert!(store.session_path().exists());
        assert!(store.audio_path().exists());
        assert_eq!(store.load().unwrap(), session());
    }

    #[test]
    fn wav_replaces_audio() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.save(&session()).unwrap();
        write_wav(&store.audio_path(), &[7; 100], 8_000).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.frames(), session().frames());
        assert_eq!(loaded.audio(), &[7; 100][..]);
        assert_eq!(loaded.audio_sample_rate(), 8_000);
    }

    #[test]
    fn without_wav_container_audio_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.save(&session()).unwrap();
        std::fs::remove_file(store.audio_path()).unwrap();
        assert_eq!(store.load().unwrap(), session());
    }

    #[test]
    fn empty_store() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(SessionStore::new(dir.path()).load(), Err(StoreError::Empty(_))));
    }
}
