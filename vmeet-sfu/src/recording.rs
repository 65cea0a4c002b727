//! Per-peer recording pipeline
//!
//! A recording is a bounded segment, not a continuous capture: `start`
//! opens a fresh video/audio writer pair and arms a deadline; when the
//! window elapses the pair is closed and the media loop falls back to pure
//! relay until the peer explicitly starts another segment.
//!
//! The whole-meeting variant is a single raw byte sink fed with binary
//! chunks multiplexed over the control channel while active.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use webrtc::media::io::ivf_reader::IVFFileHeader;
use webrtc::media::io::ivf_writer::IVFWriter;
use webrtc::media::io::ogg_writer::OggWriter;
use webrtc::media::io::Writer;
use webrtc::rtp::packet::Packet;

use vmeet_core::config::RecordingConfig;
use vmeet_core::error::{Error, Result};

use crate::types::MediaKind;

const FILE_NAME_LEN: usize = 16;
const FILE_NAME_ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

fn segment_name(ext: &str) -> String {
    format!("{}.{ext}", nanoid::nanoid!(FILE_NAME_LEN, &FILE_NAME_ALPHABET))
}

/// Lifecycle of one peer's recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    NotRecorded,
    Recording,
    Recorded,
    Confirmed,
}

impl RecordingState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotRecorded => "not_recorded",
            Self::Recording => "recording",
            Self::Recorded => "recorded",
            Self::Confirmed => "confirmed",
        }
    }
}

/// One container writer, closed exactly once.
pub trait SegmentWriter: Send {
    fn write_rtp(&mut self, packet: &Packet) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

struct IvfSegmentWriter(IVFWriter<File>);

impl SegmentWriter for IvfSegmentWriter {
    fn write_rtp(&mut self, packet: &Packet) -> Result<()> {
        self.0
            .write_rtp(packet)
            .map_err(|e| Error::Internal(format!("ivf write: {e}")))
    }

    fn close(&mut self) -> Result<()> {
        self.0
            .close()
            .map_err(|e| Error::Internal(format!("ivf close: {e}")))
    }
}

struct OggSegmentWriter(OggWriter<File>);

impl SegmentWriter for OggSegmentWriter {
    fn write_rtp(&mut self, packet: &Packet) -> Result<()> {
        self.0
            .write_rtp(packet)
            .map_err(|e| Error::Internal(format!("ogg write: {e}")))
    }

    fn close(&mut self) -> Result<()> {
        self.0
            .close()
            .map_err(|e| Error::Internal(format!("ogg close: {e}")))
    }
}

/// Opens container writers for new segments. Trait so tests can record the
/// open/close lifecycle without producing real containers.
pub trait RecordingMedia: Send + Sync {
    fn open_video(&self, name: &str) -> Result<Box<dyn SegmentWriter>>;
    fn open_audio(&self, name: &str) -> Result<Box<dyn SegmentWriter>>;
    /// Delete a spooled segment file that will never be uploaded.
    fn discard(&self, name: &str);
}

/// File-backed media sink writing into the pre-upload spool directory.
pub struct FileRecordingMedia {
    dir: PathBuf,
    sample_rate: u32,
    channels: u8,
}

impl FileRecordingMedia {
    pub fn new(dir: impl Into<PathBuf>, config: &RecordingConfig) -> Self {
        Self {
            dir: dir.into(),
            sample_rate: config.audio_sample_rate,
            channels: config.audio_channels,
        }
    }

    fn create(&self, name: &str) -> Result<File> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(File::create(self.dir.join(name))?)
    }
}

impl RecordingMedia for FileRecordingMedia {
    fn open_video(&self, name: &str) -> Result<Box<dyn SegmentWriter>> {
        let file = self.create(name)?;
        let header = IVFFileHeader {
            signature: *b"DKIF",
            version: 0,
            header_size: 32,
            four_cc: *b"VP80",
            width: 640,
            height: 480,
            timebase_denominator: 30,
            timebase_numerator: 1,
            num_frames: 900,
            unused: 0,
        };
        let writer = IVFWriter::new(file, &header)
            .map_err(|e| Error::Internal(format!("ivf open: {e}")))?;
        Ok(Box::new(IvfSegmentWriter(writer)))
    }

    fn open_audio(&self, name: &str) -> Result<Box<dyn SegmentWriter>> {
        let file = self.create(name)?;
        let writer = OggWriter::new(file, self.sample_rate, self.channels)
            .map_err(|e| Error::Internal(format!("ogg open: {e}")))?;
        Ok(Box::new(OggSegmentWriter(writer)))
    }

    fn discard(&self, name: &str) {
        if let Err(err) = std::fs::remove_file(self.dir.join(name)) {
            warn!(name, error = %err, "failed to remove superseded segment file");
        }
    }
}

struct ActiveSegment {
    video: Box<dyn SegmentWriter>,
    audio: Box<dyn SegmentWriter>,
    generation: u64,
}

struct RecorderInner {
    state: RecordingState,
    video_name: Option<String>,
    audio_name: Option<String>,
    segment: Option<ActiveSegment>,
}

/// Per-peer segment recorder and state machine.
///
/// Writers are owned here until a closed segment's names are handed to the
/// upload scheduler; after that hand-off the session must not touch them.
pub struct Recorder {
    media: Arc<dyn RecordingMedia>,
    inner: Mutex<RecorderInner>,
    generation: AtomicU64,
}

impl Recorder {
    pub fn new(media: Arc<dyn RecordingMedia>) -> Self {
        Self {
            media,
            inner: Mutex::new(RecorderInner {
                state: RecordingState::NotRecorded,
                video_name: None,
                audio_name: None,
                segment: None,
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// Open a fresh writer pair and arm the rotation deadline. Returns the
    /// allocated file names.
    pub fn start(self: &Arc<Self>, window: Duration) -> Result<(String, String)> {
        let video_name = segment_name("ivf");
        let audio_name = segment_name("ogg");

        let mut inner = self.inner.lock();
        if inner.state == RecordingState::Recording {
            return Err(Error::InvalidInput("recording already in progress".to_string()));
        }

        // A closed pair the user never confirmed is superseded here; its
        // files have no upload path left, so remove them from the spool.
        if inner.state == RecordingState::Recorded {
            if let Some(old) = inner.video_name.take() {
                self.media.discard(&old);
            }
            if let Some(old) = inner.audio_name.take() {
                self.media.discard(&old);
            }
        }

        let video = self.media.open_video(&video_name)?;
        let audio = self.media.open_audio(&audio_name)?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        inner.state = RecordingState::Recording;
        inner.video_name = Some(video_name.clone());
        inner.audio_name = Some(audio_name.clone());
        inner.segment = Some(ActiveSegment {
            video,
            audio,
            generation,
        });
        drop(inner);

        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if recorder.close_generation(generation) {
                debug!(generation, "recording segment rotated at window deadline");
            }
        });

        Ok((video_name, audio_name))
    }

    /// Copy one relayed packet into the open segment; a no-op outside the
    /// recording window.
    pub fn write(&self, kind: MediaKind, packet: &Packet) {
        let mut inner = self.inner.lock();
        let Some(segment) = inner.segment.as_mut() else {
            return;
        };
        let result = match kind {
            MediaKind::Video => segment.video.write_rtp(packet),
            MediaKind::Audio => segment.audio.write_rtp(packet),
        };
        if let Err(err) = result {
            warn!(%kind, error = %err, "recording write failed, dropping packet");
        }
    }

    /// Close the pair opened by the matching `start` call, if it is still the
    /// active one. Later segments are left untouched.
    fn close_generation(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        let current = inner.segment.as_ref().map(|s| s.generation);
        if current != Some(generation) {
            return false;
        }
        Self::close_open_segment(&mut inner);
        true
    }

    fn close_open_segment(inner: &mut RecorderInner) {
        if let Some(mut segment) = inner.segment.take() {
            if let Err(err) = segment.video.close() {
                warn!(error = %err, "video writer close failed");
            }
            if let Err(err) = segment.audio.close() {
                warn!(error = %err, "audio writer close failed");
            }
            inner.state = RecordingState::Recorded;
        }
    }

    /// Explicit `stop_record`: close the open pair and report its names.
    pub fn stop(&self) -> Result<(String, String)> {
        let mut inner = self.inner.lock();
        if inner.state != RecordingState::Recording {
            return Err(Error::InvalidInput("no recording in progress".to_string()));
        }
        Self::close_open_segment(&mut inner);
        Self::names(&inner)
    }

    /// `confirm_file`: accept the last closed segment for upload.
    pub fn confirm(&self) -> Result<(String, String)> {
        let mut inner = self.inner.lock();
        if inner.state != RecordingState::Recorded {
            return Err(Error::InvalidInput("no recorded segment to confirm".to_string()));
        }
        inner.state = RecordingState::Confirmed;
        Self::names(&inner)
    }

    /// Forced teardown: close an open pair as-is and report whichever closed
    /// pair has not reached the upload scheduler yet, so a user who stopped
    /// recording and then disconnected still gets their files uploaded. A
    /// confirmed pair was already handed off and is not reported again.
    pub fn finalize(&self) -> Option<(String, String)> {
        let mut inner = self.inner.lock();
        Self::close_open_segment(&mut inner);
        if inner.state != RecordingState::Recorded {
            return None;
        }
        inner.state = RecordingState::Confirmed;
        Self::names(&inner).ok()
    }

    fn names(inner: &RecorderInner) -> Result<(String, String)> {
        match (&inner.video_name, &inner.audio_name) {
            (Some(v), Some(a)) => Ok((v.clone(), a.clone())),
            _ => Err(Error::Internal("recording file names missing".to_string())),
        }
    }

    #[must_use]
    pub fn state(&self) -> RecordingState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.inner.lock().segment.is_some()
    }

    #[must_use]
    pub fn file_names(&self) -> (Option<String>, Option<String>) {
        let inner = self.inner.lock();
        (inner.video_name.clone(), inner.audio_name.clone())
    }
}

/// Whole-meeting recording: one container file of raw chunks received over
/// the control channel, owner-only.
pub struct MeetRecorder {
    dir: PathBuf,
    inner: Mutex<Option<MeetFile>>,
}

struct MeetFile {
    name: String,
    file: File,
}

impl MeetRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            inner: Mutex::new(None),
        }
    }

    pub fn start(&self) -> Result<String> {
        let mut inner = self.inner.lock();
        if inner.is_some() {
            return Err(Error::InvalidInput("meeting recording already active".to_string()));
        }
        std::fs::create_dir_all(&self.dir)?;
        let name = segment_name("mkv");
        let file = File::create(self.dir.join(&name))?;
        *inner = Some(MeetFile {
            name: name.clone(),
            file,
        });
        Ok(name)
    }

    /// Append one raw chunk. Returns false when no recording is active, in
    /// which case the caller must treat the payload as a protocol error.
    pub fn write_chunk(&self, chunk: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        match inner.as_mut() {
            Some(meet) => {
                if let Err(err) = meet.file.write_all(chunk) {
                    warn!(error = %err, "meeting recording write failed");
                }
                true
            }
            None => false,
        }
    }

    /// Close the file and return its name for upload.
    pub fn stop(&self) -> Option<String> {
        self.inner.lock().take().map(|meet| meet.name)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.lock().is_some()
    }

    #[must_use]
    pub fn local_path(&self, name: &str) -> PathBuf {
        Path::new(&self.dir).join(name)
    }
}
