use crate::types::{FrameSample, LogStreams, PoseSample};
use crate::{AltcapError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::{self, File};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};

pub const TIMESTAMPS_LOG: &str = "timeStepsOnly.txt";
pub const POSE_LOG: &str = "timeStepsANDAltPos.txt";
pub const POSITION_LOG: &str = "altPos.txt";

/// Every Nth frame also goes to the decimated archive.
pub const DEFAULT_DECIMATION: u64 = 10;

pub const JPEG_QUALITY: u8 = 95;

const SEP: char = ';';

/// Where a capture sink writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkPaths {
    pub log_dir: PathBuf,
    /// Full-rate frame archive.
    pub image_dir: PathBuf,
    /// Decimated frame archive.
    pub keyframe_dir: PathBuf,
}

impl SinkPaths {
    /// Logs in `root`, archives in `root/images` and `root/images_10fps`.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            log_dir: root.to_path_buf(),
            image_dir: root.join("images"),
            keyframe_dir: root.join("images_10fps"),
        }
    }
}

/// Append-only storage for frames and the three text logs.
///
/// Streams are opened once in [`CaptureSink::open`] and stay open until
/// [`CaptureSink::finish`] or drop.
pub struct CaptureSink {
    paths: SinkPaths,
    decimation: u64,
    timestamps: Option<LineWriter<File>>,
    pose: Option<LineWriter<File>>,
    position: Option<LineWriter<File>>,
    frames_written: u64,
    keyframes_written: u64,
}

impl CaptureSink {
    pub fn open(paths: SinkPaths, streams: LogStreams, decimation: u64) -> Result<Self> {
        if decimation == 0 {
            return Err(AltcapError::InvalidInput("decimation must be at least 1".into()));
        }
        fs::create_dir_all(&paths.log_dir)?;
        fs::create_dir_all(&paths.image_dir)?;
        fs::create_dir_all(&paths.keyframe_dir)?;

        let open_log = |flag: LogStreams, name: &str| -> Result<Option<LineWriter<File>>> {
            if streams.contains(flag) {
                let file = File::create(paths.log_dir.join(name))?;
                Ok(Some(LineWriter::new(file)))
            } else {
                Ok(None)
            }
        };
        let timestamps = open_log(LogStreams::TIMESTAMPS, TIMESTAMPS_LOG)?;
        let pose = open_log(LogStreams::POSE, POSE_LOG)?;
        let position = open_log(LogStreams::POSITION, POSITION_LOG)?;

        log::info!(
            "Capture sink open: logs={} images={} keyframes={} streams={:?}",
            paths.log_dir.display(),
            paths.image_dir.display(),
            paths.keyframe_dir.display(),
            streams
        );

        Ok(Self {
            paths,
            decimation,
            timestamps,
            pose,
            position,
            frames_written: 0,
            keyframes_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn keyframes_written(&self) -> u64 {
        self.keyframes_written
    }

    pub fn is_keyframe(&self, sequence: u64) -> bool {
        sequence % self.decimation == 0
    }

    /// Write `<timestamp>.jpeg` to the full-rate archive, and to the decimated
    /// archive when the sequence number is a multiple of the decimation.
    /// Returns whether the frame was a keyframe.
    pub fn write_frame(&mut self, frame: &FrameSample<'_>) -> Result<bool> {
        let bytes = encode_jpeg(frame.image)?;
        let name = frame_file_name(frame.timestamp_ms);

        fs::write(self.paths.image_dir.join(&name), &bytes)?;
        self.frames_written += 1;

        if !self.is_keyframe(frame.sequence) {
            return Ok(false);
        }
        fs::write(self.paths.keyframe_dir.join(&name), &bytes)?;
        self.keyframes_written += 1;
        log::debug!("Write keyframe #{} ({})", frame.sequence, name);
        Ok(true)
    }

    /// Append the pose to the combined log and its position to the position-only log.
    pub fn append_pose(&mut self, sample: &PoseSample) -> Result<()> {
        if let Some(out) = self.pose.as_mut() {
            out.write_all(pose_line(sample).as_bytes())?;
        }
        if let Some(out) = self.position.as_mut() {
            out.write_all(position_line(sample).as_bytes())?;
        }
        Ok(())
    }

    pub fn append_timestamp(&mut self, timestamp_ms: i64) -> Result<()> {
        if let Some(out) = self.timestamps.as_mut() {
            writeln!(out, "{}", timestamp_ms)?;
        }
        Ok(())
    }

    /// Flush and close every stream.
    pub fn finish(mut self) -> Result<()> {
        self.flush_all()
    }

    fn flush_all(&mut self) -> Result<()> {
        for out in [&mut self.timestamps, &mut self.pose, &mut self.position]
            .into_iter()
            .flatten()
        {
            out.flush()?;
        }
        self.timestamps = None;
        self.pose = None;
        self.position = None;
        Ok(())
    }
}

impl Drop for CaptureSink {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            log::warn!("Failed to flush capture logs: {}", e);
        }
    }
}

pub fn frame_file_name(timestamp_ms: i64) -> String {
    format!("{}.jpeg", timestamp_ms)
}

/// `now;px;py;pz;rx;ry;rz`
pub fn pose_line(sample: &PoseSample) -> String {
    let p = sample.position;
    let r = sample.rotation;
    format!(
        "{ts}{s}{}{s}{}{s}{}{s}{}{s}{}{s}{}\n",
        p.x,
        p.y,
        p.z,
        r.x,
        r.y,
        r.z,
        ts = sample.timestamp_ms,
        s = SEP
    )
}

/// `px;py;pz`
pub fn position_line(sample: &PoseSample) -> String {
    let p = sample.position;
    format!("{}{s}{}{s}{}\n", p.x, p.y, p.z, s = SEP)
}

fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    if image.width() == 0 || image.height() == 0 {
        return Err(AltcapError::InvalidFrame {
            width: image.width(),
            height: image.height(),
        });
    }
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY).encode_image(image)?;
    Ok(bytes)
}
