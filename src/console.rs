use crate::gateway::Viewer;
use crate::types::FrameSample;
use crate::{AltcapError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::io::BufRead;
use std::time::Duration;

/// Console stand-in for a preview window.
///
/// Frames are reported through the log. Any line typed on the input (Enter)
/// counts as the quit key; a background thread reads the input and hands
/// lines over a channel so [`Viewer::poll_quit`] never blocks longer than its timeout.
pub struct ConsoleViewer {
    keys: Receiver<String>,
    shown: u64,
}

impl ConsoleViewer {
    /// Watch the process stdin for the quit key.
    pub fn spawn() -> Result<Self> {
        Self::from_reader(std::io::BufReader::new(std::io::stdin()))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::bounded(16);

        // Not joined: a blocked stdin read cannot be interrupted, the thread
        // exits with the process.
        std::thread::Builder::new()
            .name("altcap-keys".into())
            .spawn(move || key_reader_loop(reader, sender))
            .map_err(|e| AltcapError::InvalidInput(format!("Failed to spawn key reader: {}", e)))?;

        Ok(Self {
            keys: receiver,
            shown: 0,
        })
    }

    pub fn shown(&self) -> u64 {
        self.shown
    }
}

impl Viewer for ConsoleViewer {
    fn show(&mut self, frame: &FrameSample<'_>) {
        self.shown += 1;
        log::debug!(
            "Frame #{} {}x{} at {}",
            frame.sequence,
            frame.image.width(),
            frame.image.height(),
            frame.timestamp_ms
        );
    }

    fn poll_quit(&mut self, timeout: Duration) -> bool {
        match self.keys.recv_timeout(timeout) {
            Ok(_) => true,
            Err(RecvTimeoutError::Timeout) => false,
            // Input closed: no quit key can arrive anymore.
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

fn key_reader_loop<R: BufRead>(reader: R, sender: Sender<String>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::warn!("Console input error: {}", e);
                break;
            }
        };
        if let Err(e) = sender.try_send(line) {
            match e {
                crossbeam_channel::TrySendError::Full(_) => {
                    log::trace!("Key channel full, dropping input");
                }
                crossbeam_channel::TrySendError::Disconnected(_) => break,
            }
        }
    }
    log::debug!("Console input closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::io::Cursor;

    #[test]
    fn test_input_line_requests_quit() {
        let mut viewer = ConsoleViewer::from_reader(Cursor::new("\n")).unwrap();
        assert!(viewer.poll_quit(Duration::from_secs(2)));
        // Input exhausted afterwards.
        assert!(!viewer.poll_quit(Duration::from_millis(50)));
    }

    #[test]
    fn test_closed_input_never_quits() {
        let mut viewer = ConsoleViewer::from_reader(Cursor::new("")).unwrap();
        assert!(!viewer.poll_quit(Duration::from_millis(50)));
    }

    #[test]
    fn test_show_counts_frames() {
        let mut viewer = ConsoleViewer::from_reader(Cursor::new("")).unwrap();
        let image = RgbImage::new(2, 2);
        viewer.show(&FrameSample {
            timestamp_ms: 1,
            sequence: 1,
            image: &image,
        });
        assert_eq!(viewer.shown(), 1);
    }
}
