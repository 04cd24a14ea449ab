/// Errors that can occur while acquiring frames and tracker poses.
#[derive(Debug, thiserror::Error)]
pub enum AltcapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),

    /// A capability library could not be brought up at startup.
    #[error("Failed to load {0} library: {1}")]
    CapabilityUnavailable(&'static str, String),

    #[error("Tracking error: {0}")]
    Tracking(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Node property not found: {0}")]
    PropertyNotFound(String),

    #[error("Invalid frame ({width}x{height})")]
    InvalidFrame { width: u32, height: u32 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
