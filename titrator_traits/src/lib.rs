pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// One captured camera image, RGB8 in device color space.
pub type Frame = image::RgbImage;

/// Boxed error used at every hardware seam.
pub type SeamError = Box<dyn std::error::Error + Send + Sync>;

pub trait FrameSource {
    /// Capture the next frame, waiting at most `timeout`.
    fn frame(&mut self, timeout: std::time::Duration) -> Result<Frame, SeamError>;
}

/// Byte-stream link to a pump. Writes are fire-and-forget; nothing is read back.
pub trait SerialLink {
    fn write_line(&mut self, line: &str) -> Result<(), SeamError>;
    fn close(&mut self) -> Result<(), SeamError>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn frame(&mut self, timeout: std::time::Duration) -> Result<Frame, SeamError> {
        (**self).frame(timeout)
    }
}

impl<T: SerialLink + ?Sized> SerialLink for Box<T> {
    fn write_line(&mut self, line: &str) -> Result<(), SeamError> {
        (**self).write_line(line)
    }
    fn close(&mut self) -> Result<(), SeamError> {
        (**self).close()
    }
}
