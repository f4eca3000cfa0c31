//! facemark-hw — Camera acquisition for the capture session.
//!
//! Opens a V4L2 device against a set of capture constraints, keeps a
//! memory-mapped stream running and converts every buffer to packed RGB.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraConstraints, CameraError, CameraStream, Facing, FrameSource, PixelFormat};
pub use frame::Frame;
