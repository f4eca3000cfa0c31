//! RGBA drawing surface: video frame plus landmark markers.

use crate::types::FacePrediction;
use image::{Rgba, RgbaImage};

/// Side length of a landmark marker, in pixels.
pub const MARKER_SIZE: u32 = 2;
/// Marker fill colour.
pub const MARKER_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Drawing surface sized to the camera's native resolution.
#[derive(Clone)]
pub struct Surface {
    canvas: RgbaImage,
}

impl Surface {
    /// Create a transparent surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.canvas.width()
    }

    pub fn height(&self) -> u32 {
        self.canvas.height()
    }

    /// Reset every pixel to transparent black.
    pub fn clear(&mut self) {
        for px in self.canvas.pixels_mut() {
            *px = Rgba([0, 0, 0, 0]);
        }
    }

    /// Draw a packed RGB24 frame at the origin. Parts outside the surface are clipped.
    pub fn draw_frame(&mut self, rgb: &[u8], width: u32, height: u32) {
        let w = width.min(self.width());
        let h = height.min(self.height());
        for y in 0..h {
            for x in 0..w {
                let idx = ((y * width + x) * 3) as usize;
                let Some(p) = rgb.get(idx..idx + 3) else {
                    return;
                };
                self.canvas.put_pixel(x, y, Rgba([p[0], p[1], p[2], 255]));
            }
        }
    }

    /// Fill a `w`×`h` rectangle whose top-left corner is at `(x, y)`.
    ///
    /// Fractional coordinates snap down to the containing pixel. Returns
    /// the number of pixels written after clipping.
    pub fn fill_rect(&mut self, x: f32, y: f32, w: u32, h: u32, color: Rgba<u8>) -> usize {
        if !x.is_finite() || !y.is_finite() {
            return 0;
        }
        let x0 = x.floor() as i64;
        let y0 = y.floor() as i64;
        let x_range = x0.max(0)..(x0 + w as i64).min(self.width() as i64);
        let y_range = y0.max(0)..(y0 + h as i64).min(self.height() as i64);

        let mut written = 0;
        for py in y_range {
            for px in x_range.clone() {
                self.canvas.put_pixel(px as u32, py as u32, color);
                written += 1;
            }
        }
        written
    }

    /// Draw one marker per landmark of `face`. Returns the number of markers
    /// issued, which equals the number of landmarks (off-surface markers are
    /// clipped, not skipped).
    pub fn draw_landmarks(&mut self, face: &FacePrediction) -> usize {
        for p in &face.landmarks {
            self.fill_rect(p.x, p.y, MARKER_SIZE, MARKER_SIZE, MARKER_COLOR);
        }
        face.landmarks.len()
    }

    /// Raw RGBA bytes, row-major.
    pub fn as_rgba(&self) -> &[u8] {
        self.canvas.as_raw()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        (x < self.width() && y < self.height()).then(|| *self.canvas.get_pixel(x, y))
    }

    pub fn into_image(self) -> RgbaImage {
        self.canvas
    }
}
