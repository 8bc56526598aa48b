//! Icon frame selection and PNG rendering
//!
//! Device metadata archives ship a multi-frame `.ico` container. The best frame
//! is the widest one meeting the minimum width and colour depth, with deeper
//! colour breaking ties and container order breaking the rest. The chosen frame
//! has the border matching its top-left corner colour trimmed and is re-centred
//! on a transparent canvas of its native size.

use image::{ImageFormat, Rgba, RgbaImage, imageops};
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::IconConfig;
use crate::errors::{TranscodeError, TranscodeResult};
use crate::utils::atomic_file::{WriteOutcome, write_once};

/// One image inside an icon container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconFrame {
    /// Position in the container
    pub index: usize,
    pub width: u32,
    pub height: u32,
    /// Bits per pixel
    pub color_depth: u16,
}

/// Lists the frames of an icon container
pub trait ImageInspector: Send + Sync {
    fn frames(&self, source: &Path) -> TranscodeResult<Vec<IconFrame>>;
}

/// Renders one frame of an icon container to PNG bytes
pub trait ImageRenderer: Send + Sync {
    fn render(&self, source: &Path, frame: &IconFrame) -> TranscodeResult<Vec<u8>>;
}

/// Best frame meeting both thresholds, if any
pub fn select_frame(frames: &[IconFrame], min_width: u32, min_color_depth: u16) -> Option<IconFrame> {
    frames
        .iter()
        .filter(|frame| frame.width >= min_width && frame.color_depth >= min_color_depth)
        .max_by(|a, b| {
            a.width
                .cmp(&b.width)
                .then(a.color_depth.cmp(&b.color_depth))
                .then(b.index.cmp(&a.index))
        })
        .copied()
}

/// Inspector and renderer for Windows `.ico` containers
#[derive(Debug, Clone, Copy, Default)]
pub struct IcoImageBackend;

impl IcoImageBackend {
    fn read_container(source: &Path) -> TranscodeResult<ico::IconDir> {
        let file = std::fs::File::open(source)?;
        ico::IconDir::read(BufReader::new(file))
            .map_err(|e| TranscodeError::decode(format!("{}: {}", source.display(), e)))
    }
}

impl ImageInspector for IcoImageBackend {
    fn frames(&self, source: &Path) -> TranscodeResult<Vec<IconFrame>> {
        let container = Self::read_container(source)?;
        Ok(container
            .entries()
            .iter()
            .enumerate()
            .map(|(index, entry)| IconFrame {
                index,
                width: entry.width(),
                height: entry.height(),
                color_depth: entry.bits_per_pixel(),
            })
            .collect())
    }
}

impl ImageRenderer for IcoImageBackend {
    fn render(&self, source: &Path, frame: &IconFrame) -> TranscodeResult<Vec<u8>> {
        let container = Self::read_container(source)?;
        let entry = container.entries().get(frame.index).ok_or_else(|| {
            TranscodeError::decode(format!("frame {} not present in {}", frame.index, source.display()))
        })?;
        let decoded = entry
            .decode()
            .map_err(|e| TranscodeError::decode(format!("frame {}: {}", frame.index, e)))?;

        let pixels = RgbaImage::from_raw(decoded.width(), decoded.height(), decoded.rgba_data().to_vec())
            .ok_or_else(|| TranscodeError::decode(format!("frame {} has a short pixel buffer", frame.index)))?;

        let canvas = center_content(&pixels);
        let mut png = Cursor::new(Vec::new());
        canvas.write_to(&mut png, ImageFormat::Png)?;
        Ok(png.into_inner())
    }
}

/// Fully transparent pixels match whatever their colour channels hold
fn same_colour(a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
    (a[3] == 0 && b[3] == 0) || a == b
}

/// Smallest rectangle holding every pixel that differs from the top-left corner
fn content_bounds(image: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
    if image.width() == 0 || image.height() == 0 {
        return None;
    }
    let background = *image.get_pixel(0, 0);

    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        if same_colour(pixel, &background) {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((min_x, min_y, max_x, max_y)) => (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y)),
        });
    }
    bounds.map(|(min_x, min_y, max_x, max_y)| (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

/// Trim the border matching the corner colour and centre what remains on a
/// same-sized transparent canvas. A uniform image is returned unchanged.
fn center_content(image: &RgbaImage) -> RgbaImage {
    let Some((x, y, content_width, content_height)) = content_bounds(image) else {
        return image.clone();
    };

    let (width, height) = image.dimensions();
    let mut canvas = RgbaImage::new(width, height);
    let content = imageops::crop_imm(image, x, y, content_width, content_height).to_image();
    let offset_x = (width - content_width) / 2;
    let offset_y = (height - content_height) / 2;
    imageops::overlay(&mut canvas, &content, i64::from(offset_x), i64::from(offset_y));
    canvas
}

/// Turns an icon container into a single PNG asset
#[derive(Clone)]
pub struct IconTranscoder {
    inspector: Arc<dyn ImageInspector>,
    renderer: Arc<dyn ImageRenderer>,
    min_width: u32,
    min_color_depth: u16,
}

impl IconTranscoder {
    pub fn new(
        inspector: Arc<dyn ImageInspector>,
        renderer: Arc<dyn ImageRenderer>,
        min_width: u32,
        min_color_depth: u16,
    ) -> Self {
        Self {
            inspector,
            renderer,
            min_width,
            min_color_depth,
        }
    }

    pub fn from_config(config: &IconConfig) -> Self {
        let backend = Arc::new(IcoImageBackend);
        Self::new(backend.clone(), backend, config.min_width, config.min_color_depth)
    }

    /// Select, render and write the best frame of `source` to `destination`
    pub fn transcode_blocking(&self, source: &Path, destination: &Path) -> TranscodeResult<IconFrame> {
        let frames = self.inspector.frames(source)?;
        let frame = select_frame(&frames, self.min_width, self.min_color_depth).ok_or(
            TranscodeError::NoSuitableFrame {
                min_width: self.min_width,
                min_color_depth: self.min_color_depth,
            },
        )?;
        debug!(
            "Selected icon frame {} ({}x{}, {} bits) of {}",
            frame.index,
            frame.width,
            frame.height,
            frame.color_depth,
            frames.len()
        );

        let png = self.renderer.render(source, &frame)?;
        if write_once(destination, &png)? == WriteOutcome::AlreadyExists {
            debug!("Icon {} already exists, keeping it", destination.display());
        }
        Ok(frame)
    }

    pub async fn transcode(&self, source: &Path, destination: &Path) -> TranscodeResult<IconFrame> {
        let transcoder = self.clone();
        let source: PathBuf = source.to_path_buf();
        let destination: PathBuf = destination.to_path_buf();
        tokio::task::spawn_blocking(move || transcoder.transcode_blocking(&source, &destination))
            .await
            .map_err(|e| TranscodeError::Task {
                message: e.to_string(),
            })?
    }
}
