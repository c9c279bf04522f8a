use ndarray::Array4;
use opencv::core::{Mat, Rect, Scalar, Size, BORDER_CONSTANT, CV_8UC3};
use opencv::imgproc;
use opencv::prelude::*;

use crate::config::InputSize;

use super::DetectError;

/// Neutral gray used for the letterbox bars.
pub const PAD_VALUE: f64 = 128.0;

const CELL: i32 = 32;

/// Mapping between network input pixels and source pixels:
/// `source = (input - offset) / scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    /// Size of the scaled source inside the padded input.
    pub resized_width: u32,
    pub resized_height: u32,
    pub input_width: u32,
    pub input_height: u32,
}

impl Geometry {
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x) / self.scale,
            (y - self.offset_y) / self.scale,
        )
    }
}

/// A network-sized copy of a source image.
pub struct LetterboxedImage {
    image: Mat,
    geometry: Geometry,
}

impl LetterboxedImage {
    /// Fixed sizes scale uniformly and pad the remainder symmetrically.
    /// [`InputSize::FromImage`] crops the top-left region whose sides are the
    /// largest multiples of 32 that fit, without scaling or padding.
    pub fn new(image: &Mat, size: InputSize) -> Result<Self, DetectError> {
        size.validate()?;

        if image.empty() || image.rows() == 0 || image.cols() == 0 {
            return Err(DetectError::EmptyImage);
        }
        if image.typ() != CV_8UC3 {
            return Err(DetectError::UnsupportedFormat(image.typ()));
        }

        match size {
            InputSize::Fixed { width, height } => Self::letterbox(image, width as i32, height as i32),
            InputSize::FromImage => Self::crop(image),
        }
    }

    fn letterbox(image: &Mat, target_w: i32, target_h: i32) -> Result<Self, DetectError> {
        let src_w = image.cols();
        let src_h = image.rows();

        let scale = (target_w as f64 / src_w as f64).min(target_h as f64 / src_h as f64);
        let new_w = ((src_w as f64 * scale) as i32).clamp(1, target_w);
        let new_h = ((src_h as f64 * scale) as i32).clamp(1, target_h);

        let mut resized = Mat::default();
        imgproc::resize(
            image,
            &mut resized,
            Size::new(new_w, new_h),
            0.0,
            0.0,
            imgproc::INTER_CUBIC,
        )?;

        let pad_x = (target_w - new_w) / 2;
        let pad_y = (target_h - new_h) / 2;

        let mut padded = Mat::default();
        opencv::core::copy_make_border(
            &resized,
            &mut padded,
            pad_y,
            target_h - new_h - pad_y,
            pad_x,
            target_w - new_w - pad_x,
            BORDER_CONSTANT,
            Scalar::all(PAD_VALUE),
        )?;

        Ok(Self {
            image: padded,
            geometry: Geometry {
                scale: scale as f32,
                offset_x: pad_x as f32,
                offset_y: pad_y as f32,
                resized_width: new_w as u32,
                resized_height: new_h as u32,
                input_width: target_w as u32,
                input_height: target_h as u32,
            },
        })
    }

    fn crop(image: &Mat) -> Result<Self, DetectError> {
        let width = image.cols() - image.cols() % CELL;
        let height = image.rows() - image.rows() % CELL;
        if width == 0 || height == 0 {
            return Err(DetectError::ImageTooSmall {
                width: image.cols(),
                height: image.rows(),
            });
        }

        let cropped = Mat::roi(image, Rect::new(0, 0, width, height))?.try_clone()?;

        Ok(Self {
            image: cropped,
            geometry: Geometry {
                scale: 1.0,
                offset_x: 0.0,
                offset_y: 0.0,
                resized_width: width as u32,
                resized_height: height as u32,
                input_width: width as u32,
                input_height: height as u32,
            },
        })
    }

    pub fn image(&self) -> &Mat {
        &self.image
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// RGB, NCHW, scaled to `[0, 1]`, batch of one.
    pub fn to_tensor(&self) -> Result<Array4<f32>, DetectError> {
        let width = self.image.cols();
        let height = self.image.rows();

        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&self.image, &mut rgb, imgproc::COLOR_BGR2RGB)?;

        let data = rgb.data_bytes()?;
        let (w, h) = (width as usize, height as usize);
        if data.len() < w * h * 3 {
            return Err(DetectError::TruncatedImage { width, height });
        }

        let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
        for y in 0..h {
            for x in 0..w {
                let idx = (y * w + x) * 3;
                tensor[[0, 0, y, x]] = data[idx] as f32 / 255.0;
                tensor[[0, 1, y, x]] = data[idx + 1] as f32 / 255.0;
                tensor[[0, 2, y, x]] = data[idx + 2] as f32 / 255.0;
            }
        }

        Ok(tensor)
    }
}
