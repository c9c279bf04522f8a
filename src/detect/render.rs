use opencv::core::{Mat, Point, Size};
use opencv::imgproc;
use opencv::prelude::*;

use crate::catalog::ClassCatalog;
use crate::palette::{ColorPalette, Rgb};

use super::{DetectError, Detection};

const FONT_FACE: i32 = imgproc::FONT_HERSHEY_SIMPLEX;
const TEXT_THICKNESS: i32 = 1;
const TEXT_COLOR: Rgb = Rgb(0, 0, 0);

/// Integer box with every edge inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
}

/// What was drawn for one detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub class_index: usize,
    pub label: String,
    pub bbox: PixelBox,
    pub label_origin: Point,
    pub label_size: Size,
    pub color: Rgb,
}

pub struct Renderer {
    catalog: ClassCatalog,
    palette: ColorPalette,
}

impl Renderer {
    pub fn new(catalog: ClassCatalog, palette: ColorPalette) -> Self {
        Self { catalog, palette }
    }

    pub fn catalog(&self) -> &ClassCatalog {
        &self.catalog
    }

    pub fn palette(&self) -> &ColorPalette {
        &self.palette
    }

    /// Draws `detections` onto `image` last-to-first, so earlier entries end up on
    /// top. Returns the annotations in drawing order.
    pub fn draw(
        &self,
        image: &mut Mat,
        detections: &[Detection],
    ) -> Result<Vec<Annotation>, DetectError> {
        let width = image.cols();
        let height = image.rows();

        let font_height = ((0.03 * height as f64 + 0.5).floor() as i32).max(1);
        let font_scale =
            imgproc::get_font_scale_from_height(FONT_FACE, font_height, TEXT_THICKNESS)?;
        let thickness = ((width + height) / 300).max(1);

        let mut annotations = Vec::with_capacity(detections.len());

        for detection in detections.iter().rev() {
            let class_index = detection.class_index;
            let name = self
                .catalog
                .name(class_index)
                .ok_or(DetectError::UnknownClass(class_index))?;
            let color = self
                .palette
                .color(class_index)
                .ok_or(DetectError::UnknownClass(class_index))?;
            let fill = color.to_bgr_scalar();

            let label = format!("{} {:.2}", name, detection.score);
            let mut baseline = 0;
            let text_size = imgproc::get_text_size(
                &label,
                FONT_FACE,
                font_scale,
                TEXT_THICKNESS,
                &mut baseline,
            )?;
            let label_size = Size::new(text_size.width, text_size.height + baseline);

            let bbox = detection.clamped(width, height);
            tracing::trace!(
                label = %label,
                left = bbox.left,
                top = bbox.top,
                right = bbox.right,
                bottom = bbox.bottom,
                "drawing detection"
            );

            let label_origin = if bbox.top - label_size.height >= 0 {
                Point::new(bbox.left, bbox.top - label_size.height)
            } else {
                Point::new(bbox.left, bbox.top + 1)
            };

            for i in 0..thickness {
                imgproc::rectangle_points(
                    image,
                    Point::new(bbox.left + i, bbox.top + i),
                    Point::new(bbox.right - i, bbox.bottom - i),
                    fill,
                    1,
                    imgproc::LINE_8,
                    0,
                )?;
            }

            imgproc::rectangle_points(
                image,
                label_origin,
                Point::new(
                    label_origin.x + label_size.width,
                    label_origin.y + label_size.height,
                ),
                fill,
                imgproc::FILLED,
                imgproc::LINE_8,
                0,
            )?;

            imgproc::put_text(
                image,
                &label,
                Point::new(label_origin.x, label_origin.y + text_size.height),
                FONT_FACE,
                font_scale,
                TEXT_COLOR.to_bgr_scalar(),
                TEXT_THICKNESS,
                imgproc::LINE_8,
                false,
            )?;

            annotations.push(Annotation {
                class_index,
                label,
                bbox,
                label_origin,
                label_size,
                color,
            });
        }

        Ok(annotations)
    }
}
