use std::sync::atomic::{AtomicBool, Ordering};

use opencv::core::{Mat, Point, Scalar};
use opencv::imgproc;
use opencv::prelude::*;

use crate::detect::{DetectError, Detector};

use super::fps::FpsCounter;
use super::{Display, FrameSink, FrameSource, StreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames: u64,
    pub stop: StopReason,
}

/// Detects on every frame of `source` until it runs dry, the display asks to
/// stop or `shutdown` is set. The detector is closed on every exit path and
/// the source, sink and display are dropped before returning.
pub fn run(
    mut detector: Detector,
    mut source: Box<dyn FrameSource>,
    mut sink: Option<Box<dyn FrameSink>>,
    mut display: Box<dyn Display>,
    shutdown: &AtomicBool,
) -> Result<StreamSummary, StreamError> {
    tracing::info!("stream started");

    let result = pump(
        &mut detector,
        source.as_mut(),
        &mut sink,
        display.as_mut(),
        shutdown,
    );
    detector.close();

    match &result {
        Ok(summary) => tracing::info!(
            frames = summary.frames,
            stop = ?summary.stop,
            "stream stopped"
        ),
        Err(e) => tracing::error!(error = %e, "stream failed"),
    }
    result
}

fn pump(
    detector: &mut Detector,
    source: &mut dyn FrameSource,
    sink: &mut Option<Box<dyn FrameSink>>,
    display: &mut dyn Display,
    shutdown: &AtomicBool,
) -> Result<StreamSummary, StreamError> {
    let mut fps = FpsCounter::new();
    let mut frame = Mat::default();
    let mut frames = 0;

    loop {
        match source.read(&mut frame) {
            Ok(true) if !frame.empty() => {}
            Ok(_) => {
                return Ok(StreamSummary {
                    frames,
                    stop: StopReason::EndOfStream,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame read failed, ending stream");
                return Ok(StreamSummary {
                    frames,
                    stop: StopReason::EndOfStream,
                });
            }
        }

        let mut image = to_bgr(&frame)?;
        detector.annotate(&mut image)?;

        let label = fps.tick();
        imgproc::put_text(
            &mut image,
            label,
            Point::new(3, 15),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            Scalar::new(255.0, 0.0, 0.0, 0.0),
            2,
            imgproc::LINE_8,
            false,
        )?;
        frames += 1;

        if let Some(sink) = sink.as_mut() {
            sink.write(&image)?;
        }
        display.show(&image)?;

        if shutdown.load(Ordering::Relaxed) || display.cancelled()? {
            return Ok(StreamSummary {
                frames,
                stop: StopReason::Cancelled,
            });
        }
    }
}

/// Copies `frame` as 8-bit BGR, expanding gray and dropping alpha.
fn to_bgr(frame: &Mat) -> Result<Mat, StreamError> {
    let code = match frame.channels() {
        3 => return Ok(frame.try_clone()?),
        1 => imgproc::COLOR_GRAY2BGR,
        4 => imgproc::COLOR_BGRA2BGR,
        _ => return Err(DetectError::UnsupportedFormat(frame.typ()).into()),
    };
    let mut bgr = Mat::default();
    imgproc::cvt_color_def(frame, &mut bgr, code)?;
    Ok(bgr)
}
