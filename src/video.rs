//! Webcam and video-file streaming modes, window display, and codec
//! negotiation.

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use indicatif::{ProgressBar, ProgressStyle};
use opencv::{
    core::{Mat, Size, CV_8UC3},
    highgui,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use tracing::{info, warn};

use crate::errors::{DemoError, Result};
use crate::traits::PanopticModel;

/// Escape key code returned by `highgui::wait_key`.
const ESC: i32 = 27;

/// Convert a BGR `Mat` frame into an `RgbImage`.
pub fn mat_to_rgb(mat: &Mat) -> Result<RgbImage> {
    if mat.typ() != CV_8UC3 {
        return Err(DemoError::Video {
            operation: "frame conversion".to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("expected 8-bit BGR frame, got mat type {}", mat.typ()),
            )),
        });
    }
    let mat = if mat.is_continuous() {
        mat.clone()
    } else {
        mat.try_clone()?
    };

    let size = mat.size()?;
    let (width, height) = (size.width as u32, size.height as u32);
    let data = mat.data_bytes()?;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let index = ((y * width + x) * 3) as usize;
        Rgb([data[index + 2], data[index + 1], data[index]])
    }))
}

/// Convert an `RgbImage` into a BGR `Mat` for display or encoding.
pub fn rgb_to_bgr_mat(image: &RgbImage) -> Result<Mat> {
    let (width, height) = image.dimensions();
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for pixel in image.pixels() {
        data.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]);
    }
    let flat = Mat::from_slice(&data)?;
    let shaped = flat.reshape(3, height as i32)?;
    Ok(shaped.try_clone()?)
}

/// Probe whether the build of OpenCV can encode with the given codec by
/// writing 30 dummy frames to a temporary file and checking it exists.
///
/// Never raises: an unsupported codec string reads as `false`.
pub fn probe_codec(codec: &str, file_ext: &str) -> bool {
    let Ok(dir) = tempfile::Builder::new()
        .prefix("video_format_test")
        .tempdir()
    else {
        return false;
    };
    let filename = dir.path().join(format!("test_file{file_ext}"));
    let Some(filename_str) = filename.to_str() else {
        return false;
    };

    let mut chars = codec.chars();
    let (Some(c1), Some(c2), Some(c3), Some(c4), None) = (
        chars.next(),
        chars.next(),
        chars.next(),
        chars.next(),
        chars.next(),
    ) else {
        return false;
    };
    let Ok(fourcc) = VideoWriter::fourcc(c1, c2, c3, c4) else {
        return false;
    };

    let Ok(mut writer) = VideoWriter::new(filename_str, fourcc, 30.0, Size::new(10, 10), true)
    else {
        return false;
    };
    let Ok(frame) = Mat::zeros(10, 10, CV_8UC3).and_then(|expr| expr.to_mat()) else {
        return false;
    };
    for _ in 0..30 {
        if writer.write(&frame).is_err() {
            return false;
        }
    }
    let _ = writer.release();
    filename.is_file()
}

/// Pick the output codec/extension pair: x264/.mkv when the probe succeeds,
/// otherwise mp4v/.mp4 with a warning.
pub fn select_codec() -> (&'static str, &'static str) {
    select_codec_with(probe_codec)
}

pub fn select_codec_with<F>(probe: F) -> (&'static str, &'static str)
where
    F: Fn(&str, &str) -> bool,
{
    if probe("x264", ".mkv") {
        ("x264", ".mkv")
    } else {
        warn!("x264 codec not available, falling back to mp4v");
        ("mp4v", ".mp4")
    }
}

fn fourcc_of(codec: &str) -> Result<i32> {
    let chars: Vec<char> = codec.chars().collect();
    if chars.len() != 4 {
        return Err(DemoError::validation(
            "codec",
            format!("fourcc must be 4 characters, got `{codec}`"),
        ));
    }
    Ok(VideoWriter::fourcc(chars[0], chars[1], chars[2], chars[3])?)
}

fn predict_frame<M: PanopticModel>(model: &M, frame: &Mat) -> Result<Mat> {
    let rgb = mat_to_rgb(frame)?;
    let output = model.predict(&rgb, true)?;
    let visualization = output.visualization.ok_or_else(|| DemoError::Model {
        operation: "frame visualization".to_string(),
        source: Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "backend returned no visualization",
        )),
    })?;
    rgb_to_bgr_mat(&visualization)
}

/// Webcam mode: per-frame inference into a window until ESC or the stream
/// ends. The capture handle is released on every exit path.
pub fn run_webcam<M: PanopticModel>(model: &M, window_name: &str) -> Result<()> {
    let mut camera = VideoCapture::new(0, videoio::CAP_ANY)?;
    if !camera.is_opened()? {
        return Err(DemoError::Video {
            operation: "webcam open".to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "webcam device 0 failed to open",
            )),
        });
    }

    let result = (|| -> Result<()> {
        loop {
            let mut frame = Mat::default();
            if !camera.read(&mut frame)? {
                break;
            }
            let vis = predict_frame(model, &frame)?;
            highgui::named_window(window_name, highgui::WINDOW_NORMAL)?;
            highgui::imshow(window_name, &vis)?;
            if highgui::wait_key(1)? == ESC {
                break;
            }
        }
        Ok(())
    })();

    camera.release()?;
    highgui::destroy_all_windows()?;
    result
}

/// Resolve the video output file, swapping in the negotiated extension when
/// the output is a directory. Refuses to overwrite an existing file.
fn resolve_video_output(output: &Path, video_input: &Path, file_ext: &str) -> Result<PathBuf> {
    let output_path = if output.is_dir() {
        let basename = video_input.file_name().ok_or_else(|| {
            DemoError::validation(
                "--video-input",
                format!("{} has no file name", video_input.display()),
            )
        })?;
        output.join(basename).with_extension(&file_ext[1..])
    } else {
        output.to_path_buf()
    };

    if output_path.is_file() {
        return Err(DemoError::validation(
            "--output",
            format!("{} already exists", output_path.display()),
        ));
    }
    Ok(output_path)
}

/// Video-file mode: decode, per-frame inference, then either encode to the
/// negotiated container or display in a window. Capture and writer handles
/// are released on every exit path, including an early ESC break.
pub fn run_video<M: PanopticModel>(
    model: &M,
    video_input: &Path,
    output: Option<&Path>,
) -> Result<()> {
    if !video_input.is_file() {
        return Err(DemoError::FileSystem {
            path: video_input.to_path_buf(),
            operation: "video input check".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "video file not found"),
        });
    }
    let input_str = video_input.to_str().ok_or_else(|| {
        DemoError::validation("--video-input", "path is not valid UTF-8")
    })?;

    let mut video = VideoCapture::from_file(input_str, videoio::CAP_ANY)?;
    if !video.is_opened()? {
        return Err(DemoError::Video {
            operation: "video open".to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} failed to open", video_input.display()),
            )),
        });
    }

    let width = video.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
    let height = video.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
    let fps = video.get(videoio::CAP_PROP_FPS)?;
    let num_frames = video.get(videoio::CAP_PROP_FRAME_COUNT)? as u64;
    let window_name = video_input
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());

    let (codec, file_ext) = select_codec();
    let mut writer = match output {
        Some(output) => {
            let output_path = resolve_video_output(output, video_input, file_ext)?;
            let output_str = output_path.to_str().ok_or_else(|| {
                DemoError::validation("--output", "path is not valid UTF-8")
            })?;
            info!(codec, output = %output_path.display(), "encoding video");
            Some(VideoWriter::new(
                output_str,
                fourcc_of(codec)?,
                fps,
                Size::new(width, height),
                true,
            )?)
        }
        None => None,
    };

    let progress = ProgressBar::new(num_frames);
    progress.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );

    let result = (|| -> Result<()> {
        loop {
            let mut frame = Mat::default();
            if !video.read(&mut frame)? {
                break;
            }
            let vis = predict_frame(model, &frame)?;
            match writer.as_mut() {
                Some(writer) => writer.write(&vis)?,
                None => {
                    highgui::named_window(&window_name, highgui::WINDOW_NORMAL)?;
                    highgui::imshow(&window_name, &vis)?;
                    if highgui::wait_key(1)? == ESC {
                        break;
                    }
                }
            }
            progress.inc(1);
        }
        Ok(())
    })();

    progress.finish_and_clear();
    video.release()?;
    match writer {
        Some(mut writer) => writer.release()?,
        None => highgui::destroy_all_windows()?,
    }
    result
}

/// Show one visualization in a blocking window. Returns `true` when ESC was
/// pressed, signalling the caller to stop iterating.
pub fn display_blocking(window_name: &str, visualization: &RgbImage) -> Result<bool> {
    let mat = rgb_to_bgr_mat(visualization)?;
    highgui::named_window(window_name, highgui::WINDOW_NORMAL)?;
    highgui::imshow(window_name, &mat)?;
    Ok(highgui::wait_key(0)? == ESC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn codec_selection_prefers_x264() {
        let (codec, ext) = select_codec_with(|codec, ext| codec == "x264" && ext == ".mkv");
        assert_eq!((codec, ext), ("x264", ".mkv"));
    }

    #[test]
    fn codec_selection_falls_back_without_raising() {
        let probed = RefCell::new(Vec::new());
        let (codec, ext) = select_codec_with(|codec, ext| {
            probed.borrow_mut().push((codec.to_string(), ext.to_string()));
            false
        });
        assert_eq!((codec, ext), ("mp4v", ".mp4"));
        // the fallback is not probed, only the preferred pair
        assert_eq!(probed.borrow().len(), 1);
    }

    #[test]
    fn fourcc_requires_four_characters() {
        assert!(fourcc_of("x2").is_err());
        assert!(fourcc_of("toolong").is_err());
    }

    #[test]
    fn probing_an_unsupported_codec_reports_failure() {
        // malformed strings short-circuit before touching the encoder
        assert!(!probe_codec("no", ".mkv"));
        assert!(!probe_codec("toolong", ".mkv"));
    }

    #[test]
    fn video_output_resolution_refuses_existing_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let existing = temp_dir.path().join("clip.mkv");
        std::fs::write(&existing, b"x").unwrap();

        let result = resolve_video_output(&existing, Path::new("clip.mp4"), ".mkv");
        assert!(result.is_err());

        let resolved =
            resolve_video_output(temp_dir.path(), Path::new("videos/clip.mp4"), ".mkv").unwrap();
        assert_eq!(resolved, temp_dir.path().join("clip.mkv"));
    }

    #[test]
    fn mat_round_trip_preserves_pixels() {
        let image = RgbImage::from_fn(4, 3, |x, y| Rgb([x as u8 * 10, y as u8 * 20, 77]));
        let mat = rgb_to_bgr_mat(&image).unwrap();
        let restored = mat_to_rgb(&mat).unwrap();
        assert_eq!(restored, image);
    }
}
