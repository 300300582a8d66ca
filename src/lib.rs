pub mod augment;
pub mod config;
pub mod errors;
pub mod heatmap;
pub mod input;
pub mod model;
pub mod output;
pub mod tensor;
pub mod traits;
pub mod tta;
pub mod uncertainty;
pub mod video;

pub mod mocks;

use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

pub use config::{Config, ModelSettings, RunMode};
pub use errors::{DemoError, Result};
pub use model::OnnxPanopticModel;
pub use tensor::{Prediction, SegmentInfo};
pub use traits::{PanopticModel, PredictionOutput};

pub const WINDOW_NAME: &str = "panoptic demo";

/// End-to-end driver for static-image mode, generic over the prediction
/// backend.
pub struct DemoPipeline<M: PanopticModel> {
    model: M,
    config: Config,
}

impl<M: PanopticModel> DemoPipeline<M> {
    pub const fn new(model: M, config: Config) -> Self {
        Self { model, config }
    }

    /// Enumerate, shard and process this process's slice of the input list:
    /// load, averaged inference, then file output or blocking display.
    pub fn process_images(&self) -> Result<()> {
        let inputs = self.config.input.as_ref().ok_or_else(|| {
            DemoError::validation("--input", "is required in static-image mode")
        })?;

        let files = input::enumerate_inputs(inputs)?;
        let input_count = files.len();
        let files = input::shard(files, self.config.n, self.config.p);

        // progress only when writing files; the interactive window is the
        // feedback channel otherwise
        let progress = if self.config.output.is_some() {
            let bar = ProgressBar::new(files.len() as u64);
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
            );
            bar
        } else {
            ProgressBar::hidden()
        };

        let augmentations = if self.config.no_augment {
            Vec::new()
        } else {
            augment::default_augmentation_set()
        };

        for path in &files {
            let image = image::open(path)
                .map_err(|e| DemoError::ImageProcessing {
                    path: path.display().to_string(),
                    operation: "image load".to_string(),
                    source: Box::new(e),
                })?
                .into_rgb8();

            let start = Instant::now();
            let PredictionOutput {
                prediction,
                visualization,
            } = if augmentations.is_empty() {
                self.model.predict(&image, true)?
            } else {
                tta::averaged_prediction(&self.model, &image, &augmentations, true)?
            };
            info!(
                "{}: {} segments in {:.2}s",
                path.display(),
                prediction.segments.len(),
                start.elapsed().as_secs_f64()
            );

            let visualization = visualization.ok_or_else(|| DemoError::Model {
                operation: "visualization render".to_string(),
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "backend returned no visualization",
                )),
            })?;

            if let Some(output) = &self.config.output {
                let out_path = output::resolve_output(output, path, input_count)?;
                output::save_visualization(&visualization, &out_path)?;

                let entropy = uncertainty::normalized_entropy(&prediction.probabilities)?;
                output::save_composite(
                    &out_path,
                    &visualization,
                    entropy.view(),
                    prediction.confidences.view(),
                )?;

                if self.config.predictions {
                    output::write_archive(&output::archive_path(&out_path), &prediction)?;
                }
            } else if video::display_blocking(WINDOW_NAME, &visualization)? {
                break; // esc to quit
            }
            progress.inc(1);
        }

        progress.finish();
        Ok(())
    }
}

/// Entry point consuming a fully-constructed configuration; `main` maps the
/// result to an exit code. Validates the run mode before touching any I/O.
pub fn run(config: Config) -> Result<()> {
    let mode = config.run_mode()?;

    let mut settings = ModelSettings::load(&config.config_file)?;
    settings.apply_overrides(&config.opts)?;
    let model = OnnxPanopticModel::new(settings, config.confidence_threshold)?;

    match mode {
        RunMode::Images => DemoPipeline::new(model, config).process_images(),
        RunMode::Webcam => video::run_webcam(&model, WINDOW_NAME),
        RunMode::Video => {
            let video_input = config.video_input.as_deref().ok_or_else(|| {
                DemoError::validation("--video-input", "is required in video mode")
            })?;
            video::run_video(&model, video_input, config.output.as_deref())
        }
    }
}
