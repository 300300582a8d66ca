use std::fs::File;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::errors::{DemoError, Result};

/// Command-line configuration for the demo harness.
#[derive(Parser, Clone, Debug)]
#[command(version, about = "panoptic segmentation demo", long_about = None)]
pub struct Config {
    /// Path to the model settings file
    #[arg(long, value_name = "FILE", default_value = "configs/panoptic.yaml")]
    pub config_file: PathBuf,

    /// Save raw prediction tensors (.ptz) together with visualizations
    #[arg(long)]
    pub predictions: bool,

    /// Take inputs from webcam
    #[arg(long)]
    pub webcam: bool,

    /// Path to video file
    #[arg(long)]
    pub video_input: Option<PathBuf>,

    /// A list of space separated input images, or a single directory
    #[arg(long, num_args = 1..)]
    pub input: Option<Vec<PathBuf>>,

    /// A file or directory to save output visualizations.
    /// If not given, output is shown in a window.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Minimum score for predictions to be shown
    #[arg(long, default_value_t = 0.5)]
    pub confidence_threshold: f32,

    /// Disable test-time augmentation averaging
    #[arg(long)]
    pub no_augment: bool,

    /// Shard count: total number of cooperating processes
    #[arg(long, default_value_t = 1)]
    pub n: usize,

    /// Shard index of this process
    #[arg(long, default_value_t = 0)]
    pub p: usize,

    /// Modify model settings using KEY VALUE pairs
    #[arg(long, num_args = 0.., value_name = "KEY VALUE")]
    pub opts: Vec<String>,
}

/// The active top-level run mode. Exactly one is selected by the mutually
/// exclusive CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Images,
    Webcam,
    Video,
}

impl Config {
    /// Validate the mutually exclusive run-mode flags before any I/O.
    pub fn run_mode(&self) -> Result<RunMode> {
        let selected = [
            self.input.is_some(),
            self.webcam,
            self.video_input.is_some(),
        ]
        .iter()
        .filter(|&&flag| flag)
        .count();

        if selected == 0 {
            return Err(DemoError::validation(
                "run mode",
                "one of --input, --webcam, --video-input is required",
            ));
        }
        if selected > 1 {
            return Err(DemoError::validation(
                "run mode",
                "--input, --webcam and --video-input are mutually exclusive",
            ));
        }

        if self.webcam {
            if self.output.is_some() {
                return Err(DemoError::validation(
                    "--output",
                    "is not supported with --webcam",
                ));
            }
            return Ok(RunMode::Webcam);
        }
        if self.video_input.is_some() {
            return Ok(RunMode::Video);
        }
        Ok(RunMode::Images)
    }
}

fn default_input_size() -> u32 {
    640
}

/// Model settings loaded from the YAML config file, then adjusted by the
/// `--opts` override list. Built once before the pipeline starts and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Path to the ONNX weights file
    pub weights: PathBuf,

    /// Number of classes in the per-pixel probability output
    pub num_classes: usize,

    /// Square input resolution fed to the network
    #[serde(default = "default_input_size")]
    pub input_size: u32,

    #[serde(default)]
    pub device_id: i32,

    /// Category names indexed by category id
    #[serde(default)]
    pub category_names: Vec<String>,
}

impl ModelSettings {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| DemoError::FileSystem {
            path: path.to_path_buf(),
            operation: "config file open".to_string(),
            source: e,
        })?;
        let settings: Self = serde_yaml::from_reader(file)?;
        Ok(settings)
    }

    /// Apply `--opts` KEY VALUE override pairs.
    pub fn apply_overrides(&mut self, opts: &[String]) -> Result<()> {
        if opts.len() % 2 != 0 {
            return Err(DemoError::validation(
                "--opts",
                "expects KEY VALUE pairs, got an odd number of arguments",
            ));
        }

        for pair in opts.chunks_exact(2) {
            let (key, value) = (pair[0].as_str(), pair[1].as_str());
            match key {
                "MODEL.WEIGHTS" => self.weights = PathBuf::from(value),
                "MODEL.DEVICE_ID" => {
                    self.device_id = value.parse().map_err(|_| {
                        DemoError::validation(key, format!("invalid integer `{value}`"))
                    })?;
                }
                "MODEL.NUM_CLASSES" => {
                    self.num_classes = value.parse().map_err(|_| {
                        DemoError::validation(key, format!("invalid integer `{value}`"))
                    })?;
                }
                "INPUT.SIZE" => {
                    self.input_size = value.parse().map_err(|_| {
                        DemoError::validation(key, format!("invalid integer `{value}`"))
                    })?;
                }
                _ => {
                    return Err(DemoError::validation(
                        "--opts",
                        format!("unknown settings key `{key}`"),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn base_config() -> Config {
        Config {
            config_file: PathBuf::from("configs/panoptic.yaml"),
            predictions: false,
            webcam: false,
            video_input: None,
            input: None,
            output: None,
            confidence_threshold: 0.5,
            no_augment: false,
            n: 1,
            p: 0,
            opts: vec![],
        }
    }

    fn base_settings() -> ModelSettings {
        ModelSettings {
            weights: PathBuf::from("model.onnx"),
            num_classes: 10,
            input_size: 640,
            device_id: 0,
            category_names: vec![],
        }
    }

    #[test]
    fn run_mode_requires_exactly_one_source() {
        assert!(base_config().run_mode().is_err());

        let mut both = base_config();
        both.webcam = true;
        both.input = Some(vec![PathBuf::from("a.png")]);
        assert!(both.run_mode().is_err());

        let mut images = base_config();
        images.input = Some(vec![PathBuf::from("a.png")]);
        assert_eq!(images.run_mode().unwrap(), RunMode::Images);

        let mut video = base_config();
        video.video_input = Some(PathBuf::from("clip.mp4"));
        assert_eq!(video.run_mode().unwrap(), RunMode::Video);
    }

    #[test]
    fn webcam_rejects_output() {
        let mut config = base_config();
        config.webcam = true;
        config.output = Some(PathBuf::from("out"));
        assert!(config.run_mode().is_err());

        config.output = None;
        assert_eq!(config.run_mode().unwrap(), RunMode::Webcam);
    }

    #[test]
    fn overrides_update_settings() {
        let mut settings = base_settings();
        settings
            .apply_overrides(&[
                "MODEL.WEIGHTS".to_string(),
                "other.onnx".to_string(),
                "MODEL.NUM_CLASSES".to_string(),
                "21".to_string(),
                "INPUT.SIZE".to_string(),
                "512".to_string(),
            ])
            .unwrap();
        assert_eq!(settings.weights, PathBuf::from("other.onnx"));
        assert_eq!(settings.num_classes, 21);
        assert_eq!(settings.input_size, 512);
    }

    #[test]
    fn overrides_reject_bad_input() {
        let mut settings = base_settings();
        assert!(settings
            .apply_overrides(&["MODEL.WEIGHTS".to_string()])
            .is_err());
        assert!(settings
            .apply_overrides(&["UNKNOWN.KEY".to_string(), "1".to_string()])
            .is_err());
        assert!(settings
            .apply_overrides(&["MODEL.NUM_CLASSES".to_string(), "abc".to_string()])
            .is_err());
    }

    #[test]
    fn settings_load_from_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "weights: checkpoints/model_final.onnx\nnum_classes: 133\ndevice_id: 1"
        )
        .unwrap();

        let settings = ModelSettings::load(file.path()).unwrap();
        assert_eq!(settings.num_classes, 133);
        assert_eq!(settings.device_id, 1);
        // defaulted field
        assert_eq!(settings.input_size, 640);
    }
}
