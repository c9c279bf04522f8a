use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Names accepted by [`DetectorConfig::apply_override`] and [`DetectorConfig::get`].
pub const OPTION_NAMES: [&str; 8] = [
    "model_path",
    "anchors_path",
    "classes_path",
    "score",
    "iou",
    "model_image_size",
    "gpu_num",
    "topology_dir",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unrecognized option name '{0}'")]
    UnknownOption(String),
    #[error("override must be written as key=value, got '{0}'")]
    MalformedOverride(String),
    #[error("invalid value '{value}' for option '{name}'")]
    InvalidValue { name: String, value: String },
    #[error("{name} must be within [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f32 },
    #[error("multiples of 32 required for the model input size, got {width}x{height}")]
    NotMultipleOf32 { width: u32, height: u32 },
    #[error("gpu_num must be at least 1")]
    NoDevices,
    #[error("anchor file {} is empty", .0.display())]
    EmptyAnchors(PathBuf),
    #[error("invalid anchor value '{0}'")]
    InvalidAnchor(String),
    #[error("anchor values must come in (width, height) pairs, got {0} values")]
    OddAnchorCount(usize),
    #[error("class file {} lists no classes", .0.display())]
    NoClasses(PathBuf),
}

/// Network input resolution. `FromImage` crops every image down to the nearest
/// multiple of 32 instead of letterboxing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "InputSizeRepr", into = "InputSizeRepr")]
pub enum InputSize {
    Fixed { width: u32, height: u32 },
    FromImage,
}

/// TOML form: `[height, width]` or `"auto"` / `"HxW"`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum InputSizeRepr {
    Pair([u32; 2]),
    Text(String),
}

impl InputSize {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            InputSize::Fixed { width, height }
                if width == 0 || height == 0 || width % 32 != 0 || height % 32 != 0 =>
            {
                Err(ConfigError::NotMultipleOf32 { width, height })
            }
            _ => Ok(()),
        }
    }
}

impl FromStr for InputSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidValue {
            name: "model_image_size".to_string(),
            value: s.to_string(),
        };

        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") || s.eq_ignore_ascii_case("none") {
            return Ok(InputSize::FromImage);
        }

        let (h, w) = s.split_once(['x', 'X', ',']).ok_or_else(invalid)?;
        let height = h.trim().parse().map_err(|_| invalid())?;
        let width = w.trim().parse().map_err(|_| invalid())?;
        Ok(InputSize::Fixed { width, height })
    }
}

impl fmt::Display for InputSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSize::Fixed { width, height } => write!(f, "{height}x{width}"),
            InputSize::FromImage => f.write_str("auto"),
        }
    }
}

impl TryFrom<InputSizeRepr> for InputSize {
    type Error = ConfigError;

    fn try_from(repr: InputSizeRepr) -> Result<Self, Self::Error> {
        match repr {
            InputSizeRepr::Pair([height, width]) => Ok(InputSize::Fixed { width, height }),
            InputSizeRepr::Text(text) => text.parse(),
        }
    }
}

impl From<InputSize> for InputSizeRepr {
    fn from(size: InputSize) -> Self {
        match size {
            InputSize::Fixed { width, height } => InputSizeRepr::Pair([height, width]),
            InputSize::FromImage => InputSizeRepr::Text("auto".to_string()),
        }
    }
}

fn default_model_path() -> PathBuf {
    PathBuf::from("model_data/yolo.onnx")
}

fn default_anchors_path() -> PathBuf {
    PathBuf::from("model_data/yolo_anchors.txt")
}

fn default_classes_path() -> PathBuf {
    PathBuf::from("model_data/coco_classes.txt")
}

fn default_score() -> f32 {
    0.3
}

fn default_iou() -> f32 {
    0.45
}

fn default_model_image_size() -> InputSize {
    InputSize::Fixed {
        width: 416,
        height: 416,
    }
}

fn default_gpu_num() -> usize {
    1
}

fn default_topology_dir() -> PathBuf {
    PathBuf::from("model_data/topology")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorConfig {
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_anchors_path")]
    pub anchors_path: PathBuf,
    #[serde(default = "default_classes_path")]
    pub classes_path: PathBuf,
    #[serde(default = "default_score")]
    pub score: f32,
    #[serde(default = "default_iou")]
    pub iou: f32,
    #[serde(default = "default_model_image_size")]
    pub model_image_size: InputSize,
    #[serde(default = "default_gpu_num")]
    pub gpu_num: usize,
    /// Directory holding the weightless topology graphs used when the model path
    /// is a raw weights file.
    #[serde(default = "default_topology_dir")]
    pub topology_dir: PathBuf,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            anchors_path: default_anchors_path(),
            classes_path: default_classes_path(),
            score: default_score(),
            iou: default_iou(),
            model_image_size: default_model_image_size(),
            gpu_num: default_gpu_num(),
            topology_dir: default_topology_dir(),
        }
    }
}

impl DetectorConfig {
    /// Applies `name=value` overrides on top of `self` and validates the result.
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in overrides {
            self.apply_override(name.as_ref(), value.as_ref())?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn apply_override(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        };

        match name {
            "model_path" => self.model_path = PathBuf::from(value),
            "anchors_path" => self.anchors_path = PathBuf::from(value),
            "classes_path" => self.classes_path = PathBuf::from(value),
            "score" => self.score = value.parse().map_err(|_| invalid())?,
            "iou" => self.iou = value.parse().map_err(|_| invalid())?,
            "model_image_size" => self.model_image_size = value.parse()?,
            "gpu_num" => self.gpu_num = value.parse().map_err(|_| invalid())?,
            "topology_dir" => self.topology_dir = PathBuf::from(value),
            _ => return Err(ConfigError::UnknownOption(name.to_string())),
        }

        tracing::debug!(option = name, value, "applied config override");
        Ok(())
    }

    /// Current value of a named option, rendered as text.
    pub fn get(&self, name: &str) -> Result<String, ConfigError> {
        let value = match name {
            "model_path" => self.model_path.display().to_string(),
            "anchors_path" => self.anchors_path.display().to_string(),
            "classes_path" => self.classes_path.display().to_string(),
            "score" => self.score.to_string(),
            "iou" => self.iou.to_string(),
            "model_image_size" => self.model_image_size.to_string(),
            "gpu_num" => self.gpu_num.to_string(),
            "topology_dir" => self.topology_dir.display().to_string(),
            _ => return Err(ConfigError::UnknownOption(name.to_string())),
        };
        Ok(value)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.score) {
            return Err(ConfigError::ThresholdOutOfRange {
                name: "score",
                value: self.score,
            });
        }
        if !(0.0..=1.0).contains(&self.iou) {
            return Err(ConfigError::ThresholdOutOfRange {
                name: "iou",
                value: self.iou,
            });
        }
        if self.gpu_num == 0 {
            return Err(ConfigError::NoDevices);
        }
        self.model_image_size.validate()
    }
}

/// Splits a `key=value` command-line override.
pub fn parse_override(raw: &str) -> Result<(String, String), ConfigError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::MalformedOverride(raw.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigError::MalformedOverride(raw.to_string()));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

fn default_display() -> bool {
    true
}

fn default_window_name() -> String {
    "result".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    #[serde(default = "default_display")]
    pub display: bool,
    #[serde(default = "default_window_name")]
    pub window_name: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            display: default_display(),
            window_name: default_window_name(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

impl Config {
    /// Loads `config.toml` from the working directory, falling back to defaults
    /// when it does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from(DEFAULT_CONFIG_PATH)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.detector.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DetectorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.score, 0.3);
        assert_eq!(config.iou, 0.45);
        assert_eq!(
            config.model_image_size,
            InputSize::Fixed {
                width: 416,
                height: 416
            }
        );
    }

    #[test]
    fn test_unknown_override_is_rejected() {
        let err = DetectorConfig::default()
            .with_overrides([("scroe", "0.5")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOption(name) if name == "scroe"));
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = DetectorConfig::default()
            .with_overrides([
                ("score", "0.5"),
                ("model_image_size", "320x608"),
                ("gpu_num", "2"),
            ])
            .unwrap();
        assert_eq!(config.score, 0.5);
        assert_eq!(
            config.model_image_size,
            InputSize::Fixed {
                width: 608,
                height: 320
            }
        );
        assert_eq!(config.gpu_num, 2);
        assert_eq!(config.get("model_image_size").unwrap(), "320x608");
    }

    #[test]
    fn test_size_must_be_multiple_of_32() {
        let err = DetectorConfig::default()
            .with_overrides([("model_image_size", "416x400")])
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::NotMultipleOf32 {
                width: 400,
                height: 416
            }
        ));

        let config = DetectorConfig::default()
            .with_overrides([("model_image_size", "auto")])
            .unwrap();
        assert_eq!(config.model_image_size, InputSize::FromImage);
    }

    #[test]
    fn test_threshold_range() {
        assert!(matches!(
            DetectorConfig::default().with_overrides([("iou", "1.5")]),
            Err(ConfigError::ThresholdOutOfRange { name: "iou", .. })
        ));
        assert!(matches!(
            DetectorConfig::default().with_overrides([("score", "abc")]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_get_unknown_option() {
        let config = DetectorConfig::default();
        assert_eq!(config.get("iou").unwrap(), "0.45");
        assert!(matches!(
            config.get("colour"),
            Err(ConfigError::UnknownOption(_))
        ));
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(
            parse_override("score = 0.4").unwrap(),
            ("score".to_string(), "0.4".to_string())
        );
        assert!(parse_override("score").is_err());
        assert!(parse_override("=1").is_err());
    }

    #[test]
    fn test_toml_config() {
        let config: Config = toml::from_str(
            r#"
            [detector]
            score = 0.25
            model_image_size = [320, 320]

            [stream]
            display = false
            "#,
        )
        .unwrap();
        assert_eq!(config.detector.score, 0.25);
        assert_eq!(
            config.detector.model_image_size,
            InputSize::Fixed {
                width: 320,
                height: 320
            }
        );
        assert!(!config.stream.display);
        assert_eq!(config.stream.window_name, "result");

        let auto: Config = toml::from_str("[detector]\nmodel_image_size = \"auto\"\n").unwrap();
        assert_eq!(auto.detector.model_image_size, InputSize::FromImage);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(toml::from_str::<Config>("[detector]\nthreshold = 0.5\n").is_err());
    }

    #[test]
    fn test_expand_home() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(
            expand_home(Path::new("~/models/yolo.onnx")),
            PathBuf::from("/home/tester/models/yolo.onnx")
        );
        assert_eq!(
            expand_home(Path::new("model_data/yolo.onnx")),
            PathBuf::from("model_data/yolo.onnx")
        );
    }
}
