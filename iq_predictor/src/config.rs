use std::{
    fmt::{self, Display},
    fs,
    path::Path,
    str::FromStr,
};

use preprocessing::TargetShape;
use serde::{Deserialize, Serialize};

use crate::error::{IqErr, Result};

/// Whether scans are handled as single images or as whole volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "2d")]
    Planar,
    #[serde(rename = "3d")]
    Volumetric,
}

impl ModelKind {
    /// Returns the channel-last input shape used when none is given.
    pub fn default_input_shape(&self) -> Vec<usize> {
        match self {
            ModelKind::Planar => vec![224, 224, 1],
            ModelKind::Volumetric => vec![128, 128, 128, 1],
        }
    }

    /// Returns the size of a convolution kernel as `[depth, height, width]`.
    pub fn kernel(&self) -> [usize; 3] {
        match self {
            ModelKind::Planar => [1, 3, 3],
            ModelKind::Volumetric => [3, 3, 3],
        }
    }

    /// Returns the max-pooling window as `[depth, height, width]`.
    pub fn pool_window(&self) -> [usize; 3] {
        match self {
            ModelKind::Planar => [1, 2, 2],
            ModelKind::Volumetric => [2, 2, 2],
        }
    }

    /// Checks that `input_shape` fits this kind and returns the matching
    /// preprocessing target.
    ///
    /// # Arguments
    /// * `input_shape` - `h,w,1` for planar models, `h,w,d,1` for volumetric ones.
    pub fn target_shape(&self, input_shape: &[usize]) -> Result<TargetShape> {
        let target = TargetShape::from_input_shape(input_shape)?;

        match (self, target) {
            (ModelKind::Planar, TargetShape::Planar { .. })
            | (ModelKind::Volumetric, TargetShape::Volumetric { .. }) => Ok(target),
            _ => Err(IqErr::InvalidConfig(format!(
                "input shape {input_shape:?} doesn't fit a {self} model"
            ))),
        }
    }
}

impl Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Planar => write!(f, "2d"),
            ModelKind::Volumetric => write!(f, "3d"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "2d" => Ok(ModelKind::Planar),
            "3d" => Ok(ModelKind::Volumetric),
            other => Err(format!("unknown model type {other:?}, expected 2d or 3d")),
        }
    }
}

/// Parses a comma separated shape such as `224,224,1`.
pub fn parse_shape(s: &str) -> std::result::Result<Vec<usize>, String> {
    s.split(',')
        .map(|dim| {
            dim.trim()
                .parse::<usize>()
                .map_err(|e| format!("bad dimension {dim:?}: {e}"))
        })
        .collect()
}

/// The tunable hyperparameters of the architectures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchConfig {
    /// Output channels of the pooled convolution blocks.
    pub conv_widths: Vec<usize>,
    /// Output channels of an extra unpooled convolution before global pooling.
    pub final_conv: Option<usize>,
    /// Widths of the hidden dense layers.
    pub dense_widths: Vec<usize>,
    pub dropout_rate: f32,
    pub learning_rate: f32,
    pub batch_norm_momentum: f32,
    pub batch_norm_epsilon: f32,
}

impl ArchConfig {
    /// Returns the stock configuration of a model kind.
    pub fn for_kind(kind: ModelKind) -> Self {
        Self {
            conv_widths: vec![32, 64, 128, 256],
            final_conv: match kind {
                ModelKind::Planar => Some(512),
                ModelKind::Volumetric => None,
            },
            dense_widths: vec![512, 256, 128],
            dropout_rate: 0.3,
            learning_rate: 1e-3,
            batch_norm_momentum: 0.99,
            batch_norm_epsilon: 1e-3,
        }
    }

    /// Reads a JSON object whose keys override the stock configuration of `kind`.
    ///
    /// # Arguments
    /// * `path` - The JSON file, e.g. `{"conv_widths": [16, 32], "dropout_rate": 0.2}`.
    /// * `kind` - The kind whose configuration is overridden.
    ///
    /// # Returns
    /// The validated configuration.
    pub fn from_json_file(path: &Path, kind: ModelKind) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let overrides: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&text)?;

        let mut merged = serde_json::to_value(Self::for_kind(kind))?;
        if let Some(fields) = merged.as_object_mut() {
            fields.extend(overrides);
        }

        let config: Self = serde_json::from_value(merged)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the ranges of the numeric fields.
    pub fn validate(&self) -> Result<()> {
        if self.conv_widths.contains(&0) || self.dense_widths.contains(&0) || self.final_conv == Some(0) {
            return Err(IqErr::InvalidConfig("layer widths must be positive".into()));
        }

        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(IqErr::InvalidConfig(format!(
                "the dropout rate should be in [0, 1), got {}",
                self.dropout_rate
            )));
        }

        if !(self.learning_rate > 0. && self.learning_rate.is_finite()) {
            return Err(IqErr::InvalidConfig(format!(
                "the learning rate should be positive, got {}",
                self.learning_rate
            )));
        }

        if !(0.0..1.0).contains(&self.batch_norm_momentum) || self.batch_norm_epsilon <= 0. {
            return Err(IqErr::InvalidConfig(
                "batch norm momentum should be in [0, 1) and epsilon positive".into(),
            ));
        }

        Ok(())
    }
}
