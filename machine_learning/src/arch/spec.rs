use serde::{Deserialize, Serialize};

/// The specification for the `ActFn` enum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActFnSpec {
    Relu,
}

/// The specification for the `Layer` enum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerSpec {
    Conv {
        in_channels: usize,
        out_channels: usize,
        kernel: [usize; 3],
        act_fn: Option<ActFnSpec>,
    },
    MaxPool {
        window: [usize; 3],
    },
    BatchNorm {
        channels: usize,
        momentum: f32,
        epsilon: f32,
    },
    Dropout {
        rate: f32,
    },
    GlobalAvgPool,
    Dense {
        dim: (usize, usize),
        act_fn: Option<ActFnSpec>,
    },
}

/// The specification for the `Model` trait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSpec {
    Sequential { layers: Vec<LayerSpec> },
}
