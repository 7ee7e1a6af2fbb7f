use machine_learning::arch::spec::{ActFnSpec, LayerSpec, ModelSpec};

use crate::{
    config::{ArchConfig, ModelKind},
    error::{IqErr, Result},
};

/// Builds the layer stack of an IQ regressor.
///
/// Every entry of `conv_widths` becomes a convolution, a max pooling and a
/// batch normalization. An optional final convolution and a global average
/// pooling follow, then a dropout plus a dense layer per `dense_widths`
/// entry and a single linear output.
///
/// # Arguments
/// * `kind` - Picks the kernel and pooling windows.
/// * `arch` - The widths and rates of the layers.
pub fn build_spec(kind: ModelKind, arch: &ArchConfig) -> ModelSpec {
    let mut layers = Vec::new();
    let mut channels = 1;

    for &width in &arch.conv_widths {
        layers.push(conv(kind, channels, width));
        layers.push(LayerSpec::MaxPool {
            window: kind.pool_window(),
        });
        layers.push(LayerSpec::BatchNorm {
            channels: width,
            momentum: arch.batch_norm_momentum,
            epsilon: arch.batch_norm_epsilon,
        });
        channels = width;
    }

    if let Some(width) = arch.final_conv {
        layers.push(conv(kind, channels, width));
        channels = width;
    }

    layers.push(LayerSpec::GlobalAvgPool);

    let mut features = channels;
    for &width in &arch.dense_widths {
        layers.push(LayerSpec::Dropout {
            rate: arch.dropout_rate,
        });
        layers.push(LayerSpec::Dense {
            dim: (features, width),
            act_fn: Some(ActFnSpec::Relu),
        });
        features = width;
    }

    layers.push(LayerSpec::Dense {
        dim: (features, 1),
        act_fn: None,
    });

    ModelSpec::Sequential { layers }
}

fn conv(kind: ModelKind, in_channels: usize, out_channels: usize) -> LayerSpec {
    LayerSpec::Conv {
        in_channels,
        out_channels,
        kernel: kind.kernel(),
        act_fn: Some(ActFnSpec::Relu),
    }
}

/// Checks that every pooled spatial axis of `input_shape` survives the
/// pooling blocks of `arch`.
pub fn validate_input_shape(kind: ModelKind, input_shape: &[usize], arch: &ArchConfig) -> Result<()> {
    kind.target_shape(input_shape)?;

    let pools = u32::try_from(arch.conv_widths.len()).unwrap_or(u32::MAX);
    let min_len = 2usize.checked_pow(pools).unwrap_or(usize::MAX);
    let spatial = &input_shape[..input_shape.len() - 1];

    if let Some(&len) = spatial.iter().find(|&&len| len < min_len) {
        return Err(IqErr::InvalidConfig(format!(
            "an axis of length {len} in {input_shape:?} can't go through {pools} pooling blocks, \
             every axis needs at least {min_len}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layers(spec: &ModelSpec) -> &[LayerSpec] {
        match spec {
            ModelSpec::Sequential { layers } => layers,
        }
    }

    #[test]
    fn planar_stack() {
        let spec = build_spec(ModelKind::Planar, &ArchConfig::for_kind(ModelKind::Planar));
        let layers = layers(&spec);

        // 4 conv blocks of 3, the final conv, the pooling, 3 dense blocks of 2 and the output
        assert_eq!(layers.len(), 4 * 3 + 1 + 1 + 3 * 2 + 1);
        assert_eq!(
            layers[0],
            LayerSpec::Conv {
                in_channels: 1,
                out_channels: 32,
                kernel: [1, 3, 3],
                act_fn: Some(ActFnSpec::Relu)
            }
        );
        assert_eq!(
            layers[12],
            LayerSpec::Conv {
                in_channels: 256,
                out_channels: 512,
                kernel: [1, 3, 3],
                act_fn: Some(ActFnSpec::Relu)
            }
        );
        assert_eq!(layers[13], LayerSpec::GlobalAvgPool);
        assert_eq!(
            layers[15],
            LayerSpec::Dense {
                dim: (512, 512),
                act_fn: Some(ActFnSpec::Relu)
            }
        );
        assert_eq!(
            layers.last(),
            Some(&LayerSpec::Dense {
                dim: (128, 1),
                act_fn: None
            })
        );
    }

    #[test]
    fn volumetric_stack_has_no_final_conv() {
        let spec = build_spec(
            ModelKind::Volumetric,
            &ArchConfig::for_kind(ModelKind::Volumetric),
        );
        let layers = layers(&spec);

        assert_eq!(layers[1], LayerSpec::MaxPool { window: [2, 2, 2] });
        assert_eq!(layers[12], LayerSpec::GlobalAvgPool);
        assert_eq!(
            layers[14],
            LayerSpec::Dense {
                dim: (256, 512),
                act_fn: Some(ActFnSpec::Relu)
            }
        );
    }

    #[test]
    fn input_shapes_must_survive_pooling() {
        let arch = ArchConfig::for_kind(ModelKind::Planar);

        assert!(validate_input_shape(ModelKind::Planar, &[224, 224, 1], &arch).is_ok());
        assert!(validate_input_shape(ModelKind::Planar, &[16, 16, 1], &arch).is_ok());
        assert!(validate_input_shape(ModelKind::Planar, &[8, 224, 1], &arch).is_err());
        assert!(validate_input_shape(ModelKind::Planar, &[224, 224, 3], &arch).is_err());
        assert!(validate_input_shape(ModelKind::Volumetric, &[224, 224, 1], &arch).is_err());
    }
}
