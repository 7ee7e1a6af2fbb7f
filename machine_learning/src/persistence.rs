use std::{collections::HashMap, fs, path::Path};

use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{MlErr, Network, Result, arch::spec::ModelSpec};

const PARAMS: &str = "params";
const BUFFERS: &str = "buffers";
const SPEC: &str = "model_spec";
const INPUT_SHAPE: &str = "input_shape";

impl Network {
    /// Writes the network to a safetensors file: the parameters and buffers as tensors and the
    /// architecture and input shape as JSON in the header metadata.
    ///
    /// # Arguments
    /// * `path` - The file to write, its parent directories are created if missing.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let buffers = self.buffers();
        let mut tensors = vec![(PARAMS, f32_view(self.params())?)];
        if !buffers.is_empty() {
            tensors.push((BUFFERS, f32_view(&buffers)?));
        }

        let metadata = HashMap::from([
            (SPEC.to_string(), serde_json::to_string(self.spec())?),
            (INPUT_SHAPE.to_string(), serde_json::to_string(self.input_shape())?),
        ]);

        let bytes = safetensors::serialize(tensors, &Some(metadata))?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Reads a network written by `save`.
    ///
    /// # Arguments
    /// * `path` - The file to read.
    ///
    /// # Returns
    /// The network or an error if the file is missing, isn't a safetensors file or doesn't
    /// describe a consistent network.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;

        let (_, header) = SafeTensors::read_metadata(&bytes)?;
        let metadata = header
            .metadata()
            .as_ref()
            .ok_or_else(|| MlErr::Artifact("missing header metadata".into()))?;

        let spec: ModelSpec = serde_json::from_str(metadata_entry(metadata, SPEC)?)?;
        let input_shape: Vec<usize> = serde_json::from_str(metadata_entry(metadata, INPUT_SHAPE)?)?;

        let tensors = SafeTensors::deserialize(&bytes)?;
        let params = read_f32(&tensors, PARAMS)?
            .ok_or_else(|| MlErr::Artifact(format!("missing the `{PARAMS}` tensor")))?;
        let buffers = read_f32(&tensors, BUFFERS)?.unwrap_or_default();

        Network::from_parts(spec, input_shape, params, &buffers)
    }
}

fn f32_view(values: &[f32]) -> Result<TensorView<'_>> {
    Ok(TensorView::new(
        Dtype::F32,
        vec![values.len()],
        bytemuck::cast_slice(values),
    )?)
}

fn metadata_entry<'a>(metadata: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    metadata
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| MlErr::Artifact(format!("missing the `{key}` metadata entry")))
}

/// Reads an f32 tensor written by `f32_view`, `None` if there's no tensor with that name.
fn read_f32(tensors: &SafeTensors<'_>, name: &str) -> Result<Option<Vec<f32>>> {
    if !tensors.names().iter().any(|n| n.as_str() == name) {
        return Ok(None);
    }

    let tensor = tensors.tensor(name)?;
    if tensor.dtype() != Dtype::F32 {
        return Err(MlErr::Artifact(format!(
            "the `{name}` tensor should hold f32 values, it holds {:?}",
            tensor.dtype()
        )));
    }

    Ok(Some(bytemuck::pod_collect_to_vec(tensor.data())))
}

#[cfg(test)]
mod tests {
    use ndarray::Array4;
    use tempfile::tempdir;

    use super::*;
    use crate::arch::spec::{ActFnSpec, LayerSpec};

    fn small_spec() -> ModelSpec {
        ModelSpec::Sequential {
            layers: vec![
                LayerSpec::Conv {
                    in_channels: 1,
                    out_channels: 2,
                    kernel: [1, 3, 3],
                    act_fn: Some(ActFnSpec::Relu),
                },
                LayerSpec::BatchNorm {
                    channels: 2,
                    momentum: 0.9,
                    epsilon: 1e-3,
                },
                LayerSpec::GlobalAvgPool,
                LayerSpec::Dense {
                    dim: (2, 1),
                    act_fn: None,
                },
            ],
        }
    }

    #[test]
    fn save_then_load_predicts_the_same() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("model.safetensors");

        let mut network = Network::new(small_spec(), vec![4, 4, 1], Some(3)).unwrap();
        network
            .set_state(network.params().to_vec(), &[0.5, -0.5, 2., 3.])
            .unwrap();

        let x = Array4::from_shape_fn((3, 4, 4, 1), |(n, i, j, _)| (n + i * j) as f32 * 0.1)
            .into_dyn();
        let before = network.predict(x.clone()).unwrap();

        network.save(&path).unwrap();
        let mut loaded = Network::load(&path).unwrap();

        assert_eq!(loaded.spec(), network.spec());
        assert_eq!(loaded.input_shape(), &[4, 4, 1]);
        assert_eq!(loaded.params(), network.params());
        assert_eq!(loaded.buffers(), network.buffers());
        assert_eq!(loaded.predict(x).unwrap(), before);
    }

    #[test]
    fn f32_tensors_decode_to_what_was_written() {
        let values = [1.5, -0., f32::MAX, 1e-30, -7.25];
        let bytes = safetensors::serialize([(PARAMS, f32_view(&values).unwrap())], &None).unwrap();
        let tensors = SafeTensors::deserialize(&bytes).unwrap();

        assert_eq!(read_f32(&tensors, PARAMS).unwrap().unwrap(), values);
        assert!(read_f32(&tensors, BUFFERS).unwrap().is_none());
    }

    #[test]
    fn garbage_files_fail_to_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        fs::write(&path, b"definitely not a model").unwrap();

        assert!(Network::load(&path).is_err());
        assert!(Network::load(dir.path().join("missing.safetensors")).is_err());
    }
}
