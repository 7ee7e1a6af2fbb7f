use std::{collections::HashMap, fs, path::Path};

use csv::{ReaderBuilder, Trim, WriterBuilder};
use log::warn;

use crate::error::Result;

/// Reads a headerless `filename,score` file.
///
/// Rows that don't have exactly two fields or whose score isn't a number are
/// skipped with a warning. A filename listed twice keeps its last score.
///
/// # Arguments
/// * `path` - The labels file.
///
/// # Returns
/// A map from file name to score.
pub fn read_labels(path: &Path) -> Result<HashMap<String, f32>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)?;

    let mut labels = HashMap::new();
    for (row, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("skipping row {row} of {}: {e}", path.display());
                continue;
            }
        };

        let (Some(name), Some(score), None) = (record.get(0), record.get(1), record.get(2)) else {
            warn!(
                "skipping row {row} of {}: expected 2 fields, got {}",
                path.display(),
                record.len()
            );
            continue;
        };

        match score.parse::<f32>() {
            Ok(score) if score.is_finite() => {
                labels.insert(name.to_string(), score);
            }
            _ => warn!("skipping row {row} of {}: bad score {score:?}", path.display()),
        }
    }

    Ok(labels)
}

/// Writes `filename,score` rows with one decimal, creating parent directories.
///
/// # Arguments
/// * `path` - The labels file to create.
/// * `labels` - The rows to write, in order.
pub fn write_labels<'a, I>(path: &Path, labels: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a str, f32)>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
    for (name, score) in labels {
        let score = format!("{score:.1}");
        writer.write_record([name, score.as_str()])?;
    }
    writer.flush()?;

    Ok(())
}
