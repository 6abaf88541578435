//! End-to-end conversion of one input into a named output artifact.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::format::{InputFormat, OutputFormat};
use crate::source::assemble::OverlapPolicy;
use crate::source::{DatabaseSource, ImageSource};
use crate::writer::{OmeZarrWriter, WriterConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    /// Directory that receives a copy of the output.
    pub alt_output: Option<PathBuf>,
    #[serde(skip)]
    pub format: OutputFormat,
    /// Writer settings; `writer.format` is replaced by `format`.
    pub writer: WriterConfig,
    pub overlap_policy: OverlapPolicy,
    /// Resolution level to read; the finest level if unset.
    pub level: Option<i64>,
    /// Log experiment details and the well × timepoint matrix.
    pub verbose: bool,
}

/// Where a conversion wrote its output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub name: String,
    pub full_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_full_path: Option<String>,
}

/// Name of the output artifact: the directory holding the index file.
fn output_name(input: &Path) -> crate::Result<String> {
    input
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            crate::Error::configuration(format!(
                "cannot derive an output name from {}",
                input.display()
            ))
        })
}

fn remove_existing(path: &Path) -> crate::Result<()> {
    if path.is_dir() {
        log::info!("replacing existing {}", path.display());
        fs::remove_dir_all(path)?;
    } else if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Recursively copy the directory `from` to `to`.
pub fn copy_tree(from: &Path, to: &Path) -> crate::Result<()> {
    for entry in WalkDir::new(from).sort_by_file_name() {
        let entry = entry.map_err(crate::Error::wrap)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(crate::Error::wrap)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn log_experiment(source: &DatabaseSource) -> crate::Result<()> {
    let metadata = source.metadata()?;
    log::info!(
        "experiment:\n{}",
        serde_json::to_string_pretty(&metadata.experiment)?
    );
    log::info!(
        "plate geometry:\n{}",
        serde_json::to_string_pretty(&metadata.geometry)?
    );
    for (time_point, wells) in source.well_matrix()? {
        log::info!("timepoint {time_point}: {}", wells.join(" "));
    }
    Ok(())
}

/// Convert `input` into `output_dir`, replacing any previous output of the same name.
///
/// The format selection is validated before anything is read or written.
pub fn convert(
    input: &Path,
    output_dir: &Path,
    options: &ConvertOptions,
) -> crate::Result<ConversionResult> {
    let zarr_format = match options.format {
        OutputFormat::OmeZarr(format) => format,
        OutputFormat::OmeTiff => {
            return Err(crate::Error::configuration(
                "tiled-pixel (ometiff) output is not supported by this converter",
            ));
        }
    };
    let writer = OmeZarrWriter::new(WriterConfig {
        format: zarr_format,
        ..options.writer.clone()
    })?;
    match InputFormat::detect(input)? {
        InputFormat::Database => {}
        other => {
            return Err(crate::Error::configuration(format!(
                "unsupported input format {other:?} for {}; expected an experiment .db file",
                input.display()
            )));
        }
    }

    let name = output_name(input)?;
    let file_name = format!("{name}{}", options.format.extension());
    fs::create_dir_all(output_dir)?;
    let output_path = output_dir.join(&file_name);

    log::info!("importing {}", input.display());
    let mut source = DatabaseSource::open(input)?.with_overlap_policy(options.overlap_policy);
    if let Some(level) = options.level {
        source = source.with_level(level);
    }
    source.init_metadata()?;
    if options.verbose {
        log_experiment(&source)?;
    }

    remove_existing(&output_path)?;
    writer.write(&output_path, &mut source)?;

    let mut result = ConversionResult {
        name,
        full_path: output_path.to_string_lossy().into_owned(),
        alt_full_path: None,
    };
    if let Some(alt_dir) = &options.alt_output {
        fs::create_dir_all(alt_dir)?;
        let alt_path = alt_dir.join(&file_name);
        remove_existing(&alt_path)?;
        copy_tree(&output_path, &alt_path)?;
        log::info!("exported {} and {}", output_path.display(), alt_path.display());
        result.alt_full_path = Some(alt_path.to_string_lossy().into_owned());
    } else {
        log::info!("exported {}", output_path.display());
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_named_after_the_experiment_directory() {
        let name = output_name(Path::new("/data/241209 plate/experiment.db")).unwrap();
        assert_eq!(name, "241209 plate");
        assert!(output_name(Path::new("experiment.db")).is_err());
    }

    #[test]
    fn tiff_output_fails_before_io() {
        let options = ConvertOptions {
            format: OutputFormat::OmeTiff,
            ..Default::default()
        };
        let missing = Path::new("/nonexistent/run/experiment.db");
        let result = convert(missing, Path::new("/nonexistent/out"), &options);
        assert!(matches!(result, Err(crate::Error::Configuration(_))));
    }

    #[test]
    fn copy_tree_mirrors_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.zarr");
        fs::create_dir_all(from.join("B/2/0")).unwrap();
        fs::write(from.join(".zgroup"), b"{}").unwrap();
        fs::write(from.join("B/2/0/.zarray"), b"[]").unwrap();
        let to = dir.path().join("copy.zarr");
        copy_tree(&from, &to).unwrap();
        assert_eq!(fs::read(to.join("B/2/0/.zarray")).unwrap(), b"[]");
        assert!(to.join(".zgroup").is_file());
    }

    #[test]
    fn result_omits_missing_alt_path() {
        let result = ConversionResult {
            name: "exp".into(),
            full_path: "/out/exp.ome.zarr".into(),
            alt_full_path: None,
        };
        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            r#"{"name":"exp","full_path":"/out/exp.ome.zarr"}"#
        );
    }
}
