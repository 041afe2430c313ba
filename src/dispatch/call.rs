//! Typed deferred logging calls
//!
//! A [`LogCall`] captures everything a logging operation needs at submission
//! time. It is `Serialize` so the same value can be handed to a thread or
//! shipped to a worker process.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::TrackingBackend;
use crate::experiment::{content_hash_bytes, MetricRecord};
use crate::{Error, Result};

/// One logging operation against a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogCall {
    /// Record a scalar metric at a step.
    Metric {
        /// Metric key
        key: String,
        /// Metric value (NaN and the infinities are allowed)
        #[serde(with = "crate::experiment::metric_value")]
        value: f64,
        /// Step / epoch
        step: u64,
    },
    /// Copy a local file into the run's artifacts.
    ///
    /// The file keeps its name and lands under `artifact_path` (a directory
    /// inside the artifact root) when one is given.
    Artifact {
        /// File to copy
        local_path: PathBuf,
        /// Destination directory inside the artifact root
        artifact_path: Option<String>,
    },
    /// Encode an image and store it as `artifact_file`.
    Image {
        /// Destination file inside the artifact root
        artifact_file: String,
        /// Raw pixels
        image: ImageData,
    },
    /// Store a serialized model under the `artifact_path` directory.
    Model {
        /// Destination directory inside the artifact root
        artifact_path: String,
        /// Producer of the payload (e.g. "npz", "safetensors")
        flavor: String,
        /// Serialized model bytes
        payload: Vec<u8>,
    },
}

impl LogCall {
    /// Record a metric.
    #[must_use]
    pub fn metric(key: impl Into<String>, value: f64, step: u64) -> Self {
        Self::Metric {
            key: key.into(),
            value,
            step,
        }
    }

    /// Copy a file to the artifact root.
    #[must_use]
    pub fn artifact(local_path: impl Into<PathBuf>) -> Self {
        Self::Artifact {
            local_path: local_path.into(),
            artifact_path: None,
        }
    }

    /// Copy a file into a directory of the artifact root.
    #[must_use]
    pub fn artifact_in(local_path: impl Into<PathBuf>, artifact_path: impl Into<String>) -> Self {
        Self::Artifact {
            local_path: local_path.into(),
            artifact_path: Some(artifact_path.into()),
        }
    }

    /// Store an image.
    #[must_use]
    pub fn image(artifact_file: impl Into<String>, image: ImageData) -> Self {
        Self::Image {
            artifact_file: artifact_file.into(),
            image,
        }
    }

    /// Store a model payload.
    #[must_use]
    pub fn model(
        artifact_path: impl Into<String>,
        flavor: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self::Model {
            artifact_path: artifact_path.into(),
            flavor: flavor.into(),
            payload,
        }
    }

    /// Short operation name for logs and failure reports.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Metric { .. } => "metric",
            Self::Artifact { .. } => "artifact",
            Self::Image { .. } => "image",
            Self::Model { .. } => "model",
        }
    }

    /// Run the call against `backend` for `run_id`, blocking until done.
    ///
    /// # Errors
    ///
    /// Returns whatever the backend or the local filesystem reports.
    pub fn execute(&self, backend: &dyn TrackingBackend, run_id: &str) -> Result<()> {
        match self {
            Self::Metric { key, value, step } => {
                backend.log_metric(MetricRecord::new(run_id, key.as_str(), *step, *value))
            }
            Self::Artifact {
                local_path,
                artifact_path,
            } => {
                if !local_path.is_file() {
                    return Err(Error::Storage(format!(
                        "artifact source {} is not a readable file",
                        local_path.display()
                    )));
                }
                let target = artifact_target(local_path, artifact_path.as_deref())?;
                backend.log_artifact_file(run_id, local_path, &target)?;
                Ok(())
            }
            Self::Image {
                artifact_file,
                image,
            } => {
                backend.log_artifact_bytes(run_id, artifact_file, &image.encode_netpbm()?)?;
                Ok(())
            }
            Self::Model {
                artifact_path,
                flavor,
                payload,
            } => {
                let base = artifact_path.trim_end_matches('/');
                let stored =
                    backend.log_artifact_bytes(run_id, &format!("{base}/model.bin"), payload)?;
                let meta = serde_json::json!({
                    "flavor": flavor,
                    "size_bytes": stored.size_bytes(),
                    "content_hash": content_hash_bytes(payload),
                });
                backend.log_artifact_bytes(
                    run_id,
                    &format!("{base}/model.json"),
                    &serde_json::to_vec_pretty(&meta)?,
                )?;
                Ok(())
            }
        }
    }
}

fn artifact_target(local_path: &Path, artifact_path: Option<&str>) -> Result<String> {
    let file_name = local_path
        .file_name()
        .ok_or_else(|| Error::Storage(format!("{} has no file name", local_path.display())))?
        .to_string_lossy();
    Ok(match artifact_path {
        Some(dir) => format!("{}/{file_name}", dir.trim_end_matches('/')),
        None => file_name.into_owned(),
    })
}

/// Raw 8-bit image, row-major, interleaved channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    width: u32,
    height: u32,
    channels: u8,
    pixels: Vec<u8>,
}

impl ImageData {
    /// Wrap a pixel buffer.
    ///
    /// # Errors
    ///
    /// Returns an error unless `channels` is 1 (gray) or 3 (RGB) and the
    /// buffer holds exactly `width * height * channels` bytes.
    pub fn new(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Result<Self> {
        let image = Self {
            width,
            height,
            channels,
            pixels,
        };
        image.validate()?;
        Ok(image)
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Channels per pixel.
    #[must_use]
    pub const fn channels(&self) -> u8 {
        self.channels
    }

    fn validate(&self) -> Result<()> {
        if self.channels != 1 && self.channels != 3 {
            return Err(Error::Storage(format!(
                "unsupported channel count {} (expected 1 or 3)",
                self.channels
            )));
        }
        let expected = u64::from(self.width) * u64::from(self.height) * u64::from(self.channels);
        if expected != self.pixels.len() as u64 {
            return Err(Error::Storage(format!(
                "image buffer holds {} bytes, {}x{}x{} needs {expected}",
                self.pixels.len(),
                self.width,
                self.height,
                self.channels
            )));
        }
        Ok(())
    }

    /// Binary PGM (gray) or PPM (RGB) encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is inconsistent (possible after
    /// deserializing an unchecked value).
    pub fn encode_netpbm(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let magic = if self.channels == 1 { "P5" } else { "P6" };
        let header = format!("{magic}\n{} {}\n255\n", self.width, self.height);
        let mut out = Vec::with_capacity(header.len() + self.pixels.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.pixels);
        Ok(out)
    }
}
