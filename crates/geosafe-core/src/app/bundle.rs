//! ReportBundler - レポートのダウンロード
//!
//! - map / table: 保存済み PDF をそのまま返す
//! - reports: 両方の PDF を zip にまとめる
//! - all: さらに impact layer の生ファイルを含める（名前はレイヤー名 → タイトル）
//!
//! zip は一時ファイル上で組み立て、成功・失敗に関わらず必ず削除される。

use std::fmt;
use std::io::{Read, Seek, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::domain::analysis::AnalysisRecord;
use crate::domain::artifact::ReportKind;
use crate::domain::errors::GeosafeError;
use crate::domain::ids::AnalysisId;
use crate::domain::layer::LayerRecord;
use crate::ports::{AnalysisStore, ArtifactStore, LayerStore};

pub const PDF: &str = "application/pdf";
pub const ZIP: &str = "application/zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    Map,
    Table,
    Reports,
    All,
}

impl BundleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BundleKind::Map => "map",
            BundleKind::Table => "table",
            BundleKind::Reports => "reports",
            BundleKind::All => "all",
        }
    }
}

impl fmt::Display for BundleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BundleKind {
    type Err = GeosafeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "map" => Ok(BundleKind::Map),
            "table" => Ok(BundleKind::Table),
            "reports" => Ok(BundleKind::Reports),
            "all" => Ok(BundleKind::All),
            other => Err(GeosafeError::InvalidRequest(format!(
                "unknown bundle kind '{other}', expected map, table, reports or all"
            ))),
        }
    }
}

/// A download ready to be streamed to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

enum Entry {
    Bytes(Vec<u8>),
    File(PathBuf),
}

pub struct ReportBundler {
    analyses: Arc<dyn AnalysisStore>,
    layers: Arc<dyn LayerStore>,
    artifacts: Arc<dyn ArtifactStore>,
    scratch_dir: Option<PathBuf>,
}

impl ReportBundler {
    pub fn new(
        analyses: Arc<dyn AnalysisStore>,
        layers: Arc<dyn LayerStore>,
        artifacts: Arc<dyn ArtifactStore>,
        scratch_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            analyses,
            layers,
            artifacts,
            scratch_dir,
        }
    }

    #[instrument(skip(self), fields(analysis_id = %id, kind = %kind))]
    pub async fn bundle(&self, id: AnalysisId, kind: BundleKind) -> Result<Bundle, GeosafeError> {
        let record = self
            .analyses
            .get(&id)
            .await?
            .ok_or(GeosafeError::AnalysisNotFound(id))?;
        let layer = self.impact_layer(&record).await?;
        let title = layer.title.clone();

        let bundle = match kind {
            BundleKind::Map => Bundle {
                filename: format!("{title}_map.pdf"),
                content_type: PDF,
                bytes: self.report_bytes(&record, ReportKind::Map).await?,
            },
            BundleKind::Table => Bundle {
                filename: format!("{title}_table.pdf"),
                content_type: PDF,
                bytes: self.report_bytes(&record, ReportKind::Table).await?,
            },
            BundleKind::Reports | BundleKind::All => {
                let mut entries = vec![
                    (
                        format!("{title}_map.pdf"),
                        Entry::Bytes(self.report_bytes(&record, ReportKind::Map).await?),
                    ),
                    (
                        format!("{title}_table.pdf"),
                        Entry::Bytes(self.report_bytes(&record, ReportKind::Table).await?),
                    ),
                ];
                let suffix = if kind == BundleKind::All {
                    entries.extend(layer_entries(&layer));
                    "download"
                } else {
                    "reports"
                };
                Bundle {
                    filename: format!("{title}_{suffix}.zip"),
                    content_type: ZIP,
                    bytes: self.archive(entries).await?,
                }
            }
        };

        debug!(filename = %bundle.filename, size = bundle.bytes.len(), "bundle ready");
        Ok(bundle)
    }

    async fn impact_layer(&self, record: &AnalysisRecord) -> Result<LayerRecord, GeosafeError> {
        let layer_id = record.impact_layer_id.ok_or_else(|| {
            GeosafeError::MissingArtifact(format!("analysis {} has no impact layer", record.id))
        })?;
        self.layers
            .get_layer(&layer_id)
            .await?
            .ok_or_else(|| GeosafeError::MissingArtifact(format!("impact layer {layer_id}")))
    }

    async fn report_bytes(
        &self,
        record: &AnalysisRecord,
        kind: ReportKind,
    ) -> Result<Vec<u8>, GeosafeError> {
        let artifact = record.report(kind).ok_or_else(|| {
            GeosafeError::MissingArtifact(format!("analysis {} has no {kind} report", record.id))
        })?;
        Ok(self.artifacts.read(artifact).await?)
    }

    /// Build the zip in a scoped temporary file and return its bytes.
    async fn archive(&self, entries: Vec<(String, Entry)>) -> Result<Vec<u8>, GeosafeError> {
        let scratch_dir = self.scratch_dir.clone();
        tokio::task::spawn_blocking(move || {
            let mut builder = tempfile::Builder::new();
            builder.prefix("geosafe-bundle-").suffix(".zip");
            let mut scratch = match &scratch_dir {
                Some(dir) => builder.tempfile_in(dir),
                None => builder.tempfile(),
            }
            .map_err(|e| GeosafeError::Storage(format!("cannot create bundle scratch file: {e}")))?;

            write_zip(scratch.as_file_mut(), entries)?;

            let file = scratch.as_file_mut();
            let mut bytes = Vec::new();
            file.rewind()
                .and_then(|_| file.read_to_end(&mut bytes))
                .map_err(|e| GeosafeError::Storage(format!("cannot read bundle: {e}")))?;
            Ok(bytes)
            // scratch はここで削除される
        })
        .await
        .map_err(|e| GeosafeError::Storage(format!("bundle task failed: {e}")))?
    }
}

/// Raw files of the impact layer, renamed from the layer name to its title.
fn layer_entries(layer: &LayerRecord) -> Vec<(String, Entry)> {
    layer
        .files
        .iter()
        .map(|path| {
            let base = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = if layer.name.is_empty() {
                base
            } else {
                base.replace(&layer.name, &layer.title)
            };
            (name, Entry::File(path.clone()))
        })
        .collect()
}

fn write_zip<W: Write + Seek>(sink: W, entries: Vec<(String, Entry)>) -> Result<(), GeosafeError> {
    let storage = |e: zip::result::ZipError| GeosafeError::Storage(format!("zip: {e}"));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = zip::ZipWriter::new(sink);

    for (name, entry) in entries {
        zip.start_file(name, options).map_err(storage)?;
        match entry {
            Entry::Bytes(bytes) => zip
                .write_all(&bytes)
                .map_err(|e| GeosafeError::Storage(format!("zip entry: {e}")))?,
            Entry::File(path) => {
                let mut file = std::fs::File::open(&path).map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => {
                        GeosafeError::MissingArtifact(format!("layer file {}", path.display()))
                    }
                    _ => GeosafeError::Storage(format!("{}: {e}", path.display())),
                })?;
                std::io::copy(&mut file, &mut zip)
                    .map_err(|e| GeosafeError::Storage(format!("zip entry: {e}")))?;
            }
        }
    }

    zip.finish().map_err(storage)?;
    Ok(())
}
