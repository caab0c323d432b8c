//! geosafe: in-memory demonstration of the analysis lifecycle.
//!
//! Seeds a hazard and an exposure layer, submits an analysis, lets the scripted
//! broker finish it, downloads the requested bundle and purges non-kept work.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use geosafe_core::app::{AppBuilder, BundleKind};
use geosafe_core::config::Settings;
use geosafe_core::domain::{
    AnalysisRequest, BBox, JobOutcome, JobOutput, LayerId, LayerMetadata, LayerPurpose,
    LayerRecord, TaskState,
};
use geosafe_core::impls::{InMemoryAnalysisStore, InMemoryLayerStore, ScriptedBroker, StaticFunctionService};
use geosafe_core::observability::AnalysisCounts;
use geosafe_core::ports::ImpactFunction;

#[derive(Parser)]
#[command(name = "geosafe")]
#[command(about = "Run one GeoSAFE analysis end to end against in-memory adapters")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "geosafe.toml", env = "GEOSAFE_CONFIG")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    /// Restrict candidate layers to this extent, "x0,y0,x1,y1" or "[x0, y0, x1, y1]"
    #[arg(long)]
    bbox: Option<String>,

    /// Bundle to download: map, table, reports or all
    #[arg(long, default_value = "reports")]
    bundle: String,

    /// Directory the bundle is written to
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// Keep the analysis instead of purging it at the end
    #[arg(long)]
    keep: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let settings = Settings::load_from(&cli.config)?;
    let bundle_kind: BundleKind = cli.bundle.parse()?;
    let bbox = cli.bbox.as_deref().map(str::parse::<BBox>).transpose()?;

    let workdir = settings
        .scratch_dir
        .clone()
        .unwrap_or_else(std::env::temp_dir)
        .join("geosafe-demo");
    tokio::fs::create_dir_all(&workdir).await?;

    let layers = Arc::new(InMemoryLayerStore::new());
    let hazard = LayerRecord::new(
        LayerId::random(),
        "jakarta_flood_2013",
        "Jakarta Flood 2013",
        BBox::new(106.6, -6.4, 107.0, -6.0),
        LayerMetadata::new(LayerPurpose::Hazard, Some("flood")),
    );
    let exposure = LayerRecord::new(
        LayerId::random(),
        "jakarta_buildings",
        "Jakarta Buildings",
        // 取り込み時に y 軸が反転したレイヤー
        BBox::new(106.5, -5.9, 107.1, -6.5),
        LayerMetadata::new(LayerPurpose::Exposure, Some("structure")),
    );
    let (hazard_id, exposure_id) = (hazard.id, exposure.id);
    layers.insert(hazard);
    layers.insert(exposure);

    let broker = Arc::new(ScriptedBroker::new());
    let functions = Arc::new(StaticFunctionService::new(vec![ImpactFunction::new(
        "FloodPolygonBuildingFunction",
        "Polygon flood on buildings",
    )]));
    let analyses = Arc::new(InMemoryAnalysisStore::new());

    let app = AppBuilder::new(settings)
        .layers(layers.clone())
        .analyses(analyses.clone())
        .broker(broker.clone())
        .functions(functions)
        .build()?;

    let panel = app.filter.options_panel(bbox).await?;
    for section in &panel.sections {
        for option in section.categories.iter().filter(|c| c.count > 0) {
            info!(
                purpose = %section.purpose.as_str(),
                category = option.category.as_deref().unwrap_or("-"),
                count = option.count,
                filtered = option.filtered,
                "candidate layers"
            );
        }
    }

    let catalog = app.catalog.list(None, None).await?;
    let Some(function) = catalog.first() else {
        anyhow::bail!("impact function catalog is empty");
    };

    let request = AnalysisRequest::new(hazard_id, exposure_id, function.id.clone()).keep(cli.keep);
    let record = app.lifecycle.submit(request).await?;
    info!(analysis_id = %record.id, title = %record.title, "analysis submitted");

    let Some(handle) = broker.last_handle() else {
        anyhow::bail!("broker did not receive the submission");
    };
    broker.start(&handle);
    let status = app.lifecycle.status(record.id).await?;
    info!(state = %status.state, label = status.label.as_str(), "analysis observed");

    // worker の代わりに impact layer とレポートを用意する
    let layer_file = workdir.join(format!("impact_{}.geojson", record.id));
    tokio::fs::write(&layer_file, br#"{"type":"FeatureCollection","features":[]}"#).await?;
    let impact = LayerRecord::new(
        LayerId::random(),
        format!("impact_{}", record.id),
        format!("impact_{}", record.id),
        BBox::new(106.6, -6.4, 107.0, -6.0),
        LayerMetadata::new(LayerPurpose::Impact, None),
    )
    .with_files(vec![layer_file]);
    let impact_id = impact.id;
    layers.insert(impact);

    let map_pdf = workdir.join("map.pdf");
    let table_pdf = workdir.join("table.pdf");
    tokio::fs::write(&map_pdf, b"%PDF-1.4 map").await?;
    tokio::fs::write(&table_pdf, b"%PDF-1.4 table").await?;
    broker.complete(
        &handle,
        JobOutcome::Success(
            JobOutput::new(impact_id)
                .with_reports(&map_pdf, &table_pdf)
                .with_summary("0 buildings affected"),
        ),
    );

    let status = app.lifecycle.status(record.id).await?;
    info!(state = %status.state, label = status.label.as_str(), "analysis observed");
    if status.state != TaskState::Success {
        warn!(analysis_id = %record.id, "analysis did not succeed, skipping download");
        return Ok(());
    }

    let bundle = app.bundler.bundle(record.id, bundle_kind).await?;
    tokio::fs::create_dir_all(&cli.out).await?;
    let target = cli.out.join(&bundle.filename);
    tokio::fs::write(&target, &bundle.bytes).await?;
    info!(
        path = %target.display(),
        content_type = bundle.content_type,
        size = bundle.bytes.len(),
        "bundle written"
    );

    let counts = AnalysisCounts::tally(&app.lifecycle.list().await?);
    println!("{}", serde_json::to_string_pretty(&counts)?);

    let purged = app.lifecycle.purge_unkept().await?;
    info!(
        analyses = purged.deleted_analyses.len(),
        layers = purged.deleted_layers.len(),
        "purged non-kept analyses"
    );

    Ok(())
}
