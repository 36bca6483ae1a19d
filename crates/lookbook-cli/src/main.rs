use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use lookbook_contracts::assets::{ImageAsset, SceneReferenceSet, TargetSet};
use lookbook_contracts::events::EventWriter;
use lookbook_contracts::records::{GenerationRecord, RecordStatus};
use lookbook_engine::{
    import_asset, mime_for_path, BatchRunner, DryrunClient, GeminiClient, GenerationClient,
    DEFAULT_MODEL,
};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "lookbook-rs", version, about = "Batch AI fashion photo generation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate four shots per garment across the scene references.
    Run(RunArgs),
    /// Re-export a saved record set as PNG files.
    Export(ExportArgs),
}

#[derive(Debug, Parser)]
struct RunArgs {
    /// Directory of scene reference images (background / pose).
    #[arg(long)]
    scenes: PathBuf,
    /// Directory of target garment images.
    #[arg(long)]
    garments: PathBuf,
    /// Output directory for generated shots and records.json.
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
    /// Events log path; defaults to `<out>/events.jsonl`.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Use the offline dryrun client instead of the Gemini API.
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    /// Path to a records.json written by `run`.
    #[arg(long)]
    records: PathBuf,
    #[arg(long)]
    out: PathBuf,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("lookbook-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_batch(args),
        Command::Export(args) => run_export(args),
    }
}

fn run_batch(args: RunArgs) -> Result<i32> {
    let scenes = SceneReferenceSet::new(import_directory(&args.scenes)?);
    let targets = TargetSet::new(import_directory(&args.garments)?);

    let client: Box<dyn GenerationClient> = if args.dryrun {
        Box::new(DryrunClient)
    } else {
        Box::new(GeminiClient::new(GeminiClient::api_key_from_env()?))
    };

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let batch_id = format!("batch-{}", Uuid::new_v4());
    let events = EventWriter::new(events_path, batch_id);
    println!(
        "Starting {}; events at {}",
        events.batch_id(),
        events.path().display()
    );

    let mut runner = BatchRunner::new(client, events, args.model);
    runner.run(&targets, &scenes)?;
    let records = runner.into_records();

    let records_path = args.out.join("records.json");
    fs::write(&records_path, serde_json::to_string_pretty(&records)?)
        .with_context(|| format!("failed to write {}", records_path.display()))?;
    let written = export_records(&records, &args.out)?;

    let mut completed = 0usize;
    for record in &records {
        match record.status {
            RecordStatus::Completed => {
                completed += 1;
                println!("{}: {} shots", record.target_label, record.images.len());
            }
            RecordStatus::Error => println!(
                "{}: failed ({})",
                record.target_label,
                record.error.as_deref().unwrap_or("unknown error")
            ),
            _ => println!("{}: not processed", record.target_label),
        }
    }
    println!(
        "Batch finished: {completed}/{} targets completed, {written} images written to {}",
        records.len(),
        args.out.display()
    );
    Ok(0)
}

fn run_export(args: ExportArgs) -> Result<i32> {
    let raw = fs::read_to_string(&args.records)
        .with_context(|| format!("failed to read {}", args.records.display()))?;
    let records: Vec<GenerationRecord> =
        serde_json::from_str(&raw).context("records.json is not a valid record set")?;

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let written = export_records(&records, &args.out)?;
    println!("Exported {written} images to {}", args.out.display());
    Ok(0)
}

/// Imports every supported image in a directory, in sorted filename
/// order so batch ordering is reproducible across runs.
fn import_directory(dir: &Path) -> Result<Vec<ImageAsset>> {
    let mut paths = image_files_in(dir)?;
    paths.sort();
    paths.iter().map(|path| Ok(import_asset(path)?)).collect()
}

fn image_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && mime_for_path(&path).is_some() {
            paths.push(path);
        }
    }
    Ok(paths)
}

/// Writes each completed record's outputs as
/// `{label}-shot-{n}.png` (1-based). Error and pending records carry
/// no exportable images.
fn export_records(records: &[GenerationRecord], out_dir: &Path) -> Result<usize> {
    let mut written = 0usize;
    for record in records {
        if record.status != RecordStatus::Completed {
            continue;
        }
        for (index, image) in record.images.iter().enumerate() {
            let bytes = BASE64.decode(image.as_bytes()).with_context(|| {
                format!(
                    "invalid image payload for {} shot {}",
                    record.target_label,
                    index + 1
                )
            })?;
            let path = out_dir.join(shot_filename(&record.target_label, index));
            fs::write(&path, bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            written += 1;
        }
    }
    Ok(written)
}

fn shot_filename(label: &str, image_index: usize) -> String {
    format!("{}-shot-{}.png", label, image_index + 1)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use lookbook_contracts::assets::ImageAsset;
    use lookbook_contracts::records::GenerationRecord;

    use super::{export_records, image_files_in, import_directory, shot_filename};

    #[test]
    fn shot_filenames_are_one_based() {
        assert_eq!(shot_filename("navy-cardigan", 0), "navy-cardigan-shot-1.png");
        assert_eq!(shot_filename("navy-cardigan", 3), "navy-cardigan-shot-4.png");
    }

    #[test]
    fn directory_import_filters_and_sorts() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("b-scene.png"), b"b")?;
        fs::write(temp.path().join("a-scene.jpg"), b"a")?;
        fs::write(temp.path().join("notes.txt"), b"skip me")?;

        let files = image_files_in(temp.path())?;
        assert_eq!(files.len(), 2);

        let assets = import_directory(temp.path())?;
        let labels: Vec<&str> = assets.iter().map(|asset| asset.label.as_str()).collect();
        assert_eq!(labels, vec!["a-scene", "b-scene"]);
        Ok(())
    }

    #[test]
    fn export_writes_only_completed_records() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let target = ImageAsset::new("cardigan", "/g/cardigan.png", "aGk=", "image/png");
        let failed_target = ImageAsset::new("pullover", "/g/pullover.png", "aGk=", "image/png");

        let mut completed = GenerationRecord::pending(&target);
        completed.begin();
        completed.complete(vec![
            BASE64.encode(b"shot-one"),
            BASE64.encode(b"shot-two"),
        ]);

        let mut failed = GenerationRecord::pending(&failed_target);
        failed.begin();
        failed.fail("Gemini returned status 500");

        let written = export_records(&[completed, failed], temp.path())?;
        assert_eq!(written, 2);
        assert_eq!(
            fs::read(temp.path().join("cardigan-shot-1.png"))?,
            b"shot-one"
        );
        assert_eq!(
            fs::read(temp.path().join("cardigan-shot-2.png"))?,
            b"shot-two"
        );
        assert!(!temp.path().join("pullover-shot-1.png").exists());
        Ok(())
    }
}
