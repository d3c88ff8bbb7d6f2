use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use palaver::config::DEFAULT_RESOLVER_MODEL;
use palaver::stages::Stage2Result;
use palaver::usage::USAGE_LOG_FILE;
use palaver::{
    AnthropicClient, AnthropicConfig, AudioSource, BatchConfig, BatchScheduler, CacheStore,
    Diarizer, ExportFormat, HttpDiarizer, HttpDiarizerConfig, PipelineConfig, PipelineContext,
    Pricing, RttmDiarizer, SpeakerNameResolver, SpeakerQualityAnalyzer, Stage, StageRunner,
    Service, Transcriber, TranscriptionParams, UsageLog, WhisperClient, WhisperConfig,
    execute_stage1, execute_stage2, execute_stage3, load_stage1_document, load_stage2_document,
};

#[derive(Parser)]
#[command(name = "palaver")]
#[command(author, version, about = "Meeting transcription with speaker-name resolution", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Debug, Clone)]
struct PipelineArgs {
    /// Directory for intermediate documents and exports
    #[arg(short, long, default_value = "outputs")]
    output_dir: PathBuf,

    /// Transcription model
    #[arg(long, default_value = "whisper-1")]
    transcription_model: String,

    /// Language hint for transcription (ISO code)
    #[arg(long)]
    language: Option<String>,

    /// Transcription sampling temperature
    #[arg(long, default_value = "0.0")]
    temperature: f64,

    /// Model used to resolve speaker names
    #[arg(long, env = "PALAVER_RESOLVER_MODEL", default_value = DEFAULT_RESOLVER_MODEL)]
    resolver_model: String,

    /// Meeting description passed to the resolver (e.g. "Interview with Dana")
    #[arg(long)]
    speaker_context: Option<String>,

    /// Skip speaker-name resolution and export diarization labels
    #[arg(long)]
    no_speakers: bool,

    /// Export formats, comma separated (txt, json, srt, md)
    #[arg(long, value_delimiter = ',', default_value = "txt,json,srt")]
    formats: Vec<ExportFormat>,

    /// Ignore and do not write cached intermediates
    #[arg(long)]
    no_cache: bool,

    /// Directory holding `<stem>.rttm` diarization files (default: next to the audio)
    #[arg(long)]
    rttm_dir: Option<PathBuf>,

    /// Hosted diarization endpoint; uses HUGGING_FACE_TOKEN
    #[arg(long, env = "PALAVER_DIARIZATION_URL")]
    diarization_url: Option<String>,
}

impl PipelineArgs {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            output_dir: self.output_dir.clone(),
            transcription: TranscriptionParams {
                model: self.transcription_model.clone(),
                language: self.language.clone(),
                temperature: self.temperature,
            },
            resolver_model: self.resolver_model.clone(),
            speaker_context: self.speaker_context.clone(),
            identify_speakers: !self.no_speakers,
            formats: self.formats.clone(),
            use_cache: !self.no_cache,
            ..Default::default()
        }
    }

    fn diarizer(&self) -> Result<Arc<dyn Diarizer>> {
        Ok(match &self.diarization_url {
            Some(url) => Arc::new(HttpDiarizer::new(
                HttpDiarizerConfig::from_env(url.clone())
                    .context("Failed to configure diarization service")?,
            )),
            None => Arc::new(RttmDiarizer::new(self.rttm_dir.clone())),
        })
    }

    fn transcriber(&self) -> Result<Arc<dyn Transcriber>> {
        let config = WhisperConfig::from_env().context("Failed to configure transcription")?;
        Ok(Arc::new(WhisperClient::new(config)))
    }

    fn resolver(&self, config: &PipelineConfig) -> Result<Option<Arc<dyn SpeakerNameResolver>>> {
        if !config.identify_speakers {
            return Ok(None);
        }
        let mut api = AnthropicConfig::from_env().context("Failed to configure speaker resolver")?;
        api.model = config.resolver_model.clone();
        Ok(Some(Arc::new(AnthropicClient::new(api, config.analysis.clone()))))
    }

    /// Context that also appends every external call to the output dir's usage log
    fn context(&self) -> PipelineContext {
        PipelineContext::new().with_usage_log(UsageLog::in_dir(&self.output_dir))
    }

    fn runner(&self, ctx: PipelineContext) -> Result<StageRunner> {
        let config = self.pipeline_config();
        let resolver = self.resolver(&config)?;
        Ok(StageRunner::new(
            config,
            self.diarizer()?,
            self.transcriber()?,
            resolver,
            ctx,
        ))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run all three stages for one audio file
    Process {
        /// Input audio file
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Stage 1 only: transcribe and diarize one audio file
    Stage1 {
        /// Input audio file
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Stage 2 only: resolve speaker names for a Stage-1 document
    Stage2 {
        /// Stage-1 transcript document
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Stage 3 only: export a Stage-1 document, with names when a mapping exists
    Stage3 {
        /// Stage-1 transcript document
        #[arg(short, long)]
        input: PathBuf,

        /// Stage-2 mapping document (default: the cached one for this transcript)
        #[arg(long)]
        mapping: Option<PathBuf>,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Run the full pipeline over every audio file in a directory
    Batch {
        /// Directory of audio files
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Worker count (default: half the available cores, at most 8)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Per-file timeout in seconds
        #[arg(long, default_value = "300")]
        timeout_secs: u64,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Print the pre-analysis report for a Stage-1 document
    Analyze {
        /// Stage-1 transcript document
        #[arg(short, long)]
        input: PathBuf,

        /// Meeting description, as passed to Stage 2
        #[arg(long)]
        speaker_context: Option<String>,
    },

    /// Summarize the persistent log of external calls and their cost
    Usage {
        /// Output directory holding usage_log.jsonl
        #[arg(short, long, default_value = "outputs")]
        dir: PathBuf,
    },

    /// List cached Stage-1 and Stage-2 documents
    ListIntermediate {
        /// Directory to inspect
        #[arg(short, long, default_value = "outputs")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Process { input, pipeline } => process_file(input, pipeline).await,
        Commands::Stage1 { input, pipeline } => run_stage1(input, pipeline).await,
        Commands::Stage2 { input, pipeline } => run_stage2(input, pipeline).await,
        Commands::Stage3 {
            input,
            mapping,
            pipeline,
        } => run_stage3(input, mapping, pipeline),
        Commands::Batch {
            input_dir,
            workers,
            timeout_secs,
            pipeline,
        } => run_batch(input_dir, workers, timeout_secs, pipeline).await,
        Commands::Analyze {
            input,
            speaker_context,
        } => analyze_transcript(input, speaker_context),
        Commands::Usage { dir } => show_usage(dir),
        Commands::ListIntermediate { dir } => list_intermediate(dir),
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

async fn process_file(input: PathBuf, pipeline: PipelineArgs) -> Result<()> {
    let ctx = pipeline.context();
    let runner = pipeline.runner(ctx.clone())?;

    let report = runner
        .run_file(&input)
        .await
        .with_context(|| format!("Failed to process {:?}", input))?;

    println!("Processed {} ({})", report.audio_file.display(), report.state);
    println!(
        "Stage 1 cached: {}  Stage 2 cached: {}  Refined: {}  Corrections: {}",
        report.stage1_cached, report.stage2_cached, report.refined, report.corrections
    );
    if report.degraded {
        println!("Speaker resolution unavailable; generic labels exported");
    }
    if !report.ambiguous_labels.is_empty() {
        println!("Ambiguous speakers: {}", report.ambiguous_labels.join(", "));
    }
    for path in &report.exports.written {
        println!("  {}", path.display());
    }
    for failure in &report.exports.failures {
        println!("  {} export failed: {}", failure.format, failure.message);
    }
    print_usage(&ctx);
    Ok(())
}

async fn run_stage1(input: PathBuf, pipeline: PipelineArgs) -> Result<()> {
    let ctx = pipeline.context();
    let config = pipeline.pipeline_config();
    let source = AudioSource::from_path(&input).context("Invalid audio file")?;
    let store = CacheStore::new(&config.output_dir);

    let result = execute_stage1(
        &source,
        &config.transcription,
        pipeline.diarizer()?.as_ref(),
        pipeline.transcriber()?.as_ref(),
        Some(&store),
        &ctx,
    )
    .await
    .context("Stage 1 failed")?;

    println!(
        "{} segments, {} speaker labels{}",
        result.artifact.segments.len(),
        result.artifact.speaker_label_count,
        if result.cached { " (cached)" } else { "" }
    );
    if let Some(path) = result.cache_path {
        println!("Saved: {}", path.display());
    }
    print_usage(&ctx);
    Ok(())
}

async fn run_stage2(input: PathBuf, pipeline: PipelineArgs) -> Result<()> {
    let ctx = pipeline.context();
    let config = pipeline.pipeline_config();
    let artifact = load_stage1_document(&input)
        .with_context(|| format!("Failed to read Stage-1 document {:?}", input))?;
    let resolver = pipeline
        .resolver(&config)?
        .context("Speaker resolution disabled (--no-speakers)")?;
    let store = CacheStore::new(&config.output_dir);

    let Stage2Result {
        mapping,
        cached,
        cache_path,
    } = execute_stage2(&artifact, &config, resolver.as_ref(), Some(&store), &ctx)
        .await
        .context("Stage 2 failed")?;

    println!(
        "{} meeting, quality {:.2}, {} resolver call(s){}",
        mapping.meeting_type,
        mapping.quality_score,
        mapping.resolver_metadata.calls,
        if cached { " (cached)" } else { "" }
    );
    for label in artifact.speaker_labels() {
        let ambiguous = if mapping.ambiguous_labels.contains(&label) {
            " (ambiguous)"
        } else {
            ""
        };
        println!("  {} -> {}{}", label, mapping.display_name(&label), ambiguous);
    }
    for note in &mapping.validation_notes {
        println!("  correction: {}", note.message);
    }
    if let Some(path) = cache_path {
        println!("Saved: {}", path.display());
    }
    print_usage(&ctx);
    Ok(())
}

fn run_stage3(input: PathBuf, mapping: Option<PathBuf>, pipeline: PipelineArgs) -> Result<()> {
    let config = pipeline.pipeline_config();
    let artifact = load_stage1_document(&input)
        .with_context(|| format!("Failed to read Stage-1 document {:?}", input))?;

    let mapping_path = mapping.or_else(|| {
        let cached = CacheStore::new(&config.output_dir)
            .path_for(Stage::SpeakerMapping, &artifact.base_name());
        cached.exists().then_some(cached)
    });
    let mapping = match mapping_path {
        Some(path) if config.identify_speakers => Some(
            load_stage2_document(&path)
                .with_context(|| format!("Failed to read Stage-2 document {:?}", path))?,
        ),
        _ => None,
    };

    let bundle = execute_stage3(&artifact, mapping.as_ref(), &config.formats, &config.output_dir)
        .context("Stage 3 failed")?;
    for path in &bundle.written {
        println!("Created: {}", path.display());
    }
    for failure in &bundle.failures {
        println!("{} export failed: {}", failure.format, failure.message);
    }
    Ok(())
}

async fn run_batch(
    input_dir: PathBuf,
    workers: Option<usize>,
    timeout_secs: u64,
    pipeline: PipelineArgs,
) -> Result<()> {
    let ctx = pipeline.context();
    let runner = Arc::new(pipeline.runner(ctx)?);
    let batch_config = BatchConfig {
        workers,
        per_file_timeout: Duration::from_secs(timeout_secs),
        ..Default::default()
    };

    let scheduler = BatchScheduler::new(runner, batch_config);
    let run = scheduler
        .run_directory(&input_dir)
        .await
        .with_context(|| format!("Failed to read input directory {:?}", input_dir))?;

    let report_path = pipeline.output_dir.join("batch_report.json");
    run.write_report(&report_path)
        .context("Failed to write batch report")?;

    println!("{}", run.render_summary(&Pricing::default()));
    println!("Report: {}", report_path.display());
    Ok(())
}

fn analyze_transcript(input: PathBuf, speaker_context: Option<String>) -> Result<()> {
    info!("Analyzing transcript from {:?}", input);
    let artifact = load_stage1_document(&input)
        .with_context(|| format!("Failed to read Stage-1 document {:?}", input))?;
    let analyzer = SpeakerQualityAnalyzer::default();
    let (context, report) = analyzer.analyze(&artifact, speaker_context.as_deref());

    println!("Transcript Analysis");
    println!("===================");
    println!("File: {}", artifact.file_name());
    println!("Segments: {}", artifact.segments.len());
    println!("Speaker labels: {}", report.speaker_count);
    println!("Meeting type: {}", report.meeting_type);
    println!("Pre-analysis score: {:.2}", report.quality_score);
    if !context.context_hint.is_empty() {
        println!("Context hint: {}", context.context_hint);
    }
    println!();

    println!("Names");
    println!("-----");
    for (label, names) in &context.self_introductions {
        let names: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
        println!("{} introduced: {}", label, names.join(", "));
    }
    println!("Candidates: {}", join_names(&context.candidate_names));
    println!("Mentioned only: {}", join_names(&context.mentioned_only_names));
    println!();

    println!("Speaker Statistics");
    println!("------------------");
    for (label, volume) in artifact.text_volume_by_label() {
        let turns = artifact.segments.iter().filter(|s| s.speaker == label).count();
        println!("{}: {} segments, {} characters", label, turns, volume);
    }

    if !report.issues.is_empty() {
        println!();
        println!("Issues");
        println!("------");
        for issue in &report.issues {
            println!("- {}", issue);
        }
    }
    Ok(())
}

fn join_names<'a>(names: impl IntoIterator<Item = &'a String>) -> String {
    let names: Vec<&str> = names.into_iter().map(|n| n.as_str()).collect();
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}

fn show_usage(dir: PathBuf) -> Result<()> {
    let path = dir.join(USAGE_LOG_FILE);
    let records = UsageLog::read(&path).with_context(|| format!("Failed to read {:?}", path))?;
    if records.is_empty() {
        println!("No usage recorded in {}", path.display());
        return Ok(());
    }

    let mut by_service: BTreeMap<Service, (usize, usize, f64)> = BTreeMap::new();
    for record in &records {
        let entry = by_service.entry(record.service).or_default();
        entry.0 += 1;
        if !record.success {
            entry.1 += 1;
        }
        entry.2 += record.cost_usd;
    }
    let files: BTreeSet<&str> = records.iter().map(|r| r.audio_file.as_str()).collect();

    println!("Usage Log");
    println!("=========");
    println!("Records: {} across {} file(s)", records.len(), files.len());
    if let (Some(first), Some(last)) = (records.first(), records.last()) {
        println!("From {} to {}", first.timestamp, last.timestamp);
    }
    println!();
    for (service, (calls, failed, cost)) in &by_service {
        println!("{}: {} call(s), {} failed, ${:.4}", service, calls, failed, cost);
    }
    let total: f64 = records.iter().map(|r| r.cost_usd).sum();
    println!("Total estimated cost: ${:.4}", total);
    Ok(())
}

fn list_intermediate(dir: PathBuf) -> Result<()> {
    let (stage1, stage2) = CacheStore::new(&dir)
        .list()
        .with_context(|| format!("Failed to list {:?}", dir))?;

    println!("Stage 1 transcripts ({}):", stage1.len());
    for path in &stage1 {
        println!("  {}", display_name(path));
    }
    println!("Stage 2 speaker mappings ({}):", stage2.len());
    for path in &stage2 {
        println!("  {}", display_name(path));
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_usage(ctx: &PipelineContext) {
    let usage = ctx.usage.snapshot();
    println!(
        "External calls: {}  Cache hits: {}  Estimated cost: ${:.4}",
        usage.external_calls(),
        usage.cache_hits,
        usage.estimated_cost_usd(&Pricing::default())
    );
}
