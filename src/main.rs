use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::warn;

use savant::retrieval::RetrievalLimits;
use savant::{
    CacheConfig, ContinuousSource, DataSource, Dictionary, GenomicRange, IntervalSource, Resolution,
    RetrievalOutcome, SourceContext, TrackFile, TrackRetriever,
};

#[derive(Parser)]
#[command(name = "savant")]
#[command(about = "Inspect and query Savant track files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory of the persistent block cache
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Read remote sources without the block cache
    #[arg(long, global = true)]
    no_cache: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the header, references and index summary of a track
    Info { uri: String },

    /// Print the records of a track overlapping a range
    Query {
        uri: String,
        reference: String,
        /// First base (1-based, inclusive)
        from: u64,
        /// Last base (inclusive)
        to: u64,
        /// Always read the finest resolution level
        #[arg(long)]
        finest: bool,
        /// Abandon the query once this many records are held
        #[arg(long)]
        max_records: Option<usize>,
    },

    /// Look up a name in the dictionary side file of a track
    Lookup {
        uri: String,
        /// Name to look up; a trailing `*` matches by prefix
        key: String,
    },
}

fn context(cli: &Cli) -> SourceContext {
    let builder = SourceContext::builder();
    if cli.no_cache {
        return builder.no_cache().build();
    }
    match &cli.cache_dir {
        Some(dir) => {
            let block_size = CacheConfig::from_env().get_block_size();
            builder
                .cache(CacheConfig::new(dir).block_size(block_size))
                .build()
        }
        None => builder.build(),
    }
}

fn info(uri: &str, ctx: &SourceContext) -> Result<()> {
    let track = TrackFile::open(uri, ctx)?;
    let header = *track.header();
    let file_type = track.file_type();
    println!("uri\t{uri}");
    println!("version\t{}", header.version);
    println!("type\t{file_type:?}");
    if file_type.is_continuous() {
        println!("record_size\t{}", header.record_size);
    }

    if file_type.is_continuous() {
        let source = ContinuousSource::from_track(track, ctx.clone())?;
        for name in source.references() {
            let resolutions: Vec<String> = source
                .levels(name)
                .map(|index| index.levels().iter().map(|l| l.resolution.to_string()).collect())
                .unwrap_or_default();
            println!("{name}\tlevels={}", resolutions.join(","));
        }
    } else {
        let source = IntervalSource::from_track(track, ctx.clone())?;
        for name in source.references() {
            let (nodes, intervals) = source
                .tree(name)
                .map_or((0, 0), |tree| (tree.len(), tree.total_intervals()));
            println!("{name}\tnodes={nodes}\tintervals={intervals}");
        }
    }
    Ok(())
}

/// Runs one request through a retriever and prints each record
fn run<S, F>(
    source: S,
    limits: RetrievalLimits,
    query: (&str, GenomicRange, Resolution),
    print: F,
) -> Result<()>
where
    S: DataSource + 'static,
    F: Fn(&S::Record),
{
    let (reference, range, resolution) = query;
    let retriever = TrackRetriever::new(source).with_limits(limits);
    let outcome = retriever.request(reference, range, resolution).join();
    retriever.close()?;
    match outcome {
        RetrievalOutcome::Completed(records) => {
            records.iter().for_each(print);
            Ok(())
        }
        RetrievalOutcome::Cancelled(reason) => {
            warn!("query {reference}:{range} stopped: {reason}");
            Ok(())
        }
        RetrievalOutcome::Failed(e) => Err(e).context(format!("query {reference}:{range} failed")),
    }
}

fn query(
    uri: &str,
    ctx: &SourceContext,
    reference: &str,
    range: GenomicRange,
    resolution: Resolution,
    limits: RetrievalLimits,
) -> Result<()> {
    let track = TrackFile::open(uri, ctx)?;
    if track.file_type().is_continuous() {
        let source = ContinuousSource::from_track(track, ctx.clone())?;
        run(source, limits, (reference, range, resolution), |record| {
            println!("{}\t{}\t{}", record.reference, record.position, record.value);
        })
    } else {
        let source = IntervalSource::from_track(track, ctx.clone())?;
        let reference_name = reference.to_string();
        run(source, limits, (reference, range, resolution), move |record| {
            println!(
                "{reference_name}\t{}\t{}\t{}",
                record.start,
                record.end,
                record.name()
            );
        })
    }
}

fn lookup(uri: &str, ctx: &SourceContext, key: &str) -> Result<()> {
    let dictionary = Dictionary::load_for_track(uri, ctx)?
        .with_context(|| format!("no dictionary found for {uri}"))?;
    for bookmark in dictionary.lookup(key) {
        match &bookmark.label {
            Some(label) => println!("{}:{}\t{label}", bookmark.reference, bookmark.range),
            None => println!("{}:{}", bookmark.reference, bookmark.range),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let ctx = context(&cli);

    match &cli.command {
        Commands::Info { uri } => info(uri, &ctx),
        Commands::Query {
            uri,
            reference,
            from,
            to,
            finest,
            max_records,
        } => {
            let range = GenomicRange::new(*from, *to)?;
            let resolution = if *finest {
                Resolution::Finest
            } else {
                Resolution::Auto
            };
            let limits = RetrievalLimits {
                max_records: *max_records,
            };
            query(uri, &ctx, reference, range, resolution, limits)
        }
        Commands::Lookup { uri, key } => lookup(uri, &ctx, key),
    }
}
