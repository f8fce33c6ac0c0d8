use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use glyphcast::atlas::{GlyphAtlas, DEFAULT_RAMP};
use glyphcast::cache::{DEFAULT_CACHE_DEPTH, DEFAULT_CACHE_THRESHOLD};
use glyphcast::decode::{self, FfmpegSource};
use glyphcast::encode::FfmpegSink;
use glyphcast::frame::FrameGeometry;
use glyphcast::gpu::{GpuBackend, GpuContext};
use glyphcast::kernel::{CpuBackend, RenderBackend};
use glyphcast::merge::merge_audio;
use glyphcast::pipeline::{run_pipeline, CacheOptions};

#[derive(Debug, Parser)]
#[command(name = "glyphcast")]
#[command(about = "GPU glyph-art video transcoder")]
#[command(version = version_string())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert a video into a colorized glyph rendition, keeping its audio.
    Convert {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = 8)]
        char_width: u32,
        #[arg(long, default_value_t = 12)]
        char_height: u32,
        /// Character ramp, darkest to brightest.
        #[arg(long, default_value = DEFAULT_RAMP)]
        ramp: String,
        /// Frames rendered per device dispatch.
        #[arg(long, default_value_t = 1)]
        batch_size: usize,
        /// Disable the temporal frame-diff cache.
        #[arg(long)]
        no_cache: bool,
        #[arg(long, default_value_t = DEFAULT_CACHE_DEPTH)]
        cache_depth: usize,
        /// Mean per-cell luminance difference (0-255) below which a frame
        /// counts as unchanged.
        #[arg(long, default_value_t = DEFAULT_CACHE_THRESHOLD)]
        cache_threshold: f32,
        /// Render on the CPU instead of the GPU.
        #[arg(long)]
        software: bool,
        /// Preferred monospace font file.
        #[arg(long)]
        font: Option<PathBuf>,
        /// Skip the audio re-mux step.
        #[arg(long)]
        no_audio: bool,
    },
    /// Print the geometry and frame rate of the first video stream.
    Probe { input: PathBuf },
}

fn version_string() -> String {
    match option_env!("GLYPHCAST_GIT_HASH") {
        Some(hash) => format!("{} ({hash})", env!("CARGO_PKG_VERSION")),
        None => env!("CARGO_PKG_VERSION").to_owned(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            input,
            output,
            char_width,
            char_height,
            ramp,
            batch_size,
            no_cache,
            cache_depth,
            cache_threshold,
            software,
            font,
            no_audio,
        } => run_convert(ConvertArgs {
            input,
            output,
            char_width,
            char_height,
            ramp,
            batch_size,
            no_cache,
            cache_depth,
            cache_threshold,
            software,
            font,
            no_audio,
        }),
        Commands::Probe { input } => run_probe(&input),
    }
}

struct ConvertArgs {
    input: PathBuf,
    output: PathBuf,
    char_width: u32,
    char_height: u32,
    ramp: String,
    batch_size: usize,
    no_cache: bool,
    cache_depth: usize,
    cache_threshold: f32,
    software: bool,
    font: Option<PathBuf>,
    no_audio: bool,
}

fn run_probe(input: &Path) -> Result<()> {
    let info = decode::probe(input)?;
    println!(
        "OK: {} ({}x{}, {:.3} fps)",
        input.display(),
        info.width,
        info.height,
        info.fps
    );
    Ok(())
}

fn run_convert(args: ConvertArgs) -> Result<()> {
    let info = decode::probe(&args.input)?;
    let geometry = FrameGeometry::new(info.width, info.height, args.char_width, args.char_height)?;
    let atlas = GlyphAtlas::build(
        &args.ramp,
        args.char_width,
        args.char_height,
        args.font.as_deref(),
    )?;

    let mut backend: Box<dyn RenderBackend> = if args.software {
        Box::new(CpuBackend::new(atlas.clone(), geometry))
    } else {
        let context = pollster::block_on(GpuContext::new())?;
        eprintln!("using device: {}", context.adapter_name);
        Box::new(GpuBackend::new(context, &atlas, geometry, args.batch_size)?)
    };

    let cache = (!args.no_cache).then_some(CacheOptions {
        depth: args.cache_depth,
        threshold: args.cache_threshold,
    });

    // Sink before source: an unopenable output must fail before any decode
    // or compute work begins.
    let mut sink = FfmpegSink::spawn(
        &args.output,
        geometry.out_width(),
        geometry.out_height(),
        info.fps,
    )?;
    let mut source = FfmpegSource::spawn(&args.input, &info)?;

    let run_result = run_pipeline(
        &mut source,
        &mut sink,
        backend.as_mut(),
        &geometry,
        args.batch_size,
        cache,
    );

    // Always close the sink so frames written before any failure survive on
    // disk; the run error still wins if both went wrong.
    use glyphcast::encode::VideoSink;
    let source_result = source.finish();
    let sink_result = sink.finish();
    let stats = run_result?;
    source_result?;
    sink_result?;

    println!(
        "Processed {} frames in {:.3}s ({} rendered, {} reused, {} dispatches)",
        stats.frames,
        stats.elapsed.as_secs_f64(),
        stats.rendered,
        stats.reused,
        stats.dispatches
    );
    println!(
        "Average per-frame: {:.5}s",
        stats.avg_frame_time().as_secs_f64()
    );

    if !args.no_audio {
        match merge_audio(&args.output, &args.input) {
            Ok(()) => println!("Merged original audio track"),
            Err(error) => eprintln!(
                "warning: audio merge failed, silent video kept at '{}': {error:#}",
                args.output.display()
            ),
        }
    }

    println!("Wrote {}", args.output.display());
    Ok(())
}
