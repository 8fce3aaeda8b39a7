use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fxlet_engine::effects::{self, NoiseGenerator};
use fxlet_engine::offline;
use fxlet_engine::bridge::WET_SPEC;
use fxlet_engine::{
    AudioContext, ContextOptions, EffectDescriptor, EffectNode, Engine, EngineConfig, NodeOptions, ScopeRegistry,
};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "fxlet", version, about = "Bit crusher, feedback delay and noise nodes on a real-time renderer")]
struct Cli {
    /// -v for debug, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List audio devices
    Devices,
    /// Print the built-in processor scope source
    Scope {
        #[arg(long)]
        debug: bool,
    },
    /// List the parameters an effect accepts
    Params {
        #[arg(value_enum)]
        effect: EffectKind,
    },
    /// Render a test tone through one effect into a WAV file
    Render {
        #[command(flatten)]
        effect: EffectArgs,
        #[arg(long, default_value_t = 2.0)]
        seconds: f32,
        #[arg(long, default_value_t = 48_000)]
        sample_rate: u32,
        #[arg(long, default_value_t = 2)]
        channels: u16,
        #[arg(long)]
        out: PathBuf,
    },
    /// Play through one effect on an output device
    Play {
        #[command(flatten)]
        effect: EffectArgs,
        #[arg(long, default_value_t = 5.0)]
        seconds: f32,
        /// TOML engine config; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        output: Option<String>,
        /// Process the input device instead of an internal pink noise source
        #[arg(long)]
        duplex: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
enum EffectKind {
    Bitcrusher,
    Delay,
    Noise,
}

impl EffectKind {
    fn descriptor(self) -> &'static EffectDescriptor {
        match self {
            EffectKind::Bitcrusher => &effects::BIT_CRUSHER,
            EffectKind::Delay => &effects::DELAY,
            EffectKind::Noise => &effects::NOISE_GENERATOR,
        }
    }
}

/// One line per parameter, `wet` last for crossfaded effects.
fn param_lines(desc: &EffectDescriptor) -> Vec<String> {
    let mut lines: Vec<String> = desc.params.iter().map(ToString::to_string).collect();
    if desc.crossfade {
        lines.push(WET_SPEC.to_string());
    }
    lines
}

#[derive(Args, Debug)]
struct EffectArgs {
    #[arg(long, value_enum, default_value_t = EffectKind::Bitcrusher)]
    effect: EffectKind,
    #[arg(long)]
    bits: Option<f32>,
    #[arg(long)]
    delay_time: Option<f32>,
    #[arg(long)]
    feedback: Option<f32>,
    /// 0 white, 1 pink, 2 brown, 3 digital
    #[arg(long)]
    noise_type: Option<f32>,
    #[arg(long)]
    amplitude: Option<f32>,
    #[arg(long, default_value_t = 1.0)]
    wet: f32,
    /// Test tone frequency for `render`
    #[arg(long, default_value_t = 440.0)]
    freq: f32,
    #[arg(long)]
    seed: Option<u64>,
}

impl EffectArgs {
    fn options(&self) -> NodeOptions {
        let given = [
            ("bits", self.bits),
            ("delayTime", self.delay_time),
            ("feedback", self.feedback),
            ("noiseType", self.noise_type),
            ("amplitude", self.amplitude),
        ];
        let desc = self.descriptor();
        let mut opts = NodeOptions::new().wet(self.wet).autostart(self.effect == EffectKind::Noise);
        for (name, value) in given {
            let Some(value) = value else { continue };
            if desc.param(name).is_some() {
                opts = opts.param(name, value);
            } else {
                let known = param_lines(desc).join("; ");
                warn!("--{} does not apply to {:?} ({known}); ignored", name, self.effect);
            }
        }
        if let Some(seed) = self.seed {
            opts = opts.seed(seed);
        }
        opts
    }

    fn descriptor(&self) -> &'static EffectDescriptor { self.effect.descriptor() }

    /// Build the node, route it to the output and wait until it is live.
    fn build(&self, ctx: &AudioContext) -> Result<EffectNode> {
        let node = EffectNode::new(ctx, self.descriptor(), self.options())?;
        node.to_destination();
        node.ready().wait().context("effect failed to initialise")?;
        node.on_processor_error(|e| eprintln!("{e}"));
        Ok(node)
    }

    fn source(&self, sample_rate: f32) -> Box<dyn FnMut(usize) -> f32> {
        match self.effect {
            EffectKind::Noise => Box::new(|_| 0.0),
            _ => Box::new(offline::sine(self.freq, sample_rate, 0.8)),
        }
    }
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn render(args: &EffectArgs, seconds: f32, sample_rate: u32, channels: u16, out: &Path, debug: bool) -> Result<()> {
    let opts = ContextOptions { sample_rate: sample_rate as f32, channels: channels as usize, debug };
    let (ctx, mut renderer) = AudioContext::new(opts, Arc::new(ScopeRegistry::builtin()));
    let node = args.build(&ctx)?;

    let frames = (seconds * sample_rate as f32).round() as usize;
    let samples = offline::render(&mut renderer, frames, args.source(sample_rate as f32));
    offline::write_wav(out, &samples, channels, sample_rate)?;

    node.dispose();
    ctx.collect_garbage();
    info!(frames, path = %out.display(), "rendered");
    Ok(())
}

fn play(args: &EffectArgs, seconds: f32, cfg: EngineConfig) -> Result<()> {
    let duplex = cfg.duplex;
    let mut engine = Engine::open(cfg)?;
    let (ctx, renderer) = AudioContext::new(engine.context_options(), Arc::new(ScopeRegistry::builtin()));

    let node = args.build(&ctx)?;
    let _source = if !duplex && args.effect != EffectKind::Noise {
        let pink = NodeOptions::new().autostart(true).param("noiseType", 1.0).param("amplitude", 0.3);
        let source = NoiseGenerator::new(&ctx, pink)?;
        source.connect(&node);
        source.ready().wait().context("noise source failed to initialise")?;
        Some(source)
    } else {
        None
    };

    engine.start(renderer)?;
    let until = Instant::now() + Duration::from_secs_f32(seconds.max(0.0));
    while Instant::now() < until {
        std::thread::sleep(Duration::from_millis(100));
        ctx.collect_garbage();
    }
    engine.stop();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.cmd {
        Command::Devices => fxlet_engine::devices::print_devices()?,
        Command::Scope { debug } => println!("{}", ScopeRegistry::builtin().global_scope_source(debug)),
        Command::Params { effect } => {
            for line in param_lines(effect.descriptor()) {
                println!("{line}");
            }
        }
        Command::Render { effect, seconds, sample_rate, channels, out } => {
            render(&effect, seconds, sample_rate, channels, &out, cli.verbose > 0)?
        }
        Command::Play { effect, seconds, config, output, duplex } => {
            let mut cfg = match config {
                Some(path) => load_config(&path)?,
                None => EngineConfig::default(),
            };
            if output.is_some() {
                cfg.output_name = output;
            }
            cfg.duplex |= duplex;
            cfg.debug_scope |= cli.verbose > 0;
            play(&effect, seconds, cfg)?
        }
    }
    Ok(())
}
