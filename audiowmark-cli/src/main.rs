use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use audiowmark_core::config::FRAME_SIZE;
use audiowmark_core::decode::expected_block_positions;
use audiowmark_core::payload::{bit_str_to_vec, bit_vec_to_str, parse_message};
use audiowmark_core::{
    db_from_factor, Config, DecodeResult, Error, Key, PatternKind, WavData, MARK_SAMPLE_RATE,
};

#[derive(Parser)]
#[command(name = "audiowmark", about = "Audio watermarking tool", version)]
struct Cli {
    /// Set watermark strength
    #[arg(long, global = true, value_name = "S", default_value_t = 10.0)]
    strength: f64,

    /// Disable non-linear bit storage
    #[arg(long, global = true)]
    linear: bool,

    /// Hard decode bits (soft decoding corrects more errors)
    #[arg(long, global = true)]
    hard: bool,

    /// Compute and show SNR while adding the watermark
    #[arg(long, global = true)]
    snr: bool,

    /// Load watermarking key from file
    #[arg(long, global = true, value_name = "FILE")]
    key: Option<PathBuf>,

    /// Derive the watermarking key from an integer (tests only)
    #[arg(long = "test-key", global = true, value_name = "N", hide = true)]
    test_key: Option<u64>,

    /// Offset expected sync positions by N samples (cut tests)
    #[arg(long = "test-cut", global = true, value_name = "N", hide = true, default_value_t = 0)]
    test_cut: i64,

    /// Skip the sync search, assume theoretical block positions
    #[arg(long = "test-no-sync", global = true, hide = true)]
    test_no_sync: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a watermarked wav file with a message
    Add {
        input: PathBuf,
        output: PathBuf,
        /// Message as hex digits (up to 128 bits)
        message: String,
    },
    /// Retrieve message
    Get { input: PathBuf },
    /// Compare watermark message with expected message
    Cmp {
        input: PathBuf,
        /// Expected message as hex digits
        message: String,
    },
    /// Generate a 128-bit watermarking key for the --key option
    GenKey { file: PathBuf },
    /// Copy the first 2:45 of a wav file (room for three watermark blocks)
    Gentest { input: PathBuf, output: PathBuf },
    /// Remove samples from the start of a wav file
    CutStart {
        input: PathBuf,
        output: PathBuf,
        /// Per-channel samples to drop
        start: usize,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    if let Err(err) = run(cli) {
        eprintln!("audiowmark: {err:#}");
        std::process::exit(1);
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = Config::default();
    cfg.set_strength(cli.strength);
    cfg.mix = !cli.linear;
    cfg.hard = cli.hard;
    cfg.snr = cli.snr;
    cfg.test_no_sync = cli.test_no_sync;

    cfg.key = match (&cli.key, cli.test_key) {
        (Some(_), Some(_)) => return Err(Error::KeyConflict.into()),
        (Some(path), None) => Key::load(path)?,
        (None, Some(n)) => Key::from_test_seed(n),
        (None, None) => Key::default(),
    };
    Ok(cfg)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = build_config(&cli)?;

    match &cli.command {
        Command::Add {
            input,
            output,
            message,
        } => add(input, output, message, &cfg),
        Command::Get { input } => get(input, None, cli.test_cut, &cfg),
        Command::Cmp { input, message } => get(input, Some(message.as_str()), cli.test_cut, &cfg),
        Command::GenKey { file } => gen_key(file),
        Command::Gentest { input, output } => gentest(input, output),
        Command::CutStart {
            input,
            output,
            start,
        } => cut_start(input, output, *start),
    }
}

fn add(input: &Path, output: &Path, message: &str, cfg: &Config) -> anyhow::Result<()> {
    let bits = parse_message(message)?;

    println!("Input:        {}", input.display());
    println!("Output:       {}", output.display());
    println!("Message:      {}", bit_vec_to_str(&bits));
    println!("Strength:     {}\n", cfg.strength());

    let wav = WavData::load(input).with_context(|| format!("error loading {}", input.display()))?;
    let seconds = wav.n_values() / wav.sample_rate() as usize / wav.n_channels();
    println!("Time:         {}:{:02}", seconds / 60, seconds % 60);
    println!("Sample Rate:  {}", wav.sample_rate());
    println!("Channels:     {}", wav.n_channels());

    let (out, info) = audiowmark_core::add_watermark(&wav, &bits, cfg)?;

    if let Some(snr) = info.snr_db {
        println!("SNR:          {snr:.6} dB");
    }
    println!("Data Blocks:  {}", info.data_blocks);
    println!(
        "Volume Norm:  {:.3} ({:.2} dB)",
        info.volume_norm,
        db_from_factor(info.volume_norm, -96.0)
    );

    out.save(output)
        .with_context(|| format!("error saving {}", output.display()))?;
    Ok(())
}

fn print_patterns(result: &DecodeResult) {
    for pattern in &result.patterns {
        match pattern.kind {
            PatternKind::Block { index, block_type } => {
                let seconds = index / MARK_SAMPLE_RATE as usize;
                println!(
                    "pattern {:2}:{:02} {} {:.3} {:.3} {}",
                    seconds / 60,
                    seconds % 60,
                    bit_vec_to_str(&pattern.bits),
                    pattern.quality,
                    pattern.decode_error,
                    block_type
                );
            }
            PatternKind::All => {
                println!(
                    "pattern   all {} {:.3} {:.3}",
                    bit_vec_to_str(&pattern.bits),
                    pattern.quality,
                    pattern.decode_error
                );
            }
        }
    }
}

fn get(input: &Path, orig_pattern: Option<&str>, test_cut: i64, cfg: &Config) -> anyhow::Result<()> {
    let orig_vec = orig_pattern.map(bit_str_to_vec).transpose()?;

    let wav = WavData::load(input).with_context(|| format!("error loading {}", input.display()))?;
    let result = audiowmark_core::get_watermark(&wav, cfg)?;

    print_patterns(&result);

    if let Some(orig_vec) = orig_vec {
        let match_count = result
            .patterns
            .iter()
            .filter(|p| {
                p.bits
                    .iter()
                    .enumerate()
                    .all(|(i, &bit)| bit == orig_vec[i % orig_vec.len()])
            })
            .count();
        println!("match_count {} {}", match_count, result.patterns.len());

        // sync markers found at the positions an undisturbed file would
        // have them (test_cut shifts expectations for cropped input)
        let sync_match = expected_block_positions(result.n_frames)
            .into_iter()
            .filter(|&expect_index| {
                result.sync_scores.iter().any(|score| {
                    (score.index as i64 + test_cut - expect_index as i64).abs()
                        < FRAME_SIZE as i64 / 2
                })
            })
            .count();
        println!("sync_match {} {}", sync_match, result.sync_scores.len());
    }
    Ok(())
}

fn gen_key(file: &Path) -> anyhow::Result<()> {
    let key = Key::generate();
    std::fs::write(file, key.file_contents())
        .with_context(|| format!("error writing to file {}", file.display()))?;
    Ok(())
}

fn gentest(input: &Path, output: &Path) -> anyhow::Result<()> {
    println!(
        "generating test sample from '{}' to '{}'",
        input.display(),
        output.display()
    );

    let wav = WavData::load(input).with_context(|| format!("error loading {}", input.display()))?;
    // 2:45 of audio, approximately the minimum for three watermark blocks
    let n_samples = 165 * wav.n_channels() * wav.sample_rate() as usize;
    if wav.n_values() < n_samples {
        bail!("input file {} too short", input.display());
    }
    let out = WavData::new(
        wav.samples()[..n_samples].to_vec(),
        wav.n_channels(),
        wav.sample_rate(),
        wav.bit_depth(),
    );
    out.save(output)
        .with_context(|| format!("error saving {}", output.display()))?;
    Ok(())
}

fn cut_start(input: &Path, output: &Path, start: usize) -> anyhow::Result<()> {
    let wav = WavData::load(input).with_context(|| format!("error loading {}", input.display()))?;
    let skip = (start * wav.n_channels()).min(wav.n_values());
    let out = WavData::new(
        wav.samples()[skip..].to_vec(),
        wav.n_channels(),
        wav.sample_rate(),
        wav.bit_depth(),
    );
    out.save(output)
        .with_context(|| format!("error saving {}", output.display()))?;
    Ok(())
}
