//! `mfc-render`: boot a Music Feature Card, play a short demo through the
//! host interface and write the card's audio output to a WAV file.

use std::env;
use std::fs;
use std::time::Duration;

use anyhow::{bail, Context};
use log::{info, LevelFilter};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

use music_feature_card::card::{Card, CardConfig, HostLink};
use music_feature_card::export::{export_samples, render_frames, ExportConfig, RENDER_CHUNK};
use music_feature_card::sysex::{parse_frame, Encoding};

const HOST_TIMEOUT: Duration = Duration::from_millis(200);

/// C major arpeggio, one note per step.
const DEMO_NOTES: [u8; 8] = [60, 64, 67, 72, 76, 72, 67, 64];

struct Options {
    config: Option<String>,
    seconds: f32,
    verbose: bool,
    normalize: bool,
    program: u8,
    output: String,
}

fn usage() -> &'static str {
    "Usage:\n  mfc-render [--config <card.json>] [--seconds <n>] [--program <0-47>] [--normalize] [--verbose] <out.wav>\n\n\
     Flags:\n  --config <file>   Card configuration (JSON, missing fields default)\n  \
     --seconds <n>     Length of the take (default 4)\n  \
     --program <n>     Voice selected before playing (default 0)\n  \
     --normalize       Scale the peak to 95% of full range\n  \
     -v, --verbose     Debug logging\n  -h, --help        Show this help\n"
}

fn parse_args() -> anyhow::Result<Option<Options>> {
    let mut config = None;
    let mut seconds = 4.0;
    let mut verbose = false;
    let mut normalize = false;
    let mut program = 0;
    let mut output = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(None),
            "--verbose" | "-v" => verbose = true,
            "--normalize" => normalize = true,
            "--config" => config = Some(args.next().context("--config needs a file")?),
            "--seconds" => {
                let value = args.next().context("--seconds needs a value")?;
                seconds = value.parse().with_context(|| format!("bad length {value}"))?;
            }
            "--program" => {
                let value = args.next().context("--program needs a value")?;
                program = value.parse().with_context(|| format!("bad program {value}"))?;
                if program > 47 {
                    bail!("program {program} is above 47");
                }
            }
            other if other.starts_with('-') => bail!("unknown flag {other}\n\n{}", usage()),
            other => output = Some(other.to_string()),
        }
    }

    let Some(output) = output else {
        return Ok(None);
    };
    Ok(Some(Options {
        config,
        seconds,
        verbose,
        normalize,
        program,
        output,
    }))
}

fn main() -> anyhow::Result<()> {
    let Some(options) = parse_args()? else {
        print!("{}", usage());
        return Ok(());
    };

    TermLogger::init(
        if options.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        ConfigBuilder::default().build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let config = match &options.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            CardConfig::from_json(&text)?
        }
        None => CardConfig::default(),
    };
    let sample_rate = config.sample_rate;
    let mut card = Card::start(config)?;
    let link = HostLink::new(&card);

    // identification dump
    link.send(&[0xF0, 0x43, 0x75, 0x00, 0x20, 0x03, 0x00, 0xF7], HOST_TIMEOUT)?;
    let reply = link.receive_sysex(Duration::from_secs(1))?;
    if let Some(Ok((id, _))) = reply.get(7..).map(|body| parse_frame(body, Encoding::TypeB)) {
        info!("card identifies as \"{}\"", String::from_utf8_lossy(&id));
    }

    link.send(&[0xC0, options.program], HOST_TIMEOUT)?;

    let frames = (options.seconds.max(0.0) * sample_rate as f32) as usize;
    let step = (sample_rate as usize / 4).max(RENDER_CHUNK);
    let mut last: Option<u8> = None;
    let mut send_error = None;
    let mut samples = render_frames(&card, frames, |pos| {
        if pos % step >= RENDER_CHUNK || send_error.is_some() {
            return;
        }
        let n = pos / step;
        let mut bytes = Vec::new();
        if let Some(key) = last.take() {
            bytes.extend_from_slice(&[0x80, key, 0x40]);
        }
        if pos + step < frames {
            let key = DEMO_NOTES[n % DEMO_NOTES.len()];
            bytes.extend_from_slice(&[0x90, key, 0x64]);
            last = Some(key);
        }
        if let Err(e) = link.send(&bytes, HOST_TIMEOUT) {
            send_error = Some(e);
        }
    });
    if let Some(e) = send_error {
        return Err(e.into());
    }

    export_samples(
        &mut samples,
        &options.output,
        &ExportConfig::with_sample_rate(sample_rate)
            .normalize(options.normalize)
            .fade_out(0.05),
    )?;
    card.shutdown();
    info!("wrote {} frames to {}", frames, options.output);
    Ok(())
}
