//! Developer tool: run one plug-in against a scratch host and trace the
//! conversation.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::Parser;

use tinct_config::TinctConfig;
use tinct_plugin::HostContext;
use tinct_protocol::PixelKind;

#[derive(Parser, Debug)]
#[command(name = "plugin-probe", about = "Run a plug-in against a scratch host")]
struct Args {
    /// Plug-in program name or path.
    program: String,

    /// Config file to load instead of the default location.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Create a scratch RGB image of this size and attach the channel to it.
    #[arg(long, value_name = "WxH")]
    image: Option<String>,

    /// Give up after this many seconds.
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

fn parse_size(spec: &str) -> Result<(u32, u32)> {
    let Some((w, h)) = spec.split_once('x') else {
        bail!("image size must look like 640x480, got '{spec}'");
    };
    Ok((w.parse()?, h.parse()?))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TinctConfig::load_from(path)?,
        None => TinctConfig::load()?,
    };
    let mut host = HostContext::new(config);

    let image = match &args.image {
        Some(spec) => {
            let (width, height) = parse_size(spec)?;
            Some(host.images_mut().create(width, height, PixelKind::Rgb, "probe")?)
        }
        None => None,
    };

    let (channel, mut done) = host.open_plugin(&args.program, image, None)?;
    log::info!("channel {channel} open, pumping");

    let deadline = Instant::now() + Duration::from_secs(args.timeout);
    loop {
        host.pump();
        host.tick(Instant::now());
        match done.try_recv() {
            Ok(status) => {
                log::info!("channel {channel} finished: {status:?}");
                break;
            }
            Err(tokio::sync::oneshot::error::TryRecvError::Empty) => {}
            Err(tokio::sync::oneshot::error::TryRecvError::Closed) => {
                bail!("host dropped the channel without reporting a status");
            }
        }
        if Instant::now() >= deadline {
            log::warn!("timeout, killing channel {channel}");
            host.close(channel, true);
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    for notice in host.notices() {
        println!("notice from channel {}: {}", notice.channel, notice.text);
    }
    println!("images left in store: {}", host.images().image_count());
    Ok(())
}
