use strata_core::config::{default_config, install, load_config};
use strata_core::protocols::ethernet::EthernetPacket;

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

#[derive(Parser, Debug)]
struct Args {
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    config: Option<PathBuf>,
    /// File holding the hex-encoded frame. Whitespace is ignored.
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    file: Option<PathBuf>,
    /// Recompute lengths and checksums before dumping.
    #[clap(long)]
    finalize: bool,
    /// Hex-encoded Ethernet frame.
    frame: Option<String>,
}

fn read_frame(args: &Args) -> Result<Vec<u8>> {
    let text = match (&args.frame, &args.file) {
        (Some(frame), None) => frame.clone(),
        (None, Some(path)) => fs::read_to_string(path)?,
        _ => bail!("Pass either a frame or --file"),
    };
    let hex: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(hex::decode(hex)?)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => default_config(),
    };
    install(config);

    let bytes = read_frame(&args)?;
    log::info!("Parsing {} byte frame", bytes.len());
    let eth = EthernetPacket::create_from(&bytes);
    let last = eth.last()?;
    log::info!(
        "Parsed {} packets, innermost is {}",
        eth.chain_len(),
        last.type_name()
    );
    if args.finalize {
        eth.finalize_all()?;
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    eth.dump(&mut out)?;
    out.flush()?;
    Ok(())
}
