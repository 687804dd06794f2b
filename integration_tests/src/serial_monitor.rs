//! Serial line monitor.
//!
//! Prints every line received on a port at the instrument's settings. Useful
//! for checking the chronograph's output before putting the bridge in
//! between.

mod instrument;

use std::time::Duration;

use clap::Parser;
use colored::Colorize;

use instrument::{resolve_port, InstrumentPort, BAUD_RATE};

#[derive(Parser)]
#[command(name = "serial-monitor")]
#[command(about = "Print lines received from the instrument serial port")]
struct Args {
    /// Serial port (use "auto" to auto-detect)
    #[arg(short, long, default_value = "auto")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value_t = BAUD_RATE)]
    baud: u32,

    /// Print raw bytes in hex as well
    #[arg(long)]
    hex: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let port = resolve_port(&args.port)?;
    let mut instrument = InstrumentPort::new(&port, args.baud)?;
    instrument.set_timeout(Duration::from_secs(1));

    println!(
        "{} {} @ {} 8N1 (Ctrl-C to exit)",
        "Monitoring".bold(),
        instrument.port_name(),
        args.baud
    );

    let mut count: u64 = 0;
    loop {
        let Some(line) = instrument.read_line()? else {
            continue;
        };
        count += 1;

        let text = String::from_utf8_lossy(&line);
        print!("{} {}", format!("[{:>5}]", count).dimmed(), text);
        if args.hex {
            print!("  {}", format!("{:02x?}", line).dimmed());
        }
        println!();
    }
}
