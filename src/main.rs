use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex, PoisonError};

use clap::Parser;
use color_eyre::eyre::WrapErr;
use log::info;

use hackrf_sweep_monitor::{build_controller, SweepMonitor, SweepParams};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    sweep: SweepParams,

    /// Stop after this many complete sweeps, run forever when omitted
    #[arg(long)]
    cycles: Option<u64>,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();
    let args = Args::parse();
    args.sweep.log_summary();

    let controller = build_controller(&args.sweep).wrap_err("invalid sweep parameters")?;

    let (tx, rx) = channel();
    let monitor = Arc::new(Mutex::new(SweepMonitor::new(
        args.sweep.depth,
        args.sweep.min_db,
    )));
    let callback_monitor = Arc::clone(&monitor);
    controller.set_fft_callback(move |data| {
        let frame = callback_monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handle(data);
        if let Some(frame) = frame {
            // the receiver is gone once main is done
            let _ = tx.send(frame);
        }
    });

    controller.connect().wrap_err("could not open the sweep device")?;
    controller.start_sweep().wrap_err("could not start sweeping")?;

    let mut seen = 0;
    for frame in rx {
        info!("{}", frame.summary());
        seen += 1;
        if args.cycles.is_some_and(|cycles| seen >= cycles) {
            break;
        }
    }

    controller.stop_sweep();
    info!("Stopped after {seen} sweeps");
    Ok(())
}
