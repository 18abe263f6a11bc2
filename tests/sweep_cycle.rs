mod common;

use std::sync::{Arc, Mutex};

use common::{fire, raw_frame, Recording};
use hackrf_sweep_monitor::device::fft_size_for_bin_width;
use hackrf_sweep_monitor::{DeviceController, SpectrumFrame, SweepMonitor};

const RANGES: &[u16] = &[2400, 2500];
const INIT_DB: f32 = -90.0;

/// Tunings of one sweep over 2400-2500 MHz: 20 MHz steps, two per step.
fn tunings() -> Vec<u64> {
    (0..5u64)
        .flat_map(|step| {
            let base = 2_400_000_000 + step * 20_000_000;
            [base, base + 5_000_000]
        })
        .collect()
}

struct Rig {
    recording: Recording,
    _controller: DeviceController,
    monitor: Arc<Mutex<SweepMonitor>>,
    frames: Arc<Mutex<Vec<SpectrumFrame>>>,
}

fn rig() -> Rig {
    let recording = Recording::new();
    let controller = DeviceController::new(recording.driver());
    let monitor = Arc::new(Mutex::new(SweepMonitor::new(8, INIT_DB)));
    let frames = Arc::new(Mutex::new(Vec::new()));

    let (callback_monitor, callback_frames) = (Arc::clone(&monitor), Arc::clone(&frames));
    controller.set_fft_callback(move |data| {
        if let Some(frame) = callback_monitor.lock().unwrap().handle(data) {
            callback_frames.lock().unwrap().push(frame);
        }
    });
    controller.connect().unwrap();
    controller.start_sweep().unwrap();

    Rig {
        recording,
        _controller: controller,
        monitor,
        frames,
    }
}

#[test]
fn two_cycles_push_two_rows() {
    let rig = rig();
    let handler = rig.recording.handler();
    let size = fft_size_for_bin_width(20_000_000, 50_000);
    assert_eq!(size, 404);

    let first = raw_frame(size, -50.0, -50.0);
    for freq in tunings() {
        fire(&handler, freq, &first, RANGES);
    }
    // opening transfer of the second sweep, louder
    fire(&handler, 2_400_000_000, &raw_frame(size, -40.0, -40.0), RANGES);

    let frames = rig.frames.lock().unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].cycle, 1);
    assert_eq!(frames[1].cycle, 2);
    assert_eq!(frames[0].frequencies_mhz.len(), 202);
    assert_eq!(frames[1].frequencies_mhz.len(), 2020);
    assert!(frames[1]
        .frequencies_mhz
        .windows(2)
        .all(|pair| pair[0] < pair[1]));
    assert!((frames[1].frequencies_mhz[0] - 2400.0).abs() < 1e-9);
    assert!(*frames[1].frequencies_mhz.last().unwrap() < 2500.0);

    let monitor = rig.monitor.lock().unwrap();
    assert_eq!(monitor.cycles(), 2);
    assert_eq!(monitor.aggregator().num_datapoints(), 2020);

    let history = monitor.history().unwrap();
    assert_eq!(history.cols(), 2020);
    assert_eq!(history.rows_written(), 2);

    // newest row: lower band [2400, 2405) and upper band [2410, 2415) refreshed
    assert_eq!(history.value_at(0, 0), -40.0);
    assert_eq!(history.value_at(100, 0), -40.0);
    assert_eq!(history.value_at(150, 0), -50.0);
    assert_eq!(history.value_at(250, 0), -40.0);
    assert_eq!(history.value_at(2019, 0), -50.0);

    // first row only saw the opening transfer
    assert_eq!(history.value_at(0, 1), -50.0);
    assert_eq!(history.value_at(150, 1), INIT_DB);
    assert_eq!(history.value_at(250, 1), -50.0);
    assert_eq!(history.value_at(2019, 1), INIT_DB);

    assert_eq!(history.value_at(0, 2), INIT_DB);
    assert_eq!(history.value_at(2020, 0), 0.0);
}

#[test]
fn mid_cycle_transfers_do_not_push() {
    let rig = rig();
    let handler = rig.recording.handler();
    let power = raw_frame(404, -60.0, -60.0);

    for freq in tunings().into_iter().skip(1) {
        fire(&handler, freq, &power, RANGES);
    }
    assert!(rig.frames.lock().unwrap().is_empty());
    let monitor = rig.monitor.lock().unwrap();
    assert_eq!(monitor.aggregator().len(), 1818);
    assert_eq!(monitor.history().unwrap().rows_written(), 0);
}

#[test]
fn range_change_rebuilds_the_layout() {
    let rig = rig();
    let handler = rig.recording.handler();
    let power = raw_frame(404, -60.0, -60.0);

    fire(&handler, 2_400_000_000, &power, RANGES);
    fire(&handler, 100_000_000, &power, &[100, 140]);

    let frames = rig.frames.lock().unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].cycle, 2);
    assert_eq!(frames[1].frequencies_mhz.len(), 202);
    assert!((frames[1].frequencies_mhz[0] - 100.0).abs() < 1e-9);

    let monitor = rig.monitor.lock().unwrap();
    let history = monitor.history().unwrap();
    assert_eq!(history.cols(), 808);
    assert_eq!(history.rows_written(), 1);
}

#[test]
fn every_range_fills_its_own_columns() {
    let rig = rig();
    let handler = rig.recording.handler();
    let ranges = [100, 120, 2400, 2420];
    let power = raw_frame(404, -60.0, -60.0);

    for freq in [100_000_000, 105_000_000, 2_400_000_000, 2_405_000_000] {
        fire(&handler, freq, &power, &ranges);
    }
    fire(&handler, 100_000_000, &raw_frame(404, -30.0, -30.0), &ranges);

    let monitor = rig.monitor.lock().unwrap();
    assert_eq!(monitor.aggregator().len(), 808);
    let history = monitor.history().unwrap();
    assert_eq!(history.cols(), 808);

    let newest = history.row(0).unwrap();
    assert!(newest.iter().all(|&db| db != INIT_DB));
    assert_eq!(history.value_at(0, 0), -30.0);
    assert_eq!(history.value_at(403, 0), -60.0);
    assert_eq!(history.value_at(404, 0), -60.0);
    assert_eq!(history.value_at(807, 0), -60.0);
}
