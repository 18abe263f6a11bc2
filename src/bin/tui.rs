use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use color_eyre::{eyre::WrapErr, Result};
use ratatui::{
    crossterm::event::{self, Event, KeyCode},
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols,
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Rectangle},
        Axis, Block, Chart, Dataset, Paragraph,
    },
    DefaultTerminal, Frame,
};

use clap::Parser;
use hackrf_sweep_monitor::{
    build_controller,
    gain::{LNA_STEP, VGA_STEP},
    DeviceController, ScanRangeSet, SpectrumFrame, SweepMonitor, SweepParams,
};
use log::{debug, warn};

enum AppEvent {
    Key(KeyCode),
    NewFrame,
    Quit,
}

enum VisualizationMode {
    Spectrum,
    Waterfall,
}

fn main() -> Result<()> {
    env_logger::init();
    color_eyre::install()?;

    let params = SweepParams::parse();
    let controller = build_controller(&params).wrap_err("invalid sweep parameters")?;
    let monitor = Arc::new(Mutex::new(SweepMonitor::new(params.depth, params.min_db)));
    // newest finished sweep not yet drawn
    let latest: Arc<Mutex<Option<SpectrumFrame>>> = Arc::new(Mutex::new(None));

    let (event_tx, event_rx) = channel();

    // Runs on the sweeper's thread. A slow UI skips sweeps instead of
    // queueing them, so at most one NewFrame is ever pending.
    {
        let sweep_tx = event_tx.clone();
        let monitor = Arc::clone(&monitor);
        let latest = Arc::clone(&latest);
        controller.set_fft_callback(move |data| {
            let frame = monitor
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .handle(data);
            if let Some(frame) = frame {
                let pending = latest
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .replace(frame);
                if pending.is_none() {
                    let _ = sweep_tx.send(AppEvent::NewFrame);
                }
            }
        });
    }

    controller
        .connect()
        .wrap_err("could not open the sweep device")?;
    controller.start_sweep().wrap_err("could not start sweeping")?;

    let terminal = ratatui::init();

    let event_thread = {
        let event_tx = event_tx.clone();
        thread::spawn(move || loop {
            if let Ok(true) = event::poll(Duration::from_millis(100)) {
                if let Ok(Event::Key(key)) = event::read() {
                    if key.code == KeyCode::Char('q') {
                        let _ = event_tx.send(AppEvent::Quit);
                        break;
                    } else if event_tx.send(AppEvent::Key(key.code)).is_err() {
                        break;
                    }
                }
            }
        })
    };
    drop(event_tx);

    let app_result = App::new(event_rx, params, controller, monitor, latest).run(terminal);

    ratatui::restore();
    let _ = event_thread.join();

    app_result
}

struct App {
    event_receiver: Receiver<AppEvent>,
    params: SweepParams,
    controller: DeviceController,
    monitor: Arc<Mutex<SweepMonitor>>,
    latest: Arc<Mutex<Option<SpectrumFrame>>>,
    current_frame: Option<SpectrumFrame>,
    data_points: Vec<(f64, f64)>,
    visualization_mode: VisualizationMode,
    /// Text of the range editor while it is open.
    range_input: Option<String>,
    range_error: Option<String>,
}

impl App {
    fn new(
        event_receiver: Receiver<AppEvent>,
        params: SweepParams,
        controller: DeviceController,
        monitor: Arc<Mutex<SweepMonitor>>,
        latest: Arc<Mutex<Option<SpectrumFrame>>>,
    ) -> Self {
        Self {
            event_receiver,
            params,
            controller,
            monitor,
            latest,
            current_frame: None,
            data_points: Vec::new(),
            visualization_mode: VisualizationMode::Waterfall,
            range_input: None,
            range_error: None,
        }
    }

    fn run(mut self, mut terminal: DefaultTerminal) -> Result<()> {
        terminal.draw(|frame| self.draw(frame))?;

        loop {
            match self.event_receiver.recv() {
                Ok(AppEvent::Key(key)) => self.handle_key(key),
                Ok(AppEvent::NewFrame) => {
                    let frame = self
                        .latest
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                    if let Some(frame) = frame {
                        self.data_points = frame
                            .frequencies_mhz
                            .iter()
                            .zip(&frame.powers_db)
                            .map(|(&freq, &db)| (freq, f64::from(db)))
                            .collect();
                        self.current_frame = Some(frame);
                    }
                }
                Ok(AppEvent::Quit) | Err(_) => {
                    self.controller.stop_sweep();
                    return Ok(());
                }
            }
            terminal.draw(|frame| self.draw(frame))?;
        }
    }

    fn handle_key(&mut self, key: KeyCode) {
        if self.range_input.is_some() {
            self.edit_ranges(key);
            return;
        }
        let gain = self.controller.gain_state();
        let result = match key {
            KeyCode::Char('r') => {
                self.clear_display();
                Ok(())
            }
            KeyCode::Char('f') => {
                let ranges = self.controller.scan_ranges();
                let text = ranges
                    .as_slice()
                    .iter()
                    .map(|r| format!("{}:{}", r.start_mhz, r.end_mhz))
                    .collect::<Vec<_>>()
                    .join(" ");
                self.range_input = Some(text);
                self.range_error = None;
                Ok(())
            }
            KeyCode::Char('m') => {
                self.visualization_mode = match self.visualization_mode {
                    VisualizationMode::Spectrum => VisualizationMode::Waterfall,
                    VisualizationMode::Waterfall => VisualizationMode::Spectrum,
                };
                Ok(())
            }
            KeyCode::Char('a') => {
                self.controller.set_amp_enable(!gain.amp_enable());
                Ok(())
            }
            KeyCode::Char('+') => self.controller.set_vga_gain(gain.vga_gain() + VGA_STEP),
            KeyCode::Char('-') => self.controller.set_vga_gain(gain.vga_gain() - VGA_STEP),
            KeyCode::Char(']') => self.controller.set_lna_gain(gain.lna_gain() + LNA_STEP),
            KeyCode::Char('[') => self.controller.set_lna_gain(gain.lna_gain() - LNA_STEP),
            KeyCode::Char('s') => {
                if self.controller.is_sweeping() {
                    self.controller.stop_sweep();
                } else if let Err(e) = self.controller.start_sweep() {
                    warn!("Could not start sweeping: {e}");
                }
                Ok(())
            }
            _ => Ok(()),
        };
        // out of range gain steps are simply ignored
        if let Err(e) = result {
            debug!("{e}");
        }
    }

    fn edit_ranges(&mut self, key: KeyCode) {
        let Some(input) = self.range_input.as_mut() else {
            return;
        };
        match key {
            KeyCode::Char(c) if c.is_ascii_digit() || matches!(c, ':' | ',' | ' ') => {
                input.push(c)
            }
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Esc => {
                self.range_input = None;
                self.range_error = None;
            }
            KeyCode::Enter => match self.apply_ranges() {
                Ok(()) => {
                    self.range_input = None;
                    self.range_error = None;
                }
                Err(e) => self.range_error = Some(e),
            },
            _ => {}
        }
    }

    /// Sends the edited ranges to the controller and starts the display over.
    fn apply_ranges(&mut self) -> Result<(), String> {
        let input = self.range_input.as_deref().unwrap_or_default();
        let ranges = input
            .parse::<ScanRangeSet>()
            .map_err(|e| e.to_string())?;
        self.controller
            .set_scan_ranges(ranges.as_slice().to_vec())
            .map_err(|e| e.to_string())?;
        if self.controller.is_sweeping() {
            if let Err(e) = self.controller.restart_sweep() {
                warn!("Could not restart sweeping: {e}");
            }
        }
        self.clear_display();
        Ok(())
    }

    fn clear_display(&mut self) {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.data_points.clear();
        self.current_frame = None;
    }

    fn frequency_bounds(&self) -> (f64, f64) {
        let ranges = self.controller.scan_ranges();
        (
            f64::from(ranges.first().start_mhz),
            f64::from(ranges.last().end_mhz),
        )
    }

    fn draw(&self, frame: &mut Frame) {
        let area = frame.area();

        let chunks = Layout::vertical([Constraint::Length(4), Constraint::Fill(1)]).split(area);

        let (min_freq, max_freq) = self.frequency_bounds();
        let info_text = if let Some(sweep) = &self.current_frame {
            format!(
                "{} - {} MHz, {} points, min: {:.1} dB, max: {:.1} dB, Bin width {:.0} Hz, sweep {}",
                min_freq,
                max_freq,
                sweep.powers_db.len(),
                sweep.powers_db.iter().copied().fold(f32::INFINITY, f32::min),
                sweep.powers_db.iter().copied().fold(f32::NEG_INFINITY, f32::max),
                sweep.bin_width_hz,
                sweep.cycle,
            )
        } else {
            "Waiting for spectrum data...".to_string()
        };

        let gain = self.controller.gain_state();
        let radio_params_text = if let Some(input) = &self.range_input {
            match &self.range_error {
                Some(e) => format!("Ranges (MHz): {input}_ - {e}"),
                None => format!("Ranges (MHz): {input}_ [Enter] Apply [Esc] Cancel"),
            }
        } else {
            format!(
            "BB {} dB, IF {} dB, RF AMP {} (total {} dB){}",
            gain.vga_gain(),
            gain.lna_gain(),
            if gain.amp_enable() { "ON" } else { "OFF" },
            gain.total_gain(),
            if self.controller.is_sweeping() { "" } else { " - stopped" },
            )
        };

        let mode_text = match self.visualization_mode {
            VisualizationMode::Spectrum => "Mode: Spectrum",
            VisualizationMode::Waterfall => "Mode: Waterfall",
        };

        let title_block = Block::bordered().title(
            Line::from("HackRF Sweep Monitor")
                .blue()
                .bold()
                .centered(),
        );
        frame.render_widget(title_block, chunks[0]);

        let line_area = |row: u16| {
            Rect::new(
                chunks[0].x + 2,
                chunks[0].y + row,
                chunks[0].width.saturating_sub(4),
                1,
            )
        };

        if self.data_points.is_empty() {
            frame.render_widget(
                Paragraph::new(Line::from(Span::styled(
                    info_text,
                    Style::default().fg(Color::Gray),
                ))),
                line_area(1),
            );
            frame.render_widget(
                Paragraph::new(Line::from(Span::styled(
                    radio_params_text,
                    Style::default().fg(Color::Yellow),
                ))),
                line_area(2),
            );
            return;
        }

        let title = Line::from(vec![
            Span::styled(
                info_text,
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(" [q] Quit", Style::default().fg(Color::Gray)),
            Span::styled(" [r] Reset", Style::default().fg(Color::Gray)),
            Span::styled(" [m] Mode", Style::default().fg(Color::Gray)),
            Span::styled(" [s] Start/Stop", Style::default().fg(Color::Gray)),
            Span::styled(" [f] Ranges", Style::default().fg(Color::Gray)),
        ]);
        frame.render_widget(Paragraph::new(title), line_area(1));

        frame.render_widget(
            Paragraph::new(Line::from(vec![
                Span::styled(radio_params_text, Style::default().fg(Color::Yellow)),
                Span::styled(format!(" - {}", mode_text), Style::default().fg(Color::Green)),
                Span::styled(
                    " [a] Amp [+/-] VGA [[/]] LNA",
                    Style::default().fg(Color::Gray),
                ),
            ])),
            line_area(2),
        );

        match self.visualization_mode {
            VisualizationMode::Spectrum => self.render_spectrum_chart(frame, chunks[1]),
            VisualizationMode::Waterfall => self.render_waterfall(frame, chunks[1]),
        }
    }

    fn render_spectrum_chart(&self, frame: &mut Frame, area: Rect) {
        let (min_freq, max_freq) = self.frequency_bounds();
        let mid_freq = (min_freq + max_freq) / 2.0;
        let x_labels = vec![
            Span::styled(
                format!("{:.1}", min_freq),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!("{:.1}", mid_freq)),
            Span::styled(
                format!("{:.1}", max_freq),
                Style::default().add_modifier(Modifier::BOLD),
            ),
        ];

        let min_db = f64::from(self.params.min_db);
        let max_db = f64::from(self.params.max_db);
        let mid_db = (min_db + max_db) / 2.0;
        let y_labels = vec![
            Span::styled(
                format!("{:.1}", min_db),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!("{:.1}", mid_db)),
            Span::styled(
                format!("{:.1}", max_db),
                Style::default().add_modifier(Modifier::BOLD),
            ),
        ];

        let dataset = Dataset::default()
            .name("Spectrum")
            .marker(symbols::Marker::Braille)
            .style(Style::default().fg(Color::Cyan))
            .data(&self.data_points);

        let chart = Chart::new(vec![dataset])
            .block(Block::bordered())
            .x_axis(
                Axis::default()
                    .title("Frequency (MHz)")
                    .style(Style::default().fg(Color::Gray))
                    .bounds([min_freq, max_freq])
                    .labels(x_labels),
            )
            .y_axis(
                Axis::default()
                    .title("Power (dB)")
                    .style(Style::default().fg(Color::Gray))
                    .bounds([min_db, max_db])
                    .labels(y_labels),
            );

        frame.render_widget(chart, area);
    }

    fn render_waterfall(&self, frame: &mut Frame, area: Rect) {
        let monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(history) = monitor.history() else {
            return;
        };

        let block = Block::bordered()
            .title("Waterfall")
            .title_alignment(ratatui::layout::Alignment::Center);
        let inner_area = block.inner(area);
        frame.render_widget(block, area);
        if inner_area.width == 0 || inner_area.height == 0 {
            return;
        }

        let waterfall = Canvas::default()
            .paint(|ctx| {
                let width = inner_area.width as usize;
                let height = inner_area.height as usize;
                let lines_to_show = height.min(history.depth());

                // one cell covers several bins, draw their average
                let step = history.cols() as f64 / width as f64;
                let n = (step as usize).max(1);

                for age in 0..lines_to_show {
                    for x in 0..width {
                        let idx = (x as f64 * step) as usize;
                        if idx >= history.cols() {
                            break;
                        }
                        let end = (idx + n).min(history.cols());
                        let average_db = (idx..end)
                            .map(|col| history.value_at(col as i64, age as i64))
                            .sum::<f32>()
                            / (end - idx) as f32;

                        let normalized = (average_db - self.params.min_db)
                            / (self.params.max_db - self.params.min_db);

                        ctx.draw(&Rectangle {
                            x: x as f64,
                            y: age as f64,
                            width: 1.0,
                            height: 1.0,
                            color: color_from_value(normalized.clamp(0.0, 1.0)),
                        });
                    }
                }
            })
            .x_bounds([0.0, inner_area.width as f64])
            .y_bounds([0.0, inner_area.height as f64]);

        frame.render_widget(waterfall, inner_area);

        let (min_freq, max_freq) = self.frequency_bounds();
        let labels = [
            format!("{} MHz", min_freq),
            format!("{} MHz", (min_freq + max_freq) / 2.0),
            format!("{} MHz", max_freq),
        ];

        let label_width = 10;
        let spacing = inner_area.width.saturating_sub(3 * label_width) / 2;
        let bottom = inner_area.y + inner_area.height - 1;

        for (i, label) in labels.into_iter().enumerate() {
            let offset = i as u16 * (label_width + spacing);
            if offset + label_width > inner_area.width {
                break;
            }
            frame.render_widget(
                Paragraph::new(Span::styled(label, Style::default().fg(Color::Gray))),
                Rect::new(inner_area.x + offset, bottom, label_width, 1),
            );
        }
    }
}

fn color_from_value(value: f32) -> Color {
    let color = colorous::INFERNO.eval_continuous(f64::from(value));
    Color::Rgb(color.r, color.g, color.b)
}
