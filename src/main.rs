#[cfg(feature = "gui")]
use eframe::egui;

#[cfg(feature = "gui")]
use std::time::{Duration, Instant};

#[cfg(feature = "gui")]
use stepseq::{
    midi_note_name, AudioOutput, BallField, Bounds, Config, Lane, MidiOutputDevice,
    PlaybackEvent, Sequencer,
};

#[cfg(feature = "gui")]
fn main() -> Result<(), eframe::Error> {
    env_logger::init();
    log::info!("Starting stepseq");

    let config = Config::load();
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([720.0, 520.0])
            .with_title("stepseq"),
        ..Default::default()
    };

    eframe::run_native(
        "stepseq",
        options,
        Box::new(move |_cc| Ok(Box::new(DemoApp::new(&config)))),
    )
}

#[cfg(not(feature = "gui"))]
fn main() -> stepseq::Result<()> {
    use stepseq::{Config, MidiOutputDevice, Sequencer};

    env_logger::init();

    let config = Config::load();
    let mut device = MidiOutputDevice::new(config.midi.client_name.as_str());
    if let Err(e) = device.connect_preferred(config.midi.output_port.as_deref()) {
        log::warn!("{}, playing silently", e);
    }

    let mut sequencer = Sequencer::from_config(device, &config);
    sequencer.start()?;
    println!("Playing at {} BPM, press Enter to stop", sequencer.bpm());

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    sequencer.stop();
    Ok(())
}

#[cfg(feature = "gui")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Sequencer,
    Balls,
}

#[cfg(feature = "gui")]
struct DemoApp {
    tab: Tab,
    sequencer: Sequencer<MidiOutputDevice>,
    midi_client: String,

    // UI state
    available_midi_ports: Vec<String>,
    selected_port: Option<usize>,
    status: &'static str,

    balls: BallField,
    ball_interval: Duration,
    last_ball_tick: Instant,
    _audio_output: AudioOutput,
}

#[cfg(feature = "gui")]
impl DemoApp {
    fn new(config: &Config) -> Self {
        let midi_client = config.midi.client_name.clone();
        let available_midi_ports = MidiOutputDevice::available_ports(&midi_client);

        let mut device = MidiOutputDevice::new(midi_client.as_str());
        let mut selected_port = None;
        if !available_midi_ports.is_empty() {
            match device.connect_preferred(config.midi.output_port.as_deref()) {
                Ok(()) => {
                    selected_port = device
                        .port_name()
                        .and_then(|name| available_midi_ports.iter().position(|p| p == name));
                }
                Err(e) => log::warn!("{}", e),
            }
        }

        let audio_output = AudioOutput::default();
        let area = Bounds::new(config.balls.width, config.balls.height);
        let mut balls =
            BallField::with_random_balls(area, config.balls.count, &mut rand::thread_rng());
        balls.add_listener(audio_output.chime());

        Self {
            tab: Tab::Sequencer,
            sequencer: Sequencer::from_config(device, config),
            midi_client,
            available_midi_ports,
            selected_port,
            status: "Ready...",
            balls,
            ball_interval: Duration::from_millis(config.balls.timer_ms),
            last_ball_tick: Instant::now(),
            _audio_output: audio_output,
        }
    }

    fn handle_playback_events(&mut self) {
        for event in self.sequencer.poll_events() {
            match event {
                PlaybackEvent::StepAdvanced(step) => log::trace!("step {}", step),
            }
        }
    }

    fn advance_balls(&mut self) {
        // Catch up on missed timer ticks, but never more than a few per frame
        let mut ticks = 0;
        while self.last_ball_tick.elapsed() >= self.ball_interval && ticks < 4 {
            self.balls.tick();
            self.last_ball_tick += self.ball_interval;
            ticks += 1;
        }
        if self.last_ball_tick.elapsed() >= self.ball_interval {
            self.last_ball_tick = Instant::now();
        }
    }

    fn select_port(&mut self, port_idx: usize) {
        let result = self.sequencer.with_sink(|device| device.connect(port_idx));
        match result {
            Ok(()) => self.selected_port = Some(port_idx),
            Err(e) => {
                log::warn!("{}", e);
                self.available_midi_ports = MidiOutputDevice::available_ports(&self.midi_client);
            }
        }
    }

    fn sequencer_ui(&mut self, ui: &mut egui::Ui) {
        // MIDI Port Selection
        let mut selected_port_changed = None;
        ui.horizontal(|ui| {
            ui.label("MIDI Output:");
            if self.available_midi_ports.is_empty() {
                ui.label("No MIDI ports available");
            } else {
                egui::ComboBox::from_id_source("midi_output")
                    .selected_text(
                        self.selected_port
                            .and_then(|i| self.available_midi_ports.get(i))
                            .map(String::as_str)
                            .unwrap_or("Select port..."),
                    )
                    .show_ui(ui, |ui| {
                        for (i, port_name) in self.available_midi_ports.iter().enumerate() {
                            if ui
                                .selectable_label(self.selected_port == Some(i), port_name)
                                .clicked()
                            {
                                selected_port_changed = Some(i);
                            }
                        }
                    });
            }
        });

        if let Some(port_idx) = selected_port_changed {
            self.select_port(port_idx);
        }

        ui.add_space(10.0);

        // Transport controls
        ui.horizontal(|ui| {
            if ui.button("▶ Play").clicked() {
                match self.sequencer.start() {
                    Ok(()) => self.status = "Playing",
                    Err(e) => log::error!("Could not start transport: {}", e),
                }
            }
            if ui.button("■ Stop").clicked() {
                self.sequencer.stop();
                self.status = "Stopped";
            }

            ui.add_space(20.0);

            ui.label("BPM:");
            let mut bpm = self.sequencer.bpm();
            if ui
                .add(egui::Slider::new(&mut bpm, 60.0..=180.0).step_by(1.0))
                .changed()
            {
                self.sequencer.set_bpm(bpm);
            }
        });

        ui.add_space(10.0);

        // Melodic slots
        ui.horizontal(|ui| {
            ui.label("Notes:");
            for slot in 0..8 {
                let mut pitch = self.sequencer.slot(slot).unwrap_or(0);
                ui.vertical(|ui| {
                    if ui
                        .add(egui::DragValue::new(&mut pitch).clamp_range(0..=127))
                        .changed()
                    {
                        self.sequencer.set_slot(slot, pitch);
                    }
                    ui.small(midi_note_name(pitch));
                });
            }
        });

        ui.label(self.status);
        ui.add_space(10.0);

        // Step grid
        let current = self.sequencer.current_position();
        let is_playing = self.sequencer.is_playing();
        let pattern = self.sequencer.pattern();
        for lane in Lane::ALL {
            ui.horizontal(|ui| {
                ui.add_sized([70.0, 20.0], egui::Label::new(lane.name()));
                for step in 0..16 {
                    let is_current = is_playing && current == step;
                    let step_enabled = pattern.drums().get(lane.index(), step);

                    let button = egui::Button::new(format!("{}", step + 1))
                        .min_size(egui::vec2(24.0, 20.0))
                        .fill(if is_current {
                            egui::Color32::WHITE
                        } else if step_enabled {
                            egui::Color32::from_rgb(60, 60, 200)
                        } else {
                            egui::Color32::from_rgb(173, 216, 230)
                        });

                    if ui.add(button).clicked() {
                        self.sequencer.toggle_step(lane, step);
                    }
                }
            });
        }

        ui.add_space(10.0);

        // Voices and volumes
        ui.horizontal(|ui| {
            let mut melodic = self.sequencer.melodic_enabled();
            let label = if melodic { "Synthesizer On" } else { "Synthesizer Off" };
            if ui.toggle_value(&mut melodic, label).changed() {
                self.sequencer.set_melodic_enabled(melodic);
            }

            let mut drums = self.sequencer.drums_enabled();
            let label = if drums { "Step Sequencer On" } else { "Step Sequencer Off" };
            if ui.toggle_value(&mut drums, label).changed() {
                self.sequencer.set_drums_enabled(drums);
            }
        });

        ui.horizontal(|ui| {
            ui.label("Volumes:");
            let mut volume = self.sequencer.melodic_volume();
            if ui.add(egui::Slider::new(&mut volume, 0.0..=1.0).text("synth")).changed() {
                self.sequencer.set_melodic_volume(volume);
            }
            let mut volume = self.sequencer.step_volume();
            if ui.add(egui::Slider::new(&mut volume, 0.0..=1.0).text("steps")).changed() {
                self.sequencer.set_step_volume(volume);
            }
        });

        // Info
        ui.separator();
        ui.label("Click steps to enable/disable them");
        if self.selected_port.is_none() {
            ui.colored_label(
                egui::Color32::YELLOW,
                "⚠ No MIDI output connected - playback is silent",
            );
        }
    }

    fn balls_ui(&mut self, ui: &mut egui::Ui) {
        let (response, painter) = ui.allocate_painter(ui.available_size(), egui::Sense::hover());
        let rect = response.rect;
        self.balls.set_area(Bounds::new(rect.width(), rect.height()));

        for ball in self.balls.balls() {
            let radius = (ball.size - 2.0) / 2.0;
            let center = rect.min + egui::vec2(ball.x + ball.size / 2.0, ball.y + ball.size / 2.0);
            let c = ball.colour;
            painter.circle_filled(
                center,
                radius,
                egui::Color32::from_rgba_unmultiplied(c.r, c.g, c.b, c.a),
            );
        }
    }
}

#[cfg(feature = "gui")]
impl eframe::App for DemoApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        self.handle_playback_events();
        self.advance_balls();

        egui::TopBottomPanel::top("tabs").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.selectable_value(&mut self.tab, Tab::Sequencer, "Sequencer");
                ui.selectable_value(&mut self.tab, Tab::Balls, "Bouncing Balls");
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| match self.tab {
            Tab::Sequencer => self.sequencer_ui(ui),
            Tab::Balls => self.balls_ui(ui),
        });
    }
}
