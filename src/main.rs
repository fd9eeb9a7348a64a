//! `websonar` CLI: runs the sonar on the sound card, or on a simulated
//! loopback, and logs what each frame sees.

#[cfg(not(target_arch = "wasm32"))]
mod cli {
    use std::{
        path::PathBuf,
        sync::Arc,
        thread,
        time::{Duration, Instant},
    };

    use anyhow::{bail, Context, Result};
    use clap::Parser;
    use log::{info, warn};
    use websonar::{
        config::{load_config, save_config},
        correlator::SonarFactory,
        logging, params,
        simulation::{EchoPath, LoopbackBackend},
        AudioBackend, ClutterFilterMode, SonarConfig, SonarController,
    };

    #[derive(Parser)]
    #[command(name = "websonar", about = "Audio FMCW-style sonar with range-Doppler output")]
    struct Cli {
        /// YAML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write the effective configuration to this file and exit
        #[arg(long)]
        write_config: Option<PathBuf>,
        /// Print the derived radar parameters as YAML and exit
        #[arg(long)]
        print_parameters: bool,
        /// Use a simulated loopback instead of the sound card
        #[arg(long)]
        simulate: bool,
        /// Sample rate of the simulated devices, Hz
        #[arg(long, default_value_t = 44100.0)]
        sample_rate: f32,
        /// Delay of the simulated echo, samples
        #[arg(long, default_value_t = 40)]
        echo_delay: usize,
        /// Gain of the simulated echo
        #[arg(long, default_value_t = 0.5)]
        echo_gain: f32,
        /// Number of frames to process before exiting
        #[arg(long, default_value_t = 20)]
        frames: u64,
        #[arg(long, allow_hyphen_values = true)]
        bandwidth_index: Option<i32>,
        /// Hz
        #[arg(long)]
        center_frequency: Option<f32>,
        #[arg(long)]
        pulse_length_index: Option<u32>,
        #[arg(long)]
        pulses: Option<usize>,
        /// Disable the slow-time taper
        #[arg(long)]
        no_window: bool,
        /// none, two-pulse, slow or remove-zero
        #[arg(long)]
        clutter_filter: Option<ClutterFilterMode>,
        /// Track the direct path and shift it to range 0
        #[arg(long)]
        range_offset: bool,
    }

    impl Cli {
        fn apply_overrides(&self, config: &mut SonarConfig) {
            let controls = &mut config.controls;
            if let Some(index) = self.bandwidth_index {
                controls.bandwidth_index = index;
            }
            if let Some(fc) = self.center_frequency {
                controls.center_frequency = fc;
            }
            if let Some(index) = self.pulse_length_index {
                controls.pulse_length_index = index;
            }
            if let Some(pulses) = self.pulses {
                controls.pulses_integrated = pulses;
            }
            if self.no_window {
                controls.apply_window = false;
            }
            if let Some(mode) = self.clutter_filter {
                controls.clutter_filter = mode;
            }
            if self.range_offset {
                controls.range_offset = true;
            }
        }
    }

    pub fn main() -> Result<()> {
        logging::init();
        let cli = Cli::parse();

        let mut config = match &cli.config {
            Some(path) => load_config(path).with_context(|| format!("loading {}", path.display()))?,
            None => SonarConfig::default(),
        };
        cli.apply_overrides(&mut config);

        if let Some(path) = &cli.write_config {
            save_config(&config, path).with_context(|| format!("writing {}", path.display()))?;
            info!("configuration written to {}", path.display());
            return Ok(());
        }

        if cli.simulate {
            let backend = LoopbackBackend::new(cli.sample_rate)
                .with_paths(vec![
                    EchoPath { delay: 0, gain: 0.2 },
                    EchoPath {
                        delay: cli.echo_delay,
                        gain: cli.echo_gain,
                    },
                ])
                .paced();
            run(backend, config, &cli)
        } else {
            run_device(config, &cli)
        }
    }

    #[cfg(feature = "native-audio")]
    fn run_device(config: SonarConfig, cli: &Cli) -> Result<()> {
        run(websonar::audio::CpalBackend::new()?, config, cli)
    }

    #[cfg(not(feature = "native-audio"))]
    fn run_device(_config: SonarConfig, _cli: &Cli) -> Result<()> {
        bail!("built without the native-audio feature, use --simulate")
    }

    fn run<B: AudioBackend>(backend: B, config: SonarConfig, cli: &Cli) -> Result<()> {
        if cli.print_parameters {
            let parameters = params::derive(&config.controls, backend.sample_rate()?, &config)?;
            print!("{}", serde_yaml::to_string(&parameters)?);
            return Ok(());
        }

        let frame_period = Duration::from_secs_f32(1.0 / config.frame_rate);
        let mut controller = SonarController::new(backend, Arc::new(SonarFactory), config);
        controller.start()?;
        if let Some(parameters) = controller.parameters() {
            info!(
                "range resolution {:.3} m, velocity resolution {:.3} m/s, CPI {:.3} s",
                parameters.metrics.range_resolution, parameters.metrics.velocity_resolution, parameters.metrics.cpi
            );
        }

        let mut seen = 0;
        let mut last_frame = Instant::now();
        while seen < cli.frames {
            thread::sleep(frame_period / 4);
            match controller.poll_frame() {
                Some(summary) => {
                    seen += 1;
                    last_frame = Instant::now();
                    match summary.strongest {
                        Some((range, velocity)) => info!(
                            "frame {}: input {}%, peak {:.3e}, strongest at {:.2} m, {:+.2} m/s",
                            summary.index, summary.input_level, summary.frame_peak, range, velocity
                        ),
                        None => info!("frame {}: input {}%, silent", summary.index, summary.input_level),
                    }
                }
                None if last_frame.elapsed() > frame_period * 20 => {
                    warn!("no frame for {:?}", last_frame.elapsed());
                    bail!("audio session stalled");
                }
                None => {}
            }
        }

        controller.stop()?;
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    cli::main()
}

#[cfg(target_arch = "wasm32")]
fn main() {}
