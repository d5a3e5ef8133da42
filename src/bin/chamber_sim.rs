use chamber::actuators::{labels, MAX_VENT_ANGLE};
use chamber::sim::{DropoutConfig, RecordingDriver, SensorHandle};
use chamber::telemetry::CsvSink;
use chamber::{ActuatorBank, ClimateController, ControlConfig, StatusSnapshot, SystemState, ThermalMode};
use clap::{App, Arg};
use colored::*;
use std::fs::{self, OpenOptions};
use std::io::BufWriter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PLANT_STEP_MS: u64 = 1000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("chamber-sim")
        .version("0.1.0")
        .author("Chamber Controls Team")
        .about("🍄 Chamber Simulator - climate control loop against a simulated growing chamber")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Controller configuration (JSON); missing keys take defaults")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("duration")
                .short("d")
                .long("duration")
                .value_name("SECONDS")
                .help("Stop after this many seconds (runs until Ctrl+C if omitted)")
                .takes_value(true)
                .validator(positive_number),
        )
        .arg(
            Arg::with_name("interval")
                .short("i")
                .long("interval")
                .value_name("SECONDS")
                .help("Status print interval")
                .takes_value(true)
                .default_value("5")
                .validator(positive_number),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["table", "json"])
                .default_value("table"),
        )
        .arg(
            Arg::with_name("temperature")
                .long("temperature")
                .value_name("CELSIUS")
                .help("Temperature setpoint")
                .takes_value(true)
                .validator(positive_number),
        )
        .arg(
            Arg::with_name("humidity")
                .long("humidity")
                .value_name("PERCENT")
                .help("Relative humidity setpoint")
                .takes_value(true)
                .validator(positive_number),
        )
        .arg(
            Arg::with_name("co2-max")
                .long("co2-max")
                .value_name("PPM")
                .help("CO2 level that starts venting")
                .takes_value(true)
                .validator(positive_number),
        )
        .arg(
            Arg::with_name("active")
                .short("a")
                .long("active")
                .help("Start regulating immediately instead of waiting in standby"),
        )
        .arg(
            Arg::with_name("dropouts")
                .long("dropouts")
                .help("Randomly drop sensor reads"),
        )
        .arg(
            Arg::with_name("log-csv")
                .long("log-csv")
                .value_name("FILE")
                .help("Append periodic log rows to a CSV file")
                .takes_value(true),
        )
        .get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("{}", "🍄 Chamber Climate Simulator".bright_blue().bold());
    println!("{}", "============================".bright_blue());

    let config = match matches.value_of("config") {
        Some(path) => ControlConfig::from_json(&fs::read_to_string(path)?)?,
        None => ControlConfig::default(),
    };

    let sensors = SensorHandle::new();
    if matches.is_present("dropouts") {
        sensors.set_dropout(DropoutConfig { enabled: true, ..DropoutConfig::default() });
    }

    let mut controller = ClimateController::new(
        config,
        sensors.sensors(),
        ActuatorBank::chamber(RecordingDriver::default()),
    )?;
    if let Some(path) = matches.value_of("log-csv") {
        let has_header = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
        let out = BufWriter::new(OpenOptions::new().create(true).append(true).open(path)?);
        let sink = if has_header { CsvSink::without_header(out) } else { CsvSink::new(out) };
        controller = controller.with_log_sink(sink);
        info!(path, appending = has_header, "logging to CSV");
    }
    let controller = Arc::new(controller);

    if let Some(v) = parse_arg(&matches, "temperature") {
        controller.set_temperature(v)?;
    }
    if let Some(v) = parse_arg(&matches, "humidity") {
        controller.set_humidity(v)?;
    }
    if let Some(v) = parse_arg(&matches, "co2-max") {
        controller.set_co2_max(v)?;
    }

    controller.start()?;
    if matches.is_present("active") {
        controller.set_system_state("active")?;
    }

    let format = matches.value_of("format").unwrap_or("table").to_string();
    let print_every = Duration::from_secs_f64(parse_arg(&matches, "interval").unwrap_or(5.0));
    let deadline = parse_arg(&matches, "duration").map(Duration::from_secs_f64);

    let plant = tokio::spawn(run_plant(Arc::clone(&controller), sensors.clone()));
    let printer = tokio::spawn(print_status(Arc::clone(&controller), print_every, format));

    match deadline {
        Some(limit) => {
            tokio::select! {
                _ = time::sleep(limit) => info!("duration elapsed"),
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("interrupted");
        }
    }

    plant.abort();
    printer.abort();
    if let Err(e) = controller.stop().await {
        warn!(error = %e, "stop reported an error");
    }

    print_table(&controller.status());
    let errors = controller.errors();
    if !errors.is_empty() {
        println!("\n{}", "Error log".bright_white().bold());
        for record in errors {
            println!("  {} {}", record.timestamp.format("%H:%M:%S").to_string().dimmed(), record.message.bright_red());
        }
    }
    println!("{} {}", "✅".green(), "Simulation finished".bright_green());
    Ok(())
}

fn positive_number(v: String) -> Result<(), String> {
    match v.parse::<f64>() {
        Ok(n) if n.is_finite() && n > 0.0 => Ok(()),
        _ => Err("Must be a positive number".into()),
    }
}

fn parse_arg(matches: &clap::ArgMatches<'_>, name: &str) -> Option<f64> {
    matches.value_of(name).and_then(|v| v.parse().ok())
}

/// Crude first-order chamber: the thermal stage and ambient leakage move the
/// interior temperature, the humidifier and vents move humidity, respiration
/// raises CO2 and the vents pull it back down.
async fn run_plant(controller: Arc<ClimateController>, sensors: SensorHandle) {
    let mut ticker = time::interval(Duration::from_millis(PLANT_STEP_MS));
    loop {
        ticker.tick().await;
        let status = controller.status();
        let outputs = &status.actuators;
        let vent = outputs.vent_angle / MAX_VENT_ANGLE;

        sensors.update(|s| {
            let ambient = s.probes.get("Probe3").copied().flatten().unwrap_or(22.0);
            let interior = s.humidity_temp;
            let stage = if outputs.thermal.enabled {
                match outputs.thermal.mode {
                    ThermalMode::Heat => 0.08 * outputs.thermal.duty,
                    ThermalMode::Cool => -0.08 * outputs.thermal.duty,
                    ThermalMode::Off => 0.0,
                }
            } else {
                0.0
            };
            let next = interior + stage + 0.01 * (ambient - interior) + 0.02 * vent * (ambient - interior);
            s.humidity_temp = next;
            s.probes.insert("Probe2".to_string(), Some(next));
            s.probes.insert("Probe1".to_string(), Some(next + 20.0 * outputs.thermal.duty));

            let mut rh = s.humidity;
            if outputs.is_on(labels::HUMIDIFIER) {
                rh += 0.4;
            }
            rh -= 0.5 * vent;
            if outputs.thermal.mode == ThermalMode::Cool && outputs.thermal.enabled {
                rh -= 0.1 * outputs.thermal.duty;
            }
            s.humidity = (rh + 0.02).clamp(20.0, 100.0);

            s.co2 = (s.co2 + 1.5 - 12.0 * vent).max(420.0);
        });
    }
}

async fn print_status(controller: Arc<ClimateController>, every: Duration, format: String) {
    let mut ticker = time::interval(every);
    loop {
        ticker.tick().await;
        let status = controller.status();
        if format == "json" {
            match serde_json::to_string(&status) {
                Ok(text) => println!("{text}"),
                Err(e) => warn!(error = %e, "status not serializable"),
            }
        } else {
            print_table(&status);
        }
    }
}

fn reading(v: Option<f64>, unit: &str) -> String {
    v.map_or_else(|| "   --".to_string(), |v| format!("{v:>6.1}{unit}"))
}

fn print_table(status: &StatusSnapshot) {
    let state = match status.state {
        SystemState::Active => status.state.as_str().green(),
        SystemState::Standby => status.state.as_str().yellow(),
        SystemState::Error => status.state.as_str().red(),
    };
    let r = &status.readings;
    let a = &status.actuators;
    let temp = reading(r.interior_temperature(), "°C");
    let temp = match r.interior_temperature() {
        Some(t) if (t - status.setpoints.temperature).abs() > 2.0 => temp.yellow(),
        _ => temp.white(),
    };
    let thermal = format!("{} {:>3.0}%", a.thermal.mode.as_str(), a.thermal.duty * 100.0);
    let thermal = if status.regulators.safety.tripped { thermal.red() } else { thermal.cyan() };

    println!("┌──────────────────────────────────────────────────────────────┐");
    println!(
        "│ {} {:<8} uptime {:>6}s  photo {:<5} sensor failures {:<2} │",
        "State".bright_white().bold(),
        state,
        status.uptime_secs,
        status.photo_mode,
        status.sensor_failures,
    );
    println!(
        "│ temp {} (sp {:>5.1})  rh {} (sp {:>5.1})  co2 {} │",
        temp,
        status.setpoints.temperature,
        reading(r.humidity, "%"),
        status.setpoints.humidity,
        reading(r.co2, ""),
    );
    println!(
        "│ thermal {}  humidifier {:<5}  vent {:>3.0}°  phase {:<12} │",
        thermal,
        a.is_on(labels::HUMIDIFIER),
        a.vent_angle,
        status.regulators.humidity_phase,
    );
    println!(
        "│ light {:<8} {:>3.0}%  schedule {:<12} errors {:<3}              │",
        a.light.color.as_str(),
        a.light.brightness * 100.0,
        status.regulators.active_light_entry.as_deref().unwrap_or("None"),
        status.error_count,
    );
    println!("└──────────────────────────────────────────────────────────────┘");
    let safety = &status.regulators.safety;
    if safety.trip_count > 0 {
        println!(
            "{} {} trip(s), worst probe reading {}",
            "thermal limit:".red().bold(),
            safety.trip_count,
            reading(safety.worst_reading, "°C"),
        );
    }
}
