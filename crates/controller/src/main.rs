use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use dotenvy::dotenv;
use ledc_core::{PwmDriver, TopicKind};
use ledc_mqtt::{MqttConfig, RumqttTransport, Session};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod adopt;
mod app;
mod pwm;
mod settings;

use app::{publish_events, Controller};
use settings::ControllerSettings;

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let mqtt_cfg = MqttConfig::from_env();
    let mut settings = ControllerSettings::from_env();
    info!(
        host = %mqtt_cfg.host,
        port = mqtt_cfg.port,
        client_id = %mqtt_cfg.client_id,
        controllers = settings.controllers,
        channels = settings.channels_per_controller,
        "starting LED controller"
    );

    let (pwm, drivers) = open_pwm(&mut settings)?;
    let broker = format!("{}:{}", mqtt_cfg.host, mqtt_cfg.port);
    let mut controller = Controller::new(&settings, pwm, drivers, broker);

    if let Some(path) = &settings.config_file {
        let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let doc: serde_json::Value = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        if controller.apply_config(&doc) {
            info!(path = %path.display(), "startup config applied");
        }
    }

    let transport = RumqttTransport::new(&mqtt_cfg).context("building MQTT runtime")?;
    let mut session = Session::new(transport, mqtt_cfg);

    let started = Instant::now();
    let interval = Duration::from_millis(settings.loop_interval_ms);
    let telemetry_ms = settings.telemetry_secs.saturating_mul(1000);
    let mut last_telemetry = 0;

    loop {
        let now = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        controller.set_clock(now);
        session.tick(now, &mut controller);

        let events = controller.tick(now);
        publish_events(&mut session, TopicKind::Status, &events);

        if telemetry_ms > 0 && now.saturating_sub(last_telemetry) >= telemetry_ms {
            last_telemetry = now;
            publish_events(&mut session, TopicKind::Telemetry, &controller.engine().snapshot());
        }

        if controller.take_restart() {
            info!("restarting on command");
            session.disconnect();
            break;
        }

        thread::sleep(interval);
    }

    Ok(())
}

#[cfg(not(feature = "rpi"))]
fn open_pwm(_settings: &mut ControllerSettings) -> anyhow::Result<(Box<dyn PwmDriver>, Vec<u8>)> {
    warn!("built without hardware support; duty writes are logged at trace level");
    Ok((Box::new(pwm::TracingPwm::default()), Vec::new()))
}

#[cfg(feature = "rpi")]
fn open_pwm(settings: &mut ControllerSettings) -> anyhow::Result<(Box<dyn PwmDriver>, Vec<u8>)> {
    if settings.resolution != ledc_core::Resolution::Bits12 {
        warn!("PCA9685 drivers are 12-bit; ignoring LEDC_RESOLUTION_BITS");
        settings.resolution = ledc_core::Resolution::Bits12;
    }
    let bank = pwm::rpi::open(settings.controllers, settings.pwm_frequency_hz)?;
    let drivers = bank.addresses();
    Ok((Box::new(bank), drivers))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,rumqttc=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
