use serde_json::Value;
use tracing::{debug, info, warn};

use ledc_core::{FadeEngine, Layout, PwmDriver, Router, StatusEvent, TopicKind, PCA9685_CHANNELS};
use ledc_mqtt::{DisconnectReason, Dispatch, Publisher, SessionHandler};

use crate::adopt::{self, AdoptInfo};
use crate::settings::ControllerSettings;

/// The control core: router and fade engine behind the session's hooks.
pub struct Controller {
    engine: FadeEngine,
    router: Router,
    pwm: Box<dyn PwmDriver>,
    drivers: Vec<u8>,
    broker: String,
    now_ms: u64,
    restart: bool,
}

impl Controller {
    pub fn new(settings: &ControllerSettings, pwm: Box<dyn PwmDriver>, drivers: Vec<u8>, broker: String) -> Self {
        let layout = Layout::new(settings.controllers, settings.channels_per_controller);
        let router = match settings.default_fade_ms {
            Some(ms) => Router::new(ms),
            None => Router::default(),
        };
        Self {
            engine: FadeEngine::new(layout, settings.resolution, PCA9685_CHANNELS),
            router,
            pwm,
            drivers,
            broker,
            now_ms: 0,
            restart: false,
        }
    }

    pub fn engine(&self) -> &FadeEngine {
        &self.engine
    }

    /// Clock for commands routed during the next session tick.
    pub fn set_clock(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
    }

    /// Advance every fade and return the outputs that settled.
    pub fn tick(&mut self, now_ms: u64) -> Vec<StatusEvent> {
        self.now_ms = now_ms;
        self.engine.tick(now_ms, self.pwm.as_mut())
    }

    pub fn apply_config(&mut self, doc: &Value) -> bool {
        match self.router.handle_config(doc, &mut self.engine) {
            Ok(report) => {
                for err in &report.rejected {
                    warn!(error = %err, "channel config rejected");
                }
                true
            }
            Err(err) => {
                warn!(error = %err, "ignoring config document");
                false
            }
        }
    }

    pub fn apply_command(&mut self, doc: &Value) -> bool {
        match self.router.handle_command(doc, &mut self.engine, self.now_ms) {
            Ok(report) => {
                debug!(fades = ?report.fades, rejected = report.rejected.len(), "command applied");
                if report.restart {
                    info!("restart requested");
                    self.restart = true;
                }
                true
            }
            Err(err) => {
                warn!(error = %err, "ignoring command document");
                false
            }
        }
    }

    /// True once after a restart command arrived.
    pub fn take_restart(&mut self) -> bool {
        std::mem::take(&mut self.restart)
    }
}

impl SessionHandler for Controller {
    fn on_connected(&mut self, session: &mut dyn Publisher) {
        let compat = session.topics().compat_command();
        if let Err(err) = session.subscribe(&compat) {
            warn!(topic = %compat, error = %err, "subscribe failed");
        }

        let layout = self.engine.layout();
        let doc = adopt::document(&AdoptInfo {
            client_id: session.topics().client_id(),
            broker: &self.broker,
            drivers: &self.drivers,
            controllers: layout.controllers,
            channels_per_controller: layout.channels_per_controller,
        });
        if let Err(err) = session.publish_kind(TopicKind::Adopt, &doc) {
            warn!(error = %err, "could not publish adoption info");
        }

        // Retained status may be stale after an outage.
        publish_events(session, TopicKind::Status, &self.engine.snapshot());
    }

    fn on_disconnected(&mut self, reason: DisconnectReason) {
        warn!(code = reason.code(), %reason, "MQTT disconnected");
    }

    fn on_config(&mut self, doc: &Value) -> Dispatch {
        if self.apply_config(doc) {
            Dispatch::Handled
        } else {
            Dispatch::Rejected
        }
    }

    fn on_command(&mut self, doc: &Value) -> Dispatch {
        if self.apply_command(doc) {
            Dispatch::Handled
        } else {
            Dispatch::Rejected
        }
    }
}

/// Publish one document per event; dropped quietly while offline.
pub fn publish_events(session: &mut dyn Publisher, kind: TopicKind, events: &[StatusEvent]) {
    if !session.is_connected() {
        if !events.is_empty() {
            debug!(count = events.len(), %kind, "offline; not publishing");
        }
        return;
    }
    for event in events {
        let result = serde_json::to_value(event).map_err(Into::into).and_then(|doc| session.publish_kind(kind, &doc));
        if let Err(err) = result {
            warn!(output = event.output, error = %err, "publish failed");
        }
    }
}
