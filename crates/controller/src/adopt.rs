//! Adoption document: who this controller is and what it accepts.
//!
//! Published retained on every connect so a hub can discover the device and
//! render forms for its config and command documents.

use serde_json::{json, Map, Value};

use ledc_core::MAX_WIDTH;

const JSON_SCHEMA_VERSION: &str = "http://json-schema.org/draft-07/schema#";
const FIRMWARE_NAME: &str = "LED Controller";
const FIRMWARE_MAKER: &str = "ledc";

pub struct AdoptInfo<'a> {
    pub client_id: &'a str,
    pub broker: &'a str,
    /// I2C addresses of the PWM drivers that answered.
    pub drivers: &'a [u8],
    pub controllers: u8,
    pub channels_per_controller: u8,
}

pub fn document(info: &AdoptInfo<'_>) -> Value {
    json!({
        "firmware": {
            "name": FIRMWARE_NAME,
            "shortName": env!("CARGO_PKG_NAME"),
            "maker": FIRMWARE_MAKER,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "network": {
            "clientId": info.client_id,
            "broker": info.broker,
        },
        "i2c": { "pca9685": info.drivers },
        "configSchema": config_schema(info),
        "commandSchema": command_schema(info),
    })
}

fn integer(title: &str, min: i64, max: i64) -> Value {
    json!({ "title": title, "type": "integer", "minimum": min, "maximum": max })
}

fn config_schema(info: &AdoptInfo<'_>) -> Value {
    let mut properties = Map::new();
    properties.insert(
        "channels".into(),
        json!({
            "title": "Channels",
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "controller": integer("Controller", 1, i64::from(info.controllers)),
                    "strip": integer("Channel", 1, i64::from(info.channels_per_controller)),
                    "count": integer("Width", 1, MAX_WIDTH as i64),
                },
                "required": ["strip", "count"],
            },
        }),
    );
    properties.insert("fadeIntervalUs".into(), json!({ "title": "Fade step interval (us)", "type": "integer", "minimum": 0 }));
    properties.insert("fadeDurationMs".into(), json!({ "title": "Default fade duration (ms)", "type": "integer", "minimum": 0 }));
    properties.insert(
        "groups".into(),
        json!({
            "title": "Group Definitions",
            "description": "Define groups of outputs that can be controlled together.",
            "type": "object",
            "additionalProperties": { "type": "array", "items": { "type": "integer" } },
        }),
    );

    if !info.drivers.is_empty() {
        let devices: Map<String, Value> = info
            .drivers
            .iter()
            .map(|addr| {
                let key = format!("0x{:02X}", addr);
                let device = json!({
                    "title": format!("Device at {}", key),
                    "type": "array",
                    "items": { "type": "integer", "default": 0 },
                });
                (key, device)
            })
            .collect();
        properties.insert(
            "i2c".into(),
            json!({
                "title": "I2C Device Configuration",
                "type": "object",
                "properties": {
                    "pca9685": { "title": "PCA9685 Output Mapping", "type": "object", "properties": devices },
                },
            }),
        );
    }

    json!({
        "$schema": JSON_SCHEMA_VERSION,
        "title": env!("CARGO_PKG_NAME"),
        "type": "object",
        "properties": properties,
    })
}

fn command_schema(info: &AdoptInfo<'_>) -> Value {
    let outputs = i64::from(info.controllers) * i64::from(info.channels_per_controller);
    let state = json!({ "title": "State", "type": "string", "enum": ["on", "off"] });
    json!({
        "$schema": JSON_SCHEMA_VERSION,
        "title": env!("CARGO_PKG_NAME"),
        "type": "object",
        "properties": {
            "channels": {
                "title": "Channels",
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "controller": integer("Controller", 1, i64::from(info.controllers)),
                        "strip": integer("Channel", 1, i64::from(info.channels_per_controller)),
                        "state": state.clone(),
                        "brightness": integer("Brightness", 0, 100),
                        "colour": {
                            "title": "Colour",
                            "type": "array",
                            "maxItems": MAX_WIDTH,
                            "items": integer("Lane", 0, 255),
                        },
                        "fadeIntervalUs": { "title": "Fade step interval (us)", "type": "integer", "minimum": 0 },
                        "fade": { "title": "Fade (ms)", "type": "integer", "minimum": 0 },
                    },
                    "required": ["strip"],
                },
            },
            "group": { "title": "Group", "type": "string" },
            "output": integer("Output", 1, outputs),
            "state": state,
            "brightness": integer("Brightness", 0, 100),
            "fade": { "title": "Fade (ms)", "type": "integer", "minimum": 0 },
            "restart": { "title": "Restart", "type": "boolean" },
        },
    })
}
