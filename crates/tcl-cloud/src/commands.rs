//! Desired-state patches for the air conditioner commands.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub const POWER_SWITCH: &str = "powerSwitch";
pub const TARGET_TEMPERATURE: &str = "targetTemperature";
pub const VERTICAL_DIRECTION: &str = "verticalDirection";
pub const HORIZONTAL_DIRECTION: &str = "horizontalDirection";
pub const FRESH_AIR_SWITCH: &str = "newWindSwitch";
pub const FRESH_AIR_MODE: &str = "newWindSetMode";
pub const FRESH_AIR_STRENGTH: &str = "newWindStrength";
pub const FRESH_AIR_AUTO_SWITCH: &str = "newWindAutoSwitch";

/// Louvre position the unit parks at when switched off.
const PARKED_LOUVRE: u8 = 8;

pub fn power_patch(on: bool) -> Map<String, Value> {
    let mut patch = Map::new();
    if on {
        patch.insert(POWER_SWITCH.into(), json!(1));
    } else {
        patch.insert(POWER_SWITCH.into(), json!(0));
        patch.insert(VERTICAL_DIRECTION.into(), json!(PARKED_LOUVRE));
        patch.insert(HORIZONTAL_DIRECTION.into(), json!(PARKED_LOUVRE));
    }
    patch
}

pub fn target_temperature_patch(celsius: f64) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert(TARGET_TEMPERATURE.into(), json!(celsius));
    patch
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshAirMode {
    Fresh,
    Breathing,
    Exhaust,
    Purification,
}

impl FreshAirMode {
    pub fn code(self) -> u8 {
        match self {
            FreshAirMode::Fresh => 1,
            FreshAirMode::Breathing => 2,
            FreshAirMode::Exhaust => 3,
            FreshAirMode::Purification => 4,
        }
    }
}

/// Fresh-air unit settings. Unset fields are left unchanged on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshAirCommand {
    pub switch: Option<bool>,
    pub mode: Option<FreshAirMode>,
    /// Fan strength, 1..=3.
    pub strength: Option<u8>,
    pub auto_switch: Option<bool>,
}

impl FreshAirCommand {
    /// `None` when the command would change nothing.
    ///
    /// Switching the unit off sends only the switch. A manual strength
    /// without an explicit auto setting turns auto mode off.
    pub fn patch(&self) -> Option<Map<String, Value>> {
        let mut patch = Map::new();
        if let Some(on) = self.switch {
            patch.insert(FRESH_AIR_SWITCH.into(), json!(u8::from(on)));
        }
        if self.switch != Some(false) {
            if let Some(mode) = self.mode {
                patch.insert(FRESH_AIR_MODE.into(), json!(mode.code()));
            }
            if let Some(strength) = self.strength {
                patch.insert(FRESH_AIR_STRENGTH.into(), json!(strength));
            }
            match (self.auto_switch, self.strength) {
                (Some(auto), _) => {
                    patch.insert(FRESH_AIR_AUTO_SWITCH.into(), json!(u8::from(auto)));
                }
                (None, Some(_)) => {
                    patch.insert(FRESH_AIR_AUTO_SWITCH.into(), json!(0));
                }
                (None, None) => {}
            }
        }
        (!patch.is_empty()).then_some(patch)
    }
}
