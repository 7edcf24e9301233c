use serde::{Deserialize, Serialize};

use super::Parameter;

/// Key of the single configuration record.
pub const DEFAULT_CONFIG_ID: &str = "default";

/// Factory bus address of the analyzer.
pub const DEFAULT_I2C_ADDR: u8 = 0x10;

/// The single "default" configuration record.
///
/// Reagent levels are in mL. `reagent_remain_*` is maintained by the
/// executor: decremented by `reagent_use_*` after each successful test and
/// reset to `reagent_start_*` by a successful flush. `waste_remaining` only
/// grows until the operator empties the tank and writes it back down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub id: String,
    pub i2c_addr: u8,

    pub enable_ca: bool,
    pub enable_alk: bool,
    pub enable_mg: bool,
    pub enable_no3: bool,
    pub enable_po4: bool,

    pub schedule_ca: String,
    pub schedule_alk: String,
    pub schedule_mg: String,
    pub schedule_no3: String,
    pub schedule_po4: String,

    pub reagent_use_ca: f32,
    pub reagent_use_alk: f32,
    pub reagent_use_mg: f32,
    pub reagent_use_no3: f32,
    pub reagent_use_po4: f32,

    pub reagent_start_ca: f32,
    pub reagent_start_alk: f32,
    pub reagent_start_mg: f32,
    pub reagent_start_no3: f32,
    pub reagent_start_po4: f32,

    pub reagent_remain_ca: f32,
    pub reagent_remain_alk: f32,
    pub reagent_remain_mg: f32,
    pub reagent_remain_no3: f32,
    pub reagent_remain_po4: f32,

    pub waste_threshold: f32,
    pub waste_remaining: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: DEFAULT_CONFIG_ID.to_string(),
            i2c_addr: DEFAULT_I2C_ADDR,
            enable_ca: false,
            enable_alk: false,
            enable_mg: false,
            enable_no3: false,
            enable_po4: false,
            schedule_ca: String::new(),
            schedule_alk: String::new(),
            schedule_mg: String::new(),
            schedule_no3: String::new(),
            schedule_po4: String::new(),
            reagent_use_ca: 0.0,
            reagent_use_alk: 0.0,
            reagent_use_mg: 0.0,
            reagent_use_no3: 0.0,
            reagent_use_po4: 0.0,
            reagent_start_ca: 0.0,
            reagent_start_alk: 0.0,
            reagent_start_mg: 0.0,
            reagent_start_no3: 0.0,
            reagent_start_po4: 0.0,
            reagent_remain_ca: 0.0,
            reagent_remain_alk: 0.0,
            reagent_remain_mg: 0.0,
            reagent_remain_no3: 0.0,
            reagent_remain_po4: 0.0,
            waste_threshold: 0.0,
            waste_remaining: 0.0,
        }
    }
}

impl Config {
    pub fn enabled(&self, p: Parameter) -> bool {
        match p {
            Parameter::Ca => self.enable_ca,
            Parameter::Alk => self.enable_alk,
            Parameter::Mg => self.enable_mg,
            Parameter::No3 => self.enable_no3,
            Parameter::Po4 => self.enable_po4,
        }
    }

    pub fn schedule(&self, p: Parameter) -> &str {
        match p {
            Parameter::Ca => &self.schedule_ca,
            Parameter::Alk => &self.schedule_alk,
            Parameter::Mg => &self.schedule_mg,
            Parameter::No3 => &self.schedule_no3,
            Parameter::Po4 => &self.schedule_po4,
        }
    }

    pub fn reagent_use(&self, p: Parameter) -> f32 {
        match p {
            Parameter::Ca => self.reagent_use_ca,
            Parameter::Alk => self.reagent_use_alk,
            Parameter::Mg => self.reagent_use_mg,
            Parameter::No3 => self.reagent_use_no3,
            Parameter::Po4 => self.reagent_use_po4,
        }
    }

    pub fn reagent_start(&self, p: Parameter) -> f32 {
        match p {
            Parameter::Ca => self.reagent_start_ca,
            Parameter::Alk => self.reagent_start_alk,
            Parameter::Mg => self.reagent_start_mg,
            Parameter::No3 => self.reagent_start_no3,
            Parameter::Po4 => self.reagent_start_po4,
        }
    }

    pub fn reagent_remain(&self, p: Parameter) -> f32 {
        match p {
            Parameter::Ca => self.reagent_remain_ca,
            Parameter::Alk => self.reagent_remain_alk,
            Parameter::Mg => self.reagent_remain_mg,
            Parameter::No3 => self.reagent_remain_no3,
            Parameter::Po4 => self.reagent_remain_po4,
        }
    }

    pub fn set_reagent_remain(&mut self, p: Parameter, value: f32) {
        let slot = match p {
            Parameter::Ca => &mut self.reagent_remain_ca,
            Parameter::Alk => &mut self.reagent_remain_alk,
            Parameter::Mg => &mut self.reagent_remain_mg,
            Parameter::No3 => &mut self.reagent_remain_no3,
            Parameter::Po4 => &mut self.reagent_remain_po4,
        };
        *slot = value;
    }
}

/// The configuration as served by `GET /config`: the persisted record merged
/// with the calibration factors read live from the device. Factors are
/// device-resident and never authoritative here; a factor the device could
/// not serve is simply omitted.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedConfig {
    #[serde(flatten)]
    pub config: Config,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pump_calibration: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_ca: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_alk: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_mg: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_no3: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_po4: Option<f32>,
}

impl RenderedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            pump_calibration: None,
            calibration_ca: None,
            calibration_alk: None,
            calibration_mg: None,
            calibration_no3: None,
            calibration_po4: None,
        }
    }

    pub fn set_calibration(&mut self, p: Parameter, factor: f32) {
        let slot = match p {
            Parameter::Ca => &mut self.calibration_ca,
            Parameter::Alk => &mut self.calibration_alk,
            Parameter::Mg => &mut self.calibration_mg,
            Parameter::No3 => &mut self.calibration_no3,
            Parameter::Po4 => &mut self.calibration_po4,
        };
        *slot = Some(factor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_the_factory_address() {
        let cfg = Config::default();
        assert_eq!(cfg.id, DEFAULT_CONFIG_ID);
        assert_eq!(cfg.i2c_addr, 0x10);
        assert!(!cfg.enabled(Parameter::Ca));
        assert_eq!(cfg.schedule(Parameter::Po4), "");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"enable_ca":true,"schedule_ca":"FREQ=DAILY"}"#)
            .unwrap();
        assert!(cfg.enable_ca);
        assert_eq!(cfg.schedule_ca, "FREQ=DAILY");
        assert_eq!(cfg.i2c_addr, DEFAULT_I2C_ADDR);
    }

    #[test]
    fn rendered_config_flattens_and_omits_missing_factors() {
        let mut rendered = RenderedConfig::new(Config::default());
        rendered.pump_calibration = Some(1.25);
        rendered.set_calibration(Parameter::Mg, 0.98);

        let json = serde_json::to_value(&rendered).unwrap();
        assert_eq!(json["i2c_addr"], 0x10);
        assert_eq!(json["pump_calibration"], 1.25);
        assert!((json["calibration_mg"].as_f64().unwrap() - 0.98).abs() < 1e-6);
        assert!(json.get("calibration_ca").is_none());
    }
}
