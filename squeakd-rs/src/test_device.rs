/* Synthetic test device definitions: JSON spec parsing and conversion into
 * a populated DeviceInfo.
 *
 * The format mirrors the JSON accepted by the Manager's LoadTestDevice
 * method so existing test scripts keep working. The module itself is
 * always compiled (the test driver and the test suite use it); only the
 * bus entry point is gated on the dev-hooks feature. */

use serde::Deserialize;

use crate::device::{
    ActionType, DeviceInfo, DeviceType, LedMode, ProfileCapability, ResolutionCapability,
};

/* ------------------------------------------------------------------ */
/* JSON DTOs                                                            */
/* ------------------------------------------------------------------ */

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestDeviceSpec {
    #[serde(default)]
    pub profiles: Vec<TestProfileSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestProfileSpec {
    pub name: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_disabled: bool,
    /// Polling rate in Hz.
    #[serde(default = "default_rate")]
    pub rate: u32,
    #[serde(default = "default_report_rates")]
    pub report_rates: Vec<u32>,
    /// Profile capability values (101..).
    #[serde(default)]
    pub capabilities: Vec<u32>,
    #[serde(default)]
    pub resolutions: Vec<TestResolutionSpec>,
    #[serde(default)]
    pub buttons: Vec<TestButtonSpec>,
    #[serde(default)]
    pub leds: Vec<TestLedSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestResolutionSpec {
    #[serde(default = "default_dpi")]
    pub xres: u32,
    #[serde(default = "default_dpi")]
    pub yres: u32,
    pub dpi_min: Option<u32>,
    pub dpi_max: Option<u32>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_disabled: bool,
    /// Resolution capability values (1 = separate x/y, 2 = disable).
    #[serde(default)]
    pub capabilities: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestButtonSpec {
    #[serde(default = "default_action_type")]
    pub action_type: String,
    #[serde(default)]
    pub button: u32,
    #[serde(default)]
    pub key: u32,
    #[serde(default)]
    pub special: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestLedSpec {
    #[serde(default)]
    pub mode: u32,
    #[serde(default)]
    pub duration: u32,
    #[serde(default = "default_brightness")]
    pub brightness: u32,
    /// `[r, g, b]` array.
    pub color: Option<Vec<u8>>,
}

/* ------------------------------------------------------------------ */
/* Defaults                                                             */
/* ------------------------------------------------------------------ */

fn default_rate() -> u32 {
    1000
}
fn default_report_rates() -> Vec<u32> {
    vec![125, 250, 500, 1000]
}
fn default_dpi() -> u32 {
    1000
}
fn default_action_type() -> String {
    "button".to_string()
}
fn default_brightness() -> u32 {
    255
}

impl Default for TestResolutionSpec {
    fn default() -> Self {
        Self {
            xres: 1000,
            yres: 1000,
            dpi_min: Some(1000),
            dpi_max: Some(1000),
            is_active: false,
            is_default: false,
            is_disabled: false,
            capabilities: Vec::new(),
        }
    }
}

impl Default for TestButtonSpec {
    fn default() -> Self {
        Self {
            action_type: "button".to_string(),
            button: 0,
            key: 0,
            special: 0,
        }
    }
}

/* Minimum sane device: one profile with one active default resolution at
 * 1000 DPI and a single button. */
fn default_profile() -> TestProfileSpec {
    TestProfileSpec {
        name: None,
        is_active: true,
        is_disabled: false,
        rate: 1000,
        report_rates: default_report_rates(),
        capabilities: Vec::new(),
        resolutions: vec![TestResolutionSpec {
            is_active: true,
            is_default: true,
            ..TestResolutionSpec::default()
        }],
        buttons: vec![TestButtonSpec::default()],
        leds: Vec::new(),
    }
}

/* ------------------------------------------------------------------ */
/* Parsing and conversion                                               */
/* ------------------------------------------------------------------ */

/// Parse a JSON string into a [`TestDeviceSpec`]. An empty string (or an
/// empty object) produces the minimum sane defaults.
pub fn parse_json(json: &str) -> Result<TestDeviceSpec, serde_json::Error> {
    if json.trim().is_empty() {
        return Ok(TestDeviceSpec::default());
    }
    serde_json::from_str(json)
}

/// Populate `info` from a parsed spec, the way a wire driver populates a
/// device during probe. Missing pieces fall back to the minimum sane
/// defaults and the usual invariants are patched up: resolution 0 becomes
/// active/default if the spec names none, profile 0 becomes active if no
/// profile is.
pub fn populate_device_info(info: &mut DeviceInfo, spec: &TestDeviceSpec) {
    let mut profiles = spec.profiles.clone();
    if profiles.is_empty() {
        profiles.push(default_profile());
    }
    for p in &mut profiles {
        if p.resolutions.is_empty() {
            p.resolutions.push(TestResolutionSpec {
                is_active: true,
                is_default: true,
                ..TestResolutionSpec::default()
            });
        }
        if p.buttons.is_empty() {
            p.buttons.push(TestButtonSpec::default());
        }
    }

    let num_profiles = profiles.len() as u32;
    let num_resolutions = profiles.iter().map(|p| p.resolutions.len()).max().unwrap_or(1) as u32;
    let num_buttons = profiles.iter().map(|p| p.buttons.len()).max().unwrap_or(1) as u32;
    let num_leds = profiles.iter().map(|p| p.leds.len()).max().unwrap_or(0) as u32;

    info.init_profiles(num_profiles, num_resolutions, num_buttons, num_leds);

    if !profiles.iter().any(|p| p.is_active) {
        profiles[0].is_active = true;
    }

    for (pi, p) in profiles.iter().enumerate() {
        let profile = &mut info.profiles[pi];

        profile.name = p.name.clone();
        profile.is_active = p.is_active;
        profile.is_enabled = !p.is_disabled;
        profile.report_rate = p.rate;
        profile.report_rates = p.report_rates.clone();
        for &cap in &p.capabilities {
            match cap {
                x if x == ProfileCapability::SetDefault as u32 => {
                    profile.set_capability(ProfileCapability::SetDefault)
                }
                x if x == ProfileCapability::Disable as u32 => {
                    profile.set_capability(ProfileCapability::Disable)
                }
                x if x == ProfileCapability::WriteOnly as u32 => {
                    profile.set_capability(ProfileCapability::WriteOnly)
                }
                _ => {}
            }
        }

        let mut active_set = false;
        let mut default_set = false;
        for ri in 0..num_resolutions as usize {
            let fallback = TestResolutionSpec::default();
            let r = p.resolutions.get(ri).unwrap_or(&fallback);
            let res = &mut profile.resolutions[ri];

            match (r.dpi_min, r.dpi_max) {
                (Some(lo), Some(hi)) if lo != 0 && hi >= lo => {
                    res.set_dpi_list_from_range(lo, hi)
                }
                _ => res.dpi_list = vec![r.xres],
            }
            res.dpi_x = r.xres;
            res.dpi_y = r.yres;
            res.is_active = r.is_active;
            res.is_default = r.is_default;
            res.is_disabled = r.is_disabled;
            active_set |= r.is_active;
            default_set |= r.is_default;

            for &cap in &r.capabilities {
                match cap {
                    x if x == ResolutionCapability::SeparateXy as u32 => {
                        res.set_capability(ResolutionCapability::SeparateXy)
                    }
                    x if x == ResolutionCapability::Disable as u32 => {
                        res.set_capability(ResolutionCapability::Disable)
                    }
                    _ => {}
                }
            }
        }
        if !active_set {
            profile.resolutions[0].is_active = true;
        }
        if !default_set {
            profile.resolutions[0].is_default = true;
        }

        for bi in 0..num_buttons as usize {
            let fallback = TestButtonSpec::default();
            let b = p.buttons.get(bi).unwrap_or(&fallback);
            let button = &mut profile.buttons[bi];

            button.enable_action_type(ActionType::None);
            button.enable_action_type(ActionType::Button);
            button.enable_action_type(ActionType::Special);
            button.enable_action_type(ActionType::Key);
            button.enable_action_type(ActionType::Macro);

            button.action = match b.action_type.as_str() {
                "none" => crate::device::ButtonAction::None,
                "button" => crate::device::ButtonAction::Button(b.button),
                "special" => crate::device::ButtonAction::Special(b.special),
                "key" => crate::device::ButtonAction::Key(b.key),
                "macro" => crate::device::ButtonAction::Macro,
                _ => crate::device::ButtonAction::Unknown,
            };
        }

        for li in 0..num_leds as usize {
            let fallback = TestLedSpec::default();
            let l = p.leds.get(li).unwrap_or(&fallback);
            let led = &mut profile.leds[li];

            led.set_mode_capability(LedMode::On);
            led.set_mode_capability(LedMode::Cycle);
            led.set_mode_capability(LedMode::Breathing);
            led.mode = LedMode::from_u32(l.mode).unwrap_or(LedMode::Off);
            led.effect_duration = l.duration;
            led.brightness = l.brightness.min(255);
            if let Some(c) = l.color.as_deref() {
                if c.len() >= 3 {
                    led.color = crate::device::Color::new(
                        u32::from(c[0]),
                        u32::from(c[1]),
                        u32::from(c[2]),
                    );
                }
            }
        }
    }
}

/// Build a fresh synthetic [`DeviceInfo`] for the given sysname.
pub fn build_device_info(sysname: &str, spec: &TestDeviceSpec) -> DeviceInfo {
    let mut info = DeviceInfo::new(
        sysname,
        &format!("Test Device ({})", sysname),
        "test:0000:0000:0",
        DeviceType::Mouse,
    );
    populate_device_info(&mut info, spec);
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_gives_minimum_device() {
        let spec = parse_json("").unwrap();
        let info = build_device_info("testdevice0", &spec);
        assert_eq!(info.profiles.len(), 1);
        assert!(info.profiles[0].is_active);
        assert_eq!(info.profiles[0].resolutions.len(), 1);
        assert!(info.profiles[0].resolutions[0].is_active);
        assert!(info.profiles[0].resolutions[0].is_default);
        assert_eq!(info.profiles[0].resolutions[0].dpi_x, 1000);
        assert_eq!(info.profiles[0].buttons.len(), 1);
        assert!(info.sanity_check());
    }

    #[test]
    fn test_full_spec_parses() {
        let json = r#"{
            "profiles": [
                {
                    "is_active": true,
                    "rate": 500,
                    "capabilities": [102],
                    "resolutions": [
                        {"xres": 800, "yres": 800, "dpi_min": 400, "dpi_max": 3200,
                         "is_active": true, "is_default": true, "capabilities": [1, 2]},
                        {"xres": 1600, "yres": 1600, "dpi_min": 400, "dpi_max": 3200}
                    ],
                    "buttons": [
                        {"action_type": "button", "button": 1},
                        {"action_type": "key", "key": 30},
                        {"action_type": "none"}
                    ],
                    "leds": [{"mode": 1, "brightness": 200, "color": [255, 0, 0]}]
                },
                {"rate": 1000}
            ]
        }"#;

        let spec = parse_json(json).unwrap();
        let info = build_device_info("testdevice0", &spec);
        assert!(info.sanity_check());
        assert_eq!(info.profiles.len(), 2);

        let p0 = &info.profiles[0];
        assert_eq!(p0.report_rate, 500);
        assert!(p0.has_capability(ProfileCapability::Disable));
        assert!(p0.resolutions[0].has_capability(ResolutionCapability::SeparateXy));
        assert!(p0.resolutions[0].dpi_list.contains(&3200));
        assert_eq!(
            p0.buttons[1].action,
            crate::device::ButtonAction::Key(30)
        );
        assert_eq!(p0.leds[0].mode, LedMode::On);
        assert_eq!(p0.leds[0].color.red, 255);

        /* Second profile is padded to the same lattice size. */
        let p1 = &info.profiles[1];
        assert_eq!(p1.resolutions.len(), 2);
        assert!(p1.resolutions[0].is_active);
        assert!(!p1.is_active);
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(parse_json("{not json").is_err());
    }
}
