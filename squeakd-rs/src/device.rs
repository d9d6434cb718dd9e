/* In-memory object graph mirroring hardware state.
 *
 * A DeviceInfo owns its profiles; a profile owns its resolutions, buttons
 * and LEDs, all addressed by index. Drivers populate the graph during probe
 * by writing fields directly; clients mutate it only through the setters
 * below, which validate capabilities and values, skip no-op writes, and
 * maintain the dirty flags that the commit scheduler later clears. */

use tracing::error;

use crate::error::{SqueakError, SqueakResult};
use crate::macros::Macro;

pub const RATE_MIN: u32 = 125;
pub const RATE_MAX: u32 = 8000;

/* Sanity bounds, not hardware limits: no known mouse exceeds these. */
pub const MAX_PROFILES: usize = 16;
pub const MAX_RESOLUTIONS: usize = 16;

/* Device types as specified in the .device files. Wire values are ABI. */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum DeviceType {
    #[default]
    Unspecified = 0,
    Other = 1,
    Mouse = 2,
    Keyboard = 3,
}

impl DeviceType {
    pub fn parse(s: &str) -> Self {
        match s {
            "mouse" => DeviceType::Mouse,
            "keyboard" => DeviceType::Keyboard,
            "other" => DeviceType::Other,
            _ => DeviceType::Unspecified,
        }
    }
}

/* Profile capabilities start at 101; the values are ABI. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ProfileCapability {
    /* Profile can be assigned as the default profile. */
    SetDefault = 101,
    /* Profile can be disabled and enabled. A specific profile may still
     * refuse, e.g. the last enabled one. */
    Disable = 102,
    /* Profile state cannot be queried from the hardware; only the
     * structure (entity counts) is known until a client uploads a full
     * configuration. */
    WriteOnly = 103,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResolutionCapability {
    /* x and y resolution can be set separately. */
    SeparateXy = 1,
    /* The resolution can be disabled and enabled. */
    Disable = 2,
}

/* Wire values of the button action tag. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ActionType {
    None = 0,
    Button = 1,
    Special = 2,
    Key = 3,
    Macro = 4,
    Unknown = 1000,
}

/* The action assigned to a button. The macro event buffer lives on the
 * button itself (see ButtonInfo::macro_events) so that switching a button
 * away from the macro action and back does not lose the recorded events. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    None,
    Button(u32),
    Special(u32),
    Key(u32),
    Macro,
    Unknown,
}

impl ButtonAction {
    pub fn action_type(&self) -> ActionType {
        match self {
            ButtonAction::None => ActionType::None,
            ButtonAction::Button(_) => ActionType::Button,
            ButtonAction::Special(_) => ActionType::Special,
            ButtonAction::Key(_) => ActionType::Key,
            ButtonAction::Macro => ActionType::Macro,
            ButtonAction::Unknown => ActionType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LedMode {
    Off = 0,
    On = 1,
    Cycle = 2,
    Breathing = 3,
}

impl LedMode {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(LedMode::Off),
            1 => Some(LedMode::On),
            2 => Some(LedMode::Cycle),
            3 => Some(LedMode::Breathing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum LedColorDepth {
    Monochrome = 0,
    #[default]
    Rgb888 = 1,
    Rgb111 = 2,
}

/* Color as an RGB triplet, 8 bits per channel on the wire. */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Color {
    pub red: u32,
    pub green: u32,
    pub blue: u32,
}

impl Color {
    pub fn new(red: u32, green: u32, blue: u32) -> Self {
        Self {
            red: red & 0xff,
            green: green & 0xff,
            blue: blue & 0xff,
        }
    }
}

/* Resolution value, either unified or per-axis. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dpi {
    Unified(u32),
    Separate { x: u32, y: u32 },
}

/* Device state synced from hardware. */
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub sysname: String,
    pub name: String,
    /* "{bustype}:{vid:04x}:{pid:04x}:{version}" */
    pub model: String,
    pub device_type: DeviceType,
    pub firmware_version: String,
    pub profiles: Vec<ProfileInfo>,
}

#[derive(Debug, Clone)]
pub struct ProfileInfo {
    pub index: u32,
    /* None: the device has no profile names; set_name fails Capability. */
    pub name: Option<String>,
    pub is_active: bool,
    pub is_enabled: bool,
    pub dirty: bool,
    pub rate_dirty: bool,
    pub angle_snapping_dirty: bool,
    pub debounce_dirty: bool,
    /* Pending active-profile transition; commit turns this into a
     * set_active_profile call. */
    pub active_dirty: bool,
    pub capabilities: Vec<ProfileCapability>,
    pub report_rate: u32,
    pub report_rates: Vec<u32>,
    /* -1 = unsupported, 0 = off, 1 = on. */
    pub angle_snapping: i32,
    /* Debounce time in ms, -1 = unsupported. */
    pub debounce: i32,
    pub debounces: Vec<u32>,
    pub resolutions: Vec<ResolutionInfo>,
    pub buttons: Vec<ButtonInfo>,
    pub leds: Vec<LedInfo>,
}

#[derive(Debug, Clone)]
pub struct ResolutionInfo {
    pub index: u32,
    pub dpi_x: u32,
    pub dpi_y: u32,
    /* Permitted values, monotonically increasing. */
    pub dpi_list: Vec<u32>,
    pub capabilities: Vec<ResolutionCapability>,
    pub is_active: bool,
    pub is_default: bool,
    pub is_disabled: bool,
    pub is_dpi_shift_target: bool,
    pub dirty: bool,
}

#[derive(Debug, Clone)]
pub struct ButtonInfo {
    pub index: u32,
    pub action: ButtonAction,
    /* Kept aside, see ButtonAction. */
    pub macro_events: Macro,
    /* Bitmask over ActionType values the hardware supports in this slot. */
    pub action_caps: u32,
    pub dirty: bool,
}

#[derive(Debug, Clone)]
pub struct LedInfo {
    pub index: u32,
    pub mode: LedMode,
    /* Bitmask over LedMode values; Off is always supported. */
    pub modes: u32,
    pub color: Color,
    pub color_depth: LedColorDepth,
    /* Duration of the effect in ms, 0-10000. */
    pub effect_duration: u32,
    /* 0-255 */
    pub brightness: u32,
    pub dirty: bool,
}

/* Hardware reports profile names in ISO-8859-1 on several devices. Valid
 * UTF-8 passes through; anything else is transcoded byte-per-codepoint. */
pub fn name_from_hardware(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

impl DeviceInfo {
    pub fn new(sysname: &str, name: &str, model: &str, device_type: DeviceType) -> Self {
        Self {
            sysname: sysname.to_string(),
            name: name.to_string(),
            model: model.to_string(),
            device_type,
            firmware_version: String::new(),
            profiles: Vec::new(),
        }
    }

    /* Construction funnel called by drivers during probe: pre-allocates
     * the full lattice with default values and no dirty flags. The driver
     * then fills in each entity from the wire. */
    pub fn init_profiles(
        &mut self,
        num_profiles: u32,
        num_resolutions: u32,
        num_buttons: u32,
        num_leds: u32,
    ) {
        self.profiles = (0..num_profiles)
            .map(|pi| ProfileInfo {
                index: pi,
                name: None,
                is_active: false,
                is_enabled: true,
                dirty: false,
                rate_dirty: false,
                angle_snapping_dirty: false,
                debounce_dirty: false,
                active_dirty: false,
                capabilities: Vec::new(),
                report_rate: 0,
                report_rates: Vec::new(),
                angle_snapping: -1,
                debounce: -1,
                debounces: Vec::new(),
                resolutions: (0..num_resolutions)
                    .map(|ri| ResolutionInfo {
                        index: ri,
                        dpi_x: 0,
                        dpi_y: 0,
                        dpi_list: Vec::new(),
                        capabilities: Vec::new(),
                        is_active: false,
                        is_default: false,
                        is_disabled: false,
                        is_dpi_shift_target: false,
                        dirty: false,
                    })
                    .collect(),
                buttons: (0..num_buttons)
                    .map(|bi| ButtonInfo {
                        index: bi,
                        action: ButtonAction::None,
                        macro_events: Macro::new(),
                        action_caps: 0,
                        dirty: false,
                    })
                    .collect(),
                leds: (0..num_leds)
                    .map(|li| LedInfo {
                        index: li,
                        mode: LedMode::Off,
                        modes: 0,
                        color: Color::default(),
                        color_depth: LedColorDepth::Rgb888,
                        effect_duration: 0,
                        brightness: 255,
                        dirty: false,
                    })
                    .collect(),
            })
            .collect();
    }

    pub fn profile(&self, index: u32) -> SqueakResult<&ProfileInfo> {
        self.profiles.get(index as usize).ok_or(SqueakError::Value)
    }

    pub fn profile_mut(&mut self, index: u32) -> SqueakResult<&mut ProfileInfo> {
        self.profiles
            .get_mut(index as usize)
            .ok_or(SqueakError::Value)
    }

    pub fn active_profile(&self) -> Option<&ProfileInfo> {
        self.profiles.iter().find(|p| p.is_active)
    }

    pub fn is_dirty(&self) -> bool {
        self.profiles.iter().any(|p| p.dirty)
    }

    /* Mark the whole graph clean. The commit scheduler calls this after
     * the wire transaction completed (or after a failure-path re-read, so
     * resynced clients do not trigger a spurious follow-up commit). */
    pub fn clear_dirty(&mut self) {
        for profile in &mut self.profiles {
            profile.dirty = false;
            profile.rate_dirty = false;
            profile.angle_snapping_dirty = false;
            profile.debounce_dirty = false;
            profile.active_dirty = false;

            for res in &mut profile.resolutions {
                res.dirty = false;
            }
            for button in &mut profile.buttons {
                button.dirty = false;
            }
            for led in &mut profile.leds {
                led.dirty = false;
            }
        }
    }

    /* Make profile `index` the active one, clearing the flag on the
     * previous holder. Both profiles get the active-transition flag so
     * commit knows to issue the profile switch. */
    pub fn set_active_profile(&mut self, index: u32) -> SqueakResult<()> {
        let target = self.profile(index)?;

        if !target.is_enabled {
            return Err(SqueakError::Value);
        }
        if target.is_active {
            return Ok(());
        }
        if self.profiles.len() == 1 {
            return Ok(());
        }

        for profile in &mut self.profiles {
            if profile.is_active {
                profile.is_active = false;
                profile.active_dirty = true;
                profile.dirty = true;
            }
        }

        let target = self.profile_mut(index)?;
        target.is_active = true;
        target.active_dirty = true;
        target.dirty = true;
        Ok(())
    }

    /* Enable or disable a profile. Disabling the active profile or the
     * last enabled one is not allowed. */
    pub fn set_profile_enabled(&mut self, index: u32, enabled: bool) -> SqueakResult<()> {
        let target = self.profile(index)?;

        if !target.has_capability(ProfileCapability::Disable) {
            return Err(SqueakError::Capability);
        }
        if target.is_enabled == enabled {
            return Ok(());
        }
        if !enabled {
            if target.is_active {
                error!("{}: disabling the active profile is not allowed", self.name);
                return Err(SqueakError::Value);
            }
            let enabled_elsewhere = self
                .profiles
                .iter()
                .any(|p| p.index != index && p.is_enabled);
            if !enabled_elsewhere {
                error!(
                    "{}: disabling the last enabled profile is not allowed",
                    self.name
                );
                return Err(SqueakError::Value);
            }
        }

        let target = self.profile_mut(index)?;
        target.is_enabled = enabled;
        target.dirty = true;
        Ok(())
    }

    /* Post-probe validation. A driver's probe must leave the graph in a
     * state that holds every invariant; a device failing this check is
     * discarded. */
    pub fn sanity_check(&self) -> bool {
        if self.profiles.is_empty() || self.profiles.len() > MAX_PROFILES {
            error!(
                "{}: invalid number of profiles ({})",
                self.name,
                self.profiles.len()
            );
            return false;
        }

        let mut has_active = false;
        for profile in &self.profiles {
            if profile.is_active {
                if has_active {
                    error!("{}: multiple active profiles", self.name);
                    return false;
                }
                has_active = true;
            }

            if profile.resolutions.len() > MAX_RESOLUTIONS {
                error!(
                    "{}: invalid number of resolutions ({})",
                    self.name,
                    profile.resolutions.len()
                );
                return false;
            }

            let mut active_resolutions = 0;
            for res in &profile.resolutions {
                if res.dpi_list.is_empty() {
                    error!("{}: invalid dpi list", self.name);
                    return false;
                }
                if res.is_active {
                    active_resolutions += 1;
                }
            }
            if active_resolutions > 1 {
                error!("{}: multiple active resolutions", self.name);
                return false;
            }
            if profile.is_active && !profile.resolutions.is_empty() && active_resolutions == 0 {
                error!("{}: active profile has no active resolution", self.name);
                return false;
            }

            if profile.report_rates.is_empty() {
                error!("{}: invalid report rate list", self.name);
                return false;
            }

            if profile.dirty {
                /* Don't bail, some drivers may do this. */
                error!("{}: profile is dirty while probing", self.name);
            }
        }

        if !has_active {
            error!("{}: no profile set as active profile", self.name);
            return false;
        }

        true
    }
}

impl ProfileInfo {
    pub fn has_capability(&self, cap: ProfileCapability) -> bool {
        self.capabilities.contains(&cap)
    }

    pub fn set_capability(&mut self, cap: ProfileCapability) {
        if !self.capabilities.contains(&cap) {
            self.capabilities.push(cap);
        }
    }

    pub fn set_name(&mut self, name: &str) -> SqueakResult<()> {
        match &self.name {
            None => Err(SqueakError::Capability),
            Some(current) if current == name => Ok(()),
            Some(_) => {
                self.name = Some(name.to_string());
                self.dirty = true;
                Ok(())
            }
        }
    }

    /* Report rate is clamped into [125, 8000], never rejected; the
     * allowed-rate list is advisory. */
    pub fn set_report_rate(&mut self, hz: u32) -> SqueakResult<()> {
        let hz = hz.clamp(RATE_MIN, RATE_MAX);
        if self.report_rate != hz {
            self.report_rate = hz;
            self.dirty = true;
            self.rate_dirty = true;
        }
        Ok(())
    }

    pub fn set_angle_snapping(&mut self, value: i32) -> SqueakResult<()> {
        if !(-1..=1).contains(&value) {
            return Err(SqueakError::Value);
        }
        if self.angle_snapping != value {
            self.angle_snapping = value;
            self.dirty = true;
            self.angle_snapping_dirty = true;
        }
        Ok(())
    }

    pub fn set_debounce(&mut self, value: i32) -> SqueakResult<()> {
        if value != -1
            && !self.debounces.is_empty()
            && !self.debounces.contains(&(value.max(0) as u32))
        {
            return Err(SqueakError::Value);
        }
        if self.debounce != value {
            self.debounce = value;
            self.dirty = true;
            self.debounce_dirty = true;
        }
        Ok(())
    }

    pub fn resolution(&self, index: u32) -> SqueakResult<&ResolutionInfo> {
        self.resolutions
            .get(index as usize)
            .ok_or(SqueakError::Value)
    }

    fn resolution_mut(&mut self, index: u32) -> SqueakResult<&mut ResolutionInfo> {
        self.resolutions
            .get_mut(index as usize)
            .ok_or(SqueakError::Value)
    }

    pub fn button(&self, index: u32) -> SqueakResult<&ButtonInfo> {
        self.buttons.get(index as usize).ok_or(SqueakError::Value)
    }

    fn button_mut(&mut self, index: u32) -> SqueakResult<&mut ButtonInfo> {
        self.buttons
            .get_mut(index as usize)
            .ok_or(SqueakError::Value)
    }

    pub fn led(&self, index: u32) -> SqueakResult<&LedInfo> {
        self.leds.get(index as usize).ok_or(SqueakError::Value)
    }

    fn led_mut(&mut self, index: u32) -> SqueakResult<&mut LedInfo> {
        self.leds.get_mut(index as usize).ok_or(SqueakError::Value)
    }

    pub fn set_resolution_dpi(&mut self, index: u32, dpi: Dpi) -> SqueakResult<()> {
        let res = self.resolution(index)?;

        let (x, y) = match dpi {
            Dpi::Unified(value) => {
                if !res.dpi_list.contains(&value) {
                    return Err(SqueakError::Value);
                }
                (value, value)
            }
            Dpi::Separate { x, y } => {
                if !res.has_capability(ResolutionCapability::SeparateXy) {
                    return Err(SqueakError::Capability);
                }
                /* Both zero disables, both non-zero configures; one-sided
                 * zero is meaningless. */
                if (x == 0) != (y == 0) {
                    return Err(SqueakError::Value);
                }
                if x != 0 && (!res.dpi_list.contains(&x) || !res.dpi_list.contains(&y)) {
                    return Err(SqueakError::Value);
                }
                (x, y)
            }
        };

        let res = self.resolution_mut(index)?;
        if res.dpi_x != x || res.dpi_y != y {
            res.dpi_x = x;
            res.dpi_y = y;
            res.dirty = true;
            self.dirty = true;
        }
        Ok(())
    }

    /* The three exclusive status bits share one shape: refuse on a
     * disabled resolution, clear the bit from every sibling first (those
     * get dirty too), then set it on the target. Returns the indices of
     * the resolutions whose state changed. */
    fn set_exclusive_bit(
        &mut self,
        index: u32,
        get: fn(&ResolutionInfo) -> bool,
        set: fn(&mut ResolutionInfo, bool),
    ) -> SqueakResult<Vec<u32>> {
        let res = self.resolution(index)?;
        if res.is_disabled {
            return Err(SqueakError::Value);
        }

        let mut changed = Vec::new();
        for other in &mut self.resolutions {
            if other.index != index && get(other) {
                set(other, false);
                other.dirty = true;
                self.dirty = true;
                changed.push(other.index);
            }
        }

        let res = self.resolution_mut(index)?;
        if !get(res) {
            set(res, true);
            res.dirty = true;
            self.dirty = true;
            changed.push(index);
        }
        Ok(changed)
    }

    pub fn set_resolution_active(&mut self, index: u32) -> SqueakResult<Vec<u32>> {
        self.set_exclusive_bit(index, |r| r.is_active, |r, v| r.is_active = v)
    }

    pub fn set_resolution_default(&mut self, index: u32) -> SqueakResult<Vec<u32>> {
        self.set_exclusive_bit(index, |r| r.is_default, |r, v| r.is_default = v)
    }

    pub fn set_resolution_dpi_shift_target(&mut self, index: u32) -> SqueakResult<Vec<u32>> {
        self.set_exclusive_bit(
            index,
            |r| r.is_dpi_shift_target,
            |r, v| r.is_dpi_shift_target = v,
        )
    }

    pub fn set_resolution_disabled(&mut self, index: u32, disable: bool) -> SqueakResult<()> {
        let res = self.resolution(index)?;

        if !res.has_capability(ResolutionCapability::Disable) {
            return Err(SqueakError::Capability);
        }
        if disable && (res.is_active || res.is_default || res.is_dpi_shift_target) {
            return Err(SqueakError::Value);
        }
        if res.is_disabled == disable {
            return Ok(());
        }

        let res = self.resolution_mut(index)?;
        res.is_disabled = disable;
        res.dirty = true;
        self.dirty = true;
        Ok(())
    }

    fn set_button_action(&mut self, index: u32, action: ButtonAction) -> SqueakResult<()> {
        let button = self.button(index)?;
        if !button.has_action_type(action.action_type()) {
            return Err(SqueakError::Capability);
        }
        if button.action == action {
            return Ok(());
        }

        let button = self.button_mut(index)?;
        button.action = action;
        button.dirty = true;
        self.dirty = true;
        Ok(())
    }

    pub fn disable_button(&mut self, index: u32) -> SqueakResult<()> {
        self.set_button_action(index, ButtonAction::None)
    }

    pub fn set_button_button(&mut self, index: u32, btn: u32) -> SqueakResult<()> {
        self.set_button_action(index, ButtonAction::Button(btn))
    }

    pub fn set_button_special(&mut self, index: u32, special: u32) -> SqueakResult<()> {
        self.set_button_action(index, ButtonAction::Special(special))
    }

    pub fn set_button_key(&mut self, index: u32, key: u32) -> SqueakResult<()> {
        self.set_button_action(index, ButtonAction::Key(key))
    }

    pub fn set_button_macro(&mut self, index: u32, events: Macro) -> SqueakResult<()> {
        let button = self.button(index)?;
        if !button.has_action_type(ActionType::Macro) {
            return Err(SqueakError::Capability);
        }
        if button.action == ButtonAction::Macro && button.macro_events == events {
            return Ok(());
        }

        let button = self.button_mut(index)?;
        button.action = ButtonAction::Macro;
        button.macro_events = events;
        button.dirty = true;
        self.dirty = true;
        Ok(())
    }

    pub fn set_led_mode(&mut self, index: u32, mode: LedMode) -> SqueakResult<()> {
        let led = self.led(index)?;
        if !led.has_mode(mode) {
            return Err(SqueakError::Capability);
        }
        if led.mode == mode {
            return Ok(());
        }

        let led = self.led_mut(index)?;
        led.mode = mode;
        led.dirty = true;
        self.dirty = true;
        Ok(())
    }

    pub fn set_led_color(&mut self, index: u32, color: Color) -> SqueakResult<()> {
        let color = Color::new(color.red, color.green, color.blue);
        let led = self.led_mut(index)?;
        if led.color != color {
            led.color = color;
            led.dirty = true;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn set_led_effect_duration(&mut self, index: u32, ms: u32) -> SqueakResult<()> {
        let ms = ms.min(10000);
        let led = self.led_mut(index)?;
        if led.effect_duration != ms {
            led.effect_duration = ms;
            led.dirty = true;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn set_led_brightness(&mut self, index: u32, brightness: u32) -> SqueakResult<()> {
        let brightness = brightness.min(255);
        let led = self.led_mut(index)?;
        if led.brightness != brightness {
            led.brightness = brightness;
            led.dirty = true;
            self.dirty = true;
        }
        Ok(())
    }
}

impl ResolutionInfo {
    pub fn has_capability(&self, cap: ResolutionCapability) -> bool {
        self.capabilities.contains(&cap)
    }

    pub fn set_capability(&mut self, cap: ResolutionCapability) {
        if !self.capabilities.contains(&cap) {
            self.capabilities.push(cap);
        }
    }

    pub fn dpi(&self) -> Dpi {
        if self.has_capability(ResolutionCapability::SeparateXy) && self.dpi_x != self.dpi_y {
            Dpi::Separate {
                x: self.dpi_x,
                y: self.dpi_y,
            }
        } else {
            Dpi::Unified(self.dpi_x)
        }
    }

    /* Per-device DPI lists grow in hardware-specific steps: fine-grained
     * at the low end, coarse at the top. */
    pub fn set_dpi_list_from_range(&mut self, min: u32, max: u32) {
        self.dpi_list.clear();

        let mut dpi = min;
        while dpi <= max && self.dpi_list.len() < 300 {
            self.dpi_list.push(dpi);

            let stepsize = if dpi < 1000 {
                50
            } else if dpi < 2600 {
                100
            } else if dpi < 5000 {
                200
            } else {
                500
            };
            dpi += stepsize;
        }
    }

    pub fn min_dpi(&self) -> u32 {
        self.dpi_list.first().copied().unwrap_or(0)
    }

    pub fn max_dpi(&self) -> u32 {
        self.dpi_list.last().copied().unwrap_or(0)
    }
}

impl ButtonInfo {
    pub fn has_action_type(&self, action_type: ActionType) -> bool {
        match action_type {
            ActionType::None
            | ActionType::Button
            | ActionType::Special
            | ActionType::Key
            | ActionType::Macro => self.action_caps & (1 << action_type as u32) != 0,
            ActionType::Unknown => false,
        }
    }

    pub fn enable_action_type(&mut self, action_type: ActionType) {
        self.action_caps |= 1 << action_type as u32;
    }

    pub fn supported_action_types(&self) -> Vec<u32> {
        [
            ActionType::None,
            ActionType::Button,
            ActionType::Special,
            ActionType::Key,
            ActionType::Macro,
        ]
        .into_iter()
        .filter(|&t| self.has_action_type(t))
        .map(|t| t as u32)
        .collect()
    }
}

impl LedInfo {
    pub fn has_mode(&self, mode: LedMode) -> bool {
        if mode == LedMode::Off {
            return true;
        }
        self.modes & (1 << mode as u32) != 0
    }

    pub fn set_mode_capability(&mut self, mode: LedMode) {
        self.modes |= 1 << mode as u32;
    }

    pub fn supported_modes(&self) -> Vec<u32> {
        [LedMode::Off, LedMode::On, LedMode::Cycle, LedMode::Breathing]
            .into_iter()
            .filter(|&m| self.has_mode(m))
            .map(|m| m as u32)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_device() -> DeviceInfo {
        let mut info =
            DeviceInfo::new("hidraw0", "Test Mouse", "usb:1234:5678:0", DeviceType::Mouse);
        info.init_profiles(2, 5, 3, 1);
        for profile in &mut info.profiles {
            profile.report_rate = 1000;
            profile.report_rates = vec![125, 250, 500, 1000];
            profile.set_capability(ProfileCapability::Disable);
            for res in &mut profile.resolutions {
                res.dpi_x = 800;
                res.dpi_y = 800;
                res.dpi_list = vec![400, 800, 1600, 3200];
                res.set_capability(ResolutionCapability::Disable);
            }
            profile.resolutions[0].is_active = true;
            profile.resolutions[0].is_default = true;
            for button in &mut profile.buttons {
                button.enable_action_type(ActionType::None);
                button.enable_action_type(ActionType::Button);
                button.enable_action_type(ActionType::Macro);
            }
            for led in &mut profile.leds {
                led.set_mode_capability(LedMode::On);
            }
        }
        info.profiles[0].is_active = true;
        info
    }

    #[test]
    fn test_sanity_check_passes() {
        assert!(test_device().sanity_check());
    }

    #[test]
    fn test_sanity_check_requires_active_profile() {
        let mut info = test_device();
        info.profiles[0].is_active = false;
        assert!(!info.sanity_check());
    }

    #[test]
    fn test_dpi_must_be_in_list() {
        let mut info = test_device();
        let profile = &mut info.profiles[0];
        assert_eq!(
            profile.set_resolution_dpi(0, Dpi::Unified(850)),
            Err(SqueakError::Value)
        );
        assert!(!profile.dirty);
        assert!(profile.set_resolution_dpi(0, Dpi::Unified(1600)).is_ok());
        assert!(profile.dirty);
        assert!(profile.resolutions[0].dirty);
    }

    #[test]
    fn test_separate_xy_needs_capability() {
        let mut info = test_device();
        let profile = &mut info.profiles[0];
        assert_eq!(
            profile.set_resolution_dpi(0, Dpi::Separate { x: 400, y: 800 }),
            Err(SqueakError::Capability)
        );

        profile.resolutions[0].set_capability(ResolutionCapability::SeparateXy);
        assert_eq!(
            profile.set_resolution_dpi(0, Dpi::Separate { x: 400, y: 0 }),
            Err(SqueakError::Value)
        );
        assert!(profile
            .set_resolution_dpi(0, Dpi::Separate { x: 400, y: 800 })
            .is_ok());
        assert_eq!(
            profile.resolutions[0].dpi(),
            Dpi::Separate { x: 400, y: 800 }
        );
    }

    #[test]
    fn test_equal_write_is_skipped() {
        let mut info = test_device();
        let profile = &mut info.profiles[0];
        assert!(profile.set_resolution_dpi(0, Dpi::Unified(800)).is_ok());
        assert!(!profile.dirty);
        assert!(!profile.resolutions[0].dirty);
    }

    #[test]
    fn test_exclusive_bits_move_atomically() {
        let mut info = test_device();
        let profile = &mut info.profiles[0];
        profile.resolutions[2].is_dpi_shift_target = true;

        let changed = profile.set_resolution_dpi_shift_target(4).unwrap();
        assert_eq!(changed, vec![2, 4]);
        assert!(!profile.resolutions[2].is_dpi_shift_target);
        assert!(profile.resolutions[4].is_dpi_shift_target);
        assert!(profile.resolutions[2].dirty);
        assert!(profile.resolutions[4].dirty);
        assert!(profile.dirty);
        assert_eq!(
            profile
                .resolutions
                .iter()
                .filter(|r| r.is_dpi_shift_target)
                .count(),
            1
        );
    }

    #[test]
    fn test_exclusive_bit_on_holder_is_noop() {
        let mut info = test_device();
        let profile = &mut info.profiles[0];
        let changed = profile.set_resolution_default(0).unwrap();
        assert!(changed.is_empty());
        assert!(!profile.dirty);
    }

    #[test]
    fn test_disabled_resolution_rejects_status_bits() {
        let mut info = test_device();
        let profile = &mut info.profiles[0];
        profile.resolutions[3].is_disabled = true;

        assert_eq!(profile.set_resolution_active(3), Err(SqueakError::Value));
        assert_eq!(profile.set_resolution_default(3), Err(SqueakError::Value));
        assert_eq!(
            profile.set_resolution_dpi_shift_target(3),
            Err(SqueakError::Value)
        );
        assert!(!profile.dirty);
        assert!(profile.resolutions[0].is_active);
    }

    #[test]
    fn test_disabling_active_resolution_rejected() {
        let mut info = test_device();
        let profile = &mut info.profiles[0];
        assert_eq!(
            profile.set_resolution_disabled(0, true),
            Err(SqueakError::Value)
        );
        assert!(profile.set_resolution_disabled(2, true).is_ok());
        assert!(profile.resolutions[2].is_disabled);
    }

    #[test]
    fn test_report_rate_clamps() {
        let mut info = test_device();
        let profile = &mut info.profiles[0];

        profile.set_report_rate(50).unwrap();
        assert_eq!(profile.report_rate, 125);
        assert!(profile.dirty && profile.rate_dirty);

        profile.set_report_rate(20000).unwrap();
        assert_eq!(profile.report_rate, 8000);
    }

    #[test]
    fn test_active_profile_moves() {
        let mut info = test_device();
        info.set_active_profile(1).unwrap();
        assert!(!info.profiles[0].is_active);
        assert!(info.profiles[1].is_active);
        assert!(info.profiles[0].active_dirty && info.profiles[0].dirty);
        assert!(info.profiles[1].active_dirty && info.profiles[1].dirty);
    }

    #[test]
    fn test_activating_disabled_profile_rejected() {
        let mut info = test_device();
        info.profiles[1].is_enabled = false;
        assert_eq!(info.set_active_profile(1), Err(SqueakError::Value));
    }

    #[test]
    fn test_disabling_active_profile_rejected() {
        let mut info = test_device();
        assert_eq!(info.set_profile_enabled(0, false), Err(SqueakError::Value));
    }

    #[test]
    fn test_disabling_last_enabled_profile_rejected() {
        let mut info = test_device();
        info.set_active_profile(1).unwrap();
        info.clear_dirty();
        info.set_profile_enabled(0, false).unwrap();
        /* profile 1 is active, profile 0 now disabled */
        assert_eq!(info.set_profile_enabled(1, false), Err(SqueakError::Value));
    }

    #[test]
    fn test_macro_survives_action_type_changes() {
        use crate::macros::{macro_from_keycode, MODIFIER_LEFTSHIFT};

        let mut info = test_device();
        let profile = &mut info.profiles[0];

        let events = macro_from_keycode(30, MODIFIER_LEFTSHIFT);
        profile.set_button_macro(1, events.clone()).unwrap();
        profile.set_button_button(1, 3).unwrap();
        assert_eq!(profile.buttons[1].action, ButtonAction::Button(3));
        assert_eq!(profile.buttons[1].macro_events, events);
    }

    #[test]
    fn test_unsupported_action_type_rejected() {
        let mut info = test_device();
        let profile = &mut info.profiles[0];
        assert_eq!(profile.set_button_key(0, 30), Err(SqueakError::Capability));
    }

    #[test]
    fn test_led_mode_needs_capability() {
        let mut info = test_device();
        let profile = &mut info.profiles[0];
        assert_eq!(
            profile.set_led_mode(0, LedMode::Breathing),
            Err(SqueakError::Capability)
        );
        assert!(profile.set_led_mode(0, LedMode::On).is_ok());
        /* Off is always allowed */
        assert!(profile.set_led_mode(0, LedMode::Off).is_ok());
    }

    #[test]
    fn test_led_clamps() {
        let mut info = test_device();
        let profile = &mut info.profiles[0];
        profile.set_led_brightness(0, 1000).unwrap();
        assert_eq!(profile.leds[0].brightness, 255);
        profile.set_led_effect_duration(0, 60000).unwrap();
        assert_eq!(profile.leds[0].effect_duration, 10000);
    }

    #[test]
    fn test_clear_dirty_clears_subtree() {
        let mut info = test_device();
        let profile = &mut info.profiles[0];
        profile.set_report_rate(500).unwrap();
        profile.set_resolution_dpi(1, Dpi::Unified(1600)).unwrap();
        profile.set_button_button(0, 2).unwrap();
        profile.set_led_mode(0, LedMode::On).unwrap();
        info.set_active_profile(1).unwrap();

        assert!(info.is_dirty());
        info.clear_dirty();
        assert!(!info.is_dirty());
        for profile in &info.profiles {
            assert!(!profile.rate_dirty && !profile.active_dirty);
            assert!(profile.resolutions.iter().all(|r| !r.dirty));
            assert!(profile.buttons.iter().all(|b| !b.dirty));
            assert!(profile.leds.iter().all(|l| !l.dirty));
        }
    }

    #[test]
    fn test_name_transcoding() {
        assert_eq!(name_from_hardware(b"plain"), "plain");
        /* 0xe9 is é in ISO-8859-1 */
        assert_eq!(name_from_hardware(&[0x63, 0x61, 0x66, 0xe9]), "café");
    }

    #[test]
    fn test_set_name_requires_support() {
        let mut info = test_device();
        let profile = &mut info.profiles[0];
        assert_eq!(profile.set_name("speed"), Err(SqueakError::Capability));

        profile.name = Some(String::new());
        assert!(profile.set_name("speed").is_ok());
        assert_eq!(profile.name.as_deref(), Some("speed"));
        assert!(profile.dirty);
    }
}
