/// MarsGaming MM4 gaming mouse driver.
///
/// Targets MarsGaming MM4 mice using the proprietary MarsGaming HID
/// protocol. Features: 5 profiles, 5 DPI resolutions per profile
/// (50-16400 DPI, separate X/Y), 19 buttons, 1 RGB LED zone.
///
/// The protocol is request/response over the hidraw node. Every report
/// starts with an 8-byte header: USB report id, report type (read/write),
/// a per-report magic byte, the profile id, a second magic byte, and
/// filler; responses echo the magic bytes of the request.
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::device::{
    ActionType, ButtonAction, Color, DeviceInfo, LedColorDepth, LedMode, ResolutionCapability,
};
use crate::driver::{DeviceDriver, DeviceIo, DriverError};

/* ------------------------------------------------------------------ */
/* Protocol constants                                                   */
/* ------------------------------------------------------------------ */

const NUM_PROFILES: u32 = 5;
const NUM_RESOLUTIONS_PER_PROFILE: u32 = 5;
const NUM_BUTTONS: u32 = 19;
const NUM_LEDS: u32 = 1;

const RES_MIN: u32 = 50; /* DPI */
const RES_MAX: u32 = 16400; /* DPI */
const RES_SCALING: u32 = 50;

const USB_REPORT_ID: u8 = 0x01;

const REPORT_TYPE_WRITE: u8 = 0x02;
const REPORT_TYPE_READ: u8 = 0x03;

/* Per-report magic bytes (offset 2 / offset 4 of the header). */
const MAGIC_STATUS: (u8, u8) = (0x21, 0x04);
const MAGIC_RESOLUTION: (u8, u8) = (0x4f, 0x2a);
const MAGIC_BUTTONS: (u8, u8) = (0x90, 0x4d);
const MAGIC_LED: (u8, u8) = (0xf1, 0x06);

const STATUS_REPORT_LEN: usize = 16;
const RESOLUTION_REPORT_LEN: usize = 64;
const BUTTON_REPORT_LEN: usize = 1024;
const LED_REPORT_LEN: usize = 16;

/* Resolution slots are 8 bytes each, starting after count and current. */
const RESOLUTION_SLOTS: usize = 6;
const RESOLUTION_SLOT_OFFSET: usize = 10;
const RESOLUTION_SLOT_LEN: usize = 8;

/* Button slots are 4 bytes each: function type plus three parameters. */
const BUTTON_SLOTS: usize = 253;
const BUTTON_SLOT_OFFSET: usize = 9;
const BUTTON_SLOT_LEN: usize = 4;

/* The model counts must fit inside the report layouts. */
const _: () = assert!(
    RESOLUTION_SLOT_OFFSET + RESOLUTION_SLOTS * RESOLUTION_SLOT_LEN <= RESOLUTION_REPORT_LEN
);
const _: () = assert!(BUTTON_SLOT_OFFSET + BUTTON_SLOTS * BUTTON_SLOT_LEN <= BUTTON_REPORT_LEN);
const _: () = assert!(NUM_RESOLUTIONS_PER_PROFILE as usize <= RESOLUTION_SLOTS);
const _: () = assert!(NUM_BUTTONS as usize <= BUTTON_SLOTS);

/* Button function types. */
const FUNC_DISABLED: u8 = 0x00;
const FUNC_BUTTON: u8 = 0x01;
const FUNC_SPECIAL: u8 = 0x02;
const FUNC_MACRO: u8 = 0x05;

fn header(report_type: u8, magic: (u8, u8), profile: u8, buf: &mut [u8]) {
    buf[0] = USB_REPORT_ID;
    buf[1] = report_type;
    buf[2] = magic.0;
    buf[3] = profile;
    buf[4] = magic.1;
    buf[5] = 0x00;
    buf[6] = 0xfa;
    buf[7] = 0xfa;
}

fn response_matches(buf: &[u8], magic: (u8, u8), profile: u8) -> bool {
    buf.len() >= 8 && buf[1] == REPORT_TYPE_READ && buf[2] == magic.0 && buf[3] == profile
}

/* Encode a DPI value to its 16-bit hardware representation. The device
 * stores DPI as `dpi / RES_SCALING`. */
fn dpi_to_raw(dpi: u32) -> u16 {
    (dpi.clamp(RES_MIN, RES_MAX) / RES_SCALING) as u16
}

fn raw_to_dpi(raw: u16) -> u32 {
    u32::from(raw) * RES_SCALING
}

/* ------------------------------------------------------------------ */
/* Cached per-profile reports                                           */
/* ------------------------------------------------------------------ */

/* Commit rewrites whole reports, so probe keeps the raw bytes around and
 * commit patches only the dirty slots before sending them back. */
#[derive(Debug, Clone)]
struct ProfileData {
    resolutions: Vec<u8>,
    buttons: Vec<u8>,
    led: Vec<u8>,
}

#[derive(Debug)]
struct MarsData {
    profiles: Vec<ProfileData>,
    active_profile: u8,
}

/* ------------------------------------------------------------------ */
/* Driver                                                               */
/* ------------------------------------------------------------------ */

pub struct MarsGamingDriver {
    data: Option<MarsData>,
}

impl MarsGamingDriver {
    pub fn new() -> Self {
        Self { data: None }
    }

    async fn query_report(
        &self,
        io: &DeviceIo,
        magic: (u8, u8),
        profile: u8,
        len: usize,
    ) -> Result<Vec<u8>> {
        let mut request = vec![0u8; len];
        header(REPORT_TYPE_READ, magic, profile, &mut request);

        io.request(&request, len, 3, |buf| {
            if response_matches(buf, magic, profile) {
                Some(buf.to_vec())
            } else {
                None
            }
        })
        .await
    }

    /* The status report carries the active profile id and the polling
     * interval of the addressed profile. */
    async fn query_status(&self, io: &DeviceIo, profile: u8) -> Result<(u8, u8)> {
        let report = self
            .query_report(io, MAGIC_STATUS, profile, STATUS_REPORT_LEN)
            .await?;
        let current_profile = report[8];
        let polling_interval = report[9].max(1);
        Ok((current_profile, polling_interval))
    }

    fn parse_button(slot: &[u8]) -> ButtonAction {
        match slot[0] {
            FUNC_DISABLED => ButtonAction::None,
            FUNC_BUTTON => ButtonAction::Button(u32::from(slot[1])),
            FUNC_SPECIAL => ButtonAction::Special(u32::from(slot[1])),
            FUNC_MACRO => ButtonAction::Macro,
            _ => ButtonAction::Unknown,
        }
    }

    fn encode_button(action: &ButtonAction, slot: &mut [u8]) {
        slot.fill(0);
        match action {
            ButtonAction::None => slot[0] = FUNC_DISABLED,
            ButtonAction::Button(b) => {
                slot[0] = FUNC_BUTTON;
                slot[1] = *b as u8;
            }
            ButtonAction::Special(s) => {
                slot[0] = FUNC_SPECIAL;
                slot[1] = *s as u8;
            }
            ButtonAction::Macro => slot[0] = FUNC_MACRO,
            /* Leave unknown assignments untouched on the wire. */
            ButtonAction::Key(_) | ButtonAction::Unknown => slot[0] = FUNC_DISABLED,
        }
    }

    fn populate_resolutions(info: &mut DeviceInfo, profile_index: u32, report: &[u8]) {
        let current_resolution = report[RESOLUTION_SLOT_OFFSET - 1];

        let profile = &mut info.profiles[profile_index as usize];
        for res in &mut profile.resolutions {
            let offset =
                RESOLUTION_SLOT_OFFSET + res.index as usize * RESOLUTION_SLOT_LEN;
            let slot = &report[offset..offset + RESOLUTION_SLOT_LEN];

            res.set_dpi_list_from_range(RES_MIN, RES_MAX);
            res.set_capability(ResolutionCapability::SeparateXy);
            res.is_active = u32::from(current_resolution) == res.index;
            res.dpi_x = raw_to_dpi(u16::from_le_bytes([slot[1], slot[2]]));
            res.dpi_y = raw_to_dpi(u16::from_le_bytes([slot[3], slot[4]]));
        }
    }

    fn populate_buttons(info: &mut DeviceInfo, profile_index: u32, report: &[u8]) {
        let profile = &mut info.profiles[profile_index as usize];
        for button in &mut profile.buttons {
            let offset = BUTTON_SLOT_OFFSET + button.index as usize * BUTTON_SLOT_LEN;
            let slot = &report[offset..offset + BUTTON_SLOT_LEN];

            button.enable_action_type(ActionType::None);
            button.enable_action_type(ActionType::Button);
            button.enable_action_type(ActionType::Special);
            button.enable_action_type(ActionType::Macro);
            button.action = Self::parse_button(slot);
        }
    }

    fn populate_leds(info: &mut DeviceInfo, profile_index: u32, report: &[u8]) {
        let mode_raw = report[8];
        let color = Color::new(
            u32::from(report[9]),
            u32::from(report[10]),
            u32::from(report[11]),
        );
        let breathing_speed = report[12];
        let brightness_raw = report[13];

        let profile = &mut info.profiles[profile_index as usize];
        for led in &mut profile.leds {
            led.set_mode_capability(LedMode::Off);
            led.set_mode_capability(LedMode::On);
            led.set_mode_capability(LedMode::Breathing);
            led.color_depth = LedColorDepth::Rgb888;
            led.color = color;
            /* Hardware brightness is a 0..3 scale. */
            led.brightness = u32::from(brightness_raw) * (255 / 3);

            if brightness_raw == 0 || mode_raw == 0 {
                led.mode = LedMode::Off;
            } else if breathing_speed == 0 || breathing_speed >= 10 {
                led.mode = LedMode::On;
            } else {
                led.mode = LedMode::Breathing;
                led.effect_duration = u32::from(breathing_speed) * 2000;
            }
        }
    }

    async fn commit_profile_rate(
        &mut self,
        io: &DeviceIo,
        info: &DeviceInfo,
        profile_index: u32,
    ) -> Result<()> {
        let profile = &info.profiles[profile_index as usize];
        if !profile.rate_dirty {
            return Ok(());
        }

        let mut report = vec![0u8; STATUS_REPORT_LEN];
        header(
            REPORT_TYPE_WRITE,
            MAGIC_STATUS,
            profile_index as u8,
            &mut report,
        );
        report[9] = (1000 / profile.report_rate.max(1)).clamp(1, 8) as u8;
        io.write_report(&report).await
    }

    async fn commit_profile_resolutions(
        &mut self,
        io: &DeviceIo,
        info: &DeviceInfo,
        profile_index: u32,
    ) -> Result<()> {
        let profile = &info.profiles[profile_index as usize];
        if !profile.resolutions.iter().any(|r| r.dirty) {
            return Ok(());
        }

        let Some(data) = self.data.as_mut() else {
            anyhow::bail!("commit before probe");
        };
        let cached = &mut data.profiles[profile_index as usize].resolutions;
        header(
            REPORT_TYPE_WRITE,
            MAGIC_RESOLUTION,
            profile_index as u8,
            cached,
        );

        for res in &profile.resolutions {
            if !res.dirty {
                continue;
            }
            let offset = RESOLUTION_SLOT_OFFSET + res.index as usize * RESOLUTION_SLOT_LEN;
            let slot = &mut cached[offset..offset + RESOLUTION_SLOT_LEN];
            slot[0] = u8::from(!res.is_disabled);
            slot[1..3].copy_from_slice(&dpi_to_raw(res.dpi_x).to_le_bytes());
            slot[3..5].copy_from_slice(&dpi_to_raw(res.dpi_y).to_le_bytes());
            /* The DPI indicator LED shows the slot index as a bit pattern. */
            slot[5] = !((!0u8) << res.index);
        }

        let report = cached.clone();
        io.write_report(&report).await
    }

    async fn commit_profile_buttons(
        &mut self,
        io: &DeviceIo,
        info: &DeviceInfo,
        profile_index: u32,
    ) -> Result<()> {
        let profile = &info.profiles[profile_index as usize];
        if !profile.buttons.iter().any(|b| b.dirty) {
            return Ok(());
        }

        let Some(data) = self.data.as_mut() else {
            anyhow::bail!("commit before probe");
        };
        let cached = &mut data.profiles[profile_index as usize].buttons;
        header(
            REPORT_TYPE_WRITE,
            MAGIC_BUTTONS,
            profile_index as u8,
            cached,
        );

        for button in &profile.buttons {
            if !button.dirty {
                continue;
            }
            let offset = BUTTON_SLOT_OFFSET + button.index as usize * BUTTON_SLOT_LEN;
            Self::encode_button(
                &button.action,
                &mut cached[offset..offset + BUTTON_SLOT_LEN],
            );
        }

        let report = cached.clone();
        io.write_report(&report).await
    }

    async fn commit_profile_leds(
        &mut self,
        io: &DeviceIo,
        info: &DeviceInfo,
        profile_index: u32,
    ) -> Result<()> {
        let profile = &info.profiles[profile_index as usize];
        let Some(led) = profile.leds.iter().find(|l| l.dirty) else {
            return Ok(());
        };

        let Some(data) = self.data.as_mut() else {
            anyhow::bail!("commit before probe");
        };
        let cached = &mut data.profiles[profile_index as usize].led;
        header(REPORT_TYPE_WRITE, MAGIC_LED, profile_index as u8, cached);

        match led.mode {
            LedMode::Off => {
                cached[8] = 0;
                cached[12] = 0;
                cached[13] = 0;
            }
            LedMode::Breathing => {
                cached[8] = 1;
                cached[12] = (led.effect_duration / 2000).clamp(1, 9) as u8;
                cached[13] = (led.brightness / (255 / 3)).clamp(1, 3) as u8;
            }
            /* Cycle is unsupported; anything else is solid-on. */
            _ => {
                cached[8] = 1;
                cached[12] = 0;
                cached[13] = (led.brightness / (255 / 3)).clamp(1, 3) as u8;
            }
        }
        cached[9] = led.color.red as u8;
        cached[10] = led.color.green as u8;
        cached[11] = led.color.blue as u8;

        let report = cached.clone();
        io.write_report(&report).await
    }
}

impl Default for MarsGamingDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceDriver for MarsGamingDriver {
    fn name(&self) -> &str {
        "Mars Gaming"
    }

    async fn probe(&mut self, io: &DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        /* A device that doesn't answer the status query isn't an MM4. */
        let (active_profile, _) = match self.query_status(io, 0).await {
            Ok(status) => status,
            Err(e) => {
                debug!("marsgaming: status query failed: {e:#}");
                return Err(DriverError::NoDevice.into());
            }
        };

        info.init_profiles(
            NUM_PROFILES,
            NUM_RESOLUTIONS_PER_PROFILE,
            NUM_BUTTONS,
            NUM_LEDS,
        );

        let mut profiles = Vec::with_capacity(NUM_PROFILES as usize);
        for pi in 0..NUM_PROFILES {
            let (_, polling_interval) = self.query_status(io, pi as u8).await?;
            let resolutions = self
                .query_report(io, MAGIC_RESOLUTION, pi as u8, RESOLUTION_REPORT_LEN)
                .await?;
            let buttons = self
                .query_report(io, MAGIC_BUTTONS, pi as u8, BUTTON_REPORT_LEN)
                .await?;
            let led = self
                .query_report(io, MAGIC_LED, pi as u8, LED_REPORT_LEN)
                .await?;

            {
                let profile = &mut info.profiles[pi as usize];
                profile.is_active = pi == u32::from(active_profile);
                profile.report_rates = vec![125, 250, 500, 1000];
                profile.report_rate = 1000 / u32::from(polling_interval);
            }

            Self::populate_resolutions(info, pi, &resolutions);
            Self::populate_buttons(info, pi, &buttons);
            Self::populate_leds(info, pi, &led);

            profiles.push(ProfileData {
                resolutions,
                buttons,
                led,
            });
        }

        self.data = Some(MarsData {
            profiles,
            active_profile,
        });

        Ok(())
    }

    async fn commit(&mut self, io: &DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        if self.data.is_none() {
            anyhow::bail!("commit before probe");
        }

        for pi in 0..info.profiles.len() as u32 {
            if !info.profiles[pi as usize].dirty {
                continue;
            }
            self.commit_profile_rate(io, info, pi).await?;
            self.commit_profile_resolutions(io, info, pi).await?;
            self.commit_profile_buttons(io, info, pi).await?;
            self.commit_profile_leds(io, info, pi).await?;
        }

        Ok(())
    }

    async fn set_active_profile(&mut self, io: &DeviceIo, index: u32) -> Result<()> {
        let mut report = vec![0u8; STATUS_REPORT_LEN];
        header(REPORT_TYPE_WRITE, MAGIC_STATUS, index as u8, &mut report);
        report[8] = index as u8;
        io.write_report(&report).await?;

        if let Some(data) = self.data.as_mut() {
            data.active_profile = index as u8;
        }
        Ok(())
    }

    /* Physical DPI buttons change the active slot without the daemon's
     * involvement; the poll loop calls this to notice. */
    async fn refresh_active_resolution(
        &mut self,
        io: &DeviceIo,
        info: &mut DeviceInfo,
    ) -> Result<bool> {
        let active_profile = match self.data.as_ref() {
            Some(data) => u32::from(data.active_profile),
            None => return Ok(false),
        };

        let report = self
            .query_report(
                io,
                MAGIC_RESOLUTION,
                active_profile as u8,
                RESOLUTION_REPORT_LEN,
            )
            .await?;
        let current = u32::from(report[RESOLUTION_SLOT_OFFSET - 1]);

        let profile = &mut info.profiles[active_profile as usize];
        let mut changed = false;
        for res in &mut profile.resolutions {
            let active = res.index == current;
            if res.is_active != active {
                res.is_active = active;
                changed = true;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dpi_scaling_roundtrip() {
        assert_eq!(raw_to_dpi(dpi_to_raw(800)), 800);
        assert_eq!(raw_to_dpi(dpi_to_raw(16400)), 16400);
        /* Out-of-range values clamp onto the scale. */
        assert_eq!(raw_to_dpi(dpi_to_raw(20)), RES_MIN);
        assert_eq!(raw_to_dpi(dpi_to_raw(30000)), RES_MAX);
    }

    #[test]
    fn test_button_slot_roundtrip() {
        let mut slot = [0u8; BUTTON_SLOT_LEN];
        MarsGamingDriver::encode_button(&ButtonAction::Button(3), &mut slot);
        assert_eq!(
            MarsGamingDriver::parse_button(&slot),
            ButtonAction::Button(3)
        );

        MarsGamingDriver::encode_button(&ButtonAction::None, &mut slot);
        assert_eq!(MarsGamingDriver::parse_button(&slot), ButtonAction::None);
    }

    #[test]
    fn test_header_echo_matching() {
        let mut request = [0u8; STATUS_REPORT_LEN];
        header(REPORT_TYPE_READ, MAGIC_STATUS, 2, &mut request);
        assert!(response_matches(&request, MAGIC_STATUS, 2));
        assert!(!response_matches(&request, MAGIC_LED, 2));
        assert!(!response_matches(&request, MAGIC_STATUS, 1));
    }
}
