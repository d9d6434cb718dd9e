/* End-to-end tests of the commit scheduler, the poll hook, and the
 * synthetic device path, driven through the same actor machinery the bus
 * surface uses. Signals are asserted through the state transitions that
 * gate their emission. */

use std::sync::Arc;

use tokio::sync::RwLock;

use squeakd::actor::{spawn_device_actor, ActorHandle};
use squeakd::device::{DeviceInfo, Dpi};
use squeakd::driver::testdrv::{TestControls, TestDriver};
use squeakd::driver::DeviceIo;
use squeakd::test_device::{build_device_info, parse_json};

const FIVE_RESOLUTION_MOUSE: &str = r#"{
    "profiles": [
        {
            "is_active": true,
            "rate": 1000,
            "capabilities": [101, 102],
            "resolutions": [
                {"xres": 400, "yres": 400, "dpi_min": 400, "dpi_max": 3200,
                 "is_active": true, "is_default": true, "capabilities": [2]},
                {"xres": 800, "yres": 800, "dpi_min": 400, "dpi_max": 3200, "capabilities": [2]},
                {"xres": 1200, "yres": 1200, "dpi_min": 400, "dpi_max": 3200, "capabilities": [2]},
                {"xres": 1600, "yres": 1600, "dpi_min": 400, "dpi_max": 3200, "capabilities": [2]},
                {"xres": 3200, "yres": 3200, "dpi_min": 400, "dpi_max": 3200, "capabilities": [2]}
            ],
            "buttons": [
                {"action_type": "button", "button": 1},
                {"action_type": "button", "button": 2}
            ],
            "leds": [{"mode": 1, "brightness": 255, "color": [0, 255, 0]}]
        },
        {
            "rate": 500,
            "capabilities": [101, 102],
            "resolutions": [
                {"xres": 800, "yres": 800, "dpi_min": 400, "dpi_max": 3200,
                 "is_active": true, "is_default": true}
            ]
        }
    ]
}"#;

async fn spawn_test_device(json: &str) -> (ActorHandle, Arc<RwLock<DeviceInfo>>, TestControls) {
    let spec = parse_json(json).unwrap();
    let info = Arc::new(RwLock::new(build_device_info("testdevice0", &spec)));
    let driver = TestDriver::new(spec);
    let controls = driver.controls();

    let actor = spawn_device_actor(
        DeviceIo::new("/dev/null"),
        Box::new(driver),
        Arc::clone(&info),
    )
    .await
    .unwrap();

    (actor, info, controls)
}

#[tokio::test]
async fn test_commit_clears_every_dirty_flag() {
    let (actor, info, _controls) = spawn_test_device(FIVE_RESOLUTION_MOUSE).await;

    {
        let mut state = info.write().await;
        let profile = state.profile_mut(0).unwrap();
        profile.set_report_rate(500).unwrap();
        profile.set_resolution_dpi(1, Dpi::Unified(1600)).unwrap();
        profile.set_resolution_default(2).unwrap();
        profile.set_button_button(0, 4).unwrap();
        profile
            .set_led_mode(0, squeakd::device::LedMode::Breathing)
            .unwrap();
        assert!(state.is_dirty());
    }

    actor.commit().await.unwrap();

    let state = info.read().await;
    assert!(!state.is_dirty());
    for profile in &state.profiles {
        assert!(!profile.dirty && !profile.rate_dirty && !profile.active_dirty);
        assert!(profile.resolutions.iter().all(|r| !r.dirty));
        assert!(profile.buttons.iter().all(|b| !b.dirty));
        assert!(profile.leds.iter().all(|l| !l.dirty));
    }
    /* The committed values stick. */
    assert_eq!(state.profiles[0].report_rate, 500);
    assert_eq!(state.profiles[0].resolutions[1].dpi_x, 1600);
}

#[tokio::test]
async fn test_commit_failure_rereads_and_clears_dirty() {
    let (actor, info, controls) = spawn_test_device(FIVE_RESOLUTION_MOUSE).await;

    controls.fail_next_commits(1);
    {
        let mut state = info.write().await;
        let profile = state.profile_mut(0).unwrap();
        profile.set_resolution_dpi(0, Dpi::Unified(800)).unwrap();
        assert!(state.is_dirty());
    }

    /* The client still gets an immediate 0 reply on the bus; this error
     * is what triggers the Resync signal. */
    assert!(actor.commit().await.is_err());

    let state = info.read().await;
    /* The re-read restored the hardware view and nothing is left dirty,
     * so a resynced client doesn't see a phantom pending change. */
    assert!(!state.is_dirty());
    assert_eq!(state.profiles[0].resolutions[0].dpi_x, 400);

    /* The failure was one-shot; the next commit goes through. */
    {
        let mut state = info.write().await;
        state
            .profile_mut(0)
            .unwrap()
            .set_resolution_dpi(0, Dpi::Unified(800))
            .unwrap();
    }
    actor.commit().await.unwrap();
    assert_eq!(info.read().await.profiles[0].resolutions[0].dpi_x, 800);
}

#[tokio::test]
async fn test_failed_commit_keeps_earlier_committed_state() {
    let (actor, info, controls) = spawn_test_device(FIVE_RESOLUTION_MOUSE).await;

    /* Commit #1 succeeds: the hardware now holds 800 DPI. */
    {
        let mut state = info.write().await;
        state
            .profile_mut(0)
            .unwrap()
            .set_resolution_dpi(0, Dpi::Unified(800))
            .unwrap();
    }
    actor.commit().await.unwrap();

    /* Commit #2 fails: only its own change may be discarded. */
    controls.fail_next_commits(1);
    {
        let mut state = info.write().await;
        state
            .profile_mut(0)
            .unwrap()
            .set_resolution_dpi(0, Dpi::Unified(1200))
            .unwrap();
    }
    assert!(actor.commit().await.is_err());

    let state = info.read().await;
    assert!(!state.is_dirty());
    /* The re-read reverts to what commit #1 wrote, not to the state the
     * device was first probed with. */
    assert_eq!(state.profiles[0].resolutions[0].dpi_x, 800);
}

#[tokio::test]
async fn test_poll_refresh_reports_hardware_change_once() {
    let (actor, info, controls) = spawn_test_device(FIVE_RESOLUTION_MOUSE).await;

    /* Nothing changed on the device: no resync. */
    assert!(!actor.refresh_active_resolution().await.unwrap());

    /* A physical DPI button press moves the active slot from 0 to 3. */
    controls.press_dpi_button(3);
    assert!(actor.refresh_active_resolution().await.unwrap());

    {
        let state = info.read().await;
        let profile = &state.profiles[0];
        assert!(!profile.resolutions[0].is_active);
        assert!(profile.resolutions[3].is_active);
        assert_eq!(
            profile.resolutions.iter().filter(|r| r.is_active).count(),
            1
        );
    }

    /* The next tick sees no further change, so no resync is emitted. */
    assert!(!actor.refresh_active_resolution().await.unwrap());
}

#[tokio::test]
async fn test_writes_racing_a_commit_are_not_lost() {
    let (actor, info, _controls) = spawn_test_device(FIVE_RESOLUTION_MOUSE).await;

    {
        let mut state = info.write().await;
        state
            .profile_mut(0)
            .unwrap()
            .set_resolution_dpi(0, Dpi::Unified(800))
            .unwrap();
    }

    /* Fire a commit and a write concurrently. Whichever order the lock
     * grants, the write either rides along or stays dirty for the next
     * commit; it is never dropped. */
    let writer = {
        let info = Arc::clone(&info);
        async move {
            let mut state = info.write().await;
            state
                .profile_mut(0)
                .unwrap()
                .set_button_button(1, 7)
                .unwrap();
        }
    };
    let (commit_result, ()) = tokio::join!(actor.commit(), writer);
    commit_result.unwrap();

    {
        let state = info.read().await;
        assert_eq!(
            state.profiles[0].buttons[1].action,
            squeakd::device::ButtonAction::Button(7)
        );
    }

    actor.commit().await.unwrap();

    let state = info.read().await;
    assert!(!state.is_dirty());
    assert_eq!(
        state.profiles[0].buttons[1].action,
        squeakd::device::ButtonAction::Button(7)
    );
}

#[tokio::test]
async fn test_active_profile_transition_commits() {
    let (actor, info, _controls) = spawn_test_device(FIVE_RESOLUTION_MOUSE).await;

    {
        let mut state = info.write().await;
        state.set_active_profile(1).unwrap();
        assert!(state.profiles[1].active_dirty);
    }

    actor.commit().await.unwrap();

    let state = info.read().await;
    assert!(state.profiles[1].is_active);
    assert!(!state.profiles[0].is_active);
    assert!(!state.profiles[0].active_dirty && !state.profiles[1].active_dirty);
}

#[tokio::test]
async fn test_shift_target_moves_exclusively() {
    let (_actor, info, _controls) = spawn_test_device(FIVE_RESOLUTION_MOUSE).await;

    {
        let mut state = info.write().await;
        let profile = state.profile_mut(0).unwrap();
        assert_eq!(profile.set_resolution_dpi_shift_target(2).unwrap(), vec![2]);

        /* Moving the target reports both affected siblings, which is
         * exactly the set of PropertiesChanged signals the bus emits. */
        let changed = profile.set_resolution_dpi_shift_target(4).unwrap();
        assert_eq!(changed, vec![2, 4]);
        assert!(!profile.resolutions[2].is_dpi_shift_target);
        assert!(profile.resolutions[4].is_dpi_shift_target);
        assert!(profile.dirty);
    }
}

#[tokio::test]
async fn test_probe_rejecting_invalid_device() {
    /* Two active profiles violate the invariants; the sanity check after
     * probe discards the device. */
    let json = r#"{
        "profiles": [
            {"is_active": true},
            {"is_active": true}
        ]
    }"#;

    let spec = parse_json(json).unwrap();
    let info = Arc::new(RwLock::new(build_device_info("testdevice0", &spec)));
    let result = spawn_device_actor(
        DeviceIo::new("/dev/null"),
        Box::new(TestDriver::new(spec)),
        info,
    )
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_profile_disable_rules() {
    let (_actor, info, _controls) = spawn_test_device(FIVE_RESOLUTION_MOUSE).await;

    {
        let mut state = info.write().await;

        /* The active profile cannot be disabled. */
        assert!(state.set_profile_enabled(0, false).is_err());

        /* A non-active one can; re-enabling works too. */
        state.set_profile_enabled(1, false).unwrap();
        assert!(!state.profiles[1].is_enabled);

        /* A disabled profile cannot become active. */
        assert!(state.set_active_profile(1).is_err());

        /* With profile 1 disabled, profile 0 is the last enabled one and
         * must stay that way even if it were inactive. */
        state.set_profile_enabled(1, true).unwrap();
        state.set_active_profile(1).unwrap();
        state.set_profile_enabled(0, false).unwrap();
        assert!(state.set_profile_enabled(1, false).is_err());
    }
}

#[tokio::test]
async fn test_rate_clamp_marks_dirty() {
    let (actor, info, _controls) = spawn_test_device(FIVE_RESOLUTION_MOUSE).await;

    {
        let mut state = info.write().await;
        let profile = state.profile_mut(0).unwrap();
        profile.set_report_rate(50).unwrap();
        assert_eq!(profile.report_rate, 125);
        assert!(profile.dirty && profile.rate_dirty);
    }

    actor.commit().await.unwrap();
    let state = info.read().await;
    assert_eq!(state.profiles[0].report_rate, 125);
    assert!(!state.profiles[0].rate_dirty);
}

#[tokio::test]
async fn test_actor_shutdown_rejects_later_commits() {
    let (actor, info, _controls) = spawn_test_device(FIVE_RESOLUTION_MOUSE).await;

    actor.shutdown().await;
    /* Give the actor task a turn to drain the channel. */
    tokio::task::yield_now().await;

    assert!(actor.commit().await.is_err());

    /* Detached state is still readable by clients holding a reference. */
    assert_eq!(info.read().await.sysname, "testdevice0");
}
