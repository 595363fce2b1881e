/*
 *  tests/scheduler.rs
 *
 *  Integration tests for the frame scheduler
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 */

use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use infocube::config::{Config, PluginCycle, PluginSettings};
use infocube::display::{ExitReason, Frame, LoopState, MockSurface, Scheduler, SchedulerError, TickOutcome};
use infocube::errors::{ConfigError, FetchError, RenderError};
use infocube::fetch::finnhub::QuoteBatch;
use infocube::plugins::{DisplayPlugin, FetchPayload, FetchTask, PluginDescriptor, PluginRegistry};
use infocube::remote::{RunCommand, SharedState};

/// Knobs a test turns while the scheduler owns the plugin.
#[derive(Default)]
struct Knobs {
    reject_activation: bool,
    fail_render: bool,
    panic_render: bool,
    fail_fetch: bool,
    hang_fetch: bool,
    activations: usize,
    deactivations: usize,
    fetches: usize,
}

struct Stub {
    desc: PluginDescriptor,
    color: Rgb888,
    knobs: Arc<Mutex<Knobs>>,
    refresh_every: Option<Duration>,
    data: Option<FetchPayload>,
    /// settings of the last activation; a change drops the data
    settings: PluginSettings,
    last_error: Option<String>,
    finish_after: Option<Duration>,
}

impl Stub {
    fn new(name: &'static str, color: Rgb888) -> (Self, Arc<Mutex<Knobs>>) {
        let knobs = Arc::new(Mutex::new(Knobs::default()));
        let stub = Stub {
            desc: PluginDescriptor { name, description: "test stub", needs_network: false },
            color,
            knobs: knobs.clone(),
            refresh_every: None,
            data: None,
            settings: PluginSettings::new(),
            last_error: None,
            finish_after: None,
        };
        (stub, knobs)
    }
}

impl DisplayPlugin for Stub {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.desc
    }

    fn activate(&mut self, settings: &PluginSettings) -> Result<(), ConfigError> {
        let mut k = self.knobs.lock().unwrap();
        if k.reject_activation {
            return Err(ConfigError::missing(self.desc.name, "api_key"));
        }
        k.activations += 1;
        if *settings != self.settings {
            self.data = None;
            self.settings = settings.clone();
        }
        Ok(())
    }

    fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_every
    }

    fn refresh(&self) -> Option<FetchTask> {
        let (fail, hang) = {
            let mut k = self.knobs.lock().unwrap();
            k.fetches += 1;
            (k.fail_fetch, k.hang_fetch)
        };
        if hang {
            return Some(Box::pin(std::future::pending()));
        }
        Some(Box::pin(async move {
            if fail {
                Err(FetchError::Status { service: "stub".into(), status: 503 })
            } else {
                Ok(FetchPayload::Quotes(QuoteBatch::default()))
            }
        }))
    }

    fn apply_refresh(&mut self, result: Result<FetchPayload, FetchError>) {
        match result {
            Ok(payload) => {
                self.data = Some(payload);
                self.last_error = None;
            }
            Err(e) => self.last_error = Some(e.to_string()),
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }

    fn render_frame(&self, _elapsed: Duration, frame: &mut Frame) -> Result<(), RenderError> {
        // read the knobs first so a panic never poisons them
        let (panic, fail) = {
            let k = self.knobs.lock().unwrap();
            (k.panic_render, k.fail_render)
        };
        if panic {
            panic!("stub exploded");
        }
        if fail {
            return Err(RenderError::Draw("stub failure".into()));
        }
        frame.set_pixel(0, 0, self.color);
        if self.data.is_some() {
            frame.set_pixel(1, 0, Rgb888::GREEN);
        }
        Ok(())
    }

    fn deactivate(&mut self) {
        self.knobs.lock().unwrap().deactivations += 1;
    }

    fn finished(&self, elapsed: Duration) -> bool {
        self.finish_after.is_some_and(|d| elapsed >= d)
    }
}

struct Rig {
    scheduler: Scheduler,
    shared: SharedState,
    surface: MockSurface,
    knobs: Vec<(&'static str, Arc<Mutex<Knobs>>)>,
}

impl Rig {
    fn knobs(&self, name: &str) -> Arc<Mutex<Knobs>> {
        self.knobs.iter().find(|(n, _)| *n == name).map(|(_, k)| k.clone()).unwrap()
    }

    fn shown_color(&self) -> Option<Rgb888> {
        let state = self.surface.state();
        let s = state.lock().unwrap();
        s.last_frame.as_ref().and_then(|f| f.pixel(0, 0))
    }
}

const NAMES: [(&str, Rgb888); 3] = [
    ("clock", Rgb888::WHITE),
    ("weather", Rgb888::BLUE),
    ("moon", Rgb888::YELLOW),
];

fn rig_with(config: Config, tweak: impl Fn(&mut Stub)) -> Rig {
    let shared = SharedState::new(config, None);
    let surface = MockSurface::new();
    let mut plugins: Vec<Box<dyn DisplayPlugin>> = Vec::new();
    let mut knobs = Vec::new();
    for (name, color) in NAMES {
        let (mut stub, k) = Stub::new(name, color);
        tweak(&mut stub);
        plugins.push(Box::new(stub));
        knobs.push((name, k));
    }
    let scheduler = Scheduler::new(
        PluginRegistry::with_plugins(plugins),
        Box::new(surface.clone()),
        shared.view(),
    );
    Rig { scheduler, shared, surface, knobs }
}

fn rig() -> Rig {
    rig_with(Config::default(), |_| {})
}

#[test]
fn last_successful_switch_wins() {
    let mut r = rig();
    let t0 = Instant::now();
    r.scheduler.start(t0).unwrap();
    let remote = r.shared.remote();

    remote.set_plugin("weather").unwrap();
    r.scheduler.tick(t0, 0).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("weather"));

    // moon rejects its settings: weather stays on screen
    r.knobs("moon").lock().unwrap().reject_activation = true;
    remote.set_plugin("moon").unwrap();
    r.scheduler.tick(t0 + Duration::from_secs(1), 0).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("weather"));
    assert!(r.scheduler.last_error("moon").is_some());
    assert_eq!(r.shown_color(), Some(Rgb888::BLUE));
    // the shared state is corrected to what is really shown
    assert_eq!(r.shared.config().current_state.active_plugin, "weather");

    // prayer is enabled but has no instance here
    remote.set_plugin("prayer").unwrap();
    r.scheduler.tick(t0 + Duration::from_secs(2), 0).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("weather"));

    remote.set_plugin("clock").unwrap();
    r.scheduler.tick(t0 + Duration::from_secs(3), 0).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("clock"));
    assert_eq!(r.shown_color(), Some(Rgb888::WHITE));

    // weather went through activate, deactivate, and the rejected moon
    // switch re-activated it once more
    let w = r.knobs("weather");
    let w = w.lock().unwrap();
    assert_eq!(w.activations, 2);
    assert_eq!(w.deactivations, 2);
}

fn cycling_config() -> Config {
    let mut cfg = Config::default();
    cfg.plugin_cycle = PluginCycle {
        enabled: true,
        plugins: vec!["clock".into(), "weather".into(), "moon".into()],
        duration: 30,
        last_switch: 0,
    };
    cfg
}

#[test]
fn cycles_through_list() {
    let mut r = rig_with(cycling_config(), |_| {});
    let t0 = Instant::now();
    r.scheduler.start(t0).unwrap();
    let at = |s: u64| t0 + Duration::from_secs(s);

    r.scheduler.tick(at(29), 29).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("clock"));
    r.scheduler.tick(at(30), 30).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("weather"));
    assert_eq!(r.shared.config().plugin_cycle.last_switch, 30);
    r.scheduler.tick(at(60), 60).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("moon"));
    r.scheduler.tick(at(90), 90).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("clock"));
}

#[test]
fn cycle_skips_rejected_plugin() {
    let mut r = rig_with(cycling_config(), |_| {});
    let t0 = Instant::now();
    r.scheduler.start(t0).unwrap();
    r.knobs("weather").lock().unwrap().reject_activation = true;

    r.scheduler.tick(t0 + Duration::from_secs(30), 30).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("moon"));
}

#[test]
fn manual_switch_postpones_rotation() {
    let mut r = rig_with(cycling_config(), |_| {});
    let t0 = Instant::now();
    r.scheduler.start(t0).unwrap();

    r.shared.remote().set_plugin("moon").unwrap();
    r.scheduler.tick(t0 + Duration::from_secs(30), 30).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("moon"));

    r.scheduler.tick(t0 + Duration::from_secs(59), 59).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("moon"));
    r.scheduler.tick(t0 + Duration::from_secs(60), 60).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("clock"));
}

#[test]
fn falls_back_after_three_render_failures() {
    let mut r = rig();
    let t0 = Instant::now();
    r.scheduler.start(t0).unwrap();
    r.shared.remote().set_plugin("moon").unwrap();
    r.scheduler.tick(t0, 0).unwrap();
    let shows = r.surface.state().lock().unwrap().show_count;

    let moon = r.knobs("moon");
    moon.lock().unwrap().fail_render = true;
    r.scheduler.tick(t0, 0).unwrap();
    r.scheduler.tick(t0, 0).unwrap();
    assert_eq!(r.scheduler.render_failures(), 2);

    // a success in between resets the count
    moon.lock().unwrap().fail_render = false;
    r.scheduler.tick(t0, 0).unwrap();
    assert_eq!(r.scheduler.render_failures(), 0);

    moon.lock().unwrap().fail_render = true;
    r.scheduler.tick(t0, 0).unwrap();
    r.scheduler.tick(t0, 0).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("moon"));
    r.scheduler.tick(t0, 0).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("clock"));
    assert_eq!(r.scheduler.render_failures(), 0);

    // failed frames were never shown
    assert_eq!(r.surface.state().lock().unwrap().show_count, shows + 1);
    r.scheduler.tick(t0, 0).unwrap();
    assert_eq!(r.shown_color(), Some(Rgb888::WHITE));
}

#[test]
fn panicking_render_counts_as_failure() {
    let mut r = rig();
    let t0 = Instant::now();
    r.scheduler.start(t0).unwrap();
    r.shared.remote().set_plugin("weather").unwrap();
    r.scheduler.tick(t0, 0).unwrap();

    r.knobs("weather").lock().unwrap().panic_render = true;
    for _ in 0..3 {
        r.scheduler.tick(t0, 0).unwrap();
    }
    assert_eq!(r.scheduler.active_plugin(), Some("clock"));
}

#[test]
fn default_failing_does_not_fall_back_to_itself() {
    let mut r = rig();
    let t0 = Instant::now();
    r.scheduler.start(t0).unwrap();
    r.knobs("clock").lock().unwrap().fail_render = true;
    for _ in 0..5 {
        r.scheduler.tick(t0, 0).unwrap();
    }
    assert_eq!(r.scheduler.active_plugin(), Some("clock"));
    assert_eq!(r.scheduler.render_failures(), 5);
}

#[test]
fn overrun_iterations_still_render() {
    let mut r = rig();
    let t0 = Instant::now();
    r.scheduler.start(t0).unwrap();
    // wildly irregular tick times, including one going backwards
    for s in [0u64, 5, 3, 400, 401] {
        r.scheduler.tick(t0 + Duration::from_secs(s), s as i64).unwrap();
    }
    assert_eq!(r.scheduler.frames(), 5);
}

#[test]
fn brightness_and_settings_changes_reach_the_loop() {
    let mut r = rig();
    let t0 = Instant::now();
    r.scheduler.start(t0).unwrap();
    r.shared.remote().set_brightness(25).unwrap();
    r.scheduler.tick(t0, 0).unwrap();
    assert_eq!(r.surface.state().lock().unwrap().last_brightness, Some(25));

    let clock = r.knobs("clock");
    let before = clock.lock().unwrap().activations;
    let changes = serde_json::json!({ "show_seconds": true }).as_object().unwrap().clone();
    r.shared.remote().set_plugin_settings("clock", changes).unwrap();
    r.scheduler.tick(t0, 0).unwrap();
    assert_eq!(clock.lock().unwrap().activations, before + 1);
}

#[test]
fn finished_plugin_hands_over_to_default() {
    let mut r = rig_with(Config::default(), |s| {
        if s.desc.name == "moon" {
            s.finish_after = Some(Duration::from_secs(10));
        }
    });
    let t0 = Instant::now();
    r.scheduler.start(t0).unwrap();
    r.shared.remote().set_plugin("moon").unwrap();
    r.scheduler.tick(t0, 0).unwrap();
    r.scheduler.tick(t0 + Duration::from_secs(9), 9).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("moon"));
    r.scheduler.tick(t0 + Duration::from_secs(10), 10).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("clock"));
}

#[tokio::test]
async fn fetch_failure_keeps_stale_data() {
    let mut r = rig_with(Config::default(), |s| s.refresh_every = Some(Duration::from_secs(60)));
    let t0 = Instant::now();
    r.scheduler.start(t0).unwrap();

    // first refresh succeeds
    r.scheduler.tick(t0, 0).unwrap();
    for _ in 0..20 {
        tokio::task::yield_now().await;
        r.scheduler.tick(t0, 0).unwrap();
        if !r.scheduler.refresh_in_flight() {
            break;
        }
    }
    assert!(!r.scheduler.refresh_in_flight());
    let frame = r.surface.state().lock().unwrap().last_frame.clone().unwrap();
    assert_eq!(frame.pixel(1, 0), Some(Rgb888::GREEN));

    // not due again before the interval
    let clock = r.knobs("clock");
    assert_eq!(clock.lock().unwrap().fetches, 1);
    r.scheduler.tick(t0 + Duration::from_secs(59), 0).unwrap();
    assert_eq!(clock.lock().unwrap().fetches, 1);

    clock.lock().unwrap().fail_fetch = true;
    let t1 = t0 + Duration::from_secs(61);
    r.scheduler.tick(t1, 0).unwrap();
    assert_eq!(clock.lock().unwrap().fetches, 2);
    for _ in 0..20 {
        tokio::task::yield_now().await;
        r.scheduler.tick(t1, 0).unwrap();
        if !r.scheduler.refresh_in_flight() {
            break;
        }
    }
    let frame = r.surface.state().lock().unwrap().last_frame.clone().unwrap();
    assert_eq!(frame.pixel(1, 0), Some(Rgb888::GREEN));
    assert_eq!(r.shared.status().active_plugin.as_deref(), Some("clock"));
}

/// Tick at `now` until the in-flight refresh has been handed back.
async fn settle_refresh(r: &mut Rig, now: Instant) {
    for _ in 0..20 {
        tokio::task::yield_now().await;
        r.scheduler.tick(now, 0).unwrap();
        if !r.scheduler.refresh_in_flight() {
            return;
        }
    }
    panic!("refresh never completed");
}

fn has_data(r: &Rig) -> bool {
    let state = r.surface.state();
    let s = state.lock().unwrap();
    s.last_frame.as_ref().and_then(|f| f.pixel(1, 0)) == Some(Rgb888::GREEN)
}

#[tokio::test]
async fn settings_changed_while_inactive_refresh_on_return() {
    let mut r = rig_with(Config::default(), |s| {
        if s.desc.name == "weather" {
            s.refresh_every = Some(Duration::from_secs(3600));
        }
    });
    let t0 = Instant::now();
    r.scheduler.start(t0).unwrap();
    let remote = r.shared.remote();

    remote.set_plugin("weather").unwrap();
    r.scheduler.tick(t0, 0).unwrap();
    settle_refresh(&mut r, t0).await;
    r.scheduler.tick(t0, 0).unwrap();
    assert!(has_data(&r));
    let weather = r.knobs("weather");
    assert_eq!(weather.lock().unwrap().fetches, 1);

    remote.set_plugin("clock").unwrap();
    r.scheduler.tick(t0 + Duration::from_secs(10), 0).unwrap();
    let changes = serde_json::json!({ "city_id": 5128581 }).as_object().unwrap().clone();
    remote.set_plugin_settings("weather", changes).unwrap();
    r.scheduler.tick(t0 + Duration::from_secs(20), 0).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("clock"));

    // back on weather with an empty cache: fetch now, not an hour later
    let t1 = t0 + Duration::from_secs(30);
    remote.set_plugin("weather").unwrap();
    r.scheduler.tick(t1, 0).unwrap();
    assert_eq!(r.scheduler.active_plugin(), Some("weather"));
    assert!(r.scheduler.refresh_in_flight());
    assert_eq!(weather.lock().unwrap().fetches, 2);
    settle_refresh(&mut r, t1).await;
    r.scheduler.tick(t1, 0).unwrap();
    assert!(has_data(&r));

    // unchanged settings keep the schedule
    remote.set_plugin("clock").unwrap();
    r.scheduler.tick(t1 + Duration::from_secs(1), 0).unwrap();
    remote.set_plugin("weather").unwrap();
    r.scheduler.tick(t1 + Duration::from_secs(2), 0).unwrap();
    assert!(!r.scheduler.refresh_in_flight());
    assert_eq!(weather.lock().unwrap().fetches, 2);
}

#[tokio::test(start_paused = true)]
async fn hung_refresh_times_out_and_retries() {
    let mut r = rig_with(Config::default(), |s| s.refresh_every = Some(Duration::from_secs(3600)));
    let defaults = Config::default().defaults;
    let timeout = Duration::from_secs(defaults.fetch_timeout_secs);
    let retry = Duration::from_secs(defaults.fetch_retry_secs);
    let t0 = Instant::now();
    r.scheduler.start(t0).unwrap();
    r.scheduler.tick(t0, 0).unwrap();
    settle_refresh(&mut r, t0).await;

    let clock = r.knobs("clock");
    clock.lock().unwrap().hang_fetch = true;
    let t1 = t0 + Duration::from_secs(3600);
    r.scheduler.tick(t1, 0).unwrap();
    assert!(r.scheduler.refresh_in_flight());
    assert_eq!(clock.lock().unwrap().fetches, 2);
    // let the fetch task arm its timer
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    let frames = r.scheduler.frames();
    tokio::time::advance(timeout - Duration::from_secs(1)).await;
    for _ in 0..5 {
        r.scheduler.tick(t1, 0).unwrap();
        tokio::task::yield_now().await;
    }
    assert!(r.scheduler.refresh_in_flight());
    assert_eq!(r.scheduler.frames(), frames + 5);
    assert!(has_data(&r));

    tokio::time::advance(Duration::from_secs(2)).await;
    let t2 = t1 + timeout + Duration::from_secs(1);
    settle_refresh(&mut r, t2).await;
    assert!(r.scheduler.last_error("clock").is_some_and(|e| e.contains("timed out")));
    r.scheduler.tick(t2, 0).unwrap();
    assert!(has_data(&r));

    // transient failure: retried after the retry delay, not the interval
    r.scheduler.tick(t1 + retry - Duration::from_secs(1), 0).unwrap();
    assert_eq!(clock.lock().unwrap().fetches, 2);
    r.scheduler.tick(t1 + retry, 0).unwrap();
    assert_eq!(clock.lock().unwrap().fetches, 3);
    assert!(r.scheduler.refresh_in_flight());
}

#[test]
fn start_without_usable_plugin_leaves_loop_stopped() {
    let mut r = rig();
    for (name, _) in NAMES {
        r.knobs(name).lock().unwrap().reject_activation = true;
    }
    let result = r.scheduler.start(Instant::now());
    assert!(matches!(result, Err(SchedulerError::NoPlugin)));
    assert_eq!(r.scheduler.state(), LoopState::Stopped);
    assert_eq!(r.scheduler.active_plugin(), None);
    assert_eq!(r.surface.state().lock().unwrap().release_count, 1);
    let status = r.shared.status();
    assert_eq!(status.state, LoopState::Stopped);
    assert!(status.last_errors.contains_key("clock"));
}

#[test]
fn stop_and_shutdown_release_the_surface() {
    let mut r = rig();
    let t0 = Instant::now();
    r.scheduler.start(t0).unwrap();
    r.scheduler.tick(t0, 0).unwrap();

    r.shared.remote().request(RunCommand::Shutdown);
    let out = r.scheduler.tick(t0, 0).unwrap();
    assert_eq!(out, TickOutcome::Exit(ExitReason::Shutdown));
    assert_eq!(r.scheduler.state(), LoopState::Stopped);
    assert_eq!(r.scheduler.active_plugin(), None);
    let state = r.surface.state();
    let s = state.lock().unwrap();
    assert_eq!(s.release_count, 1);
    assert!(!s.is_initialized);
    assert_eq!(r.knobs("clock").lock().unwrap().deactivations, 1);
}

#[test]
fn hardware_failure_is_fatal() {
    let mut r = rig();
    let t0 = Instant::now();
    r.scheduler.start(t0).unwrap();
    r.surface.state().lock().unwrap().simulate_show_failure = true;
    assert!(r.scheduler.tick(t0, 0).is_err());
}
