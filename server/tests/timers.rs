//! Timer service: one-shot, periodic, and pause/resume behavior.

mod common;

use common::{free_port, Runner, TestProto};
use protomux_server::{Context, Module, Timer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn wait_for(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

struct OneShot {
    fired: Arc<AtomicUsize>,
}

impl Module for OneShot {
    type Protocol = TestProto;

    fn on_initialized(&mut self, cx: &mut Context<Self>) {
        cx.schedule_after(Duration::from_millis(10), |m: &mut Self, _cx| {
            m.fired.fetch_add(1, Ordering::SeqCst);
        });
    }
}

#[test]
fn one_shot_fires_once() {
    let port = free_port();
    let fired = Arc::new(AtomicUsize::new(0));
    let _server = Runner::start(
        {
            let fired = fired.clone();
            move || OneShot { fired }
        },
        port,
    );

    assert!(wait_for(
        || fired.load(Ordering::SeqCst) == 1,
        Duration::from_secs(5)
    ));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

struct Periodic {
    ticks: Arc<AtomicUsize>,
}

impl Module for Periodic {
    type Protocol = TestProto;

    fn on_initialized(&mut self, cx: &mut Context<Self>) {
        cx.schedule_every(Duration::from_millis(5), |m: &mut Self, _cx| {
            m.ticks.fetch_add(1, Ordering::SeqCst);
        });
    }
}

#[test]
fn periodic_rearms_from_its_own_fire() {
    let port = free_port();
    let ticks = Arc::new(AtomicUsize::new(0));
    let _server = Runner::start(
        {
            let ticks = ticks.clone();
            move || Periodic { ticks }
        },
        port,
    );

    assert!(wait_for(
        || ticks.load(Ordering::SeqCst) >= 5,
        Duration::from_secs(5)
    ));
}

/// Runs a pausable timer and pauses it from its third fire.
struct SelfPausing {
    ticks: Arc<AtomicUsize>,
    timer: Option<Timer>,
}

impl Module for SelfPausing {
    type Protocol = TestProto;

    fn on_initialized(&mut self, cx: &mut Context<Self>) {
        let timer = cx.create_timer(Duration::from_millis(5), |m: &mut Self, _cx| {
            let seen = m.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if seen == 3 {
                if let Some(timer) = &m.timer {
                    timer.pause();
                }
            }
        });
        self.timer = Some(timer);

        // resume well after the pause has settled
        cx.schedule_after(Duration::from_millis(200), |m: &mut Self, _cx| {
            if let Some(timer) = &m.timer {
                timer.resume();
            }
        });
    }
}

#[test]
fn paused_timer_drops_fires_and_resumes() {
    let port = free_port();
    let ticks = Arc::new(AtomicUsize::new(0));
    let _server = Runner::start(
        {
            let ticks = ticks.clone();
            move || SelfPausing { ticks, timer: None }
        },
        port,
    );

    // the timer reaches its pause point
    assert!(wait_for(
        || ticks.load(Ordering::SeqCst) >= 3,
        Duration::from_secs(5)
    ));
    let at_pause = ticks.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(100));
    // fires while paused are dropped
    assert_eq!(ticks.load(Ordering::SeqCst), at_pause);

    // after the scheduled resume, ticks flow again
    assert!(wait_for(
        || ticks.load(Ordering::SeqCst) > at_pause,
        Duration::from_secs(5)
    ));
}
