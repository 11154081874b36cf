//! Timer service.
//!
//! One-shot and periodic timers post their callbacks onto the reactor's
//! task queue, so they run interleaved with every other event on the one
//! reactor thread. A [`Timer`] handle supports pause/resume: a paused
//! timer's fires are dropped, and resuming re-arms with the original
//! period. Dropping the handle cancels the timer.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::sleep;

use crate::context::{Context, Task};
use crate::module::Module;

/// Handle to a pausable periodic timer.
///
/// The timer lives as long as its handle; dropping the last handle cancels
/// the pending fire.
pub struct Timer {
    shared: Rc<TimerShared>,
}

struct TimerShared {
    paused: Cell<bool>,
    resumed: Rc<Notify>,
}

impl Timer {
    /// Stop firing; pending fires while paused are dropped.
    pub fn pause(&self) {
        self.shared.paused.set(true);
    }

    /// Resume a paused timer, re-arming with the original period.
    pub fn resume(&self) {
        self.shared.paused.set(false);
        self.shared.resumed.notify_one();
    }

    /// True while the timer is paused.
    pub fn is_paused(&self) -> bool {
        self.shared.paused.get()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        // wake a possibly parked timer task so it can observe the dead
        // handle and exit
        self.shared.resumed.notify_one();
    }
}

/// Fire `f` once after `delay`.
pub(crate) fn spawn_once<M: Module>(
    tasks: mpsc::UnboundedSender<Task<M>>,
    delay: Duration,
    f: impl FnOnce(&mut M, &mut Context<M>) + 'static,
) {
    tokio::task::spawn_local(async move {
        sleep(delay).await;
        let _ = tasks.send(Box::new(f));
    });
}

/// Fire `f` every `period`, re-arming after each fire, until the reactor
/// stops.
pub(crate) fn spawn_every<M: Module>(
    tasks: mpsc::UnboundedSender<Task<M>>,
    period: Duration,
    f: impl FnMut(&mut M, &mut Context<M>) + 'static,
) {
    let cb = Rc::new(RefCell::new(f));
    tokio::task::spawn_local(async move {
        loop {
            sleep(period).await;
            let cb = cb.clone();
            let task: Task<M> = Box::new(move |module, cx| (cb.borrow_mut())(module, cx));
            if tasks.send(task).is_err() {
                break;
            }
        }
    });
}

/// Fire `f` every `period` under the control of a [`Timer`] handle.
pub(crate) fn spawn_timer<M: Module>(
    tasks: mpsc::UnboundedSender<Task<M>>,
    period: Duration,
    f: impl FnMut(&mut M, &mut Context<M>) + 'static,
) -> Timer {
    let shared = Rc::new(TimerShared {
        paused: Cell::new(false),
        resumed: Rc::new(Notify::new()),
    });
    let weak = Rc::downgrade(&shared);
    let resumed = shared.resumed.clone();
    let cb = Rc::new(RefCell::new(f));

    tokio::task::spawn_local(async move {
        'arm: loop {
            sleep(period).await;

            let paused = match weak.upgrade() {
                None => break 'arm,
                Some(shared) => shared.paused.get(),
            };
            if paused {
                // the fire is dropped; park until resume, then re-arm with
                // the original period
                loop {
                    resumed.notified().await;
                    match weak.upgrade() {
                        None => break 'arm,
                        Some(shared) if !shared.paused.get() => continue 'arm,
                        Some(_) => {}
                    }
                }
            }

            let cb = cb.clone();
            let weak_fire = weak.clone();
            let task: Task<M> = Box::new(move |module, cx| {
                // the callback observes a pause that raced the queue and
                // returns without running
                match weak_fire.upgrade() {
                    Some(shared) if !shared.paused.get() => (cb.borrow_mut())(module, cx),
                    _ => {}
                }
            });
            if tasks.send(task).is_err() {
                break 'arm;
            }
        }
    });

    Timer { shared }
}
