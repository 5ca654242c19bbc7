//! Daily wall-clock scheduler
//!
//! One worker thread sleeps on a condition variable until the configured
//! `HH:MM` local time, runs the daily tick at most once per calendar day,
//! and reacts immediately to manual triggers and stop requests.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime};
use log::{error, info};

use crate::models::TriggerSource;
use crate::utils::PkdError;

/// The unit of work the scheduler drives. Implementations swallow their own
/// errors; the scheduler only guards against panics.
pub trait DailyJob: Send + 'static {
    fn run_daily_tick(&mut self, trigger: TriggerSource);
}

impl<F: FnMut(TriggerSource) + Send + 'static> DailyJob for F {
    fn run_daily_tick(&mut self, trigger: TriggerSource) {
        self(trigger)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub hour: u8,
    pub minute: u8,
}

/// Seconds until the next occurrence of `HH:MM` after `now`. A target that
/// already passed today (or is exactly now) lands on tomorrow.
pub fn seconds_until_next(now: NaiveDateTime, hour: u8, minute: u8) -> u64 {
    let Some(today_target) = now
        .date()
        .and_hms_opt(u32::from(hour), u32::from(minute), 0)
    else {
        // Out-of-range schedule values are rejected by config validation;
        // retry shortly if one slips through.
        return 60;
    };
    let target = if today_target > now {
        today_target
    } else {
        today_target + ChronoDuration::days(1)
    };
    (target - now).num_seconds().max(0) as u64
}

struct SchedulerState {
    stop: bool,
    forced: Option<TriggerSource>,
    last_run_date: Option<NaiveDate>,
}

type Shared = (Mutex<SchedulerState>, Condvar);

/// Handle to the single scheduler worker. Dropping the handle stops the
/// worker; an in-flight tick always runs to completion first.
pub struct DailyScheduler {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl DailyScheduler {
    pub fn start<J: DailyJob>(schedule: Schedule, job: J) -> Result<DailyScheduler, PkdError> {
        let shared: Arc<Shared> = Arc::new((
            Mutex::new(SchedulerState {
                stop: false,
                forced: None,
                last_run_date: None,
            }),
            Condvar::new(),
        ));
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("daily-sync".to_string())
            .spawn(move || worker_loop(worker_shared, schedule, job))
            .map_err(|e| {
                PkdError::Scheduler(format!("failed to spawn worker thread: {}", e))
            })?;
        info!(
            "daily scheduler started, next tick at {:02}:{:02} local time",
            schedule.hour, schedule.minute
        );
        Ok(DailyScheduler {
            shared,
            handle: Some(handle),
        })
    }

    /// Enqueue a forced tick. Bypasses the once-per-day guard and wakes the
    /// worker immediately.
    pub fn trigger(&self, source: TriggerSource) {
        let (mutex, cvar) = &*self.shared;
        let mut state = mutex.lock().unwrap_or_else(PoisonError::into_inner);
        state.forced = Some(source);
        cvar.notify_all();
    }

    /// Stop the worker and wait for it to exit. The active tick, if any,
    /// completes first.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        {
            let (mutex, cvar) = &*self.shared;
            let mut state = mutex.lock().unwrap_or_else(PoisonError::into_inner);
            state.stop = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
            info!("daily scheduler stopped");
        }
    }
}

impl Drop for DailyScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<J: DailyJob>(shared: Arc<Shared>, schedule: Schedule, mut job: J) {
    let (mutex, cvar) = &*shared;
    loop {
        let wait_secs = seconds_until_next(Local::now().naive_local(), schedule.hour, schedule.minute);

        let state = mutex.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut state, timeout_result) = cvar
            .wait_timeout_while(state, Duration::from_secs(wait_secs.max(1)), |s| {
                !s.stop && s.forced.is_none()
            })
            .unwrap_or_else(PoisonError::into_inner);

        if state.stop {
            return;
        }
        let forced = state.forced.take();
        let today = Local::now().date_naive();
        let due = match forced {
            Some(_) => true,
            None => timeout_result.timed_out() && state.last_run_date != Some(today),
        };
        if !due {
            continue;
        }
        if forced.is_none() {
            state.last_run_date = Some(today);
        }
        drop(state);

        let source = forced.unwrap_or(TriggerSource::DailySync);
        info!("daily tick starting (trigger {})", source.as_str());
        if catch_unwind(AssertUnwindSafe(|| job.run_daily_tick(source))).is_err() {
            error!("daily tick panicked; scheduler continues");
        }
    }
}
