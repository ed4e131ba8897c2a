//! Job lifecycle events.
//!
//! Every job publishes a fixed set of [`SystemEvent`]s as it moves through its
//! lifecycle, plus any number of custom events keyed by name. Listeners are
//! registered per [`EventKey`] and receive a borrowed [`JobEvent`].
//!
//! Each system event also knows how to read its own state from a
//! [`JobFlags`] snapshot: whether it has been reached, and whether it can no
//! longer be reached. The latter lets executors discard jobs that wait on a
//! precondition that will never happen.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::core::job::{Job, JobFlags};

/// Lifecycle events fired by every [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemEvent {
    /// The job reached a terminal state (successful, exceptional or cancelled).
    Done,
    /// The job was cancelled before its body started.
    Aborted,
    /// The job was cancelled.
    Cancel,
    /// The job body failed. Carries the failure as payload.
    Exceptional,
    /// The executor dropped the job from its live set.
    Discarded,
    /// The job body completed successfully.
    Successful,
    /// The executor dispatched the job to the worker pool.
    Scheduled,
    /// The job was dispatched but its dependencies no longer held at run time.
    FailedToStart,
    /// The job body stopped because an interrupt was requested.
    Interrupted,
    /// A listener of this job failed. Carries the failure as payload.
    ExceptionalEvent,
    /// The job body is about to start.
    Execute,
}

impl SystemEvent {
    /// Every system event, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Done,
        Self::Aborted,
        Self::Cancel,
        Self::Exceptional,
        Self::Discarded,
        Self::Successful,
        Self::Scheduled,
        Self::FailedToStart,
        Self::Interrupted,
        Self::ExceptionalEvent,
        Self::Execute,
    ];

    /// Stable event name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Done => "onDone",
            Self::Aborted => "onAborted",
            Self::Cancel => "onCancel",
            Self::Exceptional => "onExceptional",
            Self::Discarded => "onDiscarded",
            Self::Successful => "onSuccessful",
            Self::Scheduled => "onScheduled",
            Self::FailedToStart => "onFailedToStart",
            Self::Interrupted => "onInterrupted",
            Self::ExceptionalEvent => "onExceptionalEvent",
            Self::Execute => "onExecute",
        }
    }

    /// Whether the event fires at most once per job.
    #[must_use]
    pub const fn once_per_job(self) -> bool {
        !matches!(self, Self::Scheduled | Self::FailedToStart | Self::ExceptionalEvent)
    }

    /// Whether the snapshot shows this event as having happened.
    #[must_use]
    pub const fn is_reached(self, flags: &JobFlags) -> bool {
        match self {
            Self::Done => flags.is_done(),
            Self::Aborted => flags.aborted,
            Self::Cancel => flags.cancelled,
            Self::Exceptional => flags.exceptional,
            Self::Discarded => flags.discarded,
            Self::Successful => flags.successful,
            Self::Scheduled => flags.scheduled,
            Self::FailedToStart => flags.failed_to_start > 0,
            Self::Interrupted => flags.interrupted,
            Self::ExceptionalEvent => flags.exceptional_event,
            Self::Execute => flags.executed,
        }
    }

    /// Whether the snapshot proves this event can never happen.
    ///
    /// Monotonic: once true for a job it stays true. `Done`, `Cancel`,
    /// `Discarded` and `ExceptionalEvent` can always be forced from outside
    /// (cancel, executor sweep, custom events) and are never impossible.
    #[must_use]
    pub const fn is_impossible(self, flags: &JobFlags) -> bool {
        let finished = flags.is_discarded_or_done();
        // A closed start gate stays closed even while a late worker holds the claim.
        let cannot_execute_anymore = flags.aborted || (!flags.running && (flags.executed || finished));
        match self {
            Self::Done | Self::Cancel | Self::Discarded | Self::ExceptionalEvent => false,
            Self::Aborted => flags.executed,
            Self::Successful => !flags.successful && cannot_execute_anymore,
            Self::Exceptional => !flags.exceptional && cannot_execute_anymore,
            Self::Interrupted => !flags.interrupted && cannot_execute_anymore,
            Self::Execute => !flags.executed && (flags.aborted || (!flags.running && finished)),
            Self::Scheduled => !flags.scheduled && finished,
            Self::FailedToStart => {
                flags.failed_to_start == 0 && (flags.executed || (finished && !flags.scheduled))
            }
        }
    }
}

impl fmt::Display for SystemEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key under which listeners are registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    /// A lifecycle event.
    System(SystemEvent),
    /// A custom event fired through [`Job::fire_event`].
    Named(String),
}

impl From<SystemEvent> for EventKey {
    fn from(event: SystemEvent) -> Self {
        Self::System(event)
    }
}

impl From<&str> for EventKey {
    fn from(name: &str) -> Self {
        Self::Named(name.to_owned())
    }
}

impl From<String> for EventKey {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System(event) => fmt::Display::fmt(event, f),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Optional data attached to an event.
#[derive(Clone)]
pub enum EventPayload {
    /// A failure: the job body's error or a listener's error.
    Error(Arc<anyhow::Error>),
    /// Arbitrary data passed to [`Job::fire_event`].
    Data(Arc<dyn Any + Send + Sync>),
}

impl EventPayload {
    /// The carried error, if this payload is one.
    #[must_use]
    pub fn error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Error(err) => Some(&**err),
            Self::Data(_) => None,
        }
    }

    /// The carried data downcast to `T`.
    #[must_use]
    pub fn data<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Data(data) => (**data).downcast_ref::<T>(),
            Self::Error(_) => None,
        }
    }
}

impl fmt::Debug for EventPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(err) => f.debug_tuple("Error").field(&err.to_string()).finish(),
            Self::Data(_) => f.write_str("Data(..)"),
        }
    }
}

/// An event delivered to listeners.
#[derive(Debug, Clone)]
pub struct JobEvent<'a> {
    /// Which event fired.
    pub key: EventKey,
    /// The job that fired it.
    pub source: &'a Job,
    /// Attached data, if any.
    pub payload: Option<EventPayload>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> JobFlags {
        JobFlags::default()
    }

    #[test]
    fn test_event_names_are_stable() {
        assert_eq!(SystemEvent::Done.as_str(), "onDone");
        assert_eq!(SystemEvent::FailedToStart.to_string(), "onFailedToStart");
        assert_eq!(EventKey::from("custom").to_string(), "custom");
        assert_eq!(EventKey::from(SystemEvent::Execute).to_string(), "onExecute");
    }

    #[test]
    fn test_repeatable_events() {
        let repeatable: Vec<_> = SystemEvent::ALL.iter().filter(|e| !e.once_per_job()).collect();
        assert_eq!(
            repeatable,
            [&SystemEvent::Scheduled, &SystemEvent::FailedToStart, &SystemEvent::ExceptionalEvent]
        );
    }

    #[test]
    fn test_fresh_job_has_nothing_impossible() {
        let f = flags();
        for event in SystemEvent::ALL {
            assert!(!event.is_reached(&f), "{event} reached on a fresh job");
            assert!(!event.is_impossible(&f), "{event} impossible on a fresh job");
        }
    }

    #[test]
    fn test_failed_job_cannot_succeed() {
        let f = JobFlags { executed: true, exceptional: true, scheduled: true, ..flags() };
        assert!(SystemEvent::Successful.is_impossible(&f));
        assert!(SystemEvent::Interrupted.is_impossible(&f));
        assert!(SystemEvent::Aborted.is_impossible(&f));
        assert!(SystemEvent::FailedToStart.is_impossible(&f));
        assert!(!SystemEvent::Exceptional.is_impossible(&f));
        assert!(!SystemEvent::Done.is_impossible(&f));
        assert!(!SystemEvent::Discarded.is_impossible(&f));
    }

    #[test]
    fn test_running_job_keeps_outcomes_open() {
        let f = JobFlags { executed: true, running: true, scheduled: true, ..flags() };
        assert!(!SystemEvent::Successful.is_impossible(&f));
        assert!(!SystemEvent::Exceptional.is_impossible(&f));
        assert!(!SystemEvent::Interrupted.is_impossible(&f));
        assert!(SystemEvent::Aborted.is_impossible(&f));
    }

    #[test]
    fn test_aborted_job_closes_execution() {
        let f = JobFlags { cancelled: true, aborted: true, ..flags() };
        assert!(SystemEvent::Execute.is_impossible(&f));
        assert!(SystemEvent::Successful.is_impossible(&f));
        assert!(SystemEvent::Scheduled.is_impossible(&f));
        assert!(SystemEvent::FailedToStart.is_impossible(&f));
        assert!(SystemEvent::Aborted.is_reached(&f));
        assert!(!SystemEvent::Cancel.is_impossible(&f));
    }

    #[test]
    fn test_scheduled_then_cancelled_may_still_fail_to_start() {
        let f = JobFlags { cancelled: true, scheduled: true, ..flags() };
        assert!(!SystemEvent::FailedToStart.is_impossible(&f));
        assert!(!SystemEvent::Scheduled.is_impossible(&f));
        assert!(SystemEvent::Execute.is_impossible(&f));
    }

    #[test]
    fn test_interrupted_job_is_inert() {
        let f = JobFlags { executed: true, interrupted: true, scheduled: true, ..flags() };
        assert!(SystemEvent::Successful.is_impossible(&f));
        assert!(!SystemEvent::Interrupted.is_impossible(&f));
        assert!(!SystemEvent::Done.is_impossible(&f));
    }

    /// Walks every combination of boolean flags and checks that no event is
    /// ever both reached and impossible.
    #[test]
    fn test_reached_and_impossible_are_exclusive() {
        for bits in 0u32..(1 << 11) {
            let bit = |n: u32| bits & (1 << n) != 0;
            let f = JobFlags {
                cancelled: bit(0),
                successful: bit(1),
                exceptional: bit(2) && !bit(1),
                interrupted: bit(3),
                exceptional_event: bit(4),
                executed: bit(5),
                aborted: bit(6) && !bit(5) && bit(0),
                scheduled: bit(7),
                discarded: bit(8),
                running: bit(9),
                failed_to_start: u32::from(bit(10)),
            };
            for event in SystemEvent::ALL {
                assert!(
                    !(event.is_reached(&f) && event.is_impossible(&f)),
                    "{event} both reached and impossible for {f:?}"
                );
            }
        }
    }

    // ========================================================================
    // Monotonic impossibility along real lifecycles
    // ========================================================================

    type Step = fn(&mut JobFlags);

    fn schedule(f: &mut JobFlags) {
        f.scheduled = true;
    }
    fn claim(f: &mut JobFlags) {
        f.running = true;
    }
    fn start(f: &mut JobFlags) {
        f.executed = true;
    }
    fn succeed(f: &mut JobFlags) {
        f.successful = true;
    }
    fn fail(f: &mut JobFlags) {
        f.exceptional = true;
    }
    fn stop_on_interrupt(f: &mut JobFlags) {
        f.interrupted = true;
    }
    fn release(f: &mut JobFlags) {
        f.running = false;
    }
    fn count_failed_start(f: &mut JobFlags) {
        f.failed_to_start += 1;
    }
    fn unschedule(f: &mut JobFlags) {
        f.scheduled = false;
    }
    fn close_gate(f: &mut JobFlags) {
        f.aborted = true;
    }
    fn cancel(f: &mut JobFlags) {
        f.cancelled = true;
    }
    fn listener_fault(f: &mut JobFlags) {
        f.exceptional_event = true;
    }
    fn discard(f: &mut JobFlags) {
        f.discarded = true;
    }

    /// Applies `steps` in order and checks no event becomes possible again.
    fn assert_impossible_is_monotonic(name: &str, steps: &[Step]) {
        let mut current = flags();
        for (index, step) in steps.iter().enumerate() {
            let previous = current;
            step(&mut current);
            for event in SystemEvent::ALL {
                assert!(
                    !event.is_impossible(&previous) || event.is_impossible(&current),
                    "{name}: {event} became possible again at step {index}: {previous:?} -> {current:?}"
                );
            }
        }
    }

    #[test]
    fn test_impossible_never_reverts() {
        let paths: [(&str, &[Step]); 8] = [
            ("success", &[schedule, claim, start, succeed, listener_fault, release, discard]),
            ("failure", &[schedule, claim, start, fail, release, discard]),
            (
                "failed start then retry",
                &[schedule, claim, release, count_failed_start, unschedule, schedule, claim, start, succeed, release, discard],
            ),
            ("cancel before scheduling", &[close_gate, cancel, discard]),
            ("cancel while scheduled", &[schedule, close_gate, cancel, claim, release, discard]),
            ("cancel while running", &[schedule, claim, start, cancel, stop_on_interrupt, release, discard]),
            ("interrupt without cancel", &[schedule, claim, start, stop_on_interrupt, release, discard]),
            ("discard before running", &[listener_fault, discard]),
        ];
        for (name, steps) in paths {
            assert_impossible_is_monotonic(name, steps);
        }
    }
}
