//! Bounded polling of a device condition.
//!
//! A [PollLoop] keeps re-evaluating a [Probe] while the observed value equals
//! its *waiting value* and reports success as soon as the value changes. The
//! waiting value is chosen per call site: [PollLoop::until_true] waits for a
//! condition to appear, [PollLoop::while_true] waits for it to go away.

use {
    std::{
        thread::sleep,
        time::{Duration, Instant},
    },
    tracing::debug,
};

/// A condition to poll plus an optional side effect run between checks.
pub trait Probe {
    fn evaluate(&mut self) -> anyhow::Result<bool>;

    /// Called after every check that didn't end the wait, before sleeping.
    fn perform(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct FnProbe<C, A> {
    condition: C,
    action: A,
}

/// Wraps a closure as a [Probe] without a side effect.
pub fn probe<C>(condition: C) -> FnProbe<C, fn() -> anyhow::Result<()>>
where
    C: FnMut() -> anyhow::Result<bool>,
{
    FnProbe {
        condition,
        action: || Ok(()),
    }
}

impl<C, A> FnProbe<C, A> {
    pub fn with_action<B>(self, action: B) -> FnProbe<C, B>
    where
        B: FnMut() -> anyhow::Result<()>,
    {
        FnProbe {
            condition: self.condition,
            action,
        }
    }
}

impl<C, A> Probe for FnProbe<C, A>
where
    C: FnMut() -> anyhow::Result<bool>,
    A: FnMut() -> anyhow::Result<()>,
{
    fn evaluate(&mut self) -> anyhow::Result<bool> {
        (self.condition)()
    }

    fn perform(&mut self) -> anyhow::Result<()> {
        (self.action)()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollLoop {
    pub timeout: Duration,
    pub delay: Duration,
    /// Value of the condition that means "keep waiting".
    pub waiting_value: bool,
}

impl PollLoop {
    /// Waits until the condition becomes true.
    pub fn until_true(timeout: Duration, delay: Duration) -> Self {
        Self {
            timeout,
            delay,
            waiting_value: false,
        }
    }

    /// Waits until the condition stops being true.
    pub fn while_true(timeout: Duration, delay: Duration) -> Self {
        Self {
            timeout,
            delay,
            waiting_value: true,
        }
    }

    /// Returns `Ok(true)` as soon as the probe reports something other than
    /// the waiting value and `Ok(false)` once `timeout` has elapsed since the
    /// call. The probe is always evaluated at least once; the delay is only
    /// spent between checks.
    pub fn wait(&self, probe: &mut impl Probe) -> anyhow::Result<bool> {
        let started = Instant::now();
        let mut checks = 0u32;
        loop {
            let value = probe.evaluate()?;
            checks += 1;
            if value != self.waiting_value {
                debug!(checks, elapsed = ?started.elapsed(), "condition reached");
                return Ok(true);
            }
            if started.elapsed() >= self.timeout {
                debug!(checks, "timed out after {:?}", self.timeout);
                return Ok(false);
            }
            probe.perform()?;
            sleep(self.delay);
        }
    }
}

#[cfg(test)]
const TIMEOUT: Duration = Duration::from_millis(120);
#[cfg(test)]
const DELAY: Duration = Duration::from_millis(30);

#[test]
fn immediate_success_skips_sleep() {
    let started = Instant::now();
    let mut actions = 0;
    let ok = PollLoop::until_true(Duration::from_secs(10), Duration::from_secs(10))
        .wait(&mut probe(|| Ok(true)).with_action(|| {
            actions += 1;
            Ok(())
        }))
        .unwrap();
    assert!(ok);
    assert_eq!(actions, 0);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn timeout_bounds() {
    for poll in [
        PollLoop::until_true(TIMEOUT, DELAY),
        PollLoop::while_true(TIMEOUT, DELAY),
    ] {
        let waiting = poll.waiting_value;
        let started = Instant::now();
        let ok = poll.wait(&mut probe(|| Ok(waiting))).unwrap();
        let elapsed = started.elapsed();
        assert!(!ok);
        assert!(elapsed >= TIMEOUT, "{elapsed:?}");
        // Generous slack for scheduler noise on top of one delay.
        assert!(elapsed <= TIMEOUT + DELAY + Duration::from_millis(100), "{elapsed:?}");
    }
}

#[test]
fn zero_timeout_checks_once() {
    let mut checks = 0;
    let ok = PollLoop::while_true(Duration::ZERO, DELAY)
        .wait(&mut probe(|| {
            checks += 1;
            Ok(true)
        }))
        .unwrap();
    assert!(!ok);
    assert_eq!(checks, 1);
}

#[test]
fn action_runs_between_checks() {
    let mut state = 0;
    let mut actions = 0;
    let mut probe = probe(|| {
        state += 1;
        Ok(state >= 3)
    })
    .with_action(|| {
        actions += 1;
        Ok(())
    });
    let ok = PollLoop::until_true(Duration::from_secs(5), Duration::from_millis(1))
        .wait(&mut probe)
        .unwrap();
    drop(probe);
    assert!(ok);
    assert_eq!(state, 3);
    assert_eq!(actions, 2);
}

#[test]
fn probe_errors_propagate() {
    let err = PollLoop::until_true(Duration::from_secs(5), DELAY)
        .wait(&mut probe(|| anyhow::bail!("device offline")))
        .unwrap_err();
    assert_eq!(err.to_string(), "device offline");
}

#[cfg(test)]
struct Counter {
    remaining: u32,
}

#[cfg(test)]
impl Probe for Counter {
    fn evaluate(&mut self) -> anyhow::Result<bool> {
        Ok(self.remaining > 0)
    }

    fn perform(&mut self) -> anyhow::Result<()> {
        self.remaining -= 1;
        Ok(())
    }
}

#[test]
fn custom_probe() {
    let mut counter = Counter { remaining: 4 };
    let ok = PollLoop::while_true(Duration::from_secs(5), Duration::ZERO)
        .wait(&mut counter)
        .unwrap();
    assert!(ok);
    assert_eq!(counter.remaining, 0);
}
