//! Periodic emitter: toggles one output on a fixed schedule and reports
//! every toggle to the telemetry queue.
//!
//! Scheduling is driven by [`Emitter::poll`] with an explicit "now", so the
//! same code runs under wall-clock time ([`Emitter::run`]) and virtual time
//! (tests). Ticks are due at `0, period, 2*period, ...` from the start of
//! the schedule; a late poll fires every tick it missed, in order.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::app::ports::OutputLine;
use crate::config::EmitterConfig;
use crate::drivers::task_pin::{Core, spawn_context};
use crate::error::InitError;
use crate::events::{Enqueued, Event, EventQueue};

/// Shortest accepted period. Guards `poll` against a zero-length schedule.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Execution context names, indexed by source id.
const CONTEXT_NAMES: [&str; 4] = ["emitter0\0", "emitter1\0", "emitter2\0", "emitter3\0"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitterSpec {
    pub source_id: u8,
    pub period: Duration,
}

impl From<EmitterConfig> for EmitterSpec {
    fn from(cfg: EmitterConfig) -> Self {
        Self {
            source_id: cfg.source_id,
            period: Duration::from_millis(u64::from(cfg.period_ms)),
        }
    }
}

pub struct Emitter<'q, O: OutputLine, const N: usize> {
    spec: EmitterSpec,
    output: O,
    queue: &'q EventQueue<N>,
    tick: u32,
    next_due: Duration,
    rejected: u32,
}

impl<'q, O: OutputLine, const N: usize> Emitter<'q, O, N> {
    /// Check and configure the output. An emitter that fails here never
    /// produces events.
    pub fn init(spec: EmitterSpec, mut output: O, queue: &'q EventQueue<N>) -> Result<Self, InitError> {
        if !output.is_ready() {
            error!("Error: {} device is not ready", output.port_name());
            return Err(InitError::DeviceNotReady {
                port: output.port_name(),
            });
        }
        if let Err(rc) = output.configure_output() {
            error!(
                "Error {}: failed to configure pin {} (LED '{}')",
                rc,
                output.pin(),
                spec.source_id
            );
            return Err(InitError::PinConfigure {
                pin: output.pin(),
                id: spec.source_id,
                rc,
            });
        }

        let period = spec.period.max(MIN_PERIOD);
        info!(
            "emitter {}: {} pin {} every {} ms",
            spec.source_id,
            output.port_name(),
            output.pin(),
            period.as_millis()
        );
        Ok(Self {
            spec: EmitterSpec { period, ..spec },
            output,
            queue,
            tick: 0,
            next_due: Duration::ZERO,
            rejected: 0,
        })
    }

    /// One toggle: drive the output to `tick % 2`, report, advance.
    pub fn tick(&mut self) {
        self.output.drive(self.tick % 2 == 1);

        let event = Event {
            source_id: self.spec.source_id,
            sequence: self.tick,
        };
        match self.queue.enqueue(event) {
            Enqueued::Stored => {}
            Enqueued::StoredAfterEviction => {
                debug!("emitter {}: queue full, oldest event evicted", self.spec.source_id);
            }
            Enqueued::Rejected => {
                self.rejected = self.rejected.wrapping_add(1);
                warn!(
                    "emitter {}: queue full, event {} dropped",
                    self.spec.source_id, self.tick
                );
            }
        }

        self.tick = self.tick.wrapping_add(1);
    }

    /// Fire every tick due at or before `now` (measured from the start of
    /// the schedule). Returns how many fired.
    pub fn poll(&mut self, now: Duration) -> usize {
        let mut fired = 0;
        while self.next_due <= now {
            self.tick();
            self.next_due += self.spec.period;
            fired += 1;
        }
        fired
    }

    /// Drive the schedule from the wall clock forever.
    pub fn run(mut self) -> ! {
        let start = Instant::now();
        loop {
            self.poll(start.elapsed());
            if let Some(wait) = self.next_due.checked_sub(start.elapsed()) {
                std::thread::sleep(wait);
            }
        }
    }

    pub fn spec(&self) -> EmitterSpec {
        self.spec
    }

    /// Ticks taken so far; also the sequence number of the next event.
    pub fn ticks(&self) -> u32 {
        self.tick
    }

    /// Events this emitter had rejected by the queue.
    pub fn rejected(&self) -> u32 {
        self.rejected
    }
}

/// Start an emitter in its own execution context.
///
/// Output initialisation happens inside the new context; if it fails the
/// context logs and exits without producing anything, leaving the rest of
/// the application running.
pub fn spawn_emitter<O, const N: usize>(
    spec: EmitterSpec,
    output: O,
    queue: &'static EventQueue<N>,
    priority: u8,
    stack_kb: usize,
) -> Result<JoinHandle<()>, InitError>
where
    O: OutputLine + 'static,
{
    let name = CONTEXT_NAMES[usize::from(spec.source_id) % CONTEXT_NAMES.len()];
    spawn_context(Core::App, priority, stack_kb, name, move || {
        match Emitter::init(spec, output, queue) {
            Ok(emitter) => emitter.run(),
            Err(e) => warn!("emitter {} inert: {}", spec.source_id, e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::gpio::SimOutputPin;
    use crate::events::OverflowPolicy;

    fn spec(source_id: u8, ms: u64) -> EmitterSpec {
        EmitterSpec {
            source_id,
            period: Duration::from_millis(ms),
        }
    }

    #[test]
    fn fires_on_schedule_in_virtual_time() {
        let q: EventQueue<32> = EventQueue::new(OverflowPolicy::RejectAndCount);
        let mut em = Emitter::init(spec(0, 100), SimOutputPin::new("gpio0", 11), &q).unwrap();

        assert_eq!(em.poll(Duration::ZERO), 1);
        assert_eq!(em.poll(Duration::from_millis(99)), 0);
        assert_eq!(em.poll(Duration::from_millis(1000)), 10);
        assert_eq!(q.len(), 11);
        for seq in 0..11 {
            assert_eq!(
                q.try_dequeue(),
                Some(Event {
                    source_id: 0,
                    sequence: seq
                })
            );
        }
    }

    #[test]
    fn output_follows_tick_parity() {
        let q: EventQueue<8> = EventQueue::new(OverflowPolicy::RejectAndCount);
        let pin = SimOutputPin::new("gpio0", 12);
        let mut em = Emitter::init(spec(1, 1000), pin.clone(), &q).unwrap();

        em.tick();
        assert!(!pin.level());
        em.tick();
        assert!(pin.level());
        em.tick();
        assert!(!pin.level());
        assert_eq!(em.ticks(), 3);
    }

    #[test]
    fn not_ready_output_never_enqueues() {
        let q: EventQueue<8> = EventQueue::new(OverflowPolicy::RejectAndCount);
        let pin = SimOutputPin::new("gpio0", 11).not_ready();
        let err = Emitter::init(spec(0, 100), pin, &q).err();
        assert_eq!(err, Some(InitError::DeviceNotReady { port: "gpio0" }));
        assert!(q.is_empty());
    }

    #[test]
    fn configure_failure_reports_pin_and_id() {
        let q: EventQueue<8> = EventQueue::new(OverflowPolicy::RejectAndCount);
        let pin = SimOutputPin::new("gpio0", 12).failing_configure(-5);
        let err = Emitter::init(spec(1, 100), pin, &q).err();
        assert_eq!(
            err,
            Some(InitError::PinConfigure {
                pin: 12,
                id: 1,
                rc: -5
            })
        );
    }

    #[test]
    fn full_queue_counts_rejections_and_keeps_ticking() {
        let q: EventQueue<2> = EventQueue::new(OverflowPolicy::RejectAndCount);
        let mut em = Emitter::init(spec(0, 10), SimOutputPin::new("gpio0", 11), &q).unwrap();
        assert_eq!(em.poll(Duration::from_millis(40)), 5);
        assert_eq!(em.rejected(), 3);
        assert_eq!(em.ticks(), 5);
    }

    #[test]
    fn two_emitters_interleave_by_schedule() {
        let q: EventQueue<32> = EventQueue::new(OverflowPolicy::RejectAndCount);
        let mut fast = Emitter::init(spec(0, 100), SimOutputPin::new("gpio0", 11), &q).unwrap();
        let mut slow = Emitter::init(spec(1, 1000), SimOutputPin::new("gpio0", 12), &q).unwrap();

        for ms in (0..=1000).step_by(50) {
            let now = Duration::from_millis(ms);
            fast.poll(now);
            slow.poll(now);
        }
        let mut counts = [0u32; 2];
        while let Some(e) = q.try_dequeue() {
            counts[e.source_id as usize] += 1;
        }
        assert_eq!(counts, [11, 2]);
    }

    #[test]
    fn zero_period_is_clamped() {
        let q: EventQueue<4> = EventQueue::new(OverflowPolicy::RejectAndCount);
        let em = Emitter::init(spec(0, 0), SimOutputPin::new("gpio0", 11), &q).unwrap();
        assert_eq!(em.spec().period, MIN_PERIOD);
    }
}
