//! Telemetry sink: the single consumer of the event queue.
//!
//! Every dequeued event is reported through an [`EventSink`] as
//! [`AppEvent::Toggled`]. The sink also tracks the last sequence seen per
//! source; a skip means the queue discarded events under its overflow
//! policy, and is reported once as [`AppEvent::EventsLost`] ahead of the
//! event that revealed it.

use std::thread::JoinHandle;

use heapless::FnvIndexMap;
use log::warn;

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;
use crate::drivers::task_pin::{Core, spawn_context};
use crate::error::InitError;
use crate::events::{Event, EventQueue};

/// Sources tracked for gap detection. Must be a power of two.
const TRACKED_SOURCES: usize = 8;

pub struct TelemetrySink<'q, S: EventSink, const N: usize> {
    queue: &'q EventQueue<N>,
    sink: S,
    consumed: u64,
    lost: u64,
    last_sequence: FnvIndexMap<u8, u32, TRACKED_SOURCES>,
}

impl<'q, S: EventSink, const N: usize> TelemetrySink<'q, S, N> {
    pub fn new(queue: &'q EventQueue<N>, sink: S) -> Self {
        Self {
            queue,
            sink,
            consumed: 0,
            lost: 0,
            last_sequence: FnvIndexMap::new(),
        }
    }

    /// Block for the next event and report it.
    pub fn process_one(&mut self) -> Event {
        let event = self.queue.dequeue();
        self.handle(event);
        event
    }

    /// Report everything currently queued without blocking.
    pub fn drain(&mut self) -> usize {
        let mut n = 0;
        while let Some(event) = self.queue.try_dequeue() {
            self.handle(event);
            n += 1;
        }
        n
    }

    pub fn run(mut self) -> ! {
        loop {
            self.process_one();
        }
    }

    /// Events reported so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Events known to be missing from the stream.
    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn handle(&mut self, event: Event) {
        let previous = match self.last_sequence.insert(event.source_id, event.sequence) {
            Ok(prev) => prev,
            Err(_) => {
                warn!("sink: not tracking source {}", event.source_id);
                None
            }
        };
        if let Some(prev) = previous {
            let missed = event.sequence.wrapping_sub(prev.wrapping_add(1));
            if missed != 0 {
                self.lost += u64::from(missed);
                self.sink.emit(&AppEvent::EventsLost {
                    source_id: event.source_id,
                    missed,
                });
            }
        }

        self.sink.emit(&AppEvent::Toggled(event));
        self.consumed += 1;
    }
}

/// Start the sink in its own execution context.
pub fn spawn_sink<S, const N: usize>(
    queue: &'static EventQueue<N>,
    sink: S,
    priority: u8,
    stack_kb: usize,
) -> Result<JoinHandle<()>, InitError>
where
    S: EventSink + Send + 'static,
{
    spawn_context(Core::App, priority, stack_kb, "telemetry_sink\0", move || {
        TelemetrySink::new(queue, sink).run()
    })
}
