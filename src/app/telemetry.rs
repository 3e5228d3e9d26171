//! Telemetry application composition: one emitter context per configured
//! source feeding the shared queue, and one sink context draining it.

use std::thread::JoinHandle;

use log::info;

use crate::adapters::log_sink::LogEventSink;
use crate::app::events::{AppEvent, AppKind};
use crate::app::ports::{EventSink, OutputLine};
use crate::config::SystemConfig;
use crate::drivers::gpio::{PlatformOutput, output_line};
use crate::error::InitError;
use crate::events::{EventQueue, TELEMETRY_QUEUE};
use crate::pins::EMITTER_GPIOS;
use crate::telemetry::{EmitterSpec, spawn_emitter, spawn_sink};

/// Running telemetry contexts.
pub struct TelemetryHandles {
    pub emitters: Vec<JoinHandle<()>>,
    pub sink: JoinHandle<()>,
}

/// Output line for emitter `source_id` on this board.
pub fn emitter_output(source_id: u8) -> PlatformOutput {
    output_line(EMITTER_GPIOS[usize::from(source_id) % EMITTER_GPIOS.len()])
}

/// Start the pipeline on the process-wide queue with board outputs and the
/// console sink.
pub fn start(config: &SystemConfig) -> Result<TelemetryHandles, InitError> {
    start_with(config, &TELEMETRY_QUEUE, emitter_output, LogEventSink::new())
}

/// Start the pipeline with injected outputs and sink.
///
/// The queue's overflow policy is set before any producer exists. An
/// emitter whose output fails to initialise stays inert; the others and
/// the sink keep running.
pub fn start_with<O, S, F, const N: usize>(
    config: &SystemConfig,
    queue: &'static EventQueue<N>,
    mut make_output: F,
    mut sink: S,
) -> Result<TelemetryHandles, InitError>
where
    O: OutputLine + 'static,
    S: EventSink + Send + 'static,
    F: FnMut(u8) -> O,
{
    queue.set_policy(config.queue_policy);
    sink.emit(&AppEvent::Started(AppKind::Telemetry));
    info!(
        "telemetry: {} emitter(s), queue depth {}, policy {:?}",
        config.emitters.len(),
        queue.capacity(),
        config.queue_policy
    );

    let sink = spawn_sink(
        queue,
        sink,
        config.context_priority,
        config.context_stack_kb,
    )?;

    let mut emitters = Vec::with_capacity(config.emitters.len());
    for cfg in &config.emitters {
        let spec = EmitterSpec::from(*cfg);
        let output = make_output(spec.source_id);
        emitters.push(spawn_emitter(
            spec,
            output,
            queue,
            config.context_priority,
            config.context_stack_kb,
        )?);
    }

    Ok(TelemetryHandles { emitters, sink })
}
