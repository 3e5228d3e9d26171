//! Telemetry pipeline end to end: emitter contexts → queue → sink context,
//! on real threads and wall-clock time.

use std::collections::HashMap;
use std::time::Duration;

use lbskit::app::events::{AppEvent, AppKind};
use lbskit::app::telemetry::start_with;
use lbskit::config::{EmitterConfig, SystemConfig};
use lbskit::drivers::gpio::SimOutputPin;
use lbskit::events::{EventQueue, OverflowPolicy};

use crate::mock_hw::RecordingSink;

fn leaked_queue() -> &'static EventQueue<32> {
    Box::leak(Box::new(EventQueue::new(OverflowPolicy::RejectAndCount)))
}

/// Sequences seen per source, in sink order.
fn sequences(events: &[AppEvent]) -> HashMap<u8, Vec<u32>> {
    let mut out: HashMap<u8, Vec<u32>> = HashMap::new();
    for e in events {
        if let AppEvent::Toggled(ev) = e {
            out.entry(ev.source_id).or_default().push(ev.sequence);
        }
    }
    out
}

#[test]
fn both_sources_reach_the_sink_in_order() {
    let config = SystemConfig::default();
    let sink = RecordingSink::new();
    let pins: Vec<SimOutputPin> = (0..2).map(|i| SimOutputPin::new("gpio0", 11 + i)).collect();
    let outputs = pins.clone();

    start_with(&config, leaked_queue(), move |id| outputs[usize::from(id)].clone(), sink.clone()).unwrap();

    let seen = sink.wait_for(Duration::from_secs(3), |evs| {
        let s = sequences(evs);
        s.get(&0).is_some_and(|v| v.len() >= 5) && s.get(&1).is_some_and(|v| !v.is_empty())
    });
    assert!(seen, "both emitters should report within 3 s");

    let events = sink.events();
    assert_eq!(events[0], AppEvent::Started(AppKind::Telemetry));
    for (source, seqs) in sequences(&events) {
        let expected: Vec<u32> = (0..seqs.len() as u32).collect();
        assert_eq!(seqs, expected, "source {source} must be gap-free from 0");
    }
    assert!(pins[0].toggles() >= 4, "fast output must be toggling");
}

#[test]
fn not_ready_emitter_stays_silent() {
    let config = SystemConfig::default();
    let sink = RecordingSink::new();
    start_with(
        &config,
        leaked_queue(),
        |id| {
            let pin = SimOutputPin::new("gpio0", 11 + u32::from(id));
            if id == 1 { pin.not_ready() } else { pin }
        },
        sink.clone(),
    )
    .unwrap();

    assert!(sink.wait_for(Duration::from_secs(2), |evs| sequences(evs).get(&0).is_some_and(|v| v.len() >= 3)));
    std::thread::sleep(Duration::from_millis(100));
    assert!(!sequences(&sink.events()).contains_key(&1));
}

#[test]
fn configured_policy_is_applied_before_producers_start() {
    let mut config = SystemConfig::default();
    config.queue_policy = OverflowPolicy::DropOldest;
    config.emitters.clear();
    config
        .emitters
        .push(EmitterConfig {
            source_id: 2,
            period_ms: 50,
        })
        .unwrap();

    let queue = leaked_queue();
    let sink = RecordingSink::new();
    start_with(&config, queue, |id| SimOutputPin::new("gpio0", u32::from(id)), sink.clone()).unwrap();

    assert_eq!(queue.policy(), OverflowPolicy::DropOldest);
    assert!(sink.wait_for(Duration::from_secs(2), |evs| sequences(evs).contains_key(&2)));
}
