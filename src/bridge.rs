//! Attribute sync bridge between the LED-Button service and the board.
//!
//! - Peer LED writes drive the user LED synchronously.
//! - Button changes are stored and pushed to a subscribed peer.
//!
//! The stored button value is what reads return, so it is updated even when
//! nobody is listening.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use log::{debug, info, warn};

use crate::app::ports::{AttributeCallbacks, ButtonInput, Notifier, OutputLine};
use crate::error::BleError;

/// Mask bit of the service button in the button driver's state word.
pub const USER_BUTTON: u32 = 1 << 0;

/// Counters for the notify path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyStats {
    pub attempts: u32,
    pub delivered: u32,
    /// Dropped because no subscribed peer was present.
    pub unsubscribed: u32,
    pub failed: u32,
}

pub struct AttributeBridge<O: OutputLine, N: Notifier> {
    button_state: AtomicBool,
    led_state: AtomicBool,
    led: Mutex<O>,
    notifier: N,
    attempts: AtomicU32,
    delivered: AtomicU32,
    unsubscribed: AtomicU32,
    failed: AtomicU32,
}

impl<O: OutputLine, N: Notifier> AttributeBridge<O, N> {
    /// `led` must already be configured as an output.
    pub fn new(led: O, notifier: N) -> Self {
        Self {
            button_state: AtomicBool::new(false),
            led_state: AtomicBool::new(false),
            led: Mutex::new(led),
            notifier,
            attempts: AtomicU32::new(0),
            delivered: AtomicU32::new(0),
            unsubscribed: AtomicU32::new(0),
            failed: AtomicU32::new(0),
        }
    }

    pub fn button_state(&self) -> bool {
        self.button_state.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> NotifyStats {
        NotifyStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            unsubscribed: self.unsubscribed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn send_button(&self, pressed: bool) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        match self.notifier.notify_button(pressed) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(BleError::NotConnected | BleError::NotSubscribed) => {
                self.unsubscribed.fetch_add(1, Ordering::Relaxed);
                debug!("bridge: button {} not sent (no subscriber)", u8::from(pressed));
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!("bridge: button notify failed: {}", e);
            }
        }
    }
}

impl<O: OutputLine, N: Notifier> AttributeCallbacks for AttributeBridge<O, N> {
    fn led_written(&self, on: bool) {
        let mut led = self.led.lock().unwrap_or_else(PoisonError::into_inner);
        led.drive(on);
        self.led_state.store(on, Ordering::Release);
        info!("LBS: user LED {}", if on { "on" } else { "off" });
    }

    fn read_button(&self) -> bool {
        self.button_state()
    }

    fn read_led(&self) -> bool {
        self.led_state.load(Ordering::Acquire)
    }
}

impl<O: OutputLine, N: Notifier> ButtonInput for AttributeBridge<O, N> {
    fn button_changed(&self, button_state: u32, has_changed: u32) {
        if has_changed & USER_BUTTON == 0 {
            return;
        }
        let pressed = button_state & USER_BUTTON != 0;
        // Store first so a read racing the notification sees the new value.
        self.button_state.store(pressed, Ordering::Release);
        self.send_button(pressed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::gpio::SimOutputPin;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct ScriptedNotifier {
        sent: StdMutex<Vec<bool>>,
        reply: StdMutex<Option<BleError>>,
    }

    impl Notifier for ScriptedNotifier {
        fn notify_button(&self, pressed: bool) -> Result<(), BleError> {
            self.sent.lock().unwrap().push(pressed);
            match *self.reply.lock().unwrap() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    fn bridge() -> (AttributeBridge<SimOutputPin, ScriptedNotifier>, SimOutputPin) {
        let pin = SimOutputPin::new("gpio0", 17);
        let probe = pin.clone();
        (AttributeBridge::new(pin, ScriptedNotifier::default()), probe)
    }

    #[test]
    fn led_write_drives_output_before_returning() {
        let (b, probe) = bridge();
        b.led_written(true);
        assert!(probe.level());
        assert!(b.read_led());
        b.led_written(false);
        assert!(!probe.level());
        assert!(!b.read_led());
    }

    #[test]
    fn only_user_button_bit_triggers_notify() {
        let (b, _) = bridge();
        b.button_changed(0b10, 0b10);
        assert!(b.notifier.sent.lock().unwrap().is_empty());
        assert!(!b.button_state());

        b.button_changed(0b11, 0b01);
        assert_eq!(*b.notifier.sent.lock().unwrap(), vec![true]);
        assert!(b.read_button());

        b.button_changed(0b10, 0b01);
        assert_eq!(*b.notifier.sent.lock().unwrap(), vec![true, false]);
        assert!(!b.read_button());
    }

    #[test]
    fn unchanged_user_bit_is_ignored_even_if_pressed() {
        let (b, _) = bridge();
        b.button_changed(USER_BUTTON, 0);
        assert!(!b.button_state());
        assert_eq!(b.stats().attempts, 0);
    }

    #[test]
    fn missing_subscriber_is_swallowed_but_state_kept() {
        let (b, _) = bridge();
        *b.notifier.reply.lock().unwrap() = Some(BleError::NotSubscribed);
        b.button_changed(USER_BUTTON, USER_BUTTON);
        assert!(b.read_button());
        assert_eq!(
            b.stats(),
            NotifyStats {
                attempts: 1,
                delivered: 0,
                unsubscribed: 1,
                failed: 0
            }
        );
    }

    #[test]
    fn stack_errors_are_counted_separately() {
        let (b, _) = bridge();
        *b.notifier.reply.lock().unwrap() = Some(BleError::Notify(-12));
        b.button_changed(USER_BUTTON, USER_BUTTON);
        *b.notifier.reply.lock().unwrap() = None;
        b.button_changed(0, USER_BUTTON);
        let s = b.stats();
        assert_eq!((s.attempts, s.delivered, s.failed), (2, 1, 1));
    }
}
