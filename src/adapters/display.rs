//! Console display collaborator.
//!
//! The board has no panel driver of its own; frames go to the logger as a
//! heartbeat so the telemetry application's main context stays alive and
//! visibly so.

use std::time::Duration;

use log::{debug, info};

use crate::app::ports::DisplayPort;
use crate::error::{InitError, Result};

const FRAME_INTERVAL: Duration = Duration::from_millis(1000);
const SPINNER: [char; 4] = ['|', '/', '-', '\\'];

#[derive(Debug)]
pub struct ConsoleDisplay {
    initialised: bool,
    frame: u32,
    interval: Duration,
}

impl Default for ConsoleDisplay {
    fn default() -> Self {
        Self {
            initialised: false,
            frame: 0,
            interval: FRAME_INTERVAL,
        }
    }
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Render the next frame.
    pub fn step(&mut self) -> char {
        let glyph = SPINNER[self.frame as usize % SPINNER.len()];
        self.frame = self.frame.wrapping_add(1);
        glyph
    }

    pub fn frames(&self) -> u32 {
        self.frame
    }
}

impl DisplayPort for ConsoleDisplay {
    fn init(&mut self) -> Result<()> {
        if self.initialised {
            debug!("display: already initialised");
            return Ok(());
        }
        if self.interval.is_zero() {
            return Err(InitError::Display("frame interval must be > 0").into());
        }
        self.initialised = true;
        info!("display: console ready");
        Ok(())
    }

    fn play(&mut self) -> ! {
        loop {
            let glyph = self.step();
            debug!("display: [{}] frame {}", glyph, self.frame);
            std::thread::sleep(self.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let mut d = ConsoleDisplay::new();
        assert!(d.init().is_ok());
        assert!(d.init().is_ok());
        assert!(d.is_initialised());
    }

    #[test]
    fn zero_interval_refuses_to_start() {
        let mut d = ConsoleDisplay::with_interval(Duration::ZERO);
        assert_eq!(
            d.init(),
            Err(InitError::Display("frame interval must be > 0").into())
        );
        assert!(!d.is_initialised());
        assert!(ConsoleDisplay::with_interval(Duration::from_millis(250)).init().is_ok());
    }

    #[test]
    fn frames_cycle_the_spinner() {
        let mut d = ConsoleDisplay::new();
        let glyphs: Vec<char> = (0..5).map(|_| d.step()).collect();
        assert_eq!(glyphs, vec!['|', '/', '-', '\\', '|']);
        assert_eq!(d.frames(), 5);
    }
}
