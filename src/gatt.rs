//! LED-Button GATT service.
//!
//! ## Service layout
//!
//! | Characteristic | UUID                                   | Perms        |
//! |----------------|----------------------------------------|--------------|
//! | Button         | `00001524-1212-efde-1523-785feabcd123` | Read+Notify  |
//! | LED            | `00001525-1212-efde-1523-785feabcd123` | Read+Write   |
//!
//! [`LbsService`] validates raw attribute access and forwards decoded values
//! to an [`AttributeCallbacks`] implementation. [`ButtonNotifier`] is the
//! outbound half: it mirrors the button value into the attribute database
//! and pushes it to a subscribed peer.

use core::fmt;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::app::ports::{AttributeCallbacks, Notifier, RadioStack};
use crate::error::BleError;
use crate::link::LinkStatus;

// ───────────────────────────────────────────────────────────────
// Identity
// ───────────────────────────────────────────────────────────────

pub const LBS_SERVICE_UUID: u128 = 0x00001523_1212_efde_1523_785feabcd123;
pub const LBS_BUTTON_UUID: u128 = 0x00001524_1212_efde_1523_785feabcd123;
pub const LBS_LED_UUID: u128 = 0x00001525_1212_efde_1523_785feabcd123;

/// Client Characteristic Configuration value enabling notifications.
pub const CCC_NOTIFY: u16 = 0x0001;

/// Attributes of the service that carry application data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LbsAttribute {
    Button,
    ButtonCcc,
    Led,
}

// ───────────────────────────────────────────────────────────────
// ATT errors
// ───────────────────────────────────────────────────────────────

/// ATT protocol error codes returned to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttError {
    ReadNotPermitted = 0x02,
    WriteNotPermitted = 0x03,
    InvalidOffset = 0x07,
    InvalidAttributeLen = 0x0D,
    ValueNotAllowed = 0x13,
}

impl fmt::Display for AttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadNotPermitted => write!(f, "read not permitted"),
            Self::WriteNotPermitted => write!(f, "write not permitted"),
            Self::InvalidOffset => write!(f, "invalid offset"),
            Self::InvalidAttributeLen => write!(f, "invalid attribute length"),
            Self::ValueNotAllowed => write!(f, "value not allowed"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Write validation
// ───────────────────────────────────────────────────────────────

/// A validated peer write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrWrite {
    Led(bool),
    /// CCC of the button characteristic.
    Notifications(bool),
}

/// Validate a raw write without applying it. The platform layer uses this
/// to answer the peer from the radio's own context.
pub fn decode_write(attr: LbsAttribute, offset: u16, data: &[u8]) -> Result<AttrWrite, AttError> {
    match attr {
        LbsAttribute::Button => Err(AttError::WriteNotPermitted),
        LbsAttribute::Led => {
            if offset != 0 {
                warn!("LBS: LED write with offset {}", offset);
                return Err(AttError::InvalidOffset);
            }
            let [value] = data else {
                warn!("LBS: LED write with length {}", data.len());
                return Err(AttError::InvalidAttributeLen);
            };
            match *value {
                0x00 => Ok(AttrWrite::Led(false)),
                0x01 => Ok(AttrWrite::Led(true)),
                other => {
                    warn!("LBS: LED write with value 0x{:02x}", other);
                    Err(AttError::ValueNotAllowed)
                }
            }
        }
        LbsAttribute::ButtonCcc => {
            if offset != 0 {
                return Err(AttError::InvalidOffset);
            }
            let [lo, hi] = data else {
                return Err(AttError::InvalidAttributeLen);
            };
            match u16::from_le_bytes([*lo, *hi]) {
                0 => Ok(AttrWrite::Notifications(false)),
                CCC_NOTIFY => Ok(AttrWrite::Notifications(true)),
                _ => Err(AttError::ValueNotAllowed),
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Attribute access
// ───────────────────────────────────────────────────────────────

pub struct LbsService<H: AttributeCallbacks> {
    handler: Arc<H>,
    status: Arc<LinkStatus>,
}

impl<H: AttributeCallbacks> LbsService<H> {
    pub fn new(handler: Arc<H>, status: Arc<LinkStatus>) -> Self {
        Self { handler, status }
    }

    /// Apply a peer write. Returns the number of bytes consumed.
    pub fn write(&self, attr: LbsAttribute, offset: u16, data: &[u8]) -> Result<usize, AttError> {
        match decode_write(attr, offset, data)? {
            AttrWrite::Led(on) => self.handler.led_written(on),
            AttrWrite::Notifications(enabled) => {
                self.status.set_subscribed(enabled);
                info!(
                    "LBS: button notifications {}",
                    if enabled { "enabled" } else { "disabled" }
                );
            }
        }
        Ok(data.len())
    }

    /// Serve a peer read into `buf`. Returns the number of bytes written.
    pub fn read(&self, attr: LbsAttribute, offset: u16, buf: &mut [u8]) -> Result<usize, AttError> {
        let value: heapless::Vec<u8, 2> = match attr {
            LbsAttribute::Button => heapless::Vec::from_slice(&[u8::from(self.handler.read_button())]),
            LbsAttribute::Led => heapless::Vec::from_slice(&[u8::from(self.handler.read_led())]),
            LbsAttribute::ButtonCcc => {
                let ccc = if self.status.is_subscribed() { CCC_NOTIFY } else { 0 };
                heapless::Vec::from_slice(&ccc.to_le_bytes())
            }
        }
        .map_err(|()| AttError::InvalidAttributeLen)?;

        let offset = offset as usize;
        if offset > value.len() {
            return Err(AttError::InvalidOffset);
        }
        let tail = &value[offset..];
        let n = tail.len().min(buf.len());
        buf[..n].copy_from_slice(&tail[..n]);
        debug!("LBS: read {:?} -> {:02x?}", attr, &buf[..n]);
        Ok(n)
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }
}

// ───────────────────────────────────────────────────────────────
// Outbound notifications
// ───────────────────────────────────────────────────────────────

/// Sends button notifications when, and only when, the current peer is
/// subscribed. The attribute value is mirrored into the stack either way so
/// a later read sees it.
pub struct ButtonNotifier<R: RadioStack> {
    radio: R,
    status: Arc<LinkStatus>,
}

impl<R: RadioStack> ButtonNotifier<R> {
    pub fn new(radio: R, status: Arc<LinkStatus>) -> Self {
        Self { radio, status }
    }
}

impl<R: RadioStack> Notifier for ButtonNotifier<R> {
    fn notify_button(&self, pressed: bool) -> Result<(), BleError> {
        let value = [u8::from(pressed)];
        self.radio.set_value(LbsAttribute::Button, &value);

        let Some(handle) = self.status.conn_handle() else {
            return Err(BleError::NotConnected);
        };
        if !self.status.is_subscribed() {
            return Err(BleError::NotSubscribed);
        }
        self.radio.notify(handle, LbsAttribute::Button, &value)
    }
}
