//! Two-phase register transfer probe.
//!
//! Writes a fixed command pair to a bus target and reads back two bytes.
//! Board bring-up uses it to check that a peripheral answers; nothing in the
//! applications depends on the result.

use embedded_hal::i2c::I2c;
use log::{info, warn};

/// Command bytes written before the read phase.
pub const PROBE_COMMAND: [u8; 2] = [0x01, 0x02];

/// Write [`PROBE_COMMAND`] to `address`, then read two bytes.
pub fn transfer_probe<B: I2c>(bus: &mut B, address: u8) -> Result<[u8; 2], B::Error> {
    if let Err(e) = bus.write(address, &PROBE_COMMAND) {
        warn!("i2c: write to 0x{:02x} failed: {:?}", address, e);
        return Err(e);
    }
    let mut data = [0u8; 2];
    if let Err(e) = bus.read(address, &mut data) {
        warn!("i2c: read from 0x{:02x} failed: {:?}", address, e);
        return Err(e);
    }
    info!("Read data: {:02x} {:02x}", data[0], data[1]);
    Ok(data)
}

/// Probe [`I2C_PROBE_ADDR`](crate::pins::I2C_PROBE_ADDR) on the board bus.
/// Failures are logged only.
#[cfg(target_os = "espidf")]
pub fn probe_board_bus() {
    use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_hal::units::Hertz;

    let Ok(p) = Peripherals::take() else {
        warn!("i2c: peripherals already taken, probe skipped");
        return;
    };
    // Pins must match I2C_SDA_GPIO / I2C_SCL_GPIO.
    let config = I2cConfig::new().baudrate(Hertz(100_000));
    match I2cDriver::new(p.i2c0, p.pins.gpio14, p.pins.gpio15, &config) {
        Ok(mut bus) => {
            let _ = transfer_probe(&mut bus, crate::pins::I2C_PROBE_ADDR);
        }
        Err(e) => warn!("i2c: bus init failed: {}", e),
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn probe_board_bus() {
    info!(
        "i2c(sim): no bus attached, probe of 0x{:02x} skipped",
        crate::pins::I2C_PROBE_ADDR
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};

    #[derive(Debug, PartialEq)]
    enum Op {
        Write(u8, Vec<u8>),
        Read(u8, usize),
    }

    struct MockBus {
        ops: Vec<Op>,
        reply: [u8; 2],
        fail_write: bool,
    }

    impl ErrorType for MockBus {
        type Error = ErrorKind;
    }

    impl I2c for MockBus {
        fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
            for op in operations {
                match op {
                    Operation::Write(bytes) => {
                        if self.fail_write {
                            return Err(ErrorKind::Other);
                        }
                        self.ops.push(Op::Write(address, bytes.to_vec()));
                    }
                    Operation::Read(buf) => {
                        self.ops.push(Op::Read(address, buf.len()));
                        buf.copy_from_slice(&self.reply[..buf.len()]);
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn writes_command_then_reads_two_bytes() {
        let mut bus = MockBus {
            ops: Vec::new(),
            reply: [0xAB, 0xCD],
            fail_write: false,
        };
        assert_eq!(transfer_probe(&mut bus, 0x12), Ok([0xAB, 0xCD]));
        assert_eq!(
            bus.ops,
            vec![Op::Write(0x12, vec![0x01, 0x02]), Op::Read(0x12, 2)]
        );
    }

    #[test]
    fn write_failure_skips_read() {
        let mut bus = MockBus {
            ops: Vec::new(),
            reply: [0; 2],
            fail_write: true,
        };
        assert_eq!(transfer_probe(&mut bus, 0x12), Err(ErrorKind::Other));
        assert!(bus.ops.is_empty());
    }
}
