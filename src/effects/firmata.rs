//! Minimal Firmata message encoding.
//!
//! Only the two host-to-board messages the signal sink needs:
//! `SET_PIN_MODE` and analog (PWM) writes. Data bytes are 7-bit; 14-bit
//! values travel as LSB then MSB.

/// Set a pin's mode: `0xF4 pin mode`
pub const SET_PIN_MODE: u8 = 0xF4;
/// Analog write for pins 0-15: `0xE0|pin lsb msb`
pub const ANALOG_MESSAGE: u8 = 0xE0;
pub const START_SYSEX: u8 = 0xF0;
pub const END_SYSEX: u8 = 0xF7;
/// Sysex analog write for any pin: `0xF0 0x6F pin lsb msb 0xF7`
pub const EXTENDED_ANALOG: u8 = 0x6F;

/// StandardFirmata pin modes the signal sink sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PinMode {
    Pwm = 0x03,
}

pub fn set_pin_mode(pin: u8, mode: PinMode) -> Vec<u8> {
    vec![SET_PIN_MODE, pin & 0x7F, mode as u8]
}

/// Write a 14-bit value to a PWM pin.
pub fn analog_write(pin: u8, value: u16) -> Vec<u8> {
    let lsb = (value & 0x7F) as u8;
    let msb = ((value >> 7) & 0x7F) as u8;

    if pin < 16 {
        vec![ANALOG_MESSAGE | pin, lsb, msb]
    } else {
        vec![START_SYSEX, EXTENDED_ANALOG, pin & 0x7F, lsb, msb, END_SYSEX]
    }
}
