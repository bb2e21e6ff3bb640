use std::fmt;

use serde::Serialize;
use thiserror::Error;

const MAX_ENCODABLE_TENTHS: u16 = 999;
const MAX_PIN: u16 = 9999;

/// Errors returned by packed-decimal conversions.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum PackedDecimalError {
    /// The temperature cannot be expressed with one tens digit.
    #[error("temperature {value} is outside the encodable range 0.0..=99.9")]
    OutOfRange { value: f64 },
    /// The buffer ends before the two packed bytes.
    #[error("packed temperature at offset {offset} needs two bytes but the buffer has {len}")]
    Truncated { offset: usize, len: usize },
    /// A nibble holds a value above 9.
    #[error("packed temperature at offset {offset} is not decimal: {low:02X} {high:02X}")]
    NotDecimal { offset: usize, low: u8, high: u8 },
}

/// Errors returned by PIN validation.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum PinCodeError {
    #[error("PIN {value} is out of range (0..=9999)")]
    OutOfRange { value: u16 },
}

/// Temperature in degrees Celsius at 0.1° resolution.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Serialize)]
#[serde(into = "f64")]
pub struct Temperature(u16);

impl Temperature {
    /// Creates a temperature from a count of tenths of a degree.
    ///
    /// The value is not range-checked; [`encode_temperature`] rejects anything
    /// above `99.9`.
    #[must_use]
    pub const fn from_tenths(tenths: u16) -> Self {
        Self(tenths)
    }

    /// Creates a temperature from degrees, rounded to the nearest tenth.
    ///
    /// ```
    /// use matouch::Temperature;
    ///
    /// let value = Temperature::from_celsius(19.5)?;
    /// assert_eq!(195, value.tenths());
    /// # Ok::<(), matouch::PackedDecimalError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error for values that are not finite or fall outside `0.0..=99.9`.
    pub fn from_celsius(value: f64) -> Result<Self, PackedDecimalError> {
        let tenths = (value * 10.0).round();
        if !tenths.is_finite() || tenths < 0.0 || tenths > f64::from(MAX_ENCODABLE_TENTHS) {
            return Err(PackedDecimalError::OutOfRange { value });
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let tenths = tenths as u16;
        Ok(Self(tenths))
    }

    #[must_use]
    pub const fn tenths(self) -> u16 {
        self.0
    }

    /// Returns the value in degrees.
    #[must_use]
    pub fn celsius(self) -> f64 {
        f64::from(self.0) / 10.0
    }
}

impl From<Temperature> for f64 {
    fn from(value: Temperature) -> Self {
        value.celsius()
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0 / 10, self.0 % 10)
    }
}

/// Packs a temperature into the device's two-byte `[low, high]` form.
///
/// `low` carries the units digit in its high nibble and the tenths digit
/// in its low nibble; `high` carries the tens digit.
///
/// ```
/// use matouch::{Temperature, encode_temperature};
///
/// let bytes = encode_temperature(Temperature::from_celsius(19.5)?)?;
/// assert_eq!([0x95, 0x01], bytes);
/// # Ok::<(), matouch::PackedDecimalError>(())
/// ```
///
/// # Errors
///
/// Returns an error when the value is above `99.9`.
pub fn encode_temperature(value: Temperature) -> Result<[u8; 2], PackedDecimalError> {
    let tenths_total = value.tenths();
    if tenths_total > MAX_ENCODABLE_TENTHS {
        return Err(PackedDecimalError::OutOfRange {
            value: value.celsius(),
        });
    }

    let tens = digit(tenths_total / 100);
    let units = digit((tenths_total / 10) % 10);
    let tenths = digit(tenths_total % 10);
    Ok([(units << 4) | tenths, tens])
}

/// Reads a packed temperature starting at `offset`.
///
/// ```
/// use matouch::decode_temperature;
///
/// let value = decode_temperature(&[0x95, 0x01], 0)?;
/// assert_eq!(19.5, value.celsius());
/// # Ok::<(), matouch::PackedDecimalError>(())
/// ```
///
/// # Errors
///
/// Returns an error when fewer than two bytes are available at `offset` or
/// when a digit nibble is above 9.
pub fn decode_temperature(bytes: &[u8], offset: usize) -> Result<Temperature, PackedDecimalError> {
    let (Some(&low), Some(&high)) = (bytes.get(offset), bytes.get(offset + 1)) else {
        return Err(PackedDecimalError::Truncated {
            offset,
            len: bytes.len(),
        });
    };

    let digits = [high & 0x0F, low >> 4, low & 0x0F];
    if digits.iter().any(|digit| *digit > 9) {
        return Err(PackedDecimalError::NotDecimal { offset, low, high });
    }
    let tenths = digits
        .into_iter()
        .fold(0u16, |total, digit| total * 10 + u16::from(digit));
    Ok(Temperature::from_tenths(tenths))
}

fn digit(value: u16) -> u8 {
    u8::try_from(value % 10).unwrap_or_default()
}

/// Four-digit controller PIN stored as packed BCD.
#[derive(Clone, Copy, Eq, PartialEq, Default)]
pub struct PinCode(u16);

impl PinCode {
    /// Validates and packs a PIN.
    ///
    /// ```
    /// use matouch::PinCode;
    ///
    /// let pin = PinCode::new(1234)?;
    /// assert_eq!([0x12, 0x34], pin.packed());
    /// # Ok::<(), matouch::PinCodeError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when `value` is above `9999`.
    pub fn new(value: u16) -> Result<Self, PinCodeError> {
        if value > MAX_PIN {
            return Err(PinCodeError::OutOfRange { value });
        }

        let packed = [value / 1000, (value / 100) % 10, (value / 10) % 10, value % 10]
            .into_iter()
            .fold(0u16, |bcd, digit| (bcd << 4) | digit);
        Ok(Self(packed))
    }

    /// PIN digits as `[d1d2, d3d4]`.
    #[must_use]
    pub const fn packed(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// PIN bytes in the order the controller expects inside commands.
    ///
    /// ```
    /// use matouch::PinCode;
    ///
    /// assert_eq!([0x34, 0x12], PinCode::new(1234)?.wire_bytes());
    /// # Ok::<(), matouch::PinCodeError>(())
    /// ```
    #[must_use]
    pub const fn wire_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

impl TryFrom<u16> for PinCode {
    type Error = PinCodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Debug for PinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PinCode(****)")
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(19.5, [0x95, 0x01])]
    #[case(24.0, [0x40, 0x02])]
    #[case(21.0, [0x10, 0x02])]
    #[case(0.0, [0x00, 0x00])]
    #[case(99.9, [0x99, 0x09])]
    #[case(20.3, [0x03, 0x02])]
    fn encode_temperature_matches_device_layout(#[case] celsius: f64, #[case] expected: [u8; 2]) {
        let value = Temperature::from_celsius(celsius).expect("value should be in range");
        assert_eq!(expected, encode_temperature(value).expect("value should encode"));
    }

    #[test]
    fn decode_temperature_reads_status_capture() {
        let status_fragment = [0x00, 0x40, 0x02, 0x10, 0x02];
        let cool = decode_temperature(&status_fragment, 1).expect("offset 1 should decode");
        let heat = decode_temperature(&status_fragment, 3).expect("offset 3 should decode");
        assert_eq!(Temperature::from_tenths(240), cool);
        assert_eq!(Temperature::from_tenths(210), heat);
    }

    #[test]
    fn encode_decode_is_exact_across_range() {
        for tenths in 0..=999 {
            let value = Temperature::from_tenths(tenths);
            let bytes = encode_temperature(value).expect("range should encode");
            assert_eq!(value, decode_temperature(&bytes, 0).expect("bytes should decode"));
        }
    }

    #[test]
    fn decode_temperature_masks_high_byte_nibble() {
        let value = decode_temperature(&[0x95, 0xF1], 0).expect("bytes should decode");
        assert_eq!(Temperature::from_tenths(195), value);
    }

    #[test]
    fn decode_temperature_rejects_truncated_buffer() {
        assert_matches!(
            decode_temperature(&[0x95], 0),
            Err(PackedDecimalError::Truncated { offset: 0, len: 1 })
        );
    }

    #[rstest]
    #[case::tens([0x95, 0x0A])]
    #[case::units([0xA5, 0x01])]
    #[case::tenths([0x9F, 0x06])]
    fn decode_temperature_rejects_non_decimal_nibbles(#[case] bytes: [u8; 2]) {
        assert_matches!(
            decode_temperature(&bytes, 0),
            Err(PackedDecimalError::NotDecimal { offset: 0, .. })
        );
    }

    #[rstest]
    #[case(-0.5)]
    #[case(100.0)]
    #[case(f64::NAN)]
    fn from_celsius_rejects_unencodable_values(#[case] celsius: f64) {
        assert_matches!(
            Temperature::from_celsius(celsius),
            Err(PackedDecimalError::OutOfRange { .. })
        );
    }

    #[test]
    fn encode_rejects_decoded_value_above_range() {
        let value = Temperature::from_tenths(1_000);
        assert_matches!(
            encode_temperature(value),
            Err(PackedDecimalError::OutOfRange { .. })
        );
    }

    #[test]
    fn temperature_displays_one_decimal() {
        assert_eq!("19.5", Temperature::from_tenths(195).to_string());
        assert_eq!("0.0", Temperature::from_tenths(0).to_string());
    }

    #[rstest]
    #[case(1234, [0x12, 0x34], [0x34, 0x12])]
    #[case(0, [0x00, 0x00], [0x00, 0x00])]
    #[case(9999, [0x99, 0x99], [0x99, 0x99])]
    #[case(507, [0x05, 0x07], [0x07, 0x05])]
    fn pin_packs_digits_as_bcd(
        #[case] value: u16,
        #[case] packed: [u8; 2],
        #[case] wire: [u8; 2],
    ) {
        let pin = PinCode::new(value).expect("pin should be valid");
        assert_eq!(packed, pin.packed());
        assert_eq!(wire, pin.wire_bytes());
    }

    #[test]
    fn pin_rejects_five_digits() {
        assert_matches!(
            PinCode::new(10_000),
            Err(PinCodeError::OutOfRange { value: 10_000 })
        );
    }

    #[test]
    fn pin_debug_output_is_redacted() {
        let pin = PinCode::new(1234).expect("pin should be valid");
        assert_eq!("PinCode(****)", format!("{pin:?}"));
    }
}
