//! Encoding of axis values onto the drive channels.
//!
//! The robot expects the decimal ASCII text of the value, e.g. `"-42"`, with no padding and no
//! terminator.

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Lowest value an axis may take.
pub const AXIS_MIN: i32 = -100;

/// Highest value an axis may take.
pub const AXIS_MAX: i32 = 100;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors that can occur while decoding a channel payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("The payload is not valid UTF-8")]
    NonUtf8,

    #[error("Expected a decimal integer, found {0:?}")]
    NotAnInteger(String),

    #[error("Axis value {0} is outside [{}, {}]", AXIS_MIN, AXIS_MAX)]
    OutOfRange(i64),
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Clamp a value into the axis range.
pub fn clamp_axis(value: i32) -> i32 {
    value.max(AXIS_MIN).min(AXIS_MAX)
}

/// Encode an axis value as a channel payload.
pub fn encode_axis_value(value: i32) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// Decode a channel payload into an axis value, rejecting anything outside the axis range.
pub fn decode_axis_value(payload: &[u8]) -> Result<i32, PayloadError> {
    let text = std::str::from_utf8(payload).map_err(|_| PayloadError::NonUtf8)?;

    let value: i64 = text
        .parse()
        .map_err(|_| PayloadError::NotAnInteger(text.to_owned()))?;

    if value < AXIS_MIN as i64 || value > AXIS_MAX as i64 {
        return Err(PayloadError::OutOfRange(value));
    }

    Ok(value as i32)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encode_axis_value() {
        assert_eq!(encode_axis_value(-42), b"-42".to_vec());
        assert_eq!(encode_axis_value(0), b"0".to_vec());
        assert_eq!(encode_axis_value(100), b"100".to_vec());
    }

    #[test]
    fn test_decode_axis_value() {
        assert_eq!(decode_axis_value(b"-100"), Ok(-100));
        assert_eq!(decode_axis_value(b"+7"), Ok(7));
        assert_eq!(decode_axis_value(b"101"), Err(PayloadError::OutOfRange(101)));
        assert_eq!(
            decode_axis_value(b"12\n"),
            Err(PayloadError::NotAnInteger("12\n".into()))
        );
        assert_eq!(decode_axis_value(&[0xff, 0x31]), Err(PayloadError::NonUtf8));
    }

    #[test]
    fn test_clamp_axis() {
        assert_eq!(clamp_axis(250), AXIS_MAX);
        assert_eq!(clamp_axis(-250), AXIS_MIN);
        assert_eq!(clamp_axis(-3), -3);
    }
}
