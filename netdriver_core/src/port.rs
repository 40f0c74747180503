use crate::error::{DriverError, PortError};
use std::env;
use std::num::IntErrorKind;

/// Environment variable overriding the TCP port the server-under-test listens on.
pub const TCP_PORT_ENV: &str = "_HF_TCP_PORT";

/// Returns the port from [`TCP_PORT_ENV`], or `default` when it is unset.
pub fn resolve_port(default: u16) -> Result<u16, DriverError> {
    match env::var_os(TCP_PORT_ENV) {
        None => Ok(default),
        Some(raw) => {
            let value = raw.to_string_lossy();
            parse_port_override(&value)
        }
    }
}

/// Validates an override value: 1..=65535 in decimal, `0x` hex or leading-zero octal.
pub fn parse_port_override(value: &str) -> Result<u16, DriverError> {
    let invalid = |reason| DriverError::InvalidPort {
        var: TCP_PORT_ENV,
        value: value.to_string(),
        reason,
    };

    let number = parse_c_integer(value.trim()).map_err(invalid)?;
    if number < 1 {
        return Err(invalid(PortError::TooSmall(number)));
    }
    u16::try_from(number).map_err(|_| invalid(PortError::TooLarge(number)))
}

fn parse_c_integer(text: &str) -> Result<i64, PortError> {
    let (negative, unsigned) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let (radix, digits) = if let Some(hex) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        (16, hex)
    } else if unsigned.len() > 1 && unsigned.starts_with('0') {
        (8, &unsigned[1..])
    } else {
        (10, unsigned)
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(PortError::NotANumber);
    }

    match i64::from_str_radix(digits, radix) {
        Ok(n) if negative => Ok(-n),
        Ok(n) => Ok(n),
        Err(e) if *e.kind() == IntErrorKind::PosOverflow => Err(if negative {
            PortError::TooSmall(i64::MIN)
        } else {
            PortError::TooLarge(i64::MAX)
        }),
        Err(_) => Err(PortError::NotANumber),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn reason(value: &str) -> PortError {
        match parse_port_override(value) {
            Err(DriverError::InvalidPort { reason, .. }) => reason,
            other => panic!("Expected InvalidPort for {value:?}, got {other:?}"),
        }
    }

    #[test]
    fn every_valid_port_round_trips() {
        for port in 1..=u16::MAX {
            assert_eq!(parse_port_override(&port.to_string()).unwrap(), port);
        }
    }

    #[test]
    fn c_style_prefixes_are_honored() {
        assert_eq!(parse_port_override("0x1F90").unwrap(), 8080);
        assert_eq!(parse_port_override("017620").unwrap(), 8080);
        assert_eq!(parse_port_override(" 9090\n").unwrap(), 9090);
        assert_eq!(parse_port_override("+22").unwrap(), 22);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert_eq!(reason("0"), PortError::TooSmall(0));
        assert_eq!(reason("-5"), PortError::TooSmall(-5));
        assert_eq!(reason("65536"), PortError::TooLarge(65536));
        assert_eq!(reason("70000"), PortError::TooLarge(70000));
        assert_eq!(
            reason("99999999999999999999999"),
            PortError::TooLarge(i64::MAX)
        );
    }

    #[test]
    fn non_numeric_values_are_rejected() {
        for value in ["", "http", "80abc", "0x", "08", "-", "1.5"] {
            assert_eq!(reason(value), PortError::NotANumber, "value {value:?}");
        }
    }

    #[test]
    #[serial]
    fn env_override_wins_over_default() {
        // SAFETY: serialized with every other test touching the environment.
        unsafe { env::set_var(TCP_PORT_ENV, "9090") };
        assert_eq!(resolve_port(8080).unwrap(), 9090);

        unsafe { env::set_var(TCP_PORT_ENV, "70000") };
        assert!(matches!(
            resolve_port(8080),
            Err(DriverError::InvalidPort { reason: PortError::TooLarge(70000), .. })
        ));

        unsafe { env::remove_var(TCP_PORT_ENV) };
        assert_eq!(resolve_port(8080).unwrap(), 8080);
        assert_eq!(resolve_port(1234).unwrap(), 1234);
    }
}
