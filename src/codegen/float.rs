//! C99 `%a`-style hexadecimal float formatting.
//!
//! The target machine reads float literals in the exact-bit hexadecimal
//! form, e.g. `0x1.4p+2` for 5.0. The mantissa is printed with the minimal
//! number of hex digits.

/// Formats `value` the way glibc's `printf("%a")` does.
pub fn hex_float(value: f64) -> String {
    if value == 0.0 {
        return if value.is_sign_negative() {
            "-0x0p+0".to_string()
        } else {
            "0x0p+0".to_string()
        };
    }
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value < 0.0 { "-inf" } else { "inf" }.to_string();
    }

    let bits = value.to_bits();
    let sign = if bits >> 63 == 1 { "-" } else { "" };
    let biased_exponent = ((bits >> 52) & 0x7ff) as i64;
    let mantissa = bits & 0x000f_ffff_ffff_ffff;

    // Subnormals print with a 0x0. prefix and the minimum exponent.
    let (leading, exponent) = if biased_exponent == 0 {
        (0u64, -1022i64)
    } else {
        (1u64, biased_exponent - 1023)
    };

    let mut digits = format!("{mantissa:013x}");
    while digits.ends_with('0') {
        digits.pop();
    }

    if digits.is_empty() {
        format!("{sign}0x{leading}p{exponent:+}")
    } else {
        format!("{sign}0x{leading}.{digits}p{exponent:+}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_powers_of_two() {
        assert_eq!(hex_float(1.0), "0x1p+0");
        assert_eq!(hex_float(2.0), "0x1p+1");
        assert_eq!(hex_float(0.5), "0x1p-1");
    }

    #[test]
    fn test_mantissa_digits() {
        assert_eq!(hex_float(5.0), "0x1.4p+2");
        assert_eq!(hex_float(4.5), "0x1.2p+2");
        assert_eq!(hex_float(1.5), "0x1.8p+0");
    }

    #[test]
    fn test_zero() {
        assert_eq!(hex_float(0.0), "0x0p+0");
        assert_eq!(hex_float(-0.0), "-0x0p+0");
    }

    #[test]
    fn test_negative() {
        assert_eq!(hex_float(-5.0), "-0x1.4p+2");
    }

    #[test]
    fn test_round_trips_bit_exact() {
        for value in [3.141592653589793, 1e10, 2.5e-3, 123456.789] {
            let formatted = hex_float(value);
            // 0x1.abcp+n  ==  0x1abc * 2^(n - 4*len)
            let body = formatted.trim_start_matches("0x");
            let (mantissa_text, exponent_text) = body.split_once('p').unwrap();
            let hex_digits: String = mantissa_text.chars().filter(|c| *c != '.').collect();
            let fraction_digits = mantissa_text.split('.').nth(1).map_or(0, str::len) as i32;
            let mantissa = u64::from_str_radix(&hex_digits, 16).unwrap() as f64;
            let exponent: i32 = exponent_text.parse().unwrap();
            let reconstructed = mantissa * 2f64.powi(exponent - 4 * fraction_digits);
            assert_eq!(reconstructed, value, "{formatted}");
        }
    }
}
