//! Computes `factor, offset` pairs between native and target units and
//! applies them element-wise to sample/time-series values (§4.6).

use device_model::UnitConversion;

/// Direct (non-prefixed, non-composite) conversions, `native -> target`.
/// The reverse direction is derived automatically.
const TABLE: &[(&str, &str, f64, f64)] = &[
    ("INCH", "MILLIMETER", 25.4, 0.0),
    ("FOOT", "MILLIMETER", 304.8, 0.0),
    ("POUND", "GRAM", 453.592, 0.0),
    ("RADIAN", "DEGREE", 180.0 / std::f64::consts::PI, 0.0),
    ("FAHRENHEIT", "CELSIUS", 5.0 / 9.0, -(5.0 / 9.0) * 32.0),
    ("PSI", "PASCAL", 6894.76, 0.0),
    ("HOUR", "SECOND", 3600.0, 0.0),
    ("MINUTE", "SECOND", 60.0, 0.0),
    ("MILLIMETER", "METER", 0.001, 0.0),
];

fn direct_lookup(native: &str, target: &str) -> Option<UnitConversion> {
    for (n, t, factor, offset) in TABLE {
        if *n == native && *t == target {
            return Some(UnitConversion { factor: *factor, offset: *offset });
        }
        if *t == native && *n == target {
            // invert: target = (native - offset) / factor
            return Some(UnitConversion { factor: 1.0 / factor, offset: -offset / factor });
        }
    }
    None
}

struct ParsedUnit {
    base: String,
    /// Linear scale contributed by a `KILO` prefix, before exponentiation.
    prefix_scale: f64,
    /// Power applied to both the prefix scale and the table factor: 3 for
    /// a `CUBIC_` prefix, `n` for an explicit `^n` suffix, 1 otherwise.
    exponent: i32,
    is_3d: bool,
}

/// Splits a `KILO<UNIT>` or `CUBIC_<UNIT>` prefix and a `<UNIT>^<n>` or
/// `_3D` suffix off a unit name.
fn parse_unit(unit: &str) -> ParsedUnit {
    let (unit, is_3d) = match unit.strip_suffix("_3D") {
        Some(rest) => (rest, true),
        None => (unit, false),
    };

    let (unit, explicit_exponent) = match unit.split_once('^') {
        Some((base, exp)) => (base, exp.parse::<i32>().ok()),
        None => (unit, None),
    };

    if let Some(rest) = unit.strip_prefix("CUBIC_") {
        return ParsedUnit { base: rest.to_string(), prefix_scale: 1.0, exponent: 3, is_3d };
    }

    if let Some(rest) = unit.strip_prefix("KILO") {
        return ParsedUnit { base: rest.to_string(), prefix_scale: 1000.0, exponent: explicit_exponent.unwrap_or(1), is_3d };
    }

    ParsedUnit { base: unit.to_string(), prefix_scale: 1.0, exponent: explicit_exponent.unwrap_or(1), is_3d }
}

/// Computes the conversion from `native` to `target` units, honouring the
/// fixed table, `KILO`/`CUBIC_` prefixes, `^n`/`_3D` suffixes, and
/// composite `A/B` ratio forms. Mixed composite/simple pairs are rejected.
/// Identical units return the identity conversion.
pub fn compute(native: &str, target: &str) -> Option<UnitConversion> {
    if native == target {
        return Some(UnitConversion::IDENTITY);
    }

    let native_composite = native.split_once('/');
    let target_composite = target.split_once('/');

    match (native_composite, target_composite) {
        (Some((n_num, n_den)), Some((t_num, t_den))) => {
            let num = compute(n_num, t_num)?;
            let den = compute(n_den, t_den)?;
            Some(UnitConversion { factor: num.factor / den.factor, offset: 0.0 })
        }
        (None, None) => {
            let native = parse_unit(native);
            let target = parse_unit(target);

            if native.is_3d != target.is_3d || native.exponent != target.exponent {
                return None;
            }

            let base = direct_lookup(&native.base, &target.base)?;
            let exponent = native.exponent;
            let factor =
                base.factor.powi(exponent) * native.prefix_scale.powi(exponent) / target.prefix_scale.powi(exponent);
            let offset = if exponent == 1 { base.offset } else { 0.0 };

            Some(UnitConversion { factor, offset })
        }
        _ => None,
    }
}

/// Applies a conversion to a scalar value.
pub fn convert_scalar(conversion: &UnitConversion, value: f64) -> f64 {
    conversion.apply(value)
}

/// Applies a conversion element-wise to a vector (three-space samples and
/// time-series payloads).
pub fn convert_vector(conversion: &UnitConversion, values: &mut [f64]) {
    for v in values {
        *v = conversion.apply(*v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inch_to_millimeter() {
        let c = compute("INCH", "MILLIMETER").unwrap();
        assert!((convert_scalar(&c, 1.0) - 25.4).abs() < 1e-9);
    }

    #[test]
    fn fahrenheit_to_celsius() {
        let c = compute("FAHRENHEIT", "CELSIUS").unwrap();
        assert!((convert_scalar(&c, 32.0)).abs() < 1e-9);
    }

    #[test]
    fn identity_conversion() {
        let c = compute("MILLIMETER", "MILLIMETER").unwrap();
        assert_eq!(convert_scalar(&c, 7.0), 7.0);
    }

    #[test]
    fn kilo_prefix_scales_by_thousand() {
        let c = compute("KILOPSI", "PASCAL").unwrap();
        let expected = 6894.76 * 1000.0;
        assert!((c.factor - expected).abs() < 1.0);
    }

    #[test]
    fn composite_ratio_of_factors() {
        let c = compute("INCH/MINUTE", "MILLIMETER/SECOND").unwrap();
        let expected = 25.4 / 60.0;
        assert!((c.factor - expected).abs() < 1e-9);
    }

    #[test]
    fn unknown_pair_is_none() {
        assert!(compute("BANANA", "MILLIMETER").is_none());
    }
}
