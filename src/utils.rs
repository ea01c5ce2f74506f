use chrono::Utc;

/// Clamp into [0,1]. NaN is not expected here; callers validate finiteness first.
pub fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Current wall-clock time as epoch milliseconds.
pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse `a,b,c,...` into exactly `N` floats.
pub fn parse_float_list<const N: usize>(raw: &str) -> Option<[f64; N]> {
    let mut out = [0.0; N];
    let mut parts = raw.split(',').map(str::trim);
    for slot in out.iter_mut() {
        *slot = parts.next()?.parse::<f64>().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp01_bounds() {
        assert_eq!(clamp01(1.5), 1.0);
        assert_eq!(clamp01(-0.2), 0.0);
        assert_eq!(clamp01(0.25), 0.25);
    }

    #[test]
    fn float_lists_need_exact_arity() {
        assert_eq!(parse_float_list::<2>("1.5, -2"), Some([1.5, -2.0]));
        assert_eq!(parse_float_list::<4>("0,0,10,20"), Some([0.0, 0.0, 10.0, 20.0]));
        assert_eq!(parse_float_list::<2>("1"), None);
        assert_eq!(parse_float_list::<2>("1,2,3"), None);
        assert_eq!(parse_float_list::<2>("a,b"), None);
    }
}
