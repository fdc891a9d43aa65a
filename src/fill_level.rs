//! Fill level of a bin from its calibration and one ultrasonic distance sample.
//!
//! `fill = (depth_when_empty + distance_to_fill_line - ultrasound) / depth_when_empty * 100`,
//! rounded half to even. The result is not clamped: a noisy sample can land outside
//! `0..=100` and is reported as-is.

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FillLevelError {
    #[error("depth when empty is zero")]
    ZeroDepth,
    #[error("fill level does not fit in i64")]
    Overflow,
}

pub fn calculate_fill_level(
    depth_when_empty: i64,
    distance_to_fill_line: i64,
    ultrasound: i64,
) -> Result<i64, FillLevelError> {
    if depth_when_empty == 0 {
        return Err(FillLevelError::ZeroDepth);
    }

    let mut numerator = (i128::from(depth_when_empty) + i128::from(distance_to_fill_line)
        - i128::from(ultrasound))
        * 100;
    let mut denominator = i128::from(depth_when_empty);
    if denominator < 0 {
        numerator = -numerator;
        denominator = -denominator;
    }

    let floor = numerator.div_euclid(denominator);
    let twice_remainder = numerator.rem_euclid(denominator) * 2;
    let rounded = match twice_remainder.cmp(&denominator) {
        std::cmp::Ordering::Less => floor,
        std::cmp::Ordering::Greater => floor + 1,
        std::cmp::Ordering::Equal if floor % 2 == 0 => floor,
        std::cmp::Ordering::Equal => floor + 1,
    };

    i64::try_from(rounded).map_err(|_| FillLevelError::Overflow)
}
