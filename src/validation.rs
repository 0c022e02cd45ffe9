//! Small reusable validators used by the configuration layer.
//!
//! Each validator returns `Err(&'static str)` describing the first problem, which the
//! caller wraps with the offending field name.

use std::ops::RangeInclusive;

/// Validates that a buffer capacity is a non-zero power of two.
///
/// # Arguments
///
/// * `capacity` - The capacity to validate.
///
/// # Returns
///
/// * `Ok(())` if ring indices can be wrapped with a bitmask.
/// * `Err(&'static str)` otherwise.
pub fn is_power_of_two(capacity: usize) -> Result<(), &'static str> {
    if capacity.is_power_of_two() {
        Ok(())
    } else {
        Err("Value must be a non-zero power of two")
    }
}

/// Validates if a given value is within a specified numeric range.
///
/// # Arguments
///
/// * `value` - The value to validate.
/// * `range` - The inclusive range to validate against.
///
/// # Returns
///
/// * `Ok(())` if the value is within the range.
/// * `Err(&'static str)` if the value is outside the range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates that a floating-point value is finite and strictly positive.
pub fn is_positive_finite(value: f64) -> Result<(), &'static str> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err("Value must be finite and greater than 0")
    }
}

/// Validates if a given string is not empty.
///
/// # Arguments
///
/// * `value` - The string to validate.
///
/// # Returns
///
/// * `Ok(())` if the string is not empty.
/// * `Err(&'static str)` if the string is empty.
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.trim().is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}

/// Validates that no value appears twice.
pub fn is_unique<T: PartialEq>(values: &[T]) -> Result<(), &'static str> {
    let duplicate = values
        .iter()
        .enumerate()
        .any(|(i, value)| values[..i].contains(value));
    if duplicate {
        Err("Values must be unique")
    } else {
        Ok(())
    }
}
