/// Achievement of a standard-patient count against a yearly target, as a
/// percentage rounded to two decimals. A non-positive target yields 0.
///
/// This is the only achievement formula in the system: single-facility
/// targets and summed admin targets go through the same function.
pub fn percentage(standard_count: i64, target: i64) -> f64 {
    if target <= 0 {
        return 0.0;
    }
    let raw = standard_count as f64 / target as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}
