use std::collections::BTreeSet;

use super::EngineError;

/// Decide whether a patient receives care "to standard" as of
/// `evaluation_month`: true iff every month from the patient's first visit
/// of the year through the evaluated month has at least one visit, with no
/// gap. Re-evaluated independently per month — a later visit never repairs
/// an earlier gap.
///
/// `visit_months` is the set of distinct visited months for one
/// (patient, disease, year). The evaluation month must itself be a visited
/// month; evaluating an unvisited month is a caller bug and fails fast
/// rather than returning a default.
pub fn classify(visit_months: &BTreeSet<u32>, evaluation_month: u32) -> Result<bool, EngineError> {
    let first = *visit_months.iter().next().ok_or(EngineError::EmptyVisitMonths)?;
    if !visit_months.contains(&evaluation_month) {
        return Err(EngineError::MonthWithoutVisit {
            month: evaluation_month,
        });
    }
    Ok((first..=evaluation_month).all(|m| visit_months.contains(&m)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn months(values: &[u32]) -> BTreeSet<u32> {
        values.iter().copied().collect()
    }

    #[test]
    fn unbroken_run_is_standard() {
        let visits = months(&[3, 4, 5, 7]);
        assert!(classify(&visits, 3).unwrap());
        assert!(classify(&visits, 4).unwrap());
        assert!(classify(&visits, 5).unwrap());
    }

    #[test]
    fn gap_breaks_standard_even_with_later_visit() {
        // Month 6 is missing, so month 7 is non-standard even though the
        // patient showed up in month 7.
        let visits = months(&[3, 4, 5, 7]);
        assert!(!classify(&visits, 7).unwrap());
    }

    #[test]
    fn first_visit_month_is_always_standard() {
        assert!(classify(&months(&[9]), 9).unwrap());
        assert!(classify(&months(&[1, 6, 7]), 1).unwrap());
    }

    #[test]
    fn gap_is_permanent_for_all_later_months() {
        let visits = months(&[2, 4, 5]);
        assert!(classify(&visits, 2).unwrap());
        assert!(!classify(&visits, 4).unwrap());
        assert!(!classify(&visits, 5).unwrap());
    }

    #[test]
    fn empty_visit_set_is_a_precondition_violation() {
        let result = classify(&BTreeSet::new(), 4);
        assert!(matches!(result, Err(EngineError::EmptyVisitMonths)));
    }

    #[test]
    fn unvisited_evaluation_month_is_a_precondition_violation() {
        let result = classify(&months(&[2, 3]), 4);
        assert!(matches!(
            result,
            Err(EngineError::MonthWithoutVisit { month: 4 })
        ));
    }

    #[test]
    fn full_year_attendance_is_standard_in_december() {
        let visits = months(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert!(classify(&visits, 12).unwrap());
    }
}
