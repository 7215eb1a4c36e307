//! Deterministic output naming in input order.

use crate::transform::profile::ResequencerParams;

fn digits(mut n: u64) -> usize {
    let mut count = 1;
    while n >= 10 {
        n /= 10;
        count += 1;
    }
    count
}

/// Names for `count` surviving files, in the order given.
///
/// Without an explicit `pad_width` the counter is padded to the width of the
/// largest number assigned.
pub fn assign_names(params: &ResequencerParams, count: usize) -> Vec<String> {
    if count == 0 {
        return Vec::new();
    }
    let last = params.start.saturating_add(count as u64 - 1);
    let width = params.pad_width.unwrap_or_else(|| digits(last));

    (0..count as u64)
        .map(|i| params.render(params.start + i, width))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template() {
        let names = assign_names(&ResequencerParams::default(), 3);
        assert_eq!(names, vec!["test 1.csv", "test 2.csv", "test 3.csv"]);
    }

    #[test]
    fn test_auto_padding_to_widest_number() {
        let names = assign_names(&ResequencerParams::default(), 12);
        assert_eq!(names[0], "test 01.csv");
        assert_eq!(names[11], "test 12.csv");
    }

    #[test]
    fn test_explicit_width_and_start() {
        let params = ResequencerParams {
            template: "flight_{number}.csv".into(),
            start: 7,
            pad_width: Some(4),
        };
        assert_eq!(assign_names(&params, 2), vec!["flight_0007.csv", "flight_0008.csv"]);
    }

    #[test]
    fn test_empty_corpus() {
        assert!(assign_names(&ResequencerParams::default(), 0).is_empty());
    }
}
