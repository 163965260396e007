//! When a rotation is due

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// `start_day` is a day of the month (1-31)
    #[default]
    Monthly,
    /// `start_day` is a day of the week, 1 = Monday ... 7 = Sunday
    Weekly,
}

impl Frequency {
    pub fn max_start_day(&self) -> u32 {
        match self {
            Frequency::Monthly => 31,
            Frequency::Weekly => 7,
        }
    }

    /// Whether `date` is a rotation day
    ///
    /// A monthly start day past the end of a short month never matches that
    /// month.
    pub fn is_due(&self, start_day: u32, date: NaiveDate) -> bool {
        match self {
            Frequency::Monthly => date.day() == start_day,
            Frequency::Weekly => date.weekday().number_from_monday() == start_day,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_monthly() {
        assert!(Frequency::Monthly.is_due(1, date(2024, 3, 1)));
        assert!(!Frequency::Monthly.is_due(1, date(2024, 3, 2)));
        assert!(Frequency::Monthly.is_due(15, date(2024, 2, 15)));
        // No 31st in April
        assert!((1..=30).all(|d| !Frequency::Monthly.is_due(31, date(2024, 4, d))));
    }

    #[test]
    fn test_weekly() {
        // 2024-03-04 is a Monday
        assert!(Frequency::Weekly.is_due(1, date(2024, 3, 4)));
        assert!(Frequency::Weekly.is_due(7, date(2024, 3, 10)));
        assert!(!Frequency::Weekly.is_due(1, date(2024, 3, 5)));
    }

    #[test]
    fn test_serde() {
        let freq: Frequency = serde_yaml::from_str("weekly").unwrap();
        assert_eq!(freq, Frequency::Weekly);
        assert_eq!(Frequency::default(), Frequency::Monthly);
    }
}
