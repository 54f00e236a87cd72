//! Dues periods: one calendar month of one year.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::db::{Error, FieldError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

const MONTH_ABBREVIATIONS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

impl Period {
    pub fn new(month: u32, year: i32) -> Result<Self, Error> {
        let mut errors = Vec::new();
        if !(1..=12).contains(&month) {
            errors.push(FieldError::new("month", "Month must be between 1 and 12."));
        }
        if !(1900..=9999).contains(&year) {
            errors.push(FieldError::new("year", "Year must be between 1900 and 9999."));
        }
        if errors.is_empty() {
            Ok(Self { year, month })
        } else {
            Err(Error::Validation(errors))
        }
    }

    /// The period `date` falls in.
    pub fn containing<D: Datelike>(date: &D) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Every month of `year`, January first.
    pub fn months_of(year: i32) -> impl Iterator<Item = Period> {
        (1..=12).map(move |month| Period { year, month })
    }

    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Lazily yields this period, then each earlier one.
    pub fn walk_back(self) -> impl Iterator<Item = Period> + Clone {
        std::iter::successors(Some(self), |period| Some(period.previous()))
    }

    /// First day of the month.
    pub fn first_day(self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Half-open `[first day, first day of next month)` range.
    pub fn date_range(self) -> (NaiveDate, NaiveDate) {
        (self.first_day(), self.next().first_day())
    }

    /// Chart label such as `Mar 2024`.
    pub fn label(self) -> String {
        let name = (self.month as usize)
            .checked_sub(1)
            .and_then(|idx| MONTH_ABBREVIATIONS.get(idx))
            .copied()
            .unwrap_or("???");
        format!("{name} {}", self.year)
    }

    pub(crate) fn month_column(self) -> i32 {
        self.month as i32
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_month() {
        let err = Period::new(13, 2024).unwrap_err();
        match err {
            Error::Validation(fields) => assert_eq!(fields[0].field, "month"),
            other => panic!("unexpected error {other}"),
        }
        assert!(Period::new(0, 2024).is_err());
        assert!(Period::new(12, 2024).is_ok());
    }

    #[test]
    fn walk_back_crosses_year_boundary() {
        let periods: Vec<String> = Period::new(2, 2024)
            .unwrap()
            .walk_back()
            .take(4)
            .map(|p| p.to_string())
            .collect();
        assert_eq!(periods, ["2024-02", "2024-01", "2023-12", "2023-11"]);
    }

    #[test]
    fn walk_back_is_restartable() {
        let walk = Period::new(6, 2024).unwrap().walk_back().take(3);
        let first: Vec<_> = walk.clone().collect();
        let second: Vec<_> = walk.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn december_range_ends_next_january() {
        let (start, end) = Period::new(12, 2023).unwrap().date_range();
        assert_eq!(start, NaiveDate::from_ymd_opt(2023, 12, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn labels_use_short_month_names() {
        assert_eq!(Period::new(3, 2024).unwrap().label(), "Mar 2024");
        assert_eq!(Period::months_of(2024).count(), 12);
    }
}
