//! Time specification for daily model output.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{I2oError, I2oResult};
use crate::params::RequestParams;

/// Calendar day of a model output file. `day` is the day of the month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl DatasetTime {
    pub fn new(year: i32, month: u32, day: u32) -> I2oResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(I2oError::invalid("month", format!("{} is not in 1..=12", month)));
        }
        if !(1..=31).contains(&day) {
            return Err(I2oError::invalid("day", format!("{} is not in 1..=31", day)));
        }
        if NaiveDate::from_ymd_opt(year, month, day).is_none() {
            return Err(I2oError::invalid(
                "day",
                format!("{}-{}-{} is not a calendar date", year, month, day),
            ));
        }
        Ok(Self { year, month, day })
    }

    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }
}

impl fmt::Display for DatasetTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Pull a `(year, month, day)` date out of request parameters.
///
/// Returns `Ok(None)` unless all three are present. Values that are present
/// but not integers are an Invalid error rather than a missing time.
pub fn extract_time(params: &RequestParams) -> I2oResult<Option<DatasetTime>> {
    let year = params.optional_i32("year")?;
    let month = params.optional_i64("month")?;
    let day = params.optional_i64("day")?;

    match (year, month, day) {
        (Some(y), Some(m), Some(d)) => {
            let m = u32::try_from(m)
                .map_err(|_| I2oError::invalid("month", format!("{} is negative", m)))?;
            let d = u32::try_from(d)
                .map_err(|_| I2oError::invalid("day", format!("{} is negative", d)))?;
            DatasetTime::new(y, m, d).map(Some)
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_full_time() {
        let p = RequestParams::from_query([("year", "2014"), ("month", "3"), ("day", "10")]);
        let t = extract_time(&p).unwrap().unwrap();
        assert_eq!(t, DatasetTime { year: 2014, month: 3, day: 10 });
        assert_eq!(t.to_string(), "2014-03-10");
    }

    #[test]
    fn test_partial_time_is_none() {
        let p = RequestParams::from_query([("year", "2014"), ("month", "3")]);
        assert_eq!(extract_time(&p).unwrap(), None);
    }

    #[test]
    fn test_non_numeric_year_is_invalid() {
        let p = RequestParams::from_query([("year", "two"), ("month", "3"), ("day", "10")]);
        assert!(matches!(
            extract_time(&p),
            Err(I2oError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_impossible_date_is_invalid() {
        assert!(DatasetTime::new(2014, 2, 30).is_err());
        assert!(DatasetTime::new(2014, 13, 1).is_err());
        assert!(DatasetTime::new(2016, 2, 29).is_ok());
    }
}
