use crate::errors::{AgsimError, AgsimResult};
use crate::model::Model;
use crate::value::VariableValue;
use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// The simulated calendar of a simulation.
///
/// Every simulation needs exactly one clock. The simulation unit resets it before the
/// first day and advances it after each day's events; the simulation ends once today
/// passes the end date.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Clock {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(skip)]
    today: Option<NaiveDate>,
}

impl Clock {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            today: None,
        }
    }

    /// Rewind to the start date.
    pub fn reset(&mut self) -> AgsimResult<()> {
        if self.start_date > self.end_date {
            return Err(AgsimError::Structural {
                source_name: "Clock".to_string(),
                message: format!(
                    "start date {} is after end date {}",
                    self.start_date, self.end_date
                ),
            });
        }
        self.today = Some(self.start_date);
        Ok(())
    }

    /// The current simulated date, once the clock has been reset.
    pub fn today(&self) -> Option<NaiveDate> {
        self.today
    }

    pub fn advance(&mut self) {
        self.today = self.today.and_then(|d| d.checked_add_days(Days::new(1)));
    }

    /// Whether every day up to and including the end date has been simulated.
    pub fn is_finished(&self) -> bool {
        match self.today {
            Some(today) => today > self.end_date,
            None => true,
        }
    }

    /// Total number of days the clock spans.
    pub fn number_of_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

#[typetag::serde]
impl Model for Clock {
    fn get(&self, property: &str) -> Option<VariableValue> {
        match property {
            "Today" => self.today.map(VariableValue::Date),
            "StartDate" => Some(VariableValue::Date(self.start_date)),
            "EndDate" => Some(VariableValue::Date(self.end_date)),
            "DayOfYear" => self.today.map(|d| VariableValue::Integer(d.ordinal() as i64)),
            "Year" => self.today.map(|d| VariableValue::Integer(d.year() as i64)),
            _ => None,
        }
    }

    fn set(&mut self, property: &str, value: VariableValue) -> AgsimResult<()> {
        let date = value.as_date().ok_or_else(|| {
            AgsimError::Error(format!("Clock.{} expects a date, got {}", property, value))
        })?;
        match property {
            "StartDate" => self.start_date = date,
            "EndDate" => self.end_date = date,
            _ => {
                return Err(AgsimError::Error(format!(
                    "Clock has no settable property '{}'",
                    property
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn runs_inclusive_of_end_date() {
        let mut clock = Clock::new(date(2000, 12, 30), date(2001, 1, 1));
        assert!(clock.is_finished());
        clock.reset().unwrap();

        let mut days = Vec::new();
        while !clock.is_finished() {
            days.push(clock.today().unwrap());
            clock.advance();
        }
        assert_eq!(days, vec![date(2000, 12, 30), date(2000, 12, 31), date(2001, 1, 1)]);
        assert_eq!(clock.number_of_days(), 3);
    }

    #[test]
    fn start_after_end_is_rejected() {
        let mut clock = Clock::new(date(2001, 1, 2), date(2001, 1, 1));
        let err = clock.reset().unwrap_err();
        assert!(matches!(err, AgsimError::Structural { .. }));
    }

    #[test]
    fn properties() {
        let mut clock = Clock::new(date(2000, 2, 1), date(2000, 3, 1));
        clock.reset().unwrap();
        assert_eq!(clock.get("DayOfYear"), Some(VariableValue::Integer(32)));

        clock
            .set("EndDate", VariableValue::Text("2000-02-10".to_string()))
            .unwrap();
        assert_eq!(clock.end_date, date(2000, 2, 10));
        assert!(clock.set("Today", VariableValue::Date(date(2000, 2, 3))).is_err());
        assert!(clock.set("EndDate", VariableValue::Number(3.0)).is_err());
    }
}
