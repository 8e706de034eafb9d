//! Daily weather
//!
//! Provides the "Weather" capability: either a constant day repeated for the whole
//! simulation, or daily records read from a CSV file with the columns
//! `Date,MaxT,MinT,Rain,Radn`.

use agsim_core::events::{EventContext, DO_WEATHER, START_OF_SIMULATION};
use agsim_core::{AgsimError, AgsimResult, Model, VariableValue};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Capability name other models link against.
pub const WEATHER_CAPABILITY: &str = "Weather";

/// Weather of a single day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DailyWeather {
    /// unit: °C
    pub max_t: f64,
    /// unit: °C
    pub min_t: f64,
    /// unit: mm
    pub rain: f64,
    /// unit: MJ / m^2
    pub radn: f64,
}

impl DailyWeather {
    pub fn mean_t(&self) -> f64 {
        (self.max_t + self.min_t) / 2.0
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WeatherRecord {
    date: NaiveDate,
    max_t: f64,
    min_t: f64,
    rain: f64,
    radn: f64,
}

/// Read daily records from a CSV file.
pub fn read_weather_file(path: &Path) -> AgsimResult<BTreeMap<NaiveDate, DailyWeather>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut records = BTreeMap::new();
    for record in reader.deserialize() {
        let record: WeatherRecord = record?;
        records.insert(
            record.date,
            DailyWeather {
                max_t: record.max_t,
                min_t: record.min_t,
                rain: record.rain,
                radn: record.radn,
            },
        );
    }
    debug!(file = %path.display(), days = records.len(), "Read weather file");
    Ok(records)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Weather {
    /// unit: degrees
    pub latitude: f64,
    /// Weather used for every day when no file is given.
    pub constant: Option<DailyWeather>,
    pub file_name: Option<PathBuf>,
    #[serde(skip)]
    records: BTreeMap<NaiveDate, DailyWeather>,
    #[serde(skip)]
    today: Option<DailyWeather>,
}

impl Weather {
    pub fn constant(day: DailyWeather) -> Self {
        Self {
            constant: Some(day),
            ..Self::default()
        }
    }

    pub fn from_file(file_name: impl Into<PathBuf>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            ..Self::default()
        }
    }

    /// Weather of the current day, once `DoWeather` has run.
    pub fn today(&self) -> Option<&DailyWeather> {
        self.today.as_ref()
    }

    fn load(&mut self) -> AgsimResult<()> {
        self.records = match (&self.file_name, &self.constant) {
            (Some(path), _) => read_weather_file(path)?,
            (None, Some(_)) => BTreeMap::new(),
            (None, None) => {
                return Err(AgsimError::Error(
                    "Weather needs either a FileName or a Constant day".to_string(),
                ))
            }
        };
        Ok(())
    }

    fn lookup(&self, date: NaiveDate) -> AgsimResult<DailyWeather> {
        if self.file_name.is_none() {
            if let Some(day) = self.constant {
                return Ok(day);
            }
        }
        self.records
            .get(&date)
            .copied()
            .ok_or_else(|| AgsimError::Error(format!("No weather data for {}", date)))
    }
}

#[typetag::serde]
impl Model for Weather {
    fn subscriptions(&self) -> Vec<String> {
        vec![START_OF_SIMULATION.to_string(), DO_WEATHER.to_string()]
    }

    fn handle_event(&mut self, event: &str, ctx: &mut EventContext<'_>) -> AgsimResult<()> {
        match event {
            START_OF_SIMULATION => self.load(),
            DO_WEATHER => {
                self.today = Some(self.lookup(ctx.require_today()?)?);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn get(&self, property: &str) -> Option<VariableValue> {
        if property == "Latitude" {
            return Some(VariableValue::Number(self.latitude));
        }
        let today = self.today.as_ref()?;
        let value = match property {
            "MaxT" => today.max_t,
            "MinT" => today.min_t,
            "MeanT" => today.mean_t(),
            "Rain" => today.rain,
            "Radn" => today.radn,
            _ => return None,
        };
        Some(VariableValue::Number(value))
    }

    fn set(&mut self, property: &str, value: VariableValue) -> AgsimResult<()> {
        match (property, value.as_f64()) {
            ("Latitude", Some(latitude)) => {
                self.latitude = latitude;
                Ok(())
            }
            _ => Err(AgsimError::Error(format!(
                "Cannot set Weather.{} to {}",
                property, value
            ))),
        }
    }

    fn provides(&self, capability: &str) -> bool {
        capability == WEATHER_CAPABILITY
    }

    fn file_references(&mut self) -> Vec<&mut PathBuf> {
        self.file_name.iter_mut().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2000, 1, day).unwrap()
    }

    #[test]
    fn reads_csv_records() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Date,MaxT,MinT,Rain,Radn").unwrap();
        writeln!(file, "2000-01-01, 30.0, 15.0, 0.0, 25.0").unwrap();
        writeln!(file, "2000-01-02, 28.0, 14.0, 12.5, 18.0").unwrap();
        file.flush().unwrap();

        let mut weather = Weather::from_file(file.path());
        weather.load().unwrap();
        let second = weather.lookup(date(2)).unwrap();
        assert_eq!(second.rain, 12.5);
        assert_eq!(second.mean_t(), 21.0);

        let err = weather.lookup(date(3)).unwrap_err();
        assert!(err.to_string().contains("2000-01-03"));
    }

    #[test]
    fn constant_weather_needs_no_file() {
        let day = DailyWeather {
            max_t: 20.0,
            min_t: 10.0,
            rain: 1.0,
            radn: 15.0,
        };
        let mut weather = Weather::constant(day);
        weather.load().unwrap();
        assert_eq!(weather.lookup(date(9)).unwrap(), day);
        assert!(weather.get("MaxT").is_none());
        assert!(weather.provides(WEATHER_CAPABILITY));

        assert!(Weather::default().load().is_err());
    }
}
