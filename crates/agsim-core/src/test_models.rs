//! Small models used by the unit tests of this crate.

use crate::clock::Clock;
use crate::errors::{AgsimError, AgsimResult};
use crate::events::{EventContext, DAILY_EVENTS, END_OF_SIMULATION, START_OF_DAY, START_OF_SIMULATION};
use crate::links::{Link, LinkSlot};
use crate::model::{Folder, Model, Zone};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// A clock running for `days` days from 2000-01-01.
pub fn clock(days: u32) -> Clock {
    let start = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
    let end = start
        .checked_add_days(Days::new(u64::from(days.max(1) - 1)))
        .unwrap();
    Clock::new(start, end)
}

/// Links to the clock, its enclosing zone and an optional folder; counts days.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Consumer {
    #[serde(skip)]
    pub clock: Link<Clock>,
    #[serde(skip)]
    pub zone: Link<Zone>,
    #[serde(skip)]
    pub folder: Link<Folder>,
    #[serde(skip)]
    pub days_seen: usize,
}

#[typetag::serde]
impl Model for Consumer {
    fn links(&mut self) -> Vec<LinkSlot<'_>> {
        vec![
            LinkSlot::by_type("clock", &mut self.clock),
            LinkSlot::ancestor("zone", &mut self.zone),
            LinkSlot::child("folder", &mut self.folder).optional(),
        ]
    }

    fn subscriptions(&self) -> Vec<String> {
        vec![START_OF_DAY.to_string()]
    }

    fn handle_event(&mut self, _event: &str, ctx: &mut EventContext<'_>) -> AgsimResult<()> {
        let clock = ctx.get(&self.clock)?;
        if clock.today() != ctx.today() {
            return Err(AgsimError::Error("Clock and context disagree".to_string()));
        }
        self.days_seen += 1;
        Ok(())
    }
}

/// Records every lifecycle event it sees, with the date it was seen on.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EventLog {
    #[serde(skip)]
    pub events: Vec<String>,
    #[serde(skip)]
    pub dates: Vec<NaiveDate>,
}

#[typetag::serde]
impl Model for EventLog {
    fn subscriptions(&self) -> Vec<String> {
        let mut events = vec![START_OF_SIMULATION.to_string()];
        events.extend(DAILY_EVENTS.iter().map(|e| e.to_string()));
        events.push(END_OF_SIMULATION.to_string());
        events
    }

    fn handle_event(&mut self, event: &str, ctx: &mut EventContext<'_>) -> AgsimResult<()> {
        self.events.push(event.to_string());
        if let Some(today) = ctx.today() {
            self.dates.push(today);
        }
        Ok(())
    }
}

/// Fails on a given event, or on the n-th day.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Failing {
    pub event: Option<String>,
    pub day: Option<usize>,
    #[serde(skip)]
    pub days: usize,
}

impl Failing {
    pub fn on_event(event: &str) -> Self {
        Self {
            event: Some(event.to_string()),
            ..Self::default()
        }
    }

    pub fn on_day(day: usize) -> Self {
        Self {
            day: Some(day),
            ..Self::default()
        }
    }
}

#[typetag::serde]
impl Model for Failing {
    fn subscriptions(&self) -> Vec<String> {
        match &self.event {
            Some(event) => vec![event.clone()],
            None => vec![START_OF_DAY.to_string()],
        }
    }

    fn handle_event(&mut self, event: &str, _ctx: &mut EventContext<'_>) -> AgsimResult<()> {
        if self.event.as_deref() == Some(event) {
            return Err(AgsimError::Error(format!("Failed on {}", event)));
        }
        if event == START_OF_DAY {
            self.days += 1;
            if self.day == Some(self.days) {
                return Err(AgsimError::Error(format!("Failed on day {}", self.days)));
            }
        }
        Ok(())
    }
}
