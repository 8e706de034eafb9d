//! Livestock
//!
//! A herd of [`AnimalGroup`]s that ages, gains weight, dies and weans its young on
//! `DoStock`. The list of groups changes during a run, so every output is projected
//! through the aggregation layer (see [`vars`]) rather than stored.

mod groups;
pub mod vars;

pub use groups::{AnimalGroup, DMPool, FeedQuality, Herd, Sex, DAYS_PER_MONTH};
pub use vars::{CountType, StockProperty, StockVar};

use crate::weather::WEATHER_CAPABILITY;
use agsim_core::events::{EventContext, DO_STOCK, START_OF_SIMULATION};
use agsim_core::links::{Link, LinkSlot};
use agsim_core::summary::Severity;
use agsim_core::{AgsimError, AgsimResult, Model, VariableValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Maximum temperature above which animals eat less.
/// unit: °C
const HEAT_STRESS_THRESHOLD: f64 = 30.0;
/// Fractional intake reduction per degree above the threshold.
const HEAT_STRESS_SLOPE: f64 = 0.02;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Stock {
    pub groups: Vec<AnimalGroup>,
    /// unit: days
    pub weaning_age: f64,
    pub feed: FeedQuality,
    #[serde(skip)]
    weather: Link,
}

impl Default for Stock {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            weaning_age: 120.0,
            feed: FeedQuality::default(),
            weather: Link::default(),
        }
    }
}

impl Stock {
    pub fn new(groups: Vec<AnimalGroup>) -> Self {
        Self {
            groups,
            ..Self::default()
        }
    }

    pub fn highest_tag(&self) -> usize {
        self.groups.iter().map(|g| g.tag).max().unwrap_or(0)
    }

    /// Evaluate a herd output by name, or `None` for a name that is not an output.
    pub fn output(&self, property: &str) -> AgsimResult<Option<VariableValue>> {
        let value = match property {
            "NoGroups" => VariableValue::Integer(self.groups.len() as i64),
            "TagNo" => VariableValue::Integers(self.groups.iter().map(|g| g.tag as i64).collect()),
            "HighestTag" => VariableValue::Integer(self.highest_tag() as i64),
            _ => match StockVar::parse(property) {
                Some(var) => var.evaluate(&self.groups)?,
                None => return Ok(None),
            },
        };
        Ok(Some(value))
    }

    fn validate(&self) -> AgsimResult<()> {
        for (index, group) in self.groups.iter().enumerate() {
            if !(0.0..=1.0).contains(&group.mortality) {
                return Err(AgsimError::Error(format!(
                    "Group {} has mortality {} outside [0, 1]",
                    index + 1,
                    group.mortality
                )));
            }
            if group.weight < 0.0 || group.age < 0.0 {
                return Err(AgsimError::Error(format!(
                    "Group {} has a negative age or weight",
                    index + 1
                )));
            }
        }
        Ok(())
    }

    fn intake_factor(&self, ctx: &EventContext<'_>) -> AgsimResult<f64> {
        if self.weather.id().is_none() {
            return Ok(1.0);
        }
        let max_t = ctx
            .linked(&self.weather)?
            .get("MaxT")
            .and_then(|v| v.as_f64())
            .unwrap_or(HEAT_STRESS_THRESHOLD);
        let excess = (max_t - HEAT_STRESS_THRESHOLD).max(0.0);
        Ok((1.0 - HEAT_STRESS_SLOPE * excess).max(0.0))
    }

    fn daily_step(&mut self, intake_factor: f64) -> Vec<AnimalGroup> {
        let mut weaned = Vec::new();
        for group in &mut self.groups {
            group.step(intake_factor, &self.feed);
            weaned.extend(group.wean(self.weaning_age));
        }
        self.groups.extend(weaned.iter().cloned());
        weaned
    }
}

#[typetag::serde]
impl Model for Stock {
    fn links(&mut self) -> Vec<LinkSlot<'_>> {
        vec![LinkSlot::by_capability("weather", WEATHER_CAPABILITY, &mut self.weather).optional()]
    }

    fn subscriptions(&self) -> Vec<String> {
        vec![START_OF_SIMULATION.to_string(), DO_STOCK.to_string()]
    }

    fn handle_event(&mut self, event: &str, ctx: &mut EventContext<'_>) -> AgsimResult<()> {
        match event {
            START_OF_SIMULATION => self.validate(),
            DO_STOCK => {
                let factor = self.intake_factor(ctx)?;
                let weaned = self.daily_step(factor);
                for group in &weaned {
                    debug!(tag = group.tag, number = group.number, "Weaned young");
                    ctx.summary(
                        &format!("Weaned {} {:?} young (tag {})", group.number, group.sex, group.tag),
                        Severity::Information,
                    )?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn get(&self, property: &str) -> Option<VariableValue> {
        self.output(property).unwrap_or_else(|e| {
            warn!(output = property, "Cannot evaluate stock output: {}", e);
            None
        })
    }

    fn set(&mut self, property: &str, value: VariableValue) -> AgsimResult<()> {
        match (property, value.as_f64()) {
            ("WeaningAge", Some(age)) if age >= 0.0 => {
                self.weaning_age = age;
                Ok(())
            }
            _ => Err(AgsimError::Error(format!(
                "Cannot set Stock.{} to {}",
                property, value
            ))),
        }
    }
}
