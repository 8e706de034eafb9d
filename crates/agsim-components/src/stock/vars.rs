//! Herd outputs sliced through the aggregation layer.
//!
//! Output names are a property followed by optional `Yng` (read the unweaned young) and
//! `All` (one total) or `Tag` (one value per tag) suffixes, e.g. `Number`,
//! `NoFemaleYngTag`, `WeightAll`. Without a suffix there is one value per group.

use super::groups::{AnimalGroup, DMPool, Herd, DAYS_PER_MONTH};
use agsim_core::aggregation::{project, Criteria, Reduction, Shape};
use agsim_core::{AgsimResult, VariableValue};
use ndarray::Array1;

/// Which animals a count covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountType {
    Both,
    Female,
    Male,
    Deaths,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockProperty {
    Count(CountType),
    Age,
    AgeMonths,
    Weight,
    BaseWeight,
    ConditionScore,
    /// Dry matter intake; see [`intake`] for the full pools.
    Intake,
}

impl StockProperty {
    fn from_base(base: &str) -> Option<Self> {
        Some(match base {
            "Number" => StockProperty::Count(CountType::Both),
            "NoFemale" => StockProperty::Count(CountType::Female),
            "NoMale" => StockProperty::Count(CountType::Male),
            "Deaths" => StockProperty::Count(CountType::Deaths),
            "Age" => StockProperty::Age,
            "AgeMonths" => StockProperty::AgeMonths,
            "Weight" => StockProperty::Weight,
            "BaseWt" => StockProperty::BaseWeight,
            "CondScore" => StockProperty::ConditionScore,
            "Intake" => StockProperty::Intake,
            _ => return None,
        })
    }

    /// Only live animals have young; deaths, base weight and condition are adult only.
    fn has_young(self) -> bool {
        !matches!(
            self,
            StockProperty::Count(CountType::Deaths)
                | StockProperty::BaseWeight
                | StockProperty::ConditionScore
        )
    }

    fn reduction(self) -> Reduction {
        match self {
            StockProperty::Count(_) => Reduction::Sum,
            StockProperty::Intake => Reduction::WeightedSum,
            _ => Reduction::WeightedMean,
        }
    }

    fn read(self, group: &AnimalGroup, young: bool) -> f64 {
        match (self, young) {
            (StockProperty::Count(CountType::Both), false) => f64::from(group.number),
            (StockProperty::Count(CountType::Both), true) => f64::from(group.number_young()),
            (StockProperty::Count(CountType::Female), false) => {
                if group.sex.is_female() {
                    f64::from(group.number)
                } else {
                    0.0
                }
            }
            (StockProperty::Count(CountType::Female), true) => f64::from(group.young_females),
            (StockProperty::Count(CountType::Male), false) => {
                if group.sex.is_female() {
                    0.0
                } else {
                    f64::from(group.number)
                }
            }
            (StockProperty::Count(CountType::Male), true) => f64::from(group.young_males),
            (StockProperty::Count(CountType::Deaths), _) => f64::from(group.deaths),
            (StockProperty::Age, false) => group.age,
            (StockProperty::Age, true) => group.young_age,
            (StockProperty::AgeMonths, false) => group.age / DAYS_PER_MONTH,
            (StockProperty::AgeMonths, true) => group.young_age / DAYS_PER_MONTH,
            (StockProperty::Weight, false) => group.weight,
            (StockProperty::Weight, true) => group.young_weight,
            (StockProperty::BaseWeight, _) => group.base_weight,
            (StockProperty::ConditionScore, _) => group.condition_score(),
            (StockProperty::Intake, false) => group.intake.dm,
            (StockProperty::Intake, true) => group.young_intake.dm,
        }
    }
}

/// A parsed output name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockVar {
    pub property: StockProperty,
    pub criteria: Criteria,
}

impl StockVar {
    pub fn parse(name: &str) -> Option<Self> {
        let (rest, shape) = if let Some(rest) = name.strip_suffix("All") {
            (rest, Shape::Total)
        } else if let Some(rest) = name.strip_suffix("Tag") {
            (rest, Shape::ByTag)
        } else {
            (name, Shape::PerGroup)
        };
        let (base, young) = match rest.strip_suffix("Yng") {
            Some(base) => (base, true),
            None => (rest, false),
        };
        let property = StockProperty::from_base(base)?;
        if young && !property.has_young() {
            return None;
        }
        Some(Self {
            property,
            criteria: Criteria::new(young, shape),
        })
    }

    /// Project this output over the herd.
    pub fn values(&self, groups: &[AnimalGroup]) -> AgsimResult<Array1<f64>> {
        let young = self.criteria.young;
        project(
            &Herd(groups),
            self.criteria,
            self.property.reduction(),
            |i| self.property.read(&groups[i], young),
        )
    }

    /// Project this output and shape it as a variable: a scalar for totals, an array
    /// otherwise. Counts are integers.
    pub fn evaluate(&self, groups: &[AnimalGroup]) -> AgsimResult<VariableValue> {
        let values = self.values(groups)?;
        let counts = matches!(self.property, StockProperty::Count(_));
        Ok(match (self.criteria.shape, counts) {
            (Shape::Total, true) => VariableValue::Integer(values[0].round() as i64),
            (Shape::Total, false) => VariableValue::Number(values[0]),
            (_, true) => VariableValue::Integers(values.iter().map(|v| v.round() as i64).collect()),
            (_, false) => VariableValue::Numbers(values.to_vec()),
        })
    }
}

/// Intake pools of the herd, multiplied out by head count.
pub fn intake(groups: &[AnimalGroup], criteria: Criteria) -> AgsimResult<Array1<DMPool>> {
    project(&Herd(groups), criteria, Reduction::WeightedSum, |i| {
        if criteria.young {
            groups[i].young_intake
        } else {
            groups[i].intake
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::groups::{FeedQuality, Sex};
    use is_close::is_close;

    fn herd() -> Vec<AnimalGroup> {
        vec![
            AnimalGroup::new(Sex::Female, 10, 400.0, 60.0)
                .with_tag(1)
                .with_young(3, 2, 30.0, 12.0),
            AnimalGroup::new(Sex::Male, 5, 200.0, 40.0).with_tag(2),
            AnimalGroup::new(Sex::Castrate, 0, 100.0, 30.0),
        ]
    }

    fn eval(name: &str, groups: &[AnimalGroup]) -> VariableValue {
        StockVar::parse(name).unwrap().evaluate(groups).unwrap()
    }

    #[test]
    fn parses_names() {
        let var = StockVar::parse("NoFemaleYngTag").unwrap();
        assert_eq!(var.property, StockProperty::Count(CountType::Female));
        assert_eq!(var.criteria, Criteria::new(true, Shape::ByTag));

        assert_eq!(
            StockVar::parse("AgeMonthsAll").unwrap().property,
            StockProperty::AgeMonths
        );
        assert!(StockVar::parse("DeathsYng").is_none());
        assert!(StockVar::parse("Colour").is_none());
    }

    #[test]
    fn counts_by_shape_and_sex() {
        let groups = herd();
        assert_eq!(eval("Number", &groups), VariableValue::Integers(vec![10, 5, 0]));
        assert_eq!(eval("NumberAll", &groups), VariableValue::Integer(15));
        assert_eq!(eval("NumberTag", &groups), VariableValue::Integers(vec![10, 5]));
        assert_eq!(eval("NoMaleAll", &groups), VariableValue::Integer(5));
        assert_eq!(eval("NoFemaleYngAll", &groups), VariableValue::Integer(3));
        assert_eq!(eval("NumberYng", &groups), VariableValue::Integers(vec![5, 0, 0]));
    }

    #[test]
    fn weights_are_head_weighted() {
        let groups = herd();
        match eval("WeightAll", &groups) {
            VariableValue::Number(w) => assert!(is_close!(w, (600.0 + 200.0) / 15.0)),
            other => panic!("unexpected {:?}", other),
        }
        // The empty group contributes nothing to the total.
        assert_eq!(eval("WeightYngAll", &groups), VariableValue::Number(12.0));
        assert_eq!(eval("AgeYngTag", &groups), VariableValue::Numbers(vec![30.0, 0.0]));
    }

    #[test]
    fn intake_pools_sum_over_heads() {
        let mut groups = herd();
        for group in &mut groups {
            group.step(1.0, &FeedQuality::default());
        }
        let total = intake(&groups, Criteria::new(false, Shape::Total)).unwrap();
        let expected = 0.025 * 60.0 * 10.0 + 0.025 * 40.0 * 5.0;
        assert!(is_close!(total[0].dm, expected));
        assert!(is_close!(total[0].n, expected * 0.025));

        match eval("IntakeAll", &groups) {
            VariableValue::Number(dm) => assert!(is_close!(dm, expected)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
