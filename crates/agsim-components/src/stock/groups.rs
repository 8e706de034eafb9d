use agsim_core::aggregation::{Accumulator, GroupSource};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul};

/// Days per month used for age conversions.
pub const DAYS_PER_MONTH: f64 = 365.25 / 12.0;

/// Dry matter eaten per day as a fraction of live weight.
const INTAKE_PER_KG: f64 = 0.025;

/// Relative condition change per condition score unit.
const CONDITION_PER_SCORE: f64 = 0.15;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    #[default]
    Female,
    Male,
    Castrate,
}

impl Sex {
    pub fn is_female(self) -> bool {
        self == Sex::Female
    }
}

/// Dry matter with its nutrient content.
///
/// unit: kg
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DMPool {
    pub dm: f64,
    pub n: f64,
    pub p: f64,
}

impl DMPool {
    pub fn new(dm: f64, n: f64, p: f64) -> Self {
        Self { dm, n, p }
    }
}

impl Add for DMPool {
    type Output = DMPool;

    fn add(self, other: DMPool) -> DMPool {
        DMPool::new(self.dm + other.dm, self.n + other.n, self.p + other.p)
    }
}

impl Mul<f64> for DMPool {
    type Output = DMPool;

    fn mul(self, factor: f64) -> DMPool {
        DMPool::new(self.dm * factor, self.n * factor, self.p * factor)
    }
}

impl Accumulator for DMPool {
    fn add_weighted(&mut self, other: &Self, weight: f64) {
        *self = *self + *other * weight;
    }

    fn scale(&mut self, factor: f64) {
        *self = *self * factor;
    }
}

/// Nutrient concentrations of the feed on offer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct FeedQuality {
    /// unit: kg N / kg DM
    pub n_fraction: f64,
    /// unit: kg P / kg DM
    pub p_fraction: f64,
}

impl Default for FeedQuality {
    fn default() -> Self {
        Self {
            n_fraction: 0.025,
            p_fraction: 0.003,
        }
    }
}

/// Animals of one sex and age class managed together, with their unweaned young.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct AnimalGroup {
    pub sex: Sex,
    pub number: u32,
    /// unit: days
    pub age: f64,
    /// unit: kg
    pub weight: f64,
    /// Weight of the animals in average condition.
    /// unit: kg
    pub base_weight: f64,
    /// unit: kg / day
    pub daily_gain: f64,
    /// Fraction of the group dying over a year.
    pub mortality: f64,
    /// Tag bucket, 0 when untagged.
    pub tag: usize,
    pub priority: i32,
    pub young_females: u32,
    pub young_males: u32,
    /// unit: days
    pub young_age: f64,
    /// unit: kg
    pub young_weight: f64,
    /// unit: kg / day
    pub young_daily_gain: f64,
    #[serde(skip)]
    pub deaths: u32,
    #[serde(skip)]
    pub(crate) pending_deaths: f64,
    /// Intake per head today.
    #[serde(skip)]
    pub intake: DMPool,
    #[serde(skip)]
    pub young_intake: DMPool,
}

impl Default for AnimalGroup {
    fn default() -> Self {
        Self {
            sex: Sex::Female,
            number: 0,
            age: 0.0,
            weight: 0.0,
            base_weight: 0.0,
            daily_gain: 0.0,
            mortality: 0.0,
            tag: 0,
            priority: 0,
            young_females: 0,
            young_males: 0,
            young_age: 0.0,
            young_weight: 0.0,
            young_daily_gain: 0.0,
            deaths: 0,
            pending_deaths: 0.0,
            intake: DMPool::default(),
            young_intake: DMPool::default(),
        }
    }
}

impl AnimalGroup {
    pub fn new(sex: Sex, number: u32, age: f64, weight: f64) -> Self {
        Self {
            sex,
            number,
            age,
            weight,
            base_weight: weight,
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, tag: usize) -> Self {
        self.tag = tag;
        self
    }

    pub fn with_young(mut self, females: u32, males: u32, age: f64, weight: f64) -> Self {
        self.young_females = females;
        self.young_males = males;
        self.young_age = age;
        self.young_weight = weight;
        self
    }

    pub fn number_young(&self) -> u32 {
        self.young_females + self.young_males
    }

    /// Condition score on a 1 to 5 scale, 3 being average condition.
    pub fn condition_score(&self) -> f64 {
        if self.base_weight <= 0.0 {
            return 0.0;
        }
        let relative_condition = self.weight / self.base_weight;
        3.0 + (relative_condition - 1.0) / CONDITION_PER_SCORE
    }

    /// Advance the group by one day.
    ///
    /// `intake_factor` scales the potential intake for today's conditions.
    pub fn step(&mut self, intake_factor: f64, feed: &FeedQuality) {
        self.pending_deaths += f64::from(self.number) * self.mortality / 365.0;
        let deaths = (self.pending_deaths.floor() as u32).min(self.number);
        self.pending_deaths -= f64::from(deaths);
        self.number -= deaths;
        self.deaths = deaths;

        self.age += 1.0;
        self.weight = (self.weight + self.daily_gain).max(0.0);
        self.intake = potential_intake(self.weight, intake_factor, feed);

        if self.number_young() > 0 {
            self.young_age += 1.0;
            self.young_weight = (self.young_weight + self.young_daily_gain).max(0.0);
            self.young_intake = potential_intake(self.young_weight, intake_factor, feed);
        } else {
            self.young_intake = DMPool::default();
        }
    }

    /// Separate the young into groups of their own once they reach `weaning_age`.
    pub fn wean(&mut self, weaning_age: f64) -> Vec<AnimalGroup> {
        if self.number_young() == 0 || self.young_age < weaning_age {
            return Vec::new();
        }
        let weaned = [(Sex::Female, self.young_females), (Sex::Male, self.young_males)]
            .into_iter()
            .filter(|(_, number)| *number > 0)
            .map(|(sex, number)| AnimalGroup {
                daily_gain: self.young_daily_gain,
                mortality: self.mortality,
                tag: self.tag,
                priority: self.priority,
                ..AnimalGroup::new(sex, number, self.young_age, self.young_weight)
            })
            .collect();
        self.young_females = 0;
        self.young_males = 0;
        self.young_age = 0.0;
        self.young_weight = 0.0;
        self.young_intake = DMPool::default();
        weaned
    }
}

fn potential_intake(weight: f64, factor: f64, feed: &FeedQuality) -> DMPool {
    let dm = INTAKE_PER_KG * weight * factor;
    DMPool::new(dm, dm * feed.n_fraction, dm * feed.p_fraction)
}

/// The groups of a herd as seen by the aggregation layer.
pub struct Herd<'a>(pub &'a [AnimalGroup]);

impl GroupSource for Herd<'_> {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn head_count(&self, index: usize, young: bool) -> f64 {
        let group = &self.0[index];
        if young {
            f64::from(group.number_young())
        } else {
            f64::from(group.number)
        }
    }

    fn tag(&self, index: usize) -> usize {
        self.0[index].tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn deaths_accumulate_until_whole_animals() {
        let mut group = AnimalGroup {
            mortality: 0.5,
            ..AnimalGroup::new(Sex::Female, 365, 400.0, 50.0)
        };
        group.step(1.0, &FeedQuality::default());
        // 365 * 0.5 / 365 = 0.5 of an animal: nobody dies yet.
        assert_eq!(group.deaths, 0);
        group.step(1.0, &FeedQuality::default());
        assert_eq!(group.deaths, 1);
        assert_eq!(group.number, 364);
        assert_eq!(group.age, 402.0);
    }

    #[test]
    fn intake_follows_weight_and_feed() {
        let mut group = AnimalGroup::new(Sex::Male, 10, 300.0, 40.0);
        group.step(0.5, &FeedQuality::default());
        assert_relative_eq!(group.intake.dm, 0.5);
        assert_relative_eq!(group.intake.n, 0.0125, epsilon = 1e-12);
        assert_eq!(group.young_intake, DMPool::default());
    }

    #[test]
    fn condition_score_relative_to_base_weight() {
        let mut group = AnimalGroup::new(Sex::Female, 1, 700.0, 50.0);
        assert_relative_eq!(group.condition_score(), 3.0);
        group.weight = 57.5;
        assert_relative_eq!(group.condition_score(), 4.0, epsilon = 1e-10);
    }

    #[test]
    fn weaning_splits_young_by_sex() {
        let mut ewes = AnimalGroup::new(Sex::Female, 20, 800.0, 55.0)
            .with_tag(2)
            .with_young(6, 0, 99.0, 25.0);
        assert!(ewes.wean(100.0).is_empty());

        ewes.young_age = 100.0;
        let weaned = ewes.wean(100.0);
        assert_eq!(weaned.len(), 1);
        assert_eq!(weaned[0].sex, Sex::Female);
        assert_eq!(weaned[0].number, 6);
        assert_eq!(weaned[0].tag, 2);
        assert_eq!(ewes.number_young(), 0);
    }

    #[test]
    fn pools_accumulate_componentwise() {
        let mut total = DMPool::default();
        total.add_weighted(&DMPool::new(1.0, 0.1, 0.01), 3.0);
        total.add_weighted(&DMPool::new(2.0, 0.2, 0.02), 1.0);
        assert_relative_eq!(total.dm, 5.0);
        assert_relative_eq!(total.n, 0.5, epsilon = 1e-12);
        assert_relative_eq!(total.p, 0.05, epsilon = 1e-12);
    }
}
