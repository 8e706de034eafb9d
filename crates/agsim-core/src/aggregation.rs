//! Projection of a variable-length set of groups into fixed-shape output arrays.
//!
//! Models such as a livestock herd hold a changing list of groups and expose dozens of
//! derived outputs (numbers, ages, weights, intakes) sliced the same few ways: one value
//! per group, a single total, or one value per tag bucket. The slicing is defined once
//! here; callers only supply how to read a value from group `i`.
//!
//! The output length depends only on the [`Criteria`] and the group set, never on which
//! property is read.

use crate::errors::{AgsimError, AgsimResult};
use ndarray::{Array1, ArrayViewMut1};

/// Shape of an aggregated output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// One slot per group currently present.
    PerGroup,
    /// A single slot for all groups.
    Total,
    /// One slot per tag, from tag 1 to the highest tag in use. Untagged groups (tag 0)
    /// are excluded.
    ByTag,
}

/// Which animals to read and how to shape the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Criteria {
    /// Read the unweaned young of each group instead of the group itself.
    pub young: bool,
    pub shape: Shape,
}

impl Criteria {
    pub fn new(young: bool, shape: Shape) -> Self {
        Self { young, shape }
    }

    /// Build criteria from the flag triple used in output names.
    ///
    /// Totalling and tag bucketing are mutually exclusive.
    pub fn from_flags(young: bool, total: bool, by_tag: bool) -> AgsimResult<Self> {
        let shape = match (total, by_tag) {
            (false, false) => Shape::PerGroup,
            (true, false) => Shape::Total,
            (false, true) => Shape::ByTag,
            (true, true) => {
                return Err(AgsimError::Error(
                    "Cannot aggregate to a total and by tag at the same time".to_string(),
                ))
            }
        };
        Ok(Self { young, shape })
    }

    /// Length of the output for a group set.
    pub fn output_len<S: GroupSource + ?Sized>(&self, source: &S) -> usize {
        match self.shape {
            Shape::PerGroup => source.len(),
            Shape::Total => 1,
            Shape::ByTag => source.highest_tag(),
        }
    }
}

/// How group values combine into a total or tag bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Values are summed as-is. Used for quantities that already count the group, such
    /// as head counts.
    Sum,
    /// Values are per-head quantities averaged by head count (age, weight).
    WeightedMean,
    /// Values are per-head quantities multiplied out by head count (intake). Per-group
    /// outputs also carry the group total.
    WeightedSum,
}

/// Element types that can be aggregated.
pub trait Accumulator: Clone + Default {
    /// `self += weight * other`.
    fn add_weighted(&mut self, other: &Self, weight: f64);
    fn scale(&mut self, factor: f64);
}

impl Accumulator for f64 {
    fn add_weighted(&mut self, other: &Self, weight: f64) {
        *self += other * weight;
    }

    fn scale(&mut self, factor: f64) {
        *self *= factor;
    }
}

/// A set of groups that can be aggregated.
pub trait GroupSource {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of heads in group `index`, or in its young when `young` is set.
    fn head_count(&self, index: usize, young: bool) -> f64;

    /// Tag of group `index`; 0 when untagged.
    fn tag(&self, index: usize) -> usize;

    fn highest_tag(&self) -> usize {
        (0..self.len()).map(|i| self.tag(i)).max().unwrap_or(0)
    }
}

/// Fill `out` with the projection of `value` over the groups of `source`.
///
/// `out` must have exactly [`Criteria::output_len`] elements. Totals and buckets with no
/// heads are left at the default (zero) value rather than divided by zero.
pub fn populate<S, V, F>(
    source: &S,
    criteria: Criteria,
    reduction: Reduction,
    value: F,
    mut out: ArrayViewMut1<V>,
) -> AgsimResult<()>
where
    S: GroupSource + ?Sized,
    V: Accumulator,
    F: Fn(usize) -> V,
{
    let expected = criteria.output_len(source);
    if out.len() != expected {
        return Err(AgsimError::Error(format!(
            "Output buffer has {} elements, expected {}",
            out.len(),
            expected
        )));
    }
    out.fill(V::default());

    match criteria.shape {
        Shape::PerGroup => {
            for index in 0..source.len() {
                let v = value(index);
                out[index] = match reduction {
                    Reduction::WeightedSum => {
                        let mut total = V::default();
                        total.add_weighted(&v, source.head_count(index, criteria.young));
                        total
                    }
                    Reduction::Sum | Reduction::WeightedMean => v,
                };
            }
        }
        Shape::Total => {
            out[0] = reduce(source, criteria.young, reduction, &value, 0..source.len());
        }
        Shape::ByTag => {
            for (slot, tag) in (1..=expected).enumerate() {
                let members = (0..source.len()).filter(|i| source.tag(*i) == tag);
                out[slot] = reduce(source, criteria.young, reduction, &value, members);
            }
        }
    }
    Ok(())
}

/// Allocate an output of the right length and populate it.
pub fn project<S, V, F>(
    source: &S,
    criteria: Criteria,
    reduction: Reduction,
    value: F,
) -> AgsimResult<Array1<V>>
where
    S: GroupSource + ?Sized,
    V: Accumulator,
    F: Fn(usize) -> V,
{
    let mut out = Array1::from_elem(criteria.output_len(source), V::default());
    populate(source, criteria, reduction, value, out.view_mut())?;
    Ok(out)
}

fn reduce<S, V, F, I>(source: &S, young: bool, reduction: Reduction, value: &F, members: I) -> V
where
    S: GroupSource + ?Sized,
    V: Accumulator,
    F: Fn(usize) -> V,
    I: Iterator<Item = usize>,
{
    let mut total = V::default();
    let mut heads = 0.0;
    for index in members {
        let n = source.head_count(index, young);
        let v = value(index);
        match reduction {
            Reduction::Sum => total.add_weighted(&v, 1.0),
            Reduction::WeightedMean | Reduction::WeightedSum => total.add_weighted(&v, n),
        }
        heads += n;
    }
    if reduction == Reduction::WeightedMean {
        if heads > 0.0 {
            total.scale(1.0 / heads);
        } else {
            total = V::default();
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;

    struct Groups {
        counts: Vec<f64>,
        young: Vec<f64>,
        tags: Vec<usize>,
    }

    impl GroupSource for Groups {
        fn len(&self) -> usize {
            self.counts.len()
        }

        fn head_count(&self, index: usize, young: bool) -> f64 {
            if young {
                self.young[index]
            } else {
                self.counts[index]
            }
        }

        fn tag(&self, index: usize) -> usize {
            self.tags[index]
        }
    }

    fn groups() -> Groups {
        Groups {
            counts: vec![0.0, 5.0, 10.0],
            young: vec![0.0, 2.0, 0.0],
            tags: vec![2, 0, 2],
        }
    }

    const WEIGHTS: [f64; 3] = [100.0, 50.0, 40.0];

    #[test]
    fn weighted_mean_total() {
        let g = groups();
        let out = project(
            &g,
            Criteria::from_flags(false, true, false).unwrap(),
            Reduction::WeightedMean,
            |i| WEIGHTS[i],
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert!(is_close!(out[0], 650.0 / 15.0));
    }

    #[test]
    fn zero_heads_yield_zero_not_nan() {
        let g = Groups {
            counts: vec![0.0, 0.0],
            young: vec![0.0, 0.0],
            tags: vec![1, 1],
        };
        let total = project(
            &g,
            Criteria::new(false, Shape::Total),
            Reduction::WeightedMean,
            |_| 50.0,
        )
        .unwrap();
        assert_eq!(total[0], 0.0);

        let empty = Groups {
            counts: vec![],
            young: vec![],
            tags: vec![],
        };
        let total = project(&empty, Criteria::new(false, Shape::Total), Reduction::Sum, |_| 1.0)
            .unwrap();
        assert_eq!(total.to_vec(), vec![0.0]);
        let per_group = project(
            &empty,
            Criteria::new(false, Shape::PerGroup),
            Reduction::Sum,
            |_| 1.0,
        )
        .unwrap();
        assert!(per_group.is_empty());
    }

    #[test]
    fn by_tag_excludes_untagged_and_sizes_to_highest_tag() {
        let g = groups();
        let counts = project(
            &g,
            Criteria::from_flags(false, false, true).unwrap(),
            Reduction::Sum,
            |i| g.counts[i],
        )
        .unwrap();
        // Tag 1 unused, tag 2 holds groups 0 and 2; the untagged group is dropped.
        assert_eq!(counts.to_vec(), vec![0.0, 10.0]);

        let weights = project(
            &g,
            Criteria::new(false, Shape::ByTag),
            Reduction::WeightedMean,
            |i| WEIGHTS[i],
        )
        .unwrap();
        assert_eq!(weights.to_vec(), vec![0.0, 40.0]);
    }

    #[test]
    fn per_group_weighted_sum_multiplies_out() {
        let g = groups();
        let intake = project(
            &g,
            Criteria::new(false, Shape::PerGroup),
            Reduction::WeightedSum,
            |_| 1.5,
        )
        .unwrap();
        assert_eq!(intake.to_vec(), vec![0.0, 7.5, 15.0]);

        let young = project(
            &g,
            Criteria::new(true, Shape::Total),
            Reduction::WeightedSum,
            |_| 1.5,
        )
        .unwrap();
        assert_eq!(young[0], 3.0);
    }

    #[test]
    fn rejects_conflicting_flags_and_bad_buffers() {
        assert!(Criteria::from_flags(false, true, true).is_err());

        let g = groups();
        let mut buffer = Array1::<f64>::zeros(2);
        let err = populate(
            &g,
            Criteria::new(false, Shape::PerGroup),
            Reduction::Sum,
            |_| 1.0,
            buffer.view_mut(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected 3"));
    }
}
