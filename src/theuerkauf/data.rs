use std::borrow::Cow;

use num_traits::ToPrimitive;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An array pair of (bin center, bin content) for binned count data.
///
/// The channel axis must be sorted in ascending order, as produced by any
/// histogramming scheme. Contents are non-negative counts; empty bins are
/// tolerated and handled by the variance floor during fitting (see
/// [`FitConfig::variance_floor`](crate::theuerkauf::FitConfig::variance_floor)).
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitArgs<'a, 'b> {
    /// Bin centers, ascending
    pub channel: Cow<'a, [f64]>,
    /// Bin contents paired with `channel`
    pub counts: Cow<'b, [f64]>,
}

impl<'a, 'b> FitArgs<'a, 'b> {
    pub fn new(channel: Cow<'a, [f64]>, counts: Cow<'b, [f64]>) -> Self {
        assert_eq!(
            channel.len(),
            counts.len(),
            "channel array length ({}) must equal counts length ({})",
            channel.len(),
            counts.len()
        );
        Self { channel, counts }
    }

    /// Build from a channel axis and any integer or float count type.
    pub fn from_counts<T: ToPrimitive>(channel: Vec<f64>, counts: &[T]) -> FitArgs<'static, 'static> {
        let counts: Vec<f64> = counts
            .iter()
            .map(|c| c.to_f64().unwrap_or_default())
            .collect();
        FitArgs::new(Cow::Owned(channel), Cow::Owned(counts))
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.channel
            .iter()
            .copied()
            .zip(self.counts.iter().copied())
    }

    /// Create a borrowed version of this data
    pub fn borrow(&self) -> FitArgs<'_, '_> {
        FitArgs::new(
            Cow::Borrowed(self.channel.as_ref()),
            Cow::Borrowed(self.counts.as_ref()),
        )
    }

    /// The sub-slice of bins whose centers fall within `[min, max]`.
    pub fn restrict(&self, min: f64, max: f64) -> FitArgs<'_, '_> {
        let start = self.channel.partition_point(|&x| x < min);
        let end = self.channel.partition_point(|&x| x <= max);
        FitArgs::new(
            Cow::Borrowed(&self.channel[start..end]),
            Cow::Borrowed(&self.counts[start..end]),
        )
    }
}

impl From<(Vec<f64>, Vec<f64>)> for FitArgs<'static, 'static> {
    fn from(pair: (Vec<f64>, Vec<f64>)) -> Self {
        Self::new(Cow::Owned(pair.0), Cow::Owned(pair.1))
    }
}

impl<'a, 'b> From<(&'a [f64], &'b [f64])> for FitArgs<'a, 'b> {
    fn from(pair: (&'a [f64], &'b [f64])) -> Self {
        Self::new(Cow::Borrowed(pair.0), Cow::Borrowed(pair.1))
    }
}
