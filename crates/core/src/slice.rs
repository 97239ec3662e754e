//! Slice specifications and their compact text form.
//!
//! Grammar (ASCII, comma separated, whitespace around tokens ignored):
//!
//! ```text
//! slice     := "" | dim ("," dim)*
//! dim       := int | [int] ":" [int] [":" ["1"]]
//! ```
//!
//! An integer selects a single index and drops the dimension; a range is
//! half-open with step 1. The empty string, a missing slice and a slice made
//! only of full ranges (`:`) all mean "whole array" and normalize to the empty
//! slice. The canonical text form joins dimensions with `,` and no spaces.

use crate::model::Layout;
use std::fmt;
use std::str::FromStr;

/// Selector for a single dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Selector {
    /// A single index (negative counts from the end).
    Index(i64),
    /// Half-open range; `None` bounds extend to the edge.
    Range { start: Option<i64>, stop: Option<i64> },
}

impl Selector {
    /// The `:` selector.
    pub const FULL: Selector = Selector::Range {
        start: None,
        stop: None,
    };

    pub fn range(start: Option<i64>, stop: Option<i64>) -> Self {
        Self::Range { start, stop }
    }

    fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    fn parse(segment: &str) -> crate::Result<Self> {
        let segment = segment.trim();
        if !segment.contains(':') {
            return parse_int(segment).map(Selector::Index);
        }

        let parts: Vec<&str> = segment.split(':').map(str::trim).collect();
        if parts.len() > 3 {
            return Err(crate::Error::InvalidSlice(format!(
                "too many ':' in {segment:?}"
            )));
        }
        if let Some(step) = parts.get(2)
            && !step.is_empty()
        {
            let step = parse_int(step)?;
            if step != 1 {
                return Err(crate::Error::UnsupportedStep(step.to_string()));
            }
        }
        let start = parse_bound(parts[0])?;
        let stop = parse_bound(parts[1])?;
        Ok(Self::Range { start, stop })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Range { start, stop } => {
                if let Some(start) = start {
                    write!(f, "{start}")?;
                }
                f.write_str(":")?;
                if let Some(stop) = stop {
                    write!(f, "{stop}")?;
                }
                Ok(())
            }
        }
    }
}

fn parse_int(token: &str) -> crate::Result<i64> {
    token
        .parse::<i64>()
        .map_err(|_| crate::Error::InvalidSlice(format!("not an integer: {token:?}")))
}

fn parse_bound(token: &str) -> crate::Result<Option<i64>> {
    if token.is_empty() {
        Ok(None)
    } else {
        parse_int(token).map(Some)
    }
}

/// A per-dimension selection; empty means the whole array.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Slice(Vec<Selector>);

impl Slice {
    /// The unrestricted slice.
    pub fn all() -> Self {
        Self(Vec::new())
    }

    /// Build from selectors, normalizing an all-`:` selection to [`Slice::all`].
    pub fn new(selectors: Vec<Selector>) -> Self {
        if selectors.iter().all(Selector::is_full) {
            Self::all()
        } else {
            Self(selectors)
        }
    }

    /// Parse an optional query value; `None` means the whole array.
    pub fn parse_opt(text: Option<&str>) -> crate::Result<Self> {
        text.map_or_else(|| Ok(Self::all()), Self::parse)
    }

    pub fn parse(text: &str) -> crate::Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::all());
        }
        let selectors = text
            .split(',')
            .map(Selector::parse)
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(Self::new(selectors))
    }

    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.0
    }

    /// Resolve the slice against an array shape.
    pub fn resolve(&self, shape: &[u64]) -> crate::Result<Selection> {
        if self.0.len() > shape.len() {
            return Err(crate::Error::TooManyIndices {
                given: self.0.len(),
                ndim: shape.len(),
            });
        }
        let dims = shape
            .iter()
            .enumerate()
            .map(|(dim, &len)| {
                let selector = self.0.get(dim).copied().unwrap_or(Selector::FULL);
                resolve_dim(selector, dim, len)
            })
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(Selection { dims })
    }
}

impl FromStr for Slice {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, selector) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{selector}")?;
        }
        Ok(())
    }
}

fn clamp_bound(bound: i64, len: u64) -> u64 {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let adjusted = if bound < 0 { bound.saturating_add(len_i) } else { bound };
    adjusted.clamp(0, len_i) as u64
}

fn resolve_dim(selector: Selector, dim: usize, len: u64) -> crate::Result<DimRange> {
    match selector {
        Selector::Index(index) => {
            let len_i = i64::try_from(len).unwrap_or(i64::MAX);
            let adjusted = if index < 0 { index + len_i } else { index };
            if adjusted < 0 || adjusted >= len_i {
                return Err(crate::Error::IndexOutOfBounds { index, dim, len });
            }
            let start = adjusted as u64;
            Ok(DimRange {
                start,
                stop: start + 1,
                keep: false,
            })
        }
        Selector::Range { start, stop } => {
            let start = start.map_or(0, |s| clamp_bound(s, len));
            let stop = stop.map_or(len, |s| clamp_bound(s, len)).max(start);
            Ok(DimRange {
                start,
                stop,
                keep: true,
            })
        }
    }
}

/// Resolved extent of a selection along one dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DimRange {
    pub start: u64,
    pub stop: u64,
    /// False when the dimension was selected by a single index.
    pub keep: bool,
}

impl DimRange {
    pub fn len(&self) -> u64 {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.stop == self.start
    }
}

/// A slice resolved against a concrete shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub dims: Vec<DimRange>,
}

impl Selection {
    /// Shape of the selected region, without dimensions selected by index.
    pub fn out_shape(&self) -> Vec<u64> {
        self.dims.iter().filter(|d| d.keep).map(DimRange::len).collect()
    }

    /// Number of selected elements.
    pub fn items(&self) -> u64 {
        self.dims.iter().map(DimRange::len).product()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.iter().any(DimRange::is_empty)
    }

    /// Linear (C-order) indices of the chunks intersecting the selection.
    pub fn chunk_indices(&self, layout: &Layout) -> Vec<u64> {
        if self.is_empty() {
            return Vec::new();
        }
        let grid = layout.chunk_grid();
        let ranges: Vec<(u64, u64)> = self
            .dims
            .iter()
            .zip(&layout.chunks)
            .map(|(d, &c)| (d.start / c, d.stop.div_ceil(c)))
            .collect();

        let mut result = Vec::new();
        let mut coords: Vec<u64> = ranges.iter().map(|r| r.0).collect();
        loop {
            let linear = coords
                .iter()
                .zip(&grid)
                .fold(0u64, |acc, (&c, &g)| acc * g + c);
            result.push(linear);

            // Odometer increment, last dimension fastest.
            let mut dim = coords.len();
            loop {
                if dim == 0 {
                    return result;
                }
                dim -= 1;
                coords[dim] += 1;
                if coords[dim] < ranges[dim].1 {
                    break;
                }
                coords[dim] = ranges[dim].0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Dtype;

    #[test]
    fn test_parse_mixed_selectors() {
        let slice = Slice::parse("1, 2:5, :3, -1:").unwrap();
        assert_eq!(
            slice.selectors(),
            &[
                Selector::Index(1),
                Selector::range(Some(2), Some(5)),
                Selector::range(None, Some(3)),
                Selector::range(Some(-1), None),
            ]
        );
        assert_eq!(slice.to_string(), "1,2:5,:3,-1:");
    }

    #[test]
    fn test_text_round_trip() {
        for text in ["", "0", "-3", "0:5", ":5", "5:", "0:0", "1,:,2:4", ":,3"] {
            let parsed = Slice::parse(text).unwrap();
            assert_eq!(parsed.to_string(), text, "text {text:?}");
        }
    }

    #[test]
    fn test_value_round_trip() {
        let cases = vec![
            Slice::all(),
            Slice::new(vec![Selector::Index(0)]),
            Slice::new(vec![Selector::range(Some(0), None)]),
            Slice::new(vec![Selector::FULL, Selector::Index(-2)]),
            Slice::new(vec![Selector::range(Some(-4), Some(-1)), Selector::Index(7)]),
        ];
        for slice in cases {
            assert_eq!(Slice::parse(&slice.to_string()).unwrap(), slice);
        }
    }

    #[test]
    fn test_unrestricted_forms_normalize() {
        assert!(Slice::parse("").unwrap().is_all());
        assert!(Slice::parse(":").unwrap().is_all());
        assert!(Slice::parse(":, :").unwrap().is_all());
        assert!(Slice::parse_opt(None).unwrap().is_all());
        assert_eq!(Slice::new(vec![Selector::FULL]).to_string(), "");
    }

    #[test]
    fn test_step_handling() {
        assert_eq!(
            Slice::parse("0:10:1").unwrap(),
            Slice::new(vec![Selector::range(Some(0), Some(10))])
        );
        assert!(Slice::parse("0:10:").is_ok());
        assert!(matches!(
            Slice::parse("0:10:2"),
            Err(crate::Error::UnsupportedStep(_))
        ));
        assert!(matches!(
            Slice::parse("::-1"),
            Err(crate::Error::UnsupportedStep(_))
        ));
    }

    #[test]
    fn test_malformed_slices() {
        for text in ["a", "1,", "1:2:3:4", "1.5", "x:2"] {
            assert!(
                matches!(Slice::parse(text), Err(crate::Error::InvalidSlice(_))),
                "text {text:?}"
            );
        }
    }

    #[test]
    fn test_resolve_python_semantics() {
        let shape = [10, 4];
        let sel = Slice::parse("-3:,1").unwrap().resolve(&shape).unwrap();
        assert_eq!(sel.dims[0], DimRange { start: 7, stop: 10, keep: true });
        assert_eq!(sel.dims[1], DimRange { start: 1, stop: 2, keep: false });
        assert_eq!(sel.out_shape(), vec![3]);

        let clamped = Slice::parse("5:100").unwrap().resolve(&shape).unwrap();
        assert_eq!(clamped.dims[0], DimRange { start: 5, stop: 10, keep: true });
        assert_eq!(clamped.dims[1], DimRange { start: 0, stop: 4, keep: true });

        let reversed = Slice::parse("8:2").unwrap().resolve(&shape).unwrap();
        assert!(reversed.is_empty());
    }

    #[test]
    fn test_resolve_errors() {
        assert!(matches!(
            Slice::parse("10").unwrap().resolve(&[10]),
            Err(crate::Error::IndexOutOfBounds { .. })
        ));
        assert!(matches!(
            Slice::parse("-11").unwrap().resolve(&[10]),
            Err(crate::Error::IndexOutOfBounds { .. })
        ));
        assert!(matches!(
            Slice::parse("1,2").unwrap().resolve(&[10]),
            Err(crate::Error::TooManyIndices { .. })
        ));
    }

    #[test]
    fn test_chunk_indices_whole_array() {
        let layout = Layout::new(Dtype::Int32, vec![10, 7], vec![4, 5], vec![4, 5]).unwrap();
        let sel = Slice::all().resolve(&layout.shape).unwrap();
        assert_eq!(sel.chunk_indices(&layout), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_chunk_indices_sub_region() {
        // Grid is 3 x 2 chunks.
        let layout = Layout::new(Dtype::Int32, vec![10, 7], vec![4, 5], vec![4, 5]).unwrap();
        let sel = Slice::parse("5:9,6").unwrap().resolve(&layout.shape).unwrap();
        assert_eq!(sel.chunk_indices(&layout), vec![3, 5]);

        let row = Slice::parse("0").unwrap().resolve(&layout.shape).unwrap();
        assert_eq!(row.chunk_indices(&layout), vec![0, 1]);

        let empty = Slice::parse("3:3").unwrap().resolve(&layout.shape).unwrap();
        assert!(empty.chunk_indices(&layout).is_empty());
    }

    #[test]
    fn test_chunk_indices_scalar() {
        let layout = Layout::new(Dtype::Float64, vec![], vec![], vec![]).unwrap();
        let sel = Slice::all().resolve(&layout.shape).unwrap();
        assert_eq!(sel.chunk_indices(&layout), vec![0]);
        assert_eq!(sel.out_shape(), Vec::<u64>::new());
    }
}
