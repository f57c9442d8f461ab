// Index selection for embedding m sparse values into n dense rows.

use std::collections::HashSet;

use super::{AlignError, IndexMapping};

/// Candidate rows `0, stride, 2*stride, ...` below `n`, with `stride = n / m`.
///
/// Flooring the stride over-produces, so the result always has at least `m`
/// entries.
pub fn even_spacing_candidates(n: usize, m: usize) -> Result<Vec<usize>, AlignError> {
    if m == 0 || n < m {
        return Err(AlignError::InputShape {
            sparse: m,
            dense: n,
        });
    }
    let stride = n / m;
    Ok((0..n).step_by(stride).collect())
}

/// Pick the `k - m` candidates to discard, spread evenly over the candidate list.
///
/// Positions are sampled evenly over `[0, k - 1]`, rounded half-to-even and
/// mapped back to candidate values. Duplicate positions collapse.
pub fn select_indices_to_drop(candidates: &[usize], m: usize) -> Vec<usize> {
    let k = candidates.len();
    let extra = k.saturating_sub(m);
    if extra == 0 {
        return Vec::new();
    }
    let mut positions: Vec<usize> = linspace(0.0, (k - 1) as f64, extra)
        .into_iter()
        .map(|p| p.round_ties_even() as usize)
        .collect();
    positions.dedup();
    positions.into_iter().map(|p| candidates[p]).collect()
}

/// Candidates with the dropped values removed, order preserved.
pub fn final_mapping(candidates: &[usize], dropped: &[usize]) -> Vec<usize> {
    let dropped: HashSet<usize> = dropped.iter().copied().collect();
    candidates
        .iter()
        .copied()
        .filter(|c| !dropped.contains(c))
        .collect()
}

/// Intermediate steps of a mapping, kept for diagnostics.
#[derive(Clone, Debug, PartialEq)]
pub struct MappingPlan {
    pub candidates: Vec<usize>,
    pub dropped: Vec<usize>,
    pub mapping: IndexMapping,
}

/// Compose candidates, drops and the final mapping, checked to hold exactly `m` indices.
pub fn plan_mapping(n: usize, m: usize) -> Result<MappingPlan, AlignError> {
    let candidates = even_spacing_candidates(n, m)?;
    let dropped = select_indices_to_drop(&candidates, m);
    let indices = final_mapping(&candidates, &dropped);
    if indices.len() != m {
        return Err(AlignError::MappingCount {
            expected: m,
            actual: indices.len(),
        });
    }
    let mapping = IndexMapping::try_new(indices, n)?;
    Ok(MappingPlan {
        candidates,
        dropped,
        mapping,
    })
}

/// Full mapping of `m` sparse values into `n` rows.
pub fn index_mapping(n: usize, m: usize) -> Result<IndexMapping, AlignError> {
    plan_mapping(n, m).map(|plan| plan.mapping)
}

// A single sample sits at `start`.
fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count as f64 - 1.0);
            (0..count).map(|i| start + step * i as f64).collect()
        }
    }
}
