use super::{
    cumulative_with_gaps, fill_linear, fill_natural_cubic, plan_mapping, AlignError,
    AlignedFrame, AlignmentStats, CumulativeCurves, DenseSeries, IndexMapping, PlacedReturns,
    SparseSeries,
};

/// Embed the sparse returns into the dense grid and build both cumulative curves.
pub fn align_series(dense: DenseSeries, sparse: SparseSeries) -> Result<AlignedFrame, AlignError> {
    let n = dense.len();
    let m = sparse.len();

    let plan = plan_mapping(n, m)?;
    let placed = place_returns(n, &sparse, &plan.mapping)?;
    let curves = interpolate(&placed)?;

    let stats = AlignmentStats {
        dense_len: n,
        sparse_len: m,
        stride: n / m,
        candidate_count: plan.candidates.len(),
        dropped_count: plan.dropped.len(),
        forced_head: placed.forced_head,
        forced_tail: placed.forced_tail,
    };

    Ok(AlignedFrame {
        dense,
        sparse,
        mapping: plan.mapping,
        placed,
        curves,
        stats,
    })
}

/// Put `sparse[i]` at row `mapping[i]` of an `n`-row column; zero-fill empty end rows.
pub fn place_returns(
    n: usize,
    sparse: &SparseSeries,
    mapping: &IndexMapping,
) -> Result<PlacedReturns, AlignError> {
    if mapping.len() != sparse.len() {
        return Err(AlignError::InvalidMapping(format!(
            "{} indices for {} returns",
            mapping.len(),
            sparse.len()
        )));
    }
    if n == 0 {
        return Err(AlignError::InputShape {
            sparse: sparse.len(),
            dense: n,
        });
    }
    let non_finite = sparse
        .values
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_finite());
    if let Some((index, &value)) = non_finite {
        return Err(AlignError::NonFiniteReturn { index, value });
    }
    if let Some(idx) = mapping.iter().find(|&idx| idx >= n) {
        return Err(AlignError::InvalidMapping(format!(
            "index {idx} outside frame of {n} rows"
        )));
    }

    let mut values = vec![None; n];
    for (idx, &ret) in mapping.iter().zip(sparse.values.iter()) {
        values[idx] = Some(ret);
    }

    let forced_head = values[0].is_none();
    if forced_head {
        values[0] = Some(0.0);
    }
    let forced_tail = values[n - 1].is_none();
    if forced_tail {
        values[n - 1] = Some(0.0);
    }

    Ok(PlacedReturns {
        values,
        forced_head,
        forced_tail,
    })
}

/// Cumulate the placed returns, then fill the gaps linearly and with a natural cubic spline.
pub fn interpolate(placed: &PlacedReturns) -> Result<CumulativeCurves, AlignError> {
    let cumulative = cumulative_with_gaps(&placed.values);
    let linear = fill_linear(&cumulative)?;
    let cubic = fill_natural_cubic(&cumulative)?;
    Ok(CumulativeCurves {
        cumulative,
        linear,
        cubic,
    })
}
