use crate::common::*;
use crate::guide_counts::GuideCount;
use crate::model::*;
use crate::posterior::Prediction;
use mcmc_util::traits::SummaryOps;

/// Scalar QC of a set of predictions at an assignment threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QcSummary {
    /// assigned (guide, cell) pairs per distinct cell; above 1 in
    /// high-MOI screens
    pub moi: f32,
    /// assigned (guide, cell) pairs per distinct guide
    pub coverage: f32,
    /// fraction of cells with at least one assigned guide
    pub cells_with_guide: f32,
    /// fraction of guides assigned to at least one cell
    pub guides_with_cell: f32,
    pub num_cells: usize,
    pub num_guides: usize,
    pub num_assigned: usize,
}

/// A prediction is assigned when `probability >= threshold`
pub fn summarize_assignments(
    predictions: &[Prediction],
    threshold: f32,
) -> anyhow::Result<QcSummary> {
    if predictions.is_empty() {
        return Err(LentilError::EmptyInput("no predictions").into());
    }

    let mut cells = HashSet::new();
    let mut guides = HashSet::new();
    let mut assigned_cells = HashSet::new();
    let mut assigned_guides = HashSet::new();
    let mut num_assigned = 0;

    for p in predictions {
        cells.insert(p.cell);
        guides.insert(p.guide);
        if p.probability >= threshold {
            num_assigned += 1;
            assigned_cells.insert(p.cell);
            assigned_guides.insert(p.guide);
        }
    }

    let num_cells = cells.len();
    let num_guides = guides.len();

    Ok(QcSummary {
        moi: num_assigned as f32 / num_cells as f32,
        coverage: num_assigned as f32 / num_guides as f32,
        cells_with_guide: assigned_cells.len() as f32 / num_cells as f32,
        guides_with_cell: assigned_guides.len() as f32 / num_guides as f32,
        num_cells,
        num_guides,
        num_assigned,
    })
}

/// Empirical CDF as step points `(x, P[X <= x])`
#[derive(Debug, Clone, PartialEq)]
pub struct Ecdf {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
}

impl Ecdf {
    pub fn new(values: &[f32]) -> Self {
        let mut x: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
        x.sort_by(|a, b| a.total_cmp(b));
        let n = x.len() as f32;
        let y = (1..=x.len()).map(|i| i as f32 / n).collect();
        Self { x, y }
    }

    /// P[X <= t]
    pub fn eval(&self, t: f32) -> f32 {
        let k = self.x.partition_point(|&v| v <= t);
        if k == 0 {
            0.0
        } else {
            self.y[k - 1]
        }
    }
}

/// Equal-width histogram over the range of the values
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub lower: f32,
    pub upper: f32,
    pub counts: Vec<usize>,
}

impl Histogram {
    /// `None` without any finite value
    pub fn new(values: &[f32], nbins: usize) -> Option<Self> {
        let finite: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() || nbins == 0 {
            return None;
        }
        let lower = finite.iter().copied().fold(f32::INFINITY, f32::min);
        let mut upper = finite.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if upper <= lower {
            upper = lower + 1.0;
        }

        let width = (upper - lower) / nbins as f32;
        let mut counts = vec![0; nbins];
        for v in finite {
            let b = (((v - lower) / width) as usize).min(nbins - 1);
            counts[b] += 1;
        }
        Some(Self {
            lower,
            upper,
            counts,
        })
    }

    pub fn bin_width(&self) -> f32 {
        (self.upper - self.lower) / self.counts.len() as f32
    }

    /// `(lower, upper, count)` of each bin
    pub fn bins(&self) -> impl Iterator<Item = (f32, f32, usize)> + '_ {
        let w = self.bin_width();
        self.counts.iter().enumerate().map(move |(b, &n)| {
            let lb = self.lower + w * b as f32;
            (lb, lb + w, n)
        })
    }
}

/// (guide, cell) -> UMI count; repeated pairs add up
pub fn umi_lookup(entries: &[GuideCount]) -> HashMap<(GuideId, CellId), u64> {
    let mut ret: HashMap<(GuideId, CellId), u64> = HashMap::new();
    for e in entries {
        *ret.entry((e.guide, e.cell)).or_insert(0) += e.count;
    }
    ret
}

/// UMI counts of the assigned (guide, cell) pairs
pub fn assigned_umis(
    predictions: &[Prediction],
    umis: &HashMap<(GuideId, CellId), u64>,
    threshold: f32,
) -> Vec<f32> {
    predictions
        .iter()
        .filter(|p| p.probability >= threshold)
        .filter_map(|p| umis.get(&(p.guide, p.cell)))
        .map(|&n| n as f32)
        .collect()
}

/// `(probability, UMI)` or `(probability, log2 UMI)` pairs; pairs
/// without a UMI count (or a zero count on the log scale) are left out
pub fn posterior_umi_points(
    predictions: &[Prediction],
    umis: &HashMap<(GuideId, CellId), u64>,
    log2: bool,
) -> Vec<(f32, f32)> {
    let mut nmissing = 0;
    let points = predictions
        .iter()
        .filter_map(|p| {
            let Some(&n) = umis.get(&(p.guide, p.cell)) else {
                nmissing += 1;
                return None;
            };
            match (log2, n) {
                (true, 0) => None,
                (true, n) => Some((p.probability, (n as f32).log2())),
                (false, n) => Some((p.probability, n as f32)),
            }
        })
        .collect();
    if nmissing > 0 {
        warn!("{} predictions without a UMI count", nmissing);
    }
    points
}

/// Mean and variance of each parameter of a guide over its rows
#[derive(Debug, Clone, PartialEq)]
pub struct GuideParamStats {
    pub guide: GuideId,
    pub nrows: usize,
    pub mean: GuideParams,
    pub variance: GuideParams,
}

/// Average repeated rows (draws, chains or runs) per guide
pub fn per_guide_param_stats(rows: &[SummaryRow]) -> anyhow::Result<Vec<GuideParamStats>> {
    let Some(first) = rows.first() else {
        return Err(LentilError::EmptyInput("no parameter rows").into());
    };
    let variant = first.params.variant();

    let mut by_guide: BTreeMap<GuideId, Vec<Vec<f32>>> = BTreeMap::new();
    for row in rows {
        if row.params.variant() != variant {
            return Err(anyhow::anyhow!("parameter rows of different models"));
        }
        by_guide
            .entry(row.guide)
            .or_default()
            .push(row.params.values());
    }

    by_guide
        .into_iter()
        .map(|(guide, values)| {
            let nparams = variant.stan_parameters().len();
            let columns: Vec<Vec<f32>> = (0..nparams)
                .map(|k| values.iter().map(|v| v[k]).collect())
                .collect();
            let means: Vec<f32> = columns.iter().map(|c| c.mean()).collect();
            let vars: Vec<f32> = columns.iter().map(|c| c.variance()).collect();
            Ok(GuideParamStats {
                guide,
                nrows: values.len(),
                mean: GuideParams::from_values(variant, &means)?,
                variance: GuideParams::from_values(variant, &vars)?,
            })
        })
        .collect()
}

/// Tab-separated lines: header, then per guide the row count, the
/// means and the variances
pub fn param_stats_lines(stats: &[GuideParamStats]) -> Vec<String> {
    let Some(first) = stats.first() else {
        return vec![];
    };
    let labels = first.mean.variant().parameter_labels();

    let mut header = vec!["guide".to_string(), "n".to_string()];
    header.extend(labels.iter().map(|s| s.to_string()));
    header.extend(labels.iter().map(|s| format!("{}_var", s)));

    let mut lines = vec![header.join("\t")];
    for s in stats {
        let mut words = vec![s.guide.to_string(), s.nrows.to_string()];
        words.extend(s.mean.values().iter().map(|x| x.to_string()));
        words.extend(s.variance.values().iter().map(|x| x.to_string()));
        lines.push(words.join("\t"));
    }
    lines
}
