use crate::common::*;
use matrix_util::mtx_io::{parse_mtx_triplets, MtxParseError};
use std::io::BufRead;

/// One observed (guide, cell, UMI count) entry of the guide matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuideCount {
    pub guide: GuideId,
    pub cell: CellId,
    pub count: u64,
}

/// Read guide x cell triplets in the order they appear.
///
/// Leading `%` lines and the dimension line are skipped. A data line
/// that is not three integers fails the whole read.
pub fn parse_guide_matrix<R: BufRead>(reader: R) -> anyhow::Result<Vec<GuideCount>> {
    let mtx = parse_mtx_triplets(reader).map_err(|e| -> anyhow::Error {
        match e {
            MtxParseError::BadTriplet { line_no, line } => {
                LentilError::Format { line_no, line }.into()
            }
            MtxParseError::MissingShape => LentilError::Format {
                line_no: 0,
                line: Box::from("<no dimension line>"),
            }
            .into(),
            MtxParseError::Io(e) => e.into(),
        }
    })?;

    Ok(mtx
        .triplets
        .into_iter()
        .map(|(guide, cell, count)| GuideCount { guide, cell, count })
        .collect())
}

/// Read a guide matrix file (gzipped or not)
pub fn read_guide_matrix(mtx_file: &str) -> anyhow::Result<Vec<GuideCount>> {
    let entries = parse_guide_matrix(io::open_buf_reader(mtx_file)?)?;
    info!("read {} guide/cell entries from {}", entries.len(), mtx_file);
    Ok(entries)
}

/// Per-cell UMI totals used as the library size of each cell
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CumulativeCounts {
    totals: BTreeMap<CellId, u64>,
}

impl CumulativeCounts {
    /// every cell starts from zero
    fn with_cells<I: IntoIterator<Item = CellId>>(cells: I) -> Self {
        Self {
            totals: cells.into_iter().map(|c| (c, 0)).collect(),
        }
    }

    fn add(&mut self, cell: CellId, count: u64) {
        *self.totals.entry(cell).or_insert(0) += count;
    }

    /// an empty library would make the normalization undefined
    fn floor_zeros(&mut self) {
        for x in self.totals.values_mut() {
            if *x == 0 {
                *x = 1;
            }
        }
    }

    pub fn get(&self, cell: CellId) -> Option<u64> {
        self.totals.get(&cell).copied()
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellId, u64)> + '_ {
        self.totals.iter().map(|(&c, &n)| (c, n))
    }
}

impl FromIterator<(CellId, u64)> for CumulativeCounts {
    fn from_iter<I: IntoIterator<Item = (CellId, u64)>>(iter: I) -> Self {
        Self {
            totals: iter.into_iter().collect(),
        }
    }
}

/// Guide -> its (cell, count) members sorted by cell.
///
/// The member order is the index order of every per-cell vector
/// handed to and returned from inference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuideGroups {
    groups: BTreeMap<GuideId, Vec<(CellId, u64)>>,
}

impl GuideGroups {
    pub fn get(&self, guide: GuideId) -> Option<&[(CellId, u64)]> {
        self.groups.get(&guide).map(|v| v.as_slice())
    }

    pub fn num_guides(&self) -> usize {
        self.groups.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GuideId, &[(CellId, u64)])> + '_ {
        self.groups.iter().map(|(&g, v)| (g, v.as_slice()))
    }

    /// total UMI count per guide
    pub fn totals(&self) -> BTreeMap<GuideId, u64> {
        self.groups
            .iter()
            .map(|(&g, members)| (g, members.iter().map(|&(_, n)| n).sum()))
            .collect()
    }
}

/// Sort the entries by (guide, cell), sum up library sizes per cell and
/// group the entries per guide.
///
/// * `noise_ceiling` - 0 counts everything; otherwise only entries with
///   `count <= noise_ceiling` add to a cell's library size. Larger
///   counts are taken as real guide signal. They still stay in their
///   guide's group.
///
/// Cells ending up with a zero total are floored to 1.
pub fn aggregate_counts(
    entries: &[GuideCount],
    noise_ceiling: u64,
) -> (CumulativeCounts, GuideGroups) {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|e| (e.guide, e.cell));

    let mut cumulative = CumulativeCounts::with_cells(sorted.iter().map(|e| e.cell));
    let mut groups = GuideGroups::default();

    for e in sorted.iter() {
        if noise_ceiling == 0 || e.count <= noise_ceiling {
            cumulative.add(e.cell, e.count);
        }
        groups
            .groups
            .entry(e.guide)
            .or_default()
            .push((e.cell, e.count));
    }

    cumulative.floor_zeros();
    (cumulative, groups)
}

/// How the average library size is taken
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum LibSizeAverage {
    /// sum / n
    #[default]
    Mean,
    /// floor(sum / n) in integers
    Floor,
}

/// Cell -> library size relative to the average cell
pub type NormalizedLibSize = BTreeMap<CellId, f64>;

/// Divide each cell's library size by the average library size.
///
/// With `LibSizeAverage::Mean` the normalized sizes average to one.
/// `LibSizeAverage::Floor` uses the integer floor of the average, e.g.
/// {1, 2, 3, 4} gives an average of 2 instead of 2.5.
pub fn normalize_lib_size(
    counts: &CumulativeCounts,
    average: LibSizeAverage,
) -> anyhow::Result<NormalizedLibSize> {
    if counts.is_empty() {
        return Err(LentilError::EmptyInput("no cells to normalize").into());
    }

    let ncells = counts.len() as u64;
    let total: u64 = counts.iter().map(|(_, n)| n).sum();

    let avg = match average {
        LibSizeAverage::Mean => total as f64 / ncells as f64,
        LibSizeAverage::Floor => (total / ncells) as f64,
    };

    if avg <= 0.0 {
        return Err(LentilError::EmptyInput("average library size is zero").into());
    }

    Ok(counts.iter().map(|(c, n)| (c, n as f64 / avg)).collect())
}
