use crate::common::*;
use matrix_util::mtx_io::*;

/// feature type of the guide rows in Cell Ranger's `features.tsv`
pub const GUIDE_FEATURE_TYPE: &str = "CRISPR Guide Capture";

#[derive(Args, Debug)]
pub struct FromCellrangerArgs {
    /// Cell Ranger `matrix.mtx(.gz)`
    #[arg(short, long, required = true)]
    matrix: Box<str>,

    /// Cell Ranger `features.tsv(.gz)`: id, name, type (+ optional columns)
    #[arg(short, long, required = true)]
    features: Box<str>,

    /// guide x cell matrix market file (e.g., `guides.mtx.gz`)
    #[arg(short, long, required = true)]
    output: Box<str>,

    #[arg(
        long,
        short,
        help = "verbosity",
        long_help = "Enable verbose output `RUST_LOG=info`"
    )]
    verbose: bool,
}

pub fn run_from_cellranger(args: &FromCellrangerArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let guide_rows = guide_feature_rows(&args.features)?;
    if guide_rows.is_empty() {
        return Err(LentilError::EmptyInput("no `CRISPR Guide Capture` features").into());
    }
    info!("{} guide features in {}", guide_rows.len(), args.features);

    let mtx = read_mtx_triplets(&args.matrix)?;
    let (nrow, ncol, _) = mtx.shape_dims().ok_or_else(|| {
        anyhow::anyhow!("{}: bad dimension line `{}`", args.matrix, mtx.shape)
    })?;

    let triplets = keep_rows(&mtx.triplets, &guide_rows);
    info!(
        "kept {} of {} entries on the guide rows",
        triplets.len(),
        mtx.triplets.len()
    );

    write_mtx_triplets(&mtx.comments, nrow, ncol, &triplets, &args.output)?;

    info!("Done");
    Ok(())
}

/// 1-based line numbers of the guide features
pub fn guide_feature_rows(features_file: &str) -> anyhow::Result<HashSet<u64>> {
    let reader = io::open_buf_reader(features_file)?;
    let mut rows = HashSet::new();
    for (i, line) in std::io::BufRead::lines(reader).enumerate() {
        let line = line?;
        let words: Vec<&str> = line.split('\t').collect();
        if words.len() < 3 {
            return Err(LentilError::Format {
                line_no: i + 1,
                line: line.as_str().into(),
            }
            .into());
        }
        if words[2].trim() == GUIDE_FEATURE_TYPE {
            rows.insert(i as u64 + 1);
        }
    }
    Ok(rows)
}

/// Triplets on the given rows, in their original order
pub fn keep_rows(triplets: &[(u64, u64, u64)], rows: &HashSet<u64>) -> Vec<(u64, u64, u64)> {
    triplets
        .iter()
        .filter(|(r, _, _)| rows.contains(r))
        .copied()
        .collect()
}
