use crate::common::*;
use crate::guide_counts::*;

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("axis").required(true).args(["cell", "guide"])))]
pub struct LibSizeArgs {
    /// guide x cell matrix market file (`.mtx` or `.mtx.gz`)
    matrix: Box<str>,

    /// UMI sums per cell
    #[arg(long)]
    cell: bool,

    /// UMI sums per guide
    #[arg(long)]
    guide: bool,

    /// divide the cell sums by their average
    #[arg(long, requires = "cell")]
    normalize: bool,

    /// only counts <= this value add to a cell's sum (0: all counts)
    #[arg(long, default_value_t = 0)]
    noise_ceiling: u64,

    /// how to take the average library size with `--normalize`
    #[arg(long, value_enum, default_value = "mean")]
    lib_size_average: LibSizeAverage,

    /// `id<TAB>value` per line
    #[arg(short, long, default_value = "stdout")]
    output: Box<str>,

    #[arg(
        long,
        short,
        help = "verbosity",
        long_help = "Enable verbose output `RUST_LOG=info`"
    )]
    verbose: bool,
}

pub fn run_lib_size(args: &LibSizeArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let entries = read_guide_matrix(&args.matrix)?;
    let lines = lib_size_lines(
        &entries,
        args.guide,
        args.noise_ceiling,
        args.normalize.then_some(args.lib_size_average),
    )?;
    io::write_lines(&lines, &args.output)?;

    info!("Done");
    Ok(())
}

/// `id<TAB>value` lines of the per-guide or per-cell sums; cell sums
/// become library sizes with `normalize`
pub fn lib_size_lines(
    entries: &[GuideCount],
    per_guide: bool,
    noise_ceiling: u64,
    normalize: Option<LibSizeAverage>,
) -> anyhow::Result<Vec<String>> {
    let (cumulative, groups) = aggregate_counts(entries, noise_ceiling);

    if per_guide {
        if normalize.is_some() {
            return Err(LentilError::Configuration(
                "only cell sums can be normalized".into(),
            )
            .into());
        }
        return Ok(groups
            .totals()
            .into_iter()
            .map(|(guide, n)| format!("{}\t{}", guide, n))
            .collect());
    }

    match normalize {
        Some(average) => Ok(normalize_lib_size(&cumulative, average)?
            .into_iter()
            .map(|(cell, l)| format!("{}\t{}", cell, l))
            .collect()),
        None => Ok(cumulative
            .iter()
            .map(|(cell, n)| format!("{}\t{}", cell, n))
            .collect()),
    }
}
