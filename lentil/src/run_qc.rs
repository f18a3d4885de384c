use crate::common::*;
use crate::guide_counts::*;
use crate::model::*;
use crate::plot::*;
use crate::posterior::*;
use crate::qc::*;
use std::path::PathBuf;

const SAMPLE_AVERAGE_BINS: usize = 30;
const UMI_BINS: usize = 50;

#[derive(Args, Debug)]
pub struct QcArgs {
    /// posterior output of `lentil assign` (`guide cell probability`)
    #[arg(short, long, required = true)]
    input: Box<str>,

    /// directory for the QC files; created if missing
    #[arg(short, long, required = true)]
    output_directory: Box<str>,

    /// guide x cell matrix market file the posteriors came from
    #[arg(short, long)]
    guide_counts: Option<Box<str>>,

    /// parameter samples (`--so` of `lentil assign`)
    #[arg(short, long)]
    samples: Option<Box<str>>,

    /// a guide is assigned to a cell when its probability is at least this
    #[arg(short, long, default_value_t = 0.0)]
    threshold: f32,

    #[arg(
        long,
        short,
        help = "verbosity",
        long_help = "Enable verbose output `RUST_LOG=info`"
    )]
    verbose: bool,
}

pub fn run_qc(args: &QcArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let out_dir = Path::new(&*args.output_directory);
    if out_dir.exists() && !out_dir.is_dir() {
        return Err(LentilError::OutputUnavailable(args.output_directory.clone()).into());
    }
    std::fs::create_dir_all(out_dir)?;

    let predictions = read_predictions(&args.input)?;
    info!("{} predictions from {}", predictions.len(), args.input);

    let entries = match args.guide_counts.as_deref() {
        Some(file) => Some(read_guide_matrix(file)?),
        None => None,
    };

    let samples = match args.samples.as_deref() {
        Some(file) => Some(read_summary_table(file)?.1),
        None => None,
    };

    let summary = write_qc_outputs(
        &predictions,
        entries.as_deref(),
        samples.as_deref(),
        args.threshold,
        out_dir,
        &SvgFigures::default(),
    )?;

    println!("MOI: {}", summary.moi);
    println!("Coverage: {}", summary.coverage);

    info!("Done");
    Ok(())
}

/// Write the QC reports and figures of a set of predictions into
/// `out_dir`. UMI figures need the guide counts; the sample average
/// figures need the parameter samples.
pub fn write_qc_outputs<F: FigureBackend>(
    predictions: &[Prediction],
    entries: Option<&[GuideCount]>,
    samples: Option<&[SummaryRow]>,
    threshold: f32,
    out_dir: &Path,
    figures: &F,
) -> anyhow::Result<QcSummary> {
    let summary = summarize_assignments(predictions, threshold)?;
    info!(
        "{} of {} guide/cell pairs assigned over {} cells and {} guides",
        summary.num_assigned,
        predictions.len(),
        summary.num_cells,
        summary.num_guides
    );

    let text_file = |name: &str| out_dir.join(name).to_string_lossy().into_owned();
    let figure_file = |name: &str| -> PathBuf {
        out_dir.join(format!("{}.{}", name, figures.extension()))
    };

    io::write_lines(
        &[
            format!("MOI: {}", summary.moi),
            format!("Cells with a guide: {}", summary.cells_with_guide),
        ],
        &text_file("moi.txt"),
    )?;

    io::write_lines(
        &[
            format!("Coverage: {}", summary.coverage),
            format!("Guides with a cell: {}", summary.guides_with_cell),
        ],
        &text_file("coverage.txt"),
    )?;

    let probs: Vec<f32> = predictions.iter().map(|p| p.probability).collect();
    figures.ecdf(
        &Ecdf::new(&probs),
        Some(threshold),
        &FigureLabels {
            title: "Posterior probability",
            x_label: "probability",
            y_label: "ECDF",
        },
        &figure_file("ecdf"),
    )?;

    if let Some(entries) = entries {
        let umis = umi_lookup(entries);

        match Histogram::new(&assigned_umis(predictions, &umis, threshold), UMI_BINS) {
            Some(hist) => figures.histogram(
                &hist,
                &FigureLabels {
                    title: "UMI counts of the assigned guides",
                    x_label: "UMI",
                    y_label: "count",
                },
                &figure_file("umi_hist"),
            )?,
            None => warn!("no assigned guide has a UMI count"),
        }

        figures.scatter(
            &posterior_umi_points(predictions, &umis, false),
            &FigureLabels {
                title: "Posterior probability vs. UMI",
                x_label: "probability",
                y_label: "UMI",
            },
            &figure_file("umi_count_scatter"),
        )?;

        figures.scatter(
            &posterior_umi_points(predictions, &umis, true),
            &FigureLabels {
                title: "Posterior probability vs. UMI",
                x_label: "probability",
                y_label: "log2 UMI",
            },
            &figure_file("umi_count_scatter_log2"),
        )?;
    }

    if let Some(rows) = samples {
        let stats = per_guide_param_stats(rows)?;
        io::write_lines(&param_stats_lines(&stats), &text_file("sample_avg.txt"))?;

        let mean_r: Vec<f32> = stats.iter().map(|s| s.mean.r()).collect();
        if let Some(hist) = Histogram::new(&mean_r, SAMPLE_AVERAGE_BINS) {
            figures.histogram(
                &hist,
                &FigureLabels {
                    title: "Average r per guide",
                    x_label: "r",
                    y_label: "guides",
                },
                &figure_file("sample_average_hist"),
            )?;
        }
    }

    Ok(summary)
}
