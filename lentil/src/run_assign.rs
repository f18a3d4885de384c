use crate::common::*;
use crate::dispatch::*;
use crate::engine::*;
use crate::guide_counts::*;
use crate::model::*;
use crate::posterior::*;
use rand::Rng;
use std::io::Write;
use std::time::Duration;

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("model").required(true).args(["cs", "dc"])))]
pub struct AssignArgs {
    /// guide x cell matrix market file (`.mtx` or `.mtx.gz`)
    #[arg(short, long, required = true)]
    input: Box<str>,

    /// CROP-seq model: ambient noise through a latent Poisson rate
    #[arg(long)]
    cs: bool,

    /// direct capture model: ambient noise as a negative binomial
    #[arg(long)]
    dc: bool,

    /// compiled CmdStan model (default: `cs-guide-mixture` or `dc-guide-mixture`)
    #[arg(long)]
    stan_model: Option<Box<str>>,

    /// per guide/cell posterior probabilities
    #[arg(short = 'o', long, default_value = "stdout")]
    posteriors_output: Box<str>,

    /// per guide posterior medians of the model parameters
    #[arg(long)]
    summary_output: Option<Box<str>>,

    /// every posterior draw of the model parameters
    #[arg(long = "so", visible_alias = "samples-output")]
    samples_output: Option<Box<str>>,

    /// guides whose model failed, with the reason
    #[arg(long)]
    failures_output: Option<Box<str>>,

    /// existing directory for the sorted assignment draws of each guide/cell
    #[arg(long, default_value = "post")]
    posterior_dir: Box<str>,

    /// posterior draws per chain
    #[arg(short = 'n', long, default_value_t = DEFAULT_SAMPLES)]
    num_samples: usize,

    /// warmup iterations per chain
    #[arg(short = 'w', long, default_value_t = DEFAULT_WARMUP)]
    num_warmup: usize,

    /// number of chains
    #[arg(short = 'c', long, default_value_t = DEFAULT_CHAINS)]
    chains: usize,

    /// random seed (default: drawn at random and reported)
    #[arg(short = 's', long)]
    seed: Option<u64>,

    /// number of guide models to run in parallel (default: all CPUs)
    #[arg(short = 'p', long)]
    parallel_runs: Option<usize>,

    #[arg(
        long,
        default_value_t = DEFAULT_NOISE_CEILING,
        help = "Largest count treated as ambient noise",
        long_help = "Largest count treated as ambient noise.\n\
		     Only counts <= this value add to a cell's library size;\n\
		     0 counts everything."
    )]
    noise_ceiling: u64,

    /// how to take the average library size
    #[arg(long, value_enum, default_value = "mean")]
    lib_size_average: LibSizeAverage,

    /// give up on a guide's model after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(
        long,
        short,
        help = "verbosity",
        long_help = "Enable verbose output `RUST_LOG=info`"
    )]
    verbose: bool,
}

/// Everything the core needs besides the data
#[derive(Debug, Clone, Copy)]
pub struct AssignConfig {
    pub variant: ModelVariant,
    pub settings: SamplerSettings,
    pub noise_ceiling: u64,
    pub lib_size_average: LibSizeAverage,
    pub num_parallel: usize,
}

/// Where the results go
#[derive(Debug, Clone, Copy)]
pub struct AssignOutputs<'a> {
    pub posteriors: &'a str,
    pub summary: Option<&'a str>,
    pub samples: Option<&'a str>,
    pub failures: Option<&'a str>,
    pub posterior_dir: Option<&'a str>,
}

/// The seed goes out whatever the log level so that a run can be redone
pub fn report_seed<W: Write>(seed: u64, out: &mut W) -> anyhow::Result<()> {
    writeln!(out, "Random seed: {}", seed)?;
    Ok(())
}

fn check_interrupt(stop: &AtomicBool) -> anyhow::Result<()> {
    if stop.load(Ordering::SeqCst) {
        return Err(LentilError::Interrupted.into());
    }
    Ok(())
}

pub fn run_assign(args: &AssignArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let variant = ModelVariant::resolve(args.cs, args.dc)?;

    let seed = args
        .seed
        .unwrap_or_else(|| rand::rng().random_range(0..MAX_SEED_INT));
    report_seed(seed, &mut std::io::stderr())?;

    let config = AssignConfig {
        variant,
        settings: SamplerSettings {
            num_warmup: args.num_warmup,
            num_samples: args.num_samples,
            chains: args.chains,
            seed,
        },
        noise_ceiling: args.noise_ceiling,
        lib_size_average: args.lib_size_average,
        num_parallel: args.parallel_runs.unwrap_or_else(num_cpus::get),
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            if stop.swap(true, Ordering::SeqCst) {
                std::process::exit(130);
            }
            warn!("Interrupt received, stopping the running models...");
        })?;
    }

    let model = args
        .stan_model
        .clone()
        .unwrap_or_else(|| variant.default_model_file().into());

    let engine = CmdStanEngine::new(&model, Arc::clone(&stop))?
        .with_timeout(args.timeout_secs.map(Duration::from_secs));

    let entries = read_guide_matrix(&args.input)?;

    let outputs = AssignOutputs {
        posteriors: &args.posteriors_output,
        summary: args.summary_output.as_deref(),
        samples: args.samples_output.as_deref(),
        failures: args.failures_output.as_deref(),
        posterior_dir: Some(&args.posterior_dir),
    };

    let failures = assign_guides(&engine, &entries, &config, &stop, &outputs)?;

    if !failures.is_empty() {
        let guides: Vec<String> = failures.iter().map(|f| f.guide.to_string()).collect();
        return Err(anyhow::anyhow!(
            "{} guide(s) failed: {}",
            failures.len(),
            guides.join(", ")
        ));
    }

    info!("Done");
    Ok(())
}

/// The whole assignment pipeline on a set of guide counts.
///
/// Outputs of the guides that worked are written out in any case; the
/// guides that did not are returned. An interrupt before or after
/// the model runs ends the run with `Interrupted`.
pub fn assign_guides<E: InferenceEngine>(
    engine: &E,
    entries: &[GuideCount],
    config: &AssignConfig,
    stop: &AtomicBool,
    outputs: &AssignOutputs,
) -> anyhow::Result<Vec<GuideFailure>> {
    check_interrupt(stop)?;

    let (cumulative, groups) = aggregate_counts(entries, config.noise_ceiling);
    info!(
        "{} guides over {} cells",
        groups.num_guides(),
        cumulative.len()
    );

    let lib_size = normalize_lib_size(&cumulative, config.lib_size_average)?;
    let jobs = build_guide_data(&groups, &lib_size, config.settings.seed)?;

    let outcome = dispatch_guides(engine, &jobs, &config.settings, config.num_parallel, stop)?;

    let AggregatedResults {
        predictions,
        summaries,
        draws,
        failures: summary_failures,
    } = aggregate_results(&outcome.posteriors, &groups, config.variant);

    write_predictions(&predictions, outputs.posteriors)?;

    if let Some(file) = outputs.summary {
        write_summary_table(config.variant, &summaries, file)?;
    }

    if let Some(file) = outputs.samples {
        write_summary_table(config.variant, &draws, file)?;
    }

    if let Some(dir) = outputs.posterior_dir {
        match dump_assignment_draws(&outcome.posteriors, &groups, dir) {
            Ok(nfiles) => info!("wrote {} posterior draw files in {}", nfiles, dir),
            Err(e) => match e.downcast_ref::<LentilError>() {
                Some(LentilError::OutputUnavailable(_)) => {
                    warn!("{}; skipping the posterior draw files", e)
                }
                _ => return Err(e),
            },
        }
    }

    let mut failures = outcome.failures;
    failures.extend(summary_failures);
    failures.sort_by_key(|f| f.guide);

    if let Some(file) = outputs.failures {
        let lines: Vec<String> = std::iter::once("guide\treason".to_string())
            .chain(
                failures
                    .iter()
                    .map(|f| format!("{}\t{}", f.guide, f.message.replace('\n', " | "))),
            )
            .collect();
        io::write_lines(&lines, file)?;
    }

    check_interrupt(stop)?;
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::{settings, CannedEngine};

    fn entries() -> Vec<GuideCount> {
        [(1, 0, 1), (1, 1, 2), (2, 0, 2), (3, 1, 3), (3, 2, 9)]
            .into_iter()
            .map(|(guide, cell, count)| GuideCount { guide, cell, count })
            .collect()
    }

    fn config() -> AssignConfig {
        AssignConfig {
            variant: ModelVariant::CropSeq,
            settings: settings(),
            noise_ceiling: 0,
            lib_size_average: LibSizeAverage::Mean,
            num_parallel: 2,
        }
    }

    #[test]
    fn pipeline_writes_every_output() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = |f: &str| dir.path().join(f).to_string_lossy().into_owned();
        let (post, summary, samples, failed) =
            (path("post.tsv"), path("summary.tsv"), path("samples.tsv"), path("failed.tsv"));
        let post_dir = path("post");
        std::fs::create_dir(&post_dir)?;

        let outputs = AssignOutputs {
            posteriors: &post,
            summary: Some(&summary),
            samples: Some(&samples),
            failures: Some(&failed),
            posterior_dir: Some(&post_dir),
        };

        let engine = CannedEngine::new(vec![]);
        let stop = AtomicBool::new(false);
        let failures = assign_guides(&engine, &entries(), &config(), &stop, &outputs)?;
        assert!(failures.is_empty());

        let preds = read_predictions(&post)?;
        assert_eq!(preds.len(), 5);
        assert_eq!((preds[4].guide, preds[4].cell), (3, 2));
        approx::assert_abs_diff_eq!(preds[4].probability, 0.9, epsilon = 1e-6);

        let (variant, rows) = read_summary_table(&summary)?;
        assert_eq!(variant, ModelVariant::CropSeq);
        assert_eq!(rows.iter().map(|r| r.guide).collect::<Vec<_>>(), vec![1, 2, 3]);

        let (_, draws) = read_summary_table(&samples)?;
        assert_eq!(draws.len(), 3 * 10);

        assert!(Path::new(&post_dir).join("3_2.txt").is_file());
        Ok(())
    }

    #[test]
    fn failed_guides_do_not_take_others_down() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let post = dir.path().join("post.tsv").to_string_lossy().into_owned();
        let failed = dir.path().join("failed.tsv").to_string_lossy().into_owned();

        let outputs = AssignOutputs {
            posteriors: &post,
            summary: None,
            samples: None,
            failures: Some(&failed),
            // missing directory only warns
            posterior_dir: Some("/no/such/post/dir"),
        };

        let engine = CannedEngine::new(vec![3]);
        let stop = AtomicBool::new(false);
        let failures = assign_guides(&engine, &entries(), &config(), &stop, &outputs)?;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].guide, 3);

        let preds = read_predictions(&post)?;
        assert_eq!(preds.len(), 3);
        assert!(preds.iter().all(|p| p.guide != 3));

        let failed_text = std::fs::read_to_string(&failed)?;
        assert!(failed_text.lines().nth(1).unwrap().starts_with("3\t"));
        Ok(())
    }

    #[test]
    fn seed_is_reported() -> anyhow::Result<()> {
        let mut out = vec![];
        report_seed(4_294_967_294, &mut out)?;
        assert_eq!(String::from_utf8(out)?, "Random seed: 4294967294\n");
        Ok(())
    }

    #[test]
    fn interrupt_before_the_models_writes_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let post = dir.path().join("post.tsv").to_string_lossy().into_owned();
        let outputs = AssignOutputs {
            posteriors: &post,
            summary: None,
            samples: None,
            failures: None,
            posterior_dir: None,
        };

        let engine = CannedEngine::new(vec![]);
        let stop = AtomicBool::new(true);
        let err = assign_guides(&engine, &entries(), &config(), &stop, &outputs).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<LentilError>(),
            Some(LentilError::Interrupted)
        ));
        assert!(engine.seen.lock().unwrap().is_empty());
        assert!(!Path::new(&post).exists());
        Ok(())
    }

    #[test]
    fn empty_matrix_is_refused() {
        let outputs = AssignOutputs {
            posteriors: "stdout",
            summary: None,
            samples: None,
            failures: None,
            posterior_dir: None,
        };
        let engine = CannedEngine::new(vec![]);
        let stop = AtomicBool::new(false);
        let err = assign_guides(&engine, &[], &config(), &stop, &outputs).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LentilError>(),
            Some(LentilError::EmptyInput(_))
        ));
    }
}
