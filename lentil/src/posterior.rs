use crate::common::*;
use crate::dispatch::GuideFailure;
use crate::guide_counts::GuideGroups;
use crate::model::*;
use mcmc_util::traits::{PosteriorSamples, SummaryOps};
use std::io::Write;

/// Assignment probability of a guide in a cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub guide: GuideId,
    pub cell: CellId,
    pub probability: f32,
}

/// What we keep of one guide's posterior
#[derive(Debug, Clone)]
pub struct GuideSummary {
    pub predictions: Vec<Prediction>,
    /// posterior medians
    pub summary: SummaryRow,
    /// one row per draw
    pub draws: Vec<SummaryRow>,
}

/// Summarize one guide.
///
/// The `i`-th element of the assignment variable belongs to the `i`-th
/// member of the guide's group; its median is the probability.
pub fn summarize_guide<P: PosteriorSamples>(
    guide: GuideId,
    members: &[(CellId, u64)],
    posterior: &P,
    variant: ModelVariant,
) -> anyhow::Result<GuideSummary> {
    let nz = posterior.vector_len(ASSIGNMENT_VARIABLE);
    if nz != members.len() {
        return Err(anyhow::anyhow!(
            "{} assignment draws for {} cells",
            nz,
            members.len()
        ));
    }

    let predictions = members
        .iter()
        .enumerate()
        .map(|(i, &(cell, _))| -> anyhow::Result<Prediction> {
            let z = posterior.element_draws(ASSIGNMENT_VARIABLE, i)?;
            Ok(Prediction {
                guide,
                cell,
                probability: z.median(),
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let param_draws = variant
        .stan_parameters()
        .iter()
        .map(|name| posterior.scalar_draws(name))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let medians: Vec<f32> = param_draws.iter().map(|d| d.median()).collect();
    let summary = SummaryRow {
        guide,
        params: GuideParams::from_values(variant, &medians)?,
    };

    let ndraws = param_draws.iter().map(|d| d.len()).min().unwrap_or(0);
    let draws = (0..ndraws)
        .map(|s| -> anyhow::Result<SummaryRow> {
            let values: Vec<f32> = param_draws.iter().map(|d| d[s]).collect();
            Ok(SummaryRow {
                guide,
                params: GuideParams::from_values(variant, &values)?,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(GuideSummary {
        predictions,
        summary,
        draws,
    })
}

/// Predictions and parameter summaries of all the guides, in guide order
#[derive(Debug, Default)]
pub struct AggregatedResults {
    pub predictions: Vec<Prediction>,
    pub summaries: Vec<SummaryRow>,
    pub draws: Vec<SummaryRow>,
    pub failures: Vec<GuideFailure>,
}

/// Collect the summaries of every guide that came back.
///
/// A guide whose posterior does not fit its group is moved to
/// `failures` instead of dropping the rest.
pub fn aggregate_results<P: PosteriorSamples>(
    posteriors: &BTreeMap<GuideId, P>,
    groups: &GuideGroups,
    variant: ModelVariant,
) -> AggregatedResults {
    let mut ret = AggregatedResults::default();

    for (&guide, posterior) in posteriors.iter() {
        let summarized = groups
            .get(guide)
            .ok_or_else(|| anyhow::anyhow!("not in the guide matrix"))
            .and_then(|members| summarize_guide(guide, members, posterior, variant));

        match summarized {
            Ok(g) => {
                log_guide_summary(&g.summary);
                ret.predictions.extend(g.predictions);
                ret.summaries.push(g.summary);
                ret.draws.extend(g.draws);
            }
            Err(e) => {
                warn!("guide {}: {:#}", guide, e);
                ret.failures.push(GuideFailure {
                    guide,
                    message: format!("{:#}", e),
                });
            }
        }
    }
    ret
}

fn log_guide_summary(row: &SummaryRow) {
    match row.params {
        GuideParams::CropSeq { r, mu, lambda, .. } => {
            info!("guide {}: r={}\tmu={}\tlambda={}", row.guide, r, mu, lambda)
        }
        GuideParams::DirectCapture {
            r, mu, disp, n_mu, n_disp,
        } => info!(
            "guide {}: r={}\tmu={}\tdisp={}\tn_mu={}\tn_disp={}",
            row.guide, r, mu, disp, n_mu, n_disp
        ),
    }
}

/// `guide<TAB>cell<TAB>probability` per line
pub fn write_predictions(predictions: &[Prediction], output_file: &str) -> anyhow::Result<()> {
    let mut buf = io::open_buf_writer(output_file)?;
    for p in predictions {
        writeln!(buf, "{}\t{}\t{}", p.guide, p.cell, p.probability)?;
    }
    buf.flush()?;
    Ok(())
}

pub fn read_predictions(input_file: &str) -> anyhow::Result<Vec<Prediction>> {
    let io::ReadLinesOut { lines, .. } = io::read_lines_of_words_delim(input_file, '\t', false)?;
    lines
        .iter()
        .enumerate()
        .map(|(i, words)| -> anyhow::Result<Prediction> {
            match words.as_slice() {
                [guide, cell, prob] => Ok(Prediction {
                    guide: guide.parse()?,
                    cell: cell.parse()?,
                    probability: prob.parse()?,
                }),
                _ => Err(anyhow::anyhow!(
                    "{}: line {} is not `guide cell probability`",
                    input_file,
                    i + 1
                )),
            }
        })
        .collect()
}

/// Write the sorted assignment draws of every (guide, cell) into
/// `{dir}/{guide}_{cell}.txt`, comma separated. A repeated pair goes to
/// `{guide}_{cell}_{k}.txt` for its `k`-th entry. The directory has to
/// exist already.
pub fn dump_assignment_draws<P: PosteriorSamples>(
    posteriors: &BTreeMap<GuideId, P>,
    groups: &GuideGroups,
    dir: &str,
) -> anyhow::Result<usize> {
    let dir_path = Path::new(dir);
    if !dir_path.is_dir() {
        return Err(LentilError::OutputUnavailable(dir.into()).into());
    }

    let mut nfiles = 0;
    for (&guide, posterior) in posteriors.iter() {
        let Some(members) = groups.get(guide) else {
            continue;
        };
        if posterior.vector_len(ASSIGNMENT_VARIABLE) != members.len() {
            continue;
        }
        let mut seen: HashMap<CellId, usize> = HashMap::new();
        for (i, &(cell, _)) in members.iter().enumerate() {
            let mut z = posterior.element_draws(ASSIGNMENT_VARIABLE, i)?;
            z.sort_by(|a, b| a.total_cmp(b));
            let text = z.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(",");

            let k = seen.entry(cell).or_insert(0);
            *k += 1;
            let file = if *k == 1 {
                dir_path.join(format!("{}_{}.txt", guide, cell))
            } else {
                warn!("guide {} appears {} times in cell {}", guide, k, cell);
                dir_path.join(format!("{}_{}_{}.txt", guide, cell, k))
            };
            std::fs::write(&file, text + "\n")?;
            nfiles += 1;
        }
    }
    Ok(nfiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::{settings, CannedEngine};
    use crate::dispatch::*;
    use crate::guide_counts::*;
    use mcmc_util::chain::PosteriorDraws;

    fn run_canned(fail: Vec<GuideId>) -> (GuideGroups, DispatchOutcome<PosteriorDraws>) {
        let entries: Vec<GuideCount> = [(1, 3, 10), (1, 1, 2), (2, 3, 1), (2, 8, 6), (2, 5, 0)]
            .into_iter()
            .map(|(guide, cell, count)| GuideCount { guide, cell, count })
            .collect();
        let (cumulative, groups) = aggregate_counts(&entries, 0);
        let lib = normalize_lib_size(&cumulative, LibSizeAverage::Mean).unwrap();
        let jobs = build_guide_data(&groups, &lib, 7).unwrap();
        let engine = CannedEngine::new(fail);
        let stop = AtomicBool::new(false);
        let outcome = dispatch_guides(&engine, &jobs, &settings(), 2, &stop).unwrap();
        (groups, outcome)
    }

    #[test]
    fn predictions_map_back_to_cells() {
        let (groups, outcome) = run_canned(vec![]);
        let agg = aggregate_results(&outcome.posteriors, &groups, ModelVariant::CropSeq);

        assert!(agg.failures.is_empty());
        // canned probability is count / 10
        let got: Vec<(GuideId, CellId, f32)> = agg
            .predictions
            .iter()
            .map(|p| (p.guide, p.cell, p.probability))
            .collect();
        assert_eq!(
            got,
            vec![
                (1, 1, 0.2),
                (1, 3, 1.0),
                (2, 3, 0.1),
                (2, 5, 0.0),
                (2, 8, 0.6)
            ]
        );

        assert_eq!(agg.summaries.len(), 2);
        assert_eq!(agg.summaries[1].guide, 2);
        approx::assert_abs_diff_eq!(agg.summaries[1].params.r(), 0.2, epsilon = 1e-6);
        // 5 samples x 2 chains per guide
        assert_eq!(agg.draws.len(), 20);
    }

    #[test]
    fn variant_without_its_parameters_fails_per_guide() {
        let (groups, outcome) = run_canned(vec![]);
        // the canned draws have no n_nbMean / n_nbDisp
        let agg = aggregate_results(&outcome.posteriors, &groups, ModelVariant::DirectCapture);
        assert!(agg.predictions.is_empty());
        assert_eq!(agg.failures.len(), 2);
    }

    #[test]
    fn short_assignment_vector_is_caught() -> anyhow::Result<()> {
        let draws = PosteriorDraws::from_columns(vec![
            ("r", vec![0.1]),
            ("nbMean", vec![1.0]),
            ("nbDisp", vec![1.0]),
            ("lambda", vec![1.0]),
            ("PZi.1", vec![1.0]),
        ])?;
        let members = [(0, 4), (1, 5)];
        assert!(summarize_guide(1, &members, &draws, ModelVariant::CropSeq).is_err());
        Ok(())
    }

    #[test]
    fn prediction_file_round_trip() -> anyhow::Result<()> {
        let preds = vec![
            Prediction {
                guide: 1,
                cell: 10,
                probability: 0.975,
            },
            Prediction {
                guide: 2,
                cell: 3,
                probability: 0.0,
            },
        ];
        let file = io::create_temp_dir_file("tsv")?;
        write_predictions(&preds, file.to_str().unwrap())?;
        assert_eq!(read_predictions(file.to_str().unwrap())?, preds);
        Ok(())
    }

    #[test]
    fn draws_dump_needs_an_existing_directory() -> anyhow::Result<()> {
        let (groups, outcome) = run_canned(vec![]);

        let err = dump_assignment_draws(&outcome.posteriors, &groups, "/no/such/post/dir")
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LentilError>(),
            Some(LentilError::OutputUnavailable(_))
        ));

        let dir = tempfile::tempdir()?;
        let n = dump_assignment_draws(&outcome.posteriors, &groups, dir.path().to_str().unwrap())?;
        assert_eq!(n, 5);
        let text = std::fs::read_to_string(dir.path().join("2_8.txt"))?;
        assert_eq!(text.trim().split(',').count(), 10);
        Ok(())
    }

    #[test]
    fn repeated_pairs_get_their_own_draw_files() -> anyhow::Result<()> {
        let entries: Vec<GuideCount> = [(1, 3, 10), (1, 3, 4), (1, 5, 2)]
            .into_iter()
            .map(|(guide, cell, count)| GuideCount { guide, cell, count })
            .collect();
        let (cumulative, groups) = aggregate_counts(&entries, 0);
        let lib = normalize_lib_size(&cumulative, LibSizeAverage::Mean)?;
        let jobs = build_guide_data(&groups, &lib, 7)?;
        let stop = AtomicBool::new(false);
        let outcome = dispatch_guides(&CannedEngine::new(vec![]), &jobs, &settings(), 1, &stop)?;

        let dir = tempfile::tempdir()?;
        let n = dump_assignment_draws(&outcome.posteriors, &groups, dir.path().to_str().unwrap())?;
        assert_eq!(n, 3);

        // canned draws are count / 10
        let first = std::fs::read_to_string(dir.path().join("1_3.txt"))?;
        let second = std::fs::read_to_string(dir.path().join("1_3_2.txt"))?;
        assert!(first.starts_with("1,"));
        assert!(second.starts_with("0.4,"));
        assert!(dir.path().join("1_5.txt").is_file());
        Ok(())
    }
}
