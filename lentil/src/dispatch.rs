use crate::common::*;
use crate::engine::{GuideData, InferenceEngine, SamplerSettings};
use crate::guide_counts::{GuideGroups, NormalizedLibSize};

/// Per-guide seed, independent of which worker runs the guide or when
pub fn derive_seed(base_seed: u64, guide: GuideId) -> u64 {
    ((base_seed as u128 + guide as u128) % MAX_SEED_INT as u128) as u64
}

/// Build one job per guide, `x` and `l` in group member order
pub fn build_guide_data(
    groups: &GuideGroups,
    lib_size: &NormalizedLibSize,
    base_seed: u64,
) -> anyhow::Result<Vec<GuideData>> {
    groups
        .iter()
        .map(|(guide, members)| {
            let x = members.iter().map(|&(_, n)| n).collect();
            let l = members
                .iter()
                .map(|(cell, _)| {
                    lib_size.get(cell).copied().ok_or_else(|| {
                        anyhow::anyhow!("guide {}: no library size for cell {}", guide, cell)
                    })
                })
                .collect::<anyhow::Result<Vec<f64>>>()?;

            Ok(GuideData {
                guide,
                x,
                l,
                seed: derive_seed(base_seed, guide),
            })
        })
        .collect()
}

/// A guide we could not get a result for
#[derive(Debug, Clone, PartialEq)]
pub struct GuideFailure {
    pub guide: GuideId,
    pub message: String,
}

/// Posteriors of the guides that finished, keyed by guide, plus the
/// guides that failed
pub struct DispatchOutcome<P> {
    pub posteriors: BTreeMap<GuideId, P>,
    pub failures: Vec<GuideFailure>,
}

/// Fit every guide's model on a pool of `num_parallel` workers.
///
/// Guides finish in any order. A failing guide is recorded in
/// `failures` and the other guides carry on. If `stop` gets raised,
/// guides not yet started are skipped and the whole run is
/// `Interrupted`.
pub fn dispatch_guides<E: InferenceEngine>(
    engine: &E,
    jobs: &[GuideData],
    settings: &SamplerSettings,
    num_parallel: usize,
    stop: &AtomicBool,
) -> anyhow::Result<DispatchOutcome<E::Posterior>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_parallel.max(1))
        .build()?;

    let njobs = jobs.len() as u64;
    info!(
        "fitting {} guides, {} at a time",
        njobs,
        num_parallel.max(1)
    );

    let results: Vec<(GuideId, anyhow::Result<E::Posterior>)> = pool.install(|| {
        jobs.par_iter()
            .progress_count(njobs)
            .map(|job| {
                if stop.load(Ordering::SeqCst) {
                    return (job.guide, Err(LentilError::Interrupted.into()));
                }
                (job.guide, engine.submit(job, settings))
            })
            .collect()
    });

    if stop.load(Ordering::SeqCst) {
        return Err(LentilError::Interrupted.into());
    }

    let mut posteriors = BTreeMap::new();
    let mut failures = vec![];

    for (guide, result) in results {
        match result {
            Ok(posterior) => {
                posteriors.insert(guide, posterior);
            }
            Err(e) => {
                warn!("guide {}: {:#}", guide, e);
                failures.push(GuideFailure {
                    guide,
                    message: format!("{:#}", e),
                });
            }
        }
    }

    info!(
        "{} guides fitted, {} failed",
        posteriors.len(),
        failures.len()
    );

    Ok(DispatchOutcome {
        posteriors,
        failures,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::guide_counts::{aggregate_counts, normalize_lib_size, GuideCount, LibSizeAverage};
    use mcmc_util::chain::PosteriorDraws;
    use std::sync::Mutex;

    /// Answers with canned draws and remembers what it was asked.
    /// `PZi.k` draws are `x[k] / 10` so the caller can tell the cells apart.
    pub(crate) struct CannedEngine {
        pub fail_guides: Vec<GuideId>,
        pub seen: Mutex<Vec<GuideData>>,
        pub stop_after_first: Option<Arc<AtomicBool>>,
    }

    impl CannedEngine {
        pub(crate) fn new(fail_guides: Vec<GuideId>) -> Self {
            Self {
                fail_guides,
                seen: Mutex::new(vec![]),
                stop_after_first: None,
            }
        }
    }

    impl InferenceEngine for CannedEngine {
        type Posterior = PosteriorDraws;

        fn submit(
            &self,
            data: &GuideData,
            settings: &SamplerSettings,
        ) -> anyhow::Result<PosteriorDraws> {
            self.seen.lock().expect("seen lock").push(data.clone());

            if let Some(stop) = self.stop_after_first.as_ref() {
                stop.store(true, Ordering::SeqCst);
            }

            if self.fail_guides.contains(&data.guide) {
                return Err(LentilError::inference(data.guide, "sampler crashed").into());
            }

            let ndraws = settings.num_samples * settings.chains;
            let g = data.guide as f32;
            let mut columns: Vec<(String, Vec<f32>)> = vec![
                ("r".into(), vec![0.1 * g; ndraws]),
                ("nbMean".into(), vec![10.0 * g; ndraws]),
                ("nbDisp".into(), vec![2.0; ndraws]),
                ("lambda".into(), vec![0.5; ndraws]),
            ];
            for (k, &x) in data.x.iter().enumerate() {
                let p = (x as f32 / 10.0).min(1.0);
                columns.push((format!("PZi.{}", k + 1), vec![p; ndraws]));
            }

            PosteriorDraws::from_columns(
                columns
                    .iter()
                    .map(|(name, v)| (name.as_str(), v.clone()))
                    .collect(),
            )
        }
    }

    pub(crate) fn settings() -> SamplerSettings {
        SamplerSettings {
            num_warmup: 10,
            num_samples: 5,
            chains: 2,
            seed: 100,
        }
    }

    fn jobs() -> (GuideGroups, Vec<GuideData>) {
        let entries: Vec<GuideCount> = [(2, 5, 3), (1, 4, 7), (2, 1, 1), (1, 0, 2), (3, 4, 9)]
            .into_iter()
            .map(|(guide, cell, count)| GuideCount { guide, cell, count })
            .collect();
        let (cumulative, groups) = aggregate_counts(&entries, 0);
        let lib = normalize_lib_size(&cumulative, LibSizeAverage::Mean).unwrap();
        let jobs = build_guide_data(&groups, &lib, 100).unwrap();
        (groups, jobs)
    }

    #[test]
    fn seeds_are_deterministic() {
        assert_eq!(derive_seed(100, 7), derive_seed(100, 7));
        assert_eq!(derive_seed(100, 7), 107);
        assert_ne!(derive_seed(100, 7), derive_seed(100, 8));
        assert_eq!(derive_seed(MAX_SEED_INT - 1, 1), 0);
        assert!(derive_seed(u64::MAX, u64::MAX) < MAX_SEED_INT);
    }

    #[test]
    fn inputs_line_up_with_group_members() {
        let (groups, jobs) = jobs();
        let engine = CannedEngine::new(vec![]);
        let stop = AtomicBool::new(false);
        let outcome = dispatch_guides(&engine, &jobs, &settings(), 3, &stop).unwrap();

        assert_eq!(outcome.posteriors.len(), 3);
        assert!(outcome.failures.is_empty());

        let entries = [(2, 5, 3), (1, 4, 7), (2, 1, 1), (1, 0, 2), (3, 4, 9)];
        let seen = engine.seen.lock().unwrap();
        for data in seen.iter() {
            let members = groups.get(data.guide).unwrap();
            assert_eq!(data.x.len(), members.len());
            assert_eq!(data.l.len(), members.len());
            assert_eq!(data.seed, derive_seed(100, data.guide));
            for (i, &(cell, count)) in members.iter().enumerate() {
                assert_eq!(data.x[i], count);
                // the count that went in is the one recorded for this cell
                assert!(entries.contains(&(data.guide, cell, data.x[i])));
            }
        }
    }

    #[test]
    fn library_sizes_follow_their_cells() {
        let (groups, jobs) = jobs();
        let entries = [(2, 5, 3), (1, 4, 7), (2, 1, 1), (1, 0, 2), (3, 4, 9)];
        // cell totals: 0 -> 2, 1 -> 1, 4 -> 16, 5 -> 3; mean 5.5
        let lib_of = |cell: CellId| -> f64 {
            let tot: u64 = entries
                .iter()
                .filter(|e| e.1 == cell)
                .map(|e| e.2)
                .sum();
            tot as f64 / 5.5
        };
        for job in jobs.iter() {
            for (i, &(cell, _)) in groups.get(job.guide).unwrap().iter().enumerate() {
                approx::assert_abs_diff_eq!(job.l[i], lib_of(cell), epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn failures_name_their_guide() {
        let (_, jobs) = jobs();
        let engine = CannedEngine::new(vec![2]);
        let stop = AtomicBool::new(false);
        let outcome = dispatch_guides(&engine, &jobs, &settings(), 2, &stop).unwrap();

        assert_eq!(outcome.posteriors.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].guide, 2);
        assert!(outcome.failures[0].message.contains("sampler crashed"));
    }

    #[test]
    fn interrupt_aborts_the_run() {
        let (_, jobs) = jobs();
        let stop = Arc::new(AtomicBool::new(false));
        let mut engine = CannedEngine::new(vec![]);
        engine.stop_after_first = Some(stop.clone());

        let err = dispatch_guides(&engine, &jobs, &settings(), 1, &stop).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<LentilError>(),
            Some(LentilError::Interrupted)
        ));
        assert_eq!(engine.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn missing_library_size_is_an_error() {
        let (groups, _) = jobs();
        let lib = NormalizedLibSize::new();
        assert!(build_guide_data(&groups, &lib, 1).is_err());
    }
}
