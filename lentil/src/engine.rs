use crate::common::*;
use mcmc_util::chain::PosteriorDraws;
use mcmc_util::stan_csv::read_stan_chains;
use mcmc_util::traits::PosteriorSamples;
use serde::Serialize;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// MCMC settings shared by all the guides of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSettings {
    pub num_warmup: usize,
    pub num_samples: usize,
    pub chains: usize,
    /// base seed; each guide gets its own seed derived from it
    pub seed: u64,
}

/// Everything one guide's model needs.
///
/// `x[i]` and `l[i]` belong to the same cell, the `i`-th member of the
/// guide's group.
#[derive(Debug, Clone, PartialEq)]
pub struct GuideData {
    pub guide: GuideId,
    /// UMI counts
    pub x: Vec<u64>,
    /// normalized library sizes
    pub l: Vec<f64>,
    pub seed: u64,
}

#[derive(Serialize)]
struct StanData<'a> {
    #[serde(rename = "N")]
    n: usize,
    #[serde(rename = "X")]
    x: &'a [u64],
    #[serde(rename = "L")]
    l: &'a [f64],
}

/// Fits one guide's mixture model and hands back its posterior draws.
/// Implementations must not share mutable state across calls.
pub trait InferenceEngine: Sync {
    type Posterior: PosteriorSamples + Send;

    fn submit(
        &self,
        data: &GuideData,
        settings: &SamplerSettings,
    ) -> anyhow::Result<Self::Posterior>;
}

/// Runs a compiled CmdStan model as a child process per guide
pub struct CmdStanEngine {
    model: PathBuf,
    stop: Arc<AtomicBool>,
    timeout: Option<Duration>,
    poll: Duration,
}

impl CmdStanEngine {
    /// * `model` - compiled CmdStan executable
    /// * `stop` - raised on interrupt; running children get killed
    pub fn new(model: &str, stop: Arc<AtomicBool>) -> anyhow::Result<Self> {
        let model = PathBuf::from(model);
        if !model.is_file() {
            return Err(anyhow::anyhow!(
                "compiled model {} not found",
                model.display()
            ));
        }
        Ok(Self {
            model,
            stop,
            timeout: None,
            poll: Duration::from_millis(50),
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, settings: &SamplerSettings, seed: u64, data: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.model);
        cmd.arg("sample")
            .arg(format!("num_samples={}", settings.num_samples))
            .arg(format!("num_warmup={}", settings.num_warmup))
            .arg(format!("num_chains={}", settings.chains.max(1)))
            .arg("data")
            .arg(format!("file={}", data.display()))
            .arg("output")
            .arg(format!("file={}", output.display()))
            .arg("random")
            .arg(format!("seed={}", seed));
        cmd
    }

    /// Wait for the child, killing it on interrupt or timeout
    fn wait(&self, guide: GuideId, child: &mut Child) -> anyhow::Result<ExitStatus> {
        let start = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }

            if self.stop.load(Ordering::SeqCst) {
                child.kill()?;
                child.wait()?;
                return Err(LentilError::Interrupted.into());
            }

            if let Some(timeout) = self.timeout {
                if start.elapsed() > timeout {
                    child.kill()?;
                    child.wait()?;
                    return Err(LentilError::inference(
                        guide,
                        format!("no result after {} seconds", timeout.as_secs()),
                    )
                    .into());
                }
            }

            std::thread::sleep(self.poll);
        }
    }
}

/// `output.csv` for a single chain, `output_1.csv`, `output_2.csv`, ...
/// for several, in chain order
fn chain_files(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut files: Vec<(usize, String)> = vec![];
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(stem) = path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_suffix(".csv"))
        else {
            continue;
        };
        let chain = match stem {
            "output" => 0,
            _ => match stem.strip_prefix("output_").map(|k| k.parse::<usize>()) {
                Some(Ok(k)) => k,
                _ => continue,
            },
        };
        files.push((chain, path.to_string_lossy().into_owned()));
    }
    files.sort();
    Ok(files.into_iter().map(|(_, f)| f).collect())
}

fn tail(text: &str, nlines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(nlines)..].join("\n")
}

impl InferenceEngine for CmdStanEngine {
    type Posterior = PosteriorDraws;

    fn submit(&self, data: &GuideData, settings: &SamplerSettings) -> anyhow::Result<PosteriorDraws> {
        if self.stop.load(Ordering::SeqCst) {
            return Err(LentilError::Interrupted.into());
        }

        let workdir = tempfile::Builder::new()
            .prefix(&format!("lentil-guide-{}-", data.guide))
            .tempdir()?;

        let data_file = workdir.path().join("data.json");
        let stan_data = StanData {
            n: data.x.len(),
            x: &data.x,
            l: &data.l,
        };
        serde_json::to_writer(std::fs::File::create(&data_file)?, &stan_data)?;

        let output_file = workdir.path().join("output.csv");
        let stdout_file = workdir.path().join("stdout.txt");
        let stderr_file = workdir.path().join("stderr.txt");

        let mut child = self
            .command(settings, data.seed, &data_file, &output_file)
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::from(std::fs::File::create(&stdout_file)?))
            .stderr(Stdio::from(std::fs::File::create(&stderr_file)?))
            .spawn()
            .map_err(|e| {
                LentilError::inference(
                    data.guide,
                    format!("failed to start {}: {}", self.model.display(), e),
                )
            })?;

        let status = self.wait(data.guide, &mut child)?;

        if !status.success() {
            let stderr = std::fs::read_to_string(&stderr_file).unwrap_or_default();
            let stdout = std::fs::read_to_string(&stdout_file).unwrap_or_default();
            let message = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(LentilError::inference(
                data.guide,
                format!("{} ({})\n{}", self.model.display(), status, tail(&message, 5)),
            )
            .into());
        }

        let chains = chain_files(workdir.path())?;
        if chains.is_empty() {
            return Err(LentilError::inference(data.guide, "no sampler output").into());
        }

        read_stan_chains(&chains).map_err(|e| LentilError::inference(data.guide, e).into())
    }
}
