use crate::chain::PosteriorDraws;
use matrix_util::common_io::open_buf_reader;
use std::io::BufRead;

/// Parse one CmdStan output CSV into draws.
///
/// Lines starting with `#` (configuration, adaptation and timing
/// blocks) are skipped; the first remaining line names the columns
/// (`lp__,accept_stat__,...,r,PZi.1,...`).
pub fn parse_stan_csv<R: BufRead>(reader: R) -> anyhow::Result<PosteriorDraws> {
    let mut draws: Option<PosteriorDraws> = None;
    let mut row: Vec<f32> = vec![];

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match draws.as_mut() {
            None => {
                let names: Vec<&str> = line.split(',').map(str::trim).collect();
                draws = Some(PosteriorDraws::new(&names));
            }
            Some(draws) => {
                row.clear();
                for w in line.split(',') {
                    let x = w.trim().parse::<f32>().map_err(|_| {
                        anyhow::anyhow!("stan csv line {}: bad value `{}`", i + 1, w)
                    })?;
                    row.push(x);
                }
                draws
                    .push_row(&row)
                    .map_err(|e| anyhow::anyhow!("stan csv line {}: {}", i + 1, e))?;
            }
        }
    }

    draws.ok_or_else(|| anyhow::anyhow!("stan csv without a header line"))
}

/// Read a CmdStan output CSV file
pub fn read_stan_csv(csv_file: &str) -> anyhow::Result<PosteriorDraws> {
    parse_stan_csv(open_buf_reader(csv_file)?)
        .map_err(|e| anyhow::anyhow!("{}: {}", csv_file, e))
}

/// Read several chain files and concatenate their draws in order
pub fn read_stan_chains(csv_files: &[String]) -> anyhow::Result<PosteriorDraws> {
    let mut ret = PosteriorDraws::default();
    for f in csv_files {
        ret.append(read_stan_csv(f)?)?;
    }
    Ok(ret)
}
