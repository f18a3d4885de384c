/// Named access to posterior draws.
///
/// Whatever produced the draws (a CmdStan run, a canned result in
/// tests) only has to hand out the draws of a variable by name.
pub trait PosteriorSamples {
    /// total number of draws (all chains)
    fn n_draws(&self) -> usize;

    /// draws of a scalar variable, e.g. `"r"`
    fn scalar_draws(&self, name: &str) -> anyhow::Result<Vec<f32>>;

    /// draws of the `index`-th (0-based) element of a vector variable,
    /// e.g. `("PZi", 0)`
    fn element_draws(&self, name: &str, index: usize) -> anyhow::Result<Vec<f32>>;

    /// number of elements of a vector variable (0 if absent)
    fn vector_len(&self, name: &str) -> usize;
}

/// Summary statistics over a set of draws
pub trait SummaryOps {
    fn mean(&self) -> f32;

    /// unbiased variance; zero for fewer than two draws
    fn variance(&self) -> f32;

    /// `q`-th quantile (0 <= q <= 1) with linear interpolation
    fn quantile(&self, q: f32) -> f32;

    fn median(&self) -> f32 {
        self.quantile(0.5)
    }
}

impl SummaryOps for [f32] {
    fn mean(&self) -> f32 {
        if self.is_empty() {
            return f32::NAN;
        }
        let tot: f64 = self.iter().map(|&x| x as f64).sum();
        (tot / self.len() as f64) as f32
    }

    fn variance(&self) -> f32 {
        let n = self.len();
        if n < 2 {
            return 0.0;
        }
        let mu = self.mean() as f64;
        let ss: f64 = self
            .iter()
            .map(|&x| {
                let d = x as f64 - mu;
                d * d
            })
            .sum();
        (ss / (n - 1) as f64) as f32
    }

    fn quantile(&self, q: f32) -> f32 {
        let n = self.len();
        if n == 0 {
            return f32::NAN;
        }
        let mut vals = self.to_vec();
        vals.sort_unstable_by(|a, b| a.total_cmp(b));

        let idx = (q * (n - 1) as f32).clamp(0.0, (n - 1) as f32);
        let lo = idx.floor() as usize;
        let hi = idx.ceil() as usize;
        if lo == hi {
            vals[lo]
        } else {
            let frac = idx - lo as f32;
            vals[lo] * (1.0 - frac) + vals[hi] * frac
        }
    }
}
