use crate::common::*;
use std::io::Write;

/// posterior assignment indicator, one element per group member
pub const ASSIGNMENT_VARIABLE: &str = "PZi";

/// The two mixture models we can fit per guide
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelVariant {
    /// CROP-seq: ambient noise through a latent Poisson rate
    CropSeq,
    /// direct capture: ambient noise as its own negative binomial
    DirectCapture,
}

impl ModelVariant {
    /// `--cs` and `--dc` are mutually exclusive and one is required
    pub fn resolve(cs: bool, dc: bool) -> Result<Self, LentilError> {
        match (cs, dc) {
            (true, false) => Ok(Self::CropSeq),
            (false, true) => Ok(Self::DirectCapture),
            (true, true) => Err(LentilError::Configuration(
                "choose either --cs or --dc, not both".into(),
            )),
            (false, false) => Err(LentilError::Configuration(
                "a model is required: --cs (CROP-seq) or --dc (direct capture)".into(),
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CropSeq => "cs",
            Self::DirectCapture => "dc",
        }
    }

    /// compiled CmdStan executable we look for by default
    pub fn default_model_file(&self) -> &'static str {
        match self {
            Self::CropSeq => "cs-guide-mixture",
            Self::DirectCapture => "dc-guide-mixture",
        }
    }

    /// posterior variables of the per-guide parameters, in table order
    pub fn stan_parameters(&self) -> &'static [&'static str] {
        match self {
            Self::CropSeq => &["r", "nbMean", "nbDisp", "lambda"],
            Self::DirectCapture => &["r", "nbMean", "nbDisp", "n_nbMean", "n_nbDisp"],
        }
    }

    /// columns of the summary table
    pub fn table_header(&self) -> &'static [&'static str] {
        match self {
            Self::CropSeq => &["guide id", "r", "mu", "Disp", "lambda"],
            Self::DirectCapture => &["guide id", "r", "mu", "Disp", "n_nbMean", "n_nbDisp"],
        }
    }

    /// short parameter names for QC reports
    pub fn parameter_labels(&self) -> &'static [&'static str] {
        match self {
            Self::CropSeq => &["r", "mu", "disp", "lambda"],
            Self::DirectCapture => &["r", "mu", "disp", "n_mu", "n_disp"],
        }
    }

    /// Which model wrote a table with this header
    pub fn from_header<S: AsRef<str>>(header: &[S]) -> anyhow::Result<Self> {
        let header: Vec<&str> = header.iter().map(|s| s.as_ref().trim()).collect();
        [Self::CropSeq, Self::DirectCapture]
            .into_iter()
            .find(|v| v.table_header() == header.as_slice())
            .ok_or_else(|| anyhow::anyhow!("unknown summary table header: {:?}", header))
    }
}

/// Point estimates (or one draw) of a guide's model parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GuideParams {
    CropSeq {
        r: f32,
        mu: f32,
        disp: f32,
        lambda: f32,
    },
    DirectCapture {
        r: f32,
        mu: f32,
        disp: f32,
        n_mu: f32,
        n_disp: f32,
    },
}

impl GuideParams {
    pub fn variant(&self) -> ModelVariant {
        match self {
            Self::CropSeq { .. } => ModelVariant::CropSeq,
            Self::DirectCapture { .. } => ModelVariant::DirectCapture,
        }
    }

    pub fn r(&self) -> f32 {
        match *self {
            Self::CropSeq { r, .. } | Self::DirectCapture { r, .. } => r,
        }
    }

    /// values in the column order of `ModelVariant::stan_parameters`
    pub fn values(&self) -> Vec<f32> {
        match *self {
            Self::CropSeq {
                r,
                mu,
                disp,
                lambda,
            } => vec![r, mu, disp, lambda],
            Self::DirectCapture {
                r,
                mu,
                disp,
                n_mu,
                n_disp,
            } => vec![r, mu, disp, n_mu, n_disp],
        }
    }

    pub fn from_values(variant: ModelVariant, values: &[f32]) -> anyhow::Result<Self> {
        match (variant, values) {
            (ModelVariant::CropSeq, &[r, mu, disp, lambda]) => Ok(Self::CropSeq {
                r,
                mu,
                disp,
                lambda,
            }),
            (ModelVariant::DirectCapture, &[r, mu, disp, n_mu, n_disp]) => {
                Ok(Self::DirectCapture {
                    r,
                    mu,
                    disp,
                    n_mu,
                    n_disp,
                })
            }
            _ => Err(anyhow::anyhow!(
                "{} values for the {} model",
                values.len(),
                variant.name()
            )),
        }
    }
}

/// One row of a summary (or per-draw samples) table
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SummaryRow {
    pub guide: GuideId,
    pub params: GuideParams,
}

/// Write a tab-separated summary table: header, then one line per row
pub fn write_summary_table(
    variant: ModelVariant,
    rows: &[SummaryRow],
    output_file: &str,
) -> anyhow::Result<()> {
    let mut buf = io::open_buf_writer(output_file)?;
    writeln!(buf, "{}", variant.table_header().join("\t"))?;
    for row in rows {
        if row.params.variant() != variant {
            return Err(anyhow::anyhow!(
                "guide {}: {} parameters in a {} table",
                row.guide,
                row.params.variant().name(),
                variant.name()
            ));
        }
        let values: Vec<String> = row.params.values().iter().map(|x| x.to_string()).collect();
        writeln!(buf, "{}\t{}", row.guide, values.join("\t"))?;
    }
    buf.flush()?;
    Ok(())
}

/// Read a summary table back; the header decides the model
pub fn read_summary_table(input_file: &str) -> anyhow::Result<(ModelVariant, Vec<SummaryRow>)> {
    let io::ReadLinesOut { lines, header } = io::read_lines_of_words_delim(input_file, '\t', true)?;
    let variant = ModelVariant::from_header(&header)?;

    let rows = lines
        .iter()
        .enumerate()
        .map(|(i, words)| -> anyhow::Result<SummaryRow> {
            let (guide, values) = words
                .split_first()
                .ok_or_else(|| anyhow::anyhow!("{}: empty row {}", input_file, i + 2))?;
            let guide = guide.parse::<GuideId>()?;
            let values = values
                .iter()
                .map(|w| w.parse::<f32>())
                .collect::<Result<Vec<_>, _>>()?;
            let params = GuideParams::from_values(variant, &values)
                .map_err(|e| anyhow::anyhow!("{}: row {}: {}", input_file, i + 2, e))?;
            Ok(SummaryRow { guide, params })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok((variant, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_util::common_io::create_temp_dir_file;

    #[test]
    fn variant_needs_exactly_one_flag() {
        assert_eq!(ModelVariant::resolve(true, false).unwrap(), ModelVariant::CropSeq);
        assert_eq!(
            ModelVariant::resolve(false, true).unwrap(),
            ModelVariant::DirectCapture
        );
        assert!(matches!(
            ModelVariant::resolve(true, true),
            Err(LentilError::Configuration(_))
        ));
        assert!(matches!(
            ModelVariant::resolve(false, false),
            Err(LentilError::Configuration(_))
        ));
    }

    #[test]
    fn params_follow_their_variant() {
        assert!(GuideParams::from_values(ModelVariant::CropSeq, &[1.0, 2.0, 3.0, 4.0]).is_ok());
        assert!(GuideParams::from_values(ModelVariant::CropSeq, &[1.0, 2.0, 3.0]).is_err());
        let dc = GuideParams::from_values(ModelVariant::DirectCapture, &[1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap();
        assert_eq!(dc.variant(), ModelVariant::DirectCapture);
        assert_eq!(dc.values(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    fn table_round_trip(variant: ModelVariant, rows: Vec<SummaryRow>) -> anyhow::Result<()> {
        let file = create_temp_dir_file("tsv")?;
        let file = file.to_str().unwrap();

        write_summary_table(variant, &rows, file)?;
        let (variant_back, rows_back) = read_summary_table(file)?;

        assert_eq!(variant_back, variant);
        assert_eq!(rows_back.len(), rows.len());
        for (a, b) in rows.iter().zip(rows_back.iter()) {
            assert_eq!(a.guide, b.guide);
            for (x, y) in a.params.values().iter().zip(b.params.values()) {
                approx::assert_abs_diff_eq!(*x, y, epsilon = 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn summary_table_round_trip() -> anyhow::Result<()> {
        table_round_trip(
            ModelVariant::CropSeq,
            vec![
                SummaryRow {
                    guide: 1,
                    params: GuideParams::CropSeq {
                        r: 0.125,
                        mu: 12.5,
                        disp: 1.75,
                        lambda: 0.0625,
                    },
                },
                SummaryRow {
                    guide: 7,
                    params: GuideParams::CropSeq {
                        r: 0.3,
                        mu: 7.1,
                        disp: 2.2,
                        lambda: 0.01,
                    },
                },
            ],
        )?;

        table_round_trip(
            ModelVariant::DirectCapture,
            vec![SummaryRow {
                guide: 3,
                params: GuideParams::DirectCapture {
                    r: 0.2,
                    mu: 30.0,
                    disp: 4.5,
                    n_mu: 0.7,
                    n_disp: 1.1,
                },
            }],
        )
    }

    #[test]
    fn mixed_rows_are_refused() -> anyhow::Result<()> {
        let file = create_temp_dir_file("tsv")?;
        let rows = vec![SummaryRow {
            guide: 1,
            params: GuideParams::DirectCapture {
                r: 0.2,
                mu: 30.0,
                disp: 4.5,
                n_mu: 0.7,
                n_disp: 1.1,
            },
        }];
        assert!(write_summary_table(ModelVariant::CropSeq, &rows, file.to_str().unwrap()).is_err());
        Ok(())
    }
}
