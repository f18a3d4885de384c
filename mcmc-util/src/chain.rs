use crate::traits::PosteriorSamples;
use std::collections::HashMap;

/// Posterior draws stored column by column, one column per named
/// quantity (`r`, `nbMean`, `PZi.1`, ...). Chains are concatenated in
/// the order they were appended.
#[derive(Debug, Clone, Default)]
pub struct PosteriorDraws {
    names: Vec<Box<str>>,
    position: HashMap<Box<str>, usize>,
    columns: Vec<Vec<f32>>,
}

impl PosteriorDraws {
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        let names: Vec<Box<str>> = names.iter().map(|s| Box::from(s.as_ref())).collect();
        let position = names
            .iter()
            .enumerate()
            .map(|(j, s)| (s.clone(), j))
            .collect();
        let columns = vec![vec![]; names.len()];
        Self {
            names,
            position,
            columns,
        }
    }

    /// Build from named columns of equal length
    pub fn from_columns(columns: Vec<(&str, Vec<f32>)>) -> anyhow::Result<Self> {
        let names: Vec<&str> = columns.iter().map(|(s, _)| *s).collect();
        let mut ret = Self::new(&names);
        let n = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        for (j, (name, draws)) in columns.into_iter().enumerate() {
            if draws.len() != n {
                return Err(anyhow::anyhow!(
                    "column {} has {} draws, expected {}",
                    name,
                    draws.len(),
                    n
                ));
            }
            ret.columns[j] = draws;
        }
        Ok(ret)
    }

    pub fn names(&self) -> &[Box<str>] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&[f32]> {
        self.position.get(name).map(|&j| self.columns[j].as_slice())
    }

    /// Add one draw (a row across all the columns)
    pub fn push_row(&mut self, row: &[f32]) -> anyhow::Result<()> {
        if row.len() != self.names.len() {
            return Err(anyhow::anyhow!(
                "a draw with {} values for {} columns",
                row.len(),
                self.names.len()
            ));
        }
        for (col, &x) in self.columns.iter_mut().zip(row) {
            col.push(x);
        }
        Ok(())
    }

    /// Concatenate the draws of another chain with the same columns
    pub fn append(&mut self, other: PosteriorDraws) -> anyhow::Result<()> {
        if self.names.is_empty() && self.n_draws() == 0 {
            *self = other;
            return Ok(());
        }
        if self.names != other.names {
            return Err(anyhow::anyhow!("chains with different columns"));
        }
        for (col, extra) in self.columns.iter_mut().zip(other.columns) {
            col.extend(extra);
        }
        Ok(())
    }
}

impl PosteriorSamples for PosteriorDraws {
    fn n_draws(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    fn scalar_draws(&self, name: &str) -> anyhow::Result<Vec<f32>> {
        self.column(name)
            .map(|c| c.to_vec())
            .ok_or_else(|| anyhow::anyhow!("no posterior variable `{}`", name))
    }

    fn element_draws(&self, name: &str, index: usize) -> anyhow::Result<Vec<f32>> {
        let key = format!("{}.{}", name, index + 1);
        self.column(&key)
            .map(|c| c.to_vec())
            .ok_or_else(|| anyhow::anyhow!("no posterior variable `{}`", key))
    }

    fn vector_len(&self, name: &str) -> usize {
        let prefix = format!("{}.", name);
        self.names
            .iter()
            .filter(|s| {
                s.strip_prefix(prefix.as_str())
                    .is_some_and(|k| k.parse::<usize>().is_ok())
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_access_and_chain_concat() -> anyhow::Result<()> {
        let mut chain = PosteriorDraws::new(&["r", "PZi.1", "PZi.2"]);
        chain.push_row(&[0.1, 0.9, 0.0])?;
        chain.push_row(&[0.2, 1.0, 0.1])?;

        let mut other = PosteriorDraws::new(&["r", "PZi.1", "PZi.2"]);
        other.push_row(&[0.3, 0.8, 0.2])?;
        chain.append(other)?;

        assert_eq!(chain.n_draws(), 3);
        assert_eq!(chain.scalar_draws("r")?, vec![0.1, 0.2, 0.3]);
        assert_eq!(chain.element_draws("PZi", 1)?, vec![0.0, 0.1, 0.2]);
        assert_eq!(chain.vector_len("PZi"), 2);
        assert_eq!(chain.vector_len("lambda"), 0);
        assert!(chain.scalar_draws("lambda").is_err());
        assert!(chain.push_row(&[1.0]).is_err());
        Ok(())
    }

    #[test]
    fn mismatched_chains_are_rejected() {
        let mut a = PosteriorDraws::new(&["r"]);
        let b = PosteriorDraws::new(&["mu"]);
        a.push_row(&[1.0]).unwrap();
        assert!(a.append(b).is_err());
    }
}
