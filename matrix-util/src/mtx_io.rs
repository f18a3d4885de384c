use crate::common_io::*;
use std::io::{BufRead, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MtxParseError {
    #[error("failed to read the matrix: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing the MatrixMarket dimension line")]
    MissingShape,

    #[error("line {line_no}: expected three whitespace-separated integers, found `{line}`")]
    BadTriplet { line_no: usize, line: Box<str> },
}

/// Integer-valued MatrixMarket coordinate data, kept in file order
#[derive(Debug, Clone, Default)]
pub struct MtxTriplets {
    /// leading `%` lines, verbatim
    pub comments: Vec<Box<str>>,
    /// the dimension line, verbatim
    pub shape: Box<str>,
    /// (row, column, value) as written in the file (no 0/1-base shift)
    pub triplets: Vec<(u64, u64, u64)>,
}

impl MtxTriplets {
    /// `(nrow, ncol, nnz)` if the dimension line has three integers
    pub fn shape_dims(&self) -> Option<(usize, usize, usize)> {
        let dims = self
            .shape
            .split_whitespace()
            .map(|w| w.parse::<usize>().ok())
            .collect::<Option<Vec<_>>>()?;
        match dims.as_slice() {
            &[nrow, ncol, nnz] => Some((nrow, ncol, nnz)),
            _ => None,
        }
    }
}

fn parse_triplet(line: &str) -> Option<(u64, u64, u64)> {
    let mut words = line.split_whitespace();
    let row = words.next()?.parse::<u64>().ok()?;
    let col = words.next()?.parse::<u64>().ok()?;
    let val = words.next()?.parse::<u64>().ok()?;
    if words.next().is_some() {
        return None;
    }
    Some((row, col, val))
}

/// Parse a MatrixMarket stream of integer triplets.
///
/// The leading block of `%` lines is kept as comments, the first
/// non-comment line is the dimension line, and every other non-empty
/// line has to be exactly three integers. The order of the input is
/// preserved; nothing is sorted or merged here.
pub fn parse_mtx_triplets<R: BufRead>(reader: R) -> Result<MtxTriplets, MtxParseError> {
    let mut ret = MtxTriplets::default();
    let mut shape: Option<Box<str>> = None;

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = i + 1;

        if shape.is_none() {
            if line.starts_with('%') {
                ret.comments.push(line.into_boxed_str());
            } else if !line.trim().is_empty() {
                shape = Some(line.trim().to_owned().into_boxed_str());
            }
            continue;
        }

        if line.trim().is_empty() {
            continue;
        }

        match parse_triplet(&line) {
            Some(triplet) => ret.triplets.push(triplet),
            None => {
                return Err(MtxParseError::BadTriplet {
                    line_no,
                    line: line.into_boxed_str(),
                })
            }
        }
    }

    ret.shape = shape.ok_or(MtxParseError::MissingShape)?;
    Ok(ret)
}

/// Read a matrix market file (gzipped or not)
/// * `mtx_file` - path to the matrix market file
pub fn read_mtx_triplets(mtx_file: &str) -> anyhow::Result<MtxTriplets> {
    let buf = open_buf_reader(mtx_file)?;
    parse_mtx_triplets(buf).map_err(|e| anyhow::anyhow!("{}: {}", mtx_file, e))
}

/// Write integer triplets into a MatrixMarket file
/// * `comments` - header lines (a `%%MatrixMarket` banner is added if missing)
/// * `nrow` - number of rows
/// * `ncol` - number of columns
/// * `triplets` - (row, column, value) in the index base of the caller
/// * `mtx_file` - the output file (e.g., "matrix.mtx.gz")
pub fn write_mtx_triplets(
    comments: &[Box<str>],
    nrow: usize,
    ncol: usize,
    triplets: &[(u64, u64, u64)],
    mtx_file: &str,
) -> anyhow::Result<()> {
    mkdir_parent(mtx_file)?;
    let mut buf = open_buf_writer(mtx_file)?;

    if !comments.iter().any(|c| c.starts_with("%%MatrixMarket")) {
        writeln!(buf, "%%MatrixMarket matrix coordinate integer general")?;
    }
    for c in comments {
        writeln!(buf, "{}", c)?;
    }
    writeln!(buf, "{} {} {}", nrow, ncol, triplets.len())?;

    for (row, col, val) in triplets {
        writeln!(buf, "{} {} {}", row, col, val)?;
    }

    buf.flush()?;
    Ok(())
}
