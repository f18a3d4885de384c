use flate2::read::GzDecoder;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
///
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let file = File::open(input_file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", input_file, e))?;

    match Path::new(input_file).extension().and_then(|x| x.to_str()) {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not; `stdout` and
///   `stderr` are taken literally
///
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }

    if output_file.eq_ignore_ascii_case("stderr") {
        return Ok(Box::new(BufWriter::new(std::io::stderr())));
    }

    let file = File::create(output_file)
        .map_err(|e| anyhow::anyhow!("failed to create {}: {}", output_file, e))?;

    match Path::new(output_file).extension().and_then(|x| x.to_str()) {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

///
/// Write every line into the output_file
///
/// * `lines` - anything we can display line by line
/// * `output_file` - file name--either gzipped or not
///
pub fn write_lines<T>(lines: &[T], output_file: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        if let Err(e) = writeln!(buf, "{}", line) {
            // downstream `head` and friends
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            }
            return Err(e.into());
        }
    }
    buf.flush()?;
    Ok(())
}

/// Lines split into words, with an optional header
pub struct ReadLinesOut {
    pub lines: Vec<Vec<Box<str>>>,
    pub header: Vec<Box<str>>,
}

///
/// Read a delimited text file into words, skipping empty lines.
///
/// * `input_file` - file name--either gzipped or not
/// * `delim` - field delimiter
/// * `has_header` - take the first non-empty line as a header
///
pub fn read_lines_of_words_delim(
    input_file: &str,
    delim: char,
    has_header: bool,
) -> anyhow::Result<ReadLinesOut> {
    let buf = open_buf_reader(input_file)?;

    let mut raw: Vec<String> = vec![];
    for line in buf.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            raw.push(line);
        }
    }

    fn split_words(line: &str, delim: char) -> Vec<Box<str>> {
        line.trim_end_matches(['\r', '\n'])
            .split(delim)
            .map(|w| w.trim().to_owned().into_boxed_str())
            .collect()
    }

    let (header, body) = match (has_header, raw.split_first()) {
        (true, Some((hdr, rest))) => (split_words(hdr, delim), rest),
        (true, None) => return Err(anyhow::anyhow!("{}: missing header line", input_file)),
        (false, _) => (vec![], raw.as_slice()),
    };

    // indexed collect keeps the input order
    let lines = body
        .par_iter()
        .map(|s| split_words(s, delim))
        .collect::<Vec<_>>();

    Ok(ReadLinesOut { lines, header })
}

///
/// Create the parent directory of a file if needed
/// * `file` - file name
///
pub fn mkdir_parent(file: &str) -> anyhow::Result<()> {
    if let Some(dir) = Path::new(file).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

///
/// Suggest a fresh temporary file name with a given suffix
/// * `suffix` - suffix of the file name (e.g., "mtx.gz")
///
pub fn create_temp_dir_file(suffix: &str) -> anyhow::Result<std::path::PathBuf> {
    let temp_file = tempfile::Builder::new()
        .suffix(&format!(".{}", suffix.trim_start_matches('.')))
        .tempfile()?
        .into_temp_path()
        .keep()?;
    Ok(temp_file)
}
