//! Template manifests and the other small CSV files the harness exchanges
//! between runs.
//!
//! A manifest is written by enrollment and read back by the gallery, search,
//! verify and cluster orchestrators. Its first line is a header, followed by
//! `template_id,subject_id,template_path[,filename]` rows.

use std::{
    fmt,
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::{
    error::{HarnessError, Result},
    track::{SubjectId, TemplateId},
};

/// Header written at the top of every manifest.
pub const MANIFEST_HEADER: &str = "TEMPLATE_ID,SUBJECT_ID,TEMPLATE_PATH";

/// Header written at the top of manifests that carry source filenames.
pub const MANIFEST_HEADER_WITH_FILENAME: &str = "TEMPLATE_ID,SUBJECT_ID,TEMPLATE_PATH,FILENAME";

/// One serialized template listed in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Template identifier.
    pub template_id: TemplateId,
    /// Subject identifier; negative when unset.
    pub subject_id: SubjectId,
    /// Where the serialized template lives.
    pub path: PathBuf,
    /// Media file the template came from, present for clustering manifests.
    pub filename: Option<String>,
}

impl ManifestEntry {
    fn parse(source: &Path, line: usize, text: &str) -> Result<Self> {
        let malformed = |reason: String| HarnessError::Manifest {
            path: source.to_path_buf(),
            line,
            reason,
        };
        let mut cells = text.split(',').map(str::trim);
        let (Some(template_id), Some(subject_id), Some(path)) =
            (cells.next(), cells.next(), cells.next())
        else {
            return Err(malformed(format!("expected at least 3 columns in `{text}`")));
        };
        let template_id = template_id
            .parse()
            .map_err(|_| malformed(format!("invalid template id `{template_id}`")))?;
        let subject_id = subject_id
            .parse()
            .map_err(|_| malformed(format!("invalid subject id `{subject_id}`")))?;
        if path.is_empty() {
            return Err(malformed("empty template path".to_owned()));
        }
        let filename = cells
            .next()
            .filter(|name| !name.is_empty())
            .map(ToOwned::to_owned);
        Ok(Self {
            template_id,
            subject_id,
            path: PathBuf::from(path),
            filename,
        })
    }
}

/// Reads every entry of the manifest at `path`, in file order.
///
/// # Errors
/// Returns [`HarnessError::Io`] if the file cannot be opened or read and
/// [`HarnessError::Manifest`] for malformed rows.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    data_lines(path)?
        .into_iter()
        .map(|(line, text)| ManifestEntry::parse(path, line, &text))
        .collect()
}

/// Reads a list of media paths, one per line. A leading `FILENAME` header is
/// skipped.
///
/// # Errors
/// Returns [`HarnessError::Io`] if the file cannot be opened or read.
pub fn read_media_list(path: &Path) -> Result<Vec<String>> {
    let mut lines = all_lines(path)?;
    if lines
        .first()
        .is_some_and(|(_, text)| text.eq_ignore_ascii_case("FILENAME"))
    {
        lines.remove(0);
    }
    Ok(lines.into_iter().map(|(_, text)| text).collect())
}

/// Reads `probe_id,reference_id` pairs after a header line.
///
/// # Errors
/// Returns [`HarnessError::Io`] if the file cannot be opened and
/// [`HarnessError::Manifest`] for malformed rows.
pub fn read_pairs(path: &Path) -> Result<Vec<(TemplateId, TemplateId)>> {
    data_lines(path)?
        .into_iter()
        .map(|(line, text)| {
            let mut ids = text.split(',').map(str::trim).map(str::parse::<TemplateId>);
            match (ids.next(), ids.next()) {
                (Some(Ok(probe)), Some(Ok(reference))) => Ok((probe, reference)),
                _ => Err(HarnessError::Manifest {
                    path: path.to_path_buf(),
                    line,
                    reason: format!("expected `probe_id,reference_id` in `{text}`"),
                }),
            }
        })
        .collect()
}

fn data_lines(path: &Path) -> Result<Vec<(usize, String)>> {
    let mut lines = all_lines(path)?;
    if !lines.is_empty() {
        lines.remove(0);
    }
    Ok(lines)
}

/// Non-blank, trimmed lines with their 1-based line numbers.
fn all_lines(path: &Path) -> Result<Vec<(usize, String)>> {
    let file = File::open(path).map_err(HarnessError::io(path))?;
    let mut lines = Vec::new();
    for (index, text) in BufReader::new(file).lines().enumerate() {
        let text = text.map_err(HarnessError::io(path))?;
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push((index + 1, trimmed.to_owned()));
        }
    }
    Ok(lines)
}

/// Buffered CSV output file that reports failures against its path.
pub(crate) struct CsvWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl CsvWriter {
    /// Creates `path` and writes `header` as its first line.
    pub(crate) fn create(path: &Path, header: &str) -> Result<Self> {
        let file = File::create(path).map_err(HarnessError::io(path))?;
        let mut writer = Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        };
        writer.row(format_args!("{header}"))?;
        Ok(writer)
    }

    pub(crate) fn row(&mut self, args: fmt::Arguments<'_>) -> Result<()> {
        self.writer
            .write_fmt(args)
            .and_then(|()| self.writer.write_all(b"\n"))
            .map_err(HarnessError::write(&self.path))
    }

    pub(crate) fn finish(mut self) -> Result<()> {
        self.writer.flush().map_err(HarnessError::write(&self.path))
    }
}
