use serde::{Deserialize, Serialize};
use srcset_lens_common::{Result, SrcsetLensError};
use std::path::Path;

/// one observed visitor context: how many views came from a viewport width at a pixel density
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextSample {
    pub viewport_width: u32,
    pub density: f64,
    pub views: u64,
}

/// validated, non-empty set of context samples with a positive view total
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDataset {
    samples: Vec<ContextSample>,
    min_viewport: u32,
    max_viewport: u32,
    total_views: u64,
}

impl ContextDataset {
    /// Validate raw `(viewport_width, density, views)` triples.
    ///
    /// Row numbers in errors are 1-based positions in `rows`.
    pub fn load<I, A, B, C>(rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (A, B, C)>,
        A: AsRef<str>,
        B: AsRef<str>,
        C: AsRef<str>,
    {
        let mut samples = Vec::new();
        for (i, (vw, density, views)) in rows.into_iter().enumerate() {
            samples.push(parse_sample(i + 1, vw.as_ref(), density.as_ref(), views.as_ref())?);
        }
        Self::from_samples(samples)
    }

    pub fn from_samples(samples: Vec<ContextSample>) -> Result<Self> {
        if samples.is_empty() {
            return Err(SrcsetLensError::Validation("context dataset is empty".into()));
        }
        for (i, s) in samples.iter().enumerate() {
            if s.viewport_width == 0 {
                return Err(SrcsetLensError::Validation(format!("row {}: viewport width must be > 0", i + 1)));
            }
            if !(s.density.is_finite() && s.density > 0.0) {
                return Err(SrcsetLensError::Validation(format!("row {}: density must be a positive number, got {}", i + 1, s.density)));
            }
        }
        let total_views = samples
            .iter()
            .try_fold(0u64, |acc, s| acc.checked_add(s.views))
            .ok_or_else(|| SrcsetLensError::Validation("view total overflows u64".into()))?;
        if total_views == 0 {
            return Err(SrcsetLensError::Validation("context dataset has no views".into()));
        }
        let min_viewport = samples.iter().map(|s| s.viewport_width).min().unwrap_or(0);
        let max_viewport = samples.iter().map(|s| s.viewport_width).max().unwrap_or(0);
        Ok(Self { samples, min_viewport, max_viewport, total_views })
    }

    pub fn min_viewport(&self) -> u32 {
        self.min_viewport
    }

    pub fn max_viewport(&self) -> u32 {
        self.max_viewport
    }

    pub fn total_views(&self) -> u64 {
        self.total_views
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[ContextSample] {
        &self.samples
    }

    /// samples whose viewport lies in `[lo, hi]`, inclusive
    pub fn in_range(&self, lo: u32, hi: u32) -> impl Iterator<Item = &ContextSample> + '_ {
        self.samples
            .iter()
            .filter(move |s| s.viewport_width >= lo && s.viewport_width <= hi)
    }
}

fn parse_sample(row: usize, vw: &str, density: &str, views: &str) -> Result<ContextSample> {
    let viewport_width: u32 = vw.trim().parse().map_err(|_| {
        SrcsetLensError::Validation(format!("row {row}: viewport width is not a non-negative integer: {vw:?}"))
    })?;
    let density: f64 = density.trim().parse().map_err(|_| {
        SrcsetLensError::Validation(format!("row {row}: density is not a number: {density:?}"))
    })?;
    let views: u64 = views.trim().parse().map_err(|_| {
        SrcsetLensError::Validation(format!("row {row}: views is not a non-negative integer: {views:?}"))
    })?;
    Ok(ContextSample { viewport_width, density, views })
}

/// picks the first of `,` `;` `\t` present in the line, defaulting to `,`
fn detect_delimiter(line: &str) -> char {
    [',', ';', '\t']
        .into_iter()
        .find(|d| line.contains(*d))
        .unwrap_or(',')
}

/// Parse a delimited context table.
///
/// Blank lines and `#` comments are skipped. The first data line is treated as a header only
/// when none of its fields is numeric; a partly numeric first line is data and must parse.
pub fn parse_context_text(text: &str) -> Result<ContextDataset> {
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
        .collect();
    let Some(&(_, first)) = lines.first() else {
        return Err(SrcsetLensError::Validation("context dataset is empty".into()));
    };
    let delim = detect_delimiter(first);
    let is_header = !first
        .split(delim)
        .any(|f| f.trim().trim_matches('"').parse::<f64>().is_ok());
    let body = if is_header { &lines[1..] } else { &lines[..] };

    let mut samples = Vec::with_capacity(body.len());
    for &(line_no, line) in body {
        let fields: Vec<&str> = line.split(delim).map(|f| f.trim().trim_matches('"')).collect();
        if fields.len() != 3 {
            return Err(SrcsetLensError::Validation(format!(
                "line {line_no}: expected 3 fields (viewportWidth{delim}density{delim}views), got {}",
                fields.len()
            )));
        }
        samples.push(parse_sample(line_no, fields[0], fields[1], fields[2])?);
    }
    ContextDataset::from_samples(samples)
}

pub fn load_context_file(path: &Path) -> Result<ContextDataset> {
    let text = std::fs::read_to_string(path)?;
    parse_context_text(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_triples() {
        let ds = ContextDataset::load([("375", "3", "120"), ("1280", "1", "40"), ("768", "2.0", "0")]).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.min_viewport(), 375);
        assert_eq!(ds.max_viewport(), 1280);
        assert_eq!(ds.total_views(), 160);
    }

    #[test]
    fn empty_rows_rejected() {
        let rows: Vec<(&str, &str, &str)> = Vec::new();
        assert!(matches!(ContextDataset::load(rows), Err(SrcsetLensError::Validation(_))));
    }

    #[test]
    fn bad_fields_rejected() {
        for row in [("-1", "1", "1"), ("320.5", "1", "1"), ("320", "0", "1"), ("320", "nan", "1"), ("320", "2", "-4"), ("0", "1", "1")] {
            let err = ContextDataset::load([row]).unwrap_err();
            assert!(matches!(err, SrcsetLensError::Validation(_)), "{row:?}");
        }
    }

    #[test]
    fn zero_total_views_rejected() {
        let err = ContextDataset::load([("320", "2", "0")]).unwrap_err();
        assert!(err.to_string().contains("no views"));
    }

    #[test]
    fn range_filter_is_inclusive() {
        let ds = ContextDataset::load([("320", "1", "1"), ("400", "1", "1"), ("401", "1", "1")]).unwrap();
        let picked: Vec<u32> = ds.in_range(320, 400).map(|s| s.viewport_width).collect();
        assert_eq!(picked, vec![320, 400]);
    }

    #[test]
    fn text_with_header_and_semicolons() {
        let ds = parse_context_text("viewport;density;views\n# mobile\n375;3;10\n\n1440;1;5\n").unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.samples()[0].density, 3.0);
    }

    #[test]
    fn text_without_header() {
        let ds = parse_context_text("360,2.625,7\n412,2.625,3").unwrap();
        assert_eq!(ds.total_views(), 10);
    }

    #[test]
    fn text_error_names_line() {
        let err = parse_context_text("vw,d,v\n360,2,7\n412,2\n").unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
    }

    #[test]
    fn malformed_first_row_is_not_a_header() {
        let err = parse_context_text("360px,2,10\n412,2,3\n").unwrap_err();
        assert!(matches!(err, SrcsetLensError::Validation(_)));
        assert!(err.to_string().contains("row 1") && err.to_string().contains("360px"), "{err}");
    }

    #[test]
    fn header_only_is_empty() {
        assert!(matches!(parse_context_text("vw,d,v\n"), Err(SrcsetLensError::Validation(_))));
    }
}
