use crate::demand::DemandBucket;
use crate::profiler::{RenderProfile, ViewportRange};
use crate::widths::{WidthCoverage, WidthSelection};
use srcset_lens_common::{Result, SrcsetLensError};
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const VARIATIONS_HEADER: &str = "viewportWidth;renderedImageWidth";

// --- variations file ---

pub fn format_variations(profile: &RenderProfile) -> String {
    let mut out = String::with_capacity(profile.range().len() * 10 + VARIATIONS_HEADER.len());
    out.push_str(VARIATIONS_HEADER);
    out.push('\n');
    for (vw, w) in profile.iter() {
        let _ = writeln!(out, "{vw};{w}");
    }
    out
}

/// Parse a variations table back into a profile; rows must cover a contiguous range.
pub fn parse_variations(text: &str) -> Result<RenderProfile> {
    let mut rows: Vec<(u32, f64)> = Vec::new();
    let mut first = true;
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((vw, w)) = line.split_once(';') else {
            return Err(SrcsetLensError::Validation(format!("line {}: expected viewportWidth;renderedImageWidth", i + 1)));
        };
        let vw = vw.trim();
        // a header has no numeric field; anything else on the first line is data
        let is_header = first && vw.parse::<f64>().is_err() && w.trim().parse::<f64>().is_err();
        first = false;
        if is_header {
            continue;
        }
        let vw: u32 = vw
            .parse()
            .map_err(|_| SrcsetLensError::Validation(format!("line {}: bad viewport width {vw:?}", i + 1)))?;
        let w: f64 = w
            .trim()
            .parse()
            .map_err(|_| SrcsetLensError::Validation(format!("line {}: bad rendered width {:?}", i + 1, w.trim())))?;
        if let Some(&(prev, _)) = rows.last() {
            if prev.checked_add(1) != Some(vw) {
                return Err(SrcsetLensError::Validation(format!(
                    "line {}: viewport {vw} does not follow {prev}; variations must be contiguous",
                    i + 1
                )));
            }
        }
        rows.push((vw, w));
    }
    let (Some(&(min, _)), Some(&(max, _))) = (rows.first(), rows.last()) else {
        return Err(SrcsetLensError::Validation("variations file has no rows".into()));
    };
    let range = ViewportRange::new(min, max)?;
    RenderProfile::from_measurements(range, rows.into_iter().map(|(_, w)| w).collect())
        .map_err(|e| SrcsetLensError::Validation(e.to_string()))
}

pub fn read_variations(path: &Path) -> Result<RenderProfile> {
    parse_variations(&std::fs::read_to_string(path)?)
}

// --- recommendation record ---

pub fn format_recommendation(url: &str, selector: &str, selection: &WidthSelection) -> String {
    let widths: Vec<String> = selection.widths().iter().map(|w| w.to_string()).collect();
    format!("url: {url}\nselector: {selector}\nwidths: {}\n", widths.join(","))
}

// --- atomic output ---

/// Write every `(path, contents)` pair, or none of them if any temp write fails.
pub fn write_outputs(files: &[(PathBuf, String)]) -> Result<()> {
    let mut staged = Vec::with_capacity(files.len());
    for (path, contents) in files {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.flush()?;
        staged.push((tmp, path));
    }
    for (tmp, path) in staged {
        tmp.persist(path).map_err(|e| SrcsetLensError::Io(e.error))?;
    }
    Ok(())
}

// --- console tables ---

pub fn format_demand_table(buckets: &[DemandBucket], max_rows: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:>12} {:>10}", "ideal width", "share");
    let mut ranked: Vec<&DemandBucket> = buckets.iter().collect();
    ranked.sort_by(|a, b| b.weight.total_cmp(&a.weight).then(a.ideal_width.cmp(&b.ideal_width)));
    for b in ranked.iter().take(max_rows) {
        let _ = writeln!(out, "{:>10}px {:>9.2}%", b.ideal_width, b.weight * 100.0);
    }
    if buckets.len() > max_rows {
        let rest: f64 = ranked[max_rows..].iter().map(|b| b.weight).sum();
        let _ = writeln!(out, "{:>12} {:>9.2}%", format!("+{} more", buckets.len() - max_rows), rest * 100.0);
    }
    out
}

pub fn format_selection_table(selection: &WidthSelection, coverage: &[WidthCoverage]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:>8} {:>14} {:>9} {:>10}", "width", "serves from", "share", "waste");
    for c in coverage {
        let _ = writeln!(
            out,
            "{:>6}px {:>12}px {:>8.2}% {:>10.2}",
            c.width,
            c.smallest_ideal,
            c.share * 100.0,
            c.waste
        );
    }
    let _ = writeln!(out, "{:<16} {:.2} px/view", "Total waste:", selection.waste());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widths::{coverage_report, select_widths};

    fn profile() -> RenderProfile {
        let range = ViewportRange::new(320, 323).unwrap();
        RenderProfile::from_measurements(range, vec![300.0, 300.0, 301.5, 302.0]).unwrap()
    }

    #[test]
    fn variations_text_shape() {
        let text = format_variations(&profile());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], VARIATIONS_HEADER);
        assert_eq!(lines[1], "320;300");
        assert_eq!(lines[3], "322;301.5");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn variations_parse_back() {
        assert_eq!(parse_variations(&format_variations(&profile())).unwrap(), profile());
    }

    #[test]
    fn variations_gap_rejected() {
        let err = parse_variations("320;300\n322;300\n").unwrap_err();
        assert!(err.to_string().contains("contiguous"), "{err}");
        assert!(parse_variations(VARIATIONS_HEADER).is_err());
    }

    #[test]
    fn malformed_first_variation_is_rejected() {
        let err = parse_variations("320px;300\n321;300\n").unwrap_err();
        assert!(err.to_string().contains("line 1"), "{err}");
        assert!(parse_variations("320;300px\n321;300\n").is_err());
    }

    #[test]
    fn variations_past_u32_max_rejected() {
        let err = parse_variations("4294967295;1\n0;1\n").unwrap_err();
        assert!(err.to_string().contains("contiguous"), "{err}");
    }

    #[test]
    fn recommendation_lists_widths() {
        let buckets = vec![
            DemandBucket { ideal_width: 640, weight: 0.5 },
            DemandBucket { ideal_width: 1280, weight: 0.5 },
        ];
        let sel = select_widths(&buckets, 2).unwrap();
        let text = format_recommendation("https://example.com/", "img.hero", &sel);
        assert_eq!(text, "url: https://example.com/\nselector: img.hero\nwidths: 640,1280\n");
        let table = format_selection_table(&sel, &coverage_report(&buckets, &sel));
        assert!(table.contains("1280px"));
    }

    #[test]
    fn demand_table_folds_tail() {
        let buckets: Vec<DemandBucket> = (1..=5).map(|i| DemandBucket { ideal_width: i * 100, weight: 0.2 }).collect();
        let table = format_demand_table(&buckets, 3);
        assert!(table.contains("+2 more"));
        assert!(table.contains("40.00%"));
    }

    #[test]
    fn outputs_written_together() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("out/a.txt");
        let b = dir.path().join("out/b.txt");
        write_outputs(&[(a.clone(), "one".into()), (b.clone(), "two".into())]).unwrap();
        assert_eq!(std::fs::read_to_string(a).unwrap(), "one");
        assert_eq!(std::fs::read_to_string(b).unwrap(), "two");
    }
}
