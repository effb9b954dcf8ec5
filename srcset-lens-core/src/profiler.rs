use serde::{Deserialize, Serialize};
use srcset_lens_common::{Result, SrcsetLensError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// inclusive range of integer viewport widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportRange {
    pub min: u32,
    pub max: u32,
}

impl ViewportRange {
    pub fn new(min: u32, max: u32) -> Result<Self> {
        if min == 0 {
            return Err(SrcsetLensError::Validation("minimum viewport width must be > 0".into()));
        }
        if min > max {
            return Err(SrcsetLensError::Validation(format!("empty viewport range {min}..={max}")));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, width: u32) -> bool {
        width >= self.min && width <= self.max
    }

    pub fn len(&self) -> usize {
        (self.max - self.min) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false // constructor rejects min > max
    }

    pub fn iter(&self) -> std::ops::RangeInclusive<u32> {
        self.min..=self.max
    }
}

impl std::fmt::Display for ViewportRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.min, self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

/// Launches page-rendering sessions. One session owns exactly one page.
pub trait RenderEngine {
    type Session: RenderSession;
    fn launch(&self) -> Result<Self::Session>;
}

pub trait RenderSession {
    fn goto(&mut self, url: &str) -> Result<()>;
    fn set_viewport(&mut self, viewport: &Viewport) -> Result<()>;
    /// rendered width in CSS px of the single element matching `selector`
    fn element_width(&mut self, selector: &str) -> Result<f64>;
    fn close(&mut self) -> Result<()>;
    /// Bound every later browser call by `deadline`. `close` stays exempt so the session is
    /// still released after the deadline passes.
    fn set_deadline(&mut self, _deadline: Option<Instant>) {}
}

/// closes the session on drop unless `finish` already did
struct SessionGuard<S: RenderSession> {
    session: S,
    closed: bool,
}

impl<S: RenderSession> SessionGuard<S> {
    fn new(session: S) -> Self {
        Self { session, closed: false }
    }

    fn finish(mut self) -> Result<()> {
        self.closed = true;
        self.session.close()
    }
}

impl<S: RenderSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.session.close() {
                warn!(error = %e, "failed to close render session");
            }
        }
    }
}

/// Rendered element width at every integer viewport width of a contiguous range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderProfile {
    range: ViewportRange,
    widths: Vec<f64>,
}

impl RenderProfile {
    /// `widths[i]` is the measurement at viewport `range.min + i`
    pub fn from_measurements(range: ViewportRange, widths: Vec<f64>) -> Result<Self> {
        if widths.len() != range.len() {
            return Err(SrcsetLensError::Measurement(format!(
                "profile over {range} needs {} measurements, got {}",
                range.len(),
                widths.len()
            )));
        }
        if let Some((i, w)) = widths.iter().enumerate().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(SrcsetLensError::Measurement(format!(
                "invalid rendered width {w} at viewport {}px",
                range.min + i as u32
            )));
        }
        Ok(Self { range, widths })
    }

    pub fn range(&self) -> ViewportRange {
        self.range
    }

    pub fn get(&self, viewport_width: u32) -> Option<f64> {
        if !self.range.contains(viewport_width) {
            return None;
        }
        self.widths.get((viewport_width - self.range.min) as usize).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.range.iter().zip(self.widths.iter().copied())
    }

    /// viewport widths at which the rendered width differs from the previous step
    pub fn breakpoints(&self) -> Vec<(u32, f64)> {
        let mut out = Vec::new();
        let mut prev: Option<f64> = None;
        for (vw, w) in self.iter() {
            if prev.map_or(true, |p| (p - w).abs() > f64::EPSILON) {
                out.push((vw, w));
            }
            prev = Some(w);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct ProfileRequest {
    pub url: String,
    pub selector: String,
    pub range: ViewportRange,
    pub viewport_height: u32,
    pub delay: Duration,
    pub deadline: Option<Instant>,
}

fn at_viewport(width: u32, err: SrcsetLensError) -> SrcsetLensError {
    match err {
        SrcsetLensError::Measurement(msg) => SrcsetLensError::Measurement(format!("viewport {width}px: {msg}")),
        other => SrcsetLensError::Measurement(format!("viewport {width}px: {other}")),
    }
}

/// Measure the selected element at every viewport width in `req.range`.
///
/// Either every width is measured or the call fails; the session is closed on both paths.
pub fn profile<E: RenderEngine>(engine: &E, req: &ProfileRequest) -> Result<RenderProfile> {
    info!(url = %req.url, selector = %req.selector, range = %req.range, "profiling viewport widths");
    let started = Instant::now();
    let mut guard = SessionGuard::new(engine.launch().map_err(|e| match e {
        m @ SrcsetLensError::Measurement(_) => m,
        other => SrcsetLensError::Measurement(format!("browser launch failed: {other}")),
    })?);
    guard.session.set_deadline(req.deadline);
    guard.session.goto(&req.url).map_err(|e| match e {
        m @ SrcsetLensError::Measurement(_) => m,
        other => SrcsetLensError::Measurement(format!("page load failed: {other}")),
    })?;

    let widths = req.range.iter().try_fold(Vec::with_capacity(req.range.len()), |mut acc, vw| {
        if let Some(dl) = req.deadline {
            if Instant::now() >= dl {
                return Err(SrcsetLensError::Measurement(format!(
                    "profiling aborted at viewport {vw}px: deadline exceeded"
                )));
            }
        }
        let viewport = Viewport { width: vw, height: req.viewport_height, device_scale_factor: 1.0 };
        guard.session.set_viewport(&viewport).map_err(|e| at_viewport(vw, e))?;
        if !req.delay.is_zero() {
            std::thread::sleep(req.delay);
        }
        let w = guard.session.element_width(&req.selector).map_err(|e| at_viewport(vw, e))?;
        if !w.is_finite() || w < 0.0 {
            return Err(at_viewport(vw, SrcsetLensError::Measurement(format!("invalid rendered width {w}"))));
        }
        debug!(viewport = vw, rendered = w, "measured");
        acc.push(w);
        Ok(acc)
    })?;

    guard.finish().map_err(|e| SrcsetLensError::Measurement(format!("closing browser session: {e}")))?;
    let profile = RenderProfile::from_measurements(req.range, widths)?;
    info!(
        steps = req.range.len(),
        breakpoints = profile.breakpoints().len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "profiling finished"
    );
    Ok(profile)
}
