//! W3C WebDriver backend for the viewport profiler.
//!
//! Talks to a running driver (chromedriver, geckodriver, a Selenium grid) over its HTTP API.
//! Window size is set through `/window/rect`, which sizes the outer window, so the browser
//! chrome offset is measured once per session and added to every requested viewport.

use crate::profiler::{RenderEngine, RenderSession, Viewport};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use srcset_lens_common::{Result, SrcsetLensError, WebDriverConfig};
use std::time::{Duration, Instant};
use tracing::debug;

const MEASURE_SCRIPT: &str = "const els = document.querySelectorAll(arguments[0]);\
 if (els.length !== 1) { return { count: els.length, width: null }; }\
 return { count: 1, width: els[0].getBoundingClientRect().width };";

const INNER_SIZE_SCRIPT: &str = "return [window.innerWidth, window.innerHeight];";

/// upper bound for the session DELETE, which ignores the profiling deadline
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WebDriverEngine {
    endpoint: String,
    browser: String,
    headless: bool,
    request_timeout: Duration,
}

impl WebDriverEngine {
    pub fn new(cfg: &WebDriverConfig) -> Self {
        Self {
            endpoint: cfg.endpoint.trim_end_matches('/').to_owned(),
            browser: cfg.browser.clone(),
            headless: cfg.headless,
            request_timeout: Duration::from_secs(cfg.request_timeout_secs),
        }
    }

    fn capabilities(&self) -> Value {
        let mut always = json!({ "browserName": self.browser });
        match self.browser.as_str() {
            "chrome" | "chromium" => {
                let mut args = vec!["--force-device-scale-factor=1", "--hide-scrollbars"];
                if self.headless {
                    args.push("--headless=new");
                }
                always["goog:chromeOptions"] = json!({ "args": args });
            }
            "firefox" => {
                let args: Vec<&str> = if self.headless { vec!["-headless"] } else { Vec::new() };
                always["moz:firefoxOptions"] = json!({ "args": args, "prefs": { "layout.css.devPixelsPerPx": "1.0" } });
            }
            _ => {}
        }
        json!({ "capabilities": { "alwaysMatch": always } })
    }
}

impl RenderEngine for WebDriverEngine {
    type Session = WebDriverSession;

    fn launch(&self) -> Result<WebDriverSession> {
        let client = Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| SrcsetLensError::Measurement(e.to_string()))?;
        let resp = send(client.post(format!("{}/session", self.endpoint)).json(&self.capabilities()))?;
        let session_id = resp
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SrcsetLensError::Measurement("no sessionId in new session response".into()))?
            .to_owned();
        debug!(session = %session_id, endpoint = %self.endpoint, "webdriver session created");
        Ok(WebDriverSession {
            client,
            base: format!("{}/session/{}", self.endpoint, session_id),
            request_timeout: self.request_timeout,
            deadline: None,
            chrome_offset: None,
            closed: false,
        })
    }
}

pub struct WebDriverSession {
    client: Client,
    base: String,
    request_timeout: Duration,
    deadline: Option<Instant>,
    chrome_offset: Option<(i64, i64)>, // outer minus inner window size
    closed: bool,
}

impl WebDriverSession {
    /// timeout for the next command: the request timeout, cut down to what is left before the deadline
    fn budget(&self) -> Result<Duration> {
        request_budget(self.request_timeout, self.deadline, Instant::now())
    }

    fn command(&self, path: &str, body: Value) -> Result<Value> {
        let timeout = self.budget()?;
        send(self.client.post(format!("{}/{path}", self.base)).timeout(timeout).json(&body))
    }

    fn execute(&self, script: &str, args: Value) -> Result<Value> {
        self.command("execute/sync", json!({ "script": script, "args": args }))
    }

    fn set_window(&self, width: i64, height: i64) -> Result<()> {
        self.command("window/rect", json!({ "width": width, "height": height })).map(|_| ())
    }

    fn inner_size(&self) -> Result<(i64, i64)> {
        let v = self.execute(INNER_SIZE_SCRIPT, json!([]))?;
        let w = v.get(0).and_then(|x| x.as_i64());
        let h = v.get(1).and_then(|x| x.as_i64());
        match (w, h) {
            (Some(w), Some(h)) => Ok((w, h)),
            _ => Err(SrcsetLensError::Measurement(format!("unexpected inner size result: {v}"))),
        }
    }
}

impl RenderSession for WebDriverSession {
    fn goto(&mut self, url: &str) -> Result<()> {
        self.command("url", json!({ "url": url })).map(|_| ())
    }

    fn set_viewport(&mut self, viewport: &Viewport) -> Result<()> {
        if (viewport.device_scale_factor - 1.0).abs() > f64::EPSILON {
            return Err(SrcsetLensError::Measurement(format!(
                "webdriver sessions run at device scale factor 1, got {}",
                viewport.device_scale_factor
            )));
        }
        let (w, h) = (viewport.width as i64, viewport.height as i64);
        let (dx, dy) = match self.chrome_offset {
            Some(offset) => offset,
            None => {
                self.set_window(w, h)?;
                let (iw, ih) = self.inner_size()?;
                let offset = (w - iw, h - ih);
                debug!(dx = offset.0, dy = offset.1, "measured window chrome offset");
                self.chrome_offset = Some(offset);
                offset
            }
        };
        self.set_window(w + dx, h + dy)?;
        let (iw, _) = self.inner_size()?;
        if iw != w {
            return Err(SrcsetLensError::Measurement(format!(
                "browser refused viewport width {w}px (inner width is {iw}px)"
            )));
        }
        Ok(())
    }

    fn element_width(&mut self, selector: &str) -> Result<f64> {
        let v = self.execute(MEASURE_SCRIPT, json!([selector]))?;
        let count = v.get("count").and_then(|c| c.as_u64()).unwrap_or(0);
        match count {
            0 => Err(SrcsetLensError::Measurement(format!("selector {selector:?} matched no element"))),
            1 => v
                .get("width")
                .and_then(|w| w.as_f64())
                .ok_or_else(|| SrcsetLensError::Measurement(format!("no width reported for {selector:?}"))),
            n => Err(SrcsetLensError::Measurement(format!(
                "selector {selector:?} is ambiguous: matched {n} elements"
            ))),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        send(self.client.delete(&self.base).timeout(self.request_timeout.min(CLOSE_TIMEOUT))).map(|_| ())
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }
}

fn request_budget(request_timeout: Duration, deadline: Option<Instant>, now: Instant) -> Result<Duration> {
    let Some(deadline) = deadline else {
        return Ok(request_timeout);
    };
    let left = deadline.saturating_duration_since(now);
    if left.is_zero() {
        return Err(SrcsetLensError::Measurement("deadline exceeded before webdriver request".into()));
    }
    Ok(left.min(request_timeout))
}

/// send a WebDriver command and unwrap its `value`, mapping protocol errors
fn send(req: reqwest::blocking::RequestBuilder) -> Result<Value> {
    let resp = req
        .send()
        .map_err(|e| SrcsetLensError::Measurement(format!("webdriver request failed: {e}")))?;
    let status = resp.status();
    let body: Value = resp
        .json()
        .map_err(|e| SrcsetLensError::Measurement(format!("invalid webdriver response: {e}")))?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);
    if !status.is_success() {
        return Err(SrcsetLensError::Measurement(protocol_error(status.as_u16(), &value)));
    }
    Ok(value)
}

fn protocol_error(status: u16, value: &Value) -> String {
    let kind = value.get("error").and_then(|e| e.as_str()).unwrap_or("unknown error");
    let message = value.get("message").and_then(|m| m.as_str()).unwrap_or("");
    let first_line = message.lines().next().unwrap_or("");
    format!("webdriver HTTP {status}: {kind}: {first_line}")
}
