//! Scripted in-memory [`BrowserDriver`] used by the unit tests.
//!
//! Elements are registered per frame path; the fake keeps a real frame stack
//! so tests can assert on the frame context after each interaction.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use {async_trait::async_trait, serde_json::Value};

use crate::{
    driver::{
        BrowserDriver, DriverResult, ElementHandle, InputAction, LogCategory, LogEntry, ScriptArg,
    },
    error::DriverError,
    primitives::{ELEMENT_SIZE_JS, SCROLLABLE_PARENT_JS, VIEWPORT_SIZE_JS},
};

pub(crate) fn perf_entry(method: &str, params: Value) -> LogEntry {
    LogEntry {
        level: "INFO".into(),
        timestamp: 0,
        message: serde_json::json!({ "message": { "method": method, "params": params } })
            .to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Navigate(String),
    Back,
    FindElement(String),
    SwitchToFrame(String),
    SwitchToDefaultFrame,
    SwitchToWindow(String),
    SetWindowSize(u32, u32),
    Script(String, Vec<Value>),
    Click(String),
    Clear(String),
    SendKeys(String, String),
    Perform(Vec<InputAction>),
    Quit,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeElement {
    pub path: Vec<String>,
    pub tag: String,
    pub attributes: HashMap<String, String>,
    pub click_error: Option<DriverError>,
    pub clear_error: Option<DriverError>,
    pub displayed: bool,
    pub enabled: bool,
    pub scrollable_parent: Option<String>,
    pub size: (f64, f64),
}

struct State {
    elements: HashMap<String, FakeElement>,
    frames: Vec<String>,
    default_resets: usize,
    calls: Vec<Call>,
    logs: VecDeque<Vec<LogEntry>>,
    console: Vec<LogEntry>,
    log_polls: usize,
    always_busy: bool,
    script_results: HashMap<String, Value>,
    script_delay: Option<Duration>,
    reset_delay: Option<Duration>,
    perform_error: Option<DriverError>,
    windows: Vec<(String, String)>,
    current_window: usize,
    url: String,
    html: String,
}

pub(crate) struct FakeDriver {
    state: Mutex<State>,
}

fn element_id(frames: &[String], xpath: &str) -> String {
    format!("{}|{}", frames.join(">"), xpath)
}

impl FakeDriver {
    pub fn new() -> Self {
        let mut script_results = HashMap::new();
        script_results.insert(VIEWPORT_SIZE_JS.to_string(), serde_json::json!([1080, 1080]));
        Self {
            state: Mutex::new(State {
                elements: HashMap::new(),
                frames: Vec::new(),
                default_resets: 0,
                calls: Vec::new(),
                logs: VecDeque::new(),
                console: Vec::new(),
                log_polls: 0,
                always_busy: false,
                script_results,
                script_delay: None,
                reset_delay: None,
                perform_error: None,
                windows: vec![("W0".into(), "Start".into())],
                current_window: 0,
                url: "data:,".into(),
                html: "<html><head></head><body></body></html>".into(),
            }),
        }
    }

    /// Register an element reachable at `xpath` inside `frames`; returns its id.
    pub fn add_element(&self, frames: &[&str], xpath: &str, tag: &str) -> String {
        let frames: Vec<String> = frames.iter().map(|f| f.to_string()).collect();
        let id = element_id(&frames, xpath);
        let mut path = frames;
        path.push(xpath.to_string());
        self.state.lock().unwrap().elements.insert(id.clone(), FakeElement {
            path,
            tag: tag.to_string(),
            attributes: HashMap::new(),
            click_error: None,
            clear_error: None,
            displayed: true,
            enabled: true,
            scrollable_parent: None,
            size: (100.0, 40.0),
        });
        id
    }

    pub fn update(&self, id: &str, f: impl FnOnce(&mut FakeElement)) {
        let mut state = self.state.lock().unwrap();
        f(state.elements.get_mut(id).expect("unknown fake element"));
    }

    pub fn on_script(&self, script: &str, result: Value) {
        self.state
            .lock()
            .unwrap()
            .script_results
            .insert(script.to_string(), result);
    }

    pub fn push_log(&self, entries: Vec<LogEntry>) {
        self.state.lock().unwrap().logs.push_back(entries);
    }

    pub fn set_always_busy(&self, busy: bool) {
        self.state.lock().unwrap().always_busy = busy;
    }

    pub fn push_console(&self, entry: LogEntry) {
        self.state.lock().unwrap().console.push(entry);
    }

    pub fn console_len(&self) -> usize {
        self.state.lock().unwrap().console.len()
    }

    pub fn set_script_delay(&self, delay: Duration) {
        self.state.lock().unwrap().script_delay = Some(delay);
    }

    /// Delay the next switch back to the top-level frame.
    pub fn set_reset_delay(&self, delay: Duration) {
        self.state.lock().unwrap().reset_delay = Some(delay);
    }

    pub fn set_perform_error(&self, err: Option<DriverError>) {
        self.state.lock().unwrap().perform_error = err;
    }

    pub fn set_html(&self, html: &str) {
        self.state.lock().unwrap().html = html.to_string();
    }

    pub fn add_window(&self, handle: &str, title: &str) {
        self.state
            .lock()
            .unwrap()
            .windows
            .push((handle.to_string(), title.to_string()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Script(s, _) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn script_args(&self, script: &str) -> Vec<Vec<Value>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Script(s, args) if s == script => Some(args),
                _ => None,
            })
            .collect()
    }

    pub fn performed(&self) -> Vec<Vec<InputAction>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Perform(actions) => Some(actions),
                _ => None,
            })
            .collect()
    }

    pub fn frame_depth(&self) -> usize {
        self.state.lock().unwrap().frames.len()
    }

    pub fn default_frame_resets(&self) -> usize {
        self.state.lock().unwrap().default_resets
    }

    pub fn log_polls(&self) -> usize {
        self.state.lock().unwrap().log_polls
    }

    pub fn current_window(&self) -> String {
        let state = self.state.lock().unwrap();
        state.windows[state.current_window].0.clone()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn element(&self, handle: &ElementHandle) -> DriverResult<FakeElement> {
        self.state
            .lock()
            .unwrap()
            .elements
            .get(handle.id())
            .cloned()
            .ok_or_else(|| DriverError::StaleElement(handle.id().to_string()))
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.record(Call::Navigate(url.to_string()));
        self.state.lock().unwrap().url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn back(&self) -> DriverResult<()> {
        self.record(Call::Back);
        Ok(())
    }

    async fn title(&self) -> DriverResult<String> {
        let state = self.state.lock().unwrap();
        Ok(state.windows[state.current_window].1.clone())
    }

    async fn page_source(&self) -> DriverResult<String> {
        Ok(self.state.lock().unwrap().html.clone())
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn execute_script(&self, script: &str, args: Vec<ScriptArg>) -> DriverResult<Value> {
        let values = args.iter().map(ScriptArg::to_value).collect();
        self.record(Call::Script(script.to_string(), values));

        let delay = self.state.lock().unwrap().script_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let first_element = match args.first() {
            Some(ScriptArg::Element(e)) => Some(self.element(e)?),
            _ => None,
        };
        if script == SCROLLABLE_PARENT_JS {
            let parent = first_element.and_then(|e| e.scrollable_parent);
            return Ok(parent
                .map(|id| ElementHandle::new(id).to_value())
                .unwrap_or(Value::Null));
        }
        if script == ELEMENT_SIZE_JS
            && let Some(element) = first_element
        {
            return Ok(serde_json::json!([element.size.0, element.size.1]));
        }

        Ok(self
            .state
            .lock()
            .unwrap()
            .script_results
            .get(script)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn find_element(&self, xpath: &str) -> DriverResult<ElementHandle> {
        self.record(Call::FindElement(xpath.to_string()));
        let state = self.state.lock().unwrap();
        let id = element_id(&state.frames, xpath);
        if state.elements.contains_key(&id) {
            Ok(ElementHandle::new(id))
        } else {
            Err(DriverError::NoSuchElement(xpath.to_string()))
        }
    }

    async fn switch_to_frame(&self, frame: &ElementHandle) -> DriverResult<()> {
        self.record(Call::SwitchToFrame(frame.id().to_string()));
        let element = self.element(frame)?;
        if element.tag != "iframe" && element.tag != "frame" {
            return Err(DriverError::NoSuchFrame(frame.id().to_string()));
        }
        self.state.lock().unwrap().frames = element.path;
        Ok(())
    }

    async fn switch_to_default_frame(&self) -> DriverResult<()> {
        self.record(Call::SwitchToDefaultFrame);
        let delay = self.state.lock().unwrap().reset_delay.take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.frames.clear();
        state.default_resets += 1;
        Ok(())
    }

    async fn window_handles(&self) -> DriverResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .windows
            .iter()
            .map(|(h, _)| h.clone())
            .collect())
    }

    async fn current_window_handle(&self) -> DriverResult<String> {
        Ok(self.current_window())
    }

    async fn switch_to_window(&self, handle: &str) -> DriverResult<()> {
        self.record(Call::SwitchToWindow(handle.to_string()));
        let mut state = self.state.lock().unwrap();
        let index = state
            .windows
            .iter()
            .position(|(h, _)| h == handle)
            .ok_or_else(|| DriverError::NoSuchWindow(handle.to_string()))?;
        state.current_window = index;
        Ok(())
    }

    async fn set_window_size(&self, width: u32, height: u32) -> DriverResult<()> {
        self.record(Call::SetWindowSize(width, height));
        Ok(())
    }

    async fn get_log(&self, category: LogCategory) -> DriverResult<Vec<LogEntry>> {
        let mut state = self.state.lock().unwrap();
        if category == LogCategory::Browser {
            return Ok(std::mem::take(&mut state.console));
        }
        state.log_polls += 1;
        if state.always_busy {
            let id = format!("busy-{}", state.log_polls);
            return Ok(vec![perf_entry(
                "Network.requestWillBeSent",
                serde_json::json!({ "requestId": id }),
            )]);
        }
        Ok(state.logs.pop_front().unwrap_or_default())
    }

    async fn click(&self, element: &ElementHandle) -> DriverResult<()> {
        self.record(Call::Click(element.id().to_string()));
        match self.element(element)?.click_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn clear(&self, element: &ElementHandle) -> DriverResult<()> {
        self.record(Call::Clear(element.id().to_string()));
        match self.element(element)?.clear_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> DriverResult<()> {
        self.record(Call::SendKeys(element.id().to_string(), text.to_string()));
        Ok(())
    }

    async fn tag_name(&self, element: &ElementHandle) -> DriverResult<String> {
        Ok(self.element(element)?.tag)
    }

    async fn attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> DriverResult<Option<String>> {
        Ok(self.element(element)?.attributes.get(name).cloned())
    }

    async fn is_displayed(&self, element: &ElementHandle) -> DriverResult<bool> {
        Ok(self.element(element)?.displayed)
    }

    async fn is_enabled(&self, element: &ElementHandle) -> DriverResult<bool> {
        Ok(self.element(element)?.enabled)
    }

    async fn perform(&self, actions: &[InputAction]) -> DriverResult<()> {
        self.record(Call::Perform(actions.to_vec()));
        match self.state.lock().unwrap().perform_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn quit(&self) -> DriverResult<()> {
        self.record(Call::Quit);
        Ok(())
    }
}
