use async_trait::async_trait;
use http::{HeaderValue, StatusCode};
use ninefetch::{AbortSignal, Fetch, FetchError, Request, Response};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One scripted transport outcome.
#[derive(Debug, Clone)]
pub enum Step {
    Respond(Response),
    Fail(FetchError),
    /// Never answers; only the abort signal can end the attempt.
    Hang,
}

/// Fetch capability that plays back a script, repeating the final step once exhausted, and
/// records every request and signal it was handed.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFetch {
    script: Arc<Mutex<VecDeque<Step>>>,
    requests: Arc<Mutex<Vec<Request>>>,
    signals: Arc<Mutex<Vec<AbortSignal>>>,
}

impl ScriptedFetch {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self { script: Arc::new(Mutex::new(steps.into_iter().collect())), ..Self::default() }
    }

    pub fn statuses(codes: &[u16]) -> Self {
        Self::new(codes.iter().map(|code| Step::Respond(status(*code))))
    }

    pub fn hanging() -> Self {
        Self::new([Step::Hang])
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn signals(&self) -> Vec<AbortSignal> {
        self.signals.lock().unwrap().clone()
    }

    fn next_step(&self) -> Option<Step> {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }
}

#[async_trait]
impl Fetch for ScriptedFetch {
    async fn fetch(&self, request: Request, signal: AbortSignal) -> Result<Response, FetchError> {
        self.requests.lock().unwrap().push(request);
        self.signals.lock().unwrap().push(signal);
        match self.next_step() {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Hang) => std::future::pending().await,
            None => Ok(status(200)),
        }
    }
}

pub fn status(code: u16) -> Response {
    Response::new(StatusCode::from_u16(code).unwrap())
}

pub fn with_retry_after(response: Response, value: &'static str) -> Response {
    response.with_header(http::header::RETRY_AFTER, HeaderValue::from_static(value))
}
