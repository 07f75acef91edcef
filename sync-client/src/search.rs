use crate::api::{ApiError, RouteQuery, TransitApi};
use crate::cancellation::{CancellationManager, RequestClass, RequestToken};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use transit_types::Route;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(400);

#[derive(Debug, Clone, PartialEq)]
pub struct SearchEntry {
    pub route: Route,
    pub selected: bool,
}

#[derive(Debug)]
pub struct SearchResponse {
    token: RequestToken,
    append: bool,
    result: Result<Vec<Route>, ApiError>,
}

/// Catalog browsing state: query, page index, selected routes and the pages
/// fetched so far.
///
/// Typing restarts a quiet-period timer; only when it expires is a request
/// made. Every request supersedes the previous one, so a slow answer for an
/// old query is dropped when it arrives.
pub struct SearchSession {
    api: Arc<dyn TransitApi>,
    debounce: Duration,
    limit: usize,
    query: String,
    index: usize,
    selected: Vec<Route>,
    results: Vec<Route>,
    exhausted: bool,
    cancellation: CancellationManager,
    timer: Option<JoinHandle<()>>,
    responses_tx: mpsc::UnboundedSender<SearchResponse>,
    responses_rx: mpsc::UnboundedReceiver<SearchResponse>,
}

impl SearchSession {
    pub fn new(api: Arc<dyn TransitApi>, debounce: Duration, limit: usize) -> Self {
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        SearchSession {
            api,
            debounce,
            limit: limit.max(1),
            query: String::new(),
            index: 1,
            selected: Vec::new(),
            results: Vec::new(),
            exhausted: false,
            cancellation: CancellationManager::new(),
            timer: None,
            responses_tx,
            responses_rx,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_loading(&self) -> bool {
        self.cancellation.in_flight(RequestClass::Search)
    }

    fn request(&self) -> RouteQuery {
        RouteQuery {
            search: Some(self.query.clone()).filter(|q| !q.trim().is_empty()),
            filter: self.selected.iter().map(|r| r.route.clone()).collect(),
            limit: self.limit,
            index: self.index,
        }
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn spawn_fetch(&mut self, delay: Duration, append: bool) {
        self.stop_timer();
        let token = self.cancellation.issue(RequestClass::Search);
        let query = self.request();
        let api = self.api.clone();
        let responses = self.responses_tx.clone();

        self.timer = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = api.get_routes(query).await;
            let _ = responses.send(SearchResponse {
                token,
                append,
                result,
            });
        }));
    }

    /// Records a keystroke. The page index goes back to 1 and the request is
    /// made once the query has been quiet for the debounce period.
    pub fn set_query(&mut self, query: &str) {
        if query == self.query && (self.is_loading() || !self.results.is_empty()) {
            return;
        }
        self.query = query.to_string();
        self.index = 1;
        self.spawn_fetch(self.debounce, false);
    }

    /// New exclusion set. Fetched immediately from page 1.
    pub fn set_selected(&mut self, selected: Vec<Route>) {
        self.selected = selected;
        self.index = 1;
        self.spawn_fetch(Duration::ZERO, false);
    }

    /// Loads the next page unless one is already loading or the catalog ran out.
    pub fn scroll_to_bottom(&mut self) -> bool {
        if self.is_loading() || self.exhausted {
            return false;
        }
        self.index += 1;
        self.spawn_fetch(Duration::ZERO, true);
        true
    }

    pub fn apply_response(&mut self, response: SearchResponse) -> bool {
        let SearchResponse { token, append, result } = response;
        if !self.cancellation.is_current(&token) {
            debug!("Discarding superseded search page");
            return false;
        }
        self.cancellation.settle(&token);
        self.timer = None;

        match result {
            Ok(page) => {
                self.exhausted = page.len() < self.limit;
                if !append {
                    self.results.clear();
                }
                for route in page {
                    if !self.results.iter().any(|r| r.route == route.route) {
                        self.results.push(route);
                    }
                }
            }
            Err(e) => {
                warn!("Route search failed: {e}");
                if append {
                    self.index = self.index.saturating_sub(1).max(1);
                }
            }
        }
        true
    }

    pub async fn process_next(&mut self) -> bool {
        match self.responses_rx.recv().await {
            Some(response) => self.apply_response(response),
            None => false,
        }
    }

    /// Selected routes first, then the fetched pages without any selected id.
    pub fn entries(&self) -> Vec<SearchEntry> {
        let selected = self.selected.iter().map(|route| SearchEntry {
            route: route.clone(),
            selected: true,
        });
        let unselected = self
            .results
            .iter()
            .filter(|route| !self.selected.iter().any(|s| s.route == route.route))
            .map(|route| SearchEntry {
                route: route.clone(),
                selected: false,
            });
        selected.chain(unselected).collect()
    }
}

impl Drop for SearchSession {
    fn drop(&mut self) {
        self.stop_timer();
    }
}
