//! Paginated extraction as a lazy stream of raw records
//!
//! [`Extractor`] fetches one page at a time, buffers its records and only
//! asks for the next page once the consumer has drained the buffer. Order is
//! page order, then in-page order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::ProgressBar;

use feedline_store::RawRecord;

use crate::clock::SharedClock;
use crate::error::ExtractError;
use crate::http::{HttpTransport, ResponseMeta};
use crate::pagination::{Page, PaginationState, parse_page};
use crate::progress::fmt_num;
use crate::rate_limit::RateLimiter;
use crate::source::{EndpointConfig, SourceConfig, truncate_body};

/// Pull-based record stream over one endpoint.
///
/// Yields `Ok(record)` until the source reports no more pages, then `None`.
/// A fatal error is yielded once as `Err`, after which the stream ends.
pub struct Extractor {
    transport: Arc<dyn HttpTransport>,
    source: SourceConfig,
    endpoint: EndpointConfig,
    clock: SharedClock,
    limiter: RateLimiter,
    state: PaginationState,
    buffer: VecDeque<RawRecord>,
    last_meta: Option<ResponseMeta>,
    pages: usize,
    records: usize,
    stalled: usize,
    finished: bool,
    interrupted: bool,
    stop: Option<Arc<AtomicBool>>,
    pb: ProgressBar,
}

impl Extractor {
    /// `initial` is merged into the first request (e.g. a `since` filter).
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        source: &SourceConfig,
        endpoint: &EndpointConfig,
        initial: PaginationState,
        clock: SharedClock,
    ) -> Self {
        Self {
            transport,
            limiter: RateLimiter::new(source.min_interval, clock.clone()),
            source: source.clone(),
            endpoint: endpoint.clone(),
            clock,
            state: initial,
            buffer: VecDeque::new(),
            last_meta: None,
            pages: 0,
            records: 0,
            stalled: 0,
            finished: false,
            interrupted: false,
            stop: None,
            pb: ProgressBar::hidden(),
        }
    }

    /// Stop cleanly between requests once `flag` is raised.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    pub fn with_progress(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    /// Pages successfully fetched so far
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Records handed to the consumer so far
    pub fn records_yielded(&self) -> usize {
        self.records
    }

    /// Parameters the next request will carry.
    pub fn pagination_state(&self) -> &PaginationState {
        &self.state
    }

    /// Pages whose continuation hints did not change the request.
    ///
    /// A source that keeps returning the same cursor with `has_more` set
    /// never terminates on its own; consumers can watch this counter.
    pub fn stalled_pages(&self) -> usize {
        self.stalled
    }

    /// The stream ended because the stop flag was raised.
    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|f| f.load(Ordering::Relaxed))
    }

    /// Fetch the page for the current state, repeating on 429 and 5xx.
    ///
    /// `Ok(None)` means the stop flag was raised while waiting to retry.
    fn fetch_page(&mut self) -> Result<Option<Page>, ExtractError> {
        let request = self.source.request(&self.endpoint, &self.state);
        let label = self.endpoint.label().to_string();
        let mut retries = 0u32;

        loop {
            let response =
                self.transport
                    .get(&request)
                    .map_err(|source| ExtractError::Transport {
                        url: request.url.clone(),
                        source,
                    })?;

            let status = response.status();
            match status {
                200 => {
                    let page = parse_page(&response.body, &self.source.pagination).map_err(
                        |source| ExtractError::Page {
                            url: request.url.clone(),
                            source,
                        },
                    )?;
                    self.last_meta = Some(response.meta);
                    return Ok(Some(page));
                }
                429 | 500..=599 => {
                    if !self.source.retry.allows(retries) {
                        return Err(ExtractError::RetriesExhausted {
                            status,
                            attempts: retries,
                        });
                    }
                    if self.stop_requested() {
                        return Ok(None);
                    }
                    retries += 1;
                    if status == 429 {
                        log::warn!("{label}: rate limited (429), waiting for reset");
                        self.limiter.wait(Some(&response.meta));
                    } else {
                        let delay = self.source.retry.backoff.delay(retries);
                        log::warn!("{label}: server error {status}, retrying in {delay:?}");
                        self.clock.sleep(delay);
                    }
                }
                _ => {
                    return Err(ExtractError::Status {
                        status,
                        body: truncate_body(&response.body),
                    });
                }
            }
        }
    }

    fn advance(&mut self, page: Page) {
        self.pages += 1;
        let count = page.records.len();

        if page.is_last() {
            self.finished = true;
        } else {
            let before = self.state.clone();
            self.state.merge(&page.next);
            if self.state == before {
                self.stalled += 1;
                if self.stalled == 1 {
                    log::warn!(
                        "{}: next page parameters unchanged after page {}, source may never terminate",
                        self.endpoint.label(),
                        self.pages
                    );
                }
            }
        }

        log::debug!(
            "{}: page {} returned {} records (has_more={})",
            self.endpoint.label(),
            self.pages,
            count,
            page.has_more
        );
        self.buffer.extend(page.records);
        self.pb.set_message(format!(
            "page {} · {} records",
            fmt_num(self.pages),
            fmt_num(self.records + self.buffer.len())
        ));
    }
}

impl Iterator for Extractor {
    type Item = Result<RawRecord, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                self.records += 1;
                return Some(Ok(record));
            }
            if self.finished {
                return None;
            }
            if self.stop_requested() {
                log::info!(
                    "{}: stop requested, ending after {} pages",
                    self.endpoint.label(),
                    self.pages
                );
                self.interrupted = true;
                self.finished = true;
                return None;
            }
            if let Some(max) = self.source.max_pages {
                if self.pages >= max {
                    self.finished = true;
                    return Some(Err(ExtractError::PageLimitExceeded(max)));
                }
            }

            self.limiter.wait(self.last_meta.as_ref());
            match self.fetch_page() {
                Ok(Some(page)) => self.advance(page),
                Ok(None) => {
                    log::info!("{}: stop requested during retry", self.endpoint.label());
                    self.interrupted = true;
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::http::{HttpRequest, HttpResponse, TransportError};
    use crate::retry::{Backoff, RetryPolicy};

    /// Replays canned responses in order and records every request.
    pub(crate) struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        requests: Mutex<Vec<HttpRequest>>,
        clock: Option<ManualClock>,
        sent_at: Mutex<Vec<chrono::DateTime<chrono::Utc>>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(responses: Vec<HttpResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(Ok).collect()),
                requests: Mutex::new(Vec::new()),
                clock: None,
                sent_at: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn timed(responses: Vec<HttpResponse>, clock: &ManualClock) -> Self {
            Self {
                clock: Some(clock.clone()),
                ..Self::new(responses)
            }
        }

        pub(crate) fn push_err(&self, err: TransportError) {
            self.responses.lock().unwrap().push_back(Err(err));
        }

        pub(crate) fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub(crate) fn sent_at(&self) -> Vec<chrono::DateTime<chrono::Utc>> {
            self.sent_at.lock().unwrap().clone()
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(clock) = &self.clock {
                self.sent_at.lock().unwrap().push(clock.now());
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Other("script exhausted".into())))
        }
    }

    /// JSON page with `ids` as `{"id": n}` records and an optional cursor.
    pub(crate) fn page(ids: std::ops::Range<u32>, next: Option<&str>) -> HttpResponse {
        let data: Vec<_> = ids.map(|i| serde_json::json!({ "id": i })).collect();
        let body = match next {
            Some(c) => serde_json::json!({ "data": data, "has_more": true, "next_cursor": c }),
            None => serde_json::json!({ "data": data, "has_more": false }),
        };
        HttpResponse::new(200, body.to_string())
    }

    fn source() -> SourceConfig {
        SourceConfig::new("https://api.example.com", "demo")
    }

    fn extractor(
        transport: &Arc<ScriptedTransport>,
        src: &SourceConfig,
        clock: &ManualClock,
    ) -> Extractor {
        Extractor::new(
            transport.clone(),
            src,
            &EndpointConfig::new("items"),
            PaginationState::new(),
            clock.shared(),
        )
    }

    fn ids(records: &[RawRecord]) -> Vec<u64> {
        records.iter().map(|r| r["id"].as_u64().unwrap()).collect()
    }

    #[test]
    fn yields_all_pages_in_order() {
        let clock = ManualClock::at_epoch_2024();
        let t = Arc::new(ScriptedTransport::new(vec![
            page(0..3, Some("c1")),
            page(3..5, Some("c2")),
            page(5..6, None),
        ]));
        let mut ex = extractor(&t, &source(), &clock);
        let records: Vec<_> = ex.by_ref().collect::<Result<_, _>>().unwrap();

        assert_eq!(ids(&records), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(ex.pages_fetched(), 3);
        let reqs = t.requests();
        assert_eq!(reqs.len(), 3);
        assert!(reqs[0].query.is_empty());
        assert_eq!(reqs[1].query, vec![("cursor".into(), "c1".into())]);
        assert_eq!(reqs[2].query, vec![("cursor".into(), "c2".into())]);
    }

    #[test]
    fn lazy_one_page_at_a_time() {
        let clock = ManualClock::at_epoch_2024();
        let t = Arc::new(ScriptedTransport::new(vec![
            page(0..2, Some("c1")),
            page(2..4, None),
        ]));
        let mut ex = extractor(&t, &source(), &clock);
        assert!(ex.next().is_some());
        assert!(ex.next().is_some());
        assert_eq!(t.requests().len(), 1);
        assert!(ex.next().is_some());
        assert_eq!(t.requests().len(), 2);
    }

    #[test]
    fn has_more_without_cursor_stops() {
        let clock = ManualClock::at_epoch_2024();
        let body = r#"{"data":[{"id":1}],"has_more":true}"#;
        let t = Arc::new(ScriptedTransport::new(vec![HttpResponse::new(200, body)]));
        let records: Vec<_> = extractor(&t, &source(), &clock).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(t.requests().len(), 1);
    }

    #[test]
    fn empty_page_ends_stream() {
        let clock = ManualClock::at_epoch_2024();
        let t = Arc::new(ScriptedTransport::new(vec![page(0..0, None)]));
        assert_eq!(extractor(&t, &source(), &clock).count(), 0);
    }

    #[test]
    fn retries_429_after_reset() {
        let clock = ManualClock::at_epoch_2024();
        let reset = (clock.now().timestamp() + 5).to_string();
        let t = Arc::new(ScriptedTransport::timed(
            vec![
                HttpResponse::new(429, "slow down")
                    .with_header("X-RateLimit-Remaining", "0")
                    .with_header("X-RateLimit-Reset", reset),
                page(0..2, None),
            ],
            &clock,
        ));
        let records: Vec<_> = extractor(&t, &source(), &clock)
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(ids(&records), vec![0, 1]);
        let sent = t.sent_at();
        assert_eq!(sent.len(), 2);
        assert!(sent[1] - sent[0] >= chrono::Duration::seconds(5));
    }

    #[test]
    fn retries_5xx_with_backoff() {
        let clock = ManualClock::at_epoch_2024();
        let t = Arc::new(ScriptedTransport::new(vec![
            HttpResponse::new(503, "down"),
            HttpResponse::new(500, "down"),
            page(0..1, None),
        ]));
        let records: Vec<_> = extractor(&t, &source(), &clock).collect();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_ok());
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(5), Duration::from_secs(5)]
        );
    }

    #[test]
    fn bounded_retries_give_up() {
        let clock = ManualClock::at_epoch_2024();
        let t = Arc::new(ScriptedTransport::new(vec![
            HttpResponse::new(502, ""),
            HttpResponse::new(502, ""),
            HttpResponse::new(502, ""),
        ]));
        let mut src = source();
        src.retry = RetryPolicy::bounded(
            2,
            Backoff::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(60),
            },
        );
        let mut ex = extractor(&t, &src, &clock);
        let err = ex.next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            ExtractError::RetriesExhausted {
                status: 502,
                attempts: 2
            }
        ));
        assert!(ex.next().is_none());
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn other_status_is_fatal_with_truncated_body() {
        let clock = ManualClock::at_epoch_2024();
        let t = Arc::new(ScriptedTransport::new(vec![HttpResponse::new(
            404,
            "x".repeat(2000),
        )]));
        let mut ex = extractor(&t, &source(), &clock);
        match ex.next() {
            Some(Err(ExtractError::Status { status, body })) => {
                assert_eq!(status, 404);
                assert!(body.chars().count() <= 501);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(ex.next().is_none());
        assert_eq!(t.requests().len(), 1);
    }

    #[test]
    fn records_before_failure_are_delivered() {
        let clock = ManualClock::at_epoch_2024();
        let t = Arc::new(ScriptedTransport::new(vec![
            page(0..2, Some("c1")),
            HttpResponse::new(401, "unauthorized"),
        ]));
        let items: Vec<_> = extractor(&t, &source(), &clock).collect();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok() && items[1].is_ok());
        assert_eq!(items[2].as_ref().unwrap_err().status(), Some(401));
    }

    #[test]
    fn transport_error_is_fatal() {
        let clock = ManualClock::at_epoch_2024();
        let t = Arc::new(ScriptedTransport::new(vec![]));
        t.push_err(TransportError::Timeout(Duration::from_secs(30)));
        let mut ex = extractor(&t, &source(), &clock);
        assert!(matches!(
            ex.next(),
            Some(Err(ExtractError::Transport { .. }))
        ));
        assert!(ex.next().is_none());
    }

    #[test]
    fn malformed_body_is_fatal() {
        let clock = ManualClock::at_epoch_2024();
        let t = Arc::new(ScriptedTransport::new(vec![HttpResponse::new(200, "<html>")]));
        let mut ex = extractor(&t, &source(), &clock);
        assert!(matches!(ex.next(), Some(Err(ExtractError::Page { .. }))));
    }

    #[test]
    fn min_interval_spaces_requests() {
        let clock = ManualClock::at_epoch_2024();
        let t = Arc::new(ScriptedTransport::timed(
            vec![page(0..1, Some("a")), page(1..2, Some("b")), page(2..3, None)],
            &clock,
        ));
        let mut src = source();
        src.min_interval = Duration::from_millis(250);
        assert_eq!(extractor(&t, &src, &clock).count(), 3);

        let sent = t.sent_at();
        for pair in sent.windows(2) {
            assert!(pair[1] - pair[0] >= chrono::Duration::milliseconds(250));
        }
    }

    #[test]
    fn repeated_cursor_is_detectable() {
        let clock = ManualClock::at_epoch_2024();
        let responses = (0..20).map(|_| page(0..1, Some("same"))).collect();
        let t = Arc::new(ScriptedTransport::new(responses));
        let mut ex = extractor(&t, &source(), &clock);

        let mut seen = 0;
        while let Some(item) = ex.next() {
            item.unwrap();
            seen += 1;
            if ex.stalled_pages() >= 3 {
                break;
            }
        }
        assert_eq!(seen, 4);
        assert_eq!(ex.pagination_state().get("cursor"), Some("same"));
    }

    #[test]
    fn page_cap_surfaces_error() {
        let clock = ManualClock::at_epoch_2024();
        let responses = (0..10u32).map(|i| page(i..i + 1, Some("more"))).collect();
        let t = Arc::new(ScriptedTransport::new(responses));
        let mut src = source();
        src.max_pages = Some(2);
        let items: Vec<_> = extractor(&t, &src, &clock).collect();
        assert_eq!(items.len(), 3);
        assert!(matches!(
            items[2],
            Err(ExtractError::PageLimitExceeded(2))
        ));
        assert_eq!(t.requests().len(), 2);
    }

    #[test]
    fn stop_flag_ends_between_pages() {
        let clock = ManualClock::at_epoch_2024();
        let t = Arc::new(ScriptedTransport::new(vec![
            page(0..2, Some("c1")),
            page(2..4, None),
        ]));
        let flag = Arc::new(AtomicBool::new(false));
        let mut ex = extractor(&t, &source(), &clock).with_stop_flag(flag.clone());
        assert!(ex.next().is_some());
        flag.store(true, Ordering::Relaxed);
        assert!(ex.next().is_some());
        assert!(ex.next().is_none());
        assert!(ex.interrupted());
        assert_eq!(t.requests().len(), 1);
    }

    #[test]
    fn initial_state_seeds_first_request() {
        let clock = ManualClock::at_epoch_2024();
        let t = Arc::new(ScriptedTransport::new(vec![page(0..1, None)]));
        let initial = PaginationState::new().with("since", "2024-01-01T00:00:00Z");
        let ex = Extractor::new(
            t.clone(),
            &source(),
            &EndpointConfig::new("items"),
            initial,
            clock.shared(),
        );
        assert_eq!(ex.count(), 1);
        assert_eq!(
            t.requests()[0].query,
            vec![("since".into(), "2024-01-01T00:00:00Z".into())]
        );
    }
}
