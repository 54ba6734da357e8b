/// What a backend aggregates while it runs, handed back when it stops
pub trait Aggregator {
    fn record_request(&mut self, request: &[u8]);
    fn record_response(&mut self);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimpleAggregator {
    pub requests_received: usize,
    pub responses_sent: usize,
    /// every request received, as read from the wire
    pub requests: Vec<String>,
}

impl Aggregator for SimpleAggregator {
    fn record_request(&mut self, request: &[u8]) {
        self.requests_received += 1;
        self.requests
            .push(String::from_utf8_lossy(request).into_owned());
    }

    fn record_response(&mut self) {
        self.responses_sent += 1;
    }
}
