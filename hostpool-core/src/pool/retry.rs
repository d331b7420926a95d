/// How a request was lost.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FailureKind {
    /// The connection broke (or never came up) before the response began.
    Connection,
    /// The response head arrived but its body did not.
    ResponseStream,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RetryDecision {
    Retry,
    GiveUp,
}

/// Stateless retry policy consulted whenever a slot loses requests.
#[derive(Debug, Copy, Clone)]
pub struct RetryCoordinator {
    max_retries: u32,
}

impl RetryCoordinator {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// `attempts_made` counts failed attempts, including the one being decided.
    pub fn decide(&self, failure: FailureKind, attempts_made: u32) -> RetryDecision {
        match failure {
            FailureKind::ResponseStream => RetryDecision::GiveUp,
            FailureKind::Connection => {
                if attempts_made < self.max_retries.saturating_add(1) {
                    RetryDecision::Retry
                } else {
                    RetryDecision::GiveUp
                }
            }
        }
    }
}
