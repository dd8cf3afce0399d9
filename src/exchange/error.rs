//! Gateway error taxonomy.

use thiserror::Error;

/// Errors raised by an [`ExchangeGateway`](super::ExchangeGateway) call.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),

    #[error("exchange unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("rejected by exchange (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<GatewayError>,
    },
}

impl GatewayError {
    /// Network unreachable, exchange temporarily down, or request timeout.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Network(_) | GatewayError::Unavailable(_) | GatewayError::Timeout(_)
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GatewayError::RateLimited(_))
    }

    /// Transport-level failure, including retry exhaustion over one.
    pub fn is_network(&self) -> bool {
        self.is_transient() || matches!(self, GatewayError::RetriesExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::Network("reset".into()).is_transient());
        assert!(GatewayError::Unavailable("maintenance".into()).is_transient());
        assert!(GatewayError::Timeout("30s".into()).is_transient());

        assert!(!GatewayError::RateLimited("10028".into()).is_transient());
        assert!(!GatewayError::OrderNotFound("42".into()).is_transient());
        assert!(!GatewayError::InsufficientFunds("btc".into()).is_transient());
    }

    #[test]
    fn test_exhausted_is_network_but_not_transient() {
        let err = GatewayError::RetriesExhausted {
            operation: "fetch_ticker".into(),
            attempts: 3,
            last: Box::new(GatewayError::Timeout("slow".into())),
        };
        assert!(!err.is_transient());
        assert!(err.is_network());
        assert_eq!(
            err.to_string(),
            "fetch_ticker failed after 3 attempts: request timed out: slow"
        );
    }
}
