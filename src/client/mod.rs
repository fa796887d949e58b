//! External collaborators: the PostgreSQL connector and the Google Sheets
//! destination, along with destination authentication ([`Auth`]).

mod auth;
mod postgres;
mod sheets;

pub use auth::{Auth, Authenticator, SHEETS_SCOPE, ServiceAccountKey};
pub use postgres::{PgConnector, PgSession};
pub use sheets::{SheetsClient, data_range, quote_tab, tail_range, update_body};

use crate::error::DestinationError;

/// Map an HTTP error status to a destination error.
pub fn classify_status(status: u16, message: String) -> DestinationError {
    match status {
        429 => DestinationError::RateLimited(message),
        408 | 500..=599 => DestinationError::Unavailable { status, message },
        401 | 403 => DestinationError::Auth { status, message },
        _ => DestinationError::Rejected { status, message },
    }
}

/// Map a failed HTTP exchange (no status received) to a destination error.
pub(crate) fn transport_error(error: reqwest::Error) -> DestinationError {
    if error.is_timeout() {
        DestinationError::Timeout
    } else if error.is_connect() || error.is_request() {
        DestinationError::Connection(error.to_string())
    } else {
        DestinationError::Protocol(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Transient;

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(429, String::new()), DestinationError::RateLimited(_)));
        assert!(matches!(
            classify_status(503, String::new()),
            DestinationError::Unavailable { status: 503, .. }
        ));
        assert!(matches!(
            classify_status(408, String::new()),
            DestinationError::Unavailable { status: 408, .. }
        ));
        assert!(matches!(
            classify_status(403, String::new()),
            DestinationError::Auth { status: 403, .. }
        ));
        assert!(matches!(
            classify_status(400, String::new()),
            DestinationError::Rejected { status: 400, .. }
        ));
    }

    #[test]
    fn test_status_retryability() {
        assert!(classify_status(429, String::new()).is_transient());
        assert!(classify_status(502, String::new()).is_transient());
        assert!(!classify_status(401, String::new()).is_transient());
        assert!(!classify_status(404, String::new()).is_transient());
    }
}
