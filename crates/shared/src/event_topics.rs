//! Centralized exchange and routing-key constants for library events
//!
//! Single source of truth for the broker addresses used by the relay and by
//! downstream consumers, so publishers and subscribers never disagree.
//!
//! ## Naming Convention
//! - Exchange: `library.events`, backed by one JetStream stream
//! - Routing key: `{entity}.{action}` in lowercase (`book.assigned`)
//! - Subject on the wire: `{exchange}.{routing_key}`
//!
//! ## Usage
//! ```rust
//! use library_shared::event_topics::{subject_for, DEFAULT_EXCHANGE};
//! use library_shared::event_topics::book_routes;
//!
//! assert_eq!(
//!     subject_for(DEFAULT_EXCHANGE, book_routes::ASSIGNED),
//!     "library.events.book.assigned"
//! );
//! ```

/// Exchange that carries every library domain event
pub const DEFAULT_EXCHANGE: &str = "library.events";

/// PostgreSQL NOTIFY channel raised when an outbox row commits
pub const OUTBOX_NOTIFY_CHANNEL: &str = "outbox_events";

/// Book-related routing keys
pub mod book_routes {
    /// A book was handed to a reader
    pub const ASSIGNED: &str = "book.assigned";
    /// A reader gave a book back
    pub const RETURNED: &str = "book.returned";
    /// Wildcard for all book events
    pub const ALL: &str = "book.>";
}

/// Build the wire subject for an exchange and routing key.
pub fn subject_for(exchange: &str, routing_key: &str) -> String {
    format!("{}.{}", exchange, routing_key)
}

/// Derive the JetStream stream name that backs an exchange.
///
/// `library.events` becomes `LIBRARY_EVENTS`.
pub fn stream_name_for(exchange: &str) -> String {
    exchange
        .chars()
        .map(|c| match c {
            '.' | '-' | ' ' | '*' | '>' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

/// Subject filter that captures every routing key of an exchange.
pub fn exchange_wildcard(exchange: &str) -> String {
    format!("{}.>", exchange)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_for_book_routes() {
        assert_eq!(
            subject_for(DEFAULT_EXCHANGE, book_routes::ASSIGNED),
            "library.events.book.assigned"
        );
        assert_eq!(
            subject_for(DEFAULT_EXCHANGE, book_routes::RETURNED),
            "library.events.book.returned"
        );
    }

    #[test]
    fn test_stream_name_for_exchange() {
        assert_eq!(stream_name_for(DEFAULT_EXCHANGE), "LIBRARY_EVENTS");
        assert_eq!(stream_name_for("audit-trail.v2"), "AUDIT_TRAIL_V2");
    }

    #[test]
    fn test_exchange_wildcard() {
        assert_eq!(exchange_wildcard(DEFAULT_EXCHANGE), "library.events.>");
    }
}
