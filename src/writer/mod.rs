/*!
DB-side mutation layer (§4.6, §4.8): transactional batch writers over the shared `sqlx::PgPool`
(§5 "Shared-resource policy" — the pool is shared across all writers).
*/
pub mod history;
pub mod state;

pub use history::PgHistoryWriter;
pub use state::PgStateWriter;

/// Table/partition index names used in maintenance SQL must match this pattern (§4.6)
/// before being interpolated into a query string; only fully parameterized queries skip this.
pub fn is_safe_partition_identifier(name: &str) -> bool {
    let digits = name.strip_prefix("route_events_");
    match digits {
        Some(rest) => rest.len() == 8 && rest.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_identifier_validation() {
        assert!(is_safe_partition_identifier("route_events_20260726"));
        assert!(!is_safe_partition_identifier("route_events_2026072"));
        assert!(!is_safe_partition_identifier("route_events_20260726; DROP TABLE x"));
        assert!(!is_safe_partition_identifier("other_table"));
    }
}
