//! Logical fields and header-alias resolution
//!
//! The deployed ledger header is not a contract: column order changes, and
//! header text varies by locale. Columns are therefore located per pass by
//! matching each logical field against its alias list, never by position.

use std::collections::HashMap;

/// Logical fields of a subscriber row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Identity,
    DisplayName,
    PaidAt,
    PeriodEnd,
    Notified,
    Status,
    FullName,
    PhoneNumber,
    InChannel,
}

impl Field {
    /// Every field, in canonical (wanted-header) order
    pub const ALL: [Field; 9] = [
        Field::Identity,
        Field::DisplayName,
        Field::PaidAt,
        Field::PeriodEnd,
        Field::Notified,
        Field::Status,
        Field::FullName,
        Field::PhoneNumber,
        Field::InChannel,
    ];

    /// Header text written when the column is created by this service
    pub fn canonical(self) -> &'static str {
        match self {
            Field::Identity => "user_id",
            Field::DisplayName => "username",
            Field::PaidAt => "paid_at",
            Field::PeriodEnd => "period_end",
            Field::Notified => "notified",
            Field::Status => "status",
            Field::FullName => "full_name",
            Field::PhoneNumber => "phone_number",
            Field::InChannel => "in_channel",
        }
    }

    /// Accepted header spellings, first match wins. Includes the legacy
    /// locale variants found in deployed ledgers.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::Identity => &["user_id", "id", "userid"],
            Field::DisplayName => &["username", "user", "name"],
            Field::PaidAt => &["paid_at", "дата_оплаты", "дата оплаты"],
            Field::PeriodEnd => &[
                "period_end",
                "paid_until",
                "end_date",
                "дата_окончания",
                "дата окончания",
            ],
            Field::Notified => &["notified"],
            Field::Status => &["status", "статус"],
            Field::FullName => &["full_name", "fullname", "fio"],
            Field::PhoneNumber => &["phone_number", "phone", "телефон"],
            Field::InChannel => &["in_channel"],
        }
    }
}

/// Column positions resolved against one header snapshot.
///
/// Recomputed per pass; never cached across store mutations.
#[derive(Debug, Clone)]
pub struct HeaderMap {
    columns: HashMap<Field, usize>,
    width: usize,
}

impl HeaderMap {
    /// Resolve each field against a header row (0-based column indices)
    pub fn resolve(header: &[String]) -> Self {
        let mut columns = HashMap::new();
        for field in Field::ALL {
            if let Some(col) = find_alias(header, field) {
                columns.insert(field, col);
            }
        }
        Self {
            columns,
            width: header.len(),
        }
    }

    /// 0-based column index of a field, if present in the header
    pub fn col(&self, field: Field) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    /// Number of header columns
    pub fn width(&self) -> usize {
        self.width
    }

    /// The cell of `field` within a data row, if the column exists and the
    /// row is wide enough (trailing blanks are routinely truncated by the
    /// store).
    pub fn cell<'a>(&self, row: &'a [String], field: Field) -> Option<&'a str> {
        self.col(field).and_then(|i| row.get(i)).map(String::as_str)
    }

    /// Render a full row in current-header order from a field-value set.
    /// Columns not in the write-set are left blank.
    pub fn render_row(&self, header: &[String], values: &HashMap<Field, String>) -> Vec<String> {
        header
            .iter()
            .enumerate()
            .map(|(i, _)| {
                Field::ALL
                    .iter()
                    .find(|f| self.col(**f) == Some(i))
                    .and_then(|f| values.get(f))
                    .cloned()
                    .unwrap_or_default()
            })
            .collect()
    }
}

fn find_alias(header: &[String], field: Field) -> Option<usize> {
    for alias in field.aliases() {
        if let Some(i) = header.iter().position(|h| h.trim() == *alias) {
            return Some(i);
        }
    }
    None
}

/// Canonical headers missing from a live header row, in wanted order.
/// These are appended at the end; existing columns are never reordered or
/// removed.
pub fn missing_headers(header: &[String]) -> Vec<&'static str> {
    Field::ALL
        .iter()
        .filter(|f| find_alias(header, **f).is_none())
        .map(|f| f.canonical())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolves_canonical_headers() {
        let h = header(&["user_id", "username", "paid_at", "period_end"]);
        let map = HeaderMap::resolve(&h);
        assert_eq!(map.col(Field::Identity), Some(0));
        assert_eq!(map.col(Field::PeriodEnd), Some(3));
        assert_eq!(map.col(Field::InChannel), None);
    }

    #[test]
    fn test_resolves_locale_and_legacy_aliases() {
        let h = header(&["id", "user", "дата_оплаты", "paid_until", "статус"]);
        let map = HeaderMap::resolve(&h);
        assert_eq!(map.col(Field::Identity), Some(0));
        assert_eq!(map.col(Field::DisplayName), Some(1));
        assert_eq!(map.col(Field::PaidAt), Some(2));
        assert_eq!(map.col(Field::PeriodEnd), Some(3));
        assert_eq!(map.col(Field::Status), Some(4));
    }

    #[test]
    fn test_column_order_is_not_assumed() {
        let h = header(&["period_end", "user_id"]);
        let map = HeaderMap::resolve(&h);
        assert_eq!(map.col(Field::PeriodEnd), Some(0));
        assert_eq!(map.col(Field::Identity), Some(1));
    }

    #[test]
    fn test_cell_handles_short_rows() {
        let h = header(&["user_id", "username", "period_end"]);
        let map = HeaderMap::resolve(&h);
        let row = vec!["7".to_string()];
        assert_eq!(map.cell(&row, Field::Identity), Some("7"));
        assert_eq!(map.cell(&row, Field::PeriodEnd), None);
    }

    #[test]
    fn test_missing_headers_in_wanted_order() {
        let h = header(&["user_id", "период", "status"]);
        let missing = missing_headers(&h);
        assert_eq!(
            missing,
            vec![
                "username",
                "paid_at",
                "period_end",
                "notified",
                "full_name",
                "phone_number",
                "in_channel"
            ]
        );
    }

    #[test]
    fn test_render_row_follows_header_order() {
        let h = header(&["period_end", "comment", "user_id"]);
        let map = HeaderMap::resolve(&h);
        let mut values = HashMap::new();
        values.insert(Field::Identity, "42".to_string());
        values.insert(Field::PeriodEnd, "2025-04-20".to_string());
        // Out-of-model column ("comment") renders blank: a full-row write
        // replaces whatever was there.
        assert_eq!(
            map.render_row(&h, &values),
            vec!["2025-04-20".to_string(), String::new(), "42".to_string()]
        );
    }
}
