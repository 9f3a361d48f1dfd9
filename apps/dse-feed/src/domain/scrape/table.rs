//! Table extraction.

use super::{contains_ci, find_ci, rfind_ci};

/// Class marker carried by the exchange's data tables.
pub const TABLE_MARKER: &str = "shares-table";

const TABLE_OPEN: &str = "<table";
const TABLE_CLOSE: &str = "</table>";

/// Isolate the data table from a full page.
///
/// Tried in order:
/// 1. the `<table` tag enclosing the first [`TABLE_MARKER`] occurrence;
/// 2. the first `<table>…</table>` block mentioning `DATE`, `VOLUME` and
///    either `CLOSE` or `LTP` (case-insensitive);
/// 3. the whole document, unchanged.
///
/// A selected table with no closing tag extends to the end of the document.
#[must_use]
pub fn extract_table(html: &str) -> &str {
    let Some(start) = marked_table(html).or_else(|| table_by_content(html)) else {
        tracing::debug!("no data table isolated, using full document");
        return html;
    };

    match find_ci(html, TABLE_CLOSE, start) {
        Some(end) => &html[start..end + TABLE_CLOSE.len()],
        None => &html[start..],
    }
}

fn marked_table(html: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(found) = html[from..].find(TABLE_MARKER).map(|i| i + from) {
        if let Some(open) = rfind_ci(html, TABLE_OPEN, found) {
            return Some(open);
        }
        from = found + TABLE_MARKER.len();
    }
    None
}

fn table_by_content(html: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(start) = find_ci(html, TABLE_OPEN, from) {
        let end = find_ci(html, TABLE_CLOSE, start)?;
        let content = &html[start..end];

        let has_close = contains_ci(content, "CLOSE") || contains_ci(content, "LTP");
        if contains_ci(content, "DATE") && contains_ci(content, "VOLUME") && has_close {
            return Some(start);
        }
        from = end + TABLE_CLOSE.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_wins_over_content() {
        let html = "<table><tr><td>Date Volume Close</td></tr></table>\
                    <TABLE class=\"x shares-table\"><tr><td>1</td></tr></TABLE><p>tail</p>";

        let table = extract_table(html);

        assert!(table.starts_with("<TABLE class=\"x shares-table\">"));
        assert!(table.ends_with("</TABLE>"));
        assert!(!table.contains("tail"));
    }

    #[test]
    fn falls_back_to_content_keywords() {
        let html = "<table><tr><td>menu</td></tr></table>\
                    <table id=\"data\"><tr><th>date</th><th>ltp</th><th>volume</th></tr></table>";

        assert_eq!(
            extract_table(html),
            "<table id=\"data\"><tr><th>date</th><th>ltp</th><th>volume</th></tr></table>"
        );
    }

    #[test]
    fn content_match_requires_close_or_ltp() {
        let html = "<table><tr><td>DATE</td><td>VOLUME</td></tr></table>";
        assert_eq!(extract_table(html), html);
    }

    #[test]
    fn unterminated_marked_table_runs_to_end() {
        let html = "<p>x</p><table class=\"shares-table\"><tr><td>1</td></tr>";
        assert_eq!(extract_table(html), "<table class=\"shares-table\"><tr><td>1</td></tr>");
    }

    #[test]
    fn no_table_returns_document() {
        let html = "<html><body>closed</body></html>";
        assert_eq!(extract_table(html), html);
    }
}
