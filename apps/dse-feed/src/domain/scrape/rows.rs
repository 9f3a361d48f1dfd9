//! Row and cell tokenizing.
//!
//! Only `<tr>`, `<td>` and `<th>` are recognised. Anything nested inside a
//! cell is flattened to its text.

use super::find_ci;

/// Split a table into `<tr …>…</tr>` slices, in document order.
///
/// An opening `<tr` must be followed by whitespace or `>` so that tags such
/// as `<track>` are not mistaken for rows. Scanning stops at the first row
/// with no closing tag.
#[must_use]
pub fn rows(table: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut from = 0;

    while let Some(start) = find_tag_open(table, "<tr", from) {
        let Some(close) = find_ci(table, "</tr>", start + 3) else {
            break;
        };
        let end = close + "</tr>".len();
        out.push(&table[start..end]);
        from = end;
    }

    out
}

/// Split a row into flattened cell strings.
///
/// Cells open with `<td` or `<th` and close at the next `</td>` or `</th>`,
/// whichever comes first. Nested tags are removed, `&nbsp;` and `&amp;` are
/// decoded, and surrounding whitespace is trimmed. Scanning stops at the
/// first cell with no closing tag.
#[must_use]
pub fn cells(row: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut from = 0;

    loop {
        let Some(start) = earliest(
            find_tag_open(row, "<td", from),
            find_tag_open(row, "<th", from),
        ) else {
            break;
        };
        let Some(gt) = row[start..].find('>').map(|i| start + i) else {
            break;
        };
        let content_start = gt + 1;
        let Some(end) = earliest(
            find_ci(row, "</td>", content_start),
            find_ci(row, "</th>", content_start),
        ) else {
            break;
        };

        out.push(clean_text(&row[content_start..end]));
        from = end + "</td>".len();
    }

    out
}

/// Strip tags, decode the two entities the exchange uses, and trim.
#[must_use]
pub fn clean_text(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut in_tag = false;
    for ch in raw.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }

    text.replace("&nbsp;", " ").replace("&amp;", "&").trim().to_string()
}

/// Find `<tag` followed by whitespace or `>`.
fn find_tag_open(html: &str, tag: &str, mut from: usize) -> Option<usize> {
    let bytes = html.as_bytes();
    while let Some(pos) = find_ci(html, tag, from) {
        match bytes.get(pos + tag.len()) {
            Some(b' ' | b'\t' | b'\n' | b'\r' | b'>') => return Some(pos),
            Some(_) => from = pos + tag.len(),
            None => return None,
        }
    }
    None
}

fn earliest(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
