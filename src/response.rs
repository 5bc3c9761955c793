use std::fmt::Write;

use crate::store::Sample;

/// The index page: a refresh link over one row per sample, in the given order.
pub fn render_table(samples: &[Sample]) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Temperature</title></head>\n<body>\n",
    );
    html.push_str("<p><a href=\"/refresh\">refresh</a></p>\n");
    html.push_str("<table>\n<tr><th>time</th><th>&deg;C</th></tr>\n");
    for sample in samples {
        // Writing to a String cannot fail
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{:.1}</td></tr>",
            escape(&sample.key),
            sample.value
        );
    }
    html.push_str("</table>\n</body>\n</html>\n");
    html
}

pub fn escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    escaped
}
