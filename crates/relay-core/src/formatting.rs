//! Small HTML helpers for outbound messages.

use chrono::{DateTime, Local};

use crate::domain::Sender;

/// Escape HTML special characters for HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Length as the platform counts it (UTF-16 code units). Tags and entities
/// are counted too, so this over-estimates the rendered length.
pub fn html_len(html: &str) -> usize {
    html.encode_utf16().count()
}

/// Escape `text` and cut it into messages of at most `max_len` (per
/// `html_len`). The first message starts with `head`, which must already be
/// HTML. Entities are never split.
pub fn escaped_chunks(head: &str, text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = head.to_string();
    let mut len = html_len(head);
    let mut buf = [0u8; 4];
    for c in text.chars() {
        let piece: &str = match c {
            '&' => "&amp;",
            '<' => "&lt;",
            '>' => "&gt;",
            '"' => "&quot;",
            _ => c.encode_utf8(&mut buf),
        };
        let n = html_len(piece);
        if len > 0 && len + n > max_len {
            chunks.push(std::mem::take(&mut current));
            len = 0;
        }
        current.push_str(piece);
        len += n;
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// First `max_len` characters, with "..." appended when something was cut.
pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

/// Call `build` with a limit halved from `start` until its output fits in
/// `max_len`. A zero limit is the last attempt.
pub fn shrink_to_fit(max_len: usize, start: usize, build: impl Fn(usize) -> String) -> String {
    let mut limit = start;
    loop {
        let html = build(limit);
        if html_len(&html) <= max_len || limit == 0 {
            return html;
        }
        limit /= 2;
    }
}

/// `(@username)`, or the fallback shown when the user has none.
pub fn username_tag(sender: &Sender) -> String {
    match sender.username.as_deref().filter(|u| !u.is_empty()) {
        Some(u) => format!("(@{})", escape_html(u)),
        None => "(لا يوجد username)".to_string(),
    }
}

/// Timestamp as shown in notices (`2026-10-18 14:03:00`).
pub fn display_time(at: DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserId;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<b>"a" & b</b>"#),
            "&lt;b&gt;&quot;a&quot; &amp; b&lt;/b&gt;"
        );
    }

    #[test]
    fn username_tag_falls_back() {
        let mut s = Sender {
            user_id: UserId(1),
            first_name: "A".to_string(),
            last_name: None,
            username: None,
        };
        assert_eq!(username_tag(&s), "(لا يوجد username)");
        s.username = Some("mona".to_string());
        assert_eq!(username_tag(&s), "(@mona)");
    }

    #[test]
    fn chunks_respect_the_limit_after_escaping() {
        let chunks = escaped_chunks("<b>head</b>\n", &"<".repeat(4096), 4096);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| html_len(c) <= 4096));
        assert!(chunks[0].starts_with("<b>head</b>\n&lt;"));
        assert!(chunks.iter().all(|c| !c.ends_with('&') && !c.ends_with("&l")));
        let rejoined: String = chunks.concat();
        assert_eq!(rejoined, format!("<b>head</b>\n{}", "&lt;".repeat(4096)));
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(escaped_chunks("h: ", "a & b", 4096), vec!["h: a &amp; b"]);
        assert_eq!(escaped_chunks("", "", 10), vec![String::new()]);
    }

    #[test]
    fn emoji_count_as_two_units() {
        assert_eq!(html_len("😀a"), 3);
    }
}
