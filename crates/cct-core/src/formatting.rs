//! Telegram HTML helpers: escaping, tag-aware chunking, truncation.

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Hard-cap a message at `limit` bytes, preferring to break at the last
/// newline near the end, and append a truncation marker.
pub fn truncate_message(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }

    let cut = limit.saturating_sub(100);
    let (prefix, _) = split_utf8_prefix(text, cut);
    let mut kept = prefix;
    if let Some(pos) = prefix.rfind('\n') {
        if pos > limit.saturating_sub(200) {
            kept = &prefix[..pos];
        }
    }

    format!("{kept}\n\n...(message truncated due to length)")
}

// ============== Tag-aware HTML chunking ==============

#[derive(Clone, Debug)]
struct HtmlTag {
    name: String,
    open: String,
    close: String,
}

#[derive(Clone, Debug)]
enum HtmlToken<'a> {
    Tag(&'a str),
    Text(&'a str),
}

/// Split HTML into chunks of at most `limit` bytes, closing open tags at
/// each chunk boundary and re-opening them in the next chunk.
pub fn split_html_chunks(html: &str, limit: usize) -> Vec<String> {
    if html.len() <= limit {
        return vec![html.to_string()];
    }

    let mut out: Vec<String> = Vec::new();
    let mut stack: Vec<HtmlTag> = Vec::new();
    let mut chunk = String::new();

    for token in tokenize_html(html) {
        match token {
            HtmlToken::Tag(t) => push_tag_token(&mut out, &mut chunk, &mut stack, t, limit),
            HtmlToken::Text(t) => push_text_token(&mut out, &mut chunk, &stack, t, limit),
        }
    }

    flush_chunk(&mut out, &mut chunk, &stack, limit);
    out
}

fn tokenize_html(mut s: &str) -> Vec<HtmlToken<'_>> {
    let mut out: Vec<HtmlToken<'_>> = Vec::new();
    while !s.is_empty() {
        let Some(start) = s.find('<') else {
            out.push(HtmlToken::Text(s));
            break;
        };
        if start > 0 {
            out.push(HtmlToken::Text(&s[..start]));
            s = &s[start..];
        }

        // Now s starts with '<'. Find matching '>' (best-effort).
        let Some(end) = s.find('>') else {
            out.push(HtmlToken::Text(s));
            break;
        };
        let tag = &s[..=end];
        out.push(HtmlToken::Tag(tag));
        s = &s[end + 1..];
    }
    out
}

fn push_tag_token(
    out: &mut Vec<String>,
    chunk: &mut String,
    stack: &mut Vec<HtmlTag>,
    tag: &str,
    limit: usize,
) {
    let action = parse_tag_action(tag);
    let close_after = close_len_after(stack, &action);

    if !ensure_capacity(out, chunk, stack, limit, tag.len(), close_after) {
        // Best-effort: if even an empty chunk with only reopened tags cannot
        // fit this tag, drop it to avoid infinite loops.
        return;
    }

    chunk.push_str(tag);
    apply_tag_action(stack, action, tag);
}

fn push_text_token(
    out: &mut Vec<String>,
    chunk: &mut String,
    stack: &[HtmlTag],
    mut text: &str,
    limit: usize,
) {
    while !text.is_empty() {
        let reserved = close_len(stack);
        let Some(available) = limit.checked_sub(reserved) else {
            return;
        };

        if chunk.len() >= available {
            flush_chunk(out, chunk, stack, limit);
            reopen_tags(chunk, stack);
            continue;
        }

        let room = available - chunk.len();
        let (head, tail) = split_utf8_prefix(text, room);
        chunk.push_str(head);
        text = tail;

        if !text.is_empty() {
            flush_chunk(out, chunk, stack, limit);
            reopen_tags(chunk, stack);
        }
    }
}

fn ensure_capacity(
    out: &mut Vec<String>,
    chunk: &mut String,
    stack: &[HtmlTag],
    limit: usize,
    extra_len: usize,
    close_len_after: usize,
) -> bool {
    loop {
        let close_before = close_len(stack);
        if chunk
            .len()
            .saturating_add(extra_len)
            .saturating_add(close_len_after)
            <= limit
        {
            // Keep invariant: chunk + close_len_after <= limit.
            return true;
        }

        // If the current chunk has no room, flush it and retry.
        if chunk.len() > open_len(stack) {
            flush_chunk(out, chunk, stack, limit);
            reopen_tags(chunk, stack);
            continue;
        }

        if chunk
            .len()
            .saturating_add(extra_len)
            .saturating_add(close_before)
            > limit
        {
            return false;
        }

        return true;
    }
}

fn flush_chunk(out: &mut Vec<String>, chunk: &mut String, stack: &[HtmlTag], limit: usize) {
    if chunk.is_empty() {
        return;
    }
    if chunk.len() <= open_len(stack) {
        // Only opening tags, no content: don't send empty formatting.
        chunk.clear();
        return;
    }

    let mut msg = String::with_capacity(chunk.len() + close_len(stack));
    msg.push_str(chunk);
    for t in stack.iter().rev() {
        msg.push_str(&t.close);
    }

    // Never send above limit (best-effort truncate if our math is wrong).
    if msg.len() > limit {
        msg.truncate(limit);
    }

    out.push(msg);
    chunk.clear();
}

fn reopen_tags(chunk: &mut String, stack: &[HtmlTag]) {
    for t in stack {
        chunk.push_str(&t.open);
    }
}

fn open_len(stack: &[HtmlTag]) -> usize {
    stack.iter().map(|t| t.open.len()).sum()
}

fn close_len(stack: &[HtmlTag]) -> usize {
    stack.iter().map(|t| t.close.len()).sum()
}

#[derive(Clone, Debug)]
enum TagAction {
    Open(HtmlTag),
    Close(String),
    Noop,
}

fn parse_tag_action(tag: &str) -> TagAction {
    let t = tag.trim();
    if !t.starts_with('<') || !t.ends_with('>') {
        return TagAction::Noop;
    }

    if let Some(rest) = t.strip_prefix("</") {
        let name = parse_tag_name(rest);
        return if name.is_empty() {
            TagAction::Noop
        } else {
            TagAction::Close(name)
        };
    }

    if t.ends_with("/>") {
        return TagAction::Noop;
    }

    let name = parse_tag_name(&t[1..]);
    if name.is_empty() {
        return TagAction::Noop;
    }

    let close = format!("</{name}>");
    TagAction::Open(HtmlTag {
        name,
        open: t.to_string(),
        close,
    })
}

fn parse_tag_name(after_lt: &str) -> String {
    let mut out = String::new();
    for ch in after_lt.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' {
            out.push(ch.to_ascii_lowercase());
            continue;
        }
        break;
    }
    out
}

fn close_len_after(stack: &[HtmlTag], action: &TagAction) -> usize {
    let mut tmp: Vec<HtmlTag> = stack.to_vec();
    apply_tag_action(&mut tmp, action.clone(), "");
    close_len(&tmp)
}

fn apply_tag_action(stack: &mut Vec<HtmlTag>, action: TagAction, raw_tag: &str) {
    match action {
        TagAction::Open(mut t) => {
            // Preserve the exact opening tag for re-opening (includes attributes).
            if !raw_tag.is_empty() {
                t.open = raw_tag.to_string();
            }
            stack.push(t);
        }
        TagAction::Close(name) => {
            while let Some(last) = stack.pop() {
                if last.name == name {
                    break;
                }
            }
        }
        TagAction::Noop => {}
    }
}

fn split_utf8_prefix(s: &str, max_bytes: usize) -> (&str, &str) {
    if s.len() <= max_bytes {
        return (s, "");
    }
    let mut idx = 0usize;
    for (i, _) in s.char_indices() {
        if i > max_bytes {
            break;
        }
        idx = i;
    }
    if idx == 0 {
        let next = s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(1);
        return (&s[..next], &s[next..]);
    }
    (&s[..idx], &s[idx..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_special_characters() {
        assert_eq!(
            escape_html(r#"<b> & "q""#),
            "&lt;b&gt; &amp; &quot;q&quot;"
        );
    }

    #[test]
    fn short_html_is_a_single_chunk() {
        let chunks = split_html_chunks("<b>hello</b>", 4000);
        assert_eq!(chunks, vec!["<b>hello</b>".to_string()]);
    }

    #[test]
    fn long_text_splits_within_limit() {
        let html = "x".repeat(9000);
        let limit = 4000;
        let chunks = split_html_chunks(&html, limit);
        assert!(chunks.len() >= 3);
        for c in &chunks {
            assert!(c.len() <= limit);
        }
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, 9000);
    }

    #[test]
    fn open_tags_are_closed_and_reopened_across_chunks() {
        let html = format!("<b>{}</b>", "y".repeat(500));
        let chunks = split_html_chunks(&html, 200);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.starts_with("<b>"), "chunk missing reopen: {c}");
            assert!(c.ends_with("</b>"), "chunk missing close: {c}");
            assert!(c.len() <= 200);
        }
    }

    #[test]
    fn truncate_passes_short_messages_through() {
        assert_eq!(truncate_message("hello", 4000), "hello");
    }

    #[test]
    fn truncate_prefers_newline_break() {
        let mut text = String::new();
        for i in 0..300 {
            text.push_str(&format!("line number {i}\n"));
        }
        let out = truncate_message(&text, 4000);
        assert!(out.len() <= 4000);
        assert!(out.ends_with("...(message truncated due to length)"));
        // The kept portion ends cleanly at a line boundary.
        let body = out.trim_end_matches("...(message truncated due to length)");
        let body = body.trim_end();
        assert!(body.ends_with(|c: char| c.is_ascii_digit()));
    }

    #[test]
    fn truncate_without_newlines_cuts_hard() {
        let text = "z".repeat(5000);
        let out = truncate_message(&text, 4000);
        assert!(out.len() <= 4000);
        assert!(out.ends_with("...(message truncated due to length)"));
    }
}
