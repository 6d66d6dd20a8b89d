//! Slack mrkdwn → HTML.
//!
//! Covers the subset Slack actually emits in section/context text objects:
//! `*bold*`, `_italic_`, `~strike~`, `` `code` ``, triple-backtick blocks,
//! `<url>`, `<url|label>`, `<@user>`, `<#channel|name>`, `<!here>`-style
//! broadcasts, and `:shortcode:` emoji from the static table. Custom emoji
//! in running text stay as their shortcodes.

use super::Converter;
use crate::db;
use crate::emoji::unicode_for_shortcode;

/// Render one mrkdwn string to HTML.
pub fn mrkdwn_to_html(conv: &Converter<'_>, text: &str) -> String {
    let mut out = String::new();
    // Alternating normal / preformatted segments.
    for (i, segment) in text.split("```").enumerate() {
        if i % 2 == 1 {
            out.push_str("<pre><code>");
            out.push_str(&escape_html(segment.trim_matches('\n')));
            out.push_str("</code></pre>");
        } else {
            out.push_str(&render_inline(conv, segment));
        }
    }
    out
}

/// Escape the five HTML-significant characters.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Inline rendering
// ---------------------------------------------------------------------------

enum Segment {
    /// Raw text still needing escaping and style markers.
    Text(String),
    /// Already-rendered HTML (links, mentions).
    Html(String),
}

fn render_inline(conv: &Converter<'_>, text: &str) -> String {
    let segments = split_angle_tokens(conv, text);
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Html(html) => out.push_str(&html),
            Segment::Text(raw) => out.push_str(&style_text(&raw)),
        }
    }
    out
}

/// Split `<...>` tokens out of the raw text and render them.
fn split_angle_tokens(conv: &Converter<'_>, text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('<') {
        let Some(close_rel) = rest[open..].find('>') else {
            break;
        };
        let close = open + close_rel;
        if open > 0 {
            segments.push(Segment::Text(rest[..open].to_owned()));
        }
        segments.push(render_angle_token(conv, &rest[open + 1..close]));
        rest = &rest[close + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_owned()));
    }
    segments
}

fn render_angle_token(conv: &Converter<'_>, token: &str) -> Segment {
    let (target, label) = match token.split_once('|') {
        Some((t, l)) => (t, Some(l)),
        None => (token, None),
    };
    if let Some(user_id) = target.strip_prefix('@') {
        let mxid = conv.puppets.ghost_mxid(conv.team_id, user_id);
        let name = conv
            .puppets
            .cached_display_name(conv.team_id, user_id)
            .or_else(|| label.map(str::to_owned))
            .unwrap_or_else(|| user_id.to_owned());
        return Segment::Html(format!(
            "<a href=\"https://matrix.to/#/{}\">{}</a>",
            mxid,
            escape_html(&name)
        ));
    }
    if let Some(channel_id) = target.strip_prefix('#') {
        let key = sb_ids::PortalKey::new(conv.team_id, channel_id);
        let portal = db::portal::get_portal(conv.db, &key).ok().flatten();
        let name = label
            .map(str::to_owned)
            .or_else(|| portal.as_ref().map(|p| p.name.clone()))
            .unwrap_or_else(|| channel_id.to_owned());
        if let Some(room) = portal.and_then(|p| p.mxid) {
            return Segment::Html(format!(
                "<a href=\"https://matrix.to/#/{}\">#{}</a>",
                room,
                escape_html(&name)
            ));
        }
        return Segment::Html(format!("#{}", escape_html(&name)));
    }
    if let Some(broadcast) = target.strip_prefix('!') {
        return match broadcast {
            "here" | "channel" | "everyone" => Segment::Html("@room".to_owned()),
            _ => Segment::Html(escape_html(label.unwrap_or(broadcast))),
        };
    }
    if target.starts_with("http://") || target.starts_with("https://") || target.starts_with("mailto:") {
        let label = label.unwrap_or(target);
        return Segment::Html(format!(
            "<a href=\"{}\">{}</a>",
            escape_html(target),
            escape_html(label)
        ));
    }
    Segment::Html(escape_html(token))
}

// ---------------------------------------------------------------------------
// Style markers
// ---------------------------------------------------------------------------

/// Apply `*`/`_`/`~`/backtick pairs and `:emoji:` within one text run,
/// escaping everything else.
fn style_text(raw: &str) -> String {
    let mut out = String::new();
    let chars: Vec<char> = raw.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let marker = match c {
            '*' => Some(("<strong>", "</strong>")),
            '_' => Some(("<em>", "</em>")),
            '~' => Some(("<del>", "</del>")),
            '`' => Some(("<code>", "</code>")),
            _ => None,
        };
        if let Some((open_tag, close_tag)) = marker {
            if let Some(close) = find_closing(&chars, i, c) {
                let inner: String = chars[i + 1..close].iter().collect();
                out.push_str(open_tag);
                if c == '`' {
                    out.push_str(&escape_html(&inner));
                } else {
                    out.push_str(&style_text(&inner));
                }
                out.push_str(close_tag);
                i = close + 1;
                continue;
            }
        }
        if c == ':' {
            if let Some(close) = find_closing(&chars, i, ':') {
                let code: String = chars[i + 1..close].iter().collect();
                if let Some(glyph) = unicode_for_shortcode(&code) {
                    out.push_str(glyph);
                    i = close + 1;
                    continue;
                }
            }
        }
        if c == '\n' {
            out.push_str("<br>");
        } else {
            out.push_str(&escape_html(&c.to_string()));
        }
        i += 1;
    }
    out
}

/// Closing marker on the same line, not immediately after the opener.
fn find_closing(chars: &[char], open: usize, marker: char) -> Option<usize> {
    let mut j = open + 1;
    while j < chars.len() {
        match chars[j] {
            c if c == marker && j > open + 1 => return Some(j),
            '\n' => return None,
            _ => j += 1,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_styles() {
        assert_eq!(style_text("*bold* and _it_"), "<strong>bold</strong> and <em>it</em>");
        assert_eq!(style_text("~gone~"), "<del>gone</del>");
        assert_eq!(style_text("`let x = 1;`"), "<code>let x = 1;</code>");
    }

    #[test]
    fn unmatched_marker_stays_literal() {
        assert_eq!(style_text("5 * 3"), "5 * 3");
        assert_eq!(style_text("a_b"), "a_b");
    }

    #[test]
    fn code_contents_are_not_styled() {
        assert_eq!(style_text("`*raw*`"), "<code>*raw*</code>");
    }

    #[test]
    fn emoji_shortcodes_resolve() {
        assert_eq!(style_text("hi :smile:"), "hi 😄");
        assert_eq!(style_text(":not-an-emoji:"), ":not-an-emoji:");
    }

    #[test]
    fn newlines_become_br() {
        assert_eq!(style_text("a\nb"), "a<br>b");
    }

    #[test]
    fn escaping_applies() {
        assert_eq!(style_text("a < b & c"), "a &lt; b &amp; c");
    }
}
