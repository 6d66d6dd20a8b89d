//! Slack → homeserver conversion.
//!
//! A Slack message decomposes into one part per file attachment plus an
//! optional text part carrying the rendered blocks and attachments. Part IDs
//! are stable across edits so orphaned parts can be redacted.

use super::mrkdwn::{escape_html, mrkdwn_to_html};
use super::{ConvertError, ConvertedPart, Converter, SlackMessage};
use crate::emoji::ResolvedEmoji;
use sb_ids::PartId;
use sb_matrix::MessageContent;
use sb_matrix::content::{
    FileInfo, MSGTYPE_AUDIO, MSGTYPE_FILE, MSGTYPE_IMAGE, MSGTYPE_VIDEO, Mentions,
};
use sb_slack::blocks::{
    Block, ContextElement, RichTextElement, RichTextList, RichTextSection, RichTextStyle,
};
use sb_slack::types::{Attachment, AttachmentField, File};
use tracing::warn;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Convert one Slack message into homeserver parts, in emit order.
pub async fn slack_to_matrix(
    conv: &Converter<'_>,
    msg: &SlackMessage<'_>,
) -> Result<Vec<ConvertedPart>, ConvertError> {
    let mut parts: Vec<ConvertedPart> = Vec::new();

    // Bot messages frequently arrive as exactly [image, context]; those
    // render as a single image upload instead of a notice pair.
    if let Some(part) = bot_image_special_case(conv, msg).await? {
        return Ok(vec![part]);
    }

    for (index, file) in msg.files.iter().enumerate() {
        match file_part(conv, file, index).await {
            Ok(part) => parts.push(part),
            Err(e) => {
                warn!(file_id = %file.id, error = %e, "file part dropped");
                return Err(e);
            }
        }
    }

    let rendered = render_message_html(conv, msg).await;
    if !rendered.html.is_empty() {
        let formatted = rendered.html;
        let body = html_to_plain(&formatted);
        let merge_caption =
            conv.config.caption_in_message && parts.len() == 1 && msg.files.len() == 1;
        if merge_caption {
            let file_content = &mut parts[0].content;
            file_content.filename = Some(file_content.body.clone());
            file_content.body = body;
            file_content.format = Some(sb_matrix::content::FORMAT_HTML.to_owned());
            file_content.formatted_body = Some(formatted);
            apply_mentions(file_content, &rendered.mentions);
        } else {
            let mut content = MessageContent::html(&body, &formatted);
            apply_mentions(&mut content, &rendered.mentions);
            parts.push(ConvertedPart {
                part_id: PartId::Text,
                part_index: parts.len() as i64,
                content,
            });
        }
    }

    for (index, part) in parts.iter_mut().enumerate() {
        part.part_index = index as i64;
    }
    Ok(parts)
}

fn apply_mentions(content: &mut MessageContent, mentions: &RenderedMentions) {
    if mentions.users.is_empty() && !mentions.room {
        return;
    }
    content.mentions = Some(Mentions {
        user_ids: mentions.users.clone(),
        room: mentions.room,
    });
}

// ---------------------------------------------------------------------------
// File parts
// ---------------------------------------------------------------------------

async fn file_part(
    conv: &Converter<'_>,
    file: &File,
    index: usize,
) -> Result<ConvertedPart, ConvertError> {
    let data = conv
        .client
        .download_file(&file.url_private)
        .await
        .map_err(|e| ConvertError::MediaDownloadFailed(e.to_string()))?;
    let size = data.len() as u64;
    let mxc = conv
        .homeserver
        .upload_media(data, &file.mimetype, &file.name)
        .await
        .map_err(|e| ConvertError::MediaUploadFailed(e.to_string()))?;

    let voice = file.subtype.as_deref() == Some("slack_audio");
    let msgtype = if voice {
        MSGTYPE_AUDIO
    } else {
        msgtype_for_mime(&file.mimetype)
    };
    let content = MessageContent {
        msgtype: msgtype.to_owned(),
        body: file.name.clone(),
        url: Some(mxc),
        info: Some(FileInfo {
            mimetype: Some(file.mimetype.clone()),
            size: Some(size),
            ..FileInfo::default()
        }),
        slack_audio: voice,
        ..MessageContent::default()
    };
    Ok(ConvertedPart {
        part_id: PartId::file(index, &file.id),
        part_index: index as i64,
        content,
    })
}

fn msgtype_for_mime(mime: &str) -> &'static str {
    if mime.starts_with("image/") {
        MSGTYPE_IMAGE
    } else if mime.starts_with("video/") {
        MSGTYPE_VIDEO
    } else if mime.starts_with("audio/") {
        MSGTYPE_AUDIO
    } else {
        MSGTYPE_FILE
    }
}

/// Exactly-two-block bot messages `[image, context]` become one image part.
async fn bot_image_special_case(
    conv: &Converter<'_>,
    msg: &SlackMessage<'_>,
) -> Result<Option<ConvertedPart>, ConvertError> {
    if msg.blocks.len() != 2 || !msg.files.is_empty() {
        return Ok(None);
    }
    let (Block::Image(image), Block::Context(_)) = (&msg.blocks[0], &msg.blocks[1]) else {
        return Ok(None);
    };
    let data = conv
        .client
        .download_file(&image.image_url)
        .await
        .map_err(|e| ConvertError::MediaDownloadFailed(e.to_string()))?;
    let size = data.len() as u64;
    let mime = "image/png";
    let mxc = conv
        .homeserver
        .upload_media(data, mime, &image.alt_text)
        .await
        .map_err(|e| ConvertError::MediaUploadFailed(e.to_string()))?;
    let body = if image.alt_text.is_empty() {
        "image".to_owned()
    } else {
        image.alt_text.clone()
    };
    Ok(Some(ConvertedPart {
        part_id: PartId::Text,
        part_index: 0,
        content: MessageContent {
            msgtype: MSGTYPE_IMAGE.to_owned(),
            body,
            url: Some(mxc),
            info: Some(FileInfo {
                mimetype: Some(mime.to_owned()),
                size: Some(size),
                ..FileInfo::default()
            }),
            ..MessageContent::default()
        },
    }))
}

// ---------------------------------------------------------------------------
// HTML rendering
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RenderedMentions {
    users: Vec<String>,
    room: bool,
}

struct Rendered {
    html: String,
    mentions: RenderedMentions,
}

async fn render_message_html(conv: &Converter<'_>, msg: &SlackMessage<'_>) -> Rendered {
    let mut out = String::new();
    let mut mentions = RenderedMentions::default();

    if msg.blocks.is_empty() {
        if !msg.text.is_empty() {
            out.push_str(&mrkdwn_to_html(conv, msg.text));
        }
    } else {
        render_blocks(conv, msg.blocks, &mut out, &mut mentions).await;
    }
    for attachment in msg.attachments {
        render_attachment(conv, attachment, &mut out, &mut mentions).await;
    }

    Rendered {
        html: out,
        mentions,
    }
}

async fn render_blocks(
    conv: &Converter<'_>,
    blocks: &[Block],
    out: &mut String,
    mentions: &mut RenderedMentions,
) {
    let mut last_was_notice = false;
    for block in blocks {
        match block {
            Block::Unknown => {
                // Consecutive unsupported blocks collapse into one notice.
                if !last_was_notice {
                    out.push_str("<i>Unsupported block</i>");
                    last_was_notice = true;
                }
                continue;
            }
            Block::RichText(rt) => {
                // Consecutive list sections form one run: Slack encodes
                // nesting as siblings with increasing indent.
                let sections = &rt.elements;
                let mut i = 0;
                while i < sections.len() {
                    if matches!(sections[i], RichTextSection::RichTextList(_)) {
                        let start = i;
                        while i < sections.len()
                            && matches!(sections[i], RichTextSection::RichTextList(_))
                        {
                            i += 1;
                        }
                        render_list_run(conv, &sections[start..i], out, mentions).await;
                    } else {
                        render_section(conv, &sections[i], out, mentions).await;
                        i += 1;
                    }
                }
            }
            Block::Section(section) => {
                if let Some(text) = &section.text {
                    out.push_str("<p>");
                    out.push_str(&render_text_object(conv, &text.kind, &text.text));
                    out.push_str("</p>");
                }
                if !section.fields.is_empty() {
                    out.push_str("<table>");
                    for pair in section.fields.chunks(2) {
                        out.push_str("<tr>");
                        for field in pair {
                            out.push_str("<td>");
                            out.push_str(&render_text_object(conv, &field.kind, &field.text));
                            out.push_str("</td>");
                        }
                        out.push_str("</tr>");
                    }
                    out.push_str("</table>");
                }
            }
            Block::Header(header) => {
                out.push_str("<h1>");
                out.push_str(&escape_html(&header.text.text));
                out.push_str("</h1>");
            }
            Block::Divider(_) => out.push_str("<hr>"),
            Block::Context(context) => {
                out.push_str("<sup>");
                let mut first = true;
                for element in &context.elements {
                    if !first {
                        out.push(' ');
                    }
                    first = false;
                    match element {
                        ContextElement::PlainText { text } => out.push_str(&escape_html(text)),
                        ContextElement::Mrkdwn { text } => {
                            out.push_str(&mrkdwn_to_html(conv, text));
                        }
                        ContextElement::Image { alt_text, .. } => {
                            out.push_str(&escape_html(alt_text));
                        }
                        ContextElement::Unknown => {}
                    }
                }
                out.push_str("</sup>");
            }
            Block::Image(image) => {
                out.push_str("<p><a href=\"");
                out.push_str(&escape_html(&image.image_url));
                out.push_str("\">");
                out.push_str(&escape_html(if image.alt_text.is_empty() {
                    "image"
                } else {
                    &image.alt_text
                }));
                out.push_str("</a></p>");
            }
        }
        last_was_notice = false;
    }
}

fn render_text_object(conv: &Converter<'_>, kind: &str, text: &str) -> String {
    if kind == "mrkdwn" {
        mrkdwn_to_html(conv, text)
    } else {
        escape_html(text)
    }
}

// Recursion through async fns needs boxing at the section level.
fn render_section<'a>(
    conv: &'a Converter<'a>,
    section: &'a RichTextSection,
    out: &'a mut String,
    mentions: &'a mut RenderedMentions,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        match section {
            RichTextSection::RichTextSection(sub) => {
                out.push_str("<p>");
                render_elements(conv, &sub.elements, out, mentions).await;
                out.push_str("</p>");
            }
            RichTextSection::RichTextQuote(sub) => {
                out.push_str("<blockquote>");
                if sub.border > 0 {
                    out.push_str("<blockquote>");
                }
                render_elements(conv, &sub.elements, out, mentions).await;
                if sub.border > 0 {
                    out.push_str("</blockquote>");
                }
                out.push_str("</blockquote>");
            }
            RichTextSection::RichTextPreformatted(sub) => {
                out.push_str("<pre><code>");
                for element in &sub.elements {
                    if let RichTextElement::Text { text, .. } = element {
                        out.push_str(&escape_html(text));
                    }
                }
                out.push_str("</code></pre>");
            }
            RichTextSection::RichTextList(_) => {
                render_list_run(conv, std::slice::from_ref(section), out, mentions).await;
            }
            RichTextSection::Unknown => {}
        }
    })
}

/// Render a run of sibling list sections, nesting by `indent`: a list with
/// a deeper indent belongs inside the last item of the list before it.
async fn render_list_run(
    conv: &Converter<'_>,
    sections: &[RichTextSection],
    out: &mut String,
    mentions: &mut RenderedMentions,
) {
    let lists: Vec<&RichTextList> = sections
        .iter()
        .filter_map(|section| match section {
            RichTextSection::RichTextList(list) => Some(list),
            _ => None,
        })
        .collect();
    let mut pos = 0;
    while pos < lists.len() {
        let indent = lists[pos].indent;
        render_lists_at(conv, &lists, &mut pos, indent, out, mentions).await;
    }
}

fn render_lists_at<'a>(
    conv: &'a Converter<'a>,
    lists: &'a [&'a RichTextList],
    pos: &'a mut usize,
    indent: u8,
    out: &'a mut String,
    mentions: &'a mut RenderedMentions,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        while *pos < lists.len() && lists[*pos].indent >= indent {
            if lists[*pos].indent > indent {
                // Deeper run with no parent item; render at its own depth.
                let deeper = lists[*pos].indent;
                render_lists_at(conv, lists, pos, deeper, out, mentions).await;
                continue;
            }
            let list = lists[*pos];
            *pos += 1;
            let ordered = list.style == "ordered";
            if ordered {
                // `offset` is 0-based; HTML `start` is 1-based.
                if list.offset > 0 {
                    out.push_str(&format!("<ol start=\"{}\">", list.offset + 1));
                } else {
                    out.push_str("<ol>");
                }
            } else {
                out.push_str("<ul>");
            }
            let last = list.elements.len().saturating_sub(1);
            for (i, item) in list.elements.iter().enumerate() {
                out.push_str("<li>");
                if let RichTextSection::RichTextSection(sub) = item {
                    render_elements(conv, &sub.elements, out, mentions).await;
                } else {
                    render_section(conv, item, out, mentions).await;
                }
                if i == last {
                    // Deeper runs that follow nest inside the last item.
                    while *pos < lists.len() && lists[*pos].indent > indent {
                        let deeper = lists[*pos].indent;
                        render_lists_at(conv, lists, pos, deeper, out, mentions).await;
                    }
                }
                out.push_str("</li>");
            }
            out.push_str(if ordered { "</ol>" } else { "</ul>" });
        }
    })
}

async fn render_elements(
    conv: &Converter<'_>,
    elements: &[RichTextElement],
    out: &mut String,
    mentions: &mut RenderedMentions,
) {
    let mut last_was_notice = false;
    for element in elements {
        match element {
            RichTextElement::Unknown => {
                if !last_was_notice {
                    out.push_str("<i>Unsupported element</i>");
                    last_was_notice = true;
                }
                continue;
            }
            RichTextElement::Text { text, style } => {
                render_styled_text(text, *style, out);
            }
            RichTextElement::Link { url, text, style } => {
                let label = text.as_deref().unwrap_or(url.as_str());
                let (open, close) = style_tags(*style);
                out.push_str(&open);
                out.push_str("<a href=\"");
                out.push_str(&escape_html(url));
                out.push_str("\">");
                out.push_str(&escape_html(label));
                out.push_str("</a>");
                out.push_str(&close);
            }
            RichTextElement::User { user_id } => {
                let mxid = conv.puppets.ghost_mxid(conv.team_id, user_id);
                let name = conv
                    .puppets
                    .cached_display_name(conv.team_id, user_id)
                    .unwrap_or_else(|| user_id.clone());
                out.push_str(&format!(
                    "<a href=\"https://matrix.to/#/{}\">{}</a>",
                    mxid,
                    escape_html(&name)
                ));
                mentions.users.push(mxid);
            }
            RichTextElement::Usergroup { usergroup_id } => {
                out.push_str(&escape_html(&format!("@{}", usergroup_id)));
            }
            RichTextElement::Channel { channel_id } => {
                let key = sb_ids::PortalKey::new(conv.team_id, channel_id);
                let portal = crate::db::portal::get_portal(conv.db, &key).ok().flatten();
                let name = portal
                    .as_ref()
                    .map_or_else(|| channel_id.clone(), |p| p.name.clone());
                match portal.and_then(|p| p.mxid) {
                    Some(room) => out.push_str(&format!(
                        "<a href=\"https://matrix.to/#/{}\">#{}</a>",
                        room,
                        escape_html(&name)
                    )),
                    None => out.push_str(&format!("#{}", escape_html(&name))),
                }
            }
            RichTextElement::Broadcast { .. } => {
                out.push_str("@room");
                mentions.room = true;
            }
            RichTextElement::Emoji { name, unicode } => {
                render_emoji(conv, name, unicode.as_deref(), out).await;
            }
            RichTextElement::Color { value } => {
                out.push_str(&escape_html(value));
            }
        }
        last_was_notice = false;
    }
}

fn render_styled_text(text: &str, style: Option<RichTextStyle>, out: &mut String) {
    let (open, close) = style_tags(style);
    out.push_str(&open);
    out.push_str(&escape_html(text).replace('\n', "<br>"));
    out.push_str(&close);
}

fn style_tags(style: Option<RichTextStyle>) -> (String, String) {
    let Some(style) = style else {
        return (String::new(), String::new());
    };
    let mut open = String::new();
    let mut close = String::new();
    if style.bold {
        open.push_str("<strong>");
        close.insert_str(0, "</strong>");
    }
    if style.italic {
        open.push_str("<em>");
        close.insert_str(0, "</em>");
    }
    if style.strike {
        open.push_str("<del>");
        close.insert_str(0, "</del>");
    }
    if style.code {
        open.push_str("<code>");
        close.insert_str(0, "</code>");
    }
    (open, close)
}

async fn render_emoji(conv: &Converter<'_>, name: &str, unicode: Option<&str>, out: &mut String) {
    if let Some(hex) = unicode {
        if let Some(glyph) = unicode_from_hex(hex) {
            out.push_str(&glyph);
            return;
        }
    }
    match conv.emoji.resolve(conv.client, conv.team_id, name).await {
        Ok(Some(ResolvedEmoji::Unicode(glyph))) => out.push_str(&glyph),
        Ok(Some(ResolvedEmoji::Custom { mxc, shortcode })) => {
            out.push_str(&format!(
                "<img data-mx-emoticon src=\"{}\" alt=\":{}:\" title=\":{}:\" height=\"32\">",
                escape_html(&mxc),
                escape_html(&shortcode),
                escape_html(&shortcode)
            ));
        }
        Ok(None) => out.push_str(&format!(":{}:", escape_html(name))),
        Err(e) => {
            warn!(name, error = %e, "emoji resolution failed");
            out.push_str(&format!(":{}:", escape_html(name)));
        }
    }
}

/// `"1f604"` or `"1f3f3-fe0f"` → the glyph.
fn unicode_from_hex(hex: &str) -> Option<String> {
    let mut glyph = String::new();
    for part in hex.split('-') {
        let cp = u32::from_str_radix(part, 16).ok()?;
        glyph.push(char::from_u32(cp)?);
    }
    Some(glyph)
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

async fn render_attachment(
    conv: &Converter<'_>,
    attachment: &Attachment,
    out: &mut String,
    mentions: &mut RenderedMentions,
) {
    if attachment.is_msg_unfurl {
        render_message_unfurl(conv, attachment, out, mentions).await;
        return;
    }

    if !attachment.pretext.is_empty() {
        out.push_str("<p>");
        out.push_str(&mrkdwn_to_html(conv, &attachment.pretext));
        out.push_str("</p>");
    }
    out.push_str("<blockquote>");
    if !attachment.author_name.is_empty() {
        if attachment.author_link.is_empty() {
            out.push_str(&format!("<b>{}</b><br>", escape_html(&attachment.author_name)));
        } else {
            out.push_str(&format!(
                "<b><a href=\"{}\">{}</a></b><br>",
                escape_html(&attachment.author_link),
                escape_html(&attachment.author_name)
            ));
        }
    }
    if !attachment.title.is_empty() {
        if attachment.title_link.is_empty() {
            out.push_str(&format!("<b>{}</b><br>", escape_html(&attachment.title)));
        } else {
            out.push_str(&format!(
                "<b><a href=\"{}\">{}</a></b><br>",
                escape_html(&attachment.title_link),
                escape_html(&attachment.title)
            ));
        }
    }
    if !attachment.text.is_empty() {
        out.push_str(&mrkdwn_to_html(conv, &attachment.text));
    } else if !attachment.fallback.is_empty() {
        out.push_str(&escape_html(&attachment.fallback));
    }
    render_attachment_fields(conv, &attachment.fields, out);
    render_attachment_footer(attachment, out);
    out.push_str("</blockquote>");
}

async fn render_message_unfurl(
    conv: &Converter<'_>,
    attachment: &Attachment,
    out: &mut String,
    mentions: &mut RenderedMentions,
) {
    out.push_str("<blockquote>");
    let author = attachment
        .author_id
        .as_ref()
        .and_then(|id| conv.puppets.cached_display_name(conv.team_id, id))
        .unwrap_or_else(|| attachment.author_name.clone());
    if !author.is_empty() {
        out.push_str(&format!("<b>{}</b><br>", escape_html(&author)));
    }
    for wrapper in &attachment.message_blocks {
        render_blocks(conv, &wrapper.message.blocks, out, mentions).await;
    }
    if !attachment.from_url.is_empty() {
        out.push_str(&format!(
            "<a href=\"{}\">View message</a>",
            escape_html(&attachment.from_url)
        ));
    }
    out.push_str("</blockquote>");
}

/// Two-column field table. Short fields pair with the next short field on
/// the same row; long fields take a row alone.
fn render_attachment_fields(conv: &Converter<'_>, fields: &[AttachmentField], out: &mut String) {
    if fields.is_empty() {
        return;
    }
    out.push_str("<table>");
    let mut pending: Option<&AttachmentField> = None;
    let mut emit_row = |cells: &[&AttachmentField], out: &mut String| {
        out.push_str("<tr>");
        for field in cells {
            out.push_str("<td><b>");
            out.push_str(&escape_html(&field.title));
            out.push_str("</b><br>");
            out.push_str(&mrkdwn_to_html(conv, &field.value));
            out.push_str("</td>");
        }
        out.push_str("</tr>");
    };
    for field in fields {
        if field.short {
            match pending.take() {
                Some(prev) => emit_row(&[prev, field], out),
                None => pending = Some(field),
            }
        } else {
            if let Some(prev) = pending.take() {
                emit_row(&[prev], out);
            }
            emit_row(&[field], out);
        }
    }
    if let Some(prev) = pending.take() {
        emit_row(&[prev], out);
    }
    out.push_str("</table>");
}

fn render_attachment_footer(attachment: &Attachment, out: &mut String) {
    let ts_text = attachment.ts_string().map(|ts| {
        sb_ids::parse_slack_ts(&ts)
            .format("%Y-%m-%d %H:%M")
            .to_string()
    });
    match (attachment.footer.is_empty(), &ts_text) {
        (false, Some(ts)) => out.push_str(&format!(
            "<br><sup>{} | {}</sup>",
            escape_html(&attachment.footer),
            ts
        )),
        (false, None) => out.push_str(&format!("<br><sup>{}</sup>", escape_html(&attachment.footer))),
        (true, Some(ts)) => out.push_str(&format!("<br><sup>{}</sup>", ts)),
        (true, None) => {}
    }
}

// ---------------------------------------------------------------------------
// Plain-body derivation
// ---------------------------------------------------------------------------

/// Strip the rendered HTML down to a plain-text fallback body.
pub fn html_to_plain(html: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    let mut tag = String::new();
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag
                    .trim_start_matches('/')
                    .split([' ', '\t'])
                    .next()
                    .unwrap_or("");
                if matches!(name, "br" | "p" | "tr" | "li" | "blockquote" | "pre" | "h1" | "hr")
                    && tag.starts_with('/') != (name == "br" || name == "hr")
                {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
            }
            _ if in_tag => tag.push(c),
            _ => out.push(c),
        }
    }
    unescape_entities(out.trim_matches('\n'))
}

fn unescape_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}
