//! Matrix HTML → Slack rich-text block tree.
//!
//! The parser walks the rcdom tree with a by-value context carrying the
//! active style bits and link, so sibling branches cannot leak style into
//! each other. Block-level tags flush the current inline run into a
//! section; inline tags only mutate the context.

use super::Converter;
use super::urls::find_urls;
use crate::db;
use html5ever::driver::ParseOpts;
use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use sb_slack::blocks::{
    RichTextElement, RichTextList, RichTextSection, RichTextStyle, RichTextSubsection,
};

const MATRIX_TO_PREFIX: &str = "https://matrix.to/#/";

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Parse a Matrix HTML body into rich-text sections.
pub fn parse_html(conv: &Converter<'_>, html: &str) -> Vec<RichTextSection> {
    let dom: RcDom = parse_document(RcDom::default(), ParseOpts::default()).one(html);
    let mut builder = TreeBuilder::default();
    walk_children(conv, &dom.document, Ctx::default(), &mut builder);
    builder.finish()
}

/// Plain text (no markup) into a single text-element section.
pub fn plain_text_section(text: &str) -> Vec<RichTextSection> {
    vec![RichTextSection::RichTextSection(RichTextSubsection {
        elements: vec![RichTextElement::Text {
            text: text.to_owned(),
            style: None,
        }],
        border: 0,
    })]
}

// ---------------------------------------------------------------------------
// Visitor context (passed by value)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Ctx {
    style: RichTextStyle,
    link: Option<String>,
    quote_depth: u8,
}

impl Ctx {
    fn styled(&self, apply: impl FnOnce(&mut RichTextStyle)) -> Ctx {
        let mut next = self.clone();
        apply(&mut next.style);
        next
    }
}

// ---------------------------------------------------------------------------
// Section builder
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TreeBuilder {
    sections: Vec<RichTextSection>,
    current: Vec<RichTextElement>,
}

impl TreeBuilder {
    fn push_inline(&mut self, element: RichTextElement) {
        self.current.push(element);
    }

    fn flush(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let elements = std::mem::take(&mut self.current);
        self.sections
            .push(RichTextSection::RichTextSection(RichTextSubsection {
                elements,
                border: 0,
            }));
    }

    fn push_section(&mut self, section: RichTextSection) {
        self.flush();
        self.sections.push(section);
    }

    fn finish(mut self) -> Vec<RichTextSection> {
        self.flush();
        self.sections
    }
}

// ---------------------------------------------------------------------------
// Tree walk
// ---------------------------------------------------------------------------

fn walk_children(conv: &Converter<'_>, node: &Handle, ctx: Ctx, builder: &mut TreeBuilder) {
    for child in node.children.borrow().iter() {
        walk(conv, child, ctx.clone(), builder);
    }
}

fn walk(conv: &Converter<'_>, node: &Handle, ctx: Ctx, builder: &mut TreeBuilder) {
    match &node.data {
        NodeData::Text { contents } => {
            emit_text(&contents.borrow(), &ctx, builder);
        }
        NodeData::Element { name, attrs, .. } => {
            let tag: &str = &name.local;
            match tag {
                // Structural containers from the fragment wrapping.
                "html" | "body" | "head" | "div" | "span" => {
                    walk_children(conv, node, ctx, builder);
                }
                // The reply fallback is re-derived from relations, never
                // from the quoted HTML.
                "mx-reply" => {}
                "b" | "strong" => {
                    walk_children(conv, node, ctx.styled(|s| s.bold = true), builder);
                }
                "i" | "em" => {
                    walk_children(conv, node, ctx.styled(|s| s.italic = true), builder);
                }
                "del" | "s" | "strike" => {
                    walk_children(conv, node, ctx.styled(|s| s.strike = true), builder);
                }
                "code" => {
                    walk_children(conv, node, ctx.styled(|s| s.code = true), builder);
                }
                "a" => {
                    let href = attr_value(attrs, "href");
                    match href {
                        Some(href) => emit_link(conv, node, &href, &ctx, builder),
                        None => walk_children(conv, node, ctx, builder),
                    }
                }
                "br" => builder.push_inline(RichTextElement::Text {
                    text: "\n".to_owned(),
                    style: style_of(&ctx),
                }),
                "p" => {
                    builder.flush();
                    walk_children(conv, node, ctx, builder);
                    builder.flush();
                }
                "blockquote" => {
                    builder.flush();
                    let mut inner = TreeBuilder::default();
                    let inner_ctx = Ctx {
                        quote_depth: ctx.quote_depth + 1,
                        ..ctx.clone()
                    };
                    walk_children(conv, node, inner_ctx, &mut inner);
                    let border = u8::from(ctx.quote_depth > 0);
                    for section in inner.finish() {
                        builder.push_section(quote_of(section, border));
                    }
                }
                "pre" => {
                    builder.flush();
                    let text = collect_text(node);
                    builder.push_section(RichTextSection::RichTextPreformatted(
                        RichTextSubsection {
                            elements: vec![RichTextElement::Text {
                                text: text.trim_end_matches('\n').to_owned(),
                                style: None,
                            }],
                            border: 0,
                        },
                    ));
                }
                "ol" | "ul" => {
                    builder.flush();
                    for section in build_list(conv, node, tag == "ol", attrs, &ctx, 0) {
                        builder.push_section(section);
                    }
                }
                "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                    builder.flush();
                    let bold = ctx.styled(|s| s.bold = true);
                    builder.push_inline(RichTextElement::Text {
                        text: "### ".to_owned(),
                        style: style_of(&bold),
                    });
                    walk_children(conv, node, bold, builder);
                    builder.flush();
                }
                "hr" => {
                    builder.flush();
                    builder.push_inline(RichTextElement::Text {
                        text: "---".to_owned(),
                        style: None,
                    });
                    builder.flush();
                }
                "img" => {
                    // Inline custom emoji round-trip back to their shortcode.
                    if let Some(alt) = attr_value(attrs, "alt") {
                        emit_text(&alt, &ctx, builder);
                    }
                }
                _ => walk_children(conv, node, ctx, builder),
            }
        }
        _ => walk_children(conv, node, ctx, builder),
    }
}

// ---------------------------------------------------------------------------
// Inline emitters
// ---------------------------------------------------------------------------

fn emit_text(text: &str, ctx: &Ctx, builder: &mut TreeBuilder) {
    if text.is_empty() {
        return;
    }
    if let Some(url) = &ctx.link {
        builder.push_inline(RichTextElement::Link {
            url: url.clone(),
            text: Some(text.to_owned()),
            style: style_of(ctx),
        });
        return;
    }
    // Free-text URL detection does not apply inside code spans.
    let matches = if ctx.style.code {
        Vec::new()
    } else {
        find_urls(text)
    };
    let mut cursor = 0;
    for m in matches {
        if m.start > cursor {
            emit_plain(&text[cursor..m.start], ctx, builder);
        }
        builder.push_inline(RichTextElement::Link {
            url: m.url,
            text: Some(text[m.start..m.end].to_owned()),
            style: style_of(ctx),
        });
        cursor = m.end;
    }
    if cursor < text.len() {
        emit_plain(&text[cursor..], ctx, builder);
    }
}

/// Plain run; `@room` tokens become broadcast elements.
fn emit_plain(text: &str, ctx: &Ctx, builder: &mut TreeBuilder) {
    let mut rest = text;
    while let Some(at) = rest.find("@room") {
        let before = &rest[..at];
        if !before.is_empty() {
            builder.push_inline(RichTextElement::Text {
                text: before.to_owned(),
                style: style_of(ctx),
            });
        }
        builder.push_inline(RichTextElement::Broadcast {
            range: "channel".to_owned(),
        });
        rest = &rest[at + "@room".len()..];
    }
    if !rest.is_empty() {
        builder.push_inline(RichTextElement::Text {
            text: rest.to_owned(),
            style: style_of(ctx),
        });
    }
}

fn emit_link(
    conv: &Converter<'_>,
    node: &Handle,
    href: &str,
    ctx: &Ctx,
    builder: &mut TreeBuilder,
) {
    if let Some(target) = href.strip_prefix(MATRIX_TO_PREFIX) {
        let target = target.split('?').next().unwrap_or(target);
        if target.starts_with('@') {
            if let Some(user_id) = conv.parse_ghost_mxid(target) {
                builder.push_inline(RichTextElement::User { user_id });
                return;
            }
        }
        if target.starts_with('!') || target.starts_with('#') {
            let room = target.split('/').next().unwrap_or(target);
            if let Some(portal) = db::portal::get_portal_by_mxid(conv.db, room).ok().flatten() {
                builder.push_inline(RichTextElement::Channel {
                    channel_id: portal.channel_id,
                });
                return;
            }
        }
    }
    let link_ctx = Ctx {
        link: Some(href.to_owned()),
        ..ctx.clone()
    };
    walk_children(conv, node, link_ctx, builder);
}

// ---------------------------------------------------------------------------
// Block helpers
// ---------------------------------------------------------------------------

/// Build the sibling-list run for one `<ol>`/`<ul>`.
///
/// Nesting is encoded as sibling lists with increasing `indent`: a nested
/// list splits its parent, so items before it flush as one list, the nested
/// run follows at `indent + 1`, and later items continue at the parent
/// indent with the offset advanced past the flushed items.
fn build_list(
    conv: &Converter<'_>,
    node: &Handle,
    ordered: bool,
    attrs: &std::cell::RefCell<Vec<html5ever::Attribute>>,
    ctx: &Ctx,
    indent: u8,
) -> Vec<RichTextSection> {
    // HTML `start` is 1-based; the wire `offset` is 0-based.
    let base_offset = attr_value(attrs, "start")
        .and_then(|s| s.parse::<u32>().ok())
        .map_or(0, |start| start.saturating_sub(1));
    let mut run: Vec<RichTextSection> = Vec::new();
    let mut pending: Vec<RichTextSection> = Vec::new();
    let mut emitted: u32 = 0;

    for child in node.children.borrow().iter() {
        let NodeData::Element { name, .. } = &child.data else {
            continue;
        };
        if &*name.local != "li" {
            continue;
        }
        let mut inner = TreeBuilder::default();
        let mut nested_runs: Vec<Vec<RichTextSection>> = Vec::new();
        for li_child in child.children.borrow().iter() {
            if let NodeData::Element { name, attrs, .. } = &li_child.data {
                let tag: &str = &name.local;
                if tag == "ol" || tag == "ul" {
                    nested_runs.push(build_list(
                        conv,
                        li_child,
                        tag == "ol",
                        attrs,
                        ctx,
                        indent + 1,
                    ));
                    continue;
                }
            }
            walk(conv, li_child, ctx.clone(), &mut inner);
        }
        // One section per item; multi-section items keep their first.
        let mut sections = inner.finish();
        if sections.is_empty() {
            sections.push(RichTextSection::RichTextSection(
                RichTextSubsection::default(),
            ));
        }
        pending.push(sections.remove(0));
        if !nested_runs.is_empty() {
            flush_list_segment(&mut run, &mut pending, ordered, indent, base_offset, &mut emitted);
            for nested in nested_runs {
                run.extend(nested);
            }
        }
    }
    flush_list_segment(&mut run, &mut pending, ordered, indent, base_offset, &mut emitted);
    run
}

fn flush_list_segment(
    run: &mut Vec<RichTextSection>,
    pending: &mut Vec<RichTextSection>,
    ordered: bool,
    indent: u8,
    base_offset: u32,
    emitted: &mut u32,
) {
    if pending.is_empty() {
        return;
    }
    let elements = std::mem::take(pending);
    let offset = if ordered { base_offset + *emitted } else { 0 };
    *emitted += elements.len() as u32;
    run.push(RichTextSection::RichTextList(RichTextList {
        elements,
        style: if ordered { "ordered" } else { "bullet" }.to_owned(),
        indent,
        offset,
        border: 0,
    }));
}

fn quote_of(section: RichTextSection, border: u8) -> RichTextSection {
    match section {
        RichTextSection::RichTextSection(mut sub) => {
            sub.border = border;
            RichTextSection::RichTextQuote(sub)
        }
        other => other,
    }
}

fn collect_text(node: &Handle) -> String {
    let mut out = String::new();
    collect_text_into(node, &mut out);
    out
}

fn collect_text_into(node: &Handle, out: &mut String) {
    match &node.data {
        NodeData::Text { contents } => out.push_str(&contents.borrow()),
        _ => {
            for child in node.children.borrow().iter() {
                collect_text_into(child, out);
            }
        }
    }
}

fn style_of(ctx: &Ctx) -> Option<RichTextStyle> {
    if ctx.style.is_plain() {
        None
    } else {
        Some(ctx.style)
    }
}

fn attr_value(
    attrs: &std::cell::RefCell<Vec<html5ever::Attribute>>,
    name: &str,
) -> Option<String> {
    attrs
        .borrow()
        .iter()
        .find(|a| &*a.name.local == name)
        .map(|a| a.value.to_string())
}
