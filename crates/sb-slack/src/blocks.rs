//! Block Kit message structure.
//!
//! Only the block and element kinds the bridge renders are modeled; anything
//! else deserializes into the `Unknown` catch-all so one exotic block never
//! rejects a whole message.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    RichText(RichTextBlock),
    Section(SectionBlock),
    Header(HeaderBlock),
    Divider(DividerBlock),
    Context(ContextBlock),
    Image(ImageBlock),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RichTextBlock {
    #[serde(default)]
    pub elements: Vec<RichTextSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextObject>,
    #[serde(default)]
    pub fields: Vec<TextObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderBlock {
    pub text: TextObject,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DividerBlock {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    #[serde(default)]
    pub elements: Vec<ContextElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub alt_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<TextObject>,
}

/// `plain_text` or `mrkdwn` text object used by section/header/context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextObject {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

/// Context blocks mix text objects and images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextElement {
    PlainText { text: String },
    Mrkdwn { text: String },
    Image { image_url: String, alt_text: String },
    #[serde(other)]
    Unknown,
}

// ---------------------------------------------------------------------------
// Rich text sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RichTextSection {
    RichTextSection(RichTextSubsection),
    RichTextQuote(RichTextSubsection),
    RichTextPreformatted(RichTextSubsection),
    RichTextList(RichTextList),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RichTextSubsection {
    #[serde(default)]
    pub elements: Vec<RichTextElement>,
    /// Quote nesting depth; 0 or 1 on the wire today.
    #[serde(default)]
    pub border: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RichTextList {
    #[serde(default)]
    pub elements: Vec<RichTextSection>,
    /// `"ordered"` or `"bullet"`.
    #[serde(default)]
    pub style: String,
    /// Nesting depth; a sibling list with a deeper indent nests under the
    /// previous list's last item.
    #[serde(default)]
    pub indent: u8,
    /// 0-based start offset for ordered lists (`offset: 2` renders as 3.).
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub border: u8,
}

// ---------------------------------------------------------------------------
// Inline elements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RichTextElement {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        style: Option<RichTextStyle>,
    },
    Emoji {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unicode: Option<String>,
    },
    Link {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        style: Option<RichTextStyle>,
    },
    User {
        user_id: String,
    },
    Usergroup {
        usergroup_id: String,
    },
    Channel {
        channel_id: String,
    },
    /// `@here` / `@channel` / `@everyone`.
    Broadcast {
        range: String,
    },
    Color {
        value: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichTextStyle {
    #[serde(default, skip_serializing_if = "is_false")]
    pub bold: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub italic: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub strike: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub code: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(v: &bool) -> bool {
    !*v
}

impl RichTextStyle {
    pub fn bold() -> Self {
        RichTextStyle {
            bold: true,
            ..Self::default()
        }
    }

    pub fn merge(self, other: RichTextStyle) -> RichTextStyle {
        RichTextStyle {
            bold: self.bold || other.bold,
            italic: self.italic || other.italic,
            strike: self.strike || other.strike,
            code: self.code || other.code,
        }
    }

    pub fn is_plain(self) -> bool {
        self == RichTextStyle::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rich_text_block_deserializes() {
        let json = r#"{
            "type": "rich_text",
            "elements": [{
                "type": "rich_text_section",
                "elements": [
                    {"type": "text", "text": "hello ", "style": {"bold": true}},
                    {"type": "user", "user_id": "U123"},
                    {"type": "emoji", "name": "smile", "unicode": "1f604"}
                ]
            }]
        }"#;
        let block: Block = serde_json::from_str(json).unwrap();
        let Block::RichText(rt) = block else {
            panic!("expected rich_text");
        };
        let RichTextSection::RichTextSection(section) = &rt.elements[0] else {
            panic!("expected rich_text_section");
        };
        assert_eq!(section.elements.len(), 3);
        match &section.elements[0] {
            RichTextElement::Text { text, style } => {
                assert_eq!(text, "hello ");
                assert!(style.unwrap().bold);
            }
            other => panic!("unexpected element: {:?}", other),
        }
    }

    #[test]
    fn unknown_block_type_is_tolerated() {
        let block: Block = serde_json::from_str(r#"{"type":"actions","elements":[]}"#).unwrap();
        assert_eq!(block, Block::Unknown);
    }

    #[test]
    fn ordered_list_with_offset() {
        let json = r#"{
            "type": "rich_text_list",
            "style": "ordered",
            "offset": 4,
            "elements": [{"type": "rich_text_section", "elements": [{"type": "text", "text": "five"}]}]
        }"#;
        let section: RichTextSection = serde_json::from_str(json).unwrap();
        let RichTextSection::RichTextList(list) = section else {
            panic!("expected list");
        };
        assert_eq!(list.style, "ordered");
        assert_eq!(list.offset, 4);
    }

    #[test]
    fn style_merge_is_additive() {
        let a = RichTextStyle {
            bold: true,
            ..RichTextStyle::default()
        };
        let b = RichTextStyle {
            code: true,
            ..RichTextStyle::default()
        };
        let merged = a.merge(b);
        assert!(merged.bold && merged.code && !merged.italic);
    }
}
