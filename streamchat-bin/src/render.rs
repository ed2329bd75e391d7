use std::fmt::Write as _;

use streamchat_core::model::{
    Bookmark, Conversation, Message, Role, SectionIcon, StructuredPayload,
};

fn glyph(icon: SectionIcon) -> &'static str {
    match icon {
        SectionIcon::Eye => "◉",
        SectionIcon::Image => "▣",
        SectionIcon::Waves => "≈",
        SectionIcon::Thread => "⟡",
    }
}

fn speaker(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "assistant",
    }
}

/// Plain-text rendering of a finished structured reply.
pub fn render_payload(p: &StructuredPayload) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "  {}", p.analysis);
    for section in p.sections.iter().flatten() {
        let _ = writeln!(out, "\n  {} {}", glyph(section.icon()), section.title);
        if let Some(content) = &section.content {
            let _ = writeln!(out, "    {content}");
        }
        for item in section.items.iter().flatten() {
            let _ = writeln!(out, "    - {item}");
        }
    }
    if let Some(closing) = &p.closing {
        let _ = writeln!(out, "\n  {closing}");
    }
    if let Some(response) = &p.authentic_response {
        let _ = writeln!(out, "\n  {response}");
    }
    if let Some(meta) = &p.meta_awareness {
        let _ = writeln!(out, "  ({meta})");
    }
    if let Some(score) = p.resonance_score {
        let _ = writeln!(out, "  resonance {score}/100");
    }
    out
}

pub fn render_message(m: &Message) -> String {
    match &m.payload {
        Some(p) => format!("{}:\n{}", speaker(m.role), render_payload(p)),
        None => format!("{}: {}\n", speaker(m.role), m.raw_content),
    }
}

pub fn render_conversation(c: &Conversation) -> String {
    format!("{}  {}", c.id, c.title)
}

pub fn render_bookmark(b: &Bookmark) -> String {
    format!("{}  {}", b.message_id, b.created_at_ms)
}
