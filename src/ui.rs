use std::fmt::Write as _;

use crossterm::style::{Color, Stylize};
use textwrap::{wrap, Options as WrapOptions};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::notify::{Level, Notification};
use crate::render::{CategoryCard, DetailView, DisplayCard, Gallery, ImageCard};

const MIN_WIDTH: usize = 24;

/// Terminal output settings.
#[derive(Debug, Clone, Copy)]
pub struct Style {
    pub width: usize,
    pub color: bool,
}

impl Style {
    fn width(&self) -> usize {
        self.width.max(MIN_WIDTH)
    }
}

pub fn parse_hex_color(raw: &str) -> Option<Color> {
    let hex = raw.trim().strip_prefix('#')?;
    if !hex.is_ascii() {
        return None;
    }
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return None,
    };
    let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).ok();
    Some(Color::Rgb {
        r: channel(0)?,
        g: channel(2)?,
        b: channel(4)?,
    })
}

fn chip(label: &str, color: &str, style: Style) -> String {
    let text = format!("[{}]", label);
    match (style.color, parse_hex_color(color)) {
        (true, Some(c)) => text.with(c).bold().to_string(),
        _ => text,
    }
}

fn heading(text: &str, style: Style) -> String {
    if style.color {
        text.bold().to_string()
    } else {
        text.to_string()
    }
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    let budget = width.saturating_sub(1);
    let mut used = 0usize;
    let mut out = String::new();
    for ch in text.chars() {
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        out.push(ch);
    }
    out.push('…');
    out
}

fn wrap_with_prefixes(text: &str, width: usize, first_prefix: &str, rest_prefix: &str) -> Vec<String> {
    let min_width = first_prefix
        .chars()
        .count()
        .max(rest_prefix.chars().count())
        .saturating_add(1);
    let options = WrapOptions::new(width.max(min_width))
        .break_words(false)
        .initial_indent(first_prefix)
        .subsequent_indent(rest_prefix);
    wrap(text, options)
        .into_iter()
        .map(|cow| cow.into_owned())
        .collect()
}

pub fn format_card(card: &ImageCard, style: Style) -> String {
    let width = style.width();
    let mut out = String::new();
    let _ = writeln!(out, "{}", heading(&truncate_to_width(&card.title, width), style));
    for line in wrap_with_prefixes(&card.description, width, "  ", "  ") {
        let _ = writeln!(out, "{}", line);
    }
    let _ = writeln!(
        out,
        "  {}  views {}  downloads {}  {}",
        chip(&card.category_name, &card.category_color, style),
        card.view_count,
        card.download_count,
        card.created_at.format("%Y-%m-%d"),
    );
    let _ = writeln!(out, "  id {}", card.id);
    let _ = writeln!(out, "  {}", card.image_url);
    out
}

pub fn format_cards(cards: &[DisplayCard], style: Style) -> String {
    let mut out = String::new();
    for (idx, card) in cards.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        match card {
            DisplayCard::Image(card) => out.push_str(&format_card(card, style)),
            DisplayCard::Empty(empty) => {
                let _ = writeln!(out, "{}", heading(empty.headline(), style));
                let _ = writeln!(out, "  {}", empty.hint());
            }
        }
    }
    out
}

pub fn format_detail(detail: &DetailView, style: Style) -> String {
    let mut out = format_card(&detail.card, style);
    if let Some(owner) = &detail.owner {
        let _ = writeln!(out, "  by {}", owner);
    }
    let _ = writeln!(out, "  share {}", detail.share_url);

    let width = style.width();
    match &detail.tags_empty {
        Some(label) => {
            let _ = writeln!(out, "  tags: {}", label);
        }
        None => {
            let joined = detail
                .tags
                .iter()
                .map(|t| format!("#{}", t))
                .collect::<Vec<_>>()
                .join(" ");
            for line in wrap_with_prefixes(&joined, width, "  tags: ", "        ") {
                let _ = writeln!(out, "{}", line);
            }
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", heading("Comments", style));
    if let Some(label) = &detail.comments_empty {
        let _ = writeln!(out, "  {}", label);
    }
    for comment in &detail.comments {
        let _ = writeln!(
            out,
            "  {} ({})",
            comment.author,
            comment.created_at.format("%Y-%m-%d")
        );
        for line in wrap_with_prefixes(&comment.content, width, "    ", "    ") {
            let _ = writeln!(out, "{}", line);
        }
    }
    out
}

pub fn format_gallery(gallery: &Gallery, style: Style) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}",
        heading(
            &format!(
                "{} images  {} views  {} downloads",
                gallery.stats.images, gallery.stats.views, gallery.stats.downloads
            ),
            style
        )
    );
    out.push('\n');
    out.push_str(&format_cards(&gallery.cards, style));
    out
}

pub fn format_categories(cards: &[CategoryCard], style: Style) -> String {
    let width = style.width();
    let name_width = cards
        .iter()
        .map(|c| UnicodeWidthStr::width(c.name.as_str()))
        .max()
        .unwrap_or(0);
    let mut out = String::new();
    for card in cards {
        let pad = " ".repeat(name_width - UnicodeWidthStr::width(card.name.as_str()));
        let _ = writeln!(
            out,
            "{}{}  {:>4}  {}",
            chip(&card.name, &card.color, style),
            pad,
            card.image_count,
            card.id
        );
        if !card.description.trim().is_empty() {
            for line in wrap_with_prefixes(&card.description, width, "    ", "    ") {
                let _ = writeln!(out, "{}", line);
            }
        }
    }
    out
}

pub fn format_notification(notification: &Notification, style: Style) -> String {
    let label = format!("[{}]", notification.level.label());
    let label = if style.color {
        match notification.level {
            Level::Error => label.red().to_string(),
            Level::Success => label.green().to_string(),
            Level::Info => label.blue().to_string(),
        }
    } else {
        label
    };
    format!("{} {}", label, notification.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::EmptyState;
    use chrono::{TimeZone, Utc};

    const PLAIN: Style = Style {
        width: 48,
        color: false,
    };

    fn card() -> ImageCard {
        ImageCard {
            id: "a1".into(),
            title: "Harbour at dusk".into(),
            description: "Boats resting in the harbour while the lights come on across the bay".into(),
            image_url: "https://cdn.test/u1/a1.jpg".into(),
            category_name: "Travel".into(),
            category_color: "#06B6D4".into(),
            view_count: 12,
            download_count: 4,
            created_at: Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn parses_short_and_long_hex() {
        assert!(matches!(
            parse_hex_color("#fff"),
            Some(Color::Rgb {
                r: 255,
                g: 255,
                b: 255
            })
        ));
        assert!(matches!(
            parse_hex_color("#3b82f6"),
            Some(Color::Rgb {
                r: 0x3b,
                g: 0x82,
                b: 0xf6
            })
        ));
        assert!(parse_hex_color("blue").is_none());
    }

    #[test]
    fn card_wraps_description_within_width() {
        let text = format_card(&card(), PLAIN);
        assert!(text.contains("[Travel]  views 12  downloads 4  2024-05-02"));
        for line in text.lines().filter(|l| !l.contains("https://")) {
            assert!(UnicodeWidthStr::width(line) <= 48, "line too wide: {line:?}");
        }
    }

    #[test]
    fn detail_prints_tags_and_comments() {
        use crate::render::CommentCard;

        let mut detail = DetailView {
            card: card(),
            owner: Some("sam@example.com".into()),
            share_url: "https://pics.test/?image=a1".into(),
            tags: vec!["harbour".into(), "night".into()],
            tags_empty: None,
            comments: vec![CommentCard {
                author: "ana@example.com".into(),
                content: "Great light".into(),
                created_at: Utc.with_ymd_and_hms(2024, 5, 3, 8, 0, 0).unwrap(),
            }],
            comments_empty: None,
        };
        let text = format_detail(&detail, PLAIN);
        assert!(text.contains("tags: #harbour #night"));
        assert!(text.contains("ana@example.com (2024-05-03)"));
        assert!(text.contains("    Great light"));

        detail.tags.clear();
        detail.tags_empty = Some("No tags".into());
        detail.comments.clear();
        detail.comments_empty = Some("No comments yet".into());
        let text = format_detail(&detail, PLAIN);
        assert!(text.contains("tags: No tags"));
        assert!(text.contains("  No comments yet"));
    }

    #[test]
    fn empty_marker_prints_hint() {
        let text = format_cards(&[DisplayCard::Empty(EmptyState::NoMatches)], PLAIN);
        assert!(text.starts_with("No images"));
        assert!(text.contains(EmptyState::NoMatches.hint()));
    }

    #[test]
    fn truncates_wide_titles() {
        let out = truncate_to_width("写真写真写真写真", 7);
        assert!(UnicodeWidthStr::width(out.as_str()) <= 7);
        assert!(out.ends_with('…'));
    }
}
