//! Just enough markup scanning to pull text out of elements picked by a
//! simple `tag`, `.class` or `tag.class` selector. Not an HTML parser: nested
//! elements with the same tag name as the match end at the first close tag.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    tag: Option<String>,
    class: Option<String>,
}

impl Selector {
    pub fn parse(selector: &str) -> Option<Self> {
        let selector = selector.trim();
        let (tag, class) = match selector.split_once('.') {
            Some((tag, class)) => (tag, Some(class)),
            None => (selector, None),
        };
        let valid = |s: &str| {
            !s.is_empty()
                && s
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        };
        let tag = if tag.is_empty() {
            None
        } else if valid(tag) {
            Some(tag.to_ascii_lowercase())
        } else {
            return None;
        };
        let class = match class {
            Some(c) if valid(c) => Some(c.to_string()),
            Some(_) => return None,
            None => None,
        };
        if tag.is_none() && class.is_none() {
            return None;
        }
        Some(Self { tag, class })
    }

    fn matches(&self, tag: &str, attrs: &str) -> bool {
        if self.tag.as_deref().is_some_and(|t| t != tag) {
            return false;
        }
        match &self.class {
            Some(class) => attr_value(attrs, "class")
                .is_some_and(|v| v.split_whitespace().any(|c| c == class)),
            None => true,
        }
    }
}

/// Text content of every element matching `selector`, in document order.
pub fn select_texts(html: &str, selector: &Selector) -> Vec<String> {
    // ASCII lowering keeps byte offsets identical to `html`.
    let lower = html.to_ascii_lowercase();
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(rel) = lower[pos..].find('<') {
        let start = pos + rel;
        let Some(end_rel) = lower[start..].find('>') else {
            break;
        };
        let open_end = start + end_rel + 1;
        pos = open_end;
        let tag_src = &html[start + 1..open_end - 1];
        if tag_src.ends_with('/') {
            continue;
        }
        let Some((tag, attrs)) = split_tag(tag_src) else {
            continue;
        };
        if !selector.matches(&tag, attrs) {
            continue;
        }
        let close = format!("</{tag}");
        let Some(close_rel) = lower[open_end..].find(&close) else {
            continue;
        };
        let inner = &html[open_end..open_end + close_rel];
        out.push(decode_entities(&strip_tags(inner)));
    }
    out
}

fn split_tag(tag_src: &str) -> Option<(String, &str)> {
    let first = tag_src.chars().next()?;
    if !first.is_ascii_alphabetic() {
        // closing tags, comments, doctype, processing instructions
        return None;
    }
    let end = tag_src
        .find(|c: char| c.is_ascii_whitespace() || c == '/')
        .unwrap_or(tag_src.len());
    Some((tag_src[..end].to_ascii_lowercase(), &tag_src[end..]))
}

fn attr_value<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let lower = attrs.to_ascii_lowercase();
    let mut from = 0;
    while let Some(rel) = lower[from..].find(name) {
        let at = from + rel;
        from = at + name.len();
        let boundary = at == 0 || lower.as_bytes()[at - 1].is_ascii_whitespace();
        let rest = lower[from..].trim_start();
        if !boundary || !rest.starts_with('=') {
            continue;
        }
        let after_eq = lower.len() - rest.len() + 1;
        let raw = attrs[after_eq..].trim_start();
        return Some(match raw.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let body = &raw[1..];
                &body[..body.find(q).unwrap_or(body.len())]
            }
            _ => &raw[..raw.find(|c: char| c.is_ascii_whitespace()).unwrap_or(raw.len())],
        });
    }
    None
}

pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for ch in s.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|&semi| semi <= 10).and_then(|semi| {
            let entity = &tail[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, semi))
        });
        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
