//! Translate the attribute-extraction subset of XPath into CSS selection.
//!
//! Source descriptors use XPath almost exclusively in the shape
//! `//a[contains(@class,'job')]/@href`. That subset — descendant/child
//! steps, tag names, class/id/attribute predicates, and a trailing
//! attribute capture — maps cleanly onto `scraper`'s CSS selectors.
//! Expressions outside the subset return `None` and the caller logs a
//! warning instead of guessing.

/// Result of a successful translation: a CSS selector plus the attribute
/// to read (when the expression ends in `/@attr`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssSelection {
    pub selector: String,
    pub attr: Option<String>,
}

pub fn xpath_to_css(xpath: &str) -> Option<CssSelection> {
    let mut rest = xpath.trim();
    if rest.is_empty() {
        return None;
    }

    // Trailing attribute capture: .../@href
    let mut attr = None;
    if let Some(idx) = rest.rfind("/@") {
        let name = &rest[idx + 2..];
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
            return None;
        }
        attr = Some(name.to_string());
        rest = rest[..idx].trim_end();
    }

    let mut css = String::new();
    let mut first = true;
    while !rest.is_empty() {
        let (descendant, remainder) = if let Some(r) = rest.strip_prefix("//") {
            (true, r)
        } else if let Some(r) = rest.strip_prefix('/') {
            (false, r)
        } else if first {
            // bare "a[@href]" style, treated as descendant
            (true, rest)
        } else {
            return None;
        };

        let end = remainder
            .char_indices()
            .find(|(i, c)| *c == '/' && !in_brackets(remainder, *i))
            .map(|(i, _)| i)
            .unwrap_or(remainder.len());
        let step = &remainder[..end];
        rest = &remainder[end..];

        let step_css = translate_step(step)?;
        if !first {
            css.push_str(if descendant { " " } else { " > " });
        }
        css.push_str(&step_css);
        first = false;
    }

    if css.is_empty() {
        return None;
    }
    Some(CssSelection { selector: css, attr })
}

fn in_brackets(s: &str, index: usize) -> bool {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        if i == index {
            return depth > 0;
        }
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            _ => {}
        }
    }
    false
}

/// One step: `tag[pred][pred]...` where tag may be `*`.
fn translate_step(step: &str) -> Option<String> {
    let step = step.trim();
    if step.is_empty() {
        return None;
    }

    let tag_end = step.find('[').unwrap_or(step.len());
    let tag = &step[..tag_end];
    if tag != "*" && !tag.chars().all(|c| c.is_alphanumeric() || c == '-') {
        return None;
    }

    let mut css = if tag == "*" { String::new() } else { tag.to_string() };

    let mut rest = &step[tag_end..];
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return None;
        }
        let close = rest.find(']')?;
        let predicate = &rest[1..close];
        css.push_str(&translate_predicate(predicate)?);
        rest = &rest[close + 1..];
    }

    if css.is_empty() {
        css.push('*');
    }
    Some(css)
}

fn translate_predicate(predicate: &str) -> Option<String> {
    let p = predicate.trim();

    // contains(@attr,'value')
    if let Some(inner) = p.strip_prefix("contains(").and_then(|s| s.strip_suffix(')')) {
        let (attr_part, value_part) = inner.split_once(',')?;
        let attr = attr_part.trim().strip_prefix('@')?;
        let value = unquote(value_part.trim())?;
        return Some(format!("[{attr}*='{value}']"));
    }

    // @attr='value' or bare @attr
    if let Some(rest) = p.strip_prefix('@') {
        if let Some((attr, value)) = rest.split_once('=') {
            let attr = attr.trim();
            let value = unquote(value.trim())?;
            return match attr {
                "id" => Some(format!("[id='{value}']")),
                _ => Some(format!("[{attr}='{value}']")),
            };
        }
        let attr = rest.trim();
        if attr.chars().all(|c| c.is_alphanumeric() || c == '-') {
            return Some(format!("[{attr}]"));
        }
    }

    None
}

fn unquote(s: &str) -> Option<&str> {
    s.strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn css(xpath: &str) -> CssSelection {
        xpath_to_css(xpath).unwrap_or_else(|| panic!("expected translation for {xpath}"))
    }

    #[test]
    fn simple_descendant_with_attr_capture() {
        let sel = css("//a/@href");
        assert_eq!(sel.selector, "a");
        assert_eq!(sel.attr.as_deref(), Some("href"));
    }

    #[test]
    fn contains_class_predicate() {
        let sel = css("//a[contains(@class,'job')]/@href");
        assert_eq!(sel.selector, "a[class*='job']");
        assert_eq!(sel.attr.as_deref(), Some("href"));
    }

    #[test]
    fn exact_attribute_predicate() {
        let sel = css("//div[@id='results']//a");
        assert_eq!(sel.selector, "div[id='results'] a");
        assert_eq!(sel.attr, None);
    }

    #[test]
    fn child_axis_becomes_child_combinator() {
        let sel = css("//ul[@class='jobs']/li/a/@href");
        assert_eq!(sel.selector, "ul[class='jobs'] > li > a");
        assert_eq!(sel.attr.as_deref(), Some("href"));
    }

    #[test]
    fn bare_attribute_presence() {
        let sel = css("//a[@href]");
        assert_eq!(sel.selector, "a[href]");
    }

    #[test]
    fn wildcard_tag() {
        let sel = css("//*[@data-url]/@data-url");
        assert_eq!(sel.selector, "[data-url]");
        assert_eq!(sel.attr.as_deref(), Some("data-url"));
    }

    #[test]
    fn unsupported_expressions_return_none() {
        assert!(xpath_to_css("//a[position() > 2]").is_none());
        assert!(xpath_to_css("//a/text()").is_none());
        assert!(xpath_to_css("").is_none());
        assert!(xpath_to_css("//a | //b").is_none());
    }
}
