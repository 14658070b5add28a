use lazy_static::lazy_static;
use scraper::{Html, Selector};
use url::Url;

lazy_static! {
    static ref TITLE: Selector = Selector::parse("title").expect("valid selector");
    static ref ANCHOR: Selector = Selector::parse("a[href]").expect("valid selector");
}

const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Text a reader would see: every text node outside script/style blocks, space separated.
pub fn visible_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut out = String::with_capacity(html.len() / 2);
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else { continue };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|el| HIDDEN_ELEMENTS.contains(&el.name())))
            .unwrap_or(false);
        if hidden {
            continue;
        }
        let text = text.trim();
        if !text.is_empty() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(text);
        }
    }
    out
}

pub fn title(html: &str) -> String {
    let doc = Html::parse_document(html);
    doc.select(&TITLE)
        .next()
        .map(|n| n.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// Anchor targets resolved against `base`, trimmed, in document order.
pub fn links(html: &str, base: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base) else { return Vec::new() };
    let doc = Html::parse_document(html);
    doc.select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href.trim()).ok())
        .filter(|u| u.scheme() == "http" || u.scheme() == "https")
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_scripts_and_styles() {
        let html = "<html><head><title> T </title><style>p{}</style></head>\
                    <body><p>Hello</p><script>var x = 1;</script><b>world</b></body></html>";
        assert_eq!(visible_text(html), "T Hello world");
        assert_eq!(title(html), "T");
    }

    #[test]
    fn resolves_relative_links() {
        let html = r#"<a href="/a">A</a><a href=" b?x=1 ">B</a><a href="mailto:x@y.z">M</a><a>none</a>"#;
        let found = links(html, "https://site.ru/dir/page");
        assert_eq!(found, vec!["https://site.ru/a", "https://site.ru/dir/b?x=1"]);
    }
}
