//! `<base>` injection for served demo documents.
//!
//! Demos are built to be served from `/`, so relative asset URLs only resolve
//! once the document carries a `<base href="/demos/{id}/">`. Any `<base>`
//! already present is dropped so the injected one is authoritative.

use std::cell::Cell;
use std::rc::Rc;

use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to rewrite demo document: {message}")]
pub struct RewriteError {
    message: String,
}

/// Inject `<base href>` as the first child of `<head>`. Documents without a
/// `<head>` get the element right after the doctype, where the HTML parser
/// places it into the implied head.
pub fn inject_base_href(html: &str, href: &str) -> Result<String, RewriteError> {
    let tag = format!(r#"<base href="{}">"#, escape_attribute(href));
    let injected = Rc::new(Cell::new(false));

    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("base", |el| {
                    el.remove();
                    Ok(())
                }),
                element!("head", {
                    let injected = Rc::clone(&injected);
                    let tag = tag.clone();
                    move |el| {
                        if !injected.get() {
                            el.prepend(&tag, ContentType::Html);
                            injected.set(true);
                        }
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| RewriteError {
        message: err.to_string(),
    })?;

    if injected.get() {
        return Ok(rewritten);
    }

    let at = doctype_end(&rewritten);
    let mut output = String::with_capacity(rewritten.len() + tag.len());
    output.push_str(&rewritten[..at]);
    output.push_str(&tag);
    output.push_str(&rewritten[at..]);
    Ok(output)
}

fn doctype_end(html: &str) -> usize {
    let leading = html.len() - html.trim_start().len();
    let rest = &html[leading..];
    if rest
        .get(..9)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("<!doctype"))
        && let Some(close) = rest.find('>')
    {
        return leading + close + 1;
    }
    0
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}
