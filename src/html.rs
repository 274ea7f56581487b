//! Streaming anchor extraction built on `lol_html`.

use std::cell::RefCell;

use lol_html::errors::RewritingError;
use lol_html::{element, HtmlRewriter, Settings};

/// An `<a href>` element captured during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    /// The raw `href` attribute value, exactly as written in the markup.
    pub href: String,
    /// The `rel` attribute value, if present.
    pub rel: Option<String>,
}

/// Collects every `<a>` element carrying an `href` from `body` in a single
/// streaming pass, without building a DOM.
///
/// Attribute values are returned verbatim; resolving them against a base URL
/// is the caller's concern. Markup the rewriter cannot recover from aborts
/// the scan with its error.
pub fn scan_anchors(body: &[u8]) -> Result<Vec<Anchor>, RewritingError> {
    let anchors = RefCell::new(Vec::new());

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![element!("a[href]", |el| {
                if let Some(href) = el.get_attribute("href") {
                    anchors.borrow_mut().push(Anchor {
                        href,
                        rel: el.get_attribute("rel"),
                    });
                }
                Ok(())
            })],
            ..Settings::default()
        },
        |_: &[u8]| {},
    );

    rewriter.write(body)?;
    rewriter.end()?;

    Ok(anchors.into_inner())
}
