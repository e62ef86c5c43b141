use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use super::types::RenderError;

/// Prepend the browser-rendered marker script to `<head>`.
///
/// Documents without a `<head>` element pass through unchanged.
pub fn inject_render_flag(html: &str, rendered_at: OffsetDateTime) -> Result<String, RenderError> {
    let timestamp = rendered_at
        .format(&Rfc3339)
        .map_err(|err| RenderError::Rewrite {
            message: err.to_string(),
        })?;
    let script = render_flag_script(&timestamp);

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("head", |el| {
                el.prepend(&script, ContentType::Html);
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| RenderError::Rewrite {
        message: err.to_string(),
    })
}

fn render_flag_script(timestamp: &str) -> String {
    format!(
        "<script>window.__IS_BROWSER_RENDERED__ = true;\
         window.__RENDER_TIME__ = \"{timestamp}\";\
         document.dispatchEvent(new CustomEvent('browser-rendered'));</script>"
    )
}
