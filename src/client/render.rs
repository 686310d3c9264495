//! Reply rendering for the chat panel.
//!
//! The whole reply buffer is re-rendered after every chunk. Partial input is
//! normal mid-stream, so a renderer may refuse it; callers then show the
//! escaped plain text until a later chunk makes it renderable.

use log::debug;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("unclosed `{0}`")]
    Unclosed(&'static str),
    #[error("`{0}` closes across another span")]
    Misnested(&'static str),
}

pub trait ReplyRenderer {
    fn render(&self, source: &str) -> Result<String, RenderError>;
}

/// Renders `source`, falling back to its plain text when the renderer
/// refuses. Both paths produce escaped HTML.
pub fn render_or_raw<R: ReplyRenderer + ?Sized>(renderer: &R, source: &str) -> String {
    match renderer.render(source) {
        Ok(html) => html,
        Err(e) => {
            debug!("[render] Showing raw text: {}", e);
            escape_plain(source)
        }
    }
}

fn push_escaped(out: &mut String, c: char) {
    match c {
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '&' => out.push_str("&amp;"),
        '"' => out.push_str("&quot;"),
        '\'' => out.push_str("&#39;"),
        _ => out.push(c),
    }
}

/// HTML-escapes the text and keeps line breaks. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextRenderer;

fn escape_plain(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for c in source.chars() {
        if c == '\n' {
            out.push_str("<br>");
        } else {
            push_escaped(&mut out, c);
        }
    }
    out
}

impl ReplyRenderer for PlainTextRenderer {
    fn render(&self, source: &str) -> Result<String, RenderError> {
        Ok(escape_plain(source))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    Strong,
    Emphasis,
    Code,
    Math,
}

impl Span {
    fn marker(self) -> &'static str {
        match self {
            Span::Strong => "**",
            Span::Emphasis => "*",
            Span::Code => "`",
            Span::Math => "$",
        }
    }

    fn open_tag(self) -> &'static str {
        match self {
            Span::Strong => "<strong>",
            Span::Emphasis => "<em>",
            Span::Code => "<code>",
            Span::Math => "<span class=\"math\">",
        }
    }

    fn close_tag(self) -> &'static str {
        match self {
            Span::Strong => "</strong>",
            Span::Emphasis => "</em>",
            Span::Code => "</code>",
            Span::Math => "</span>",
        }
    }

    fn is_literal(self) -> bool {
        matches!(self, Span::Code | Span::Math)
    }
}

/// Inline markup: `**strong**`, `*emphasis*`, `` `code` `` and `$math$`.
/// Code and math contents are literal. Unbalanced markers are an error, which
/// is what a half-streamed reply usually looks like.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineMarkupRenderer;

impl InlineMarkupRenderer {
    fn toggle(out: &mut String, open: &mut Vec<Span>, span: Span) -> Result<(), RenderError> {
        if open.last() == Some(&span) {
            open.pop();
            out.push_str(span.close_tag());
        } else if open.contains(&span) {
            return Err(RenderError::Misnested(span.marker()));
        } else {
            open.push(span);
            out.push_str(span.open_tag());
        }
        Ok(())
    }
}

impl ReplyRenderer for InlineMarkupRenderer {
    fn render(&self, source: &str) -> Result<String, RenderError> {
        let mut out = String::with_capacity(source.len() + 16);
        let mut open: Vec<Span> = Vec::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            let literal = open.last().copied().filter(|s| s.is_literal());
            match (c, literal) {
                ('`', None | Some(Span::Code)) => Self::toggle(&mut out, &mut open, Span::Code)?,
                ('$', None | Some(Span::Math)) => Self::toggle(&mut out, &mut open, Span::Math)?,
                ('*', None) => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        Self::toggle(&mut out, &mut open, Span::Strong)?;
                    } else {
                        Self::toggle(&mut out, &mut open, Span::Emphasis)?;
                    }
                }
                ('\n', None) => out.push_str("<br>"),
                _ => push_escaped(&mut out, c),
            }
        }

        match open.last() {
            Some(span) => Err(RenderError::Unclosed(span.marker())),
            None => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_escaped() {
        assert_eq!(
            PlainTextRenderer.render("a < b & c\nnext").expect("plain"),
            "a &lt; b &amp; c<br>next"
        );
    }

    #[test]
    fn inline_markup_renders_balanced_spans() {
        let html = InlineMarkupRenderer
            .render("It is **25**, see `5*5` and $5 \\times (3+2)$.")
            .expect("balanced");
        assert_eq!(
            html,
            "It is <strong>25</strong>, see <code>5*5</code> and <span class=\"math\">5 \\times (3+2)</span>."
        );
    }

    #[test]
    fn half_streamed_markup_falls_back_to_escaped_text() {
        assert_eq!(
            InlineMarkupRenderer.render("The answer is **2"),
            Err(RenderError::Unclosed("**"))
        );
        assert_eq!(
            render_or_raw(&InlineMarkupRenderer, "The answer is **2"),
            "The answer is **2"
        );
        assert_eq!(
            render_or_raw(&InlineMarkupRenderer, "The answer is **25**"),
            "The answer is <strong>25</strong>"
        );
    }

    #[test]
    fn fallback_never_emits_live_markup() {
        assert_eq!(
            render_or_raw(&InlineMarkupRenderer, "<img src=x onerror=alert(1)> *"),
            "&lt;img src=x onerror=alert(1)&gt; *"
        );
        assert_eq!(
            render_or_raw(&InlineMarkupRenderer, "5 * 5\n= 25"),
            "5 * 5<br>= 25"
        );
    }

    #[test]
    fn crossing_spans_are_rejected() {
        assert_eq!(
            InlineMarkupRenderer.render("**bold *both** em*"),
            Err(RenderError::Misnested("**"))
        );
    }
}
