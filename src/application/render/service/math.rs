use katex::{OptsBuilder, OutputType};

use crate::application::render::types::{RenderError, escape_html};

/// Render a KaTeX expression to HTML. Both modes are wrapped in a `<span>` so
/// the fragment stays valid wherever the math node sits in the tree.
pub(crate) fn render_math_html(literal: &str, display_mode: bool) -> Result<String, RenderError> {
    let mut builder = OptsBuilder::default();
    builder.display_mode(display_mode);
    builder.output_type(OutputType::Html);
    builder.throw_on_error(true);

    let opts = builder.build().map_err(|err| RenderError::Math {
        message: format!("failed to build KaTeX options: {err}"),
    })?;

    let html = katex::render_with_opts(literal, opts).map_err(|err| RenderError::Math {
        message: format!("KaTeX rendering failed: {err}"),
    })?;

    Ok(if display_mode {
        format!("<span data-role=\"math-block\" data-math-style=\"display\">{html}</span>")
    } else {
        format!("<span data-role=\"math-inline\" data-math-style=\"inline\">{html}</span>")
    })
}

/// Raw expression source shown when typesetting a single node fails.
pub(crate) fn math_fallback(literal: &str, display_mode: bool) -> String {
    let escaped = escape_html(literal);
    if display_mode {
        format!("<code class=\"math-error\" data-math-style=\"display\">{escaped}</code>")
    } else {
        format!("<code class=\"math-error\" data-math-style=\"inline\">{escaped}</code>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_math_is_typeset() {
        let html = render_math_html("x^2", true).expect("valid expression");
        assert!(html.starts_with("<span data-role=\"math-block\""));
        assert!(html.contains("class=\"katex"));
    }

    #[test]
    fn malformed_math_is_an_error() {
        assert!(render_math_html("x^{", true).is_err());
    }

    #[test]
    fn fallback_keeps_source_escaped() {
        assert_eq!(
            math_fallback("a<b", false),
            "<code class=\"math-error\" data-math-style=\"inline\">a&lt;b</code>"
        );
    }
}
