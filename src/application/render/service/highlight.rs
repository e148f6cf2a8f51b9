use syntect::{
    html::{ClassStyle, ClassedHTMLGenerator},
    parsing::{SyntaxReference, SyntaxSet},
    util::LinesWithEndings,
};

use crate::application::render::types::{RenderError, escape_html};

/// Highlight a fenced code block. A declared language is looked up by token,
/// name and extension; without one the first line is used for detection.
/// Returns `Ok(None)` when no syntax matches so the caller can emit the block
/// unhighlighted.
pub(crate) fn highlight_code(
    language: Option<&str>,
    meta: Option<&str>,
    code: &str,
    syntax_set: &SyntaxSet,
    class_style: &ClassStyle,
) -> Result<Option<String>, RenderError> {
    let syntax = match language {
        Some(token) => find_syntax(syntax_set, token),
        None => detect_syntax(syntax_set, code),
    };
    let Some(syntax) = syntax else {
        return Ok(None);
    };

    let lang_token = language
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| syntax.name.to_ascii_lowercase().replace(' ', "-"));

    let mut code_with_newline = code.to_string();
    if !code_with_newline.ends_with('\n') {
        code_with_newline.push('\n');
    }

    let mut generator =
        ClassedHTMLGenerator::new_with_class_style(syntax, syntax_set, *class_style);

    for line in LinesWithEndings::from(code_with_newline.as_str()) {
        generator
            .parse_html_for_line_which_includes_newline(line)
            .map_err(|err| RenderError::Highlighting {
                language: lang_token.clone(),
                message: err.to_string(),
            })?;
    }

    let highlighted = generator.finalize();
    let lang_attr = escape_html(&lang_token);
    let meta_attr = meta
        .filter(|m| !m.is_empty())
        .map(|m| format!(" data-meta=\"{}\"", escape_html(m)))
        .unwrap_or_default();

    Ok(Some(format!(
        "<pre class=\"syntax-highlight syntax-lang-{lang_attr}\" data-language=\"{lang_attr}\"><code class=\"language-{lang_attr} syntax-code\"{meta_attr}>{highlighted}</code></pre>"
    )))
}

/// Unhighlighted block for unknown languages and highlighting failures.
pub(crate) fn plain_code_block(language: Option<&str>, literal: &str) -> String {
    let mut html = String::from("<pre");
    if let Some(lang) = language.filter(|lang| !lang.is_empty()) {
        let lang = escape_html(&lang.to_ascii_lowercase());
        html.push_str(" data-language=\"");
        html.push_str(&lang);
        html.push_str("\"><code class=\"language-");
        html.push_str(&lang);
        html.push_str("\">");
    } else {
        html.push_str("><code>");
    }
    html.push_str(&escape_html(literal));
    if !literal.ends_with('\n') {
        html.push('\n');
    }
    html.push_str("</code></pre>");
    html
}

fn find_syntax<'a>(syntax_set: &'a SyntaxSet, token: &str) -> Option<&'a SyntaxReference> {
    let lowercase = token.to_ascii_lowercase();
    syntax_set
        .find_syntax_by_token(&lowercase)
        .or_else(|| syntax_set.find_syntax_by_name(token))
        .or_else(|| syntax_set.find_syntax_by_extension(&lowercase))
}

fn detect_syntax<'a>(syntax_set: &'a SyntaxSet, code: &str) -> Option<&'a SyntaxReference> {
    let first_line = code.lines().next()?;
    syntax_set.find_syntax_by_first_line(first_line)
}
