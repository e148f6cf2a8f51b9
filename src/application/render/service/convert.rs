use comrak::nodes::{AstNode, NodeHtmlBlock, NodeValue};
use sha2::{Digest, Sha256};

/// Kinds of nodes that later stages expand into trusted markup. Each node is
/// classified once while walking the parsed tree, so downstream stages
/// dispatch on the variant instead of re-inspecting the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BlockKind {
    Code {
        language: Option<String>,
        meta: Option<String>,
        literal: String,
    },
    Diagram {
        source: String,
    },
    Math {
        literal: String,
        display: bool,
    },
}

pub(crate) struct ClassifiedNode<'a> {
    pub(crate) node: &'a AstNode<'a>,
    pub(crate) kind: BlockKind,
}

/// Walk the tree in document order and classify code, diagram and math nodes.
pub(crate) fn classify_nodes<'a>(
    root: &'a AstNode<'a>,
    diagram_marker: &str,
) -> Vec<ClassifiedNode<'a>> {
    let mut classified = Vec::new();
    for node in root.descendants() {
        match classify(node, diagram_marker) {
            // Image descriptions serialise into an attribute, so math there
            // stays literal text instead of becoming markup.
            Some(BlockKind::Math { literal, display }) if inside_image(node) => {
                let delimiter = if display { "$$" } else { "$" };
                node.data.borrow_mut().value =
                    NodeValue::Text(format!("{delimiter}{literal}{delimiter}").into());
            }
            Some(kind) => classified.push(ClassifiedNode { node, kind }),
            None => {}
        }
    }
    classified
}

fn inside_image<'a>(node: &'a AstNode<'a>) -> bool {
    node.ancestors()
        .skip(1)
        .any(|ancestor| matches!(ancestor.data.borrow().value, NodeValue::Image(..)))
}

fn classify(node: &AstNode<'_>, diagram_marker: &str) -> Option<BlockKind> {
    let data = node.data.borrow();
    match &data.value {
        NodeValue::Math(math) => Some(BlockKind::Math {
            literal: math.literal.clone(),
            display: math.display_math,
        }),
        NodeValue::CodeBlock(block) => {
            let info = block.info.trim();
            let mut segments = info.split_whitespace();
            let language = segments.next().map(|s| s.to_string());
            let meta = segments.collect::<Vec<_>>().join(" ");

            match language.as_deref().map(str::to_ascii_lowercase) {
                Some(lang) if lang == diagram_marker => Some(BlockKind::Diagram {
                    source: strip_fence_newline(&block.literal).to_string(),
                }),
                Some(lang) if lang == "math" => Some(BlockKind::Math {
                    literal: strip_fence_newline(&block.literal).to_string(),
                    display: true,
                }),
                _ => Some(BlockKind::Code {
                    language,
                    meta: (!meta.is_empty()).then_some(meta),
                    literal: block.literal.clone(),
                }),
            }
        }
        _ => None,
    }
}

fn strip_fence_newline(literal: &str) -> &str {
    literal
        .strip_suffix("\r\n")
        .or_else(|| literal.strip_suffix('\n'))
        .unwrap_or(literal)
}

pub(crate) struct Fragment {
    pub(crate) placeholder: String,
    pub(crate) html: String,
}

/// Trusted markup produced by the highlight, diagram and math stages. Nodes
/// are replaced by opaque placeholders so the sanitiser only ever sees user
/// markup; placeholders are swapped back after sanitisation.
pub(crate) struct FragmentTable {
    nonce: String,
    fragments: Vec<Fragment>,
}

impl FragmentTable {
    /// The nonce is derived from the source so output stays deterministic
    /// while user text cannot predict a placeholder.
    pub(crate) fn for_source(source: &str) -> Self {
        let digest = Sha256::digest(source.as_bytes());
        Self {
            nonce: hex::encode(&digest[..8]),
            fragments: Vec::new(),
        }
    }

    pub(crate) fn substitute(&mut self, node: &AstNode<'_>, html: String) {
        let placeholder = format!("@@mdtools:{}:{}@@", self.nonce, self.fragments.len());

        {
            let mut data = node.data.borrow_mut();
            data.value = if data.value.block() {
                NodeValue::HtmlBlock(NodeHtmlBlock {
                    block_type: 0,
                    literal: format!("{placeholder}\n"),
                })
            } else {
                NodeValue::HtmlInline(placeholder.clone())
            };
        }

        self.fragments.push(Fragment { placeholder, html });
    }

    pub(crate) fn restore(&self, html: String) -> String {
        self.fragments.iter().fold(html, |acc, fragment| {
            acc.replace(&fragment.placeholder, &fragment.html)
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.fragments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comrak::{Arena, parse_document};

    use crate::application::render::service::config::default_options;

    #[test]
    fn classifies_code_diagram_and_math() {
        let options = default_options();
        let arena = Arena::new();
        let markdown = "```rust title=main\nfn main() {}\n```\n\n```mermaid\ngraph LR\nA-->B\n```\n\nInline $a^2$ and\n\n$$x$$\n";
        let root = parse_document(&arena, markdown, &options);

        let kinds: Vec<BlockKind> = classify_nodes(root, "mermaid")
            .into_iter()
            .map(|classified| classified.kind)
            .collect();

        assert_eq!(
            kinds,
            vec![
                BlockKind::Code {
                    language: Some("rust".into()),
                    meta: Some("title=main".into()),
                    literal: "fn main() {}\n".into(),
                },
                BlockKind::Diagram {
                    source: "graph LR\nA-->B".into(),
                },
                BlockKind::Math {
                    literal: "a^2".into(),
                    display: false,
                },
                BlockKind::Math {
                    literal: "x".into(),
                    display: true,
                },
            ]
        );
    }

    #[test]
    fn math_inside_image_description_becomes_text() {
        let options = default_options();
        let arena = Arena::new();
        let root = parse_document(&arena, "![a $x$ b](x.png) and $y$", &options);

        let classified = classify_nodes(root, "mermaid");
        assert_eq!(classified.len(), 1);
        assert_eq!(
            classified[0].kind,
            BlockKind::Math {
                literal: "y".into(),
                display: false,
            }
        );
    }

    #[test]
    fn diagram_marker_matches_case_insensitively() {
        let options = default_options();
        let arena = Arena::new();
        let root = parse_document(&arena, "```Mermaid\nflowchart TD\n```\n", &options);

        let classified = classify_nodes(root, "mermaid");
        assert_eq!(classified.len(), 1);
        assert!(matches!(classified[0].kind, BlockKind::Diagram { .. }));
    }

    #[test]
    fn placeholders_are_deterministic_per_source() {
        let first = FragmentTable::for_source("same");
        let second = FragmentTable::for_source("same");
        let other = FragmentTable::for_source("different");
        assert_eq!(first.nonce, second.nonce);
        assert_ne!(first.nonce, other.nonce);
    }
}
