//! Paragraph Extractor and reassembly.
//!
//! Extraction walks the parsed document depth-first and yields every `<p>`
//! element with its own text, in document order. A paragraph's own text
//! excludes anything inside block-level descendants: fragments without a
//! doctype parse in quirks mode, where a `<table>` (and any paragraphs in
//! it) can sit inside an open `<p>`.
//! Reassembly never mutates a shared tree: the markup is parsed again, the
//! paragraphs are paired positionally with the replacement texts, and the
//! document is serialized in one pass with the replacements spliced in.

use crate::error::{CodeSwitchError, Result};
use html5ever::serialize::{serialize, Serialize, SerializeOpts, Serializer, TraversalScope};
use html5ever::tendril::TendrilSink;
use html5ever::{parse_document, ParseOpts};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom};
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

const PARAGRAPH_TAG: &str = "p";

/// Elements whose content is never part of an enclosing paragraph's text.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "center", "details", "dialog", "div", "dl",
    "fieldset", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr",
    "main", "menu", "nav", "ol", "p", "pre", "section", "table", "ul",
];

pub fn parse_markup(markup: &str) -> Result<RcDom> {
    if markup.trim().is_empty() {
        return Err(CodeSwitchError::Parse("document is empty".to_string()));
    }

    parse_document(RcDom::default(), ParseOpts::default())
        .from_utf8()
        .read_from(&mut markup.as_bytes())
        .map_err(|e| CodeSwitchError::Parse(e.to_string()))
}

/// Lazy depth-first iterator over the paragraphs of a parsed document.
pub struct Paragraphs {
    stack: Vec<Handle>,
}

/// Paragraph elements under `root` in document order, with their text.
pub fn paragraphs(root: &Handle) -> Paragraphs {
    Paragraphs {
        stack: vec![Rc::clone(root)],
    }
}

impl Iterator for Paragraphs {
    type Item = (Handle, String);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            // Children pushed in reverse so the leftmost is visited first.
            for child in node.children.borrow().iter().rev() {
                self.stack.push(Rc::clone(child));
            }

            if is_paragraph(&node) {
                let text = own_text(&node);
                return Some((node, text));
            }
        }
        None
    }
}

fn is_paragraph(node: &Handle) -> bool {
    matches!(&node.data, NodeData::Element { name, .. } if &*name.local == PARAGRAPH_TAG)
}

fn is_block(node: &Handle) -> bool {
    matches!(&node.data, NodeData::Element { name, .. } if BLOCK_TAGS.contains(&&*name.local))
}

/// Text of `paragraph` outside any block-level descendant.
pub fn own_text(paragraph: &Handle) -> String {
    let mut text = String::new();
    let mut stack: Vec<Handle> = paragraph.children.borrow().iter().rev().cloned().collect();
    while let Some(current) = stack.pop() {
        if is_block(&current) {
            continue;
        }
        if let NodeData::Text { contents } = &current.data {
            text.push_str(&contents.borrow());
        }
        for child in current.children.borrow().iter().rev() {
            stack.push(Rc::clone(child));
        }
    }
    text
}

/// An article's markup together with its paragraph texts, in extraction
/// order. Holds no parse tree, so it can be kept across `.await` points.
#[derive(Debug, Clone)]
pub struct ParsedArticle {
    markup: String,
    paragraphs: Vec<String>,
}

impl ParsedArticle {
    pub fn parse(markup: &str) -> Result<Self> {
        let dom = parse_markup(markup)?;
        let paragraphs = paragraphs(&dom.document).map(|(_, text)| text).collect();
        Ok(Self {
            markup: markup.to_string(),
            paragraphs,
        })
    }

    /// Own text of each paragraph; index `i` pairs with `replacements[i]`
    /// in [`ParsedArticle::render`].
    pub fn paragraphs(&self) -> &[String] {
        &self.paragraphs
    }

    /// Serialize the document, replacing the inline content of paragraph
    /// `i` with `replacements[i]` where it is `Some`. Block-level content
    /// inside a replaced paragraph is kept and rendered in turn.
    pub fn render(&self, replacements: &[Option<String>]) -> Result<String> {
        if replacements.len() != self.paragraphs.len() {
            return Err(CodeSwitchError::Parse(format!(
                "expected {} paragraph replacements, got {}",
                self.paragraphs.len(),
                replacements.len()
            )));
        }

        let dom = parse_markup(&self.markup)?;
        let spliced: HashMap<*const Node, &str> = paragraphs(&dom.document)
            .zip(replacements)
            .filter_map(|((node, _), replacement)| {
                replacement.as_deref().map(|text| (Rc::as_ptr(&node), text))
            })
            .collect();

        let document = Spliced {
            root: &dom.document,
            replacements: &spliced,
        };

        let mut buf = Vec::new();
        serialize(&mut buf, &document, SerializeOpts::default())
            .map_err(|e| CodeSwitchError::Parse(format!("failed to render document: {}", e)))?;

        String::from_utf8(buf)
            .map_err(|e| CodeSwitchError::Parse(format!("rendered document is not UTF-8: {}", e)))
    }
}

/// Serializable view of a document with some paragraphs' content swapped.
struct Spliced<'a> {
    root: &'a Handle,
    replacements: &'a HashMap<*const Node, &'a str>,
}

impl Spliced<'_> {
    fn write_node<S: Serializer>(&self, serializer: &mut S, node: &Handle) -> io::Result<()> {
        match &node.data {
            NodeData::Document => self.write_children(serializer, node),
            NodeData::Element {
                name,
                attrs,
                template_contents,
                ..
            } => {
                {
                    let attrs = attrs.borrow();
                    serializer.start_elem(
                        name.clone(),
                        attrs.iter().map(|attr| (&attr.name, &attr.value[..])),
                    )?;
                }
                match self.replacements.get(&Rc::as_ptr(node)) {
                    Some(text) => {
                        serializer.write_text(text)?;
                        self.write_blocks(serializer, node)?;
                    }
                    None => match &*template_contents.borrow() {
                        Some(contents) => self.write_children(serializer, contents)?,
                        None => self.write_children(serializer, node)?,
                    },
                }
                serializer.end_elem(name.clone())
            }
            NodeData::Text { contents } => serializer.write_text(&contents.borrow()),
            NodeData::Comment { contents } => serializer.write_comment(contents),
            NodeData::Doctype { name, .. } => serializer.write_doctype(name),
            NodeData::ProcessingInstruction { target, contents } => {
                serializer.write_processing_instruction(target, contents)
            }
        }
    }

    fn write_children<S: Serializer>(&self, serializer: &mut S, node: &Handle) -> io::Result<()> {
        for child in node.children.borrow().iter() {
            self.write_node(serializer, child)?;
        }
        Ok(())
    }

    /// Block-level descendants of a replaced paragraph, wherever they sit
    /// among its inline content.
    fn write_blocks<S: Serializer>(&self, serializer: &mut S, node: &Handle) -> io::Result<()> {
        for child in node.children.borrow().iter() {
            if is_block(child) {
                self.write_node(serializer, child)?;
            } else {
                self.write_blocks(serializer, child)?;
            }
        }
        Ok(())
    }
}

impl Serialize for Spliced<'_> {
    fn serialize<S: Serializer>(
        &self,
        serializer: &mut S,
        traversal_scope: TraversalScope,
    ) -> io::Result<()> {
        match traversal_scope {
            TraversalScope::IncludeNode => self.write_node(serializer, self.root),
            TraversalScope::ChildrenOnly(_) => self.write_children(serializer, self.root),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<div class="mw-parser-output">
<p>Stockholm is the <b>capital</b> of Sweden.</p>
<table><tr><td><p>Inside a table</p></td></tr></table>
<div><p>Nested <a href="/wiki/Lake">lake</a> text</p></div>
<p></p>
</div>"#;

    // ==================== Extraction Tests ====================

    #[test]
    fn test_paragraphs_in_document_order() {
        let parsed = ParsedArticle::parse(ARTICLE).expect("Should parse");
        assert_eq!(
            parsed.paragraphs(),
            &[
                "Stockholm is the capital of Sweden.".to_string(),
                "Inside a table".to_string(),
                "Nested lake text".to_string(),
                String::new(),
            ]
        );
    }

    #[test]
    fn test_paragraph_iterator_is_lazy() {
        let dom = parse_markup(ARTICLE).expect("Should parse");
        let mut iter = paragraphs(&dom.document);
        let (node, text) = iter.next().expect("first paragraph");
        assert!(is_paragraph(&node));
        assert_eq!(text, "Stockholm is the capital of Sweden.");
        assert_eq!(iter.count(), 3);
    }

    #[test]
    fn test_document_without_paragraphs() {
        let parsed = ParsedArticle::parse("<div>no paragraphs here</div>").expect("Should parse");
        assert!(parsed.paragraphs().is_empty());
        let html = parsed.render(&[]).expect("Should render");
        assert!(html.contains("no paragraphs here"));
    }

    #[test]
    fn test_empty_markup_is_parse_error() {
        let err = ParsedArticle::parse("   \n ").unwrap_err();
        assert_eq!(err.code(), "parse_error");
    }

    // ==================== Render Tests ====================

    #[test]
    fn test_render_without_replacements_keeps_content() {
        let parsed = ParsedArticle::parse(ARTICLE).expect("Should parse");
        let html = parsed.render(&[None, None, None, None]).expect("Should render");
        assert!(html.contains("Stockholm is the <b>capital</b> of Sweden."));
        assert!(html.contains(r#"<a href="/wiki/Lake">lake</a>"#));
        assert!(html.contains(r#"<div class="mw-parser-output">"#));
    }

    #[test]
    fn test_render_splices_by_extraction_index() {
        let parsed = ParsedArticle::parse(ARTICLE).expect("Should parse");
        let html = parsed
            .render(&[
                Some("Stockholm är the huvudstad of Sweden.".to_string()),
                None,
                Some("Nested sjö text".to_string()),
                None,
            ])
            .expect("Should render");

        assert!(html.contains("<p>Stockholm är the huvudstad of Sweden.</p>"));
        assert!(!html.contains("<b>capital</b>"));
        assert!(html.contains("<p>Inside a table</p>"));
        assert!(html.contains("<p>Nested sjö text</p>"));
        assert!(!html.contains("/wiki/Lake"));
    }

    #[test]
    fn test_render_escapes_replacement_text() {
        let parsed = ParsedArticle::parse("<p>original paragraph</p>").expect("Should parse");
        let html = parsed
            .render(&[Some("<script>alert(1)</script> & more".to_string())])
            .expect("Should render");
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt; &amp; more"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_render_rejects_mismatched_replacements() {
        let parsed = ParsedArticle::parse(ARTICLE).expect("Should parse");
        let err = parsed.render(&[None]).unwrap_err();
        assert!(err.to_string().contains("expected 4 paragraph replacements"));
    }

    // Fragments have no doctype, so this parses in quirks mode with the
    // table left inside the open outer paragraph.
    const NESTED: &str =
        "<p>Outer words here <table><tr><td><p>Inner paragraph text</p></td></tr></table> tail</p>";

    #[test]
    fn test_nested_paragraph_text_is_not_repeated() {
        let parsed = ParsedArticle::parse(NESTED).expect("Should parse");
        let paragraphs = parsed.paragraphs();
        assert_eq!(paragraphs.len(), 2);
        assert!(paragraphs[0].starts_with("Outer words here"));
        assert!(paragraphs[0].ends_with("tail"));
        assert!(!paragraphs[0].contains("Inner"));
        assert_eq!(paragraphs[1], "Inner paragraph text");
    }

    #[test]
    fn test_switched_outer_paragraph_keeps_nested_table() {
        let parsed = ParsedArticle::parse(NESTED).expect("Should parse");
        let html = parsed
            .render(&[
                Some("OUTER SWITCHED".to_string()),
                Some("INNER SWITCHED".to_string()),
            ])
            .expect("Should render");

        assert!(html.contains("<p>OUTER SWITCHED<table>"));
        assert!(html.contains("<td><p>INNER SWITCHED</p></td>"));
        assert!(!html.contains("Outer words here"));
        assert!(!html.contains("Inner paragraph text"));
        assert!(!html.contains("tail"));
    }

    #[test]
    fn test_switched_outer_paragraph_keeps_unswitched_inner() {
        let parsed = ParsedArticle::parse(NESTED).expect("Should parse");
        let html = parsed
            .render(&[Some("OUTER SWITCHED".to_string()), None])
            .expect("Should render");
        assert!(html.contains("<td><p>Inner paragraph text</p></td>"));
    }

    #[test]
    fn test_render_keeps_template_contents() {
        let markup = "<div><template><p>kept?</p></template><p>visible paragraph</p></div>";
        let parsed = ParsedArticle::parse(markup).expect("Should parse");
        assert_eq!(parsed.paragraphs(), &["visible paragraph".to_string()]);

        let html = parsed.render(&[None]).expect("Should render");
        assert!(html.contains("<template><p>kept?</p></template>"));

        let html = parsed.render(&[Some("switched".to_string())]).expect("Should render");
        assert!(html.contains("<template><p>kept?</p></template><p>switched</p>"));
    }

    #[test]
    fn test_render_is_repeatable() {
        let parsed = ParsedArticle::parse(ARTICLE).expect("Should parse");
        let replacements = vec![Some("x".to_string()), None, None, None];
        assert_eq!(
            parsed.render(&replacements).unwrap(),
            parsed.render(&replacements).unwrap()
        );
    }
}
