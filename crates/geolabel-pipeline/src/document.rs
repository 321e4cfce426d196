//! Parsed annotation document and attribute helpers.
//!
//! The document is a CVAT 1.1 XML export: label definitions live under
//! `<meta>` (`<label><name/><color/></label>`), and each `<image>` child
//! of the root carries polygon, box and mask elements.

use std::str::FromStr;

use roxmltree::{Document, Node};

use crate::types::PipelineError;

/// A well-formed annotation document.
///
/// Borrows the XML text; parse once and share it between the legend
/// loader and the annotation parser.
pub struct AnnotationDocument<'input> {
    doc: Document<'input>,
}

impl<'input> AnnotationDocument<'input> {
    /// Parse XML text.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MalformedDocument`] if the text is not
    /// well-formed XML.
    pub fn parse(text: &'input str) -> Result<Self, PipelineError> {
        let doc =
            Document::parse(text).map_err(|e| PipelineError::MalformedDocument(e.to_string()))?;
        Ok(Self { doc })
    }

    /// Every `<label>` element, in document order, wherever it is nested.
    pub(crate) fn label_elements(&self) -> impl Iterator<Item = Node<'_, 'input>> {
        self.doc
            .descendants()
            .filter(|n| n.is_element() && n.has_tag_name("label"))
    }

    /// `<image>` children of the root element, in document order.
    pub(crate) fn image_elements(&self) -> impl Iterator<Item = Node<'_, 'input>> {
        self.doc
            .root_element()
            .children()
            .filter(|n| n.is_element() && n.has_tag_name("image"))
    }
}

/// Text content of the first child element called `name`.
pub(crate) fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.children()
        .find(|c| c.is_element() && c.has_tag_name(name))
        .and_then(|c| c.text())
}

/// Required attribute value.
pub(crate) fn attr<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str, PipelineError> {
    node.attribute(name).ok_or_else(|| {
        PipelineError::MalformedAnnotation(format!(
            "<{}> is missing attribute `{name}`",
            node.tag_name().name()
        ))
    })
}

/// Required attribute parsed with [`FromStr`].
pub(crate) fn parse_attr<T>(node: Node<'_, '_>, name: &str) -> Result<T, PipelineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = attr(node, name)?;
    raw.trim().parse().map_err(|e| {
        PipelineError::MalformedAnnotation(format!(
            "<{}> attribute `{name}`=`{raw}`: {e}",
            node.tag_name().name()
        ))
    })
}
