//! Label legend: label names to class indices, class indices to colors.
//!
//! Indices follow the order in which `<label>` elements appear in the
//! document, starting at the configured [`IndexBase`]. Names are not
//! sorted or deduplicated: a repeated name is rebound to its later index.

use std::collections::{BTreeMap, HashMap};

use image::Rgba;

use crate::diagnostics::{Notice, NoticeKind};
use crate::document::{AnnotationDocument, child_text};
use crate::types::{ClassIndex, IndexBase, PipelineError};

/// One declared label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegendEntry {
    /// Label name.
    pub name: String,
    /// Class index written into the canvas.
    pub index: ClassIndex,
}

/// Mapping from label name to class index.
#[derive(Debug, Clone, Default)]
pub struct Legend {
    entries: Vec<LegendEntry>,
    by_name: HashMap<String, ClassIndex>,
}

impl Legend {
    /// Build a legend from label names in declaration order.
    ///
    /// Returns the legend and one notice per repeated name.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MalformedLegend`] if the labels do not fit
    /// in an 8-bit class index.
    pub fn from_names<I, S>(names: I, base: IndexBase) -> Result<(Self, Vec<Notice>), PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut legend = Self::default();
        let mut notices = Vec::new();
        for (position, name) in names.into_iter().enumerate() {
            let name = name.into();
            let index = class_index_at(position, base)?;
            if legend.by_name.insert(name.clone(), index).is_some() {
                notices.push(Notice::document(NoticeKind::DuplicateLabel {
                    label: name.clone(),
                }));
            }
            legend.entries.push(LegendEntry { name, index });
        }
        Ok((legend, notices))
    }

    /// Resolve a label name.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownLabel`] if the name was never declared.
    pub fn index_of(&self, label: &str) -> Result<ClassIndex, PipelineError> {
        self.by_name
            .get(label)
            .copied()
            .ok_or_else(|| PipelineError::UnknownLabel(label.to_string()))
    }

    /// Declared labels in document order (repeats included).
    pub fn iter(&self) -> impl Iterator<Item = &LegendEntry> {
        self.entries.iter()
    }

    /// Number of declared labels (repeats included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no labels were declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Mapping from class index to display color.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorMap(BTreeMap<ClassIndex, Rgba<u8>>);

impl ColorMap {
    /// RGBA color of a class, alpha always 255.
    #[must_use]
    pub fn get(&self, index: ClassIndex) -> Option<Rgba<u8>> {
        self.0.get(&index).copied()
    }

    /// RGB-only form of a class color.
    #[must_use]
    pub fn rgb(&self, index: ClassIndex) -> Option<[u8; 3]> {
        self.get(index).map(|Rgba([r, g, b, _])| [r, g, b])
    }

    /// All colors in index order.
    pub fn iter(&self) -> impl Iterator<Item = (ClassIndex, Rgba<u8>)> + '_ {
        self.0.iter().map(|(&i, &c)| (i, c))
    }

    /// Number of colored classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no class has a color.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(ClassIndex, Rgba<u8>)> for ColorMap {
    fn from_iter<T: IntoIterator<Item = (ClassIndex, Rgba<u8>)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Load the label legend.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedLegend`] if a `<label>` has no
/// `<name>` or there are too many labels for an 8-bit raster.
pub fn load_legend(
    doc: &AnnotationDocument<'_>,
    base: IndexBase,
) -> Result<(Legend, Vec<Notice>), PipelineError> {
    let names = doc
        .label_elements()
        .enumerate()
        .map(|(position, node)| {
            child_text(node, "name").ok_or_else(|| {
                PipelineError::MalformedLegend(format!("label #{position} has no <name>"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Legend::from_names(names, base)
}

/// Load the per-class colors.
///
/// Uses the same enumeration as [`load_legend`], so every index has the
/// color of the label that produced it.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedLegend`] if any label lacks a
/// `<color>` or its color is not `#RRGGBB`.
pub fn load_colormap(
    doc: &AnnotationDocument<'_>,
    base: IndexBase,
) -> Result<ColorMap, PipelineError> {
    doc.label_elements()
        .enumerate()
        .map(|(position, node)| {
            let index = class_index_at(position, base)?;
            let name = child_text(node, "name").unwrap_or("?");
            let color = child_text(node, "color").ok_or_else(|| {
                PipelineError::MalformedLegend(format!("label `{name}` has no <color>"))
            })?;
            Ok((index, parse_hex_color(color)?))
        })
        .collect()
}

/// Parse `#RRGGBB` (the `#` is optional) into an opaque color.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedLegend`] unless the text is exactly
/// six hex digits after the optional `#`.
pub fn parse_hex_color(text: &str) -> Result<Rgba<u8>, PipelineError> {
    let trimmed = text.trim();
    let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
    let malformed = || PipelineError::MalformedLegend(format!("invalid color `{text}`"));
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(malformed());
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| malformed());
    Ok(Rgba([channel(0)?, channel(2)?, channel(4)?, 255]))
}

fn class_index_at(position: usize, base: IndexBase) -> Result<ClassIndex, PipelineError> {
    let index = position + base.first_index();
    ClassIndex::try_from(index).map_err(|_| {
        PipelineError::MalformedLegend(format!(
            "label #{position} would need class index {index}, more than an 8-bit raster holds"
        ))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const XML: &str = r##"<annotations>
  <meta><task><labels>
    <label><name>water</name><color>#0000FF</color></label>
    <label><name>land</name><color>#00ff00</color></label>
    <label><name>road</name><color>#808080</color></label>
  </labels></task></meta>
</annotations>"##;

    #[test]
    fn indices_are_one_based_by_default() {
        let doc = AnnotationDocument::parse(XML).unwrap();
        let (legend, notices) = load_legend(&doc, IndexBase::default()).unwrap();
        assert!(notices.is_empty());
        assert_eq!(legend.len(), 3);
        assert_eq!(legend.index_of("water").unwrap(), 1);
        assert_eq!(legend.index_of("land").unwrap(), 2);
        assert_eq!(legend.index_of("road").unwrap(), 3);
    }

    #[test]
    fn indices_can_be_zero_based() {
        let doc = AnnotationDocument::parse(XML).unwrap();
        let (legend, _) = load_legend(&doc, IndexBase::Zero).unwrap();
        assert_eq!(legend.index_of("water").unwrap(), 0);
        assert_eq!(legend.index_of("road").unwrap(), 2);
    }

    #[test]
    fn distinct_names_get_distinct_indices() {
        let doc = AnnotationDocument::parse(XML).unwrap();
        let (legend, _) = load_legend(&doc, IndexBase::One).unwrap();
        let mut indices: Vec<_> = legend.iter().map(|e| e.index).collect();
        indices.dedup();
        assert_eq!(indices.len(), legend.len());
    }

    #[test]
    fn unknown_label_fails() {
        let doc = AnnotationDocument::parse(XML).unwrap();
        let (legend, _) = load_legend(&doc, IndexBase::One).unwrap();
        assert!(matches!(
            legend.index_of("forest"),
            Err(PipelineError::UnknownLabel(ref l)) if l == "forest"
        ));
    }

    #[test]
    fn duplicate_name_takes_later_index() {
        let (legend, notices) =
            Legend::from_names(["a", "b", "a"], IndexBase::One).unwrap();
        assert_eq!(legend.index_of("a").unwrap(), 3);
        assert_eq!(legend.index_of("b").unwrap(), 2);
        assert_eq!(
            notices,
            vec![Notice::document(NoticeKind::DuplicateLabel {
                label: "a".to_string()
            })]
        );
    }

    #[test]
    fn too_many_labels_is_malformed() {
        let names: Vec<String> = (0..256).map(|i| format!("l{i}")).collect();
        assert!(Legend::from_names(names.clone(), IndexBase::Zero).is_ok());
        assert!(matches!(
            Legend::from_names(names, IndexBase::One),
            Err(PipelineError::MalformedLegend(_))
        ));
    }

    #[test]
    fn label_without_name_fails_legend() {
        let doc = AnnotationDocument::parse(
            "<annotations><meta><label><color>#000000</color></label></meta></annotations>",
        )
        .unwrap();
        assert!(matches!(
            load_legend(&doc, IndexBase::One),
            Err(PipelineError::MalformedLegend(_))
        ));
    }

    #[test]
    fn colormap_matches_indices() {
        let doc = AnnotationDocument::parse(XML).unwrap();
        let colors = load_colormap(&doc, IndexBase::One).unwrap();
        assert_eq!(colors.len(), 3);
        assert_eq!(colors.get(1), Some(Rgba([0, 0, 255, 255])));
        assert_eq!(colors.get(2), Some(Rgba([0, 255, 0, 255])));
        assert_eq!(colors.rgb(3), Some([128, 128, 128]));
        assert_eq!(colors.get(0), None);
    }

    #[test]
    fn colormap_fails_on_bad_color_but_legend_survives() {
        let xml = "<annotations><meta>\
            <label><name>a</name><color>#12345</color></label>\
            </meta></annotations>";
        let doc = AnnotationDocument::parse(xml).unwrap();
        assert!(load_legend(&doc, IndexBase::One).is_ok());
        assert!(matches!(
            load_colormap(&doc, IndexBase::One),
            Err(PipelineError::MalformedLegend(_))
        ));
    }

    #[test]
    fn colormap_fails_on_missing_color() {
        let xml = "<annotations><meta><label><name>a</name></label></meta></annotations>";
        let doc = AnnotationDocument::parse(xml).unwrap();
        assert!(matches!(
            load_colormap(&doc, IndexBase::One),
            Err(PipelineError::MalformedLegend(_))
        ));
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex_color("#FF8000").unwrap(), Rgba([255, 128, 0, 255]));
        assert_eq!(parse_hex_color("ff8000").unwrap(), Rgba([255, 128, 0, 255]));
        assert_eq!(parse_hex_color(" #000000 ").unwrap(), Rgba([0, 0, 0, 255]));
        for bad in ["", "#", "#12345", "#1234567", "#GG0000", "#ééé"] {
            assert!(parse_hex_color(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
