//! Classifier Module
//!
//! Decides whether a leaf document is an aggregate (RUA) report, a failure (RUF)
//! report, or neither. Classification is a chain of scoring strategies run in a
//! fixed order:
//!
//! 1. [`StructuralProbe`] looks at XML element structure and can settle the
//!    label outright.
//! 2. [`KeywordScorer`] counts report vocabulary in the document text.
//! 3. [`LayoutHeuristics`] adds points for tabular data and pasted mail headers.
//!
//! Only XML and HTML leaves are scored. Every other kind (plain text bodies,
//! unknown binaries, containers left unexpanded at the depth ceiling) is
//! Unclassified without consulting the chain.
//!
//! When no strategy settles the label, the higher total wins. Equal totals,
//! including zero against zero, give [`ClassificationLabel::Unclassified`].
//! Classification never fails: content that cannot be read degrades to
//! Unclassified with a `ClassificationAmbiguous` warning.
use tracing::debug;

use crate::models::{ClassificationLabel, Confidence, ContainerKind, LeafDocument, Warning, WarningKind};
use crate::sniffer::is_probably_text;
use crate::xml_parser::{probe_xml, XmlShape};

const RUA_TERMS: &[&str] = &[
    "aggregate report",
    "aggregate feedback",
    "report metadata",
    "policy published",
    "source ip",
    "message count",
    "policy evaluated",
    "dmarc aggregate",
];

const RUF_TERMS: &[&str] = &[
    "forensic report",
    "failure report",
    "auth failure",
    "authentication failure",
    "original message",
    "message headers",
    "delivery result",
    "authentication-results",
    "forensic feedback",
    "dmarc forensic",
];

/// A table with more rows than this looks like per-source aggregate data.
const TABLE_ROW_THRESHOLD: usize = 5;
const LAYOUT_POINTS: u32 = 2;

/// Pre-digested view of a leaf shared by every strategy.
#[derive(Debug)]
pub struct DocumentView {
    pub kind: ContainerKind,
    /// Lowercased readable text, `None` for binary content.
    pub text: Option<String>,
    /// Lowercased raw markup, kept for layout checks on HTML.
    pub markup: Option<String>,
    /// Outcome of the structural XML probe, for XML leaves only.
    pub xml: Option<std::result::Result<XmlShape, String>>,
}

impl DocumentView {
    pub fn new(doc: &LeafDocument) -> Self {
        let mut view = DocumentView {
            kind: doc.kind,
            text: None,
            markup: None,
            xml: None,
        };
        if !is_probably_text(&doc.content) {
            return view;
        }
        let raw = String::from_utf8_lossy(&doc.content);
        match doc.kind {
            ContainerKind::Xml => {
                let probed = probe_xml(&raw).map_err(|e| e.to_string());
                view.text = Some(match &probed {
                    Ok(shape) => shape.searchable_text(),
                    Err(_) => html_to_text(&raw.to_lowercase()),
                });
                view.xml = Some(probed);
            }
            ContainerKind::Html => {
                let markup = raw.to_lowercase();
                view.text = Some(html_to_text(&markup));
                view.markup = Some(markup);
            }
            _ => {}
        }
        view
    }
}

/// Points a strategy awards, and optionally a label it is certain about.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Signal {
    pub rua: u32,
    pub ruf: u32,
    pub decisive: Option<ClassificationLabel>,
    /// Something the strategy could not evaluate.
    pub note: Option<String>,
}

impl Signal {
    fn decided(label: ClassificationLabel) -> Self {
        Signal {
            decisive: Some(label),
            ..Signal::default()
        }
    }
}

/// One layer of the classifier.
pub trait ScoringStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self, view: &DocumentView) -> Signal;
}

/// Settles the label from XML element structure.
#[derive(Debug, Default)]
pub struct StructuralProbe;

impl ScoringStrategy for StructuralProbe {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn score(&self, view: &DocumentView) -> Signal {
        match &view.xml {
            Some(Ok(shape)) => score_shape(shape),
            Some(Err(e)) => Signal {
                note: Some(format!("XML could not be read: {}", e)),
                ..Signal::default()
            },
            None => Signal::default(),
        }
    }
}

fn score_shape(shape: &XmlShape) -> Signal {
    if shape.has("report_metadata") && shape.has("record") {
        return Signal::decided(ClassificationLabel::Rua);
    }
    if shape.has("auth_failure") {
        return Signal::decided(ClassificationLabel::Ruf);
    }
    if shape.root == "feedback" {
        if shape.has("policy_published") && shape.has("record") {
            return Signal::decided(ClassificationLabel::Rua);
        }
        if shape.has("original_message") {
            return Signal::decided(ClassificationLabel::Ruf);
        }
    }
    // Fragments of either schema still count for something.
    let mut signal = Signal::default();
    for element in ["report_metadata", "policy_published", "record"] {
        if shape.has(element) {
            signal.rua += 1;
        }
    }
    for element in ["original_message", "feedback_type"] {
        if shape.has(element) {
            signal.ruf += 1;
        }
    }
    signal
}

/// Counts aggregate and failure report vocabulary.
#[derive(Debug)]
pub struct KeywordScorer {
    rua_terms: Vec<&'static str>,
    ruf_terms: Vec<&'static str>,
}

impl Default for KeywordScorer {
    fn default() -> Self {
        KeywordScorer {
            rua_terms: RUA_TERMS.to_vec(),
            ruf_terms: RUF_TERMS.to_vec(),
        }
    }
}

impl ScoringStrategy for KeywordScorer {
    fn name(&self) -> &'static str {
        "keywords"
    }

    fn score(&self, view: &DocumentView) -> Signal {
        let Some(text) = &view.text else {
            return Signal::default();
        };
        let hits = |terms: &[&str]| terms.iter().filter(|t| text.contains(*t)).count() as u32;
        Signal {
            rua: hits(&self.rua_terms),
            ruf: hits(&self.ruf_terms),
            ..Signal::default()
        }
    }
}

/// Large tables read as aggregate data; a block of mail headers reads as a
/// failure report carrying the original message.
#[derive(Debug, Default)]
pub struct LayoutHeuristics;

impl ScoringStrategy for LayoutHeuristics {
    fn name(&self) -> &'static str {
        "layout"
    }

    fn score(&self, view: &DocumentView) -> Signal {
        let mut signal = Signal::default();
        if let Some(markup) = &view.markup {
            if max_table_rows(markup) > TABLE_ROW_THRESHOLD {
                signal.rua += LAYOUT_POINTS;
            }
        }
        if let Some(text) = &view.text {
            if ["received:", "from:", "subject:"].iter().all(|h| text.contains(h)) {
                signal.ruf += LAYOUT_POINTS;
            }
        }
        signal
    }
}

/// Outcome of classifying one leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: ClassificationLabel,
    pub confidence: Confidence,
    pub rua_score: u32,
    pub ruf_score: u32,
    pub warnings: Vec<Warning>,
}

impl Classification {
    fn unclassified() -> Self {
        Classification {
            label: ClassificationLabel::Unclassified,
            confidence: Confidence::None,
            rua_score: 0,
            ruf_score: 0,
            warnings: Vec::new(),
        }
    }
}

/// Runs the scoring strategies over a leaf and settles on a label.
pub struct ReportClassifier {
    strategies: Vec<Box<dyn ScoringStrategy>>,
}

impl Default for ReportClassifier {
    fn default() -> Self {
        Self::new(vec![
            Box::new(StructuralProbe),
            Box::new(KeywordScorer::default()),
            Box::new(LayoutHeuristics),
        ])
    }
}

impl ReportClassifier {
    pub fn new(strategies: Vec<Box<dyn ScoringStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn classify(&self, doc: &LeafDocument) -> Classification {
        if !matches!(doc.kind, ContainerKind::Xml | ContainerKind::Html) {
            debug!(kind = %doc.kind, "{} is not markup, left unclassified", doc.name);
            return Classification::unclassified();
        }
        let view = DocumentView::new(doc);
        let location = || {
            let mut location = doc.provenance.clone();
            location.push(doc.name.clone());
            location
        };
        let ambiguous = |message: String| {
            Warning::new(WarningKind::ClassificationAmbiguous, location(), message)
        };

        let mut rua_score = 0;
        let mut ruf_score = 0;
        let mut warnings = Vec::new();
        for strategy in &self.strategies {
            let signal = strategy.score(&view);
            debug!(
                strategy = strategy.name(),
                rua = signal.rua,
                ruf = signal.ruf,
                decisive = ?signal.decisive,
                "scored {}",
                doc.name
            );
            if let Some(note) = signal.note {
                warnings.push(ambiguous(note));
            }
            rua_score += signal.rua;
            ruf_score += signal.ruf;
            if let Some(label) = signal.decisive {
                return Classification {
                    label,
                    confidence: Confidence::Structural,
                    rua_score,
                    ruf_score,
                    warnings,
                };
            }
        }

        if view.text.is_none() {
            warnings.push(ambiguous(format!("{} content is not readable text", doc.kind)));
        }
        let label = if rua_score > ruf_score {
            ClassificationLabel::Rua
        } else if ruf_score > rua_score {
            ClassificationLabel::Ruf
        } else {
            if rua_score > 0 {
                warnings.push(ambiguous(format!(
                    "aggregate and failure evidence tied at {}",
                    rua_score
                )));
            }
            ClassificationLabel::Unclassified
        };
        let confidence = match label {
            ClassificationLabel::Unclassified => Confidence::None,
            _ => Confidence::Heuristic,
        };
        Classification {
            label,
            confidence,
            rua_score,
            ruf_score,
            warnings,
        }
    }
}

/// Visible text of lowercased markup: tags, comments, scripts and styles removed,
/// common entities decoded, whitespace collapsed.
fn html_to_text(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut rest = markup;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        out.push(' ');
        let tag = &rest[open..];
        let end = if tag.starts_with("<script") {
            tag.find("</script>").map(|i| i + "</script>".len())
        } else if tag.starts_with("<style") {
            tag.find("</style>").map(|i| i + "</style>".len())
        } else if tag.starts_with("<!--") {
            tag.find("-->").map(|i| i + "-->".len())
        } else {
            tag.find('>').map(|i| i + 1)
        };
        rest = match end {
            Some(end) => &tag[end..],
            None => "",
        };
    }
    out.push_str(rest);

    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Row count of the largest table in lowercased markup.
fn max_table_rows(markup: &str) -> usize {
    markup
        .split("<table")
        .skip(1)
        .map(|segment| {
            let body = segment.split("</table").next().unwrap_or_default();
            body.match_indices("<tr")
                .filter(|(i, tag)| {
                    body[i + tag.len()..]
                        .chars()
                        .next()
                        .is_some_and(|c| c == '>' || c.is_ascii_whitespace())
                })
                .count()
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(kind: ContainerKind, content: &str) -> LeafDocument {
        LeafDocument {
            name: "doc".into(),
            kind,
            content: content.as_bytes().to_vec(),
            provenance: vec!["inbox.eml".into()],
            depth: 1,
            warnings: Vec::new(),
        }
    }

    const AGGREGATE_XML: &str = r#"<?xml version="1.0"?>
<feedback>
  <report_metadata><org_name>google.com</org_name></report_metadata>
  <policy_published><domain>example.com</domain></policy_published>
  <record><row><source_ip>192.0.2.1</source_ip><count>2</count></row></record>
</feedback>"#;

    const FAILURE_XML: &str = r#"<feedback>
  <feedback_type>auth-failure</feedback_type>
  <auth_failure>dmarc</auth_failure>
  <original_message>Received: from mail.example.com</original_message>
</feedback>"#;

    #[test]
    fn test_structural_aggregate() {
        let result = ReportClassifier::default().classify(&leaf(ContainerKind::Xml, AGGREGATE_XML));
        assert_eq!(result.label, ClassificationLabel::Rua);
        assert_eq!(result.confidence, Confidence::Structural);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_structural_failure() {
        let result = ReportClassifier::default().classify(&leaf(ContainerKind::Xml, FAILURE_XML));
        assert_eq!(result.label, ClassificationLabel::Ruf);
        assert_eq!(result.confidence, Confidence::Structural);
    }

    #[test]
    fn test_feedback_root_with_original_message() {
        let xml = "<feedback><original_message>x</original_message></feedback>";
        let result = ReportClassifier::default().classify(&leaf(ContainerKind::Xml, xml));
        assert_eq!(result.label, ClassificationLabel::Ruf);
    }

    #[test]
    fn test_plain_text_is_never_scored() {
        let text = "DMARC aggregate report summary, source ip list attached";
        let result = ReportClassifier::default().classify(&leaf(ContainerKind::BinaryUnknown, text));
        assert_eq!(result, Classification::unclassified());
        let arf = "Feedback-Type: auth-failure\r\nUser-Agent: Mailer/1.0\r\nVersion: 1\r\n";
        let result = ReportClassifier::default().classify(&leaf(ContainerKind::BinaryUnknown, arf));
        assert_eq!(result.label, ClassificationLabel::Unclassified);
    }

    #[test]
    fn test_unexpanded_container_is_unclassified() {
        let eml = "From: a@example.com\r\nSubject: DMARC aggregate report\r\n\r\n\
                   report metadata, policy published, source ip";
        let result = ReportClassifier::default().classify(&leaf(ContainerKind::Eml, eml));
        assert_eq!(result.label, ClassificationLabel::Unclassified);
        assert_eq!(result.confidence, Confidence::None);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_html_aggregate_rendering() {
        let mut rows = String::new();
        for i in 0..8 {
            rows.push_str(&format!("<tr><td>192.0.2.{}</td><td>4</td></tr>\n", i));
        }
        let html = format!(
            "<html><head><style>.x {{ color: red }}</style></head><body>\
             <h1>DMARC Aggregate Report</h1><p>Report Metadata</p><p>Policy Published</p>\
             <table><tr><th>Source IP</th><th>Message Count</th></tr>{}</table></body></html>",
            rows
        );
        let result = ReportClassifier::default().classify(&leaf(ContainerKind::Html, &html));
        assert_eq!(result.label, ClassificationLabel::Rua);
        assert_eq!(result.confidence, Confidence::Heuristic);
        assert_eq!(result.ruf_score, 0);
        // Six terms plus the table bonus.
        assert_eq!(result.rua_score, 6 + LAYOUT_POINTS);
    }

    #[test]
    fn test_pasted_headers_score_as_failure() {
        let html = "<html><body><pre>Received: from a\nFrom: b\nSubject: c</pre>\
                    <p>Authentication-Results: fail</p></body></html>";
        let result = ReportClassifier::default().classify(&leaf(ContainerKind::Html, html));
        assert_eq!(result.label, ClassificationLabel::Ruf);
        assert_eq!(result.ruf_score, 1 + LAYOUT_POINTS);
    }

    #[test]
    fn test_tie_is_unclassified() {
        let html = "<p>this aggregate report mentions a forensic report too</p>";
        let result = ReportClassifier::default().classify(&leaf(ContainerKind::Html, html));
        assert_eq!(result.label, ClassificationLabel::Unclassified);
        assert_eq!(result.confidence, Confidence::None);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].kind, WarningKind::ClassificationAmbiguous);
    }

    #[test]
    fn test_no_evidence_is_quietly_unclassified() {
        let result = ReportClassifier::default().classify(&leaf(ContainerKind::Html, "<p>hello</p>"));
        assert_eq!(result.label, ClassificationLabel::Unclassified);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_binary_markup_leaf_warns() {
        let mut doc = leaf(ContainerKind::Html, "");
        doc.content = vec![0, 159, 146, 150, 0, 1];
        let result = ReportClassifier::default().classify(&doc);
        assert_eq!(result.label, ClassificationLabel::Unclassified);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].path, vec!["inbox.eml", "doc"]);
    }

    #[test]
    fn test_unreadable_xml_falls_back_to_keywords() {
        let xml = "<feedback><report_metadata>aggregate report</feedback>";
        let result = ReportClassifier::default().classify(&leaf(ContainerKind::Xml, xml));
        assert_eq!(result.label, ClassificationLabel::Rua);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = ReportClassifier::default();
        let doc = leaf(ContainerKind::Xml, AGGREGATE_XML);
        assert_eq!(classifier.classify(&doc), classifier.classify(&doc));
    }

    #[test]
    fn test_html_to_text() {
        let text = html_to_text("<p>a&amp;b</p><script>var x = '<p>';</script><!-- c -->d");
        assert_eq!(text, "a&b d");
        assert_eq!(max_table_rows("<table><tr><td></td></tr><track></table>"), 1);
    }
}
