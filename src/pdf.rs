//! PDF rendering of the audit report.
//!
//! A plain, text-only document: header, summary, category table, and the
//! recommended fixes. Layout is a simple line cursor with page breaks.

use printpdf::{BuiltinFont, Mm, PdfDocument};

use crate::audit::report::AuditReport;

const WRAP_COLUMNS: usize = 95;

enum Line {
    Heading(String),
    Sub(String),
    Text(String),
    Gap,
}

/// Wrap a long string on word boundaries.
fn wrap(text: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + word.chars().count() + 1 > columns {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn push_wrapped(lines: &mut Vec<Line>, text: &str) {
    for line in wrap(text, WRAP_COLUMNS) {
        lines.push(Line::Text(line));
    }
}

fn report_lines(report: &AuditReport) -> Vec<Line> {
    let mut lines = Vec::new();

    lines.push(Line::Heading("Production Readiness Audit".to_string()));
    lines.push(Line::Text(format!("Target: {}", report.url)));
    lines.push(Line::Text(format!(
        "Audit {} | started {}",
        report.audit_id,
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    )));
    lines.push(Line::Gap);

    lines.push(Line::Sub(format!(
        "Score: {}/100  Grade: {}",
        report.score, report.grade
    )));
    push_wrapped(&mut lines, &report.summary);
    lines.push(Line::Gap);

    lines.push(Line::Sub("Category scores".to_string()));
    for category in &report.category_scores {
        lines.push(Line::Text(format!(
            "{}: {}/{} ({} issues)",
            category.category, category.score, category.max_score, category.issues_count
        )));
    }
    lines.push(Line::Gap);

    lines.push(Line::Sub("Findings".to_string()));
    lines.push(Line::Text(format!(
        "Console errors: {}",
        report.console_errors.len()
    )));
    lines.push(Line::Text(format!(
        "Network failures: {}",
        report.network_failures.len()
    )));
    lines.push(Line::Text(format!(
        "Slow endpoints: {} | Large assets: {}",
        report.performance.slow_endpoints.len(),
        report.performance.largest_assets.len()
    )));
    lines.push(Line::Text(format!(
        "Accessibility violations: {}",
        report.accessibility_violations.len()
    )));
    lines.push(Line::Text(format!(
        "Pages audited: {} | Total requests: {}",
        report.pages_audited, report.total_requests
    )));
    lines.push(Line::Gap);

    if !report.recommended_fixes.is_empty() {
        lines.push(Line::Sub("Recommended fixes".to_string()));
        for fix in &report.recommended_fixes {
            push_wrapped(&mut lines, &format!("[{}] {}", fix.category, fix.issue));
            push_wrapped(&mut lines, &fix.recommendation);
            for url in fix.affected_urls.iter().take(3) {
                push_wrapped(&mut lines, &format!("  - {url}"));
            }
            lines.push(Line::Gap);
        }
    }

    lines
}

/// Render the report to PDF bytes.
pub fn render_report_pdf(report: &AuditReport) -> Result<Vec<u8>, String> {
    let title = format!("Audit Report {}", report.audit_id);
    let (doc, first_page, first_layer) = PdfDocument::new(title, Mm(210.0), Mm(297.0), "Layer 1");
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| e.to_string())?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| e.to_string())?;

    let mut layer = doc.get_page(first_page).get_layer(first_layer);
    let mut y = 280.0;

    for line in report_lines(report) {
        if y < 20.0 {
            let (page, layer_index) = doc.add_page(Mm(210.0), Mm(297.0), "Layer 1");
            layer = doc.get_page(page).get_layer(layer_index);
            y = 280.0;
        }
        match line {
            Line::Heading(text) => {
                layer.use_text(text, 16.0, Mm(15.0), Mm(y), &bold);
                y -= 9.0;
            }
            Line::Sub(text) => {
                layer.use_text(text, 12.0, Mm(15.0), Mm(y), &bold);
                y -= 7.0;
            }
            Line::Text(text) => {
                layer.use_text(text, 10.0, Mm(15.0), Mm(y), &regular);
                y -= 5.5;
            }
            Line::Gap => {
                y -= 4.0;
            }
        }
    }

    let mut bytes = Vec::new();
    doc.save(&mut std::io::BufWriter::new(&mut bytes))
        .map_err(|e| e.to_string())?;
    Ok(bytes)
}
