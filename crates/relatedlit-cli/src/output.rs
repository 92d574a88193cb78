use std::io::Write;

use owo_colors::OwoColorize;
use relatedlit_core::{Anchor, ReferenceEntry};

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Authors shown before "et al.".
const SHOWN_AUTHORS: usize = 3;

/// Print the ranked list of related records.
pub fn print_results(
    w: &mut dyn Write,
    seed: &str,
    results: &[ReferenceEntry],
    color: ColorMode,
) -> std::io::Result<()> {
    let header = format!("Related to record {}: {} results", seed, results.len());
    let sep = "=".repeat(60);
    if color.enabled() {
        writeln!(w, "{}", header.bold())?;
        writeln!(w, "{}", sep.bold())?;
    } else {
        writeln!(w, "{}", header)?;
        writeln!(w, "{}", sep)?;
    }

    if results.is_empty() {
        writeln!(w, "No related records found.")?;
        return Ok(());
    }

    for (i, entry) in results.iter().enumerate() {
        writeln!(w)?;
        let title = truncate(&entry.title, 90);
        if color.enabled() {
            writeln!(w, "{:>3}. {}", i + 1, title.bold())?;
        } else {
            writeln!(w, "{:>3}. {}", i + 1, title)?;
        }

        let mut meta = vec![format_authors(&entry.authors, entry.author_count)];
        if let Some(year) = entry.year {
            meta.push(year.to_string());
        }
        if let Some(citations) = entry.best_citation_count() {
            meta.push(format!("{} citations", citations));
        }
        if let Some(publication) = &entry.publication_info {
            meta.push(publication.clone());
        }
        writeln!(w, "     {}", meta.join(" | "))?;

        let score = score_line(entry);
        if color.enabled() {
            writeln!(w, "     {}", score.cyan())?;
        } else {
            writeln!(w, "     {}", score)?;
        }

        if !entry.shared_ref_titles.is_empty() {
            let why = format!("Also cites: {}", entry.shared_ref_titles.join("; "));
            if color.enabled() {
                writeln!(w, "     {}", truncate(&why, 110).dimmed())?;
            } else {
                writeln!(w, "     {}", truncate(&why, 110))?;
            }
        }

        let link = entry
            .local_link
            .as_deref()
            .or(entry.inspire_url.as_deref())
            .or(entry.doi_url.as_deref())
            .or(entry.arxiv_url.as_deref());
        if let Some(link) = link {
            if color.enabled() {
                writeln!(w, "     {}", link.dimmed())?;
            } else {
                writeln!(w, "     {}", link)?;
            }
        }
    }
    writeln!(w)?;
    Ok(())
}

/// Print the anchors chosen for a seed.
pub fn print_anchors(
    w: &mut dyn Write,
    seed: &str,
    anchors: &[Anchor],
    color: ColorMode,
) -> std::io::Result<()> {
    let header = format!("Anchors for record {}: {}", seed, anchors.len());
    if color.enabled() {
        writeln!(w, "{}", header.bold())?;
    } else {
        writeln!(w, "{}", header)?;
    }

    for (i, anchor) in anchors.iter().enumerate() {
        let citations = anchor
            .citations
            .map(|c| c.to_string())
            .unwrap_or_else(|| "?".to_string());
        let stats = format!("weight {:.3}, {} citations", anchor.weight, citations);
        if color.enabled() {
            writeln!(
                w,
                "{:>3}. [{}] {} ({})",
                i + 1,
                anchor.recid.cyan(),
                truncate(&anchor.title, 70),
                stats.dimmed()
            )?;
        } else {
            writeln!(
                w,
                "{:>3}. [{}] {} ({})",
                i + 1,
                anchor.recid,
                truncate(&anchor.title, 70),
                stats
            )?;
        }
    }
    Ok(())
}

fn score_line(entry: &ReferenceEntry) -> String {
    let mut parts = vec![format!(
        "score {:.3}",
        entry.combined_score.unwrap_or(0.0)
    )];
    if let Some(coupling) = entry.coupling_score {
        parts.push(format!("coupling {:.3}", coupling));
    }
    if let Some(co) = entry.co_citation_score {
        let count = entry.co_citation_count.unwrap_or(0);
        parts.push(format!("co-citation {:.3} ({} together)", co, count));
    }
    if let Some(shared) = entry.shared_ref_count {
        parts.push(format!("{} shared references", shared));
    }
    parts.join(", ")
}

fn format_authors(authors: &[String], total: Option<u32>) -> String {
    let total = total.map(|t| t as usize).unwrap_or(authors.len());
    match authors.len() {
        0 => "Unknown authors".to_string(),
        n if n <= SHOWN_AUTHORS && total <= n => authors.join(", "),
        _ => format!(
            "{} et al.",
            authors
                .iter()
                .take(SHOWN_AUTHORS)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}
