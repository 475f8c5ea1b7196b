use std::io::Write;

use errata_core::{MetricsReport, PaperRecord, ProgressEvent};
use errata_reporting::OutputPaths;
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

fn short_id(id: &str) -> String {
    if id.chars().count() > 40 {
        let head: String = id.chars().take(40).collect();
        format!("{}...", head)
    } else {
        id.to_string()
    }
}

/// Print a progress event as a single line. Events with no line of their own
/// (stage transitions) print nothing.
pub fn print_progress(
    w: &mut dyn Write,
    event: &ProgressEvent,
    color: ColorMode,
) -> std::io::Result<()> {
    match event {
        ProgressEvent::Reviewing { .. } | ProgressEvent::JudgeBatch { .. } => {}
        ProgressEvent::Reviewed {
            index,
            total,
            paper_id,
            parsed,
            has_error,
            error_count,
            attempts,
        } => {
            let idx = index + 1;
            let id = short_id(paper_id);
            let retries = if *attempts > 1 {
                format!(" after {} attempts", attempts)
            } else {
                String::new()
            };
            if !parsed {
                if color.enabled() {
                    writeln!(w, "[{}/{}] {} -> {}{}", idx, total, id, "UNPARSED".yellow(), retries)?;
                } else {
                    writeln!(w, "[{}/{}] {} -> UNPARSED{}", idx, total, id, retries)?;
                }
            } else if *has_error {
                let label = format!("{} ERROR(S) CLAIMED", error_count);
                if color.enabled() {
                    writeln!(w, "[{}/{}] {} -> {}{}", idx, total, id, label.red(), retries)?;
                } else {
                    writeln!(w, "[{}/{}] {} -> {}{}", idx, total, id, label, retries)?;
                }
            } else if color.enabled() {
                writeln!(w, "[{}/{}] {} -> {}{}", idx, total, id, "NO ERROR".green(), retries)?;
            } else {
                writeln!(w, "[{}/{}] {} -> NO ERROR{}", idx, total, id, retries)?;
            }
        }
        ProgressEvent::ReviewFailed {
            index,
            total,
            paper_id,
            attempts,
            message,
        } => {
            let line = format!(
                "[{}/{}] {} -> reviewer failed after {} attempts: {}",
                index + 1,
                total,
                short_id(paper_id),
                attempts,
                message
            );
            if color.enabled() {
                writeln!(w, "{}", line.red())?;
            } else {
                writeln!(w, "{}", line)?;
            }
        }
        ProgressEvent::Judged {
            paper_id,
            parsed,
            match_count,
        } => {
            let id = short_id(paper_id);
            if !parsed {
                if color.enabled() {
                    writeln!(w, "  judge {} -> {}", id, "UNPARSED".yellow())?;
                } else {
                    writeln!(w, "  judge {} -> UNPARSED", id)?;
                }
            } else {
                writeln!(w, "  judge {} -> {} match(es)", id, match_count)?;
            }
        }
        ProgressEvent::JudgeFailed { paper_id, message } => {
            if color.enabled() {
                writeln!(w, "  {} {}: {}", "JUDGE FAILED".red(), short_id(paper_id), message)?;
            } else {
                writeln!(w, "  JUDGE FAILED {}: {}", short_id(paper_id), message)?;
            }
        }
    }
    Ok(())
}

/// Print the dry-run listing: one line per paper with its prompt size.
pub fn print_dry_run(
    w: &mut dyn Write,
    records: &[PaperRecord],
    prompt_chars: &[usize],
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{} {} papers selected\n", "DRY RUN:".bold().cyan(), records.len())?;
    } else {
        writeln!(w, "DRY RUN: {} papers selected\n", records.len())?;
    }
    for (i, (record, chars)) in records.iter().zip(prompt_chars).enumerate() {
        writeln!(
            w,
            "[{}] {}  {} chars, {} annotated error(s)",
            i + 1,
            short_id(&record.id),
            chars,
            record.ground_truth_count()
        )?;
    }
    Ok(())
}

/// Print the corpus metrics and where the result files went.
pub fn print_metrics_summary(
    w: &mut dyn Write,
    report: &MetricsReport,
    paths: &OutputPaths,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    if color.enabled() {
        writeln!(w, "{}", "SUMMARY".bold())?;
    } else {
        writeln!(w, "SUMMARY")?;
    }
    writeln!(w, "  Papers evaluated: {}", report.n)?;
    writeln!(
        w,
        "  Precision: {:.3} micro, {:.3} macro",
        report.precision_micro, report.precision_macro
    )?;
    writeln!(
        w,
        "  Recall:    {:.3} micro, {:.3} macro",
        report.recall_micro, report.recall_macro
    )?;
    writeln!(w, "  PPR:       {:.3}", report.ppr)?;
    if report.judge_inconsistencies > 0 {
        let msg = format!(
            "  {} judged paper(s) had inconsistent match output",
            report.judge_inconsistencies
        );
        if color.enabled() {
            writeln!(w, "{}", msg.yellow())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }
    writeln!(w)?;
    writeln!(w, "Responses written to {}", paths.responses.display())?;
    writeln!(w, "Metrics written to {}", paths.metrics.display())?;
    Ok(())
}
