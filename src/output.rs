//! Terminal rendering of search outcomes and completions

use crate::query::search::SearchOutcome;
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Print a search outcome to stdout
pub fn print_search_outcome(
    outcome: &SearchOutcome,
    words: &[String],
    color: bool,
    show_excluded: bool,
) -> io::Result<()> {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    let mut stdout = StandardStream::stdout(choice);
    write_search_outcome(&mut stdout, outcome, words, show_excluded)
}

/// Render a search outcome: one `code  label` line per concept with the
/// query words highlighted, then the summary message and suggestions.
pub fn write_search_outcome<W: WriteColor>(
    out: &mut W,
    outcome: &SearchOutcome,
    words: &[String],
    show_excluded: bool,
) -> io::Result<()> {
    let result = match outcome {
        SearchOutcome::Matches(result) => result,
        SearchOutcome::TooManyMatches { message } => {
            out.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)).set_bold(true))?;
            writeln!(out, "{}", message)?;
            out.reset()?;
            return Ok(());
        }
    };

    let needles: Vec<String> = words.iter().map(|w| w.trim().to_lowercase()).collect();

    for (code, label) in &result.concepts {
        write_concept_line(out, code, label, &needles, Color::Green)?;
    }

    if show_excluded && !result.excluded_concepts.is_empty() {
        writeln!(out)?;
        out.set_color(ColorSpec::new().set_fg(Some(Color::Red)))?;
        writeln!(out, "Excluded:")?;
        out.reset()?;
        for (code, label) in &result.excluded_concepts {
            write_concept_line(out, code, label, &needles, Color::Red)?;
        }
    }

    if !result.message.is_empty() {
        writeln!(out)?;
        out.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
        writeln!(out, "{}", result.message)?;
        out.reset()?;
    }

    if !result.possible_extra_words.is_empty() {
        out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))?;
        write!(out, "Possible extra words: ")?;
        out.reset()?;
        writeln!(out, "{}", result.possible_extra_words.join(", "))?;
    }

    Ok(())
}

fn write_concept_line<W: WriteColor>(
    out: &mut W,
    code: &str,
    label: &str,
    needles: &[String],
    code_color: Color,
) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(code_color)))?;
    write!(out, "{:<20}", code)?;
    out.reset()?;
    write!(out, " ")?;

    let mut last = 0;
    for (start, end) in highlight_ranges(label, needles) {
        write!(out, "{}", &label[last..start])?;
        out.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
        write!(out, "{}", &label[start..end])?;
        out.reset()?;
        last = end;
    }
    writeln!(out, "{}", &label[last..])
}

/// Non-overlapping byte ranges of `label` matching any needle, case-insensitively
fn highlight_ranges(label: &str, needles: &[String]) -> Vec<(usize, usize)> {
    // Lowercasing must not move byte offsets
    if !label.is_ascii() {
        return Vec::new();
    }
    let lower = label.to_ascii_lowercase();

    let mut ranges: Vec<(usize, usize)> = needles
        .iter()
        .filter(|n| !n.is_empty())
        .flat_map(|needle| {
            lower
                .match_indices(needle.as_str())
                .map(move |(start, m)| (start, start + m.len()))
        })
        .collect();
    ranges.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Print autocomplete suggestions, one per line
pub fn print_completions(words: &[String]) -> io::Result<()> {
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    for word in words {
        writeln!(lock, "{}", word)?;
    }
    Ok(())
}
