//! Per-item diagnostics: `+` created, `~` converged, `-` removed, `=` in
//! place already.

use colored::Colorize;

pub fn created(msg: &str) {
    println!("{} {}", "+".green().bold(), msg);
}

pub fn changed(msg: &str) {
    println!("{} {}", "~".yellow().bold(), msg);
}

pub fn removed(msg: &str) {
    println!("{} {}", "-".red().bold(), msg);
}

pub fn unchanged(msg: &str) {
    println!("{} {}", "=".dimmed(), msg.dimmed());
}

/// The closing line, printed whether the run finished or aborted.
pub fn tally(finished: usize, total: usize) {
    println!("{finished}/{total} things up to date");
}

/// Line-oriented before/after diff of a file rewrite, with the common
/// prefix and suffix trimmed away.
pub fn content_diff(path: &str, old: &[u8], new: &[u8]) {
    let old: Vec<&str> = split_lines(old);
    let new: Vec<&str> = split_lines(new);
    let (start, old_end, new_end) = changed_range(&old, &new);

    println!("{}", format!("--- {path}").dimmed());
    for line in &old[start..old_end] {
        println!("{}", format!("-{line}").red());
    }
    for line in &new[start..new_end] {
        println!("{}", format!("+{line}").green());
    }
}

fn split_lines(data: &[u8]) -> Vec<&str> {
    if data.is_empty() {
        return Vec::new();
    }
    std::str::from_utf8(data)
        .map(|text| text.lines().collect())
        .unwrap_or_else(|_| vec!["<binary content>"])
}

/// Indices delimiting the lines that actually differ: a shared start, and
/// one end per side before the shared suffix.
fn changed_range(old: &[&str], new: &[&str]) -> (usize, usize, usize) {
    let mut start = 0;
    while start < old.len() && start < new.len() && old[start] == new[start] {
        start += 1;
    }
    let mut old_end = old.len();
    let mut new_end = new.len();
    while old_end > start && new_end > start && old[old_end - 1] == new[new_end - 1] {
        old_end -= 1;
        new_end -= 1;
    }
    (start, old_end, new_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changed_range_trims_common_lines() {
        let old = vec!["a", "b", "c", "d"];
        let new = vec!["a", "x", "y", "d"];
        assert_eq!(changed_range(&old, &new), (1, 3, 3));
    }

    #[test]
    fn changed_range_handles_pure_append() {
        let old = vec!["a"];
        let new = vec!["a", "b"];
        assert_eq!(changed_range(&old, &new), (1, 1, 2));
    }

    #[test]
    fn changed_range_identical_input_is_empty() {
        let lines = vec!["same"];
        assert_eq!(changed_range(&lines, &lines), (1, 1, 1));
    }
}
