//! Choosing which pages and resolutions a run covers.
//!
//! Selections are made up front; the run itself never prompts. Interactive
//! selection goes through [`PromptSelector`], which is generic over its reader
//! and writer so the flows can be driven from tests.

use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use thiserror::Error;

use crate::matrix::{self, CaptureJob, Resolution};

/// Result type for selection
pub type SelectResult<T> = Result<T, SelectError>;

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid choice '{0}'")]
    InvalidChoice(String),

    #[error("no {0} selected")]
    Empty(&'static str),
}

/// Pages and resolutions chosen for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub urls: Vec<String>,
    pub resolutions: Vec<Resolution>,
}

impl Selection {
    pub fn new(urls: Vec<String>, resolutions: Vec<Resolution>) -> Self {
        Self { urls, resolutions }
    }

    /// Jobs in url-major order
    pub fn jobs(&self) -> Vec<CaptureJob> {
        matrix::jobs(&self.urls, &self.resolutions)
    }

    fn non_empty(self) -> SelectResult<Self> {
        if self.urls.is_empty() {
            return Err(SelectError::Empty("pages"));
        }
        if self.resolutions.is_empty() {
            return Err(SelectError::Empty("resolutions"));
        }
        Ok(self)
    }
}

/// Decides the job set before a run starts
pub trait JobSelector {
    /// Pages and resolutions to compare
    fn select_compare(&mut self, urls: &[String], resolutions: &[Resolution]) -> SelectResult<Selection>;

    /// Pages and resolutions to (re)record; `missing` lists the pages that have
    /// no baseline yet
    fn select_record(
        &mut self,
        urls: &[String],
        resolutions: &[Resolution],
        missing: &[String],
    ) -> SelectResult<Selection>;
}

/// Pages from `urls` whose stem has no baseline in `existing`, in config order
pub fn pages_without_baselines(urls: &[String], existing: &BTreeSet<String>) -> Vec<String> {
    urls.iter()
        .filter(|url| match matrix::artifact_stem(url) {
            Ok(stem) => !existing.contains(&stem),
            Err(_) => true,
        })
        .cloned()
        .collect()
}

/// Parse a 1-based selection such as `all`, `1,3,5` or `2-4,7`.
///
/// Returns ascending 0-based indices below `len`. Out-of-range, reversed or
/// unparsable entries are ignored and duplicates collapse.
pub fn parse_indices(input: &str, len: usize) -> Vec<usize> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("all") {
        return (0..len).collect();
    }

    let mut picked = BTreeSet::new();
    for part in input.split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            if let (Some(start), Some(end)) = (one_based(start, len), one_based(end, len)) {
                picked.extend(start..=end);
            }
        } else if let Some(index) = one_based(part, len) {
            picked.insert(index);
        }
    }
    picked.into_iter().collect()
}

fn one_based(raw: &str, len: usize) -> Option<usize> {
    let n: usize = raw.trim().parse().ok()?;
    (1..=len).contains(&n).then(|| n - 1)
}

fn pick<T: Clone>(items: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().filter_map(|&i| items.get(i).cloned()).collect()
}

// ============================================================================
// Non-interactive selectors
// ============================================================================

/// Everything, no questions asked
#[derive(Debug, Clone, Copy, Default)]
pub struct AllJobs;

impl JobSelector for AllJobs {
    fn select_compare(&mut self, urls: &[String], resolutions: &[Resolution]) -> SelectResult<Selection> {
        Selection::new(urls.to_vec(), resolutions.to_vec()).non_empty()
    }

    fn select_record(
        &mut self,
        urls: &[String],
        resolutions: &[Resolution],
        _missing: &[String],
    ) -> SelectResult<Selection> {
        Selection::new(urls.to_vec(), resolutions.to_vec()).non_empty()
    }
}

/// Selection given on the command line, e.g. `--urls 1,3 --resolutions 1-2`.
///
/// An absent list means all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedSelection {
    pub urls: Option<String>,
    pub resolutions: Option<String>,
}

impl FixedSelection {
    pub fn new(urls: Option<String>, resolutions: Option<String>) -> Self {
        Self { urls, resolutions }
    }

    fn resolve(&self, urls: &[String], resolutions: &[Resolution]) -> SelectResult<Selection> {
        let urls = match &self.urls {
            Some(picks) => pick(urls, &parse_indices(picks, urls.len())),
            None => urls.to_vec(),
        };
        let resolutions = match &self.resolutions {
            Some(picks) => pick(resolutions, &parse_indices(picks, resolutions.len())),
            None => resolutions.to_vec(),
        };
        Selection::new(urls, resolutions).non_empty()
    }
}

impl JobSelector for FixedSelection {
    fn select_compare(&mut self, urls: &[String], resolutions: &[Resolution]) -> SelectResult<Selection> {
        self.resolve(urls, resolutions)
    }

    fn select_record(
        &mut self,
        urls: &[String],
        resolutions: &[Resolution],
        _missing: &[String],
    ) -> SelectResult<Selection> {
        self.resolve(urls, resolutions)
    }
}

// ============================================================================
// Terminal prompts
// ============================================================================

/// Interactive selection over any line reader and writer
pub struct PromptSelector<R, W> {
    input: R,
    output: W,
}

impl PromptSelector<io::StdinLock<'static>, io::Stdout> {
    /// Prompts on the process terminal
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> PromptSelector<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Give back the writer, e.g. to inspect what was printed
    pub fn into_output(self) -> W {
        self.output
    }

    fn ask(&mut self, question: &str) -> SelectResult<String> {
        write!(self.output, "{}", question)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(SelectError::Cancelled);
        }
        Ok(line.trim().to_string())
    }

    fn list<T: std::fmt::Display>(&mut self, heading: &str, items: &[T]) -> SelectResult<()> {
        writeln!(self.output, "{}", heading)?;
        for (i, item) in items.iter().enumerate() {
            writeln!(self.output, "{}. {}", i + 1, item)?;
        }
        Ok(())
    }

    fn pick_pages(&mut self, urls: &[String]) -> SelectResult<Vec<String>> {
        self.list("\nAvailable pages:", urls)?;
        let answer = self.ask("\nSelect pages by number or range (e.g. 1,3,5 or 2-15), or \"all\": ")?;
        Ok(pick(urls, &parse_indices(&answer, urls.len())))
    }

    fn pick_resolutions(&mut self, resolutions: &[Resolution]) -> SelectResult<Vec<Resolution>> {
        self.list("\nAvailable resolutions:", resolutions)?;
        let answer = self.ask("\nSelect resolutions by number (e.g. 1,3), or \"all\": ")?;
        Ok(pick(resolutions, &parse_indices(&answer, resolutions.len())))
    }
}

impl<R: BufRead, W: Write> JobSelector for PromptSelector<R, W> {
    /// Asks for pages until at least one is chosen; all resolutions are used
    fn select_compare(&mut self, urls: &[String], resolutions: &[Resolution]) -> SelectResult<Selection> {
        loop {
            let chosen = self.pick_pages(urls)?;
            if !chosen.is_empty() {
                writeln!(self.output, "Selected for comparison: {}", chosen.join(", "))?;
                return Selection::new(chosen, resolutions.to_vec()).non_empty();
            }
            writeln!(self.output, "No pages selected, try again.")?;
        }
    }

    fn select_record(
        &mut self,
        urls: &[String],
        resolutions: &[Resolution],
        missing: &[String],
    ) -> SelectResult<Selection> {
        let pages = if missing.is_empty() {
            let answer = self.ask("Every page already has baselines. Recreate them? (y/n) ")?;
            if !answer.eq_ignore_ascii_case("y") {
                return Err(SelectError::Cancelled);
            }
            self.pick_pages(urls)?
        } else {
            self.list("Pages without baselines:", missing)?;
            writeln!(self.output, "\nChoose an action:")?;
            writeln!(self.output, "1. Record only the new pages")?;
            writeln!(self.output, "2. Pick pages to record")?;
            writeln!(self.output, "3. Record every page")?;
            match self.ask("Option (1, 2 or 3): ")?.as_str() {
                "1" => self.pick_pages(missing)?,
                "2" => self.pick_pages(urls)?,
                "3" => urls.to_vec(),
                other => return Err(SelectError::InvalidChoice(other.to_string())),
            }
        };
        if pages.is_empty() {
            return Err(SelectError::Empty("pages"));
        }

        let resolutions = self.pick_resolutions(resolutions)?;
        Selection::new(pages, resolutions).non_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::RESOLUTIONS;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn urls() -> Vec<String> {
        ["https://a.com/", "https://b.com/", "https://c.com/", "https://d.com/"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn prompt(input: &str) -> PromptSelector<Cursor<Vec<u8>>, Vec<u8>> {
        PromptSelector::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn test_parse_indices() {
        assert_eq!(parse_indices("all", 3), vec![0, 1, 2]);
        assert_eq!(parse_indices(" ALL ", 2), vec![0, 1]);
        assert_eq!(parse_indices("1,3", 4), vec![0, 2]);
        assert_eq!(parse_indices("2-4", 5), vec![1, 2, 3]);
        assert_eq!(parse_indices("3, 1-2, 2", 4), vec![0, 1, 2]);
    }

    #[test]
    fn test_parse_indices_ignores_invalid_entries() {
        assert_eq!(parse_indices("0,5,x,2", 4), vec![1]);
        assert_eq!(parse_indices("3-1", 4), Vec::<usize>::new());
        assert_eq!(parse_indices("2-9", 4), Vec::<usize>::new());
        assert_eq!(parse_indices("", 4), Vec::<usize>::new());
    }

    #[test]
    fn test_fixed_selection() {
        let mut selector = FixedSelection::new(Some("2,4".into()), Some("1-2".into()));
        let selection = selector.select_compare(&urls(), &RESOLUTIONS).unwrap();
        assert_eq!(selection.urls, vec!["https://b.com/".to_string(), "https://d.com/".to_string()]);
        assert_eq!(selection.resolutions, RESOLUTIONS[..2].to_vec());
        assert_eq!(selection.jobs().len(), 4);

        let mut everything = FixedSelection::default();
        assert_eq!(everything.select_compare(&urls(), &RESOLUTIONS).unwrap().jobs().len(), 24);

        let mut nothing = FixedSelection::new(Some("9".into()), None);
        assert!(matches!(
            nothing.select_compare(&urls(), &RESOLUTIONS),
            Err(SelectError::Empty("pages"))
        ));
    }

    #[test]
    fn test_compare_prompt_retries_until_something_is_chosen() {
        let mut selector = prompt("\n7\n1,3\n");
        let selection = selector.select_compare(&urls(), &RESOLUTIONS).unwrap();
        assert_eq!(selection.urls, vec!["https://a.com/".to_string(), "https://c.com/".to_string()]);
        assert_eq!(selection.resolutions, RESOLUTIONS.to_vec());

        let printed = String::from_utf8(selector.into_output()).unwrap();
        assert_eq!(printed.matches("No pages selected").count(), 2);
        assert!(printed.contains("1. https://a.com/"));
    }

    #[test]
    fn test_prompt_eof_cancels() {
        let mut selector = prompt("");
        assert!(matches!(
            selector.select_compare(&urls(), &RESOLUTIONS),
            Err(SelectError::Cancelled)
        ));
    }

    #[test]
    fn test_record_only_new_pages() {
        let missing = vec!["https://c.com/".to_string(), "https://d.com/".to_string()];
        let mut selector = prompt("1\nall\n6\n");
        let selection = selector.select_record(&urls(), &RESOLUTIONS, &missing).unwrap();
        assert_eq!(selection.urls, missing);
        assert_eq!(selection.resolutions, vec![Resolution::new(375, 667)]);
    }

    #[test]
    fn test_record_every_page() {
        let missing = vec!["https://c.com/".to_string()];
        let mut selector = prompt("3\n1,2\n");
        let selection = selector.select_record(&urls(), &RESOLUTIONS, &missing).unwrap();
        assert_eq!(selection.urls, urls());
        assert_eq!(selection.resolutions.len(), 2);
    }

    #[test]
    fn test_record_invalid_choice() {
        let missing = vec!["https://c.com/".to_string()];
        let mut selector = prompt("4\n");
        assert!(matches!(
            selector.select_record(&urls(), &RESOLUTIONS, &missing),
            Err(SelectError::InvalidChoice(choice)) if choice == "4"
        ));
    }

    #[test]
    fn test_record_recreate_confirmation() {
        let mut declined = prompt("n\n");
        assert!(matches!(
            declined.select_record(&urls(), &RESOLUTIONS, &[]),
            Err(SelectError::Cancelled)
        ));

        let mut accepted = prompt("y\n2-3\nall\n");
        let selection = accepted.select_record(&urls(), &RESOLUTIONS, &[]).unwrap();
        assert_eq!(selection.urls, vec!["https://b.com/".to_string(), "https://c.com/".to_string()]);
        assert_eq!(selection.resolutions, RESOLUTIONS.to_vec());
    }

    #[test]
    fn test_pages_without_baselines() {
        let existing: BTreeSet<String> = ["a-com-".to_string(), "c-com-".to_string()].into();
        assert_eq!(
            pages_without_baselines(&urls(), &existing),
            vec!["https://b.com/".to_string(), "https://d.com/".to_string()]
        );
    }
}
