//! Meeting hints parsed from the audio file name.

use std::path::Path;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

static MEETING_KINDS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)1on1|1-on-1|one-on-one|1 on 1", "1-on-1 meeting"),
        (r"(?i)interview", "Interview"),
        (r"(?i)standup|stand-up|daily", "Daily standup meeting"),
        (r"(?i)review|retrospective|retro", "Review meeting"),
        (r"(?i)planning", "Planning meeting"),
        (r"(?i)demo", "Demo meeting"),
        (r"(?i)sync", "Sync meeting"),
        (r"(?i)kickoff|kick-off", "Kickoff meeting"),
        (r"(?i)townhall|town hall|all-hands", "All-hands meeting"),
        (r"(?i)call|conference", "Conference call"),
    ]
    .iter()
    .map(|(p, d)| (Regex::new(p).expect("Invalid regex"), *d))
    .collect()
});

static CAPITALIZED_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][a-z]+\b").expect("Invalid regex"));

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").expect("Invalid regex"));
static US_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{2})-(\d{2})-(\d{4})").expect("Invalid regex"));
static COMPACT_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})(\d{2})(\d{2})").expect("Invalid regex"));

/// Capitalized file-name words that describe the meeting, not a person
const MEETING_TERMS: &[&str] = &[
    "Meeting", "Call", "Interview", "Demo", "Sync", "Team", "Review", "Daily", "Sprint",
    "Standup", "Planning", "Kickoff", "Retro", "Notes", "Recording", "Weekly", "Monthly",
    "Quarterly", "Conference", "Townhall",
];

/// Maximum participant names taken from one file name
const MAX_FILENAME_NAMES: usize = 3;

/// What a file name says about the meeting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilenameContext {
    /// e.g. "1-on-1 meeting with Ian, Laiks"
    pub description: Option<String>,
    pub participants: Vec<String>,
    pub date: Option<NaiveDate>,
}

impl FilenameContext {
    /// Description plus the recording date, when either is known
    pub fn hint(&self) -> Option<String> {
        match (&self.description, self.date) {
            (Some(d), Some(date)) => Some(format!("{} on {}", d, date.format("%Y-%m-%d"))),
            (Some(d), None) => Some(d.clone()),
            (None, Some(date)) => Some(format!("Meeting on {}", date.format("%Y-%m-%d"))),
            (None, None) => None,
        }
    }
}

fn stem_words(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().replace(['_', '.'], " "))
        .unwrap_or_default()
}

pub fn extract_context_from_filename(file_name: &str) -> FilenameContext {
    let stem = stem_words(file_name);

    let kind = MEETING_KINDS
        .iter()
        .find(|(re, _)| re.is_match(&stem))
        .map(|(_, d)| *d);

    let participants: Vec<String> = CAPITALIZED_WORD
        .find_iter(&stem)
        .map(|m| m.as_str())
        .filter(|w| !MEETING_TERMS.contains(w))
        .take(MAX_FILENAME_NAMES)
        .map(str::to_string)
        .collect();

    let description = match (kind, participants.is_empty()) {
        (Some(kind), false) => Some(format!("{} with {}", kind, participants.join(", "))),
        (Some(kind), true) => Some(kind.to_string()),
        (None, false) => Some(format!("Meeting with {}", participants.join(", "))),
        (None, true) => None,
    };

    FilenameContext {
        description,
        participants,
        date: extract_date_from_filename(file_name),
    }
}

/// First YYYY-MM-DD, MM-DD-YYYY or YYYYMMDD date in the file stem
pub fn extract_date_from_filename(file_name: &str) -> Option<NaiveDate> {
    let stem = stem_words(file_name);
    let num = |s: &str| s.parse::<u32>().ok();

    if let Some(c) = ISO_DATE.captures(&stem) {
        if let Some(date) = ymd(num(&c[1]), num(&c[2]), num(&c[3])) {
            return Some(date);
        }
    }
    if let Some(c) = US_DATE.captures(&stem) {
        if let Some(date) = ymd(num(&c[3]), num(&c[1]), num(&c[2])) {
            return Some(date);
        }
    }
    COMPACT_DATE
        .captures(&stem)
        .and_then(|c| ymd(num(&c[1]), num(&c[2]), num(&c[3])))
}

fn ymd(year: Option<u32>, month: Option<u32>, day: Option<u32>) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year? as i32, month?, day?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_on_one_with_names() {
        let ctx = extract_context_from_filename("Ian Laiks 1on1 10-30 12-10.m4a");
        assert_eq!(ctx.participants, vec!["Ian", "Laiks"]);
        assert_eq!(
            ctx.description.as_deref(),
            Some("1-on-1 meeting with Ian, Laiks")
        );
        assert!(ctx.date.is_none());
    }

    #[test]
    fn test_meeting_terms_are_not_names() {
        let ctx = extract_context_from_filename("Team_Standup_2024-01-15.m4a");
        assert!(ctx.participants.is_empty());
        assert_eq!(ctx.description.as_deref(), Some("Daily standup meeting"));
        assert_eq!(ctx.date, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(
            ctx.hint().as_deref(),
            Some("Daily standup meeting on 2024-01-15")
        );
    }

    #[test]
    fn test_names_are_capped() {
        let ctx = extract_context_from_filename("Ann Bob Cat Dan sync.wav");
        assert_eq!(ctx.participants.len(), 3);
        assert_eq!(ctx.description.as_deref(), Some("Sync meeting with Ann, Bob, Cat"));
    }

    #[test]
    fn test_date_formats() {
        assert_eq!(
            extract_date_from_filename("notes 03-20-2024.mp3"),
            NaiveDate::from_ymd_opt(2024, 3, 20)
        );
        assert_eq!(
            extract_date_from_filename("rec20240115.wav"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(extract_date_from_filename("rec 2024-13-40.wav"), None);
    }

    #[test]
    fn test_plain_name_has_no_context() {
        let ctx = extract_context_from_filename("recording.wav");
        assert_eq!(ctx, FilenameContext::default());
        assert!(ctx.hint().is_none());
    }
}
