use once_cell::sync::Lazy;
use regex::Regex;

use super::models::ResumeProfile;

/// Bare ten-digit numbers are assumed to be local mobile numbers in this region.
const DEFAULT_COUNTRY_CODE: &str = "91";

static MAILTO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)mailto:\s*([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})").unwrap()
});
static LABELLED_EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\be-?mail\b[^@\n]{0,20}?([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})")
        .unwrap()
});
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());

static PHONE_CANDIDATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\(?\d[\d\s().-]{6,18}\d").unwrap());

static LINKEDIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:https?://)?(?:[a-z]{2,3}\.)?linkedin\.com/in/([A-Za-z0-9_-]+)").unwrap()
});
static GITHUB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:https?://)?(?:www\.)?github\.com/([A-Za-z0-9](?:[A-Za-z0-9-]{0,37}[A-Za-z0-9])?)")
        .unwrap()
});

static LEADING_DIGIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?\d").unwrap());

const GITHUB_RESERVED: [&str; 6] = ["orgs", "features", "about", "pricing", "login", "topics"];
const CONTACT_KEYWORDS: [&str; 5] = ["email", "phone", "contact", "mobile", "tel"];
const NAME_STOPWORDS: [&str; 8] = [
    "resume",
    "curriculum",
    "vitae",
    "profile",
    "summary",
    "experience",
    "education",
    "skills",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactDetails {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub linked_in: Option<String>,
    pub git_hub: Option<String>,
}

pub fn extract_contacts(text: &str) -> ContactDetails {
    ContactDetails {
        name: guess_name(text),
        email: extract_email(text),
        phone: extract_phone(text),
        linked_in: extract_linkedin(text),
        git_hub: extract_github(text),
    }
}

/// Fills contact fields the structuring service left out, using the raw text.
/// Existing values are kept, except that emails are always lower-cased.
/// Returns the keys that were filled.
pub fn backfill_profile(profile: &mut ResumeProfile, text: &str) -> Vec<&'static str> {
    let found = extract_contacts(text);
    let mut filled = Vec::new();

    let candidates = [
        ("Name", found.name),
        ("Email", found.email),
        ("Phone", found.phone),
        ("LinkedIn", found.linked_in),
        ("GitHub", found.git_hub),
    ];
    for (key, value) in candidates {
        if profile.get_str(key).is_none() {
            if let Some(value) = value {
                profile.set_str(key, value);
                filled.push(key);
            }
        }
    }

    if let Some(email) = profile.normalized_email() {
        profile.set_str("Email", email);
    }

    filled
}

pub fn extract_email(text: &str) -> Option<String> {
    [&*MAILTO_RE, &*LABELLED_EMAIL_RE]
        .iter()
        .find_map(|re| re.captures(text).and_then(|c| c.get(1)))
        .or_else(|| EMAIL_RE.find(text))
        .map(|m| m.as_str().to_lowercase())
}

/// First phone-like run in the text that validates as a real number, in E.164.
pub fn extract_phone(text: &str) -> Option<String> {
    PHONE_CANDIDATE_RE
        .find_iter(text)
        .find_map(|m| normalize_phone(m.as_str()))
}

pub fn normalize_phone(raw: &str) -> Option<String> {
    if let Some(valid) = format_if_valid_phone(raw.trim()) {
        return Some(valid);
    }

    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let candidate = match digits.len() {
        10 => format!("+{DEFAULT_COUNTRY_CODE}{digits}"),
        11..=15 => format!("+{digits}"),
        _ => return None,
    };

    format_if_valid_phone(&candidate)
}

fn format_if_valid_phone(input: &str) -> Option<String> {
    let parsed = phonenumber::parse(None, input).ok()?;
    if !phonenumber::is_valid(&parsed) {
        return None;
    }

    Some(parsed.format().mode(phonenumber::Mode::E164).to_string())
}

pub fn extract_linkedin(text: &str) -> Option<String> {
    LINKEDIN_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|handle| format!("https://www.linkedin.com/in/{}", handle.as_str()))
}

pub fn extract_github(text: &str) -> Option<String> {
    GITHUB_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find(|handle| !GITHUB_RESERVED.contains(&handle.to_ascii_lowercase().as_str()))
        .map(|handle| format!("https://github.com/{handle}"))
}

/// Heuristic: a 2-4 word, capitalised line near the top, or just above a
/// contact line.
pub fn guess_name(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let mut candidates: Vec<&str> = lines.iter().take(30).copied().collect();

    for (i, line) in lines.iter().enumerate().take(50).skip(1) {
        let lower = line.to_lowercase();
        if CONTACT_KEYWORDS.iter().any(|k| lower.contains(k)) {
            candidates.push(lines[i - 1]);
        }
    }

    candidates
        .into_iter()
        .map(str::trim)
        .find(|line| looks_like_name(line))
        .map(str::to_string)
}

fn looks_like_name(line: &str) -> bool {
    if line.is_empty()
        || line.contains('@')
        || line.contains(':')
        || line.len() > 50
        || LEADING_DIGIT_RE.is_match(line)
    {
        return false;
    }

    let words: Vec<&str> = line.split_whitespace().collect();
    if !(2..=4).contains(&words.len()) {
        return false;
    }

    let lower = line.to_lowercase();
    if NAME_STOPWORDS.iter().any(|w| lower.contains(w)) {
        return false;
    }

    words.iter().all(|w| {
        w.chars().next().is_some_and(char::is_uppercase)
            && w.chars().all(|c| c.is_alphabetic() || matches!(c, '.' | '-' | '\''))
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn email_prefers_mailto_and_lowercases() {
        assert_eq!(
            extract_email("Contact me at John.Doe@Example.com"),
            Some("john.doe@example.com".to_string())
        );
        assert_eq!(
            extract_email("ref: boss@old.co\nEmail: jane.smith@company.co.uk"),
            Some("jane.smith@company.co.uk".to_string())
        );
        assert_eq!(
            extract_email("see (mailto:me@x.io) or other@y.io"),
            Some("me@x.io".to_string())
        );
        assert_eq!(extract_email("No email here"), None);
    }

    #[test]
    fn phone_numbers_are_validated_and_normalised() {
        assert_eq!(normalize_phone("9876543210"), Some("+919876543210".to_string()));
        assert_eq!(normalize_phone("98765 43210"), Some("+919876543210".to_string()));
        assert_eq!(normalize_phone("+919876543210"), Some("+919876543210".to_string()));
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(
            extract_phone("Jane Roe | Mobile: +91 98765-43210 | Pune"),
            Some("+919876543210".to_string())
        );
        assert_eq!(extract_phone("Graduated 2019 - 2021"), None);
    }

    #[test]
    fn profile_links_are_canonicalised() {
        assert_eq!(
            extract_linkedin("Visit linkedin.com/in/johndoe"),
            Some("https://www.linkedin.com/in/johndoe".to_string())
        );
        assert_eq!(
            extract_linkedin("LinkedIn: https://in.linkedin.com/in/jane-smith/"),
            Some("https://www.linkedin.com/in/jane-smith".to_string())
        );
        assert_eq!(
            extract_github("https://github.com/orgs/acme and github.com/jane-smith"),
            Some("https://github.com/jane-smith".to_string())
        );
        assert_eq!(extract_github("No GitHub here"), None);
    }

    #[test]
    fn name_guess_skips_headings_and_contact_lines() {
        let text = "Curriculum Vitae\njane@roe.dev\nJane Q. Roe\nSenior Engineer";
        assert_eq!(guess_name(text), Some("Jane Q. Roe".to_string()));
        assert_eq!(guess_name("skills: rust, go"), None);
    }

    #[test]
    fn backfill_only_fills_gaps() {
        let mut profile = ResumeProfile::from_value(json!({
            "Name": "Jane Roe",
            "Email": "Jane@Roe.DEV",
        }))
        .unwrap();
        let text = "Jane Roe\nEmail: other@roe.dev\nPhone: 9876543210\ngithub.com/janeroe";

        let filled = backfill_profile(&mut profile, text);

        assert_eq!(filled, vec!["Phone", "GitHub"]);
        assert_eq!(profile.email(), Some("jane@roe.dev"));
        assert_eq!(profile.phone(), Some("+919876543210"));
        assert_eq!(profile.get_str("GitHub"), Some("https://github.com/janeroe"));
    }
}
