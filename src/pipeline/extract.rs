//! Text heuristics over search hits: founder names, profile URLs and
//! locations quoted in profile snippets.

use crate::client::SearchHit;
use crate::models::{AltdataError, Result, SubItem};
use regex::Regex;
use std::collections::HashSet;

/// Tokens that show a "founder X Y" match captured a title, not a name.
const NOT_NAME_WORDS: [&str; 7] = ["and", "the", "former", "current", "ceo", "chief", "officer"];

/// Words that put an "A and B Surname" match in a founding context.
const FOUNDING_CONTEXT: [&str; 4] = ["founder", "co-founder", "ceo", "started"];

/// Characters of context examined around an "A and B Surname" match.
const CONTEXT_WINDOW: usize = 50;

/// Countries that close a `Location:` field in a profile snippet.
const COUNTRIES: &[&str] = &[
    "United States", "USA", "UK", "Canada", "India", "Israel", "Singapore", "Australia",
    "Germany", "France", "Spain", "Brazil", "Mexico", "Argentina", "Colombia", "Chile", "Peru",
    "Netherlands", "Switzerland", "Sweden", "Denmark", "Norway", "Finland", "Ireland", "Belgium",
    "Austria", "Portugal", "Poland", "Czech Republic", "Romania", "Hungary", "Greece", "Turkey",
    "UAE", "Saudi Arabia", "Egypt", "South Africa", "Kenya", "Nigeria", "Ghana", "Japan",
    "South Korea", "China", "Hong Kong", "Taiwan", "Thailand", "Vietnam", "Malaysia",
    "Philippines", "Indonesia", "New Zealand", "United Kingdom", "Italy", "Estonia",
];

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AltdataError::Internal(format!("Invalid regex: {e}")))
}

/// Pulls candidate founder names out of search hits.
#[derive(Debug)]
pub struct FounderExtractor {
    crunchbase_list: Regex,
    and_surname: Regex,
    founder_title: Regex,
}

impl FounderExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            crunchbase_list: compile(
                r"Founders?\s+([A-Z][a-z]+\s+[A-Z][a-z]+(?:\s*,\s*[A-Z][a-z]+\s+[A-Z][a-z]+)*)",
            )?,
            and_surname: compile(r"([A-Z][a-z]+)\s+and\s+([A-Z][a-z]+)\s+([A-Z][a-z]+)")?,
            founder_title: compile(r"(?i:(?:co-)?founder)[,\s:]+([A-Z][a-z]+\s+[A-Z][a-z]+)")?,
        })
    }

    /// Candidate founders across all hits, first occurrence wins.
    pub fn extract(&self, hits: &[SearchHit]) -> Vec<SubItem> {
        let mut seen = HashSet::new();
        let mut founders = Vec::new();
        let mut push = |name: String, url: &str, confidence: &str| {
            if name.len() > 3 && seen.insert(name.clone()) {
                founders.push(SubItem::new(name).with_source(url, confidence));
            }
        };

        for hit in hits {
            let text = hit.text();
            let is_crunchbase = hit.url.contains("crunchbase.com");

            // Crunchbase lists are authoritative for the page.
            if is_crunchbase {
                if let Some(list) = self.crunchbase_list.captures(&text).and_then(|c| c.get(1)) {
                    for name in list.as_str().split(',') {
                        push(name.trim().to_string(), &hit.url, "HIGH");
                    }
                    continue;
                }
            }

            for caps in self.and_surname.captures_iter(&text) {
                let Some(whole) = caps.get(0) else { continue };
                let context = window(&text, whole.start(), whole.end()).to_lowercase();
                if !FOUNDING_CONTEXT.iter().any(|w| context.contains(w)) {
                    continue;
                }
                let surname = &caps[3];
                push(format!("{} {surname}", &caps[1]), &hit.url, "HIGH");
                push(format!("{} {surname}", &caps[2]), &hit.url, "HIGH");
            }

            let confidence = if is_crunchbase { "HIGH" } else { "MEDIUM" };
            for caps in self.founder_title.captures_iter(&text) {
                let name = caps[1].trim().to_string();
                let lowered = name.to_lowercase();
                if lowered.split_whitespace().any(|w| NOT_NAME_WORDS.contains(&w)) {
                    continue;
                }
                push(name, &hit.url, confidence);
            }
        }

        founders
    }
}

/// `CONTEXT_WINDOW` bytes either side of a match, on char boundaries.
fn window(text: &str, start: usize, end: usize) -> &str {
    let mut lo = start.saturating_sub(CONTEXT_WINDOW);
    while !text.is_char_boundary(lo) {
        lo -= 1;
    }
    let mut hi = (end + CONTEXT_WINDOW).min(text.len());
    while !text.is_char_boundary(hi) {
        hi += 1;
    }
    &text[lo..hi]
}

/// Finds a free-text location in a profile search snippet.
///
/// Patterns are tried in order: an explicit `Location:` field ending in a
/// country, `Based in`, `Lives in`, then a bare `City, ST` pair.
#[derive(Debug)]
pub struct LocationExtractor {
    patterns: Vec<Regex>,
}

impl LocationExtractor {
    pub fn new() -> Result<Self> {
        let countries = COUNTRIES.join("|");
        Ok(Self {
            patterns: vec![
                compile(&format!(r"Location[:\s]*([A-Z][^.]{{3,60}}(?:{countries}))"))?,
                compile(r"Based in[:\s]*([A-Z][^.]{3,60})")?,
                compile(r"Lives in[:\s]*([A-Z][^.]{3,60})")?,
                compile(r"([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*,\s*(?:[A-Z]{2}|[A-Z][a-z]+)(?:,\s*United States)?)")?,
            ],
        })
    }

    /// First location found in `text`, whitespace collapsed.
    pub fn extract(&self, text: &str) -> Option<String> {
        self.patterns
            .iter()
            .find_map(|pattern| pattern.captures(text).and_then(|c| c.get(1)))
            .map(|m| {
                let collapsed = m.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
                collapsed.split('.').next().unwrap_or_default().trim().to_string()
            })
            .filter(|location| !location.is_empty())
    }
}

/// Profile handle from a `linkedin.com/in/<slug>` URL, lower-cased, with a
/// trailing numeric disambiguator removed.
pub fn linkedin_slug(url: &str) -> Option<String> {
    let lowered = url.to_lowercase();
    let (_, rest) = lowered.split_once("linkedin.com/in/")?;
    let slug = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if slug.is_empty() {
        return None;
    }

    let trimmed = match slug.rsplit_once('-') {
        Some((head, tail)) if !head.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) => head,
        _ => slug,
    };
    Some(trimmed.to_string())
}

/// Whether a profile URL plausibly belongs to `name`.
///
/// Accepts the dashed or concatenated full name inside the slug, two or
/// more shared name tokens, or first+last, last+first or initial+last.
pub fn profile_matches_name(name: &str, url: &str) -> bool {
    let Some(slug) = linkedin_slug(url) else {
        return false;
    };
    let name = name.to_lowercase();
    let tokens: Vec<&str> = name.split_whitespace().collect();
    // A lone first name matches far too many profiles.
    if tokens.len() < 2 {
        return false;
    }

    if slug.contains(&tokens.join("-")) || slug.contains(&tokens.concat()) {
        return true;
    }

    let slug_tokens: HashSet<&str> = slug.split('-').filter(|t| !t.is_empty()).collect();
    let name_tokens: HashSet<&str> = tokens.iter().copied().collect();
    if name_tokens.intersection(&slug_tokens).count() >= 2 {
        return true;
    }

    let (Some(first), Some(last)) = (tokens.first(), tokens.last()) else {
        return false;
    };
    let letters = slug.replace('-', "");
    let initial: String = first.chars().take(1).collect();
    [
        format!("{first}{last}"),
        format!("{last}{first}"),
        format!("{initial}{last}"),
    ]
    .iter()
    .any(|pattern| letters.contains(pattern.as_str()))
}

/// First verified profile among the hits, with its URL minus the query.
pub fn find_profile<'a>(hits: &'a [SearchHit], name: &str) -> Option<(String, &'a SearchHit)> {
    hits.iter()
        .filter(|hit| hit.url.contains("linkedin.com/in/"))
        .map(|hit| (hit.url.split('?').next().unwrap_or_default().to_string(), hit))
        .find(|(url, _)| profile_matches_name(name, url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(url: &str, title: &str, content: &str) -> SearchHit {
        SearchHit {
            url: url.to_string(),
            title: title.to_string(),
            content: content.to_string(),
        }
    }

    fn names(items: &[SubItem]) -> Vec<&str> {
        items.iter().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn test_crunchbase_founder_list() {
        let extractor = FounderExtractor::new().unwrap();
        let hits = vec![hit(
            "https://www.crunchbase.com/organization/acme",
            "Acme - Crunchbase",
            "Founders Ada Lovelace, Charles Babbage. Acme builds engines.",
        )];
        let found = extractor.extract(&hits);
        assert_eq!(names(&found), vec!["Ada Lovelace", "Charles Babbage"]);
        assert!(found.iter().all(|f| f.confidence == "HIGH"));
        assert_eq!(found[0].source_url, "https://www.crunchbase.com/organization/acme");
    }

    #[test]
    fn test_shared_surname_needs_founding_context() {
        let extractor = FounderExtractor::new().unwrap();
        let with_context = vec![hit(
            "https://news.example.com/a",
            "",
            "DigitalOcean was started by Ben and Moisey Uretsky in 2011.",
        )];
        assert_eq!(
            names(&extractor.extract(&with_context)),
            vec!["Ben Uretsky", "Moisey Uretsky"]
        );

        let without = vec![hit("https://news.example.com/b", "", "Salt and Pepper Shakers on sale")];
        assert!(extractor.extract(&without).is_empty());
    }

    #[test]
    fn test_founder_title_pattern_filters_titles() {
        let extractor = FounderExtractor::new().unwrap();
        let hits = vec![hit(
            "https://blog.example.com",
            "Meet the team",
            "Co-founder: Grace Hopper leads engineering. Founder and CEO of the company.",
        )];
        let found = extractor.extract(&hits);
        assert_eq!(names(&found), vec!["Grace Hopper"]);
        assert_eq!(found[0].confidence, "MEDIUM");
    }

    #[test]
    fn test_names_containing_stop_substrings_survive() {
        let extractor = FounderExtractor::new().unwrap();
        let hits = vec![hit("https://x.com", "", "founder Andrew Theobald")];
        assert_eq!(names(&extractor.extract(&hits)), vec!["Andrew Theobald"]);
    }

    #[test]
    fn test_duplicates_across_hits_collapse() {
        let extractor = FounderExtractor::new().unwrap();
        let hits = vec![
            hit("https://a.com", "", "founder Grace Hopper"),
            hit("https://b.com", "", "co-founder Grace Hopper"),
        ];
        let found = extractor.extract(&hits);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_url, "https://a.com");
    }

    #[test]
    fn test_window_respects_char_boundaries() {
        let text = "ééééééééééééééééééééééééééééééééé Ben and Moisey Uretsky";
        let start = text.find("Ben").unwrap();
        assert!(window(text, start, text.len()).ends_with("Uretsky"));
    }

    #[test]
    fn test_linkedin_slug() {
        assert_eq!(
            linkedin_slug("https://www.linkedin.com/in/Ada-Lovelace-1815/?trk=x").as_deref(),
            Some("ada-lovelace")
        );
        assert_eq!(
            linkedin_slug("linkedin.com/in/grace-hopper-4b2a1c").as_deref(),
            Some("grace-hopper-4b2a1c")
        );
        assert_eq!(linkedin_slug("https://linkedin.com/company/acme"), None);
    }

    #[test]
    fn test_profile_name_verification() {
        assert!(profile_matches_name("Ada Lovelace", "https://linkedin.com/in/ada-lovelace"));
        assert!(profile_matches_name("Ada Lovelace", "https://linkedin.com/in/adalovelace"));
        assert!(profile_matches_name("Ada King Lovelace", "https://linkedin.com/in/lovelace-ada-x"));
        assert!(profile_matches_name("Ada Lovelace", "https://linkedin.com/in/lovelaceada"));
        assert!(profile_matches_name("Ada Lovelace", "https://linkedin.com/in/alovelace"));
        assert!(!profile_matches_name("Ada Lovelace", "https://linkedin.com/in/charles-babbage"));
        assert!(!profile_matches_name("Ada", "https://linkedin.com/in/ada-smith"));
        assert!(!profile_matches_name("Ada Lovelace", "https://example.com/ada-lovelace"));
    }

    #[test]
    fn test_find_profile_skips_unverified() {
        let hits = vec![
            hit("https://twitter.com/ada", "", ""),
            hit("https://www.linkedin.com/in/someone-else", "", ""),
            hit("https://www.linkedin.com/in/ada-lovelace?originalSubdomain=uk", "Ada", "London"),
        ];
        let (url, matched) = find_profile(&hits, "Ada Lovelace").unwrap();
        assert_eq!(url, "https://www.linkedin.com/in/ada-lovelace");
        assert_eq!(matched.content, "London");
        assert!(find_profile(&hits[..2], "Ada Lovelace").is_none());
    }

    #[test]
    fn test_location_field_needs_a_country() {
        let locations = LocationExtractor::new().unwrap();
        assert_eq!(
            locations
                .extract("Founder at Acme. Location: Austin, Texas, United States. 500+ connections")
                .as_deref(),
            Some("Austin, Texas, United States")
        );
        assert_eq!(
            locations.extract("Experience: Acme · Location:   Berlin,\n  Germany").as_deref(),
            Some("Berlin, Germany")
        );
    }

    #[test]
    fn test_based_in_and_lives_in() {
        let locations = LocationExtractor::new().unwrap();
        assert_eq!(
            locations.extract("Engineer. Based in Round Rock area. Building tools").as_deref(),
            Some("Round Rock area")
        );
        assert_eq!(
            locations.extract("Lives in San Francisco Bay Area. Ex-Google").as_deref(),
            Some("San Francisco Bay Area")
        );
    }

    #[test]
    fn test_city_state_pair() {
        let locations = LocationExtractor::new().unwrap();
        assert_eq!(
            locations.extract("ada lovelace - acme | linkedin Cedar Park, TX · Founder").as_deref(),
            Some("Cedar Park, TX")
        );
        assert_eq!(locations.extract("no location in this snippet"), None);
    }
}
