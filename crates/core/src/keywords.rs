pub const DEFAULT_REQUIREMENT_KEYWORDS: &[&str] = &[
    "besoin",
    "besoins",
    "exigence",
    "exigences",
    "requirement",
    "requirements",
    "fonction",
    "fonctions",
    "question",
    "questions",
    "demande",
    "demandes",
    "specification",
    "specifications",
];

pub const DEFAULT_RESPONSE_KEYWORDS: &[&str] = &[
    "response",
    "responses",
    "answer",
    "answers",
    "commentaire",
    "commentaires",
    "comment",
    "feedback",
    "details",
    "réponse",
    "réponses",
    "solution",
    "solutions",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordSet {
    keywords: Vec<String>,
}

impl KeywordSet {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::default().extended(keywords)
    }

    pub fn default_requirement() -> Self {
        Self::new(DEFAULT_REQUIREMENT_KEYWORDS)
    }

    pub fn default_response() -> Self {
        Self::new(DEFAULT_RESPONSE_KEYWORDS)
    }

    pub fn extended<I, S>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keywords = self.keywords.clone();
        for keyword in extra {
            let normalized = keyword.as_ref().trim().to_lowercase();
            if normalized.is_empty() || keywords.contains(&normalized) {
                continue;
            }
            keywords.push(normalized);
        }
        Self { keywords }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keywords.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

pub trait KeywordMatcher {
    fn find_match<'k>(&self, cell: &str, keywords: &'k KeywordSet) -> Option<&'k str>;

    fn matches(&self, cell: &str, keywords: &KeywordSet) -> bool {
        self.find_match(cell, keywords).is_some()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringMatcher;

impl KeywordMatcher for SubstringMatcher {
    fn find_match<'k>(&self, cell: &str, keywords: &'k KeywordSet) -> Option<&'k str> {
        let lowered = cell.trim().to_lowercase();
        if lowered.is_empty() {
            return None;
        }
        keywords.iter().find(|keyword| lowered.contains(keyword))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_match_ignores_case_and_padding() {
        let keywords = KeywordSet::default_requirement();
        assert_eq!(
            SubstringMatcher.find_match("  EXIGENCES fonctionnelles ", &keywords),
            Some("exigence")
        );
        assert!(!SubstringMatcher.matches("Référence", &keywords));
        assert!(!SubstringMatcher.matches("   ", &keywords));
    }

    #[test]
    fn accented_response_keywords_match() {
        let keywords = KeywordSet::default_response();
        assert_eq!(
            SubstringMatcher.find_match("Réponse fournisseur", &keywords),
            Some("réponse")
        );
    }

    #[test]
    fn extension_is_local_and_normalized() {
        let defaults = KeywordSet::default_requirement();
        let extended = defaults.extended([" Attendu ", "besoin", ""]);

        assert_eq!(extended.len(), defaults.len() + 1);
        assert!(extended.iter().any(|keyword| keyword == "attendu"));
        assert!(!defaults.iter().any(|keyword| keyword == "attendu"));
        assert_eq!(KeywordSet::default_requirement(), defaults);
    }
}
