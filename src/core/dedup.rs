use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::embedding::{cosine_similarity, Embedder};
use super::models::{FingerprintEntry, ResumeProfile};

#[derive(Debug, Clone, PartialEq)]
pub enum Fingerprint {
    Computed(Vec<f32>),
    /// No embedder, or the embedder failed. The file stays unique but unchecked.
    Unchecked(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DedupVerdict {
    Unique {
        /// A near-identical resume under a different email, kept for manual review.
        review_match: Option<Uuid>,
    },
    Duplicate {
        of: Uuid,
        similarity: f32,
    },
}

pub struct DuplicateDetector {
    embedder: Option<Arc<dyn Embedder>>,
    threshold: f32,
}

impl DuplicateDetector {
    pub fn new(embedder: Option<Arc<dyn Embedder>>, threshold: f32) -> Self {
        Self {
            embedder,
            threshold,
        }
    }

    pub async fn fingerprint(&self, profile: &ResumeProfile) -> Fingerprint {
        let Some(embedder) = &self.embedder else {
            return Fingerprint::Unchecked("no embedding service configured".to_string());
        };

        let canonical = canonical_representation(profile);
        match embedder.embed(&canonical).await {
            Ok(vector) => Fingerprint::Computed(vector),
            Err(err) => {
                warn!(error = %err, "fingerprint unavailable, resume will be kept unchecked");
                Fingerprint::Unchecked(err.to_string())
            }
        }
    }

    /// Byte-identical content is always a duplicate, even without a fingerprint
    /// or an email. Otherwise a duplicate needs the closest stored fingerprint
    /// to clear the threshold and the emails to agree. High similarity alone is
    /// flagged for review.
    pub fn classify(
        &self,
        content_hash: &str,
        fingerprint: Option<&[f32]>,
        email: Option<&str>,
        existing: &[FingerprintEntry],
    ) -> DedupVerdict {
        if let Some(same) = existing.iter().find(|e| e.content_hash == content_hash) {
            debug!(matched_resume = %same.resume_id, "identical content already stored");
            return DedupVerdict::Duplicate {
                of: same.resume_id,
                similarity: 1.0,
            };
        }

        let Some(fingerprint) = fingerprint else {
            return DedupVerdict::Unique { review_match: None };
        };

        let scored: Vec<(&FingerprintEntry, f32)> = existing
            .iter()
            .filter_map(|entry| {
                let stored = entry.fingerprint.as_deref()?;
                Some((entry, cosine_similarity(fingerprint, stored)))
            })
            .collect();

        let Some(&(entry, similarity)) = scored.iter().max_by(|a, b| a.1.total_cmp(&b.1)) else {
            return DedupVerdict::Unique { review_match: None };
        };

        if similarity < self.threshold {
            debug!(similarity, "no near-duplicate");
            return DedupVerdict::Unique { review_match: None };
        }

        let same_email = |candidate: &FingerprintEntry| {
            candidate
                .email
                .as_deref()
                .zip(email)
                .is_some_and(|(a, b)| a.trim().eq_ignore_ascii_case(b.trim()))
        };

        // Among all matches above threshold, an exact email match wins.
        if let Some(&(exact, similarity)) = scored
            .iter()
            .filter(|(candidate, score)| *score >= self.threshold && same_email(*candidate))
            .max_by(|a, b| a.1.total_cmp(&b.1))
        {
            return DedupVerdict::Duplicate {
                of: exact.resume_id,
                similarity,
            };
        }

        warn!(
            similarity,
            matched_resume = %entry.resume_id,
            "near-duplicate resume with a different email, flagged for review"
        );
        DedupVerdict::Unique {
            review_match: Some(entry.resume_id),
        }
    }
}

/// Name, email, skills and experience flattened into one stable string.
pub fn canonical_representation(profile: &ResumeProfile) -> String {
    let mut parts = Vec::new();

    if let Some(name) = profile.name() {
        parts.push(format!("Name: {name}"));
    }
    if let Some(email) = profile.normalized_email() {
        parts.push(format!("Email: {email}"));
    }
    if let Some(total) = profile.get_str("TotalExperience") {
        parts.push(format!("TotalExperience: {total}"));
    }

    let skills = profile.skills();
    if !skills.is_empty() {
        parts.push(format!("Skills: {}", skills.join(", ")));
    }

    for entry in profile.experience() {
        let fields: Vec<String> = ["Position", "Company", "Duration", "Description"]
            .iter()
            .filter_map(|key| entry.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        if !fields.is_empty() {
            parts.push(format!("Experience: {}", fields.join(" | ")));
        }
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::core::errors::EmbeddingError;

    struct Down;

    #[async_trait]
    impl Embedder for Down {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Unavailable("connection refused".into()))
        }
    }

    fn entry(email: &str, fingerprint: Vec<f32>) -> FingerprintEntry {
        let resume_id = Uuid::new_v4();
        FingerprintEntry {
            resume_id,
            email: Some(email.to_string()),
            content_hash: resume_id.to_string(),
            fingerprint: Some(fingerprint),
        }
    }

    #[test]
    fn high_similarity_with_the_same_email_is_a_duplicate() {
        let detector = DuplicateDetector::new(None, 0.95);
        let stored = vec![entry("jane@roe.dev", vec![1.0, 0.0, 0.0])];

        let verdict = detector.classify("new", Some([0.99, 0.01, 0.0].as_slice()), Some("Jane@Roe.dev"), &stored);
        assert!(matches!(verdict, DedupVerdict::Duplicate { of, .. } if of == stored[0].resume_id));
    }

    #[test]
    fn high_similarity_with_a_different_email_is_flagged_not_merged() {
        let detector = DuplicateDetector::new(None, 0.95);
        let stored = vec![entry("john@doe.dev", vec![1.0, 0.0])];

        let verdict = detector.classify("new", Some([1.0, 0.0].as_slice()), Some("jane@roe.dev"), &stored);
        assert_eq!(
            verdict,
            DedupVerdict::Unique {
                review_match: Some(stored[0].resume_id)
            }
        );
    }

    #[test]
    fn email_match_below_threshold_is_unique() {
        let detector = DuplicateDetector::new(None, 0.95);
        let stored = vec![entry("jane@roe.dev", vec![1.0, 0.0])];
        let verdict = detector.classify("new", Some([0.0, 1.0].as_slice()), Some("jane@roe.dev"), &stored);
        assert_eq!(verdict, DedupVerdict::Unique { review_match: None });
    }

    #[test]
    fn exact_email_wins_among_several_close_matches() {
        let detector = DuplicateDetector::new(None, 0.9);
        let stranger = entry("john@doe.dev", vec![1.0, 0.0]);
        let same_person = entry("jane@roe.dev", vec![0.97, 0.1]);
        let stored = vec![stranger, same_person.clone()];

        let verdict = detector.classify("new", Some([1.0, 0.0].as_slice()), Some("jane@roe.dev"), &stored);
        assert!(matches!(verdict, DedupVerdict::Duplicate { of, .. } if of == same_person.resume_id));
    }

    #[test]
    fn identical_content_is_a_duplicate_without_email_or_fingerprint() {
        let detector = DuplicateDetector::new(None, 0.95);
        let mut stored = entry("jane@roe.dev", vec![1.0, 0.0]);
        stored.email = None;
        stored.fingerprint = None;
        stored.content_hash = "9f86d081".to_string();
        let stored = vec![stored];

        let verdict = detector.classify("9f86d081", None, None, &stored);
        assert!(matches!(verdict, DedupVerdict::Duplicate { of, .. } if of == stored[0].resume_id));

        let other = detector.classify("60303ae2", None, None, &stored);
        assert_eq!(other, DedupVerdict::Unique { review_match: None });
    }

    #[tokio::test]
    async fn fingerprinting_fails_closed() {
        let profile = ResumeProfile::from_value(json!({"Name": "Jane Roe"})).unwrap();

        let without = DuplicateDetector::new(None, 0.95);
        assert!(matches!(without.fingerprint(&profile).await, Fingerprint::Unchecked(_)));

        let broken = DuplicateDetector::new(Some(Arc::new(Down)), 0.95);
        assert!(matches!(broken.fingerprint(&profile).await, Fingerprint::Unchecked(_)));
    }

    #[test]
    fn canonical_form_is_stable_and_lowercases_email() {
        let profile = ResumeProfile::from_value(json!({
            "Name": "Jane Roe",
            "Email": "JANE@ROE.DEV",
            "Skills": ["Rust", "SQL"],
            "Experience": [{"Company": "Acme", "Position": "Engineer", "Duration": "2 years"}]
        }))
        .unwrap();

        assert_eq!(
            canonical_representation(&profile),
            "Name: Jane Roe\nEmail: jane@roe.dev\nSkills: Rust, SQL\nExperience: Engineer | Acme | 2 years"
        );
    }
}
