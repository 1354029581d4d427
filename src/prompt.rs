//! Prompt normalization and option formatting.
//!
//! Provider replies quote the prompt back with parameter flags rendered in
//! varying ways, so raw string comparison misfires. All matching goes
//! through [`fingerprint`]: strip parameter flags, lowercase, collapse
//! whitespace, truncate to a fixed prefix.

/// Maximum length of a normalized fingerprint, in characters.
pub const FINGERPRINT_LEN: usize = 120;

/// Normalize a prompt into its matching fingerprint.
///
/// Parameter flags trail the prompt text, so everything from the first
/// flag token (`--v 6.1`, `--ar 16:9`, `--niji`, `--seed 42`, ...)
/// onward is dropped. The remainder is lowercased, whitespace is
/// collapsed to single spaces, and the result is truncated to the first
/// [`FINGERPRINT_LEN`] characters.
///
/// The function is idempotent: `fingerprint(fingerprint(p)) == fingerprint(p)`.
///
/// # Examples
///
/// ```
/// use vermeer::prompt::fingerprint;
///
/// assert_eq!(
///     fingerprint("Cosmic  Dolphin --ar 4:5 --v 6.1"),
///     "cosmic dolphin"
/// );
/// ```
pub fn fingerprint(prompt: &str) -> String {
    let words: Vec<&str> = prompt
        .split_whitespace()
        .take_while(|token| !token.starts_with("--"))
        .collect();

    let joined = words.join(" ").to_lowercase();
    joined.chars().take(FINGERPRINT_LEN).collect()
}

/// Check whether message content refers to the given fingerprint.
///
/// Provider messages quote the prompt inside `**...**`; the quoted text is
/// normalized the same way before containment is tested, falling back to a
/// whole-content scan when no bold section exists.
pub fn content_matches(content: &str, fp: &str) -> bool {
    if fp.is_empty() {
        return false;
    }
    if let Some(quoted) = bold_section(content) {
        return fingerprint(quoted).contains(fp);
    }
    fingerprint(content).contains(fp)
}

/// Extract the first `**...**` quoted section from message content.
pub fn bold_section(content: &str) -> Option<&str> {
    let start = content.find("**")? + 2;
    let end = content[start..].find("**")? + start;
    Some(&content[start..end])
}

/// Options appended to a prompt before submission.
///
/// Mirrors the flags the provider's `/imagine` command understands. Flags
/// are rendered in a fixed order: seed, aspect ratio, quality, then model
/// selection (`--niji` wins over `--v`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    /// Random seed for reproducibility
    pub seed: Option<u64>,
    /// Aspect ratio, e.g. `"4:5"`
    pub aspect_ratio: Option<String>,
    /// Quality setting
    pub quality: Option<String>,
    /// Use the niji model
    pub niji: bool,
    /// Model version, e.g. `"6.1"`
    pub version: Option<String>,
}

impl GenerationOptions {
    /// Render the full prompt string with flags appended.
    pub fn apply(&self, prompt: &str) -> String {
        let mut out = String::from(prompt);
        if let Some(seed) = self.seed {
            out.push_str(&format!(" --seed {seed}"));
        }
        if let Some(ar) = &self.aspect_ratio {
            out.push_str(&format!(" --ar {ar}"));
        }
        if let Some(q) = &self.quality {
            out.push_str(&format!(" --q {q}"));
        }
        if self.niji {
            out.push_str(" --niji");
        } else if let Some(v) = &self.version {
            out.push_str(&format!(" --v {v}"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_strips_flags_and_values() {
        assert_eq!(
            fingerprint("a red fox --seed 42 --ar 16:9 --v 6.0"),
            "a red fox"
        );
        assert_eq!(fingerprint("snowy peak --niji"), "snowy peak");
    }

    #[test]
    fn fingerprint_is_idempotent() {
        for prompt in [
            "Cosmic Dolphin --ar 4:5",
            "plain prompt",
            "x",
            "trailing -- dangler words",
        ] {
            let once = fingerprint(prompt);
            assert_eq!(fingerprint(&once), once, "prompt: {prompt}");
        }
    }

    #[test]
    fn fingerprint_truncates_long_prompts() {
        let long = "word ".repeat(100);
        assert_eq!(fingerprint(&long).chars().count(), FINGERPRINT_LEN);
    }

    #[test]
    fn bold_section_extraction() {
        assert_eq!(
            bold_section("**cosmic dolphin** - Image #2 (621kB)"),
            Some("cosmic dolphin")
        );
        assert_eq!(bold_section("no quoting here"), None);
    }

    #[test]
    fn content_matching_uses_normalized_forms() {
        let fp = fingerprint("Cosmic Dolphin --v 6.1");
        assert!(content_matches(
            "**Cosmic Dolphin --v 6.1** - Image #1 (574kB)",
            &fp
        ));
        assert!(!content_matches(
            "**fantasy castle** - Image #1 (512kB)",
            &fp
        ));
    }

    #[test]
    fn options_render_in_fixed_order() {
        let opts = GenerationOptions {
            seed: Some(7),
            aspect_ratio: Some("4:5".into()),
            quality: Some("2".into()),
            niji: false,
            version: Some("6.1".into()),
        };
        assert_eq!(
            opts.apply("a cat"),
            "a cat --seed 7 --ar 4:5 --q 2 --v 6.1"
        );
    }

    #[test]
    fn niji_overrides_version() {
        let opts = GenerationOptions {
            niji: true,
            version: Some("6.0".into()),
            ..Default::default()
        };
        assert_eq!(opts.apply("a cat"), "a cat --niji");
    }
}
