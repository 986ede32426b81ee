//! Prompt-to-video shortcuts loaded from configuration.
//!
//! A matching prompt skips the model and renderer entirely and is answered
//! with a pre-rendered file after an artificial delay.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortcut {
    pub prompt: String,
    pub video_file: String,
    pub delay: Duration,
}

impl Shortcut {
    pub fn new(prompt: impl Into<String>, video_file: impl Into<String>, delay: Duration) -> Self {
        Self {
            prompt: prompt.into(),
            video_file: video_file.into(),
            delay,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShortcutTable {
    entries: Vec<(String, Shortcut)>,
}

fn normalize(prompt: &str) -> String {
    prompt.trim().to_lowercase()
}

impl ShortcutTable {
    pub fn new(shortcuts: Vec<Shortcut>) -> Self {
        let entries = shortcuts
            .into_iter()
            .map(|shortcut| (normalize(&shortcut.prompt), shortcut))
            .filter(|(key, _)| !key.is_empty())
            .collect();
        Self { entries }
    }

    /// First entry whose key contains the prompt, or is contained by it,
    /// ignoring case and surrounding whitespace. Entries are tried in
    /// configuration order.
    pub fn lookup(&self, prompt: &str) -> Option<&Shortcut> {
        let prompt = normalize(prompt);
        if prompt.is_empty() {
            return None;
        }

        self.entries
            .iter()
            .find(|(key, _)| prompt.contains(key.as_str()) || key.contains(prompt.as_str()))
            .map(|(_, shortcut)| shortcut)
    }

    pub fn video_files(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .map(|(_, shortcut)| shortcut.video_file.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ShortcutTable {
        ShortcutTable::new(vec![
            Shortcut::new(
                "Explain the concept of recursion in programming",
                "recursion.mp4",
                Duration::ZERO,
            ),
            Shortcut::new("explain neural networks", "nn.mp4", Duration::ZERO),
        ])
    }

    #[test]
    fn matches_ignoring_case_in_both_directions() {
        let table = table();

        let longer = table
            .lookup("Please EXPLAIN NEURAL NETWORKS like I'm five")
            .unwrap();
        assert_eq!(longer.video_file, "nn.mp4");

        let shorter = table.lookup("  the concept of RECURSION ").unwrap();
        assert_eq!(shorter.video_file, "recursion.mp4");
    }

    #[test]
    fn unrelated_and_blank_prompts_miss() {
        let table = table();
        assert!(table.lookup("draw a fractal tree").is_none());
        assert!(table.lookup("   ").is_none());
    }

    #[test]
    fn blank_keys_are_ignored() {
        let table = ShortcutTable::new(vec![Shortcut::new(" ", "x.mp4", Duration::ZERO)]);
        assert!(table.is_empty());
        assert!(table.lookup("anything").is_none());
    }
}
