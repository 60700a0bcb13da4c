use anyhow::{anyhow, Result};

/// Class names the bundled indoor model was trained on, in output-column order.
pub const DEFAULT_LABELS: [&str; 31] = [
    "cat",
    "dog",
    "backpack",
    "umbrella",
    "handbag",
    "suitcase",
    "bottle",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "chair",
    "bed",
    "dining table",
    "tv",
    "laptop",
    "mouse",
    "keyboard",
    "microwave",
    "oven",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "cell phone",
    "face",
    "text",
];

/// Fixed ordered vocabulary mapping class indices to labels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vocabulary {
    labels: Vec<String>,
}

impl Vocabulary {
    pub fn new<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(anyhow!("vocabulary must contain at least one label"));
        }
        if let Some(blank) = labels.iter().position(|l| l.trim().is_empty()) {
            return Err(anyhow!("vocabulary label {} is blank", blank));
        }
        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, class_index: usize) -> Option<&str> {
        self.labels.get(class_index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    /// First label (in vocabulary order) whose words occur as whole words in
    /// `text`. "education" does not name a cat.
    pub fn find_in(&self, text: &str) -> Option<&str> {
        let text = text.to_lowercase();
        let words = split_words(&text);
        self.iter().find(|label| {
            let label = label.to_lowercase();
            let wanted = split_words(&label);
            !wanted.is_empty() && words.windows(wanted.len()).any(|w| w == wanted.as_slice())
        })
    }
}

fn split_words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            labels: DEFAULT_LABELS.iter().map(|l| l.to_string()).collect(),
        }
    }
}
