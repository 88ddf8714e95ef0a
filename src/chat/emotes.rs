//! Emote images and HTML escaping for chat text

use std::collections::HashMap;
use std::io;
use std::path::Path;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "gif", "jpg", "jpeg", "webp", "svg"];

/// Emote name to image file, served under `/emotes/`
#[derive(Debug, Clone, Default)]
pub struct Emotes {
    files: HashMap<String, String>,
}

impl Emotes {
    /// Index every image in `dir` by its file stem
    ///
    /// A missing directory is an empty set; any other I/O failure is returned.
    pub fn load(dir: &Path) -> io::Result<Self> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(dir = %dir.display(), "Emote directory not found, no emotes loaded");
                return Ok(Self::default());
            }
            Err(e) => return Err(e),
        };

        let mut files = HashMap::new();
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if !is_image {
                continue;
            }
            if let (Some(stem), Some(file)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.file_name().and_then(|s| s.to_str()),
            ) {
                files.insert(stem.to_string(), file.to_string());
            }
        }

        tracing::info!(dir = %dir.display(), count = files.len(), "Loaded emotes");
        Ok(Self { files })
    }

    pub fn from_files<I, K, V>(files: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            files: files.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.files.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// `(name, file)` pairs sorted by name
    pub fn entries(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .files
            .iter()
            .map(|(name, file)| (name.as_str(), file.as_str()))
            .collect();
        entries.sort_unstable();
        entries
    }

    /// Escape `text` and swap whole-word emote names for image tags
    pub fn render(&self, text: &str) -> String {
        text.split(' ')
            .map(|word| match self.files.get(word) {
                Some(file) => format!(
                    r#"<img src="/emotes/{}" class="emote" title="{}" alt="{}">"#,
                    escape_html(file),
                    escape_html(word),
                    escape_html(word)
                ),
                None => escape_html(word),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
