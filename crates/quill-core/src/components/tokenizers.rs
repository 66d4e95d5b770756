//! Tokenizers: split message text into [`Token`]s with char offsets.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use quill_types::config::{ComponentConfig, ModelConfig};
use quill_types::message::{Message, Property, Token, keys};
use quill_types::training::TrainingData;
use quill_types::{QuillError, Result};

use crate::component::{Component, ComponentFactory, Context, ContextUpdate};

// ---------------------------------------------------------------------------
// Whitespace tokenizer
// ---------------------------------------------------------------------------

/// Split on whitespace. Offsets are char offsets.
pub fn tokenize_whitespace(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut start = None;
    for (i, c) in text.chars().enumerate() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push(Token::new(std::mem::take(&mut current), s));
            }
        } else {
            start.get_or_insert(i);
            current.push(c);
        }
    }
    if let Some(s) = start {
        tokens.push(Token::new(current, s));
    }
    tokens
}

fn tokenize_examples(data: &mut TrainingData, tokenize: impl Fn(&str) -> Vec<Token>) {
    for example in &mut data.training_examples {
        let tokens = tokenize(example.text());
        example.set(keys::TOKENS, Property::Tokens(tokens));
    }
}

/// Whitespace tokenizer component.
pub struct WhitespaceTokenizer {
    config: ComponentConfig,
}

impl Component for WhitespaceTokenizer {
    fn config(&self) -> &ComponentConfig {
        &self.config
    }

    fn train(
        &mut self,
        data: &mut TrainingData,
        _config: &ModelConfig,
        _context: &Context,
    ) -> Result<Option<ContextUpdate>> {
        tokenize_examples(data, tokenize_whitespace);
        Ok(None)
    }

    fn process(&self, message: &mut Message, _context: &Context) -> Result<()> {
        let tokens = tokenize_whitespace(message.text());
        message.set(keys::TOKENS, Property::Tokens(tokens));
        Ok(())
    }
}

/// Factory for [`WhitespaceTokenizer`].
pub struct WhitespaceTokenizerFactory;

impl ComponentFactory for WhitespaceTokenizerFactory {
    fn name(&self) -> &str {
        "tokenizer_whitespace"
    }

    fn provides(&self) -> &[&str] {
        &[keys::TOKENS]
    }

    fn create(&self, config: ComponentConfig, _: &ModelConfig) -> Result<Box<dyn Component>> {
        Ok(Box::new(WhitespaceTokenizer { config }))
    }
}

// ---------------------------------------------------------------------------
// Dictionary tokenizer
// ---------------------------------------------------------------------------

/// Directory (inside a persisted model) holding the dictionary copies.
pub const DICTIONARY_DIR: &str = "dictionary";

/// A user word list used for forward maximum matching.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    words: HashSet<String>,
    max_len: usize,
    /// Source files with their paths relative to the dictionary root.
    files: Vec<(PathBuf, PathBuf)>,
}

impl Dictionary {
    /// Read every file below `path` (a file or a directory), skipping hidden
    /// files and directories.
    ///
    /// Each line holds `word [freq [tag]]`; only the word is used.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(QuillError::config(format!(
                "dictionary path '{}' does not exist",
                path.display()
            )));
        }
        let mut dictionary = Self::default();
        let walker = WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
        for entry in walker {
            let entry = entry.map_err(|e| QuillError::config(format!("failed to read dictionary: {e}")))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let contents = std::fs::read_to_string(entry.path())?;
            for word in contents.lines().filter_map(|l| l.split_whitespace().next()) {
                dictionary.insert(word);
            }
            let relative = match entry.path().strip_prefix(path) {
                Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
                _ => PathBuf::from(entry.file_name()),
            };
            dictionary.files.push((entry.path().to_path_buf(), relative));
        }
        debug!(words = dictionary.words.len(), files = dictionary.files.len(), "loaded dictionary");
        Ok(dictionary)
    }

    /// Add a single word.
    pub fn insert(&mut self, word: &str) {
        let word = word.to_lowercase();
        self.max_len = self.max_len.max(word.chars().count());
        self.words.insert(word);
    }

    /// Number of distinct words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the dictionary has no words.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Length in chars of the longest dictionary word starting at `chars[at]`.
    fn longest_match(&self, chars: &[char], at: usize) -> usize {
        let limit = self.max_len.min(chars.len() - at);
        (1..=limit)
            .rev()
            .find(|len| {
                let candidate: String = chars[at..at + len].iter().collect::<String>().to_lowercase();
                self.words.contains(&candidate)
            })
            .unwrap_or(0)
    }

    /// Forward maximum matching.
    ///
    /// Dictionary words win; alphanumeric runs outside the dictionary form
    /// one token; whitespace separates; any other char is its own token.
    pub fn tokenize(&self, text: &str) -> Vec<Token> {
        let chars: Vec<char> = text.chars().collect();
        let mut tokens = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            if chars[i].is_whitespace() {
                i += 1;
                continue;
            }
            let matched = self.longest_match(&chars, i);
            let len = if matched > 0 {
                matched
            } else if chars[i].is_alphanumeric() {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_alphanumeric() && self.longest_match(&chars, j) == 0 {
                    j += 1;
                }
                j - i
            } else {
                1
            };
            tokens.push(Token::new(chars[i..i + len].iter().collect::<String>(), i));
            i += len;
        }
        tokens
    }
}

/// Tokenizer driven by a user dictionary.
pub struct DictionaryTokenizer {
    config: ComponentConfig,
    dictionary: Dictionary,
}

impl DictionaryTokenizer {
    fn from_config(config: ComponentConfig, base: Option<&Path>) -> Result<Self> {
        let dictionary = match config.get_str("dictionary_path") {
            Some(p) => {
                let path = Path::new(p);
                let path = match base {
                    Some(base) if path.is_relative() => base.join(path),
                    _ => path.to_path_buf(),
                };
                Dictionary::load(&path)?
            }
            None => Dictionary::default(),
        };
        Ok(Self { config, dictionary })
    }
}

impl Component for DictionaryTokenizer {
    fn config(&self) -> &ComponentConfig {
        &self.config
    }

    fn train(
        &mut self,
        data: &mut TrainingData,
        _config: &ModelConfig,
        _context: &Context,
    ) -> Result<Option<ContextUpdate>> {
        tokenize_examples(data, |t| self.dictionary.tokenize(t));
        Ok(None)
    }

    fn process(&self, message: &mut Message, _context: &Context) -> Result<()> {
        let tokens = self.dictionary.tokenize(message.text());
        message.set(keys::TOKENS, Property::Tokens(tokens));
        Ok(())
    }

    fn persist(&self, model_dir: &Path) -> Result<Option<ComponentConfig>> {
        if self.dictionary.files.is_empty() {
            return Ok(None);
        }
        let target = model_dir.join(DICTIONARY_DIR);
        std::fs::create_dir_all(&target)?;
        for (source, relative) in &self.dictionary.files {
            let destination = target.join(relative);
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(source, destination)?;
        }
        let mut entry = ComponentConfig::default();
        entry.insert("dictionary_path", serde_json::Value::String(DICTIONARY_DIR.into()));
        Ok(Some(entry))
    }
}

/// Factory for [`DictionaryTokenizer`].
pub struct DictionaryTokenizerFactory;

impl ComponentFactory for DictionaryTokenizerFactory {
    fn name(&self) -> &str {
        "tokenizer_dictionary"
    }

    fn provides(&self) -> &[&str] {
        &[keys::TOKENS]
    }

    fn create(&self, config: ComponentConfig, _: &ModelConfig) -> Result<Box<dyn Component>> {
        Ok(Box::new(DictionaryTokenizer::from_config(config, None)?))
    }

    fn load(&self, model_dir: &Path, config: ComponentConfig, _: &Context) -> Result<Box<dyn Component>> {
        Ok(Box::new(DictionaryTokenizer::from_config(config, Some(model_dir))?))
    }
}
