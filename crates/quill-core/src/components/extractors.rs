//! Entity extractors and processors.

use std::collections::BTreeMap;
use std::path::Path;

use quill_types::config::{ComponentConfig, ModelConfig};
use quill_types::message::{Entity, Message, Property, Token, char_slice, keys};
use quill_types::training::TrainingData;
use quill_types::Result;

use super::{read_artifact, write_artifact};
use crate::component::{Component, ComponentFactory, Context, ContextUpdate};

fn normalise_surface(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Lookup extractor
// ---------------------------------------------------------------------------

const LOOKUP_FILE: &str = "lookup_entities.json";

/// Tags token spans that appeared as annotated entities in the training data.
///
/// Surface forms are matched case-insensitively over whole tokens, longest
/// span first. The emitted value is the text as written; a later
/// `ner_synonyms` stage maps it to its canonical form.
pub struct LookupExtractor {
    config: ComponentConfig,
    lookup: BTreeMap<String, String>,
    max_tokens: usize,
}

impl LookupExtractor {
    fn with_lookup(config: ComponentConfig, lookup: BTreeMap<String, String>) -> Self {
        let max_tokens = lookup
            .keys()
            .map(|k| k.split(' ').count())
            .max()
            .unwrap_or(0);
        Self {
            config,
            lookup,
            max_tokens,
        }
    }

    fn extract(&self, text: &str, tokens: &[Token]) -> Vec<Entity> {
        let mut entities = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let longest = (1..=self.max_tokens.min(tokens.len() - i)).rev().find_map(|n| {
                let span = &tokens[i..i + n];
                let surface = normalise_surface(
                    &span.iter().map(|t| t.text.as_str()).collect::<Vec<_>>().join(" "),
                );
                self.lookup.get(&surface).map(|entity| (n, entity))
            });
            match longest {
                Some((n, entity)) => {
                    let start = tokens[i].offset;
                    let end = tokens[i + n - 1].end();
                    let mut found = Entity::new(start, end, char_slice(text, start, end), entity.clone());
                    found.extractor = Some("ner_lookup".into());
                    entities.push(found);
                    i += n;
                }
                None => i += 1,
            }
        }
        entities
    }
}

impl Component for LookupExtractor {
    fn config(&self) -> &ComponentConfig {
        &self.config
    }

    fn train(
        &mut self,
        data: &mut TrainingData,
        _config: &ModelConfig,
        _context: &Context,
    ) -> Result<Option<ContextUpdate>> {
        let mut lookup = BTreeMap::new();
        for example in data.entity_examples() {
            for entity in example.entities() {
                let surface = normalise_surface(&char_slice(example.text(), entity.start, entity.end));
                if !surface.is_empty() {
                    lookup.insert(surface, entity.entity.clone());
                }
            }
        }
        *self = Self::with_lookup(self.config.clone(), lookup);
        Ok(None)
    }

    fn process(&self, message: &mut Message, _context: &Context) -> Result<()> {
        let found = self.extract(message.text(), message.tokens().unwrap_or_default());
        let mut entities = message.entities().to_vec();
        entities.extend(found);
        message.set_output(keys::ENTITIES, Property::Entities(entities));
        Ok(())
    }

    fn persist(&self, model_dir: &Path) -> Result<Option<ComponentConfig>> {
        write_artifact(model_dir, "lookup_file", LOOKUP_FILE, &self.lookup)
    }
}

/// Factory for [`LookupExtractor`].
pub struct LookupExtractorFactory;

impl ComponentFactory for LookupExtractorFactory {
    fn name(&self) -> &str {
        "ner_lookup"
    }

    fn provides(&self) -> &[&str] {
        &[keys::ENTITIES]
    }

    fn requires(&self) -> &[&str] {
        &[keys::TOKENS]
    }

    fn create(&self, config: ComponentConfig, _: &ModelConfig) -> Result<Box<dyn Component>> {
        Ok(Box::new(LookupExtractor::with_lookup(config, BTreeMap::new())))
    }

    fn load(&self, model_dir: &Path, config: ComponentConfig, _: &Context) -> Result<Box<dyn Component>> {
        let lookup = read_artifact(model_dir, &config, "lookup_file")?.unwrap_or_default();
        Ok(Box::new(LookupExtractor::with_lookup(config, lookup)))
    }
}

// ---------------------------------------------------------------------------
// Synonym mapper
// ---------------------------------------------------------------------------

const SYNONYMS_FILE: &str = "entity_synonyms.json";

/// Rewrites entity values to their canonical synonym.
pub struct SynonymMapper {
    config: ComponentConfig,
    synonyms: BTreeMap<String, String>,
}

impl SynonymMapper {
    fn replace(&self, entities: &mut [Entity]) {
        for entity in entities {
            if let Some(canonical) = self.synonyms.get(&entity.value.to_lowercase())
                && *canonical != entity.value
            {
                entity.value = canonical.clone();
                entity.processors.push("ner_synonyms".into());
            }
        }
    }
}

impl Component for SynonymMapper {
    fn config(&self) -> &ComponentConfig {
        &self.config
    }

    fn train(
        &mut self,
        data: &mut TrainingData,
        _config: &ModelConfig,
        _context: &Context,
    ) -> Result<Option<ContextUpdate>> {
        let mut synonyms = data.entity_synonyms.clone();
        for example in data.entity_examples() {
            for entity in example.entities() {
                let surface = char_slice(example.text(), entity.start, entity.end);
                if surface != entity.value {
                    synonyms.insert(surface.to_lowercase(), entity.value.clone());
                }
            }
        }
        self.synonyms = synonyms;
        Ok(None)
    }

    fn process(&self, message: &mut Message, _context: &Context) -> Result<()> {
        let mut entities = message.entities().to_vec();
        self.replace(&mut entities);
        message.set_output(keys::ENTITIES, Property::Entities(entities));
        Ok(())
    }

    fn persist(&self, model_dir: &Path) -> Result<Option<ComponentConfig>> {
        write_artifact(model_dir, "synonyms_file", SYNONYMS_FILE, &self.synonyms)
    }
}

/// Factory for [`SynonymMapper`].
pub struct SynonymMapperFactory;

impl ComponentFactory for SynonymMapperFactory {
    fn name(&self) -> &str {
        "ner_synonyms"
    }

    fn provides(&self) -> &[&str] {
        &[keys::ENTITIES]
    }

    fn requires(&self) -> &[&str] {
        &[keys::ENTITIES]
    }

    fn create(&self, config: ComponentConfig, _: &ModelConfig) -> Result<Box<dyn Component>> {
        Ok(Box::new(SynonymMapper {
            config,
            synonyms: BTreeMap::new(),
        }))
    }

    fn load(&self, model_dir: &Path, config: ComponentConfig, _: &Context) -> Result<Box<dyn Component>> {
        let synonyms = read_artifact(model_dir, &config, "synonyms_file")?.unwrap_or_default();
        Ok(Box::new(SynonymMapper { config, synonyms }))
    }
}
