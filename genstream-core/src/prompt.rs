//! Request → prompt pipeline: extract, post-process, render.
//!
//! Each stage is a single-method strategy chosen when the builder is
//! constructed. Plain closures work as post-processors.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::config::PromptCfg;
use crate::error::{CoreResult, GenStreamError};
use crate::model::{GenerationRequest, Role};

pub const INPUT_PLACEHOLDER: &str = "{input}";

pub const DEFAULT_TEMPLATE: &str = "Below is an instruction that describes a task. \
Write a response that appropriately completes the request.\n\n\
### Instruction:\n{input}\n\n### Response:";

/// Pulls the relevant part out of a message's content.
pub trait ContentExtractor: Send + Sync {
    /// Returns the extracted text, or the content unchanged when nothing matches.
    fn extract(&self, role: Role, content: &str) -> String;
}

pub trait TextPostProcessor: Send + Sync {
    fn process(&self, text: &str) -> String;
}

impl<F> TextPostProcessor for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn process(&self, text: &str) -> String {
        self(text)
    }
}

pub trait PromptTemplate: Send + Sync {
    fn render(&self, input: &str) -> String;
}

/// Unicode NFC normalization + BOM strip + CRLF -> LF + trim.
pub fn clean_text(s: &str) -> String {
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

/// Extracts the body of a fenced code block in one language.
///
/// User content must be a closed block; assistant content may be an
/// open-ended block (generation in progress). Other roles pass through.
#[derive(Debug, Clone)]
pub struct CodeBlockExtractor {
    user: Regex,
    assistant: Regex,
}

static LUA_BLOCKS: Lazy<Option<CodeBlockExtractor>> =
    Lazy::new(|| CodeBlockExtractor::compile("lua").ok());

impl CodeBlockExtractor {
    pub fn new(language: &str) -> CoreResult<Self> {
        match (language, LUA_BLOCKS.as_ref()) {
            ("lua", Some(cached)) => Ok(cached.clone()),
            _ => Self::compile(language),
        }
    }

    fn compile(language: &str) -> CoreResult<Self> {
        let lang = regex::escape(language);
        // `\n?$` lets a single trailing newline follow the block
        let user = Regex::new(&format!(r"^```{lang}\n([\s\S]*?)```\n?$"));
        let assistant = Regex::new(&format!(r"^```{lang}\n([\s\S]*?)\n?$"));
        match (user, assistant) {
            (Ok(user), Ok(assistant)) => Ok(Self { user, assistant }),
            (Err(e), _) | (_, Err(e)) => Err(GenStreamError::Validation(format!(
                "invalid code block language '{language}': {e}"
            ))),
        }
    }
}

impl ContentExtractor for CodeBlockExtractor {
    fn extract(&self, role: Role, content: &str) -> String {
        let pattern = match role {
            Role::User => &self.user,
            Role::Assistant => &self.assistant,
            Role::System | Role::Tool => return content.to_string(),
        };
        pattern
            .captures(content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| content.to_string())
    }
}

pub struct Passthrough;

impl ContentExtractor for Passthrough {
    fn extract(&self, _role: Role, content: &str) -> String {
        content.to_string()
    }
}

impl TextPostProcessor for Passthrough {
    fn process(&self, text: &str) -> String {
        text.to_string()
    }
}

pub struct StripLeft;

impl TextPostProcessor for StripLeft {
    fn process(&self, text: &str) -> String {
        text.trim_start().to_string()
    }
}

/// Template with a single `{input}` placeholder.
#[derive(Debug, Clone)]
pub struct InstructionTemplate {
    template: String,
}

impl InstructionTemplate {
    pub fn new(template: impl Into<String>) -> CoreResult<Self> {
        let template = template.into();
        if !template.contains(INPUT_PLACEHOLDER) {
            return Err(GenStreamError::Validation(format!(
                "prompt template must contain {INPUT_PLACEHOLDER}"
            )));
        }
        Ok(Self { template })
    }
}

impl Default for InstructionTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate for InstructionTemplate {
    fn render(&self, input: &str) -> String {
        self.template.replace(INPUT_PLACEHOLDER, input)
    }
}

pub struct PromptBuilder {
    extractor: Box<dyn ContentExtractor>,
    post: Box<dyn TextPostProcessor>,
    template: Box<dyn PromptTemplate>,
    normalize: bool,
}

impl PromptBuilder {
    pub fn new(
        extractor: Box<dyn ContentExtractor>,
        post: Box<dyn TextPostProcessor>,
        template: Box<dyn PromptTemplate>,
    ) -> Self {
        Self {
            extractor,
            post,
            template,
            normalize: false,
        }
    }

    pub fn with_normalization(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn from_config(cfg: &PromptCfg) -> CoreResult<Self> {
        let extractor: Box<dyn ContentExtractor> = match &cfg.code_language {
            Some(lang) => Box::new(CodeBlockExtractor::new(lang)?),
            None => Box::new(Passthrough),
        };
        let post: Box<dyn TextPostProcessor> = if cfg.strip_left {
            Box::new(StripLeft)
        } else {
            Box::new(Passthrough)
        };
        let template = match &cfg.template {
            Some(t) => InstructionTemplate::new(t.clone())?,
            None => InstructionTemplate::default(),
        };
        Ok(Self::new(extractor, post, Box::new(template)).with_normalization(cfg.normalize))
    }

    /// Render the prompt from the request's last message.
    pub fn build(&self, req: &GenerationRequest) -> CoreResult<String> {
        let last = req
            .messages
            .last()
            .ok_or_else(|| GenStreamError::Validation("messages must not be empty".into()))?;
        let content = if self.normalize {
            clean_text(&last.content)
        } else {
            last.content.clone()
        };
        let extracted = self.extractor.extract(last.role, &content);
        let input = self.post.process(&extracted);
        Ok(self.template.render(&input))
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        let extractor: Box<dyn ContentExtractor> = match LUA_BLOCKS.as_ref() {
            Some(lua) => Box::new(lua.clone()),
            None => Box::new(Passthrough),
        };
        Self::new(
            extractor,
            Box::new(StripLeft),
            Box::new(InstructionTemplate::default()),
        )
    }
}
