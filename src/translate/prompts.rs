//! Genre system prompts.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::glossary::Glossary;
use super::Mode;
use crate::error::{Result, TranslateError};

/// Returns the system prompt for a translation mode.
#[async_trait]
pub trait PromptResolver: Send + Sync {
    async fn resolve(&self, mode: Mode) -> Result<String>;
}

const OUTPUT_RULES: &str = "Translate the whole text from beginning to end without stopping or \
summarising. Wrap the complete Vietnamese translation in <translation></translation> tags and \
output nothing else.";

const WUXIA_PROMPT: &str = "You are an experienced translator and novelist working on wuxia and \
xianxia fiction. Turn the draft chapter you are given into polished Vietnamese prose in the \
conventions of the genre: martial arts terminology, poetic and vivid language, dramatic fight \
scenes, proper titles and honorifics. You may expand descriptions, dialogue and inner monologue \
where it suits the style, but keep the plot and characters exactly as in the original. Use \
natural Vietnamese idiom for a Vietnamese readership.";

const FANTASY_PROMPT: &str = "You are an experienced translator and novelist working on fantasy \
fiction. Translate the original Chinese chapter you are given into polished Vietnamese prose in \
the conventions of the genre: consistent terminology, vivid language, dramatic action scenes, \
proper titles and honorifics. Keep the plot and characters exactly as in the original. Render \
every Chinese personal and organisation name in English. Use natural Vietnamese idiom for a \
Vietnamese readership.";

fn base_prompt(mode: Mode) -> &'static str {
    match mode {
        Mode::Wuxia => WUXIA_PROMPT,
        Mode::FantasyTranslate => FANTASY_PROMPT,
    }
}

/// Static genre prompts plus the optional name glossary, reloaded on each
/// call so edits to the file apply to the next chapter.
pub struct GenrePrompts {
    glossary_path: Option<PathBuf>,
}

impl GenrePrompts {
    pub fn new(glossary_path: Option<PathBuf>) -> Self {
        Self { glossary_path }
    }

    async fn glossary(&self) -> Glossary {
        let Some(path) = &self.glossary_path else {
            return Glossary::empty();
        };
        match Glossary::load_from_file(path).await {
            Ok(glossary) => glossary,
            Err(TranslateError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no glossary file");
                Glossary::empty()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "glossary load failed, using empty");
                Glossary::empty()
            }
        }
    }
}

#[async_trait]
impl PromptResolver for GenrePrompts {
    async fn resolve(&self, mode: Mode) -> Result<String> {
        let glossary = self.glossary().await;
        let mut prompt = format!("{}\n\n{}", base_prompt(mode), OUTPUT_RULES);
        if let Some(section) = glossary.render_section() {
            debug!(mode = %mode, glossary_version = glossary.version(), "glossary applied");
            prompt.push_str("\n\n");
            prompt.push_str(&section);
        }
        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("chapterflow-{}-{name}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn modes_get_distinct_prompts() {
        let prompts = GenrePrompts::new(None);
        let wuxia = prompts.resolve(Mode::Wuxia).await.unwrap();
        let fantasy = prompts.resolve(Mode::FantasyTranslate).await.unwrap();
        assert!(wuxia.contains("wuxia"));
        assert!(fantasy.contains("fantasy"));
        assert!(wuxia.contains("<translation>"));
        assert_ne!(wuxia, fantasy);
    }

    #[tokio::test]
    async fn glossary_file_is_appended() {
        let path = temp_path("glossary.json");
        tokio::fs::write(
            &path,
            r#"{"version":1,"entries":[{"source":"萧炎","target":"Tiêu Viêm"}]}"#,
        )
        .await
        .unwrap();

        let prompt = GenrePrompts::new(Some(path.clone()))
            .resolve(Mode::Wuxia)
            .await
            .unwrap();
        assert!(prompt.contains("萧炎 => Tiêu Viêm"));

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn missing_or_broken_glossary_falls_back_to_base_prompt() {
        let missing = GenrePrompts::new(Some(temp_path("absent.json")));
        let base = GenrePrompts::new(None).resolve(Mode::Wuxia).await.unwrap();
        assert_eq!(missing.resolve(Mode::Wuxia).await.unwrap(), base);

        let path = temp_path("broken.json");
        tokio::fs::write(&path, "{oops").await.unwrap();
        let broken = GenrePrompts::new(Some(path.clone()));
        assert_eq!(broken.resolve(Mode::Wuxia).await.unwrap(), base);
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
