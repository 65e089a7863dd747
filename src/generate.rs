//! Draft generation: prompt → starter markdown document.
//!
//! [`TemplateGenerator`] fills a fixed two-page template with the prompt as
//! the title. It has no model behind it; swap in another
//! [`ContentGenerator`] to produce real drafts.

use async_trait::async_trait;

use crate::error::CarouselError;

/// Produces a markdown draft from a free-text prompt.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, CarouselError>;
}

/// Fixed two-page template titled with the prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateGenerator;

#[async_trait]
impl ContentGenerator for TemplateGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, CarouselError> {
        let title = validate_prompt(prompt)?;
        Ok(template(title))
    }
}

/// Trimmed prompt, or `Validation` when there is nothing left.
pub fn validate_prompt(prompt: &str) -> Result<&str, CarouselError> {
    let title = prompt.trim();
    if title.is_empty() {
        return Err(CarouselError::Validation { field: "Prompt" });
    }
    Ok(title)
}

fn template(title: &str) -> String {
    format!(
        "# {title}

This is sample content. Edit it to fit your needs.

## Highlights

1. Clear structure
2. Concise wording
3. Focused key points

---

This is the second page.

## More information

- Item one
- Item two
- Item three

> Note: this is sample content, adapt it to what you actually need."
    )
}
