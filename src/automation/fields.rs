//! Per-item field work: the title/description precedence policy, the
//! empty-content branches, and the category/release/exclusivity mutations.
//!
//! Title/description precedence:
//! 1. non-empty title → leave as-is (still sanitized on write),
//! 2. empty title, non-empty description → copy sanitized description,
//! 3. both empty → the configured empty-content policy decides between
//!    skipping, vision generation, and the generic placeholder.
//!
//! Every field write goes through `set_field_value_with_events` so the
//! destination page's reactive listeners fire.

use crate::automation::flow::{RunContext, RunError, StepFlow};
use crate::automation::selectors::{
    AI_CATEGORY_CODE, AI_SUBCATEGORY_CODE, CATEGORY_REMOVE, CATEGORY_SELECT, DESCRIPTION_FIELD,
    EXCLUSIVE_CONFIRM, EXCLUSIVE_TOGGLE, MODEL_RELEASE_BUTTON, MODEL_RELEASE_FIRST_OPTION,
    PREVIEW_REGION, SUBCATEGORY_SELECT, TITLE_FIELD,
};
use crate::browser::driver::PageDriver;
use crate::content::sanitize::sanitize_title;
use crate::content::templates::sample_template_phrase;
use crate::content::vision::VisionAnalyzer;
use crate::core::types::{EmptyContentPolicy, RunConfiguration, SameIdAction, Severity, Template};
use std::sync::Arc;
use std::time::Duration;

/// Description applied when both fields are empty and generation is
/// unavailable (the `useGenericFallback` branch).
pub const GENERIC_FALLBACK_DESCRIPTION: &str =
    "High quality stock image suitable for commercial and editorial use in creative projects.";

/// Everything the field steps need for one item.
pub struct FieldWork<'a> {
    pub driver: &'a Arc<dyn PageDriver>,
    pub ctx: &'a RunContext,
    pub cfg: &'a RunConfiguration,
    pub vision: Option<&'a VisionAnalyzer>,
    /// Resolved empty-content policy (wire option or strategy default).
    pub empty_policy: EmptyContentPolicy,
}

impl<'a> FieldWork<'a> {
    /// Run the full title/description policy for the currently-open item.
    pub async fn populate(&self, item_id: &str, item_index: u32) -> Result<StepFlow, RunError> {
        self.ctx
            .emit(7, Severity::Info, "Processing title and description...");

        let mut title = self
            .driver
            .read_value(TITLE_FIELD)
            .await
            .map_err(RunError::Page)?;
        let description = self
            .driver
            .read_value(DESCRIPTION_FIELD)
            .await
            .map_err(RunError::Page)?;

        if title.trim().is_empty() && description.trim().is_empty() {
            match self.content_for_empty_item(item_id, item_index).await? {
                Some((generated_title, generated_description)) => {
                    self.driver
                        .set_field_value_with_events(DESCRIPTION_FIELD, &generated_description)
                        .await
                        .map_err(RunError::Page)?;
                    self.ctx.sleep_checked(Duration::from_secs(1)).await?;
                    title = generated_title;
                }
                None => {
                    // Item is not usable under the configured policy. The
                    // duplicate action doubles as the historical "what to do
                    // with dead items" switch: stop ends the run gracefully.
                    return Ok(if self.cfg.same_id_action == SameIdAction::Stop {
                        StepFlow::StopRun
                    } else {
                        StepFlow::SkipItem
                    });
                }
            }
        }

        if title.trim().is_empty() {
            let current_desc = self
                .driver
                .read_value(DESCRIPTION_FIELD)
                .await
                .map_err(RunError::Page)?;
            if !current_desc.trim().is_empty() {
                title = current_desc;
                self.ctx
                    .emit(7, Severity::Info, "Copied description to title field");
            }
        }

        if !title.trim().is_empty() {
            let sanitized = sanitize_title(&title);
            self.driver
                .set_field_value_with_events(TITLE_FIELD, &sanitized)
                .await
                .map_err(RunError::Page)?;
            self.ctx.sleep_checked(Duration::from_millis(1500)).await?;
            self.ctx.emit(
                7,
                Severity::Info,
                format!(
                    "Title set: {}...",
                    sanitized.chars().take(50).collect::<String>()
                ),
            );
        }

        if !self.cfg.manual_description.is_empty() {
            let current = self
                .driver
                .read_value(DESCRIPTION_FIELD)
                .await
                .map_err(RunError::Page)?;
            let enhanced = if current.is_empty() {
                self.cfg.manual_description.clone()
            } else {
                format!("{} {}", current, self.cfg.manual_description)
            };
            self.driver
                .set_field_value_with_events(DESCRIPTION_FIELD, &enhanced)
                .await
                .map_err(RunError::Page)?;
            self.ctx.sleep_checked(Duration::from_secs(1)).await?;
            self.ctx.emit(7, Severity::Info, "Added manual description");
        }

        if self.cfg.template != Template::None {
            let phrase = sample_template_phrase(self.cfg.template);
            if !phrase.is_empty() {
                let current = self
                    .driver
                    .read_value(DESCRIPTION_FIELD)
                    .await
                    .map_err(RunError::Page)?;
                let enhanced = format!("{}{}", current, phrase);
                self.driver
                    .set_field_value_with_events(DESCRIPTION_FIELD, &enhanced)
                    .await
                    .map_err(RunError::Page)?;
                self.ctx.sleep_checked(Duration::from_secs(1)).await?;
                self.ctx
                    .emit(7, Severity::Info, format!("Added template: {}", phrase));
            }
        }

        self.ctx
            .emit(7, Severity::Success, "Title and description processed");
        Ok(StepFlow::Continue)
    }

    /// Resolve content for an item with neither title nor description.
    /// `Ok(None)` means "do not submit this item" under the active policy.
    async fn content_for_empty_item(
        &self,
        item_id: &str,
        item_index: u32,
    ) -> Result<Option<(String, String)>, RunError> {
        if self.empty_policy == EmptyContentPolicy::Skip {
            self.ctx.emit(
                7,
                Severity::Warning,
                "Both title and description are empty - skipping item",
            );
            return Ok(None);
        }

        self.ctx.emit(
            7,
            Severity::Info,
            "Both title and description are empty - generating content...",
        );
        if let Some(generated) = self.try_generate().await? {
            self.ctx.emit(
                7,
                Severity::Success,
                format!(
                    "Generated: {}...",
                    generated.title.chars().take(40).collect::<String>()
                ),
            );
            return Ok(Some((generated.title, generated.description)));
        }

        match self.empty_policy {
            EmptyContentPolicy::UseGenericFallback => {
                let identifier = if item_id.trim().is_empty() {
                    item_index.to_string()
                } else {
                    item_id.trim().to_string()
                };
                self.ctx.emit(
                    7,
                    Severity::Info,
                    "Generation unavailable - applying generic fallback content",
                );
                Ok(Some((
                    format!("AI Generated Image {}", identifier),
                    GENERIC_FALLBACK_DESCRIPTION.to_string(),
                )))
            }
            _ => {
                self.ctx.emit(
                    7,
                    Severity::Warning,
                    "Content generation failed - skipping item",
                );
                Ok(None)
            }
        }
    }

    /// One generation attempt from a screenshot of the visible preview.
    /// Every failure mode is soft (`Ok(None)`); only a stop request escapes.
    async fn try_generate(&self) -> Result<Option<crate::content::vision::GeneratedContent>, RunError>
    {
        let Some(vision) = self.vision else {
            self.ctx
                .emit(7, Severity::Warning, "Content generator not configured");
            return Ok(None);
        };
        if !self.driver.exists(PREVIEW_REGION).await.unwrap_or(false) {
            self.ctx
                .emit(7, Severity::Warning, "Image preview region not found");
            return Ok(None);
        }
        let png = match self.driver.screenshot_element(PREVIEW_REGION).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.ctx.emit(
                    7,
                    Severity::Warning,
                    format!("Preview screenshot failed: {}", e),
                );
                return Ok(None);
            }
        };
        self.ctx.check_stop()?;
        self.ctx
            .emit(7, Severity::Info, "Analyzing image preview with vision model...");
        Ok(vision.analyze(&png).await)
    }

    // ── Categorization / release / exclusivity ──────────────────────────────

    /// Set the AI-generated category/subcategory pair. Page-level trouble is
    /// demoted to a warning; the item is still submitted.
    pub async fn apply_ai_category(&self) -> Result<(), RunError> {
        if !self.cfg.ai_image {
            return Ok(());
        }
        self.ctx
            .emit(7, Severity::Info, "Applying AI image categorization...");
        match self.try_apply_ai_category().await {
            Ok(()) => {
                self.ctx
                    .emit(7, Severity::Success, "AI categorization complete");
                Ok(())
            }
            Err(RunError::StopRequested) => Err(RunError::StopRequested),
            Err(e) => {
                self.ctx.emit(
                    7,
                    Severity::Warning,
                    format!("AI categorization failed, continuing... ({})", e),
                );
                Ok(())
            }
        }
    }

    async fn try_apply_ai_category(&self) -> Result<(), RunError> {
        // Clear any pre-selected category first; absence is fine.
        if self.driver.exists(CATEGORY_REMOVE).await.unwrap_or(false)
            && self.driver.click(CATEGORY_REMOVE).await.is_ok()
        {
            self.ctx.sleep_checked(Duration::from_millis(1500)).await?;
            self.ctx
                .emit(7, Severity::Info, "Removed existing category");
        }

        if self
            .driver
            .exists(CATEGORY_SELECT)
            .await
            .map_err(RunError::Page)?
        {
            self.driver
                .select_option(CATEGORY_SELECT, AI_CATEGORY_CODE)
                .await
                .map_err(RunError::Page)?;
            // Category selection triggers a dependent-field reload on the
            // destination page; the settle here is deliberately long.
            self.ctx.sleep_checked(Duration::from_millis(4500)).await?;
        }

        if self
            .driver
            .exists(SUBCATEGORY_SELECT)
            .await
            .map_err(RunError::Page)?
        {
            self.driver
                .select_option(SUBCATEGORY_SELECT, AI_SUBCATEGORY_CODE)
                .await
                .map_err(RunError::Page)?;
            self.ctx.sleep_checked(Duration::from_secs(1)).await?;
        }
        Ok(())
    }

    /// Attach the first available model release. Best-effort.
    pub async fn apply_model_release(&self) -> Result<(), RunError> {
        if !self.cfg.model_release {
            return Ok(());
        }
        self.ctx.emit(7, Severity::Info, "Adding model release...");
        match self.try_apply_model_release().await {
            Ok(()) => Ok(()),
            Err(RunError::StopRequested) => Err(RunError::StopRequested),
            Err(e) => {
                self.ctx.emit(
                    7,
                    Severity::Warning,
                    format!("Model release processing failed, continuing... ({})", e),
                );
                Ok(())
            }
        }
    }

    async fn try_apply_model_release(&self) -> Result<(), RunError> {
        if !self
            .driver
            .exists(MODEL_RELEASE_BUTTON)
            .await
            .map_err(RunError::Page)?
        {
            return Ok(());
        }
        self.driver
            .click(MODEL_RELEASE_BUTTON)
            .await
            .map_err(RunError::Page)?;
        self.ctx.sleep_checked(Duration::from_secs(1)).await?;
        if self
            .driver
            .exists(MODEL_RELEASE_FIRST_OPTION)
            .await
            .map_err(RunError::Page)?
        {
            self.driver
                .click(MODEL_RELEASE_FIRST_OPTION)
                .await
                .map_err(RunError::Page)?;
            self.ctx.sleep_checked(Duration::from_secs(1)).await?;
            self.ctx.emit(7, Severity::Success, "Model release added");
        }
        Ok(())
    }

    /// Toggle exclusivity and confirm the follow-up dialog. Best-effort.
    pub async fn apply_exclusive(&self) -> Result<(), RunError> {
        if !self.cfg.exclusive_image {
            return Ok(());
        }
        self.ctx.emit(7, Severity::Info, "Marking as exclusive...");
        match self.try_apply_exclusive().await {
            Ok(()) => Ok(()),
            Err(RunError::StopRequested) => Err(RunError::StopRequested),
            Err(e) => {
                self.ctx.emit(
                    7,
                    Severity::Warning,
                    format!("Exclusive image processing failed, continuing... ({})", e),
                );
                Ok(())
            }
        }
    }

    async fn try_apply_exclusive(&self) -> Result<(), RunError> {
        if !self
            .driver
            .exists(EXCLUSIVE_TOGGLE)
            .await
            .map_err(RunError::Page)?
        {
            return Ok(());
        }
        self.driver
            .click(EXCLUSIVE_TOGGLE)
            .await
            .map_err(RunError::Page)?;
        self.ctx.sleep_checked(Duration::from_secs(1)).await?;
        if self.driver.exists(EXCLUSIVE_CONFIRM).await.unwrap_or(false) {
            self.driver
                .click(EXCLUSIVE_CONFIRM)
                .await
                .map_err(RunError::Page)?;
            self.ctx.sleep_checked(Duration::from_secs(1)).await?;
        }
        self.ctx.emit(7, Severity::Success, "Marked as exclusive");
        Ok(())
    }
}
