use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    /// Kept as text: sources write "2 1/4", "a pinch", "1-2".
    pub amount: Option<String>,
    pub unit: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_number: u32,
    pub instruction: String,
    pub duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Recipe {
    pub title: Option<String>,
    pub description: Option<String>,
    pub prep_time: Option<String>,
    pub cook_time: Option<String>,
    pub total_time: Option<String>,
    pub servings: Option<String>,
    pub difficulty: Option<String>,
    pub cuisine: Option<String>,
    pub course: Option<String>,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub nutrition_info: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub author: Option<String>,
    /// Always overwritten with the requested URL; the model never decides it.
    #[serde(default)]
    pub source_url: String,
}

impl Recipe {
    /// Checks the invariants a recipe must hold before it leaves the
    /// extraction client. Returns one message per violation.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if !is_absolute_http_url(&self.source_url) {
            problems.push(format!(
                "source_url must be an absolute http(s) URL, got {:?}",
                self.source_url
            ));
        }

        for (idx, ingredient) in self.ingredients.iter().enumerate() {
            if ingredient.name.trim().is_empty() {
                problems.push(format!("ingredients[{}].name must not be empty", idx));
            }
        }

        let mut previous: Option<u32> = None;
        for (idx, step) in self.steps.iter().enumerate() {
            if step.instruction.trim().is_empty() {
                problems.push(format!("steps[{}].instruction must not be empty", idx));
            }
            match previous {
                None if step.step_number != 1 => problems.push(format!(
                    "steps must start at step_number 1, got {}",
                    step.step_number
                )),
                Some(prev) if step.step_number <= prev => problems.push(format!(
                    "steps[{}].step_number {} must be greater than {}",
                    idx, step.step_number, prev
                )),
                _ => {}
            }
            previous = Some(step.step_number);
        }

        for (idx, image) in self.image_urls.iter().enumerate() {
            if !is_absolute_http_url(image) {
                problems.push(format!(
                    "image_urls[{}] must be an absolute http(s) URL, got {:?}",
                    idx, image
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// Response envelope for `POST /extract`. Only the two constructors build
/// it, so exactly one of `recipe` / `error` is ever set.
#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipe: Option<Recipe>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ExtractResponse {
    pub fn ok(recipe: Recipe) -> Self {
        Self {
            success: true,
            recipe: Some(recipe),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            recipe: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn recipe(&self) -> Option<&Recipe> {
        self.recipe.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Parses `raw` as an absolute http(s) URL with a host.
pub fn parse_http_url(raw: &str) -> Result<Url, String> {
    let parsed = Url::parse(raw.trim()).map_err(|e| format!("Invalid URL: {}", e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!(
            "Invalid URL: scheme must be http or https, got {}",
            parsed.scheme()
        ));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err("Invalid URL: missing host".to_string());
    }
    Ok(parsed)
}

fn is_absolute_http_url(raw: &str) -> bool {
    parse_http_url(raw).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(n: u32, text: &str) -> Step {
        Step {
            step_number: n,
            instruction: text.to_string(),
            duration: None,
        }
    }

    fn recipe_with_steps(steps: Vec<Step>) -> Recipe {
        Recipe {
            title: Some("Pancakes".to_string()),
            steps,
            source_url: "https://example.com/pancakes".to_string(),
            ..Recipe::default()
        }
    }

    #[test]
    fn accepts_well_formed_recipe() {
        let mut recipe = recipe_with_steps(vec![step(1, "Mix"), step(2, "Fry")]);
        recipe.ingredients.push(Ingredient {
            name: "flour".to_string(),
            amount: Some("2 1/4".to_string()),
            unit: Some("cups".to_string()),
            notes: None,
        });
        recipe.image_urls.push("https://example.com/p.jpg".to_string());
        assert!(recipe.validate().is_ok());
    }

    #[test]
    fn rejects_steps_not_starting_at_one() {
        let recipe = recipe_with_steps(vec![step(2, "Mix"), step(3, "Fry")]);
        let problems = recipe.validate().unwrap_err();
        assert!(problems[0].contains("start at step_number 1"));
    }

    #[test]
    fn rejects_duplicate_and_descending_steps() {
        let recipe = recipe_with_steps(vec![step(1, "Mix"), step(1, "Rest"), step(0, "Fry")]);
        let problems = recipe.validate().unwrap_err();
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn rejects_blank_instruction_and_ingredient_name() {
        let mut recipe = recipe_with_steps(vec![step(1, "  ")]);
        recipe.ingredients.push(Ingredient {
            name: String::new(),
            amount: None,
            unit: None,
            notes: None,
        });
        let problems = recipe.validate().unwrap_err();
        assert!(problems.iter().any(|p| p.contains("instruction")));
        assert!(problems.iter().any(|p| p.contains("ingredients[0].name")));
    }

    #[test]
    fn rejects_relative_image_url() {
        let mut recipe = recipe_with_steps(vec![]);
        recipe.image_urls.push("/img/cake.png".to_string());
        assert!(recipe.validate().is_err());
    }

    #[test]
    fn missing_lists_deserialize_as_empty() {
        let recipe: Recipe = serde_json::from_str(r#"{"title": "Toast"}"#).unwrap();
        assert!(recipe.ingredients.is_empty());
        assert!(recipe.steps.is_empty());
        assert!(recipe.tags.is_empty());
    }

    #[test]
    fn response_envelope_carries_exactly_one_payload() {
        let ok = serde_json::to_value(ExtractResponse::ok(recipe_with_steps(vec![]))).unwrap();
        assert_eq!(ok["success"], true);
        assert!(ok.get("recipe").is_some());
        assert!(ok.get("error").is_none());

        let failed = serde_json::to_value(ExtractResponse::failure("boom")).unwrap();
        assert_eq!(failed["success"], false);
        assert!(failed.get("recipe").is_none());
        assert_eq!(failed["error"], "boom");
    }

    #[test]
    fn response_accessors_match_constructor() {
        let ok = ExtractResponse::ok(recipe_with_steps(vec![]));
        assert!(ok.is_success());
        assert_eq!(ok.recipe().map(|r| r.source_url.as_str()), Some("https://example.com/pancakes"));
        assert!(ok.error().is_none());

        let failed = ExtractResponse::failure("boom");
        assert!(!failed.is_success());
        assert!(failed.recipe().is_none());
        assert_eq!(failed.error(), Some("boom"));
    }

    #[test]
    fn parse_http_url_rules() {
        assert!(parse_http_url("https://example.com/recipe-page").is_ok());
        assert!(parse_http_url("not a url").is_err());
        assert!(parse_http_url("ftp://example.com/file").is_err());
        assert!(parse_http_url("/relative/path").is_err());
        assert!(parse_http_url("mailto:cook@example.com").is_err());
    }
}
