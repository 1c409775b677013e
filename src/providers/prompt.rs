use serde_json::{json, Value};

/// System prompt for recipe extraction, loaded from `prompt.txt` at compile
/// time.
pub const RECIPE_EXTRACTION_PROMPT: &str = include_str!("prompt.txt");

/// Name the schema is registered under in the structured-output request.
pub const RECIPE_SCHEMA_NAME: &str = "recipe";

/// Build the user message carrying the page content.
pub fn build_user_prompt(content: &str) -> String {
    format!(
        "Extract the recipe data from this webpage content:\n\n{}",
        content
    )
}

/// Build the follow-up message sent after a malformed answer.
pub fn build_correction_prompt(reason: &str) -> String {
    format!(
        "Your previous answer could not be accepted: {}\n\nReturn the complete recipe again as a single JSON object that matches the schema.",
        reason
    )
}

fn nullable_string(description: &str) -> Value {
    json!({ "type": ["string", "null"], "description": description })
}

/// JSON schema the model output must follow. `source_url` is not part of it;
/// the extractor fills it in from the request.
pub fn recipe_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": nullable_string("The recipe title"),
            "description": nullable_string("Recipe description or summary"),
            "prep_time": nullable_string("Preparation time"),
            "cook_time": nullable_string("Cooking time"),
            "total_time": nullable_string("Total time"),
            "servings": nullable_string("Number of servings"),
            "difficulty": nullable_string("Difficulty level"),
            "cuisine": nullable_string("Type of cuisine"),
            "course": nullable_string("Course type (appetizer, main, dessert, etc.)"),
            "ingredients": {
                "type": "array",
                "description": "List of ingredients",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string", "description": "The ingredient name" },
                        "amount": nullable_string("The amount/quantity, as written"),
                        "unit": nullable_string("The unit of measurement"),
                        "notes": nullable_string("Any special notes or preparations")
                    },
                    "required": ["name"],
                    "additionalProperties": false
                }
            },
            "steps": {
                "type": "array",
                "description": "List of cooking steps, numbered from 1",
                "items": {
                    "type": "object",
                    "properties": {
                        "step_number": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "The step number in sequence"
                        },
                        "instruction": { "type": "string", "description": "The instruction for this step" },
                        "duration": nullable_string("Time duration for this step if mentioned")
                    },
                    "required": ["step_number", "instruction"],
                    "additionalProperties": false
                }
            },
            "image_urls": {
                "type": "array",
                "description": "Absolute URLs of recipe images",
                "items": { "type": "string" }
            },
            "nutrition_info": {
                "type": ["object", "null"],
                "description": "Nutritional information if available",
                "additionalProperties": { "type": "string" }
            },
            "tags": {
                "type": "array",
                "description": "Recipe tags or categories",
                "items": { "type": "string" }
            },
            "author": nullable_string("Recipe author")
        },
        "required": ["ingredients", "steps"],
        "additionalProperties": false
    })
}
